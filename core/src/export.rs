//! CSV export of a list of parts.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use time::format_description::well_known::Rfc3339;

use crate::inventory::Part;

/// Header labels, one per column in export order.
pub type ColumnLabels = [&'static str; 8];

pub const DEFAULT_LABELS: ColumnLabels = [
    "ID",
    "Category",
    "Car Name",
    "Model",
    "Product Name",
    "Quantity",
    "Price",
    "Last Updated",
];

/// Write a header row then one row per part, RFC 4180 style.
pub fn write_csv<W: Write>(mut writer: W, parts: &[Part], labels: &ColumnLabels) -> Result<()> {
    write_record(&mut writer, labels.iter().copied())?;
    for part in parts {
        let last_updated = part
            .last_updated
            .format(&Rfc3339)
            .context("failed to format timestamp")?;
        let id = part.id.to_string();
        let quantity = part.quantity.to_string();
        let price = part.price.to_string();
        write_record(
            &mut writer,
            [
                id.as_str(),
                &part.category,
                &part.car_name,
                &part.model,
                &part.product_name,
                &quantity,
                &price,
                &last_updated,
            ],
        )?;
    }
    writer.flush().context("failed to flush export")?;
    Ok(())
}

/// Export to `path`, adding a `.csv` extension when it is missing. Returns
/// the path actually written.
pub fn export_to_path(path: &Path, parts: &[Part], labels: &ColumnLabels) -> Result<PathBuf> {
    let path = with_csv_extension(path);
    let file = File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
    write_csv(BufWriter::new(file), parts, labels)?;
    log::info!(target: "export", "exported {} parts to {}", parts.len(), path.display());
    Ok(path)
}

fn with_csv_extension(path: &Path) -> PathBuf {
    let has_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if has_csv {
        path.to_path_buf()
    } else {
        let mut raw = path.as_os_str().to_owned();
        raw.push(".csv");
        PathBuf::from(raw)
    }
}

fn write_record<'a, W: Write>(
    writer: &mut W,
    fields: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    let mut line = String::new();
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        push_field(&mut line, field);
    }
    line.push_str("\r\n");
    writer
        .write_all(line.as_bytes())
        .context("failed to write export row")
}

fn push_field(line: &mut String, field: &str) {
    if field.contains([',', '"', '\r', '\n']) {
        line.push('"');
        line.push_str(&field.replace('"', "\"\""));
        line.push('"');
    } else {
        line.push_str(field);
    }
}
