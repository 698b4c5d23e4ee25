//! First-run population of an empty catalog from a list of product names.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::inventory::{InventoryStore, NewPart};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SeedOutcome {
    /// The catalog already had rows; nothing was read.
    Skipped { existing: usize },
    Seeded { inserted: usize },
}

/// Seed from a newline-delimited file. The file is only opened when the
/// catalog is empty, so a missing file is harmless once data exists.
pub fn seed_from_file(store: &InventoryStore, path: &Path) -> Result<SeedOutcome> {
    if let Some(outcome) = skip_if_populated(store)? {
        return Ok(outcome);
    }
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let outcome = seed_from_reader(store, BufReader::new(file))?;
    log::info!(target: "seed", "seeded catalog from {}: {outcome:?}", path.display());
    Ok(outcome)
}

/// One placeholder part per non-blank line.
pub fn seed_from_reader<R: BufRead>(store: &InventoryStore, reader: R) -> Result<SeedOutcome> {
    if let Some(outcome) = skip_if_populated(store)? {
        return Ok(outcome);
    }
    let mut parts = Vec::new();
    for line in reader.lines() {
        let line = line.context("failed to read seed line")?;
        let name = line.trim();
        if !name.is_empty() {
            parts.push(NewPart::placeholder(name));
        }
    }
    if parts.is_empty() {
        return Ok(SeedOutcome::Seeded { inserted: 0 });
    }
    let inserted = store.add_parts(&parts);
    if inserted == 0 {
        bail!("catalog rejected all {} seed entries", parts.len());
    }
    Ok(SeedOutcome::Seeded { inserted })
}

fn skip_if_populated(store: &InventoryStore) -> Result<Option<SeedOutcome>> {
    let Some(existing) = store.count_parts() else {
        bail!("catalog at {} is unavailable", store.path().display());
    };
    Ok((existing > 0).then_some(SeedOutcome::Skipped { existing }))
}
