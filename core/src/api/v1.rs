//! Version 1 of the command API.
//!
//! Commands are thin wrappers that validate input, push slow work onto the
//! blocking pool and return serde-friendly payloads. Errors come back as
//! user-facing strings.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::export::{self, DEFAULT_LABELS};
use crate::inventory::{
    AddOutcome, FieldValue, InventoryStore, NewPart, Part, PartField, PartFilter, PartId,
    PartUpdate, DEFAULT_SUGGESTION_LIMIT,
};
use crate::logging::StockEvent;
use crate::settings::{AppSettings, AppSettingsUpdate, SettingsStore};
use crate::workers::{self, DeleteOptions, DeleteReport};

const DEFAULT_EVENT_LIMIT: usize = 50;

/// Shared state handed to each command handler.
#[derive(Clone)]
pub struct ApiState {
    pub inventory: Arc<InventoryStore>,
    pub settings: Arc<SettingsStore>,
}

#[derive(Serialize)]
pub struct CatalogStatus {
    pub ok: bool,
    pub path: String,
    pub parts: usize,
    pub tables: Vec<String>,
}

/// Confirm the catalog is reachable and report its size.
pub fn catalog_status(state: &ApiState) -> Result<CatalogStatus, String> {
    let parts = state
        .inventory
        .count_parts()
        .ok_or_else(|| "the catalog is not available".to_string())?;
    Ok(CatalogStatus {
        ok: true,
        path: state.inventory.path().display().to_string(),
        parts,
        tables: state.inventory.table_names(),
    })
}

/// Whole catalog, or the substring matches for `q`.
pub fn list_parts(state: &ApiState, q: Option<String>) -> Result<Vec<Part>, String> {
    Ok(match q {
        Some(q) => state.inventory.search_parts(&q),
        None => state.inventory.get_all_parts(),
    })
}

/// Parts matching every set term of `filter`: category and name substrings
/// (case-insensitive) and an inclusive price range open at either end.
pub fn filter_parts(state: &ApiState, filter: PartFilter) -> Result<Vec<Part>, String> {
    if let (Some(min), Some(max)) = (filter.min_price, filter.max_price) {
        if min > max {
            return Err(format!("minimum price {min} is above maximum price {max}"));
        }
    }
    Ok(state.inventory.filter_parts(&filter))
}

/// Full catalog load on the blocking pool, for the initial table fill.
pub async fn load_catalog(state: &ApiState) -> Result<Vec<Part>, String> {
    workers::load_catalog(Arc::clone(&state.inventory))
        .await
        .map_err(|e| e.to_string())
}

pub fn suggest_product_names(
    state: &ApiState,
    prefix: &str,
    limit: Option<usize>,
) -> Result<Vec<String>, String> {
    Ok(state
        .inventory
        .search_product_names_by_prefix(prefix, limit.unwrap_or(DEFAULT_SUGGESTION_LIMIT)))
}

#[derive(Deserialize)]
pub struct AddPartInput {
    #[serde(flatten)]
    pub part: NewPart,
    /// Replace an existing part with the same name instead of refusing.
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Serialize)]
pub struct AddPartOutput {
    pub id: PartId,
    pub overwritten: bool,
}

/// Add a part, or overwrite the one already carrying its name when asked to.
pub fn add_part(state: &ApiState, input: AddPartInput) -> Result<AddPartOutput, String> {
    input.part.validate().map_err(|e| e.to_string())?;
    let outcome = state
        .inventory
        .add_or_replace_part(&input.part, input.overwrite)
        .ok_or_else(|| "failed to add part".to_string())?;
    match outcome {
        AddOutcome::Exists(id) => Err(format!(
            "a part named `{}` already exists (id {id})",
            input.part.product_name.trim()
        )),
        AddOutcome::Added(id) => Ok(AddPartOutput {
            id,
            overwritten: false,
        }),
        AddOutcome::Replaced(id) => Ok(AddPartOutput {
            id,
            overwritten: true,
        }),
    }
}

#[derive(Deserialize)]
pub struct EditCellInput {
    pub id: PartId,
    pub field: String,
    pub text: String,
}

/// Inline table edit: one column of one row, from the text the user typed.
pub fn edit_cell(state: &ApiState, input: EditCellInput) -> Result<Part, String> {
    let field = input.field.parse::<PartField>().map_err(|e| e.to_string())?;
    let value = field.parse_value(&input.text).map_err(|e| e.to_string())?;
    apply_single(state, input.id, field, value)
}

/// Reset a column to its empty value. The product name cannot be cleared.
pub fn clear_field(state: &ApiState, id: PartId, field: &str) -> Result<Part, String> {
    let field = field.parse::<PartField>().map_err(|e| e.to_string())?;
    if field == PartField::ProductName {
        return Err("the product name cannot be cleared".to_string());
    }
    apply_single(state, id, field, field.cleared_value())
}

fn apply_single(
    state: &ApiState,
    id: PartId,
    field: PartField,
    value: FieldValue,
) -> Result<Part, String> {
    let mut update = PartUpdate::new();
    update.set(field, value).map_err(|e| e.to_string())?;
    update.validate().map_err(|e| e.to_string())?;
    if !state.inventory.update_part(id, &update) {
        return Err(format!("part {id} could not be updated"));
    }
    state
        .inventory
        .get_part(id)
        .ok_or_else(|| format!("part {id} not found"))
}

#[derive(Deserialize)]
pub struct DeletePartsInput {
    pub ids: Vec<PartId>,
    pub chunk_size: Option<usize>,
}

/// Chunked delete on the blocking pool.
pub async fn delete_parts(state: &ApiState, input: DeletePartsInput) -> Result<DeleteReport, String> {
    let options = DeleteOptions {
        chunk_size: input.chunk_size.unwrap_or(workers::DEFAULT_DELETE_CHUNK),
        return_ids: true,
    };
    let cancel = Arc::new(AtomicBool::new(false));
    workers::delete_in_background(
        Arc::clone(&state.inventory),
        input.ids,
        options,
        cancel,
        |done, total| log::debug!(target: "api", "deleted {done}/{total}"),
    )
    .await
    .map_err(|e| e.to_string())
}

#[derive(Deserialize)]
pub struct ExportInput {
    pub path: PathBuf,
    pub q: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExportOutput {
    pub path: PathBuf,
    pub rows: usize,
}

/// Write the current view (everything, or the matches for `q`) as CSV.
pub fn export_parts(state: &ApiState, input: ExportInput) -> Result<ExportOutput, String> {
    let parts = list_parts(state, input.q)?;
    let path = export::export_to_path(&input.path, &parts, &DEFAULT_LABELS)
        .map_err(|e| format!("{e:#}"))?;
    Ok(ExportOutput {
        path,
        rows: parts.len(),
    })
}

/// Parts at or below the configured low-stock threshold.
pub fn low_stock(state: &ApiState) -> Result<Vec<Part>, String> {
    let threshold = state
        .settings
        .low_stock_threshold()
        .map_err(|e| e.to_string())?;
    Ok(state.inventory.low_stock_parts(threshold))
}

pub fn get_settings(state: &ApiState) -> Result<AppSettings, String> {
    state.settings.snapshot().map_err(|e| e.to_string())
}

pub fn update_settings(state: &ApiState, update: AppSettingsUpdate) -> Result<AppSettings, String> {
    state.settings.update(update).map_err(|e| e.to_string())
}

pub fn recent_events(state: &ApiState, limit: Option<usize>) -> Result<Vec<StockEvent>, String> {
    Ok(state
        .inventory
        .recent_events(limit.unwrap_or(DEFAULT_EVENT_LIMIT)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Price;

    fn state() -> (tempfile::TempDir, ApiState) {
        let dir = tempfile::tempdir().unwrap();
        let state = ApiState {
            inventory: Arc::new(InventoryStore::open_in_dir(dir.path()).unwrap()),
            settings: Arc::new(SettingsStore::open(dir.path()).unwrap()),
        };
        (dir, state)
    }

    fn input(name: &str, quantity: i64, overwrite: bool) -> AddPartInput {
        AddPartInput {
            part: NewPart::new("Cooling", "Ford", "Focus", name, quantity, Price::from_cents(4500)),
            overwrite,
        }
    }

    #[test]
    fn status_reports_tables_and_count() {
        let (_dir, state) = state();
        add_part(&state, input("Radiator Cap", 1, false)).unwrap();
        let status = catalog_status(&state).unwrap();
        assert_eq!(status.parts, 1);
        assert!(status.tables.contains(&"parts".to_string()));
        assert!(status.tables.contains(&"event_log".to_string()));
    }

    #[test]
    fn duplicate_name_needs_overwrite() {
        let (_dir, state) = state();
        let first = add_part(&state, input("Water Pump", 2, false)).unwrap();
        assert!(!first.overwritten);

        let refused = add_part(&state, input("water pump", 9, false)).unwrap_err();
        assert!(refused.contains("already exists"));

        let replaced = add_part(&state, input("Water Pump", 9, true)).unwrap();
        assert!(replaced.overwritten);
        assert_eq!(replaced.id, first.id);
        assert_eq!(state.inventory.get_part(first.id).unwrap().quantity, 9);
        assert_eq!(state.inventory.count_parts(), Some(1));
    }

    #[test]
    fn add_part_deserialises_with_placeholders() {
        let parsed: AddPartInput =
            serde_json::from_str(r#"{"product_name":"Hose","price":"3.20","overwrite":true}"#)
                .unwrap();
        assert!(parsed.overwrite);
        assert_eq!(parsed.part.car_name, "-");
        assert_eq!(parsed.part.price, Price::from_cents(320));
    }

    #[test]
    fn edit_cell_parses_text_for_the_column() {
        let (_dir, state) = state();
        let id = add_part(&state, input("Fan", 1, false)).unwrap().id;

        let edited = edit_cell(
            &state,
            EditCellInput {
                id,
                field: "price".into(),
                text: "19.99".into(),
            },
        )
        .unwrap();
        assert_eq!(edited.price, Price::from_cents(1999));

        let bad_number = edit_cell(
            &state,
            EditCellInput {
                id,
                field: "quantity".into(),
                text: "lots".into(),
            },
        );
        assert!(bad_number.is_err());

        let unknown = edit_cell(
            &state,
            EditCellInput {
                id,
                field: "colour".into(),
                text: "red".into(),
            },
        );
        assert!(unknown.is_err());
        assert_eq!(state.inventory.get_part(id).unwrap().quantity, 1);
    }

    #[test]
    fn clearing_resets_to_empty_values() {
        let (_dir, state) = state();
        let id = add_part(&state, input("Thermostat", 6, false)).unwrap().id;

        assert_eq!(clear_field(&state, id, "quantity").unwrap().quantity, 0);
        assert_eq!(clear_field(&state, id, "price").unwrap().price, Price::ZERO);
        assert_eq!(clear_field(&state, id, "model").unwrap().model, "");
        assert!(clear_field(&state, id, "product_name").is_err());
        assert_eq!(state.inventory.get_part(id).unwrap().product_name, "Thermostat");
    }

    #[test]
    fn low_stock_uses_configured_threshold() {
        let (_dir, state) = state();
        add_part(&state, input("Belt", 3, false)).unwrap();
        add_part(&state, input("Chain", 12, false)).unwrap();
        assert_eq!(low_stock(&state).unwrap().len(), 1);

        update_settings(
            &state,
            AppSettingsUpdate {
                low_stock_threshold: Some(20),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(low_stock(&state).unwrap().len(), 2);
    }

    #[test]
    fn export_follows_the_search_filter() {
        let (dir, state) = state();
        add_part(&state, input("Fuel Pump", 1, false)).unwrap();
        add_part(&state, input("Oil Pan", 1, false)).unwrap();
        let out = export_parts(
            &state,
            ExportInput {
                path: dir.path().join("pumps"),
                q: Some("pump".into()),
            },
        )
        .unwrap();
        assert_eq!(out.rows, 1);
        assert_eq!(out.path, dir.path().join("pumps.csv"));
    }

    #[tokio::test]
    async fn delete_runs_in_background_and_reports_ids() {
        let (_dir, state) = state();
        let a = add_part(&state, input("Gasket", 1, false)).unwrap().id;
        let b = add_part(&state, input("Seal", 1, false)).unwrap().id;

        let report = delete_parts(
            &state,
            DeletePartsInput {
                ids: vec![a, b, b + 100],
                chunk_size: Some(2),
            },
        )
        .await
        .unwrap();
        assert_eq!(report.requested, 3);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.deleted_ids, Some(vec![a, b]));
        assert!(load_catalog(&state).await.unwrap().is_empty());

        // The first chunk removes both rows in one statement; the second
        // removes nothing and logs nothing.
        let codes: Vec<_> = recent_events(&state, Some(2))
            .unwrap()
            .into_iter()
            .filter_map(|e| e.code)
            .collect();
        assert_eq!(codes, vec!["PRT-0004", "PRT-0001"]);
    }

    #[test]
    fn concurrent_adds_of_one_name_let_one_through() {
        let (_dir, state) = state();
        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..6)
                .map(|n| {
                    let state = state.clone();
                    scope.spawn(move || add_part(&state, input("Timing Belt", n, false)))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let added: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(added.len(), 1);
        assert!(!added[0].overwritten);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.contains("already exists")));
        assert_eq!(state.inventory.count_parts(), Some(1));
    }

    #[test]
    fn filter_combines_category_and_price_range() {
        let (_dir, state) = state();
        add_part(&state, input("Hose Clamp", 1, false)).unwrap();
        add_part(
            &state,
            AddPartInput {
                part: NewPart::new("Brakes", "Ford", "Focus", "Brake Disc", 2, Price::from_cents(9000)),
                overwrite: false,
            },
        )
        .unwrap();

        let cooling = filter_parts(&state, PartFilter::new().with_category("cool")).unwrap();
        assert_eq!(cooling.len(), 1);
        assert_eq!(cooling[0].product_name, "Hose Clamp");

        let pricey = filter_parts(
            &state,
            PartFilter::new().with_min_price(Price::from_cents(5000)),
        )
        .unwrap();
        assert_eq!(pricey.len(), 1);
        assert_eq!(pricey[0].product_name, "Brake Disc");

        let parsed: PartFilter =
            serde_json::from_str(r#"{"category":"BRAKES","max_price":"90"}"#).unwrap();
        assert_eq!(filter_parts(&state, parsed).unwrap().len(), 1);

        let inverted = PartFilter::new()
            .with_min_price(Price::from_cents(100))
            .with_max_price(Price::from_cents(50));
        assert!(filter_parts(&state, inverted).is_err());
    }
}
