//! The part catalog: record types and the SQLite store that owns them.

pub mod model;
pub mod store;

pub use model::{
    AddOutcome, FieldValue, NewPart, Part, PartField, PartFilter, PartId, PartUpdate, Price,
    PriceParseError, PLACEHOLDER,
};
pub use store::{
    InventoryStore, StoreConfig, DEFAULT_SUGGESTION_LIMIT, EVENT_LOG_RETENTION,
    MAX_IDS_PER_STATEMENT,
};
