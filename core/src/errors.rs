use std::path::PathBuf;

use thiserror::Error;

/// Fatal failure while bringing the catalog database up. The application
/// cannot continue without a working store, so this is the only error the
/// store hands back directly.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("cannot create data directory {}", .path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot open inventory database at {}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to apply schema {name}")]
    Schema {
        name: &'static str,
        #[source]
        source: rusqlite::Error,
    },
}

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("Inventory store is closed")]
    Closed,
    #[error("Part {0} not found")]
    NotFound(i64),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Unknown part field `{0}`")]
    UnknownField(String),
    #[error("Field `{field}` expects {expected}")]
    FieldType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl InventoryError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "INV-1001",
            Self::Closed => "INV-1002",
            Self::NotFound(_) => "PRT-1001",
            Self::InvalidInput(_) => "PRT-1002",
            Self::UnknownField(_) => "PRT-1003",
            Self::FieldType { .. } => "PRT-1004",
            Self::Storage(_) => "INV-1000",
        }
    }

    pub fn explain(&self) -> &'static str {
        match self {
            Self::Connection(_) => "The application could not open the inventory database.",
            Self::Closed => "The inventory store was closed and must be reopened.",
            Self::NotFound(_) => "No part exists for the requested ID.",
            Self::InvalidInput(_) => {
                "Names must not be blank and quantities or prices must not be negative."
            }
            Self::UnknownField(_) => "The caller referenced a column the catalog does not have.",
            Self::FieldType { .. } => "The caller supplied a value of the wrong kind for a column.",
            Self::Storage(_) => "SQLite rejected the operation even after reconnecting.",
        }
    }

    /// Programmer errors are the only failures callers see as hard errors.
    pub fn is_programmer_error(&self) -> bool {
        matches!(self, Self::UnknownField(_) | Self::FieldType { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_per_variant() {
        assert_eq!(InventoryError::Closed.code(), "INV-1002");
        assert_eq!(InventoryError::NotFound(7).code(), "PRT-1001");
        assert_eq!(
            InventoryError::UnknownField("colour".into()).to_string(),
            "Unknown part field `colour`"
        );
    }

    #[test]
    fn only_field_errors_are_programmer_errors() {
        assert!(InventoryError::UnknownField("x".into()).is_programmer_error());
        assert!(InventoryError::FieldType {
            field: "quantity",
            expected: "an integer"
        }
        .is_programmer_error());
        assert!(!InventoryError::Closed.is_programmer_error());
        assert!(!InventoryError::InvalidInput("blank".into()).is_programmer_error());
    }
}
