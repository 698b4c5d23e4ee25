//! User preferences kept in their own SQLite file.
//!
//! The UI builds its theme and translator from an [`AppSettings`] snapshot
//! instead of reading process-wide globals. The inventory store never looks
//! at these values.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Result};
use r2d2_sqlite::rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::db::{self, DbPool};

pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 10;

pub const KEY_LANGUAGE: &str = "language";
pub const KEY_RTL: &str = "rtl";
pub const KEY_THEME: &str = "theme";
pub const KEY_CURRENCY: &str = "default_currency";
pub const KEY_LOW_STOCK: &str = "low_stock_threshold";

const DEFAULTS: &[(&str, &str)] = &[
    (KEY_LANGUAGE, "en"),
    (KEY_RTL, "false"),
    (KEY_THEME, "light"),
    (KEY_CURRENCY, "ILS"),
    (KEY_LOW_STOCK, "10"),
    ("backup_interval", "0"),
    ("auto_restock", "true"),
];

const RTL_LANGUAGES: &[&str] = &["he", "ar"];

/// Typed view of the preferences the UI is built from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AppSettings {
    pub language: String,
    pub rtl: bool,
    pub theme: String,
    pub currency: String,
    pub low_stock_threshold: i64,
}

/// Fields left as `None` keep their stored value.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AppSettingsUpdate {
    pub language: Option<String>,
    pub rtl: Option<bool>,
    pub theme: Option<String>,
    pub currency: Option<String>,
    pub low_stock_threshold: Option<i64>,
}

#[derive(Clone)]
pub struct SettingsStore {
    pool: DbPool,
}

impl SettingsStore {
    /// Open `settings.db` inside `workspace_dir`, seeding defaults on first use.
    pub fn open(workspace_dir: &Path) -> Result<Self> {
        Ok(Self::from_pool(db::init_settings_db(workspace_dir)?))
    }

    pub fn from_pool(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.pool.get()?;
        read_setting(&conn, key)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(anyhow!("setting key must not be empty"));
        }
        let conn = self.pool.get()?;
        upsert_setting(&conn, key, value, now())
    }

    pub fn all(&self) -> Result<BTreeMap<String, String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut settings = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            settings.insert(key, value);
        }
        Ok(settings)
    }

    pub fn snapshot(&self) -> Result<AppSettings> {
        let conn = self.pool.get()?;
        read_snapshot(&conn)
    }

    pub fn low_stock_threshold(&self) -> Result<i64> {
        Ok(self.snapshot()?.low_stock_threshold)
    }

    /// Persist the supplied fields together. Choosing a language without an
    /// explicit `rtl` flag derives the text direction from the language.
    pub fn update(&self, update: AppSettingsUpdate) -> Result<AppSettings> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let now = now();
        let rtl = update
            .rtl
            .or_else(|| update.language.as_deref().map(is_rtl_language));
        if let Some(language) = &update.language {
            upsert_setting(&tx, KEY_LANGUAGE, language.trim(), now)?;
        }
        if let Some(rtl) = rtl {
            upsert_setting(&tx, KEY_RTL, if rtl { "true" } else { "false" }, now)?;
        }
        if let Some(theme) = &update.theme {
            upsert_setting(&tx, KEY_THEME, theme.trim(), now)?;
        }
        if let Some(currency) = &update.currency {
            upsert_setting(&tx, KEY_CURRENCY, &currency.trim().to_uppercase(), now)?;
        }
        if let Some(threshold) = update.low_stock_threshold {
            let threshold = if threshold < 0 {
                DEFAULT_LOW_STOCK_THRESHOLD
            } else {
                threshold
            };
            upsert_setting(&tx, KEY_LOW_STOCK, &threshold.to_string(), now)?;
        }
        tx.commit()?;
        read_snapshot(&conn)
    }
}

/// Insert any missing default; existing user choices are left alone.
pub fn seed_defaults(conn: &Connection) -> Result<()> {
    let now = now();
    for (key, value) in DEFAULTS {
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, now],
        )?;
    }
    Ok(())
}

pub fn is_rtl_language(language: &str) -> bool {
    RTL_LANGUAGES.contains(&language.trim())
}

/// Digits only and non-negative, otherwise the default, as the settings form
/// normalises it.
pub fn normalize_threshold(raw: &str) -> i64 {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return DEFAULT_LOW_STOCK_THRESHOLD;
    }
    raw.parse().unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD)
}

fn read_snapshot(conn: &Connection) -> Result<AppSettings> {
    let text = |key: &str, fallback: &str| -> Result<String> {
        Ok(read_setting(conn, key)?.unwrap_or_else(|| fallback.to_string()))
    };
    let language = text(KEY_LANGUAGE, "en")?;
    let rtl = match read_setting(conn, KEY_RTL)? {
        Some(flag) => flag.trim().eq_ignore_ascii_case("true"),
        None => is_rtl_language(&language),
    };
    Ok(AppSettings {
        rtl,
        theme: text(KEY_THEME, "light")?,
        currency: text(KEY_CURRENCY, "ILS")?,
        low_stock_threshold: read_setting(conn, KEY_LOW_STOCK)?
            .map(|raw| normalize_threshold(&raw))
            .unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD),
        language,
    })
}

fn read_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

fn upsert_setting(conn: &Connection, key: &str, value: &str, now: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, now],
    )?;
    Ok(())
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
