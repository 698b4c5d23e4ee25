//! SQLite-backed part catalog shared by the interactive path and background
//! workers.
//!
//! All access goes through one connection guarded by a store-wide mutex, so
//! statements issued from different threads never interleave. Each operation
//! tolerates a stale or dropped handle: a transient SQLite failure triggers a
//! single reconnect (which re-applies the schema) and one retry. Apart from
//! [`InventoryStore::open`], operations never return errors; they log the
//! cause and report a sentinel (`None`, `false`, `0` or an empty list).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::Level;
use rusqlite::types::{Type, Value};
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Params, Row,
    TransactionBehavior,
};
use serde_json::json;
use time::OffsetDateTime;

use super::model::{AddOutcome, NewPart, Part, PartFilter, PartId, PartUpdate, Price};
use crate::db::{self, INVENTORY_DB_FILE, INVENTORY_SCHEMA};
use crate::errors::{ConnectionError, InventoryError};
use crate::logging::{self, log_event, StockEvent};

/// Autocomplete cap used when the caller has no preference.
pub const DEFAULT_SUGGESTION_LIMIT: usize = 5;
/// Ids bound per `DELETE ... IN (...)` statement, well under SQLite's variable limit.
pub const MAX_IDS_PER_STATEMENT: usize = 500;
/// Activity log rows kept when a catalog is opened.
pub const EVENT_LOG_RETENTION: usize = 10_000;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MODULE: &str = "inventory";
const PART_COLUMNS: &str =
    "id, category, car_name, model, product_name, quantity, price_cents, last_updated";

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// `inventory.db` inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(INVENTORY_DB_FILE))
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }
}

enum Link {
    Connected(Connection),
    Disconnected,
    Closed,
}

struct Session {
    link: Link,
    /// Last `last_updated` stamp handed out, in unix nanoseconds.
    clock: i64,
}

impl Session {
    fn ensure_connected(&mut self, config: &StoreConfig) -> Result<(), InventoryError> {
        match self.link {
            Link::Closed => Err(InventoryError::Closed),
            Link::Connected(_) => Ok(()),
            Link::Disconnected => {
                let conn = open_catalog(config)?;
                self.clock = self.clock.max(latest_stamp(&conn));
                self.link = Link::Connected(conn);
                log::debug!(target: MODULE, "reconnected to {}", config.path.display());
                Ok(())
            }
        }
    }

    fn connection(&mut self) -> Result<&mut Connection, InventoryError> {
        match &mut self.link {
            Link::Connected(conn) => Ok(conn),
            Link::Disconnected | Link::Closed => Err(InventoryError::Closed),
        }
    }

    fn drop_link(&mut self) {
        if let Link::Connected(conn) = std::mem::replace(&mut self.link, Link::Disconnected) {
            close_quietly(conn);
        }
    }

    fn close(&mut self) {
        if let Link::Connected(conn) = std::mem::replace(&mut self.link, Link::Closed) {
            close_quietly(conn);
        }
    }

    /// Wall-clock nanoseconds, bumped past the previous stamp when the clock
    /// has not advanced, so later mutations always sort first.
    fn next_stamp(&mut self) -> i64 {
        let now = i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos())
            .unwrap_or(i64::MAX);
        self.clock = now.max(self.clock.saturating_add(1));
        self.clock
    }
}

/// Durable CRUD and search over the part catalog.
pub struct InventoryStore {
    config: StoreConfig,
    session: Mutex<Session>,
}

impl InventoryStore {
    /// Open the catalog and ensure its schema. Failure here is fatal for the
    /// application and is the only error the store returns.
    pub fn open(config: StoreConfig) -> Result<Self, ConnectionError> {
        let conn = open_catalog(&config)?;
        let clock = latest_stamp(&conn);
        match logging::prune_events(&conn, EVENT_LOG_RETENTION) {
            Ok(0) => {}
            Ok(pruned) => log::debug!(target: MODULE, "pruned {pruned} old events"),
            Err(err) => log::warn!(target: MODULE, "event log pruning failed: {err}"),
        }
        log::debug!(target: MODULE, "opened catalog at {}", config.path.display());
        Ok(Self {
            config,
            session: Mutex::new(Session {
                link: Link::Connected(conn),
                clock,
            }),
        })
    }

    pub fn open_in_dir(dir: &Path) -> Result<Self, ConnectionError> {
        Self::open(StoreConfig::in_dir(dir))
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.session().link, Link::Closed)
    }

    /// Insert a part and return its new id.
    pub fn add_part(&self, part: &NewPart) -> Option<PartId> {
        settle("add_part", self.try_add_part(part))
    }

    /// Insert `part`, or, when a part with the same name (ignoring case)
    /// exists, replace it if `overwrite` is set and report it otherwise.
    /// The lookup and the write happen in one transaction.
    pub fn add_or_replace_part(&self, part: &NewPart, overwrite: bool) -> Option<AddOutcome> {
        settle("add_or_replace_part", self.try_add_or_replace(part, overwrite))
    }

    /// Insert many parts in one transaction; invalid entries are skipped.
    pub fn add_parts(&self, parts: &[NewPart]) -> usize {
        let valid: Vec<&NewPart> = parts
            .iter()
            .filter(|part| match part.validate() {
                Ok(()) => true,
                Err(err) => {
                    log::warn!(target: MODULE, "skipping `{}`: {err}", part.product_name);
                    false
                }
            })
            .collect();
        if valid.is_empty() {
            return 0;
        }
        let result = self.run("add_parts", |conn, stamp| {
            let tx = conn.transaction()?;
            for part in &valid {
                insert_part(&tx, part, stamp)?;
            }
            log_event(
                &tx,
                Level::Info,
                Some("PRT-0005"),
                MODULE,
                "parts imported",
                Some(json!({ "count": valid.len() })),
            )
            .ok();
            tx.commit()?;
            Ok(valid.len())
        });
        settle("add_parts", result).unwrap_or(0)
    }

    pub fn get_part(&self, id: PartId) -> Option<Part> {
        let sql = format!("SELECT {PART_COLUMNS} FROM parts WHERE id = ?1");
        let result = self.read("get_part", |conn| {
            conn.prepare_cached(&sql)?
                .query_row([id], map_part)
                .optional()
        });
        settle("get_part", result).flatten()
    }

    /// Look a part up by its natural key, ignoring case and surrounding blanks.
    pub fn get_part_by_name(&self, product_name: &str) -> Option<Part> {
        let sql = format!(
            "SELECT {PART_COLUMNS} FROM parts WHERE product_name = ?1 ORDER BY id LIMIT 1"
        );
        let name = product_name.trim();
        let result = self.read("get_part_by_name", |conn| {
            conn.prepare_cached(&sql)?
                .query_row([name], map_part)
                .optional()
        });
        settle("get_part_by_name", result).flatten()
    }

    /// Whole catalog, most recently updated first.
    pub fn get_all_parts(&self) -> Vec<Part> {
        let sql = format!(
            "SELECT {PART_COLUMNS} FROM parts ORDER BY last_updated DESC, id DESC"
        );
        let result = self.read("get_all_parts", |conn| query_parts(conn, &sql, []));
        settle("get_all_parts", result).unwrap_or_default()
    }

    /// Case-insensitive substring match over car name, model and product name.
    ///
    /// An empty term applies no filter and returns the whole catalog; a
    /// whitespace term matches literally like any other.
    pub fn search_parts(&self, term: &str) -> Vec<Part> {
        if term.is_empty() {
            return self.get_all_parts();
        }
        let sql = format!(
            "SELECT {PART_COLUMNS} FROM parts \
             WHERE car_name LIKE ?1 ESCAPE '\\' \
                OR model LIKE ?1 ESCAPE '\\' \
                OR product_name LIKE ?1 ESCAPE '\\' \
             ORDER BY last_updated DESC, id DESC"
        );
        let pattern = format!("%{}%", escape_like(term));
        let result = self.read("search_parts", |conn| query_parts(conn, &sql, [&pattern]));
        settle("search_parts", result).unwrap_or_default()
    }

    /// Parts matching every criterion of `filter`, ordered like the full
    /// scan. An empty filter returns the whole catalog.
    pub fn filter_parts(&self, filter: &PartFilter) -> Vec<Part> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(category) = filter.category_term() {
            clauses.push("category LIKE ? ESCAPE '\\'");
            values.push(Value::Text(format!("%{}%", escape_like(category))));
        }
        if let Some(name) = filter.name_term() {
            clauses.push("product_name LIKE ? ESCAPE '\\'");
            values.push(Value::Text(format!("%{}%", escape_like(name))));
        }
        if let Some(min) = filter.min_price {
            clauses.push("price_cents >= ?");
            values.push(Value::Integer(min.cents()));
        }
        if let Some(max) = filter.max_price {
            clauses.push("price_cents <= ?");
            values.push(Value::Integer(max.cents()));
        }
        let mut sql = format!("SELECT {PART_COLUMNS} FROM parts");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY last_updated DESC, id DESC");
        let result = self.read("filter_parts", |conn| {
            query_parts(conn, &sql, params_from_iter(values.iter()))
        });
        settle("filter_parts", result).unwrap_or_default()
    }

    /// Product names starting with `prefix`, alphabetical, at most `limit`.
    /// Names differing only in case are listed once.
    pub fn search_product_names_by_prefix(&self, prefix: &str, limit: usize) -> Vec<String> {
        if limit == 0 {
            return Vec::new();
        }
        let pattern = format!("{}%", escape_like(prefix));
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let result = self.read("search_product_names_by_prefix", |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT DISTINCT product_name FROM parts \
                 WHERE product_name LIKE ?1 ESCAPE '\\' \
                 ORDER BY product_name LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![pattern, limit], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()
        });
        settle("search_product_names_by_prefix", result).unwrap_or_default()
    }

    /// Parts at or below `threshold`, emptiest first.
    pub fn low_stock_parts(&self, threshold: i64) -> Vec<Part> {
        let sql = format!(
            "SELECT {PART_COLUMNS} FROM parts WHERE quantity <= ?1 ORDER BY quantity, product_name"
        );
        let result = self.read("low_stock_parts", |conn| query_parts(conn, &sql, [threshold]));
        settle("low_stock_parts", result).unwrap_or_default()
    }

    pub fn count_parts(&self) -> Option<usize> {
        let result = self.read("count_parts", |conn| {
            conn.query_row("SELECT COUNT(*) FROM parts", [], |row| row.get::<_, i64>(0))
        });
        settle("count_parts", result).map(|count| usize::try_from(count).unwrap_or(0))
    }

    /// Apply the supplied fields only. Rejects blank names and negative
    /// numbers without writing anything.
    pub fn update_part(&self, id: PartId, update: &PartUpdate) -> bool {
        settle("update_part", self.try_update_part(id, update)).is_some()
    }

    pub fn delete_part(&self, id: PartId) -> bool {
        let result = self
            .run("delete_part", |conn, _| {
                let tx = conn.transaction()?;
                let deleted = tx.execute("DELETE FROM parts WHERE id = ?1", [id])?;
                if deleted > 0 {
                    log_event(
                        &tx,
                        Level::Info,
                        Some("PRT-0003"),
                        MODULE,
                        "part deleted",
                        Some(json!({ "id": id })),
                    )
                    .ok();
                }
                tx.commit()?;
                Ok(deleted)
            })
            .and_then(|deleted| found(id, deleted));
        settle("delete_part", result).is_some()
    }

    /// Delete every listed id that exists and return how many rows went.
    /// Duplicates are ignored; missing ids simply do not count.
    pub fn delete_parts(&self, ids: &[PartId]) -> usize {
        self.delete_parts_returning_ids(ids).len()
    }

    /// Like [`delete_parts`](Self::delete_parts), but reports which ids were
    /// actually removed, in ascending order.
    pub fn delete_parts_returning_ids(&self, ids: &[PartId]) -> Vec<PartId> {
        let unique: Vec<PartId> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        if unique.is_empty() {
            return Vec::new();
        }
        let result = self.run("delete_parts", |conn, _| {
            let tx = conn.transaction()?;
            let mut deleted = Vec::with_capacity(unique.len());
            for chunk in unique.chunks(MAX_IDS_PER_STATEMENT) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let mut stmt = tx.prepare(&format!(
                    "DELETE FROM parts WHERE id IN ({placeholders}) RETURNING id"
                ))?;
                let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| row.get(0))?;
                for row in rows {
                    deleted.push(row?);
                }
            }
            if !deleted.is_empty() {
                log_event(
                    &tx,
                    Level::Info,
                    Some("PRT-0004"),
                    MODULE,
                    "parts deleted",
                    Some(json!({ "requested": unique.len(), "deleted": deleted.len() })),
                )
                .ok();
            }
            tx.commit()?;
            deleted.sort_unstable();
            Ok(deleted)
        });
        settle("delete_parts", result).unwrap_or_default()
    }

    /// Tables present in the catalog file, for health checks.
    pub fn table_names(&self) -> Vec<String> {
        let result = self.read("table_names", |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()
        });
        settle("table_names", result).unwrap_or_default()
    }

    /// Latest entries of the catalog activity log.
    pub fn recent_events(&self, limit: usize) -> Vec<StockEvent> {
        let result = self.read("recent_events", |conn| logging::list_events(conn, limit));
        settle("recent_events", result).unwrap_or_default()
    }

    /// Release the connection. Safe to call repeatedly; the store cannot be
    /// reopened afterwards.
    pub fn close(&self) {
        self.session().close();
        log::debug!(target: MODULE, "closed catalog at {}", self.config.path.display());
    }

    fn try_add_part(&self, part: &NewPart) -> Result<PartId, InventoryError> {
        part.validate()?;
        self.run("add_part", |conn, stamp| {
            let tx = conn.transaction()?;
            let id = insert_part(&tx, part, stamp)?;
            log_event(
                &tx,
                Level::Info,
                Some("PRT-0001"),
                MODULE,
                "part added",
                Some(json!({ "id": id, "product_name": part.product_name.trim() })),
            )
            .ok();
            tx.commit()?;
            Ok(id)
        })
    }

    fn try_update_part(&self, id: PartId, update: &PartUpdate) -> Result<(), InventoryError> {
        if update.is_empty() {
            return Err(InventoryError::InvalidInput("no fields to update".into()));
        }
        update.validate()?;
        let assignments = update.column_values();
        let fields: Vec<&str> = update.fields().into_iter().map(|f| f.as_str()).collect();

        self.run("update_part", |conn, stamp| {
            let tx = conn.transaction()?;
            let changed = apply_update(&tx, id, &assignments, stamp)?;
            if changed > 0 {
                log_event(
                    &tx,
                    Level::Info,
                    Some("PRT-0002"),
                    MODULE,
                    "part updated",
                    Some(json!({ "id": id, "fields": fields })),
                )
                .ok();
            }
            tx.commit()?;
            Ok(changed)
        })
        .and_then(|changed| found(id, changed))
    }

    fn try_add_or_replace(&self, part: &NewPart, overwrite: bool) -> Result<AddOutcome, InventoryError> {
        part.validate()?;
        let name = part.product_name.trim();
        let assignments = PartUpdate::replace_with(part).column_values();
        self.run("add_or_replace_part", |conn, stamp| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let existing: Option<PartId> = tx
                .prepare_cached("SELECT id FROM parts WHERE product_name = ?1 ORDER BY id LIMIT 1")?
                .query_row([name], |row| row.get(0))
                .optional()?;
            let outcome = match existing {
                Some(id) if !overwrite => AddOutcome::Exists(id),
                Some(id) => {
                    apply_update(&tx, id, &assignments, stamp)?;
                    log_event(
                        &tx,
                        Level::Info,
                        Some("PRT-0002"),
                        MODULE,
                        "part replaced",
                        Some(json!({ "id": id, "product_name": name })),
                    )
                    .ok();
                    AddOutcome::Replaced(id)
                }
                None => {
                    let id = insert_part(&tx, part, stamp)?;
                    log_event(
                        &tx,
                        Level::Info,
                        Some("PRT-0001"),
                        MODULE,
                        "part added",
                        Some(json!({ "id": id, "product_name": name })),
                    )
                    .ok();
                    AddOutcome::Added(id)
                }
            };
            tx.commit()?;
            Ok(outcome)
        })
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        // A panic mid-statement leaves no open transaction behind (rusqlite
        // rolls back on drop), so the session is still usable.
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<T>(
        &self,
        op: &'static str,
        mut f: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, InventoryError> {
        self.run(op, |conn, _| f(&*conn))
    }

    /// Run `f` under the store lock with a fresh mutation stamp, reconnecting
    /// and retrying once on a transient failure.
    fn run<T>(
        &self,
        op: &'static str,
        mut f: impl FnMut(&mut Connection, i64) -> rusqlite::Result<T>,
    ) -> Result<T, InventoryError> {
        let mut session = self.session();
        session.ensure_connected(&self.config)?;
        let stamp = session.next_stamp();
        let first = {
            let conn = session.connection()?;
            f(conn, stamp)
        };
        match first {
            Err(err) if is_transient(&err) => {
                log::warn!(target: MODULE, "{op} failed ({err}); reconnecting and retrying once");
                session.drop_link();
                session.ensure_connected(&self.config)?;
                let conn = session.connection()?;
                Ok(f(conn, stamp)?)
            }
            outcome => Ok(outcome?),
        }
    }
}

fn open_catalog(config: &StoreConfig) -> Result<Connection, ConnectionError> {
    let conn = db::open_connection(&config.path, config.busy_timeout)?;
    db::apply_schema(&conn, INVENTORY_SCHEMA)?;
    Ok(conn)
}

fn latest_stamp(conn: &Connection) -> i64 {
    conn.query_row("SELECT COALESCE(MAX(last_updated), 0) FROM parts", [], |row| {
        row.get(0)
    })
    .unwrap_or(0)
}

fn close_quietly(conn: Connection) {
    if let Err((_, err)) = conn.close() {
        log::warn!(target: MODULE, "error while closing catalog connection: {err}");
    }
}

/// Failures worth a reconnect: anything SQLite reports except errors that
/// would repeat identically on a fresh handle.
fn is_transient(err: &rusqlite::Error) -> bool {
    err.sqlite_error_code().is_some_and(|code| {
        !matches!(
            code,
            ErrorCode::ConstraintViolation
                | ErrorCode::TooBig
                | ErrorCode::TypeMismatch
                | ErrorCode::ParameterOutOfRange
                | ErrorCode::AuthorizationForStatementDenied
        )
    })
}

fn settle<T>(op: &'static str, result: Result<T, InventoryError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err @ InventoryError::NotFound(_)) => {
            log::debug!(target: MODULE, "{op}: {err}");
            None
        }
        Err(err) if err.is_programmer_error() => {
            log::error!(target: MODULE, "{op} misused [{}]: {err}", err.code());
            None
        }
        Err(err) => {
            log::warn!(target: MODULE, "{op} failed [{}]: {err}. {}", err.code(), err.explain());
            None
        }
    }
}

fn found(id: PartId, rows: usize) -> Result<(), InventoryError> {
    if rows == 0 {
        Err(InventoryError::NotFound(id))
    } else {
        Ok(())
    }
}

fn insert_part(conn: &Connection, part: &NewPart, stamp: i64) -> rusqlite::Result<PartId> {
    conn.prepare_cached(
        "INSERT INTO parts (category, car_name, model, product_name, quantity, price_cents, last_updated) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?
    .execute(params![
        part.category,
        part.car_name,
        part.model,
        part.product_name.trim(),
        part.quantity,
        part.price.cents(),
        stamp,
    ])?;
    Ok(conn.last_insert_rowid())
}

fn apply_update(
    conn: &Connection,
    id: PartId,
    assignments: &[(&'static str, Value)],
    stamp: i64,
) -> rusqlite::Result<usize> {
    let mut sql = String::from("UPDATE parts SET ");
    for (column, _) in assignments {
        sql.push_str(column);
        sql.push_str(" = ?, ");
    }
    sql.push_str("last_updated = ? WHERE id = ?");
    let values = assignments
        .iter()
        .map(|(_, value)| value.clone())
        .chain([Value::Integer(stamp), Value::Integer(id)]);
    conn.execute(&sql, params_from_iter(values))
}

fn query_parts<P: Params>(conn: &Connection, sql: &str, params: P) -> rusqlite::Result<Vec<Part>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params, map_part)?;
    let mut parts = Vec::new();
    for row in rows {
        parts.push(row?);
    }
    Ok(parts)
}

fn map_part(row: &Row) -> rusqlite::Result<Part> {
    let stamp: i64 = row.get(7)?;
    let last_updated = OffsetDateTime::from_unix_timestamp_nanos(i128::from(stamp))
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(7, Type::Integer, Box::new(err)))?;
    Ok(Part {
        id: row.get(0)?,
        category: row.get(1)?,
        car_name: row.get(2)?,
        model: row.get(3)?,
        product_name: row.get(4)?,
        quantity: row.get(5)?,
        price: Price::from_cents(row.get(6)?),
        last_updated,
    })
}

/// Make `%`, `_` and the escape character itself match literally.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
impl InventoryStore {
    fn replace_connection(&self, conn: Connection) {
        self.session().link = Link::Connected(conn);
    }

    fn drop_connection(&self) {
        self.session().drop_link();
    }
}
