use log::Level;
use r2d2_sqlite::rusqlite::{params, Connection, Row};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// One row of the catalog activity feed.
#[derive(Clone, Debug, Serialize)]
pub struct StockEvent {
    pub id: String,
    pub ts: i64,
    pub level: String,
    pub code: Option<String>,
    pub module: String,
    pub message: String,
    pub data: Option<Value>,
}

/// Append an entry to the `event_log` table and mirror it to the `log` facade.
pub fn log_event(
    conn: &Connection,
    level: Level,
    code: Option<&str>,
    module: &str,
    message: &str,
    data: Option<Value>,
) -> rusqlite::Result<()> {
    log::log!(target: module, level, "{message} ({})", code.unwrap_or("-"));
    let id = Uuid::new_v4().to_string();
    let ts = OffsetDateTime::now_utc().unix_timestamp();
    let data_str = data.map(|v| v.to_string());
    conn.execute(
        "INSERT INTO event_log (id, ts, level, code, module, message, data) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            ts,
            level.as_str().to_ascii_lowercase(),
            code,
            module,
            message,
            data_str
        ],
    )?;
    Ok(())
}

/// Newest events first.
pub fn list_events(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<StockEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, ts, level, code, module, message, data FROM event_log ORDER BY ts DESC, rowid DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([i64::try_from(limit).unwrap_or(i64::MAX)], map_event)?;
    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

/// Drop all but the newest `keep` events and return how many went.
pub fn prune_events(conn: &Connection, keep: usize) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM event_log WHERE rowid NOT IN \
         (SELECT rowid FROM event_log ORDER BY ts DESC, rowid DESC LIMIT ?1)",
        [i64::try_from(keep).unwrap_or(i64::MAX)],
    )
}

fn map_event(row: &Row) -> rusqlite::Result<StockEvent> {
    let data_str: Option<String> = row.get(6)?;
    let data = data_str.and_then(|raw| serde_json::from_str(&raw).ok());
    Ok(StockEvent {
        id: row.get(0)?,
        ts: row.get(1)?,
        level: row.get(2)?,
        code: row.get(3)?,
        module: row.get(4)?,
        message: row.get(5)?,
        data,
    })
}

// Allow synchronous access to rusqlite without importing from the caller.
use r2d2_sqlite::rusqlite;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_table() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../migrations/inventory/0002_event_log.sql"
        )))
        .unwrap();
        conn
    }

    #[test]
    fn events_round_trip_with_json_payload() {
        let conn = event_table();
        log_event(
            &conn,
            Level::Info,
            Some("PRT-0001"),
            "inventory",
            "part added",
            Some(json!({ "id": 4 })),
        )
        .unwrap();
        let events = list_events(&conn, 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, "info");
        assert_eq!(events[0].code.as_deref(), Some("PRT-0001"));
        assert_eq!(events[0].data, Some(json!({ "id": 4 })));
    }

    #[test]
    fn list_events_returns_newest_first_and_honours_limit() {
        let conn = event_table();
        for n in 0..3 {
            log_event(&conn, Level::Warn, None, "inventory", &format!("e{n}"), None).unwrap();
        }
        let events = list_events(&conn, 2).unwrap();
        let messages: Vec<_> = events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["e2", "e1"]);
    }

    #[test]
    fn huge_limit_means_everything() {
        let conn = event_table();
        for n in 0..3 {
            log_event(&conn, Level::Info, None, "inventory", &format!("e{n}"), None).unwrap();
        }
        assert_eq!(list_events(&conn, usize::MAX).unwrap().len(), 3);
    }

    #[test]
    fn pruning_keeps_the_newest_rows() {
        let conn = event_table();
        for n in 0..5 {
            log_event(&conn, Level::Info, None, "inventory", &format!("e{n}"), None).unwrap();
        }
        assert_eq!(prune_events(&conn, 2).unwrap(), 3);
        let messages: Vec<_> = list_events(&conn, 10)
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["e4", "e3"]);
        assert_eq!(prune_events(&conn, usize::MAX).unwrap(), 0);
    }
}
