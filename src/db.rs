use crate::errors::{EngineError, EngineResult};
use crate::state::DbCommand;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub type DbPool = Arc<Mutex<Connection>>;

const SCHEMA: &str = include_str!("../migrations/001_init.sql");

pub fn init_db(data_dir: &Path) -> EngineResult<DbPool> {
    std::fs::create_dir_all(data_dir).map_err(|e| EngineError::Database(format!("create dir: {e}")))?;
    let db_path = data_dir.join("pcr_pulse.db");
    let conn = Connection::open(&db_path)?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    conn.execute_batch(SCHEMA)?;

    tracing::info!("database initialized at {}", db_path.display());
    Ok(Arc::new(Mutex::new(conn)))
}

/// Dedicated DB writer task. Reads commands from bounded channel, executes SQL.
/// This is the ONLY task that writes to the database.
pub async fn run_db_writer(db: DbPool, mut rx: mpsc::Receiver<DbCommand>) {
    tracing::info!("db writer task started");

    while let Some(cmd) = rx.recv().await {
        if let Err(e) = execute_command(&db, cmd) {
            tracing::error!("db write error: {e}");
        }
    }

    tracing::info!("db writer task shutting down");
}

fn execute_command(db: &DbPool, cmd: DbCommand) -> EngineResult<()> {
    let conn = db.lock().map_err(|e| EngineError::Database(format!("lock poisoned: {e}")))?;

    match cmd {
        DbCommand::InsertSignal {
            id, symbol, timestamp, expiry, underlying, total_call_oi, total_put_oi,
            pcr, near_pcr, trend, momentum, recommendation,
        } => {
            conn.execute(
                "INSERT INTO signals (id, symbol, timestamp, expiry, underlying, total_call_oi, total_put_oi, pcr, near_pcr, trend, momentum, recommendation)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![id, symbol, timestamp, expiry, underlying, total_call_oi, total_put_oi, pcr, near_pcr, trend, momentum, recommendation],
            )?;
        }
    }
    Ok(())
}

// ── Query helpers (REST reads, cold path) ──

/// Most recent signals for `symbol`, oldest first.
pub fn get_recent_signals(db: &DbPool, symbol: &str, limit: usize) -> EngineResult<Vec<SignalRow>> {
    let conn = db.lock().map_err(|e| EngineError::Database(format!("lock: {e}")))?;
    let mut stmt = conn.prepare(
        "SELECT id, symbol, timestamp, expiry, underlying, total_call_oi, total_put_oi, pcr, near_pcr, trend, momentum, recommendation
         FROM signals WHERE symbol = ?1 ORDER BY rowid DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![symbol, limit as i64], |row| {
        Ok(SignalRow {
            id: row.get(0)?,
            symbol: row.get(1)?,
            timestamp: row.get(2)?,
            expiry: row.get(3)?,
            underlying: row.get(4)?,
            total_call_oi: row.get(5)?,
            total_put_oi: row.get(6)?,
            pcr: row.get(7)?,
            near_pcr: row.get(8)?,
            trend: row.get(9)?,
            momentum: row.get(10)?,
            recommendation: row.get(11)?,
        })
    })?;
    let mut out = rows.collect::<Result<Vec<SignalRow>, _>>()?;
    out.reverse();
    Ok(out)
}

// ── Row types ──

#[derive(Debug, Clone, serde::Serialize)]
pub struct SignalRow {
    pub id: String,
    pub symbol: String,
    pub timestamp: String,
    pub expiry: String,
    pub underlying: Option<f64>,
    pub total_call_oi: i64,
    pub total_put_oi: i64,
    pub pcr: Option<f64>,
    pub near_pcr: Option<f64>,
    pub trend: String,
    pub momentum: String,
    pub recommendation: String,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn memory_pool() -> DbPool {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn insert(symbol: &str, ts: &str, pcr: Option<f64>) -> DbCommand {
        DbCommand::InsertSignal {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            timestamp: ts.into(),
            expiry: "26-Dec-2024".into(),
            underlying: Some(23_500.0),
            total_call_oi: 100,
            total_put_oi: 120,
            pcr,
            near_pcr: None,
            trend: "BULLISH".into(),
            momentum: "NEUTRAL".into(),
            recommendation: "SIDEWAYS".into(),
        }
    }

    #[test]
    fn test_insert_and_query_history() {
        let db = memory_pool();
        execute_command(&db, insert("NIFTY", "t1", Some(1.2))).unwrap();
        execute_command(&db, insert("NIFTY", "t2", None)).unwrap();
        execute_command(&db, insert("BANKNIFTY", "t3", Some(0.7))).unwrap();
        execute_command(&db, insert("NIFTY", "t4", Some(0.9))).unwrap();

        let rows = get_recent_signals(&db, "NIFTY", 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, "t2");
        assert_eq!(rows[0].pcr, None);
        assert_eq!(rows[1].timestamp, "t4");

        assert_eq!(get_recent_signals(&db, "BANKNIFTY", 10).unwrap().len(), 1);
        assert!(get_recent_signals(&db, "FINNIFTY", 10).unwrap().is_empty());
    }

    #[test]
    fn test_undecodable_row_is_an_error() {
        let db = memory_pool();
        execute_command(&db, insert("NIFTY", "t1", Some(1.1))).unwrap();
        db.lock()
            .unwrap()
            .execute(
                "INSERT INTO signals (id, symbol, timestamp, expiry, total_call_oi, total_put_oi, trend, momentum, recommendation)
                 VALUES ('bad', 'NIFTY', 't2', 'E1', 'n/a', 0, 'UNKNOWN', 'NEUTRAL', 'SIDEWAYS')",
                [],
            )
            .unwrap();

        let err = get_recent_signals(&db, "NIFTY", 10).unwrap_err();
        assert!(matches!(err, EngineError::Database(_)));
    }
}
