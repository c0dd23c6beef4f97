//! Durable round history backed by SQLite.
//!
//! Two append-only tables:
//! - `fl_rounds`: one row per completed round, keyed by `round_number`
//! - `client_participation`: one row per submission that contributed to a round
//!
//! A round and its participation rows are written in one transaction.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use flc_protocol::{HistorySummary, ParticipationRecord, RoundResult, AGGREGATION_METHOD};

use crate::StateError;

/// Persistence for completed rounds.
pub trait HistoryStore: Send + Sync {
    /// Write a round and all of its participation rows, or nothing.
    fn save_round(
        &self,
        result: &RoundResult,
        contributions: &[ParticipationRecord],
    ) -> Result<(), StateError>;

    /// Most recent rounds first.
    fn query_history(&self, limit: usize) -> Result<Vec<RoundResult>, StateError>;

    fn round(&self, round_number: u64) -> Result<Option<RoundResult>, StateError>;

    /// A client's participation rows, most recent round first.
    fn client_participation(
        &self,
        client_id: &str,
        limit: usize,
    ) -> Result<Vec<ParticipationRecord>, StateError>;

    fn summary(&self) -> Result<HistorySummary, StateError>;
}

/// SQLite implementation of [`HistoryStore`].
pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    /// Open (or create) a history database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StateError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Non-durable store for tests and dry runs.
    pub fn in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StateError> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS fl_rounds (
                round_number INTEGER PRIMARY KEY,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                participating_clients INTEGER NOT NULL,
                contributors TEXT NOT NULL,
                global_accuracy REAL NOT NULL,
                convergence_score REAL NOT NULL,
                privacy_budget_used REAL NOT NULL,
                aggregation_method TEXT NOT NULL DEFAULT 'fedavg_weighted'
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS client_participation (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                round_number INTEGER NOT NULL,
                client_id TEXT NOT NULL,
                local_accuracy REAL NOT NULL,
                data_size INTEGER NOT NULL,
                contribution_weight REAL NOT NULL,
                privacy_cost REAL NOT NULL,
                timestamp TEXT NOT NULL,
                FOREIGN KEY (round_number) REFERENCES fl_rounds (round_number)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_participation_client ON client_participation(client_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_participation_round ON client_participation(round_number)",
            [],
        )?;

        Ok(())
    }
}

const ROUND_COLUMNS: &str = "round_number, start_time, end_time, participating_clients, \
     contributors, global_accuracy, convergence_score, privacy_budget_used";

impl HistoryStore for SqliteHistoryStore {
    fn save_round(
        &self,
        result: &RoundResult,
        contributions: &[ParticipationRecord],
    ) -> Result<(), StateError> {
        let contributors = serde_json::to_string(&result.contributors)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO fl_rounds
             (round_number, start_time, end_time, participating_clients, contributors,
              global_accuracy, convergence_score, privacy_budget_used, aggregation_method)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                result.round_number as i64,
                result.start_time.to_rfc3339(),
                result.end_time.to_rfc3339(),
                result.participating_clients as i64,
                contributors,
                result.global_accuracy,
                result.convergence_score,
                result.total_privacy_cost,
                AGGREGATION_METHOD,
            ],
        )?;

        for record in contributions {
            tx.execute(
                "INSERT INTO client_participation
                 (round_number, client_id, local_accuracy, data_size,
                  contribution_weight, privacy_cost, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.round_number as i64,
                    record.client_id,
                    record.local_accuracy,
                    record.data_size as i64,
                    record.contribution_weight,
                    record.privacy_cost,
                    record.submitted_at.to_rfc3339(),
                ],
            )?;
        }

        // Dropping `tx` without commit rolls everything back.
        tx.commit()?;
        Ok(())
    }

    fn query_history(&self, limit: usize) -> Result<Vec<RoundResult>, StateError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ROUND_COLUMNS} FROM fl_rounds ORDER BY round_number DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], RawRound::from_row)?;

        let mut out = Vec::new();
        for raw in rows {
            out.push(raw?.into_result()?);
        }
        Ok(out)
    }

    fn round(&self, round_number: u64) -> Result<Option<RoundResult>, StateError> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("SELECT {ROUND_COLUMNS} FROM fl_rounds WHERE round_number = ?1"),
                params![round_number as i64],
                RawRound::from_row,
            )
            .optional()?;
        raw.map(RawRound::into_result).transpose()
    }

    fn client_participation(
        &self,
        client_id: &str,
        limit: usize,
    ) -> Result<Vec<ParticipationRecord>, StateError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT round_number, client_id, local_accuracy, data_size,
                    contribution_weight, privacy_cost, timestamp
             FROM client_participation
             WHERE client_id = ?1
             ORDER BY round_number DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![client_id, limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (round_number, client_id, local_accuracy, data_size, weight, privacy_cost, ts) = row?;
            out.push(ParticipationRecord {
                round_number: round_number as u64,
                client_id,
                local_accuracy,
                data_size: data_size as u64,
                contribution_weight: weight,
                privacy_cost,
                submitted_at: parse_timestamp(&ts)?,
            });
        }
        Ok(out)
    }

    fn summary(&self) -> Result<HistorySummary, StateError> {
        let conn = self.conn.lock();
        let (total_rounds, average_accuracy): (i64, Option<f64>) = conn.query_row(
            "SELECT COUNT(*), AVG(global_accuracy) FROM fl_rounds",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut stmt =
            conn.prepare("SELECT convergence_score FROM fl_rounds ORDER BY round_number ASC")?;
        let trend = stmt
            .query_map([], |row| row.get::<_, f64>(0))?
            .collect::<Result<Vec<f64>, _>>()?;

        Ok(HistorySummary {
            total_rounds: total_rounds as u64,
            average_accuracy: average_accuracy.unwrap_or(0.0),
            convergence_trend: trend,
        })
    }
}

/// Column values of one `fl_rounds` row before timestamp/JSON decoding.
struct RawRound {
    round_number: i64,
    start_time: String,
    end_time: String,
    participating_clients: i64,
    contributors: String,
    global_accuracy: f64,
    convergence_score: f64,
    privacy_budget_used: f64,
}

impl RawRound {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            round_number: row.get(0)?,
            start_time: row.get(1)?,
            end_time: row.get(2)?,
            participating_clients: row.get(3)?,
            contributors: row.get(4)?,
            global_accuracy: row.get(5)?,
            convergence_score: row.get(6)?,
            privacy_budget_used: row.get(7)?,
        })
    }

    fn into_result(self) -> Result<RoundResult, StateError> {
        Ok(RoundResult {
            round_number: self.round_number as u64,
            start_time: parse_timestamp(&self.start_time)?,
            end_time: parse_timestamp(&self.end_time)?,
            participating_clients: self.participating_clients as usize,
            contributors: serde_json::from_str(&self.contributors)?,
            global_accuracy: self.global_accuracy,
            convergence_score: self.convergence_score,
            total_privacy_cost: self.privacy_budget_used,
            insufficient_data: false,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StateError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StateError::Corrupt(format!("bad timestamp '{s}': {e}")))
}
