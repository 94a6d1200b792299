use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

pub(crate) const DB_FILE: &str = "er_state.sqlite";
const EXTRACT_STAGE: &str = "extract";

pub fn path(out_dir: &Path) -> PathBuf {
    out_dir.join(DB_FILE)
}

pub fn connect(out_dir: &Path) -> Result<Connection> {
    let p = path(out_dir);
    let conn = Connection::open(&p).with_context(|| format!("Failed to open {:?}", p))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cursor (
            stage           TEXT PRIMARY KEY,
            next_index      INTEGER NOT NULL,
            summary_bytes   INTEGER NOT NULL,
            primary_bytes   INTEGER NOT NULL,
            secondary_bytes INTEGER NOT NULL,
            updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS fetch_log (
            id             INTEGER PRIMARY KEY,
            list_index     INTEGER NOT NULL,
            precinct_code  TEXT NOT NULL,
            status         INTEGER,
            outcome        TEXT NOT NULL CHECK(outcome IN ('loaded','no_data','malformed')),
            primary_rows   INTEGER NOT NULL DEFAULT 0,
            secondary_rows INTEGER NOT NULL DEFAULT 0,
            error          TEXT,
            latency_ms     INTEGER,
            fetched_at     TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_fetch_log_code ON fetch_log(precinct_code);
        CREATE INDEX IF NOT EXISTS idx_fetch_log_outcome ON fetch_log(outcome);
        ",
    )?;
    Ok(())
}

// ── Checkpoint ──

/// Next listing entry to process plus the committed byte length of each
/// output table at that point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub next_index: usize,
    pub summary_bytes: u64,
    pub primary_bytes: u64,
    pub secondary_bytes: u64,
}

pub fn load_cursor(conn: &Connection) -> Result<Option<Cursor>> {
    let row = conn
        .query_row(
            "SELECT next_index, summary_bytes, primary_bytes, secondary_bytes
             FROM cursor WHERE stage = ?1",
            [EXTRACT_STAGE],
            |row| {
                Ok(Cursor {
                    next_index: row.get::<_, i64>(0)? as usize,
                    summary_bytes: row.get::<_, i64>(1)? as u64,
                    primary_bytes: row.get::<_, i64>(2)? as u64,
                    secondary_bytes: row.get::<_, i64>(3)? as u64,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn save_cursor(conn: &Connection, cursor: &Cursor) -> Result<()> {
    conn.execute(
        "INSERT INTO cursor (stage, next_index, summary_bytes, primary_bytes, secondary_bytes)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(stage) DO UPDATE SET
            next_index = excluded.next_index,
            summary_bytes = excluded.summary_bytes,
            primary_bytes = excluded.primary_bytes,
            secondary_bytes = excluded.secondary_bytes,
            updated_at = datetime('now')",
        rusqlite::params![
            EXTRACT_STAGE,
            cursor.next_index as i64,
            cursor.summary_bytes as i64,
            cursor.primary_bytes as i64,
            cursor.secondary_bytes as i64,
        ],
    )?;
    Ok(())
}

// ── Fetch log ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Loaded,
    NoData,
    Malformed,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Loaded => "loaded",
            Outcome::NoData => "no_data",
            Outcome::Malformed => "malformed",
        }
    }
}

pub struct FetchRecord {
    pub list_index: usize,
    pub precinct_code: String,
    pub status: Option<u16>,
    pub outcome: Outcome,
    pub primary_rows: usize,
    pub secondary_rows: usize,
    pub error: Option<String>,
    pub latency_ms: i64,
}

/// Record one processed entry and move the cursor past it, atomically.
pub fn commit_entry(conn: &Connection, record: &FetchRecord, cursor: &Cursor) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO fetch_log
            (list_index, precinct_code, status, outcome, primary_rows, secondary_rows, error, latency_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            record.list_index as i64,
            record.precinct_code,
            record.status,
            record.outcome.as_str(),
            record.primary_rows as i64,
            record.secondary_rows as i64,
            record.error,
            record.latency_ms,
        ],
    )?;
    save_cursor(&tx, cursor)?;
    tx.commit()?;
    Ok(())
}

/// Listing position and code of the most recently committed entry.
pub fn last_logged(conn: &Connection) -> Result<Option<(usize, String)>> {
    let row = conn
        .query_row(
            "SELECT list_index, precinct_code FROM fetch_log ORDER BY id DESC LIMIT 1",
            [],
            |row| Ok((row.get::<_, i64>(0)? as usize, row.get::<_, String>(1)?)),
        )
        .optional()?;
    Ok(row)
}

// ── Stats ──

pub struct Stats {
    pub next_index: Option<usize>,
    pub updated_at: Option<String>,
    pub loaded: usize,
    pub no_data: usize,
    pub malformed: usize,
    pub candidate_rows: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let cursor: Option<(i64, String)> = conn
        .query_row(
            "SELECT next_index, updated_at FROM cursor WHERE stage = ?1",
            [EXTRACT_STAGE],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let count = |outcome: Outcome| -> Result<usize> {
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM fetch_log WHERE outcome = ?1",
            [outcome.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    };

    let candidate_rows: i64 = conn.query_row(
        "SELECT COALESCE(SUM(primary_rows + secondary_rows), 0) FROM fetch_log",
        [],
        |row| row.get(0),
    )?;

    Ok(Stats {
        next_index: cursor.as_ref().map(|(n, _)| *n as usize),
        updated_at: cursor.map(|(_, t)| t),
        loaded: count(Outcome::Loaded)?,
        no_data: count(Outcome::NoData)?,
        malformed: count(Outcome::Malformed)?,
        candidate_rows: candidate_rows as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = connect(dir.path()).unwrap();
        init_schema(&conn).unwrap();
        (dir, conn)
    }

    fn record(idx: usize, code: &str, outcome: Outcome) -> FetchRecord {
        FetchRecord {
            list_index: idx,
            precinct_code: code.to_string(),
            status: Some(if outcome == Outcome::NoData { 404 } else { 200 }),
            outcome,
            primary_rows: if outcome == Outcome::Loaded { 2 } else { 0 },
            secondary_rows: if outcome == Outcome::Loaded { 1 } else { 0 },
            error: None,
            latency_ms: 5,
        }
    }

    #[test]
    fn cursor_roundtrip_and_upsert() {
        let (_dir, conn) = open();
        assert_eq!(load_cursor(&conn).unwrap(), None);

        let first = Cursor {
            next_index: 0,
            summary_bytes: 10,
            primary_bytes: 20,
            secondary_bytes: 30,
        };
        save_cursor(&conn, &first).unwrap();
        let second = Cursor {
            next_index: 1,
            ..first
        };
        commit_entry(&conn, &record(0, "P1", Outcome::Loaded), &second).unwrap();

        assert_eq!(load_cursor(&conn).unwrap(), Some(second));
        assert_eq!(last_logged(&conn).unwrap(), Some((0, "P1".to_string())));
    }

    #[test]
    fn stats_count_outcomes() {
        let (_dir, conn) = open();
        let mut cursor = Cursor {
            next_index: 0,
            summary_bytes: 0,
            primary_bytes: 0,
            secondary_bytes: 0,
        };
        for (i, (code, outcome)) in [
            ("P1", Outcome::Loaded),
            ("P2", Outcome::NoData),
            ("P3", Outcome::Loaded),
            ("P4", Outcome::Malformed),
        ]
        .into_iter()
        .enumerate()
        {
            cursor.next_index = i + 1;
            commit_entry(&conn, &record(i, code, outcome), &cursor).unwrap();
        }

        let s = get_stats(&conn).unwrap();
        assert_eq!(s.next_index, Some(4));
        assert_eq!((s.loaded, s.no_data, s.malformed), (2, 1, 1));
        assert_eq!(s.candidate_rows, 6);
        assert!(s.updated_at.is_some());
    }

    #[test]
    fn unknown_outcome_rejected() {
        let (_dir, conn) = open();
        let res = conn.execute(
            "INSERT INTO fetch_log (list_index, precinct_code, outcome) VALUES (0, 'P1', 'ok')",
            [],
        );
        assert!(res.is_err());
    }
}
