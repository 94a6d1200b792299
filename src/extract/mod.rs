pub mod decompose;

use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::api::{ApiClient, PrecinctReturn, Transport};
use crate::db::{self, Cursor, FetchRecord, Outcome};
use crate::progress;
use crate::settings::ContestPair;
use crate::tables::{self, AppendTable};

use decompose::{decompose, CandidateRow, Decomposed, SummaryRow};

const LISTING_TABLE: &str = crate::topology::PRECINCT_TABLE;
pub const SUMMARY_TABLE: &str = "precinct_info.csv";
pub const PRIMARY_TABLE: &str = "precinct_senators.csv";
pub const SECONDARY_TABLE: &str = "precinct_partylist.csv";

/// Counters returned after an extraction pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub listed: usize,
    pub skipped: usize,
    pub processed: usize,
    pub loaded: usize,
    pub no_data: usize,
    pub malformed: usize,
}

/// The three result tables, always advanced together.
struct OutputTables {
    summary: AppendTable<SummaryRow>,
    primary: AppendTable<CandidateRow>,
    secondary: AppendTable<CandidateRow>,
}

impl OutputTables {
    fn open(out_dir: &Path, cursor: Option<&Cursor>) -> Result<Self> {
        Ok(OutputTables {
            summary: AppendTable::open(
                &out_dir.join(SUMMARY_TABLE),
                cursor.map(|c| c.summary_bytes),
            )?,
            primary: AppendTable::open(
                &out_dir.join(PRIMARY_TABLE),
                cursor.map(|c| c.primary_bytes),
            )?,
            secondary: AppendTable::open(
                &out_dir.join(SECONDARY_TABLE),
                cursor.map(|c| c.secondary_bytes),
            )?,
        })
    }

    fn append(&mut self, rows: &Decomposed) -> Result<()> {
        self.summary.append_row(&rows.summary)?;
        for row in &rows.primary {
            self.primary.append_row(row)?;
        }
        for row in &rows.secondary {
            self.secondary.append_row(row)?;
        }
        self.summary.commit()?;
        self.primary.commit()?;
        self.secondary.commit()?;
        Ok(())
    }

    fn cursor_at(&self, next_index: usize) -> Cursor {
        Cursor {
            next_index,
            summary_bytes: self.summary.committed_len(),
            primary_bytes: self.primary.committed_len(),
            secondary_bytes: self.secondary.committed_len(),
        }
    }
}

/// Resume point: the stored cursor, or one seeded from the rows an earlier
/// cursor-less run left in the summary table.
fn resume_cursor(
    conn: &Connection,
    stored: Option<Cursor>,
    outputs: &OutputTables,
    codes: &[String],
) -> Result<Cursor> {
    if let Some(cursor) = stored {
        check_listing(conn, &cursor, codes)?;
        return Ok(cursor);
    }

    let existing = tables::count_data_rows(outputs.summary.path())?;
    let cursor = outputs.cursor_at(existing.min(codes.len()));
    db::save_cursor(conn, &cursor)?;
    if existing > 0 {
        info!(rows = existing, "seeded checkpoint from existing summary rows");
    }
    Ok(cursor)
}

/// A stored cursor is an index into the listing it was committed against.
/// The last committed entry must still sit at the same position.
fn check_listing(conn: &Connection, cursor: &Cursor, codes: &[String]) -> Result<()> {
    let changed = |detail: String| {
        anyhow::anyhow!(
            "precinct listing changed since the last checkpoint ({}); \
             remove {} to restart extraction",
            detail,
            db::DB_FILE
        )
    };

    if cursor.next_index > codes.len() {
        return Err(changed(format!(
            "checkpoint at entry {} but only {} listed",
            cursor.next_index,
            codes.len()
        )));
    }
    match db::last_logged(conn)? {
        Some((idx, code)) if idx + 1 != cursor.next_index => {
            bail!(
                "fetch log ends at entry {} ({}) but checkpoint is at entry {}",
                idx,
                code,
                cursor.next_index
            )
        }
        Some((idx, code)) if codes.get(idx) != Some(&code) => Err(changed(format!(
            "entry {} was {}, now {}",
            idx,
            code,
            codes.get(idx).map_or("missing", String::as_str)
        ))),
        _ => Ok(()),
    }
}

/// Fetch and flatten precinct returns in listing order, resuming after the
/// last committed entry. Stops after `limit` entries when given.
pub fn run<T: Transport>(
    api: &ApiClient<T>,
    conn: &Connection,
    out_dir: &Path,
    contests: &ContestPair,
    limit: Option<usize>,
    show_progress: bool,
) -> Result<ExtractStats> {
    let listing_path = out_dir.join(LISTING_TABLE);
    let codes = tables::read_codes(&listing_path)
        .with_context(|| format!("No precinct listing at {:?}; run `precincts` first", listing_path))?;

    let stored = db::load_cursor(conn)?;
    let mut outputs = OutputTables::open(out_dir, stored.as_ref())?;
    let start = resume_cursor(conn, stored, &outputs, &codes)?.next_index;

    let mut stats = ExtractStats {
        listed: codes.len(),
        skipped: start.min(codes.len()),
        ..Default::default()
    };
    if start >= codes.len() {
        info!(listed = codes.len(), "all precincts already processed");
        return Ok(stats);
    }

    let todo = limit.unwrap_or(usize::MAX).min(codes.len() - start);
    info!(start, todo, listed = codes.len(), "extracting precinct returns");
    let pb = progress::bar(todo as u64, show_progress)?;

    for (idx, code) in codes.iter().enumerate().skip(start).take(todo) {
        let t0 = Instant::now();
        let fetched = api.fetch_precinct_return(code);
        let status = fetched.status();

        let mut record = FetchRecord {
            list_index: idx,
            precinct_code: code.clone(),
            status,
            outcome: Outcome::NoData,
            primary_rows: 0,
            secondary_rows: 0,
            error: None,
            latency_ms: t0.elapsed().as_millis() as i64,
        };

        match fetched {
            PrecinctReturn::Loaded(doc) => {
                let rows = decompose(&doc, contests)?;
                outputs
                    .append(&rows)
                    .with_context(|| format!("Failed to write rows for precinct {}", code))?;
                record.outcome = Outcome::Loaded;
                record.primary_rows = rows.primary.len();
                record.secondary_rows = rows.secondary.len();
                stats.loaded += 1;
                info!(code = %code, index = idx, total = codes.len(), "data loaded");
            }
            PrecinctReturn::NoData { reason, .. } => {
                record.error = Some(reason);
                stats.no_data += 1;
                info!(code = %code, index = idx, total = codes.len(), "no data found");
            }
            PrecinctReturn::Malformed { reason } => {
                record.outcome = Outcome::Malformed;
                record.error = Some(reason);
                stats.malformed += 1;
                warn!(code = %code, index = idx, total = codes.len(), "no data found (malformed return)");
            }
        }

        db::commit_entry(conn, &record, &outputs.cursor_at(idx + 1))?;
        stats.processed += 1;
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        processed = stats.processed,
        loaded = stats.loaded,
        no_data = stats.no_data,
        malformed = stats.malformed,
        "extraction pass finished"
    );
    Ok(stats)
}
