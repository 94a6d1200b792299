//! CSV tables: full-overwrite snapshots for the topology levels and
//! append-only tables for the extracted results.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::AdminNode;

/// A row type with a fixed header.
pub trait Record: Serialize {
    const HEADER: &'static [&'static str];
}

impl Record for AdminNode {
    const HEADER: &'static [&'static str] = &["categoryCode", "masterCode", "code", "name"];
}

/// Only the column the crawl queues need.
#[derive(Debug, Deserialize)]
struct CodeColumn {
    code: String,
}

fn writer_for(file: File) -> csv::Writer<File> {
    csv::WriterBuilder::new().has_headers(false).from_writer(file)
}

/// Replace `path` with a header plus `rows`.
pub fn write_snapshot<R: Record>(path: &Path, rows: &[R]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut wtr = writer_for(file);
    wtr.write_record(R::HEADER)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Values of the `code` column, in file order.
pub fn read_codes(path: &Path) -> Result<Vec<String>> {
    let mut rdr =
        csv::Reader::from_path(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut codes = Vec::new();
    for rec in rdr.deserialize::<CodeColumn>() {
        let rec = rec.with_context(|| format!("Bad row in {:?}", path))?;
        codes.push(rec.code);
    }
    Ok(codes)
}

/// Data rows (header excluded); a missing file has none.
pub fn count_data_rows(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let mut rdr =
        csv::Reader::from_path(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut n = 0;
    for rec in rdr.records() {
        rec.with_context(|| format!("Bad row in {:?}", path))?;
        n += 1;
    }
    Ok(n)
}

/// Streams rows to a table that is rewritten from scratch, flushing on demand.
/// Listing written batch by batch under a `.partial` name and moved into
/// place by [`SnapshotWriter::finish`], so the final path only ever holds a
/// complete listing.
pub struct SnapshotWriter<R> {
    path: PathBuf,
    partial: PathBuf,
    wtr: csv::Writer<File>,
    rows: usize,
    _row: PhantomData<R>,
}

impl<R: Record> SnapshotWriter<R> {
    pub fn create(path: &Path) -> Result<Self> {
        let partial = partial_path(path);
        let file =
            File::create(&partial).with_context(|| format!("Failed to create {:?}", partial))?;
        let mut wtr = writer_for(file);
        wtr.write_record(R::HEADER)?;
        wtr.flush()?;
        Ok(SnapshotWriter {
            path: path.to_path_buf(),
            partial,
            wtr,
            rows: 0,
            _row: PhantomData,
        })
    }

    /// Write and flush one batch.
    pub fn write_batch(&mut self, rows: &[R]) -> Result<()> {
        for row in rows {
            self.wtr.serialize(row)?;
        }
        self.wtr
            .flush()
            .with_context(|| format!("Failed to write {:?}", self.partial))?;
        self.rows += rows.len();
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Move the completed listing into place; returns its row count.
    pub fn finish(mut self) -> Result<usize> {
        self.wtr.flush()?;
        drop(self.wtr);
        std::fs::rename(&self.partial, &self.path)
            .with_context(|| format!("Failed to move {:?} to {:?}", self.partial, self.path))?;
        Ok(self.rows)
    }
}

pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// Append-only table whose committed length is tracked in bytes.
pub struct AppendTable<R> {
    path: PathBuf,
    wtr: csv::Writer<File>,
    committed: u64,
    _row: PhantomData<R>,
}

impl<R: Record> AppendTable<R> {
    /// Open for appending. With `checkpoint`, anything past that byte length
    /// (rows of an entry that never committed) is discarded first.
    pub fn open(path: &Path, checkpoint: Option<u64>) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open {:?}", path))?;

        let len = file.metadata()?.len();
        if let Some(mark) = checkpoint {
            if len < mark {
                bail!(
                    "{:?} is shorter ({} bytes) than its checkpoint ({} bytes); \
                     the state file does not match this table",
                    path,
                    len,
                    mark
                );
            }
            if len > mark {
                tracing::warn!(table = ?path, discarded = len - mark, "truncating uncommitted rows");
                file.set_len(mark)?;
            }
        }
        file.seek(SeekFrom::End(0))?;

        let mut wtr = writer_for(file);
        if wtr.get_ref().metadata()?.len() == 0 {
            wtr.write_record(R::HEADER)?;
        }
        wtr.flush()?;
        let committed = wtr.get_ref().metadata()?.len();

        Ok(AppendTable {
            path: path.to_path_buf(),
            wtr,
            committed,
            _row: PhantomData,
        })
    }

    /// No uniqueness check; rows go after whatever is already there.
    pub fn append_row(&mut self, row: &R) -> Result<()> {
        self.wtr
            .serialize(row)
            .with_context(|| format!("Failed to append to {:?}", self.path))?;
        Ok(())
    }

    /// Flush and sync buffered rows, returning the new byte length.
    pub fn commit(&mut self) -> Result<u64> {
        self.wtr.flush()?;
        let file = self.wtr.get_ref();
        file.sync_data()
            .with_context(|| format!("Failed to sync {:?}", self.path))?;
        self.committed = file.metadata()?.len();
        Ok(self.committed)
    }

    pub fn committed_len(&self) -> u64 {
        self.committed
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
