//! Walks the administrative hierarchy top-down and writes one listing per level.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::api::{ApiClient, Transport};
use crate::models::AdminNode;
use crate::progress;
use crate::tables::{self, SnapshotWriter};

/// Code whose children are all regions.
pub const ROOT_CODE: &str = "0";
pub const LEVELS: [&str; 4] = ["regions", "provinces", "cities", "barangays"];
pub const BARANGAY_TABLE: &str = "barangays.csv";
pub const PRECINCT_TABLE: &str = "precincts.csv";

#[derive(Debug, Default)]
pub struct TopologySummary {
    pub levels: Vec<(&'static str, usize)>,
}

pub fn table_path(out_dir: &Path, level: &str) -> std::path::PathBuf {
    out_dir.join(format!("{}.csv", level))
}

/// Children of every parent, concatenated in parent order and written as
/// the complete listing for `table`.
pub fn expand_level<T: Transport>(
    api: &ApiClient<T>,
    parents: &[AdminNode],
    table: &Path,
) -> Result<Vec<AdminNode>> {
    let mut children = Vec::new();
    for parent in parents {
        children.extend(api.fetch_children(&parent.code, &parent.name));
    }
    info!(table = ?table, parents = parents.len(), records = children.len(), "level complete");
    tables::write_snapshot(table, &children)?;
    Ok(children)
}

/// Region, province, city and barangay listings, starting from the root.
pub fn crawl_topology<T: Transport>(api: &ApiClient<T>, out_dir: &Path) -> Result<TopologySummary> {
    let mut summary = TopologySummary::default();
    let mut parents = vec![AdminNode::root(ROOT_CODE)];
    for level in LEVELS {
        parents = expand_level(api, &parents, &table_path(out_dir, level))?;
        summary.levels.push((level, parents.len()));
    }
    Ok(summary)
}

/// Precincts of each barangay, flushed to `table` one barangay at a time.
pub fn crawl_precincts<T: Transport>(
    api: &ApiClient<T>,
    barangay_codes: &[String],
    table: &Path,
    show_progress: bool,
) -> Result<usize> {
    let mut writer = SnapshotWriter::<AdminNode>::create(table)?;
    let pb = progress::bar(barangay_codes.len() as u64, show_progress)?;

    for code in barangay_codes {
        let precincts = api.fetch_precincts(code, "precincts");
        writer.write_batch(&precincts)?;
        pb.inc(1);
    }

    pb.finish_and_clear();
    let rows = writer.finish()?;
    info!(barangays = barangay_codes.len(), precincts = rows, "precinct listing complete");
    Ok(rows)
}

/// True once a precinct crawl has completed in `out_dir`. An interrupted
/// crawl leaves only the `.partial` file behind.
pub fn listing_ready(out_dir: &Path) -> bool {
    out_dir.join(PRECINCT_TABLE).is_file()
}

/// [`crawl_precincts`] over the barangay listing in `out_dir`.
pub fn crawl_precincts_in<T: Transport>(
    api: &ApiClient<T>,
    out_dir: &Path,
    show_progress: bool,
) -> Result<usize> {
    let barangays = out_dir.join(BARANGAY_TABLE);
    let codes = tables::read_codes(&barangays)
        .with_context(|| format!("No barangay listing at {:?}; run `topology` first", barangays))?;
    crawl_precincts(api, &codes, &out_dir.join(PRECINCT_TABLE), show_progress)
}
