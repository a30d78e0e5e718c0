//! Manifest reading: the tab-separated package list that drives a run.
//!
//! The file starts with a header line, then one row per package:
//!
//! ```text
//! path<TAB>title<TAB>pmcid<TAB>pmid<TAB>code
//! oa_package/00/00/PMC1.tar.gz<TAB>J Foo. 2001;1:1<TAB>PMC1<TAB>1001<TAB>CC0
//! ```
//!
//! Rows with any other field count are dropped before processing and never
//! count as attempted entries.

use crate::error::HarvestError;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// One package listed in a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path of the package relative to an endpoint base URL.
    pub path: String,
    pub title: String,
    pub pmcid: String,
    pub pmid: String,
    /// License code, e.g. `CC BY`.
    pub code: String,
}

/// A manifest row without exactly five tab-separated fields.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Manifest line {line}: expected 5 tab-separated fields, found {fields}")]
pub struct ManifestRowError {
    /// 1-based line number in the manifest file.
    pub line: usize,
    pub fields: usize,
}

impl ManifestEntry {
    /// Parse one data row. `line` is only used for error reporting.
    pub fn parse_row(row: &str, line: usize) -> Result<Self, ManifestRowError> {
        let row = row.trim_end_matches(['\n', '\r']);
        let fields: Vec<&str> = row.split('\t').collect();
        match fields.as_slice() {
            [path, title, pmcid, pmid, code] => Ok(Self {
                path: path.to_string(),
                title: title.to_string(),
                pmcid: pmcid.to_string(),
                pmid: pmid.to_string(),
                code: code.to_string(),
            }),
            _ => Err(ManifestRowError {
                line,
                fields: fields.len(),
            }),
        }
    }
}

/// The well-formed entries of a manifest, in file order.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
    /// Rows dropped for having the wrong field count.
    pub dropped_rows: usize,
}

/// Read a manifest file, skipping the header and dropping malformed rows.
///
/// With `limit = Some(n)` reading stops after `n` well-formed entries.
pub fn read_manifest(path: &Path, limit: Option<usize>) -> Result<Manifest, HarvestError> {
    if !path.exists() {
        return Err(HarvestError::ManifestNotFound {
            path: path.to_path_buf(),
        });
    }
    let read_err = |source| HarvestError::ManifestRead {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(read_err)?;

    let mut manifest = Manifest::default();
    // Split on raw bytes so one badly encoded title cannot abort the run.
    for (idx, line) in BufReader::new(file).split(b'\n').enumerate().skip(1) {
        if limit.is_some_and(|n| manifest.entries.len() >= n) {
            break;
        }
        let line = line.map_err(read_err)?;
        let line = String::from_utf8_lossy(&line);
        match ManifestEntry::parse_row(&line, idx + 1) {
            Ok(entry) => manifest.entries.push(entry),
            Err(e) => {
                debug!("{e}");
                manifest.dropped_rows += 1;
            }
        }
    }

    debug!(
        "Read {} entries from {} ({} rows dropped)",
        manifest.entries.len(),
        path.display(),
        manifest.dropped_rows
    );
    Ok(manifest)
}
