//! Output writer and dedup index.
//!
//! The dataset index is a JSON-lines file, one [`OutputRecord`] per line,
//! only ever appended to. Uniqueness of `pair_id` is enforced here rather
//! than by the file format: the set of ids already on disk is rebuilt at
//! open time and every append is checked against it.
//!
//! Each record is written with a single `write_all` followed by a flush, so
//! a killed run leaves at most one torn trailing line. Such a line is
//! ignored when the index is reopened and a newline is written first so the
//! next record starts clean.

use crate::error::HarvestError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One caption-image pair as written to the index.
///
/// Field order is the on-disk key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Image path relative to the image root, `/`-separated.
    pub image: String,
    pub caption: String,
    pub pmid: String,
    pub pmcid: String,
    pub pair_id: String,
}

/// `"<pmid>_<fig_id>"`.
pub fn pair_id(pmid: &str, fig_id: &str) -> String {
    format!("{pmid}_{fig_id}")
}

/// Result of [`OutputIndex::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    Duplicate,
}

/// How [`OutputIndex::open`] treats an index file that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Reload the pair ids already on disk and append after them.
    Resume,
    /// Start a new index; an existing non-empty file is refused.
    Fresh,
    /// Start a new index, truncating any existing file.
    Overwrite,
}

#[derive(Deserialize)]
struct PairIdOnly {
    pair_id: String,
}

/// An open index file plus the set of pair ids it holds.
#[derive(Debug)]
pub struct OutputIndex {
    path: PathBuf,
    file: File,
    seen: HashSet<String>,
}

impl OutputIndex {
    /// Open `path` for appending.
    ///
    /// The file is only ever appended to unless `mode` is
    /// [`IndexMode::Overwrite`].
    pub fn open(path: impl AsRef<Path>, mode: IndexMode) -> Result<Self, HarvestError> {
        let path = path.as_ref();
        let write_err = |source| HarvestError::IndexWrite {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| HarvestError::OutputSetup {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut seen = HashSet::new();
        let mut needs_newline = false;
        let mut options = OpenOptions::new();
        options.create(true);

        match mode {
            IndexMode::Resume => {
                if path.exists() {
                    let existing = std::fs::read(path).map_err(write_err)?;
                    needs_newline = existing.last().is_some_and(|b| *b != b'\n');
                    load_pair_ids(path, &existing, &mut seen);
                }
                options.append(true);
            }
            IndexMode::Fresh => {
                let len = match std::fs::metadata(path) {
                    Ok(meta) => meta.len(),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
                    Err(e) => return Err(write_err(e)),
                };
                if len > 0 {
                    return Err(HarvestError::IndexExists {
                        path: path.to_path_buf(),
                    });
                }
                options.append(true);
            }
            IndexMode::Overwrite => {
                warn!("Truncating {}", path.display());
                options.write(true).truncate(true);
            }
        }
        let mut file = options.open(path).map_err(write_err)?;

        if needs_newline {
            warn!("{} ends with a partial line; starting a new one", path.display());
            file.write_all(b"\n").map_err(write_err)?;
            file.flush().map_err(write_err)?;
        }

        if !seen.is_empty() {
            info!("Resuming {} with {} existing pairs", path.display(), seen.len());
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            seen,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct pair ids in the index.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn contains(&self, pair_id: &str) -> bool {
        self.seen.contains(pair_id)
    }

    /// Append `record` unless its `pair_id` is already present.
    ///
    /// A write failure is fatal: the in-memory set is left untouched and the
    /// caller is expected to stop the run.
    pub fn append(&mut self, record: &OutputRecord) -> Result<AppendOutcome, HarvestError> {
        if self.seen.contains(&record.pair_id) {
            return Ok(AppendOutcome::Duplicate);
        }

        let mut line = serde_json::to_string(record)
            .map_err(|e| HarvestError::Internal(format!("Failed to serialize record: {e}")))?;
        line.push('\n');

        let write_err = |source| HarvestError::IndexWrite {
            path: self.path.clone(),
            source,
        };
        self.file.write_all(line.as_bytes()).map_err(write_err)?;
        self.file.flush().map_err(write_err)?;

        self.seen.insert(record.pair_id.clone());
        Ok(AppendOutcome::Appended)
    }
}

fn load_pair_ids(path: &Path, contents: &[u8], seen: &mut HashSet<String>) {
    let mut unreadable = 0usize;
    for line in contents.split(|b| *b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<PairIdOnly>(line) {
            Ok(rec) => {
                seen.insert(rec.pair_id);
            }
            Err(_) => unreadable += 1,
        }
    }
    if unreadable > 0 {
        warn!(
            "Ignored {} unreadable line(s) in {}",
            unreadable,
            path.display()
        );
    }
    debug!("Loaded {} pair ids from {}", seen.len(), path.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pair: &str) -> OutputRecord {
        OutputRecord {
            image: "PMC1/PMC1_fig-1.jpg".into(),
            caption: "A cell.".into(),
            pmid: "1001".into(),
            pmcid: "PMC1".into(),
            pair_id: pair.into(),
        }
    }

    #[test]
    fn record_serializes_in_field_order() {
        let line = serde_json::to_string(&record("1001_1")).unwrap();
        assert_eq!(
            line,
            r#"{"image":"PMC1/PMC1_fig-1.jpg","caption":"A cell.","pmid":"1001","pmcid":"PMC1","pair_id":"1001_1"}"#
        );
    }

    #[test]
    fn non_ascii_is_kept_verbatim() {
        let mut r = record("1_1");
        r.caption = "β-catenin in µm scale".into();
        let line = serde_json::to_string(&r).unwrap();
        assert!(line.contains("β-catenin in µm"));
    }

    #[test]
    fn duplicates_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out/dev.jsonl");

        let mut index = OutputIndex::open(&path, IndexMode::Resume).unwrap();
        assert_eq!(index.append(&record("1001_1")).unwrap(), AppendOutcome::Appended);
        assert_eq!(index.append(&record("1001_1")).unwrap(), AppendOutcome::Duplicate);
        assert!(index.contains("1001_1"));

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn resume_reloads_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("dev.jsonl");
        {
            let mut index = OutputIndex::open(&path, IndexMode::Resume).unwrap();
            index.append(&record("1001_1")).unwrap();
            index.append(&record("1001_2")).unwrap();
        }

        let mut index = OutputIndex::open(&path, IndexMode::Resume).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.append(&record("1001_2")).unwrap(), AppendOutcome::Duplicate);
        assert_eq!(index.append(&record("1001_3")).unwrap(), AppendOutcome::Appended);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[test]
    fn fresh_mode_refuses_existing_index() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("dev.jsonl");
        OutputIndex::open(&path, IndexMode::Resume)
            .unwrap()
            .append(&record("1001_1"))
            .unwrap();

        let err = OutputIndex::open(&path, IndexMode::Fresh).unwrap_err();
        assert!(matches!(err, HarvestError::IndexExists { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[test]
    fn fresh_mode_accepts_missing_or_empty_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("dev.jsonl");
        OutputIndex::open(&path, IndexMode::Fresh).unwrap();
        let mut index = OutputIndex::open(&path, IndexMode::Fresh).unwrap();
        index.append(&record("1001_1")).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[test]
    fn overwrite_truncates() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("dev.jsonl");
        OutputIndex::open(&path, IndexMode::Resume)
            .unwrap()
            .append(&record("1001_1"))
            .unwrap();

        let mut index = OutputIndex::open(&path, IndexMode::Overwrite).unwrap();
        assert!(index.is_empty());
        index.append(&record("1001_1")).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[test]
    fn torn_last_line_is_ignored_and_terminated() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("dev.jsonl");
        let good = serde_json::to_string(&record("1001_1")).unwrap();
        std::fs::write(&path, format!("{good}\n{{\"image\":\"PMC2/PMC2_fi")).unwrap();

        let mut index = OutputIndex::open(&path, IndexMode::Resume).unwrap();
        assert_eq!(index.len(), 1);
        index.append(&record("1002_1")).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[2].ends_with(r#""pair_id":"1002_1"}"#));
    }

    #[test]
    fn pair_id_joins_with_underscore() {
        assert_eq!(pair_id("1001", "F1"), "1001_F1");
    }
}
