//! Manifest preparation: train/dev/test split and fixed-size shards.
//!
//! Both operations copy rows byte for byte and repeat the manifest header at
//! the top of every output, so each output is itself a valid manifest.

use crate::error::HarvestError;
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Which partition a pmcid falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Train,
    Dev,
    Test,
}

impl Partition {
    pub fn as_str(self) -> &'static str {
        match self {
            Partition::Train => "train",
            Partition::Dev => "dev",
            Partition::Test => "test",
        }
    }
}

/// Stable bucket in `0..100`: the first 8 hex digits of the pmcid's MD5,
/// read as a number, mod 100. Matches lists split by earlier tooling.
pub fn bucket(pmcid: &str) -> u32 {
    let digest = Md5::digest(pmcid.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) % 100
}

/// 97 % train, 1 % dev, 2 % test.
pub fn partition_for(pmcid: &str) -> Partition {
    match bucket(pmcid) {
        b if b < 97 => Partition::Train,
        97 => Partition::Dev,
        _ => Partition::Test,
    }
}

/// Output paths and row counts of a [`split_manifest`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutput {
    pub train: PathBuf,
    pub dev: PathBuf,
    pub test: PathBuf,
    pub train_rows: usize,
    pub dev_rows: usize,
    pub test_rows: usize,
    /// Rows with fewer than five fields.
    pub skipped_rows: usize,
}

/// Split `input` into `<stem>_train.txt`, `<stem>_dev.txt` and
/// `<stem>_test.txt` inside `out_dir`.
pub fn split_manifest(input: &Path, out_dir: &Path) -> Result<SplitOutput, HarvestError> {
    let (header, rows) = open_manifest(input)?;
    create_dir(out_dir)?;

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "manifest".to_string());
    let path_for = |p: Partition| out_dir.join(format!("{stem}_{}.txt", p.as_str()));

    let mut out = SplitOutput {
        train: path_for(Partition::Train),
        dev: path_for(Partition::Dev),
        test: path_for(Partition::Test),
        train_rows: 0,
        dev_rows: 0,
        test_rows: 0,
        skipped_rows: 0,
    };
    let mut train = ManifestWriter::create(&out.train, &header)?;
    let mut dev = ManifestWriter::create(&out.dev, &header)?;
    let mut test = ManifestWriter::create(&out.test, &header)?;

    for row in rows {
        let row = row.map_err(|source| read_err(input, source))?;
        let text = String::from_utf8_lossy(&row);
        let fields: Vec<&str> = text.trim_end_matches('\r').split('\t').collect();
        if fields.len() < 5 {
            out.skipped_rows += 1;
            continue;
        }
        match partition_for(fields[2]) {
            Partition::Train => {
                train.write_row(&row)?;
                out.train_rows += 1;
            }
            Partition::Dev => {
                dev.write_row(&row)?;
                out.dev_rows += 1;
            }
            Partition::Test => {
                test.write_row(&row)?;
                out.test_rows += 1;
            }
        }
    }
    train.finish()?;
    dev.finish()?;
    test.finish()?;

    info!(
        "Split {}: {} train, {} dev, {} test ({} skipped)",
        input.display(),
        out.train_rows,
        out.dev_rows,
        out.test_rows,
        out.skipped_rows
    );
    Ok(out)
}

/// Cut `input` into `<prefix>_shard-00000.txt`, `<prefix>_shard-00001.txt`, …
/// of at most `shard_size` rows each. Returns the shard paths in order.
pub fn shard_manifest(
    input: &Path,
    out_dir: &Path,
    prefix: &str,
    shard_size: usize,
) -> Result<Vec<PathBuf>, HarvestError> {
    if shard_size == 0 {
        return Err(HarvestError::InvalidConfig(
            "Shard size must be ≥ 1".into(),
        ));
    }
    let (header, rows) = open_manifest(input)?;
    create_dir(out_dir)?;

    let mut shards = Vec::new();
    let mut current: Option<ManifestWriter> = None;
    let mut rows_in_shard = 0usize;

    for row in rows {
        let row = row.map_err(|source| read_err(input, source))?;
        if rows_in_shard == 0 {
            if let Some(done) = current.take() {
                done.finish()?;
            }
            let path = out_dir.join(format!("{prefix}_shard-{:05}.txt", shards.len()));
            current = Some(ManifestWriter::create(&path, &header)?);
            shards.push(path);
        }
        if let Some(ref mut w) = current {
            w.write_row(&row)?;
        }
        rows_in_shard = (rows_in_shard + 1) % shard_size;
    }
    if let Some(done) = current {
        done.finish()?;
    }

    info!("Wrote {} shards of {} rows from {}", shards.len(), shard_size, input.display());
    Ok(shards)
}

// ── Helpers ──────────────────────────────────────────────────────────────────

type Rows = std::iter::Skip<std::io::Split<BufReader<File>>>;

/// Header bytes (without newline) plus an iterator over the remaining rows.
fn open_manifest(input: &Path) -> Result<(Vec<u8>, Rows), HarvestError> {
    if !input.exists() {
        return Err(HarvestError::ManifestNotFound {
            path: input.to_path_buf(),
        });
    }
    let open = || File::open(input).map_err(|source| read_err(input, source));

    let header = match BufReader::new(open()?).split(b'\n').next() {
        Some(line) => line.map_err(|source| read_err(input, source))?,
        None => Vec::new(),
    };
    let rows = BufReader::new(open()?).split(b'\n').skip(1);
    Ok((header, rows))
}

fn read_err(path: &Path, source: std::io::Error) -> HarvestError {
    HarvestError::ManifestRead {
        path: path.to_path_buf(),
        source,
    }
}

fn create_dir(dir: &Path) -> Result<(), HarvestError> {
    std::fs::create_dir_all(dir).map_err(|source| HarvestError::OutputSetup {
        path: dir.to_path_buf(),
        source,
    })
}

struct ManifestWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl ManifestWriter {
    fn create(path: &Path, header: &[u8]) -> Result<Self, HarvestError> {
        let file = File::create(path).map_err(|source| HarvestError::OutputSetup {
            path: path.to_path_buf(),
            source,
        })?;
        let mut w = Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
        };
        w.write_row(header)?;
        Ok(w)
    }

    fn write_row(&mut self, row: &[u8]) -> Result<(), HarvestError> {
        self.out
            .write_all(row)
            .and_then(|_| self.out.write_all(b"\n"))
            .map_err(|source| HarvestError::OutputSetup {
                path: self.path.clone(),
                source,
            })
    }

    fn finish(mut self) -> Result<(), HarvestError> {
        self.out.flush().map_err(|source| HarvestError::OutputSetup {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "File\tArticle Citation\tAccession ID\tPMID\tLicense";

    fn write_input(dir: &Path, rows: usize) -> PathBuf {
        let path = dir.join("oa_file_list.txt");
        let mut body = format!("{HEADER}\n");
        for i in 0..rows {
            body.push_str(&format!("oa/PMC{i}.tar.gz\tt{i}\tPMC{i}\t{i}\tCC0\n"));
        }
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn bucket_matches_known_assignments() {
        assert_eq!(bucket("PMC15015"), 78);
        assert_eq!(bucket("PMC1"), 48);
        assert_eq!(bucket("PMC35"), 97);
        assert_eq!(bucket("PMC14"), 98);
        assert_eq!(partition_for("PMC15015"), Partition::Train);
        assert_eq!(partition_for("PMC35"), Partition::Dev);
        assert_eq!(partition_for("PMC74"), Partition::Test);
    }

    #[test]
    fn bucket_is_stable_and_in_range() {
        assert_eq!(bucket("PMC15015"), bucket("PMC15015"));
        for i in 0..500 {
            assert!(bucket(&format!("PMC{i}")) < 100);
        }
    }

    #[test]
    fn split_preserves_every_row_once() {
        let tmp = tempfile::tempdir().unwrap();
        let input = write_input(tmp.path(), 400);
        let mut body = std::fs::read_to_string(&input).unwrap();
        body.push_str("too\tfew\tfields\n");
        std::fs::write(&input, body).unwrap();

        let out = split_manifest(&input, &tmp.path().join("parts")).unwrap();
        assert_eq!(out.train_rows + out.dev_rows + out.test_rows, 400);
        assert_eq!(out.skipped_rows, 1);
        assert!(out.train_rows > out.dev_rows + out.test_rows);
        assert!(out.dev.ends_with("oa_file_list_dev.txt"));

        for (path, rows) in [
            (&out.train, out.train_rows),
            (&out.dev, out.dev_rows),
            (&out.test, out.test_rows),
        ] {
            let text = std::fs::read_to_string(path).unwrap();
            assert_eq!(text.lines().next(), Some(HEADER));
            assert_eq!(text.lines().count(), rows + 1);
        }
    }

    #[test]
    fn split_follows_bucket() {
        let tmp = tempfile::tempdir().unwrap();
        let input = write_input(tmp.path(), 50);
        let out = split_manifest(&input, tmp.path()).unwrap();

        let train = std::fs::read_to_string(&out.train).unwrap();
        for i in 0..50 {
            let pmcid = format!("PMC{i}");
            let in_train = train.contains(&format!("\t{pmcid}\t"));
            assert_eq!(in_train, partition_for(&pmcid) == Partition::Train);
        }
    }

    #[test]
    fn shards_have_header_and_bounded_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let input = write_input(tmp.path(), 7);
        let shards = shard_manifest(&input, &tmp.path().join("shards"), "list", 3).unwrap();

        let names: Vec<String> = shards
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            ["list_shard-00000.txt", "list_shard-00001.txt", "list_shard-00002.txt"]
        );

        let counts: Vec<usize> = shards
            .iter()
            .map(|p| std::fs::read_to_string(p).unwrap().lines().count())
            .collect();
        assert_eq!(counts, [4, 4, 2]);
        let last = std::fs::read_to_string(&shards[2]).unwrap();
        assert!(last.starts_with(HEADER));
        assert!(last.contains("PMC6"));
    }

    #[test]
    fn header_only_input_gives_no_shards() {
        let tmp = tempfile::tempdir().unwrap();
        let input = write_input(tmp.path(), 0);
        let shards = shard_manifest(&input, tmp.path(), "list", 10).unwrap();
        assert!(shards.is_empty());
    }

    #[test]
    fn zero_shard_size_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let input = write_input(tmp.path(), 1);
        assert!(shard_manifest(&input, tmp.path(), "list", 0).is_err());
    }

    #[test]
    fn missing_input_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let err = split_manifest(&tmp.path().join("nope.txt"), tmp.path()).unwrap_err();
        assert!(matches!(err, HarvestError::ManifestNotFound { .. }));
    }
}
