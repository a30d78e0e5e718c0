//! # oa-package
//!
//! Read PubMed Central open-access packages and pick members out of them by
//! file class. A package is a gzipped tarball holding one article's JATS
//! markup (`.nxml`), its figures, and assorted supplementary files.
//!
//! ## How it works
//!
//! [`PackageArchive::open_retaining`] makes a single pass over the gzip/tar
//! stream:
//!
//! 1. Every member header is recorded as an [`ArchiveMember`] (name, size,
//!    file flag), in archive order.
//! 2. Regular files whose name ends with one of the requested extensions are
//!    copied into a caller-supplied spill directory, one file per member,
//!    named by archive position. Supplementary videos, PDFs and data files
//!    are skipped over without being copied.
//! 3. [`PackageArchive::extract`] reads a retained member back from disk, so
//!    only the member currently in use is ever held in memory.
//!
//! Spill files are named by position, never by member path, so hostile
//! member names cannot write outside the spill directory. The caller owns
//! the directory and removes it when done with the archive.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use oa_package::PackageArchive;
//!
//! let spill = tempfile::tempdir()?;
//! let archive = PackageArchive::open_retaining(
//!     "PMC15015.tar.gz",
//!     &[".nxml", ".jpg", ".png"],
//!     spill.path(),
//! )?;
//! let markup = archive.first_markup(&[".nxml"])?;
//! let bytes = archive.extract(markup)?;
//! println!("{} bytes of NXML", bytes.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned while reading a package.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The archive file could not be opened.
    #[error("Cannot open archive '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// gzip/tar decoding failed part-way through the stream.
    #[error("Corrupt archive '{path}': {detail}")]
    Corrupt { path: PathBuf, detail: String },

    /// The package holds no member of the markup class.
    #[error("No markup found in '{path}'")]
    NoMarkup { path: PathBuf },

    /// The member does not belong to this archive.
    #[error("Member '{name}' not found in archive")]
    MemberNotFound { name: String },

    /// The member exists but its bytes were not kept when the archive was opened.
    #[error("Member '{name}' was not retained when the archive was opened")]
    NotRetained { name: String },

    /// A retained member could not be written to or read back from the spill directory.
    #[error("Spill file '{path}': {source}")]
    Spill {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ── Members ──────────────────────────────────────────────────────────────────

/// One named entry inside a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    /// Path of the member inside the tarball, e.g. `PMC15015/f1.jpg`.
    pub name: String,
    /// Size in bytes as declared by the tar header.
    pub size: u64,
    /// `true` for regular files; directories, links and specials are `false`.
    pub is_file: bool,
    position: usize,
}

impl ArchiveMember {
    /// Final path component of the member name.
    pub fn basename(&self) -> &str {
        basename(&self.name)
    }

    /// Case-insensitive suffix test against any of `extensions`.
    pub fn has_extension(&self, extensions: &[impl AsRef<str>]) -> bool {
        has_extension(&self.name, extensions)
    }
}

/// Final component of a `/`-separated member path.
pub fn basename(name: &str) -> &str {
    name.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(name)
}

/// Returns `true` when `name` ends with one of `extensions`, ignoring ASCII case.
pub fn has_extension(name: &str, extensions: &[impl AsRef<str>]) -> bool {
    let lower = name.to_ascii_lowercase();
    extensions
        .iter()
        .any(|ext| lower.ends_with(&ext.as_ref().to_ascii_lowercase()))
}

// ── Archive ──────────────────────────────────────────────────────────────────

/// An opened package: the full member listing plus spill files for the
/// retained members.
///
/// Owned exclusively by whoever processes the package.
#[derive(Debug)]
pub struct PackageArchive {
    path: PathBuf,
    members: Vec<ArchiveMember>,
    retained: HashMap<usize, PathBuf>,
}

/// A retained member's spill file, detached from the archive so it can be
/// read on another thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedMember {
    pub name: String,
    pub path: PathBuf,
}

impl RetainedMember {
    /// The member's bytes.
    pub fn read(&self) -> Result<Vec<u8>, ArchiveError> {
        std::fs::read(&self.path).map_err(|source| ArchiveError::Spill {
            path: self.path.clone(),
            source,
        })
    }
}

impl PackageArchive {
    /// Open a `.tar.gz` package, retaining every regular file.
    pub fn open(path: impl AsRef<Path>, spill_dir: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        Self::scan(path.as_ref(), spill_dir.as_ref(), |_| true)
    }

    /// Open a `.tar.gz` package, retaining only regular files whose name ends
    /// with one of `extensions` (case-insensitive).
    pub fn open_retaining(
        path: impl AsRef<Path>,
        extensions: &[impl AsRef<str>],
        spill_dir: impl AsRef<Path>,
    ) -> Result<Self, ArchiveError> {
        Self::scan(path.as_ref(), spill_dir.as_ref(), |name| {
            has_extension(name, extensions)
        })
    }

    fn scan(
        path: &Path,
        spill_dir: &Path,
        retain: impl Fn(&str) -> bool,
    ) -> Result<Self, ArchiveError> {
        let file = File::open(path).map_err(|source| ArchiveError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let corrupt = |e: std::io::Error| ArchiveError::Corrupt {
            path: path.to_path_buf(),
            detail: e.to_string(),
        };
        std::fs::create_dir_all(spill_dir).map_err(|source| ArchiveError::Spill {
            path: spill_dir.to_path_buf(),
            source,
        })?;

        let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
        let mut members = Vec::new();
        let mut retained = HashMap::new();

        for (position, entry) in archive.entries().map_err(corrupt)?.enumerate() {
            let mut entry = entry.map_err(corrupt)?;
            let name = entry.path().map_err(corrupt)?.to_string_lossy().into_owned();
            let size = entry.header().size().map_err(corrupt)?;
            let is_file = entry.header().entry_type().is_file();

            if is_file && retain(&name) {
                let target = spill_dir.join(format!("member-{position:06}"));
                spill(&mut entry, &target, &corrupt)?;
                retained.insert(position, target);
            }

            members.push(ArchiveMember {
                name,
                size,
                is_file,
                position,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            members,
            retained,
        })
    }

    /// Path the archive was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every member, in archive order.
    pub fn members(&self) -> &[ArchiveMember] {
        &self.members
    }

    /// Regular-file members whose name ends with one of `extensions`
    /// (case-insensitive), in archive order.
    pub fn members_by_class(&self, extensions: &[impl AsRef<str>]) -> Vec<&ArchiveMember> {
        self.members
            .iter()
            .filter(|m| m.is_file && m.has_extension(extensions))
            .collect()
    }

    /// The first markup-class member, or [`ArchiveError::NoMarkup`].
    pub fn first_markup(
        &self,
        markup_extensions: &[impl AsRef<str>],
    ) -> Result<&ArchiveMember, ArchiveError> {
        self.members_by_class(markup_extensions)
            .into_iter()
            .next()
            .ok_or_else(|| ArchiveError::NoMarkup {
                path: self.path.clone(),
            })
    }

    /// The spill file holding a retained member.
    pub fn retained(&self, member: &ArchiveMember) -> Result<RetainedMember, ArchiveError> {
        match self.members.get(member.position) {
            Some(m) if m == member => {}
            _ => {
                return Err(ArchiveError::MemberNotFound {
                    name: member.name.clone(),
                })
            }
        }
        self.retained
            .get(&member.position)
            .map(|path| RetainedMember {
                name: member.name.clone(),
                path: path.clone(),
            })
            .ok_or_else(|| ArchiveError::NotRetained {
                name: member.name.clone(),
            })
    }

    /// A retained member's bytes.
    pub fn extract(&self, member: &ArchiveMember) -> Result<Vec<u8>, ArchiveError> {
        self.retained(member)?.read()
    }
}

/// Copy one member's data into `target`. Read failures mean a broken
/// archive; write failures are reported against the spill file.
fn spill(
    entry: &mut impl Read,
    target: &Path,
    corrupt: &impl Fn(std::io::Error) -> ArchiveError,
) -> Result<(), ArchiveError> {
    let spill_err = |source| ArchiveError::Spill {
        path: target.to_path_buf(),
        source,
    };
    let mut out = BufWriter::new(File::create(target).map_err(spill_err)?);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = entry.read(&mut buf).map_err(corrupt)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).map_err(spill_err)?;
    }
    out.flush().map_err(spill_err)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
