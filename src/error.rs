//! Error types for the pmc-captions library.
//!
//! Failures are scoped by how much work they abort:
//!
//! * [`HarvestError`]: **fatal**. The run cannot start or cannot keep its
//!   output consistent (manifest missing, output root unwritable, index write
//!   failed). Returned as `Err` from [`crate::harvest::Harvester::harvest`].
//!
//! * [`EntryError`]: **entry-level**. One manifest entry is abandoned
//!   (both endpoints failed, corrupt archive, malformed markup, no captions)
//!   and counted as skipped. The run moves on to the next entry.
//!
//! * [`CaptionError`]: **caption-level**. One figure of an entry is dropped
//!   (no matching image, undecodable raster). The entry's other figures
//!   still proceed.
//!
//! Nothing here is retried except the primary → fallback endpoint
//! substitution inside [`crate::pipeline::fetch`].

use std::path::PathBuf;
use thiserror::Error;

pub use oa_package::ArchiveError;

/// Fatal errors that stop a harvest run.
#[derive(Debug, Error)]
pub enum HarvestError {
    // ── Startup ───────────────────────────────────────────────────────────
    /// The manifest file does not exist.
    #[error("Manifest not found: '{path}'\nCheck the path exists and is readable.")]
    ManifestNotFound { path: PathBuf },

    /// The manifest exists but could not be read.
    #[error("Failed to read manifest '{path}': {source}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The output root or index parent directory could not be created.
    #[error("Cannot prepare output location '{path}': {source}")]
    OutputSetup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A shard directory held no manifest files.
    #[error("No shard manifests (*.txt) found in '{path}'")]
    NoShards { path: PathBuf },

    // ── Output ────────────────────────────────────────────────────────────
    /// Appending to (or opening) the output index failed.
    #[error("Failed to write output index '{path}': {source}")]
    IndexWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A fresh (non-resumed) run found records already in the index.
    #[error(
        "Output index '{path}' already holds records\n\
         Resume it, or explicitly allow overwriting to start from scratch."
    )]
    IndexExists { path: PathBuf },

    // ── Config / runtime ──────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Retrieval of one package failed.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The package is larger than the configured ceiling.
    #[error("Package at '{url}' is {size} bytes, over the {limit}-byte limit")]
    TooLarge { url: String, size: u64, limit: u64 },

    /// Every endpoint attempted failed.
    #[error("Download failed (primary: {primary}; fallback: {})", .fallback.as_deref().unwrap_or("not configured"))]
    Failed {
        primary: String,
        fallback: Option<String>,
    },

    /// The local temp file could not be written.
    #[error("Failed to store package at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The caption parser rejected the markup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Malformed markup: {detail}")]
pub struct ParseError {
    pub detail: String,
}

impl ParseError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Image decode or encode failure.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("decode failed: {0}")]
    Decode(#[source] image::ImageError),

    #[error("encode failed: {0}")]
    Encode(#[source] image::ImageError),
}

/// An entry-level failure: the whole manifest entry is skipped.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The parser found no figure captions in the markup.
    #[error("No captions in markup")]
    EmptyCaptionSet,

    /// Neither the markup nor the manifest gave a pmcid usable as a directory name.
    #[error("Unusable pmcid '{pmcid}': only letters, digits, '.', '_' and '-' are allowed")]
    UnsafeIdentifier { pmcid: String },
}

impl EntryError {
    /// Short tag for progress output and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            EntryError::Retrieval(RetrievalError::TooLarge { .. }) => "too-large",
            EntryError::Retrieval(_) => "retrieval",
            EntryError::Archive(_) => "archive",
            EntryError::Parse(_) => "parse",
            EntryError::EmptyCaptionSet => "no-captions",
            EntryError::UnsafeIdentifier { .. } => "unsafe-id",
        }
    }
}

/// A caption-level failure: only this figure is dropped.
#[derive(Debug, Error)]
pub enum CaptionError {
    /// Caption text or graphic reference is empty.
    #[error("Figure '{fig_id}': missing caption text or graphic reference")]
    MissingFields { fig_id: String },

    /// No archive member resolves to the graphic reference.
    #[error("Figure '{fig_id}': no image matches graphic reference '{graphic_ref}'")]
    NoMatch { fig_id: String, graphic_ref: String },

    /// The matched member's bytes could not be read from the archive.
    #[error("Figure '{fig_id}': {source}")]
    Extract {
        fig_id: String,
        #[source]
        source: ArchiveError,
    },

    /// The matched image could not be decoded or re-encoded.
    #[error("Figure '{fig_id}': {source}")]
    Codec {
        fig_id: String,
        #[source]
        source: CodecError,
    },

    /// The normalized image could not be written to the image tree.
    #[error("Figure '{fig_id}': failed to write '{path}': {source}")]
    ImageWrite {
        fig_id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
