//! # pmc-captions
//!
//! Build an image-caption dataset from the PubMed Central open-access subset.
//!
//! Each manifest row names one article package (a `.tar.gz` holding the
//! article's NXML and its figure files). The harvester streams packages one
//! at a time, pulls every figure caption out of the markup, finds the image
//! each caption points at, re-encodes it as RGB JPEG and appends a
//! caption-image record to a JSON-lines index. Nothing but the current
//! package ever sits on local disk.
//!
//! ## Pipeline Overview
//!
//! ```text
//! manifest row
//!  │
//!  ├─ 1. Fetch      primary endpoint, then fallback; optional size guard
//!  ├─ 2. Extract    list tar members, keep markup + image bytes only
//!  ├─ 3. Parse      NXML → figure captions (pluggable CaptionParser)
//!  ├─ 4. Match      graphic reference → image member
//!  ├─ 5. Normalize  decode → RGB8 → JPEG, atomic write
//!  └─ 6. Index      dedup on pair_id, append one JSON line, flush
//! ```
//!
//! Every entry is best-effort. An entry that cannot be
//! fetched or parsed is skipped and counted, a caption without a usable image
//! is dropped, and the run keeps going. Re-running against the same output
//! resumes where the previous run stopped.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pmc_captions::{HarvestConfig, Harvester, SplitJob};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HarvestConfig::builder()
//!         .subset_size(100)
//!         .max_filesize_mb(200)
//!         .build()?;
//!     let harvester = Harvester::with_jats(config)?;
//!
//!     let job = SplitJob::new("lists/dev.txt", "out/dev.jsonl", "out/images/dev");
//!     let stats = harvester.harvest(&job).await?;
//!     eprintln!("{}", stats.summary(&job.name));
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pmc-captions` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pmc-captions = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod harvest;
pub mod index;
pub mod manifest;
pub mod pipeline;
pub mod progress;
pub mod runs;
pub mod split;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{HarvestConfig, HarvestConfigBuilder};
pub use error::{
    ArchiveError, CaptionError, CodecError, EntryError, HarvestError, ParseError, RetrievalError,
};
pub use harvest::{EntryOutcome, HarvestStats, Harvester, SkipReason, SplitJob};
pub use index::{AppendOutcome, IndexMode, OutputIndex, OutputRecord};
pub use manifest::{read_manifest, Manifest, ManifestEntry};
pub use pipeline::caption::{CaptionParser, CaptionRecord};
pub use pipeline::jats::JatsCaptionParser;
pub use progress::{HarvestProgressCallback, NoopProgressCallback, ProgressCallback};
pub use runs::RunPlan;
pub use split::{shard_manifest, split_manifest};
