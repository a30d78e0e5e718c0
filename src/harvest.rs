//! The orchestrator: walk one manifest, entry by entry, into one index file
//! and one image tree.
//!
//! Entries are processed strictly one after another. Every entry gets its
//! own temp directory, dropped (and deleted) on every exit path, so local
//! disk holds at most one package at a time. Failures are sorted by scope:
//!
//! | Scope | Effect | Examples |
//! |-------|--------|----------|
//! | run | `Err(HarvestError)` | manifest missing, index write failed |
//! | entry | entry counted as skipped | both endpoints down, corrupt tarball, bad XML |
//! | caption | that figure dropped, entry continues | no matching image, undecodable TIFF |
//!
//! Because the dedup set is rebuilt from the index file at open time, an
//! interrupted run is resumed by simply running it again.

use crate::config::HarvestConfig;
use crate::error::{CaptionError, EntryError, HarvestError, RetrievalError};
use crate::index::{pair_id, AppendOutcome, OutputIndex, OutputRecord};
use crate::manifest::{read_manifest, ManifestEntry};
use crate::pipeline::caption::{resolve_ids, CaptionParser, CaptionRecord};
use crate::pipeline::fetch::Retriever;
use crate::pipeline::jats::JatsCaptionParser;
use crate::pipeline::matcher::ImageIndex;
use crate::pipeline::normalize::{image_exists, image_relative_path, write_image, ImageNormalizer};
use crate::progress::{HarvestProgressCallback, NoopProgressCallback};
use oa_package::PackageArchive;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info, warn};

static NOOP_CALLBACK: NoopProgressCallback = NoopProgressCallback;

// ── Jobs and results ─────────────────────────────────────────────────────────

/// One manifest → one index file + one image root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitJob {
    /// Label used in log lines and progress events.
    pub name: String,
    pub manifest: PathBuf,
    pub index_path: PathBuf,
    pub images_dir: PathBuf,
}

impl SplitJob {
    /// A job labelled with the manifest's file name.
    pub fn new(
        manifest: impl Into<PathBuf>,
        index_path: impl Into<PathBuf>,
        images_dir: impl Into<PathBuf>,
    ) -> Self {
        let manifest = manifest.into();
        let name = manifest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| manifest.display().to_string());
        Self {
            name,
            manifest,
            index_path: index_path.into(),
            images_dir: images_dir.into(),
        }
    }
}

/// Counters for one [`Harvester::harvest`] call.
///
/// `written_entries + skipped_entries == attempted` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarvestStats {
    /// Well-formed manifest entries processed (after the subset cap).
    pub attempted: usize,
    /// Entries that contributed at least one new record.
    pub written_entries: usize,
    pub skipped_entries: usize,
    /// Lines appended to the index.
    pub records_written: usize,
    /// Figures whose pair id was already in the index.
    pub duplicates: usize,
    /// Figures dropped by a caption-level failure.
    pub caption_failures: usize,
    /// Manifest rows rejected for their field count.
    pub dropped_rows: usize,
    pub duration_ms: u64,
}

impl HarvestStats {
    /// The closing log line for a run.
    pub fn summary(&self, name: &str) -> String {
        format!(
            "[{name}] Wrote {} pairs. Skipped {}.",
            self.records_written, self.skipped_entries
        )
    }
}

/// What happened to one manifest entry.
#[derive(Debug)]
pub enum EntryOutcome {
    Written { records: usize },
    Skipped(SkipReason),
}

/// Why an entry produced nothing.
#[derive(Debug)]
pub enum SkipReason {
    Failed(EntryError),
    /// Every figure was a duplicate or hit a caption-level failure.
    NoNewRecords,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Failed(e) => write!(f, "{e}"),
            SkipReason::NoNewRecords => f.write_str("no new caption-image pairs"),
        }
    }
}

impl From<EntryError> for EntryOutcome {
    fn from(e: EntryError) -> Self {
        EntryOutcome::Skipped(SkipReason::Failed(e))
    }
}

// ── Harvester ────────────────────────────────────────────────────────────────

/// Drives manifests through the pipeline.
pub struct Harvester {
    config: HarvestConfig,
    parser: Arc<dyn CaptionParser>,
    retriever: Retriever,
    normalizer: ImageNormalizer,
}

impl fmt::Debug for Harvester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harvester")
            .field("config", &self.config)
            .field("parser", &"<dyn CaptionParser>")
            .finish()
    }
}

/// Per-entry view of the archive the caption loop works against.
struct EntryContext<'a> {
    archive: &'a PackageArchive,
    images: ImageIndex<'a>,
    pmid: String,
    pmcid: String,
    images_dir: &'a Path,
}

impl Harvester {
    pub fn new(
        config: HarvestConfig,
        parser: impl CaptionParser + 'static,
    ) -> Result<Self, HarvestError> {
        config.validate()?;
        let retriever = Retriever::new(&config)?;
        let normalizer = ImageNormalizer::new(config.jpeg_quality);
        Ok(Self {
            config,
            parser: Arc::new(parser),
            retriever,
            normalizer,
        })
    }

    /// A harvester using the stock NXML parser.
    pub fn with_jats(config: HarvestConfig) -> Result<Self, HarvestError> {
        Self::new(config, JatsCaptionParser::new())
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    fn callback(&self) -> &dyn HarvestProgressCallback {
        match self.config.progress_callback {
            Some(ref cb) => cb.as_ref(),
            None => &NOOP_CALLBACK,
        }
    }

    /// Process every entry of `job.manifest`.
    ///
    /// Returns `Ok` even when every entry was skipped; check the stats.
    ///
    /// # Errors
    /// Only for run-level failures: missing or unreadable manifest, an
    /// output location that cannot be created, or a failed index write.
    pub async fn harvest(&self, job: &SplitJob) -> Result<HarvestStats, HarvestError> {
        let started = Instant::now();
        let name = job.name.as_str();

        // ── Step 1: Preconditions ────────────────────────────────────────
        let manifest = read_manifest(&job.manifest, self.config.subset_size)?;
        std::fs::create_dir_all(&job.images_dir).map_err(|source| {
            HarvestError::OutputSetup {
                path: job.images_dir.clone(),
                source,
            }
        })?;
        let mut index = OutputIndex::open(&job.index_path, self.config.index_mode())?;

        let total = manifest.entries.len();
        let mut stats = HarvestStats {
            dropped_rows: manifest.dropped_rows,
            ..Default::default()
        };
        info!(
            "[{}] {} entries to process → {}",
            name,
            total,
            job.index_path.display()
        );
        self.callback().on_harvest_start(name, total);

        // ── Step 2: One entry at a time ──────────────────────────────────
        for (i, entry) in manifest.entries.iter().enumerate() {
            let n = i + 1;
            self.callback().on_entry_start(n, total, &entry.pmcid);

            let outcome = self
                .process_entry(entry, &mut index, &job.images_dir, &mut stats)
                .await?;
            stats.attempted += 1;

            match outcome {
                EntryOutcome::Written { records } => {
                    stats.written_entries += 1;
                    debug!("[{}] {} → {} pairs", name, entry.pmcid, records);
                    self.callback()
                        .on_entry_written(n, total, &entry.pmcid, records);
                }
                EntryOutcome::Skipped(reason) => {
                    stats.skipped_entries += 1;
                    match reason {
                        SkipReason::Failed(ref e) => {
                            warn!("[{}] Skipping {} ({}): {}", name, entry.pmcid, e.kind(), e)
                        }
                        SkipReason::NoNewRecords => {
                            warn!("[{}] Skipping {}: {}", name, entry.pmcid, reason)
                        }
                    }
                    self.callback()
                        .on_entry_skipped(n, total, &entry.pmcid, &reason.to_string());
                }
            }

            if n % self.config.report_every == 0 {
                info!(
                    "[{}] {}/{} entries: {} pairs written, {} entries skipped",
                    name, n, total, stats.records_written, stats.skipped_entries
                );
            }
        }

        // ── Step 3: Summary ──────────────────────────────────────────────
        stats.duration_ms = started.elapsed().as_millis() as u64;
        info!("{}", stats.summary(name));
        self.callback().on_harvest_complete(name, &stats);
        Ok(stats)
    }

    /// Run one entry through retrieval, extraction, parsing and the caption loop.
    ///
    /// Entry- and caption-level failures are folded into the outcome and
    /// `stats`; only run-level failures come back as `Err`.
    async fn process_entry(
        &self,
        entry: &ManifestEntry,
        index: &mut OutputIndex,
        images_dir: &Path,
        stats: &mut HarvestStats,
    ) -> Result<EntryOutcome, HarvestError> {
        // Removed on drop, whichever way this function returns.
        let tmp = match self.entry_temp_dir() {
            Ok(dir) => dir,
            Err(e) => return Ok(EntryError::from(e).into()),
        };

        let archive_path = match self.retriever.fetch(entry, tmp.path()).await {
            Ok(p) => p,
            Err(e) => return Ok(EntryError::from(e).into()),
        };

        let retained = self.config.retained_extensions();
        let spill_dir = tmp.path().join("members");
        let archive = tokio::task::spawn_blocking(move || {
            PackageArchive::open_retaining(&archive_path, &retained, &spill_dir)
        })
        .await
        .map_err(|e| HarvestError::Internal(format!("Archive task panicked: {}", e)))?;
        let archive = match archive {
            Ok(a) => a,
            Err(e) => return Ok(EntryError::from(e).into()),
        };

        let markup = match archive
            .first_markup(&self.config.markup_extensions)
            .and_then(|m| archive.retained(m))
        {
            Ok(handle) => handle,
            Err(e) => return Ok(EntryError::from(e).into()),
        };

        let parser = Arc::clone(&self.parser);
        let records = tokio::task::spawn_blocking(move || -> Result<_, EntryError> {
            let bytes = markup.read()?;
            Ok(parser.parse(&bytes)?)
        })
        .await
        .map_err(|e| HarvestError::Internal(format!("Parser task panicked: {}", e)))?;
        let records = match records {
            Ok(r) if r.is_empty() => return Ok(EntryError::EmptyCaptionSet.into()),
            Ok(r) => r,
            Err(e) => return Ok(e.into()),
        };

        let (pmid, pmcid) = match resolve_ids(&records, &entry.pmid, &entry.pmcid) {
            Ok(ids) => ids,
            Err(e) => return Ok(e.into()),
        };
        let ctx = EntryContext {
            archive: &archive,
            images: ImageIndex::build(
                archive.members_by_class(&self.config.image_extensions),
                &self.config.image_extensions,
            ),
            pmid: pmid.to_string(),
            pmcid: pmcid.to_string(),
            images_dir,
        };
        debug!(
            "{}: {} figures, {} image members",
            ctx.pmcid,
            records.len(),
            ctx.images.len()
        );

        let mut written = 0usize;
        for record in &records {
            match self.process_caption(&ctx, record, index).await {
                Ok(Some(AppendOutcome::Appended)) => written += 1,
                Ok(Some(AppendOutcome::Duplicate)) | Ok(None) => stats.duplicates += 1,
                Err(CaptionFailure::Run(e)) => return Err(e),
                Err(CaptionFailure::Caption(e)) => {
                    stats.caption_failures += 1;
                    warn!("{}: dropping figure: {}", ctx.pmcid, e);
                    self.callback()
                        .on_caption_skipped(&ctx.pmcid, &record.fig_id, &e.to_string());
                }
            }
        }
        stats.records_written += written;

        if written == 0 {
            Ok(EntryOutcome::Skipped(SkipReason::NoNewRecords))
        } else {
            Ok(EntryOutcome::Written { records: written })
        }
    }

    /// Match, normalize and append one figure.
    ///
    /// `Ok(None)` means the pair was already indexed and nothing was touched.
    async fn process_caption(
        &self,
        ctx: &EntryContext<'_>,
        record: &CaptionRecord,
        index: &mut OutputIndex,
    ) -> Result<Option<AppendOutcome>, CaptionFailure> {
        let fig_id = record.fig_id.trim();
        let caption = record.fig_caption.trim();
        if fig_id.is_empty() || caption.is_empty() || record.graphic_ref.trim().is_empty() {
            return Err(CaptionError::MissingFields {
                fig_id: record.fig_id.clone(),
            }
            .into());
        }

        let pair = pair_id(&ctx.pmid, fig_id);
        if index.contains(&pair) {
            return Ok(None);
        }

        let relative = image_relative_path(&ctx.pmcid, fig_id);
        if image_exists(ctx.images_dir, &relative) {
            debug!("Reusing existing image {}", relative);
        } else {
            self.store_image(ctx, record, fig_id, &relative).await?;
        }

        let outcome = index.append(&OutputRecord {
            image: relative,
            caption: caption.to_string(),
            pmid: ctx.pmid.clone(),
            pmcid: ctx.pmcid.clone(),
            pair_id: pair,
        })?;
        Ok(Some(outcome))
    }

    async fn store_image(
        &self,
        ctx: &EntryContext<'_>,
        record: &CaptionRecord,
        fig_id: &str,
        relative: &str,
    ) -> Result<(), CaptionFailure> {
        let found = ctx
            .images
            .resolve(&record.graphic_ref)
            .ok_or_else(|| CaptionError::NoMatch {
                fig_id: fig_id.to_string(),
                graphic_ref: record.graphic_ref.clone(),
            })?;
        let member = ctx
            .archive
            .retained(found.member)
            .map_err(|source| CaptionError::Extract {
                fig_id: fig_id.to_string(),
                source,
            })?;

        let normalizer = self.normalizer;
        let root = ctx.images_dir.to_path_buf();
        let relative = relative.to_string();
        let fig = fig_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), CaptionError> {
            let raw = member.read().map_err(|source| CaptionError::Extract {
                fig_id: fig.clone(),
                source,
            })?;
            let image = normalizer
                .normalize(&raw)
                .map_err(|source| CaptionError::Codec {
                    fig_id: fig.clone(),
                    source,
                })?;
            write_image(&root, &relative, &image.bytes).map_err(|source| {
                CaptionError::ImageWrite {
                    fig_id: fig,
                    path: root.join(&relative),
                    source,
                }
            })?;
            Ok(())
        })
        .await
        .map_err(|e| HarvestError::Internal(format!("Normalize task panicked: {}", e)))??;
        Ok(())
    }

    fn entry_temp_dir(&self) -> Result<TempDir, RetrievalError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pmc-captions-");
        let result = match self.config.temp_dir {
            Some(ref dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        };
        result.map_err(|source| RetrievalError::Storage {
            path: self
                .config
                .temp_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            source,
        })
    }
}

/// Caption loop failures: most drop the figure, an index write stops the run.
enum CaptionFailure {
    Caption(CaptionError),
    Run(HarvestError),
}

impl From<CaptionError> for CaptionFailure {
    fn from(e: CaptionError) -> Self {
        CaptionFailure::Caption(e)
    }
}

impl From<HarvestError> for CaptionFailure {
    fn from(e: HarvestError) -> Self {
        CaptionFailure::Run(e)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
