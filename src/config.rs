//! Configuration for a harvest run.
//!
//! Every knob lives in one immutable [`HarvestConfig`] handed to the
//! [`crate::harvest::Harvester`] at construction. Nothing is read from
//! process-wide state afterwards, so two harvesters with different endpoints
//! or limits can run side by side in the same process (tests do exactly that
//! against mock servers).

use crate::error::HarvestError;
use crate::index::IndexMode;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;

/// S3 mirror of the PMC open-access subset.
pub const DEFAULT_PRIMARY_BASE: &str = "https://pmc-oa-opendata.s3.amazonaws.com/";

/// NCBI FTP-over-HTTPS tree of the same packages.
pub const DEFAULT_FALLBACK_BASE: &str = "https://ftp.ncbi.nlm.nih.gov/pub/pmc/";

/// Raster extensions the matcher tries, in order.
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".tif", ".tiff"];

/// Configuration for a harvest run.
///
/// Built via [`HarvestConfig::builder()`] or [`HarvestConfig::default()`].
///
/// # Example
/// ```rust
/// use pmc_captions::HarvestConfig;
///
/// let config = HarvestConfig::builder()
///     .subset_size(100)
///     .max_filesize_mb(50)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_archive_bytes, Some(50 * 1024 * 1024));
/// ```
#[derive(Clone)]
pub struct HarvestConfig {
    /// Base URL tried first for every package.
    pub primary_base: String,

    /// Base URL tried when the primary fails. `None` disables the fallback.
    pub fallback_base: Option<String>,

    /// Extension appended to the manifest path when it is not already present. Default: `.tar.gz`.
    pub archive_extension: String,

    /// Member suffixes that identify article markup. Default: `[".nxml"]`.
    pub markup_extensions: Vec<String>,

    /// Member suffixes that identify figure images, in matcher order.
    pub image_extensions: Vec<String>,

    /// JPEG quality for normalized images (1–100). Default: 90.
    pub jpeg_quality: u8,

    /// Attempt only the first N well-formed manifest rows.
    pub subset_size: Option<usize>,

    /// Skip packages larger than this many bytes.
    ///
    /// Checked against the `Content-Length` of a HEAD request before each
    /// endpoint is tried, and against the streamed byte count while
    /// downloading when the server does not advertise a length.
    pub max_archive_bytes: Option<u64>,

    /// Reload existing pair ids from the output index and append. Default: true.
    ///
    /// When false the run starts a fresh dataset and refuses an index that
    /// already holds records, unless `overwrite_index` is also set.
    pub resume: bool,

    /// With `resume = false`, truncate an existing index instead of refusing
    /// it. Default: false.
    pub overwrite_index: bool,

    /// Longest wait, in seconds, for a connection or for the next chunk of a
    /// package download. The transfer as a whole is unbounded. Default: 60.
    pub download_timeout_secs: u64,

    /// Timeout for the size-guard HEAD request, in seconds. Default: 30.
    pub head_timeout_secs: u64,

    /// Log running totals every N entries. Default: 100.
    pub report_every: usize,

    /// Parent directory for per-entry temp storage. Default: system temp dir.
    pub temp_dir: Option<PathBuf>,

    /// Progress callback for per-entry events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            primary_base: DEFAULT_PRIMARY_BASE.to_string(),
            fallback_base: Some(DEFAULT_FALLBACK_BASE.to_string()),
            archive_extension: ".tar.gz".to_string(),
            markup_extensions: vec![".nxml".to_string()],
            image_extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            jpeg_quality: 90,
            subset_size: None,
            max_archive_bytes: None,
            resume: true,
            overwrite_index: false,
            download_timeout_secs: 60,
            head_timeout_secs: 30,
            report_every: 100,
            temp_dir: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for HarvestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarvestConfig")
            .field("primary_base", &self.primary_base)
            .field("fallback_base", &self.fallback_base)
            .field("archive_extension", &self.archive_extension)
            .field("markup_extensions", &self.markup_extensions)
            .field("image_extensions", &self.image_extensions)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("subset_size", &self.subset_size)
            .field("max_archive_bytes", &self.max_archive_bytes)
            .field("resume", &self.resume)
            .field("overwrite_index", &self.overwrite_index)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("head_timeout_secs", &self.head_timeout_secs)
            .field("report_every", &self.report_every)
            .field("temp_dir", &self.temp_dir)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn HarvestProgressCallback>"),
            )
            .finish()
    }
}

impl HarvestConfig {
    /// Create a new builder for `HarvestConfig`.
    pub fn builder() -> HarvestConfigBuilder {
        HarvestConfigBuilder {
            config: Self::default(),
        }
    }

    /// How the output index is opened for this run.
    pub fn index_mode(&self) -> IndexMode {
        match (self.resume, self.overwrite_index) {
            (true, _) => IndexMode::Resume,
            (false, false) => IndexMode::Fresh,
            (false, true) => IndexMode::Overwrite,
        }
    }

    /// Check every constraint [`HarvestConfigBuilder::build`] enforces.
    ///
    /// Also run by [`crate::harvest::Harvester::new`], since the fields are
    /// public and a config can be assembled without the builder.
    pub fn validate(&self) -> Result<(), HarvestError> {
        check_base_url("primary", &self.primary_base)?;
        if let Some(ref fallback) = self.fallback_base {
            check_base_url("fallback", fallback)?;
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(HarvestError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {}",
                self.jpeg_quality
            )));
        }
        if self.markup_extensions.is_empty() {
            return Err(HarvestError::InvalidConfig(
                "At least one markup extension is required".into(),
            ));
        }
        if self.image_extensions.is_empty() {
            return Err(HarvestError::InvalidConfig(
                "At least one image extension is required".into(),
            ));
        }
        if self.subset_size == Some(0) {
            return Err(HarvestError::InvalidConfig(
                "Subset size must be ≥ 1".into(),
            ));
        }
        if self.resume && self.overwrite_index {
            return Err(HarvestError::InvalidConfig(
                "Overwriting the index requires resume to be off".into(),
            ));
        }
        if self.report_every == 0 {
            return Err(HarvestError::InvalidConfig(
                "Report interval must be ≥ 1".into(),
            ));
        }
        Ok(())
    }

    /// Every extension whose member bytes must be kept when an archive is opened.
    pub fn retained_extensions(&self) -> Vec<String> {
        self.markup_extensions
            .iter()
            .chain(self.image_extensions.iter())
            .cloned()
            .collect()
    }
}

/// Builder for [`HarvestConfig`].
#[derive(Debug)]
pub struct HarvestConfigBuilder {
    config: HarvestConfig,
}

impl HarvestConfigBuilder {
    pub fn primary_base(mut self, url: impl Into<String>) -> Self {
        self.config.primary_base = url.into();
        self
    }

    pub fn fallback_base(mut self, url: impl Into<String>) -> Self {
        self.config.fallback_base = Some(url.into());
        self
    }

    /// Use the primary endpoint only.
    pub fn no_fallback(mut self) -> Self {
        self.config.fallback_base = None;
        self
    }

    pub fn archive_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.archive_extension = ext.into();
        self
    }

    pub fn markup_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.markup_extensions = exts.into_iter().map(Into::into).collect();
        self
    }

    pub fn image_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.image_extensions = exts.into_iter().map(Into::into).collect();
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality;
        self
    }

    pub fn subset_size(mut self, n: usize) -> Self {
        self.config.subset_size = Some(n);
        self
    }

    pub fn max_archive_bytes(mut self, bytes: u64) -> Self {
        self.config.max_archive_bytes = Some(bytes);
        self
    }

    pub fn max_filesize_mb(mut self, mb: u64) -> Self {
        self.config.max_archive_bytes = Some(mb.saturating_mul(1024 * 1024));
        self
    }

    pub fn resume(mut self, v: bool) -> Self {
        self.config.resume = v;
        self
    }

    /// Allow a non-resumed run to truncate an existing index.
    pub fn overwrite_index(mut self, v: bool) -> Self {
        self.config.overwrite_index = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs.max(1);
        self
    }

    pub fn head_timeout_secs(mut self, secs: u64) -> Self {
        self.config.head_timeout_secs = secs.max(1);
        self
    }

    pub fn report_every(mut self, n: usize) -> Self {
        self.config.report_every = n.max(1);
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<HarvestConfig, HarvestError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn check_base_url(which: &str, url: &str) -> Result<(), HarvestError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(HarvestError::InvalidConfig(format!(
            "The {which} base URL must start with http:// or https://, got '{url}'"
        )))
    }
}
