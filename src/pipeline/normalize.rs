//! Image normalization: arbitrary raster bytes → three-channel JPEG.
//!
//! PMC packages ship figures as JPEG, PNG, TIFF (often 16-bit or CMYK) and the
//! occasional grayscale scan. Everything is decoded with the `image` crate,
//! flattened to 8-bit RGB, and re-encoded at one fixed quality so the image
//! tree is uniform. Decoding sniffs the format from the bytes; the member's
//! extension is never trusted.
//!
//! Both functions here are CPU- or disk-bound and synchronous. The
//! orchestrator calls them from `spawn_blocking`.

use crate::error::CodecError;
use image::codecs::jpeg::JpegEncoder;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Extension of every normalized image.
pub const OUTPUT_EXTENSION: &str = "jpg";

/// Result of a successful normalization.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Re-encodes decoded rasters as JPEG at a fixed quality.
#[derive(Debug, Clone, Copy)]
pub struct ImageNormalizer {
    quality: u8,
}

impl ImageNormalizer {
    /// `quality` is clamped to 1–100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn normalize(&self, raw: &[u8]) -> Result<NormalizedImage, CodecError> {
        let decoded = image::load_from_memory(raw).map_err(CodecError::Decode)?;
        let rgb = decoded.to_rgb8();

        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, self.quality)
            .encode_image(&rgb)
            .map_err(CodecError::Encode)?;

        debug!(
            "Normalized {}x{} image: {} → {} bytes",
            rgb.width(),
            rgb.height(),
            raw.len(),
            bytes.len()
        );
        Ok(NormalizedImage {
            bytes,
            extension: OUTPUT_EXTENSION,
            width: rgb.width(),
            height: rgb.height(),
        })
    }
}

/// `{pmcid}/{pmcid}_fig-{fig_id}.jpg`, always `/`-separated since it is
/// written into the index verbatim.
pub fn image_relative_path(pmcid: &str, fig_id: &str) -> String {
    let fig = fig_id.replace(['/', '\\'], "_");
    format!("{pmcid}/{pmcid}_fig-{fig}.{OUTPUT_EXTENSION}")
}

/// Whether `s` can be used as a single path component: non-empty, only
/// `[A-Za-z0-9._-]`, and neither `.` nor `..`.
pub fn is_safe_component(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Whether a normalized image already sits at `root/relative`.
pub fn image_exists(root: &Path, relative: &str) -> bool {
    root.join(relative).is_file()
}

/// What [`write_image`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageWrite {
    Created,
    /// A file was already present and was left untouched.
    Reused,
}

/// Write `bytes` to `root/relative` atomically.
///
/// The data goes to a temp file beside the target and is renamed into
/// place, so a crash never leaves a truncated image. Existing files are
/// never overwritten.
pub fn write_image(root: &Path, relative: &str, bytes: &[u8]) -> io::Result<(PathBuf, ImageWrite)> {
    let target = root.join(relative);
    if target.is_file() {
        return Ok((target, ImageWrite::Reused));
    }
    let parent = target
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "image path has no parent"))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    match tmp.persist_noclobber(&target) {
        Ok(_) => Ok((target, ImageWrite::Created)),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok((target, ImageWrite::Reused)),
        Err(e) => Err(e.error),
    }
}
