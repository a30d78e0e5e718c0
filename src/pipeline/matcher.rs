//! Image matching: resolve a figure's graphic reference to an archive member.
//!
//! Graphic references in NXML rarely name the file exactly. `pone.0012345.g001`
//! usually means `pone.0012345.g001.jpg` somewhere under the package root, and
//! older packages mix upper- and lower-case names. Resolution tries, in order:
//!
//! 1. the reference's basename as-is;
//! 2. its stem with each image extension appended, first with a trailing
//!    image extension removed, then with whatever follows the last dot
//!    removed (so `f1.gif` finds `f1.jpg`);
//! 3. any indexed basename containing the first stem.
//!
//! All comparisons are on lowercase basenames.

use oa_package::{basename, ArchiveMember};
use std::collections::HashMap;
use tracing::trace;

/// Which rule resolved a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStep {
    Exact,
    Extension,
    Substring,
}

/// A resolved reference.
#[derive(Debug, Clone, Copy)]
pub struct ImageMatch<'a> {
    pub member: &'a ArchiveMember,
    pub step: MatchStep,
}

/// Lookup table over one archive's image members.
///
/// Built once per archive and queried once per caption record.
#[derive(Debug)]
pub struct ImageIndex<'a> {
    /// Keys in first-seen order; drives the substring fallback.
    order: Vec<String>,
    by_name: HashMap<String, &'a ArchiveMember>,
    extensions: Vec<String>,
}

impl<'a> ImageIndex<'a> {
    /// Index `members` by lowercase basename.
    ///
    /// Callers pass the archive's image-class members. When two members share
    /// a basename the later one is kept, at the earlier one's position.
    pub fn build<I>(members: I, image_extensions: &[impl AsRef<str>]) -> Self
    where
        I: IntoIterator<Item = &'a ArchiveMember>,
    {
        let mut order = Vec::new();
        let mut by_name = HashMap::new();
        for member in members {
            let key = member.basename().to_lowercase();
            if by_name.insert(key.clone(), member).is_none() {
                order.push(key);
            }
        }
        Self {
            order,
            by_name,
            extensions: image_extensions
                .iter()
                .map(|e| e.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Resolve a graphic reference, or `None` when nothing plausible exists.
    pub fn resolve(&self, graphic_ref: &str) -> Option<ImageMatch<'a>> {
        let name = basename(graphic_ref.trim()).to_lowercase();
        if name.is_empty() {
            return None;
        }

        if let Some(&member) = self.by_name.get(&name) {
            return Some(self.found(graphic_ref, member, MatchStep::Exact));
        }

        let stem = self.stem(&name);
        if stem.is_empty() {
            return None;
        }

        let bare = name
            .rsplit_once('.')
            .map(|(head, _)| head)
            .filter(|head| !head.is_empty() && *head != stem);
        for candidate in std::iter::once(stem).chain(bare) {
            for ext in &self.extensions {
                if let Some(&member) = self.by_name.get(&format!("{candidate}{ext}")) {
                    return Some(self.found(graphic_ref, member, MatchStep::Extension));
                }
            }
        }

        self.order
            .iter()
            .find(|key| key.contains(stem))
            .and_then(|key| self.by_name.get(key).copied())
            .map(|member| self.found(graphic_ref, member, MatchStep::Substring))
    }

    /// `name` without a trailing image extension. Other dots stay, so
    /// `pone.0012345.g001` is its own primary stem.
    fn stem<'n>(&self, name: &'n str) -> &'n str {
        self.extensions
            .iter()
            .find_map(|ext| name.strip_suffix(ext.as_str()))
            .unwrap_or(name)
    }

    fn found(&self, graphic_ref: &str, member: &'a ArchiveMember, step: MatchStep) -> ImageMatch<'a> {
        trace!("'{}' → '{}' ({:?})", graphic_ref, member.name, step);
        ImageMatch { member, step }
    }
}
