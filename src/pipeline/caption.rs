//! Caption-parser boundary: markup bytes → ordered figure captions.
//!
//! The pipeline never looks inside article markup itself. It hands the bytes
//! of the package's markup member to a [`CaptionParser`] and consumes the
//! records in the order returned. [`crate::pipeline::jats::JatsCaptionParser`]
//! is the stock implementation for PMC's NXML; tests inject canned parsers.

use crate::error::{EntryError, ParseError};
use crate::pipeline::normalize::is_safe_component;
use tracing::warn;

/// One figure caption found in an article's markup.
///
/// Transient: produced per archive, consumed immediately, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptionRecord {
    /// PubMed id declared by the markup, if any.
    pub pmid: Option<String>,
    /// PMC accession declared by the markup (`PMC`-prefixed), if any.
    pub pmc: Option<String>,
    pub fig_id: String,
    pub fig_label: Option<String>,
    pub fig_caption: String,
    /// The figure's pointer to its image, often without an extension.
    pub graphic_ref: String,
}

/// Converts markup bytes into caption records.
///
/// An empty `Ok(vec![])` means "no figures": the orchestrator skips the entry
/// without treating the markup as broken.
pub trait CaptionParser: Send + Sync {
    fn parse(&self, markup: &[u8]) -> Result<Vec<CaptionRecord>, ParseError>;
}

impl<F> CaptionParser for F
where
    F: Fn(&[u8]) -> Result<Vec<CaptionRecord>, ParseError> + Send + Sync,
{
    fn parse(&self, markup: &[u8]) -> Result<Vec<CaptionRecord>, ParseError> {
        self(markup)
    }
}

/// Article identity for an entry's records.
///
/// Taken from the first record when it carries the ids, else from the
/// manifest entry. The pmcid becomes a directory name, so a declared pmcid
/// that is not a plain path component is ignored in favour of the manifest's;
/// when neither is usable the entry fails with
/// [`EntryError::UnsafeIdentifier`].
pub fn resolve_ids<'a>(
    records: &'a [CaptionRecord],
    manifest_pmid: &'a str,
    manifest_pmcid: &'a str,
) -> Result<(&'a str, &'a str), EntryError> {
    let first = records.first();
    let pmid = first
        .and_then(|r| r.pmid.as_deref())
        .filter(|s| !s.is_empty())
        .unwrap_or(manifest_pmid);

    let declared = first
        .and_then(|r| r.pmc.as_deref())
        .filter(|s| !s.is_empty());
    if let Some(pmc) = declared.filter(|s| !is_safe_component(s)) {
        warn!("Ignoring unusable pmcid {:?} declared in markup", pmc);
    }
    let pmc = declared
        .filter(|s| is_safe_component(s))
        .unwrap_or(manifest_pmcid);
    if !is_safe_component(pmc) {
        return Err(EntryError::UnsafeIdentifier {
            pmcid: pmc.to_string(),
        });
    }
    Ok((pmid, pmc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_parsers() {
        let parser = |_: &[u8]| -> Result<Vec<CaptionRecord>, ParseError> {
            Ok(vec![CaptionRecord {
                fig_id: "1".into(),
                ..Default::default()
            }])
        };
        let records = parser.parse(b"<article/>").unwrap();
        assert_eq!(records[0].fig_id, "1");
    }

    #[test]
    fn ids_come_from_first_record() {
        let records = vec![CaptionRecord {
            pmid: Some("42".into()),
            pmc: Some("PMC42".into()),
            ..Default::default()
        }];
        assert_eq!(resolve_ids(&records, "1001", "PMC1").unwrap(), ("42", "PMC42"));
    }

    #[test]
    fn ids_fall_back_to_manifest() {
        let records = vec![CaptionRecord {
            pmid: Some(String::new()),
            pmc: None,
            ..Default::default()
        }];
        assert_eq!(resolve_ids(&records, "1001", "PMC1").unwrap(), ("1001", "PMC1"));
        assert_eq!(resolve_ids(&[], "1001", "PMC1").unwrap(), ("1001", "PMC1"));
    }

    #[test]
    fn traversal_in_declared_pmcid_falls_back_to_manifest() {
        let records = vec![CaptionRecord {
            pmc: Some("PMC/../../../escaped".into()),
            ..Default::default()
        }];
        assert_eq!(resolve_ids(&records, "1001", "PMC1").unwrap(), ("1001", "PMC1"));
    }

    #[test]
    fn no_usable_pmcid_fails_the_entry() {
        let records = vec![CaptionRecord {
            pmc: Some("..".into()),
            ..Default::default()
        }];
        let err = resolve_ids(&records, "1001", "../x").unwrap_err();
        assert!(matches!(err, EntryError::UnsafeIdentifier { .. }));
    }
}
