//! Stock caption parser for JATS / NXML article markup.
//!
//! Emits one [`CaptionRecord`] per `<fig>` element, in document order:
//!
//! | Field | Source |
//! |-------|--------|
//! | `fig_id` | `id` attribute of `<fig>` |
//! | `fig_label` | text of the figure's `<label>` |
//! | `fig_caption` | all text inside `<caption>`, whitespace collapsed |
//! | `graphic_ref` | `xlink:href` of the first `<graphic>` in the figure |
//! | `pmid` / `pmc` | `<article-id pub-id-type="pmid">` / `"pmc"` (first occurrence) |
//!
//! Figures with an empty caption or no graphic are still emitted; the
//! orchestrator decides what to do with them.

use crate::error::ParseError;
use crate::pipeline::caption::{CaptionParser, CaptionRecord};
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Parser for PMC `.nxml` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct JatsCaptionParser;

impl JatsCaptionParser {
    pub fn new() -> Self {
        Self
    }
}

impl CaptionParser for JatsCaptionParser {
    fn parse(&self, markup: &[u8]) -> Result<Vec<CaptionRecord>, ParseError> {
        parse_figures(markup)
    }
}

#[derive(Default)]
struct FigDraft {
    id: String,
    label: String,
    caption: String,
    graphic_ref: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum IdKind {
    Pmid,
    Pmc,
}

fn parse_figures(markup: &[u8]) -> Result<Vec<CaptionRecord>, ParseError> {
    let mut reader = Reader::from_reader(markup);
    let mut buf = Vec::new();

    let mut records = Vec::new();
    let mut pmid: Option<String> = None;
    let mut pmc: Option<String> = None;

    let mut depth = 0usize;
    let mut saw_root = false;
    let mut pending_id: Option<IdKind> = None;
    let mut fig: Option<FigDraft> = None;
    let mut in_label = false;
    let mut caption_depth = 0usize;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            ParseError::new(format!("at byte {}: {e}", reader.buffer_position()))
        })?;

        match event {
            Event::Start(e) => {
                depth += 1;
                saw_root = true;
                match e.local_name().as_ref() {
                    b"article-id" => pending_id = id_kind(&e),
                    b"fig" => {
                        fig = Some(FigDraft {
                            id: attr(&e, b"id").unwrap_or_default(),
                            ..Default::default()
                        })
                    }
                    b"label" if fig.is_some() && caption_depth == 0 => in_label = true,
                    b"caption" if fig.is_some() => caption_depth += 1,
                    b"title" | b"p" if caption_depth > 0 => push_break(&mut fig),
                    b"graphic" => take_graphic(&mut fig, &e),
                    _ => {}
                }
            }
            Event::Empty(e) => {
                saw_root = true;
                if e.local_name().as_ref() == b"graphic" {
                    take_graphic(&mut fig, &e);
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                match e.local_name().as_ref() {
                    b"article-id" => pending_id = None,
                    b"label" => in_label = false,
                    b"caption" if caption_depth > 0 => caption_depth -= 1,
                    b"title" | b"p" if caption_depth > 0 => push_break(&mut fig),
                    b"fig" => {
                        if let Some(draft) = fig.take() {
                            records.push(finish(draft, &pmid, &pmc));
                        }
                        in_label = false;
                        caption_depth = 0;
                    }
                    _ => {}
                }
            }
            Event::Text(e) => {
                let text = match e.unescape() {
                    Ok(t) => t.into_owned(),
                    Err(_) => String::from_utf8_lossy(&e).into_owned(),
                };
                collect_text(
                    &text,
                    pending_id,
                    &mut pmid,
                    &mut pmc,
                    &mut fig,
                    in_label,
                    caption_depth,
                );
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e).into_owned();
                collect_text(
                    &text,
                    pending_id,
                    &mut pmid,
                    &mut pmc,
                    &mut fig,
                    in_label,
                    caption_depth,
                );
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(ParseError::new("no document element"));
    }
    if depth != 0 {
        return Err(ParseError::new(format!(
            "unexpected end of document with {depth} unclosed element(s)"
        )));
    }

    Ok(records)
}

fn collect_text(
    text: &str,
    pending_id: Option<IdKind>,
    pmid: &mut Option<String>,
    pmc: &mut Option<String>,
    fig: &mut Option<FigDraft>,
    in_label: bool,
    caption_depth: usize,
) {
    match pending_id {
        Some(IdKind::Pmid) if pmid.is_none() => *pmid = Some(text.trim().to_string()),
        Some(IdKind::Pmc) if pmc.is_none() => *pmc = Some(normalize_pmc(text)),
        _ => {}
    }
    if let Some(draft) = fig.as_mut() {
        if in_label {
            draft.label.push_str(text);
        } else if caption_depth > 0 {
            draft.caption.push_str(text);
        }
    }
}

fn finish(draft: FigDraft, pmid: &Option<String>, pmc: &Option<String>) -> CaptionRecord {
    let label = collapse_whitespace(&draft.label);
    CaptionRecord {
        pmid: pmid.clone().filter(|s| !s.is_empty()),
        pmc: pmc.clone().filter(|s| !s.is_empty()),
        fig_id: draft.id,
        fig_label: (!label.is_empty()).then_some(label),
        fig_caption: collapse_whitespace(&draft.caption),
        graphic_ref: draft.graphic_ref.unwrap_or_default(),
    }
}

fn take_graphic(fig: &mut Option<FigDraft>, e: &BytesStart<'_>) {
    if let Some(draft) = fig.as_mut() {
        if draft.graphic_ref.is_none() {
            draft.graphic_ref = attr(e, b"href");
        }
    }
}

/// Block boundaries inside a caption become spaces so `<title>A.</title><p>B</p>`
/// reads "A. B" rather than "A.B".
fn push_break(fig: &mut Option<FigDraft>) {
    if let Some(draft) = fig.as_mut() {
        draft.caption.push(' ');
    }
}

fn id_kind(e: &BytesStart<'_>) -> Option<IdKind> {
    match attr(e, b"pub-id-type")?.as_str() {
        "pmid" => Some(IdKind::Pmid),
        "pmc" | "pmcid" => Some(IdKind::Pmc),
        _ => None,
    }
}

/// Value of the attribute whose local name is `name`, namespace prefix ignored.
fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.trim().to_string()))
}

fn collapse_whitespace(s: &str) -> String {
    RE_WHITESPACE.replace_all(s, " ").trim().to_string()
}

/// `"15015"` and `"pmc15015"` both become `"PMC15015"`.
pub fn normalize_pmc(raw: &str) -> String {
    let raw = raw.trim();
    if raw.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("pmc")) {
        format!("PMC{}", &raw[3..])
    } else if raw.is_empty() {
        String::new()
    } else {
        format!("PMC{raw}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE article PUBLIC "-//NLM//DTD JATS (Z39.96) Journal Archiving and Interchange DTD v1.2 20190208//EN" "JATS-archivearticle1.dtd">
<article xmlns:xlink="http://www.w3.org/1999/xlink">
  <front>
    <article-meta>
      <article-id pub-id-type="pmid">1001</article-id>
      <article-id pub-id-type="pmc">1</article-id>
      <article-id pub-id-type="doi">10.1000/x</article-id>
    </article-meta>
  </front>
  <body>
    <fig id="F1">
      <label>Figure 1</label>
      <caption><title>Cells.</title><p>A <italic>cell</italic>
        under light &amp; dark.</p></caption>
      <graphic xlink:href="pone.0000001.g001"/>
    </fig>
    <fig id="F2">
      <label>Figure 2</label>
      <caption><p>No picture here.</p></caption>
    </fig>
  </body>
</article>"#;

    #[test]
    fn extracts_figures_in_order() {
        let records = JatsCaptionParser.parse(ARTICLE.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.fig_id, "F1");
        assert_eq!(first.fig_label.as_deref(), Some("Figure 1"));
        assert_eq!(first.fig_caption, "Cells. A cell under light & dark.");
        assert_eq!(first.graphic_ref, "pone.0000001.g001");
        assert_eq!(first.pmid.as_deref(), Some("1001"));
        assert_eq!(first.pmc.as_deref(), Some("PMC1"));

        assert_eq!(records[1].fig_id, "F2");
        assert_eq!(records[1].graphic_ref, "");
    }

    #[test]
    fn graphic_as_start_tag_is_read() {
        let xml = br#"<article><fig id="1"><caption><p>A cell.</p></caption><graphic href="f1"></graphic></fig></article>"#;
        let records = JatsCaptionParser.parse(xml).unwrap();
        assert_eq!(records[0].graphic_ref, "f1");
        assert_eq!(records[0].fig_caption, "A cell.");
        assert!(records[0].pmid.is_none());
    }

    #[test]
    fn no_figures_is_empty_not_error() {
        let records = JatsCaptionParser
            .parse(b"<article><body><p>text</p></body></article>")
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn mismatched_tags_are_malformed() {
        let err = JatsCaptionParser
            .parse(b"<article><fig id=\"1\"></article>")
            .unwrap_err();
        assert!(err.to_string().contains("Malformed"));
    }

    #[test]
    fn truncated_document_is_malformed() {
        assert!(JatsCaptionParser.parse(b"<article><body>").is_err());
        assert!(JatsCaptionParser.parse(b"").is_err());
    }

    #[test]
    fn pmc_prefix_is_normalized() {
        assert_eq!(normalize_pmc("15015"), "PMC15015");
        assert_eq!(normalize_pmc(" pmc15015 "), "PMC15015");
        assert_eq!(normalize_pmc("PMC7"), "PMC7");
        assert_eq!(normalize_pmc(""), "");
    }
}
