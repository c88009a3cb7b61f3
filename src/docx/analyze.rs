use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::Serialize;

use crate::docx::normalize::{CLOSE_DELIMITER, OPEN_DELIMITER};
use crate::docx::package::DocxPackage;
use crate::docx::repair::TEMPLATE_PARTS;

const CONTEXT_CHARS: usize = 50;

static VAR_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{\{[^}]*\}\}").expect("var tag regex"));
static MARKUP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("markup regex"));
static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}<>\s]+)\s*\}\}").expect("placeholder name regex"));

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DelimiterKind {
    Open,
    Close,
}

#[derive(Clone, Debug, Serialize)]
pub struct DelimiterHit {
    pub offset: usize,
    pub kind: DelimiterKind,
    pub context: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct TagReport {
    pub open_count: usize,
    pub close_count: usize,
    pub hits: Vec<DelimiterHit>,
    /// `<w:t>` contents that contain a delimiter.
    pub text_nodes: Vec<String>,
    /// `{{...}}` spans with XML markup inside, i.e. split across runs.
    pub broken_tags: Vec<String>,
}

impl TagReport {
    pub fn balanced(&self) -> bool {
        self.open_count == self.close_count
    }

    pub fn is_clean(&self) -> bool {
        self.balanced() && self.broken_tags.is_empty()
    }
}

pub fn analyze_part(xml: &str) -> TagReport {
    let mut hits: Vec<DelimiterHit> = Vec::new();
    for (delim, kind) in [
        (OPEN_DELIMITER, DelimiterKind::Open),
        (CLOSE_DELIMITER, DelimiterKind::Close),
    ] {
        let mut from = 0usize;
        while let Some(pos) = xml[from..].find(delim) {
            let offset = from + pos;
            hits.push(DelimiterHit {
                offset,
                kind,
                context: context_around(xml, offset),
            });
            from = offset + delim.len();
        }
    }
    hits.sort_by_key(|h| h.offset);

    let open_count = hits.iter().filter(|h| h.kind == DelimiterKind::Open).count();
    let close_count = hits.len() - open_count;

    let broken_tags = VAR_TAG_RE
        .find_iter(xml)
        .map(|m| m.as_str())
        .filter(|tag| MARKUP_RE.is_match(tag))
        .map(|tag| tag.to_string())
        .collect();

    TagReport {
        open_count,
        close_count,
        hits,
        text_nodes: delimiter_text_nodes(xml),
        broken_tags,
    }
}

/// Field names of well-formed placeholders in the part's text.
pub fn placeholder_names(xml: &str) -> BTreeSet<String> {
    NAME_RE
        .captures_iter(xml)
        .map(|caps| caps[1].to_string())
        .collect()
}

pub fn analyze_package(pkg: &DocxPackage) -> Vec<(String, TagReport)> {
    let mut out = Vec::new();
    for name in TEMPLATE_PARTS {
        match pkg.part_text(name) {
            Ok(Some(xml)) => out.push((name.to_string(), analyze_part(&xml))),
            Ok(None) => {}
            Err(err) => log::warn!("cannot analyze {name}: {err}"),
        }
    }
    out
}

fn context_around(xml: &str, offset: usize) -> String {
    let mut start = offset.saturating_sub(CONTEXT_CHARS);
    while !xml.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (offset + CONTEXT_CHARS).min(xml.len());
    while !xml.is_char_boundary(end) {
        end += 1;
    }
    xml[start..end].to_string()
}

fn delimiter_text_nodes(xml: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut out = Vec::new();
    let mut in_t = false;
    let mut current = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"w:t" => {
                in_t = true;
                current.clear();
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"w:t" => {
                in_t = false;
                if current.contains(OPEN_DELIMITER) || current.contains(CLOSE_DELIMITER) {
                    out.push(std::mem::take(&mut current));
                }
            }
            Ok(Event::Text(t)) if in_t => match t.unescape() {
                Ok(s) => current.push_str(&s),
                Err(_) => current.push_str(&String::from_utf8_lossy(&t)),
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                log::debug!("stopped scanning text nodes at {}: {err}", reader.buffer_position());
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{analyze_part, placeholder_names, DelimiterKind};
    use crate::docx::normalize::normalize;

    const SPLIT: &str = concat!(
        r#"<w:p><w:r><w:t>Hi {{na</w:t></w:r><w:r><w:t>me}}</w:t></w:r>"#,
        r#"<w:r><w:t xml:space="preserve"> {{ total }} &amp; {{vat</w:t></w:r></w:p>"#
    );

    #[test]
    fn counts_delimiters_and_finds_broken_tags() {
        let report = analyze_part(SPLIT);
        assert_eq!(report.open_count, 3);
        assert_eq!(report.close_count, 2);
        assert!(!report.balanced());
        assert_eq!(report.hits[0].kind, DelimiterKind::Open);
        assert!(report.hits[0].context.contains("Hi {{na"));
        assert_eq!(report.broken_tags.len(), 1);
        assert!(report.broken_tags[0].starts_with("{{na</w:t>"));
        assert_eq!(
            report.text_nodes,
            ["Hi {{na", "me}}", " {{ total }} & {{vat"]
        );
    }

    #[test]
    fn normalized_part_has_no_broken_tags() {
        let report = analyze_part(&normalize(SPLIT));
        assert!(report.broken_tags.is_empty());
    }

    #[test]
    fn collects_placeholder_names() {
        let names = placeholder_names(&normalize(SPLIT));
        assert_eq!(names.into_iter().collect::<Vec<_>>(), ["name", "total"]);
    }

    #[test]
    fn context_respects_char_boundaries() {
        let xml = format!("{}{{{{x}}}}", "ż".repeat(40));
        let report = analyze_part(&xml);
        assert!(report.is_clean());
        assert!(report.hits[0].context.ends_with("{{x}}"));
    }
}
