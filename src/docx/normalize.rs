//! Run merging for paragraphs that carry template delimiters.
//!
//! Word stores a paragraph as a sequence of `<w:r>` runs, and editing a template
//! routinely leaves one `{{field}}` token spread over several runs (or broken up
//! by proofing and bookmark markers). [`normalize`] collapses each such paragraph
//! into a single run so the token becomes contiguous text again. Paragraphs
//! without delimiters keep their original runs byte-for-byte.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub const OPEN_DELIMITER: &str = "{{";
pub const CLOSE_DELIMITER: &str = "}}";

// Metadata-only elements Word inserts mid-run; none of them render text.
static INTERRUPTING_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<w:(?:proofErr|bookmarkStart|bookmarkEnd|noBreakHyphen|softHyphen)\b[^>]*/>")
        .expect("marker regex")
});

// `<w:p/>` never opens a span, otherwise the lazy body would swallow the next paragraph.
static PARAGRAPH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<w:p((?:\s[^>]*[^/>])?\s*)>(.*?)</w:p>").expect("paragraph regex")
});

static RUN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<w:r(?:(?:\s[^>]*[^/>])?\s*)>(.*?)</w:r>").expect("run regex")
});

static RUN_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<w:r(?:(?:\s[^>]*[^/>])?\s*)>").expect("run open regex"));

// Any start, end or empty-element tag; `<?` and `<!` never match.
static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(/?)([A-Za-z_][\w.:-]*)[^>]*?(/?)>").expect("tag regex")
});

static TEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<w:t(?:(?:\s[^>]*[^/>])?\s*)>(.*?)</w:t>").expect("text regex")
});

const RUN_CLOSE: &str = "</w:r>";

pub fn contains_delimiter(text: &str) -> bool {
    text.contains(OPEN_DELIMITER) || text.contains(CLOSE_DELIMITER)
}

/// Collapses the runs of every delimiter-bearing paragraph into one run.
///
/// Never fails: content that does not look like a paragraph passes through
/// unchanged. Applying it twice gives the same result as applying it once.
///
/// Only `<w:t>` text survives a merge. Tabs, line breaks and inline drawings
/// inside the runs of a templated paragraph are lost, as is run formatting.
/// A paragraph whose first or last run sits inside a wrapper element
/// (hyperlink, tracked change, content control) that does not enclose all
/// of its runs is left as it is.
pub fn normalize(xml: &str) -> String {
    let stripped = INTERRUPTING_MARKER_RE.replace_all(xml, "");
    PARAGRAPH_RE
        .replace_all(&stripped, |caps: &Captures<'_>| merge_paragraph(caps))
        .into_owned()
}

fn merge_paragraph(caps: &Captures<'_>) -> String {
    let whole = &caps[0];
    let attrs = &caps[1];
    let content = &caps[2];

    if !contains_delimiter(content) {
        return whole.to_string();
    }

    let mut text = String::new();
    for run in RUN_RE.captures_iter(content) {
        for t in TEXT_RE.captures_iter(&run[1]) {
            text.push_str(&t[1]);
        }
    }

    // Delimiters living outside any run are a known limitation: leave them be.
    let (Some(first_open), Some(last_close)) =
        (RUN_OPEN_RE.find(content), content.rfind(RUN_CLOSE))
    else {
        return whole.to_string();
    };
    if last_close < first_open.start() {
        return whole.to_string();
    }
    let preamble = &content[..first_open.start()];
    let trailer = &content[last_close + RUN_CLOSE.len()..];
    if !tags_balanced(preamble, trailer) {
        return whole.to_string();
    }

    format!(
        r#"<w:p{attrs}>{preamble}<w:r><w:t xml:space="preserve">{text}</w:t></w:r>{trailer}</w:p>"#
    )
}

/// Whether the tags kept around the merged run still nest properly.
fn tags_balanced(preamble: &str, trailer: &str) -> bool {
    let mut open: Vec<&str> = Vec::new();
    for caps in TAG_RE
        .captures_iter(preamble)
        .chain(TAG_RE.captures_iter(trailer))
    {
        let name = caps.get(2).map_or("", |m| m.as_str());
        if !caps[3].is_empty() {
            continue;
        }
        if caps[1].is_empty() {
            open.push(name);
        } else if open.pop() != Some(name) {
            return false;
        }
    }
    open.is_empty()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::normalize;

    fn para(runs: &[&str]) -> String {
        let body: String = runs
            .iter()
            .map(|t| format!(r#"<w:r><w:rPr><w:b/></w:rPr><w:t>{t}</w:t></w:r>"#))
            .collect();
        format!(r#"<w:p w:rsidR="00A1"><w:pPr><w:jc w:val="left"/></w:pPr>{body}</w:p>"#)
    }

    #[test]
    fn merges_split_placeholders_into_one_run() {
        let xml = para(&["Hello {{na", "me}}, total: ", "{{tot", "al}}"]);
        assert_eq!(
            normalize(&xml),
            r#"<w:p w:rsidR="00A1"><w:pPr><w:jc w:val="left"/></w:pPr><w:r><w:t xml:space="preserve">Hello {{name}}, total: {{total}}</w:t></w:r></w:p>"#
        );
    }

    #[test]
    fn paragraphs_without_delimiters_are_untouched() {
        let plain = para(&["Dear ", "customer,"]);
        let xml = format!("<w:body>{plain}{}</w:body>", para(&["{{a", "}}"]));
        let out = normalize(&xml);
        assert!(out.starts_with(&format!("<w:body>{plain}")));
        assert!(out.contains(r#"<w:t xml:space="preserve">{{a}}</w:t>"#));
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            para(&["Hello {{na", "me}}"]),
            para(&["no tags here"]),
            r#"<w:p><w:hyperlink r:id="rId4"><w:r><w:t>{{ur</w:t></w:r><w:r><w:t>l}}</w:t></w:r></w:hyperlink></w:p>"#.to_string(),
            r#"<w:p><w:pPr/>{{orphan}}</w:p><w:p/>"#.to_string(),
            r#"<w:tbl><w:tr><w:tc><w:p><w:r><w:t xml:space="preserve"> {{x</w:t></w:r><w:r><w:t>}} </w:t></w:r></w:p></w:tc></w:tr></w:tbl>"#.to_string(),
        ];
        for xml in samples {
            let once = normalize(&xml);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn interrupting_markers_are_removed_without_text_loss() {
        let xml = concat!(
            r#"<w:p><w:r><w:t>Dear {{cl</w:t></w:r>"#,
            r#"<w:proofErr w:type="spellStart"/><w:bookmarkStart w:id="0" w:name="x"/>"#,
            r#"<w:r><w:t>ient}}</w:t></w:r><w:bookmarkEnd w:id="0"/>"#,
            r#"<w:proofErr w:type="spellEnd"/></w:p>"#,
        );
        let out = normalize(xml);
        assert!(!out.contains("proofErr"));
        assert!(!out.contains("bookmark"));
        assert_eq!(
            out,
            r#"<w:p><w:r><w:t xml:space="preserve">Dear {{client}}</w:t></w:r></w:p>"#
        );
    }

    #[test]
    fn markers_are_stripped_even_outside_templated_paragraphs() {
        let xml = r#"<w:p><w:r><w:t>co</w:t><w:softHyphen/><w:t>op</w:t></w:r></w:p>"#;
        assert_eq!(
            normalize(xml),
            r#"<w:p><w:r><w:t>co</w:t><w:t>op</w:t></w:r></w:p>"#
        );
    }

    #[test]
    fn placeholders_across_paragraphs_stay_split() {
        let xml = concat!(
            r#"<w:p><w:r><w:t>Hello {{na</w:t></w:r></w:p>"#,
            r#"<w:p><w:r><w:t>me}} and more</w:t></w:r></w:p>"#,
        );
        let out = normalize(xml);
        assert!(!out.contains("{{name}}"));
        assert!(out.contains(">Hello {{na</w:t>"));
        assert!(out.contains(">me}} and more</w:t>"));
    }

    #[test]
    fn self_closing_paragraph_does_not_swallow_its_neighbour() {
        let xml = r#"<w:p/><w:p><w:r><w:t>{{a</w:t></w:r><w:r><w:t>b}}</w:t></w:r></w:p>"#;
        assert_eq!(
            normalize(xml),
            r#"<w:p/><w:p><w:r><w:t xml:space="preserve">{{ab}}</w:t></w:r></w:p>"#
        );
    }

    #[test]
    fn tabs_and_run_properties_are_not_text() {
        let xml = r#"<w:p><w:r><w:rPr><w:rFonts w:ascii="Arial"/></w:rPr><w:tab/><w:t>{{a}}</w:t></w:r></w:p>"#;
        assert_eq!(
            normalize(xml),
            r#"<w:p><w:r><w:t xml:space="preserve">{{a}}</w:t></w:r></w:p>"#
        );
    }

    #[test]
    fn zero_run_paragraph_is_left_alone() {
        let xml = r#"<w:p><w:pPr><w:pStyle w:val="{{style}}"/></w:pPr></w:p>"#;
        assert_eq!(normalize(xml), xml);
    }

    #[test]
    fn whitespace_is_kept_exactly() {
        let xml = r#"<w:p><w:r><w:t xml:space="preserve">  {{a}} </w:t></w:r><w:r><w:t xml:space="preserve">  x  </w:t></w:r></w:p>"#;
        assert_eq!(
            normalize(xml),
            r#"<w:p><w:r><w:t xml:space="preserve">  {{a}}   x  </w:t></w:r></w:p>"#
        );
    }

    #[test]
    fn wrapper_around_first_run_only_keeps_paragraph() {
        let xml = concat!(
            r#"<w:p><w:hyperlink r:id="rId4"><w:r><w:t>Hello {{na</w:t></w:r></w:hyperlink>"#,
            r#"<w:r><w:t>me}}</w:t></w:r></w:p>"#,
        );
        assert_eq!(normalize(xml), xml);
    }

    #[test]
    fn wrapper_around_last_run_only_keeps_paragraph() {
        let xml = concat!(
            r#"<w:p><w:r><w:t>Hello {{na</w:t></w:r>"#,
            r#"<w:ins w:id="3" w:author="x"><w:r><w:t>me}}</w:t></w:r></w:ins></w:p>"#,
        );
        assert_eq!(normalize(xml), xml);
    }

    #[test]
    fn wrapper_around_all_runs_is_kept_whole() {
        let xml = concat!(
            r#"<w:p><w:pPr><w:jc w:val="left"/></w:pPr><w:ins w:id="3">"#,
            r#"<w:r><w:t>{{na</w:t></w:r><w:r><w:t>me}}</w:t></w:r></w:ins></w:p>"#,
        );
        assert_eq!(
            normalize(xml),
            concat!(
                r#"<w:p><w:pPr><w:jc w:val="left"/></w:pPr><w:ins w:id="3">"#,
                r#"<w:r><w:t xml:space="preserve">{{name}}</w:t></w:r></w:ins></w:p>"#,
            )
        );
    }

    #[test]
    fn trailer_after_last_run_is_preserved() {
        let xml = r#"<w:p><w:r><w:t>{{a</w:t></w:r><w:r><w:t>}}</w:t></w:r><w:commentRangeEnd w:id="1"/></w:p>"#;
        assert_eq!(
            normalize(xml),
            r#"<w:p><w:r><w:t xml:space="preserve">{{a}}</w:t></w:r><w:commentRangeEnd w:id="1"/></w:p>"#
        );
    }
}
