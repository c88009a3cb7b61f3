use std::borrow::Cow;
use std::collections::BTreeMap;

use quick_xml::escape::partial_escape;
use regex::Regex;
use serde_json::Value;

/// Field name to scalar value, as supplied by the caller.
pub type FieldMap = BTreeMap<String, Value>;

/// Text form of a scalar field value.
///
/// `None` for null and for arrays/objects, which this substitution does not support.
pub fn scalar_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::Null | Value::Array(_) | Value::Object(_) => None,
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Borrowed(if *b { "true" } else { "false" })),
    }
}

/// Replaces every recognised spelling of each field's placeholder.
///
/// Exact and padded spellings of all fields go first, then the truncated ones, so a
/// truncated pattern never eats into a well-formed token of a longer field name.
/// Every match is taken from the input as given: an inserted value is never
/// scanned again. Fields without a usable value leave their placeholders untouched.
pub fn substitute(xml: &str, data: &FieldMap) -> String {
    let mut fields: Vec<(&str, String)> = data
        .iter()
        .filter_map(|(key, value)| {
            let text = scalar_text(value)?;
            Some((key.as_str(), partial_escape(&*text).into_owned()))
        })
        .filter(|(key, _)| !key.is_empty())
        .collect();
    fields.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));

    let mut claims = Claims::default();
    for (key, value) in &fields {
        claims.take(xml, &strict_pattern(key), Guard::Free, value);
    }
    for (key, value) in &fields {
        for (re, guard) in truncated_patterns(key) {
            claims.take(xml, &re, guard, value);
        }
    }
    claims.apply(xml)
}

// `{{key}}`, `{{ key }}` and any other internal padding.
fn strict_pattern(key: &str) -> Regex {
    let key = regex::escape(key);
    Regex::new(&format!(r"\{{\{{\s*{key}\s*\}}\}}")).expect("strict placeholder regex")
}

/// Character required around a truncated match, checked against the input.
#[derive(Clone, Copy)]
enum Guard {
    Free,
    /// Nothing identifier-like or `{` right before the match.
    Before,
    /// Nothing identifier-like or `}` right after the match.
    After,
}

impl Guard {
    fn admits(self, text: &str, start: usize, end: usize) -> bool {
        match self {
            Self::Free => true,
            Self::Before => text[..start]
                .chars()
                .next_back()
                .map_or(true, |c| !is_ident(c) && c != '{'),
            Self::After => text[end..]
                .chars()
                .next()
                .map_or(true, |c| !is_ident(c) && c != '}'),
        }
    }
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn truncated_patterns(key: &str) -> [(Regex, Guard); 3] {
    let k = regex::escape(key);
    [
        (
            Regex::new(&format!(r"\{{{k}\}}")).expect("truncated-open regex"),
            Guard::Free,
        ),
        (
            Regex::new(&format!(r"{k}\}}\}}")).expect("truncated-close regex"),
            Guard::Before,
        ),
        (
            Regex::new(&format!(r"\{{\{{{k}")).expect("trailing-close regex"),
            Guard::After,
        ),
    ]
}

/// Non-overlapping replacement spans, keyed by start offset.
#[derive(Default)]
struct Claims<'v> {
    spans: BTreeMap<usize, (usize, &'v str)>,
}

impl<'v> Claims<'v> {
    fn take(&mut self, text: &str, re: &Regex, guard: Guard, value: &'v str) {
        for m in re.find_iter(text) {
            if guard.admits(text, m.start(), m.end()) && !self.overlaps(m.start(), m.end()) {
                self.spans.insert(m.start(), (m.end(), value));
            }
        }
    }

    fn overlaps(&self, start: usize, end: usize) -> bool {
        self.spans
            .range(..end)
            .next_back()
            .is_some_and(|(_, (claimed_end, _))| *claimed_end > start)
    }

    fn apply(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut at = 0usize;
        for (start, (end, value)) in &self.spans {
            out.push_str(&text[at..*start]);
            out.push_str(value);
            at = *end;
        }
        out.push_str(&text[at..]);
        out
    }
}
