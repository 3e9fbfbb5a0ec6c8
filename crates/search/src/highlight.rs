//! HTML-escaped highlight fragments with `<mark>` around query terms.

use regex::RegexBuilder;
use toolctx_core::{Highlights, ToolRecord};

pub const DESCRIPTION_PREVIEW_CHARS: usize = 200;

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Terms worth marking: operators stripped, at least two chars, longest first.
fn highlight_words(query: &str) -> Vec<String> {
    let mut words: Vec<String> = query
        .split_whitespace()
        .map(|w| {
            let w = w.split('~').next().unwrap_or("");
            w.trim_matches(|c: char| c == '*' || c == '"' || c == '\'').to_string()
        })
        .filter(|w| w.chars().count() > 1)
        .collect();
    words.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    words.dedup();
    words
}

/// Wrap every case-insensitive occurrence of a term in `<mark>`. Matches are
/// found in the raw text; each segment is escaped separately.
pub fn highlight_terms(text: &str, terms: &[String]) -> String {
    if terms.is_empty() {
        return escape_html(text);
    }
    let pattern = terms.iter().map(|t| regex::escape(t)).collect::<Vec<_>>().join("|");
    let Ok(re) = RegexBuilder::new(&pattern).case_insensitive(true).build() else {
        return escape_html(text);
    };
    let mut out = String::with_capacity(text.len() + 16);
    let mut last = 0;
    for m in re.find_iter(text) {
        out.push_str(&escape_html(&text[last..m.start()]));
        out.push_str("<mark>");
        out.push_str(&escape_html(m.as_str()));
        out.push_str("</mark>");
        last = m.end();
    }
    out.push_str(&escape_html(&text[last..]));
    out
}

/// Name, description preview and category fragments for one result.
pub fn highlights(record: &ToolRecord, query: &str) -> Highlights {
    let words = highlight_words(query);
    let mut out = Highlights::new();
    out.insert("name".into(), highlight_terms(&record.name, &words));
    let preview: String = record.description.chars().take(DESCRIPTION_PREVIEW_CHARS).collect();
    let mut desc = highlight_terms(&preview, &words);
    if record.description.chars().count() > DESCRIPTION_PREVIEW_CHARS {
        desc.push_str("...");
    }
    out.insert("description".into(), desc);
    out.insert("category".into(), highlight_terms(&record.category, &words));
    out
}
