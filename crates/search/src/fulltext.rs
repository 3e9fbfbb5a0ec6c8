//! Full-text tier: inverted index over tokenized fields.

use rustc_hash::FxHashMap;
use toolctx_core::{DocId, StrategyKind, ToolCtxError, ToolCtxResult, ToolRecord};
use tracing::debug;

use crate::{levenshtein, rank, Hit, Records, SearchStrategy, StrategyBuilder};

const FIELD_COUNT: usize = 6;
/// name, description, category, tags, examples, alternatives
const BOOSTS: [f32; FIELD_COUNT] = [10.0, 5.0, 3.0, 2.0, 1.0, 1.0];
const K1: f32 = 1.2;
const B: f32 = 0.75;
/// Weight of an implicit prefix expansion relative to an exact term.
const PREFIX_WEIGHT: f32 = 0.7;
const AUTO_PREFIX_MIN_CHARS: usize = 3;
const MAX_EDIT_DISTANCE: u8 = 2;

fn is_separator(c: char) -> bool { c.is_whitespace() || matches!(c, '-' | '_' | '.') }

/// Split on whitespace, `-`, `_`, `.`; trim punctuation; lower-case.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(is_separator)
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Posting {
    doc: DocId,
    field: u8,
    tf: u16,
}

struct TermEntry {
    postings: Vec<Posting>,
    /// Number of distinct docs containing the term.
    df: u32,
}

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    Term { text: String, auto_prefix: bool },
    Prefix(String),
    Fuzzy { text: String, distance: u8 },
}

impl Clause {
    fn relaxed(&self) -> Clause {
        match self {
            Clause::Term { text, .. } => Clause::Fuzzy { text: text.clone(), distance: 1 },
            other => other.clone(),
        }
    }
}

#[derive(Debug)]
struct ParsedQuery {
    clauses: Vec<Clause>,
    /// The user wrote `*` or `~` somewhere.
    has_operators: bool,
}

fn malformed(msg: String) -> ToolCtxError { ToolCtxError::QueryFailure(msg) }

/// Syntax: `term`, `term*` (prefix), `term~N` (edit distance, N <= 2, default 1).
fn parse_query(q: &str) -> ToolCtxResult<ParsedQuery> {
    let cleaned: String = q.chars().filter(|c| !matches!(c, '"' | '\'' | '`')).collect();
    let mut clauses = Vec::new();
    let mut has_operators = false;
    for raw in cleaned.split_whitespace() {
        if let Some((term, dist)) = raw.rsplit_once('~') {
            has_operators = true;
            let distance: u8 = if dist.is_empty() { 1 } else { dist.parse().map_err(|_| malformed(format!("invalid edit distance in '{raw}'")))? };
            if distance > MAX_EDIT_DISTANCE {
                return Err(malformed(format!("edit distance {distance} exceeds {MAX_EDIT_DISTANCE}")));
            }
            let toks = tokenize(term);
            if toks.is_empty() {
                return Err(malformed(format!("fuzzy operator without a term in '{raw}'")));
            }
            clauses.extend(toks.into_iter().map(|text| Clause::Fuzzy { text, distance }));
            continue;
        }
        if raw.contains('*') {
            has_operators = true;
            let stem = raw.trim_end_matches('*');
            if stem.contains('*') {
                return Err(malformed(format!("wildcard only allowed at the end of '{raw}'")));
            }
            let mut toks = tokenize(stem);
            let Some(last) = toks.pop() else {
                return Err(malformed(format!("wildcard without a term in '{raw}'")));
            };
            clauses.extend(toks.into_iter().map(|text| Clause::Term { text, auto_prefix: false }));
            clauses.push(Clause::Prefix(last));
            continue;
        }
        for text in tokenize(raw) {
            let auto_prefix = text.chars().count() >= AUTO_PREFIX_MIN_CHARS;
            clauses.push(Clause::Term { text, auto_prefix });
        }
    }
    Ok(ParsedQuery { clauses, has_operators })
}

fn field_texts(r: &ToolRecord) -> [String; FIELD_COUNT] {
    [
        r.name.clone(),
        r.description.clone(),
        r.category.clone(),
        r.tags.join(" "),
        r.examples.iter().map(|e| format!("{} {}", e.command, e.description)).collect::<Vec<_>>().join(" "),
        r.alternatives.join(" "),
    ]
}

pub struct FullTextIndex {
    terms: FxHashMap<String, TermEntry>,
    /// Sorted for prefix scans.
    vocab: Vec<String>,
    field_len: Vec<[u16; FIELD_COUNT]>,
    avg_len: [f32; FIELD_COUNT],
    doc_count: usize,
}

impl FullTextIndex {
    pub fn build(records: &[ToolRecord]) -> ToolCtxResult<Self> {
        if records.is_empty() {
            return Err(ToolCtxError::IndexBuildFailure("no records to index".into()));
        }
        let mut terms: FxHashMap<String, TermEntry> = FxHashMap::default();
        let mut field_len = Vec::with_capacity(records.len());
        let mut totals = [0f64; FIELD_COUNT];
        for (i, r) in records.iter().enumerate() {
            let doc = i as DocId;
            let mut lens = [0u16; FIELD_COUNT];
            for (f, text) in field_texts(r).iter().enumerate() {
                let toks = tokenize(text);
                lens[f] = toks.len().min(u16::MAX as usize) as u16;
                totals[f] += toks.len() as f64;
                let mut tf: FxHashMap<String, u16> = FxHashMap::default();
                for t in toks {
                    let c = tf.entry(t).or_insert(0);
                    *c = c.saturating_add(1);
                }
                for (term, count) in tf {
                    let e = terms.entry(term).or_insert_with(|| TermEntry { postings: Vec::new(), df: 0 });
                    if e.postings.last().map(|p| p.doc) != Some(doc) {
                        e.df += 1;
                    }
                    e.postings.push(Posting { doc, field: f as u8, tf: count });
                }
            }
            field_len.push(lens);
        }
        let n = records.len() as f64;
        let avg_len = totals.map(|t| ((t / n) as f32).max(1.0));
        let mut vocab: Vec<String> = terms.keys().cloned().collect();
        vocab.sort_unstable();
        Ok(Self { terms, vocab, field_len, avg_len, doc_count: records.len() })
    }

    pub fn doc_count(&self) -> usize { self.doc_count }
    pub fn term_count(&self) -> usize { self.vocab.len() }

    fn idf(&self, df: u32) -> f32 {
        let n = self.doc_count as f32;
        let df = df as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    fn prefixed<'a>(&'a self, p: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let start = self.vocab.partition_point(|t| t.as_str() < p);
        self.vocab[start..].iter().take_while(move |t| t.starts_with(p)).map(String::as_str)
    }

    fn expand<'a>(&'a self, clause: &'a Clause) -> Vec<(&'a str, f32)> {
        match clause {
            Clause::Term { text, auto_prefix } => {
                let mut out = Vec::new();
                if let Some((k, _)) = self.terms.get_key_value(text.as_str()) {
                    out.push((k.as_str(), 1.0));
                }
                if *auto_prefix {
                    out.extend(self.prefixed(text).filter(|t| *t != text.as_str()).map(|t| (t, PREFIX_WEIGHT)));
                }
                out
            }
            Clause::Prefix(p) => self.prefixed(p).map(|t| (t, 1.0)).collect(),
            Clause::Fuzzy { text, distance } => {
                let want = text.chars().count();
                let max = *distance as usize;
                self.vocab
                    .iter()
                    .filter(|t| t.chars().count().abs_diff(want) <= max)
                    .filter_map(|t| {
                        let d = levenshtein(t, text);
                        (d <= max).then(|| (t.as_str(), 1.0 / (1.0 + d as f32)))
                    })
                    .collect()
            }
        }
    }

    fn evaluate(&self, clauses: &[Clause], limit: usize) -> Vec<Hit> {
        let mut acc: FxHashMap<DocId, f32> = FxHashMap::default();
        for c in clauses {
            for (term, weight) in self.expand(c) {
                let Some(entry) = self.terms.get(term) else { continue };
                let idf = self.idf(entry.df);
                for p in &entry.postings {
                    let f = p.field as usize;
                    let len = self.field_len[p.doc as usize][f] as f32;
                    let tf = p.tf as f32;
                    let norm = tf * (K1 + 1.0) / (tf + K1 * (1.0 - B + B * len / self.avg_len[f]));
                    *acc.entry(p.doc).or_insert(0.0) += BOOSTS[f] * idf * norm * weight;
                }
            }
        }
        rank(acc.into_iter().map(|(doc, score)| Hit { doc, score }).collect(), limit)
    }

    /// Exact pass first, then a `~1` retry when nothing matched and the user
    /// wrote no operators. A malformed query is reduced to alphanumerics and
    /// retried once.
    pub fn query(&self, q: &str, limit: usize) -> ToolCtxResult<Vec<Hit>> {
        let parsed = match parse_query(q) {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "malformed full-text query; retrying with plain terms");
                let plain: String = q.chars().map(|c| if c.is_alphanumeric() { c } else { ' ' }).collect();
                parse_query(&plain)?
            }
        };
        let hits = self.evaluate(&parsed.clauses, limit);
        if hits.is_empty() && !parsed.has_operators && !parsed.clauses.is_empty() {
            let relaxed: Vec<Clause> = parsed.clauses.iter().map(Clause::relaxed).collect();
            return Ok(self.evaluate(&relaxed, limit));
        }
        Ok(hits)
    }
}

impl SearchStrategy for FullTextIndex {
    fn kind(&self) -> StrategyKind { StrategyKind::FullText }
    fn search(&self, query: &str, limit: usize) -> ToolCtxResult<Vec<Hit>> { self.query(query, limit) }
}

pub struct FullTextBuilder;

impl StrategyBuilder for FullTextBuilder {
    fn kind(&self) -> StrategyKind { StrategyKind::FullText }
    fn build(&self, records: &Records) -> ToolCtxResult<Box<dyn SearchStrategy>> { Ok(Box::new(FullTextIndex::build(records)?)) }
}
