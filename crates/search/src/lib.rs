//! toolctx search: tiered in-RAM search over tool records.
//!
//! Tiers, strongest first:
//! - `FullText`: inverted index with field boosts and BM25-style weighting
//! - `Fuzzy`: phrase/word containment plus a bounded edit-distance bonus
//! - `Substring`: keyword containment scoring
//!
//! `SearchEngine` builds the first tier that succeeds and demotes on query
//! failure. If nothing builds, a build-free `Scan` keeps search answering.

#![forbid(unsafe_code)]

use std::sync::Arc;

use toolctx_core::{DocId, StrategyKind, ToolCtxResult, ToolRecord};

mod engine;
mod fulltext;
mod fuzzy;
mod highlight;
mod substring;
pub mod worker;

pub use engine::{suggest, EngineHealth, EngineState, SearchEngine, SEARCH_CACHE_CAP, SEARCH_CACHE_TTL};
pub use fulltext::{tokenize, FullTextBuilder, FullTextIndex};
pub use fuzzy::{FuzzyBuilder, FuzzyIndex};
pub use highlight::{escape_html, highlight_terms, highlights, DESCRIPTION_PREVIEW_CHARS};
pub use substring::{ScanStrategy, SubstringBuilder, SubstringIndex};
pub use worker::{spawn_search_worker, SearchWorker, WorkerRequest, WorkerResponse, WORKER_SEARCH_TIMEOUT};

/// Shared, immutable record set a strategy is built over.
pub type Records = Arc<[ToolRecord]>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub doc: DocId,
    pub score: f32,
}

/// One interchangeable search implementation over a fixed record set.
pub trait SearchStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Ranked hits for a normalized query (trimmed, lower-cased, at least two chars).
    fn search(&self, query: &str, limit: usize) -> ToolCtxResult<Vec<Hit>>;
}

/// Constructs a strategy; `SearchEngine` tries builders in rank order.
pub trait StrategyBuilder: Send + Sync {
    fn kind(&self) -> StrategyKind;
    fn build(&self, records: &Records) -> ToolCtxResult<Box<dyn SearchStrategy>>;
}

/// Full-text, then fuzzy, then substring.
pub fn default_tiers() -> Vec<Arc<dyn StrategyBuilder>> { vec![Arc::new(FullTextBuilder), Arc::new(FuzzyBuilder), Arc::new(SubstringBuilder)] }

/// Trimmed, lower-cased query text.
pub fn normalize_query(q: &str) -> String { q.trim().to_lowercase() }

/// Query words that carry signal (more than one char).
pub(crate) fn query_words(q: &str) -> Vec<&str> { q.split_whitespace().filter(|w| w.chars().count() > 1).collect() }

/// Sort by score desc, then record order; keep the first `limit`.
pub(crate) fn rank(mut hits: Vec<Hit>, limit: usize) -> Vec<Hit> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.doc.cmp(&b.doc)));
    hits.truncate(limit);
    hits
}

/// Character-level edit distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let sub = prev[j] + usize::from(ca != cb);
            cur[j + 1] = sub.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}
