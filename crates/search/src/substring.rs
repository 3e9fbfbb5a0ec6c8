//! Substring tier and the build-free scan used once every tier is gone.

use rustc_hash::FxHashSet;
use toolctx_core::{StrategyKind, ToolCtxResult, ToolRecord};

use crate::{query_words, rank, Hit, Records, SearchStrategy, StrategyBuilder};

const EXACT_SCORE: f32 = 5.0;
const PARTIAL_SCORE: f32 = 2.0;
/// Keywords shorter than this are not indexed.
const MIN_KEYWORD_CHARS: usize = 3;

pub struct SubstringIndex {
    keywords: Vec<Vec<String>>,
}

impl SubstringIndex {
    pub fn build(records: &[ToolRecord]) -> Self {
        let keywords = records
            .iter()
            .map(|r| {
                let mut seen = FxHashSet::default();
                r.searchable_text()
                    .split_whitespace()
                    .filter(|w| w.chars().count() >= MIN_KEYWORD_CHARS)
                    .filter(|w| seen.insert(w.to_string()))
                    .map(str::to_string)
                    .collect()
            })
            .collect();
        Self { keywords }
    }

    /// `5 x exact + 2 x partial` keyword matches, summed over query words.
    pub fn query(&self, q: &str, limit: usize) -> Vec<Hit> {
        let words = query_words(q);
        let mut hits = Vec::new();
        for (i, kws) in self.keywords.iter().enumerate() {
            let mut score = 0.0f32;
            for w in &words {
                let exact = kws.iter().filter(|k| k.as_str() == *w).count();
                let partial = kws.iter().filter(|k| k.contains(*w)).count();
                score += EXACT_SCORE * exact as f32 + PARTIAL_SCORE * partial as f32;
            }
            if score > 0.0 {
                hits.push(Hit { doc: i as u32, score });
            }
        }
        rank(hits, limit)
    }
}

impl SearchStrategy for SubstringIndex {
    fn kind(&self) -> StrategyKind { StrategyKind::Substring }
    fn search(&self, query: &str, limit: usize) -> ToolCtxResult<Vec<Hit>> { Ok(self.query(query, limit)) }
}

pub struct SubstringBuilder;

impl StrategyBuilder for SubstringBuilder {
    fn kind(&self) -> StrategyKind { StrategyKind::Substring }
    fn build(&self, records: &Records) -> ToolCtxResult<Box<dyn SearchStrategy>> { Ok(Box::new(SubstringIndex::build(records))) }
}

/// Linear scan over the live records. Every term must appear somewhere;
/// name, description and category matches add 10, 5 and 3 per term.
pub struct ScanStrategy {
    records: Records,
}

impl ScanStrategy {
    pub fn new(records: Records) -> Self { Self { records } }

    pub fn query(&self, q: &str, limit: usize) -> Vec<Hit> {
        let terms: Vec<&str> = q.split_whitespace().collect();
        if terms.is_empty() {
            return Vec::new();
        }
        let mut hits = Vec::new();
        for (i, r) in self.records.iter().enumerate() {
            let text = r.searchable_text();
            if !terms.iter().all(|t| text.contains(t)) {
                continue;
            }
            let (name, desc, cat) = (r.name.to_lowercase(), r.description.to_lowercase(), r.category.to_lowercase());
            let mut score = 0.0f32;
            for t in &terms {
                if name.contains(t) {
                    score += 10.0;
                }
                if desc.contains(t) {
                    score += 5.0;
                }
                if cat.contains(t) {
                    score += 3.0;
                }
            }
            hits.push(Hit { doc: i as u32, score });
        }
        rank(hits, limit)
    }
}

impl SearchStrategy for ScanStrategy {
    fn kind(&self) -> StrategyKind { StrategyKind::Scan }
    fn search(&self, query: &str, limit: usize) -> ToolCtxResult<Vec<Hit>> { Ok(self.query(query, limit)) }
}
