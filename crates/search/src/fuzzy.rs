//! Fuzzy tier: containment scoring over the whole record text, with an
//! edit-distance bonus when exact matching finds too little.

use toolctx_core::{StrategyKind, ToolCtxResult, ToolRecord};

use crate::fulltext::tokenize;
use crate::{levenshtein, query_words, rank, Hit, Records, SearchStrategy, StrategyBuilder};

const PHRASE_SCORE: f32 = 10.0;
const WORD_SCORE: f32 = 3.0;
/// Only the leading words of a record are compared by edit distance.
const NEAR_WORDS: usize = 50;
const NEAR_MAX_DISTANCE: usize = 2;
const NEAR_CAP_PER_WORD: f32 = 2.0;
/// Edit-distance pass runs when fewer than `min(limit, this)` records matched exactly.
const NEAR_MIN_RESULTS: usize = 10;

pub struct FuzzyIndex {
    texts: Vec<String>,
    words: Vec<Vec<String>>,
}

impl FuzzyIndex {
    pub fn build(records: &[ToolRecord]) -> Self {
        let texts: Vec<String> = records.iter().map(ToolRecord::searchable_text).collect();
        let words = texts.iter().map(|t| tokenize(t).into_iter().take(NEAR_WORDS).collect()).collect();
        Self { texts, words }
    }

    pub fn len(&self) -> usize { self.texts.len() }
    pub fn is_empty(&self) -> bool { self.texts.is_empty() }

    fn near_bonus(&self, doc: usize, word: &str) -> f32 {
        let want = word.chars().count();
        let mut bonus = 0.0f32;
        for w in &self.words[doc] {
            if w.chars().count().abs_diff(want) > NEAR_MAX_DISTANCE {
                continue;
            }
            bonus += match levenshtein(w, word) {
                0 | 1 => 1.0,
                2 => 0.5,
                _ => 0.0,
            };
            if bonus >= NEAR_CAP_PER_WORD {
                return NEAR_CAP_PER_WORD;
            }
        }
        bonus
    }

    pub fn query(&self, q: &str, limit: usize) -> Vec<Hit> {
        let words = query_words(q);
        let divisor = words.len().max(1) as f32;
        let mut matched = vec![false; self.texts.len()];
        let mut hits = Vec::new();
        for (i, text) in self.texts.iter().enumerate() {
            let mut score = 0.0;
            if text.contains(q) {
                score += PHRASE_SCORE;
            }
            score += WORD_SCORE * words.iter().filter(|w| text.contains(*w)).count() as f32;
            if score > 0.0 {
                matched[i] = true;
                hits.push(Hit { doc: i as u32, score: score / divisor });
            }
        }
        if hits.len() < limit.min(NEAR_MIN_RESULTS) && !words.is_empty() {
            for (i, seen) in matched.iter().enumerate() {
                if *seen {
                    continue;
                }
                let bonus: f32 = words.iter().map(|w| self.near_bonus(i, w)).sum();
                if bonus > 0.0 {
                    hits.push(Hit { doc: i as u32, score: bonus / divisor });
                }
            }
        }
        rank(hits, limit)
    }
}

impl SearchStrategy for FuzzyIndex {
    fn kind(&self) -> StrategyKind { StrategyKind::Fuzzy }
    fn search(&self, query: &str, limit: usize) -> ToolCtxResult<Vec<Hit>> { Ok(self.query(query, limit)) }
}

pub struct FuzzyBuilder;

impl StrategyBuilder for FuzzyBuilder {
    fn kind(&self) -> StrategyKind { StrategyKind::Fuzzy }
    fn build(&self, records: &Records) -> ToolCtxResult<Box<dyn SearchStrategy>> { Ok(Box::new(FuzzyIndex::build(records))) }
}
