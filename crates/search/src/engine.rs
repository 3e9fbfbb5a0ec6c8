//! Tier selection, query cache and failure substitution.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde::Serialize;
use toolctx_core::{SearchResult, SearchStatus, StrategyKind, ToolCtxError, ToolCtxResult, ToolRecord, TtlCache, MIN_QUERY_CHARS};
use tracing::{debug, info, warn};

use crate::highlight::highlights;
use crate::substring::ScanStrategy;
use crate::{default_tiers, normalize_query, Hit, Records, SearchStrategy, StrategyBuilder};

pub const SEARCH_CACHE_CAP: usize = 100;
pub const SEARCH_CACHE_TTL: Duration = Duration::from_secs(5);
/// Results computed per query regardless of the caller's limit, so cached
/// entries can serve larger limits later.
const CACHE_DEPTH: usize = 50;
const SELF_TEST_QUERY: &str = "test";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Uninitialized,
    Building,
    Ready(StrategyKind),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    pub status: SearchStatus,
    pub state: EngineState,
    pub cache_entries: usize,
    /// Active strategy answered a probe query without error.
    pub functional: bool,
}

/// Results for one query, computed to `depth`. Fewer results than `depth`
/// means the set is complete and serves any limit.
#[derive(Clone)]
struct CachedResults {
    depth: usize,
    results: Vec<SearchResult>,
}

impl CachedResults {
    fn serves(&self, limit: usize) -> bool { limit <= self.depth || self.results.len() < self.depth }
}

struct Active {
    /// Index into the tier list; `tiers.len()` for the scan fallback.
    tier: usize,
    strategy: Box<dyn SearchStrategy>,
}

pub struct SearchEngine {
    tiers: Vec<Arc<dyn StrategyBuilder>>,
    records: Records,
    state: EngineState,
    active: Option<Active>,
    cache: TtlCache<String, CachedResults>,
}

impl Default for SearchEngine {
    fn default() -> Self { Self::new() }
}

impl SearchEngine {
    pub fn new() -> Self { Self::with_tiers(default_tiers()) }

    /// Engine over an explicit ranked tier list, strongest first.
    pub fn with_tiers(tiers: Vec<Arc<dyn StrategyBuilder>>) -> Self {
        Self {
            tiers,
            records: Arc::from(Vec::<ToolRecord>::new()),
            state: EngineState::Uninitialized,
            active: None,
            cache: TtlCache::new(SEARCH_CACHE_CAP, SEARCH_CACHE_TTL),
        }
    }

    pub fn state(&self) -> &EngineState { &self.state }
    pub fn records(&self) -> &Records { &self.records }
    pub fn is_ready(&self) -> bool { matches!(self.state, EngineState::Ready(_)) }
    pub fn strategy(&self) -> Option<StrategyKind> { self.active.as_ref().map(|a| a.strategy.kind()) }

    pub fn status(&self) -> SearchStatus { SearchStatus { ready: self.is_ready(), strategy: self.strategy(), tool_count: self.records.len() } }

    /// Build the strongest tier that succeeds over `records`. Returns false
    /// (state `Failed`) when no tier builds; retrying is allowed.
    pub fn initialize(&mut self, records: Records) -> bool {
        self.records = records;
        self.build_from(0)
    }

    fn build_from(&mut self, start: usize) -> bool {
        self.state = EngineState::Building;
        self.active = None;
        self.cache.clear();
        for (i, builder) in self.tiers.iter().enumerate().skip(start) {
            let t0 = Instant::now();
            match builder.build(&self.records) {
                Ok(strategy) => {
                    let kind = strategy.kind();
                    info!(strategy = %kind, docs = self.records.len(), took_ms = %t0.elapsed().as_millis(), "search tier ready");
                    metrics::gauge!("search_index_docs", self.records.len() as f64);
                    metrics::counter!("search_tier_builds_total", 1u64, "strategy" => kind.as_str());
                    self.active = Some(Active { tier: i, strategy });
                    self.state = EngineState::Ready(kind);
                    return true;
                }
                Err(e) => {
                    warn!(strategy = %builder.kind(), error = %e, "search tier failed to build; trying next");
                    metrics::counter!("search_tier_build_failures_total", 1u64, "strategy" => builder.kind().as_str());
                }
            }
        }
        self.state = EngineState::Failed("no search tier could be built".into());
        false
    }

    /// Drop the active tier and build the next weaker one.
    pub fn demote(&mut self) -> ToolCtxResult<StrategyKind> {
        let next = match &self.active {
            Some(a) => a.tier + 1,
            None if self.state == EngineState::Uninitialized => 0,
            None => self.tiers.len(),
        };
        if next >= self.tiers.len() {
            return Err(ToolCtxError::IndexBuildFailure("no weaker search tier available".into()));
        }
        if self.build_from(next) {
            if let Some(kind) = self.strategy() {
                return Ok(kind);
            }
        }
        Err(ToolCtxError::IndexBuildFailure("no weaker search tier available".into()))
    }

    /// Switch to the build-free scan; always succeeds.
    pub fn degrade(&mut self) {
        warn!(docs = self.records.len(), "search degraded to linear scan");
        self.cache.clear();
        self.active = Some(Active { tier: self.tiers.len(), strategy: Box::new(ScanStrategy::new(Arc::clone(&self.records))) });
        self.state = EngineState::Ready(StrategyKind::Scan);
        metrics::counter!("search_tier_builds_total", 1u64, "strategy" => StrategyKind::Scan.as_str());
    }

    pub fn clear_cache(&mut self) { self.cache.clear() }

    pub fn search(&mut self, query: &str, limit: usize) -> Vec<SearchResult> { self.search_at(query, limit, Instant::now()) }

    /// Search as of `now` (cache expiry is evaluated against it). Never fails:
    /// query errors demote to weaker tiers, ending at the scan.
    pub fn search_at(&mut self, query: &str, limit: usize, now: Instant) -> Vec<SearchResult> {
        let q = normalize_query(query);
        if q.chars().count() < MIN_QUERY_CHARS || limit == 0 {
            return Vec::new();
        }
        if let Some(cached) = self.cache.get_at(&q, now).filter(|c| c.serves(limit)) {
            metrics::counter!("search_cache_hits_total", 1u64);
            let mut results = cached.results;
            results.truncate(limit);
            return results;
        }
        let started = Instant::now();
        let depth = limit.max(CACHE_DEPTH);
        let hits = self.run(&q, depth);
        let mut results: Vec<SearchResult> = hits
            .into_iter()
            .filter_map(|h| {
                self.records.get(h.doc as usize).map(|r| SearchResult { doc: h.doc, record: r.clone(), score: h.score, highlights: highlights(r, &q) })
            })
            .collect();
        metrics::histogram!("search_eval_ms", started.elapsed().as_secs_f64() * 1_000.0);
        debug!(query = %q, results = results.len(), strategy = ?self.strategy(), "search evaluated");
        if !results.is_empty() {
            self.cache.insert_at(q, CachedResults { depth, results: results.clone() }, now);
        }
        results.truncate(limit);
        results
    }

    fn run(&mut self, q: &str, depth: usize) -> Vec<Hit> {
        loop {
            let Some(active) = self.active.as_ref() else {
                // every tier refused to build; keep answering via the scan
                if matches!(self.state, EngineState::Failed(_)) && !self.records.is_empty() {
                    self.degrade();
                    continue;
                }
                return Vec::new();
            };
            match active.strategy.search(q, depth) {
                Ok(hits) => return hits,
                Err(e) => {
                    let (tier, kind) = (active.tier, active.strategy.kind());
                    warn!(strategy = %kind, error = %e, "search query failed; substituting weaker tier");
                    metrics::counter!("search_query_failures_total", 1u64, "strategy" => kind.as_str());
                    if tier >= self.tiers.len() {
                        return Vec::new();
                    }
                    if !self.build_from(tier + 1) {
                        self.degrade();
                    }
                }
            }
        }
    }

    /// Probe the active strategy directly, bypassing the cache.
    pub fn self_test(&self) -> bool {
        match &self.active {
            Some(a) => a.strategy.search(SELF_TEST_QUERY, 1).is_ok(),
            None => false,
        }
    }

    pub fn health_check(&self) -> EngineHealth {
        EngineHealth { status: self.status(), state: self.state.clone(), cache_entries: self.cache.len(), functional: self.self_test() }
    }

    pub fn suggestions(&self, partial: &str, history: &[String], limit: usize) -> Vec<String> { suggest(&self.records, partial, history, limit) }
}

/// Completions for a partial query: history entries first, then tool names,
/// ranked by skim fuzzy score.
pub fn suggest(records: &[ToolRecord], partial: &str, history: &[String], limit: usize) -> Vec<String> {
    let p = normalize_query(partial);
    if p.chars().count() < MIN_QUERY_CHARS || limit == 0 {
        return Vec::new();
    }
    let matcher = SkimMatcherV2::default();
    let mut out: Vec<String> = history.iter().filter(|h| h.to_lowercase().starts_with(&p) && **h != p).take(limit).cloned().collect();
    let mut named: Vec<(i64, &str)> = records.iter().filter_map(|r| matcher.fuzzy_match(&r.name, &p).map(|s| (s, r.name.as_str()))).collect();
    named.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    for (_, name) in named {
        if out.len() >= limit {
            break;
        }
        if !out.iter().any(|o| o.eq_ignore_ascii_case(name)) {
            out.push(name.to_string());
        }
    }
    out
}
