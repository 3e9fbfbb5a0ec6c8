//! toolctx filter index: inverted postings from facet values to sorted doc-id sets.
//!
//! Category keys are exact; platform and installation keys are lower-cased so
//! lookups are case-insensitive. Every record lands in exactly one category
//! bucket (records without a category use the empty key), so the category
//! buckets partition the full id set.

#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use serde::Serialize;
use toolctx_core::{DocId, ToolRecord, TtlCache};
use tracing::{debug, info};

pub const FILTER_CACHE_CAP: usize = 50;
pub const FILTER_CACHE_TTL: Duration = Duration::from_secs(5);

/// Sorted, deduplicated set of doc ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocSet(Vec<DocId>);

impl DocSet {
    pub fn empty() -> Self { Self(Vec::new()) }

    /// Every id in `0..n`.
    pub fn full(n: usize) -> Self { Self((0..n as DocId).collect()) }

    pub fn from_unsorted(mut ids: Vec<DocId>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self(ids)
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn contains(&self, id: DocId) -> bool { self.0.binary_search(&id).is_ok() }
    pub fn iter(&self) -> impl Iterator<Item = DocId> + '_ { self.0.iter().copied() }
    pub fn as_slice(&self) -> &[DocId] { &self.0 }
    pub fn into_vec(self) -> Vec<DocId> { self.0 }

    pub fn intersect(&self, other: &DocSet) -> DocSet {
        let (a, b) = (&self.0, &other.0);
        let (mut i, mut j) = (0usize, 0usize);
        let mut out = Vec::with_capacity(a.len().min(b.len()));
        while i < a.len() && j < b.len() {
            match a[i].cmp(&b[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    out.push(a[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        DocSet(out)
    }

    pub fn union(&self, other: &DocSet) -> DocSet {
        let (a, b) = (&self.0, &other.0);
        let (mut i, mut j) = (0usize, 0usize);
        let mut out = Vec::with_capacity(a.len() + b.len());
        while i < a.len() || j < b.len() {
            let next = match (a.get(i), b.get(j)) {
                (Some(x), Some(y)) if x < y => { i += 1; *x }
                (Some(x), Some(y)) if x > y => { j += 1; *y }
                (Some(x), Some(_)) => { i += 1; j += 1; *x }
                (Some(x), None) => { i += 1; *x }
                (None, Some(y)) => { j += 1; *y }
                (None, None) => break,
            };
            out.push(next);
        }
        DocSet(out)
    }
}

impl FromIterator<DocId> for DocSet {
    fn from_iter<I: IntoIterator<Item = DocId>>(iter: I) -> Self { Self::from_unsorted(iter.into_iter().collect()) }
}

#[derive(Default)]
struct Postings {
    doc_count: usize,
    category: FxHashMap<String, Vec<DocId>>,
    platform: FxHashMap<String, Vec<DocId>>,
    installation: FxHashMap<String, Vec<DocId>>,
    difficulty: FxHashMap<u8, Vec<DocId>>,
}

fn push_once(list: &mut Vec<DocId>, doc: DocId) {
    if list.last() != Some(&doc) {
        list.push(doc);
    }
}

impl Postings {
    fn build(records: &[ToolRecord]) -> Self {
        let mut p = Postings { doc_count: records.len(), ..Default::default() };
        for (i, r) in records.iter().enumerate() {
            let doc = i as DocId;
            p.category.entry(r.category.clone()).or_default().push(doc);
            for plat in &r.platforms {
                push_once(p.platform.entry(plat.to_lowercase()).or_default(), doc);
            }
            for inst in &r.installation {
                push_once(p.installation.entry(inst.to_lowercase()).or_default(), doc);
            }
            p.difficulty.entry(r.difficulty).or_default().push(doc);
        }
        p
    }

    fn key_count(&self) -> usize { self.category.len() + self.platform.len() + self.installation.len() + self.difficulty.len() }
}

/// Facet postings plus a small result cache for combined filter lookups.
pub struct FilterIndex {
    postings: Postings,
    cache: TtlCache<String, DocSet>,
}

impl Default for FilterIndex {
    fn default() -> Self { Self::new() }
}

impl FilterIndex {
    pub fn new() -> Self { Self { postings: Postings::default(), cache: TtlCache::new(FILTER_CACHE_CAP, FILTER_CACHE_TTL) } }

    /// Replace every posting list with ones built from `records` and drop cached results.
    pub fn build(&mut self, records: &[ToolRecord]) {
        let t0 = Instant::now();
        let next = Postings::build(records);
        metrics::gauge!("filter_index_docs", next.doc_count as f64);
        metrics::gauge!("filter_index_keys", next.key_count() as f64);
        info!(
            docs = next.doc_count,
            categories = next.category.len(),
            platforms = next.platform.len(),
            installation = next.installation.len(),
            took_ms = %t0.elapsed().as_millis(),
            "filter index built"
        );
        self.postings = next;
        self.cache.clear();
    }

    pub fn len(&self) -> usize { self.postings.doc_count }
    pub fn is_empty(&self) -> bool { self.postings.doc_count == 0 }

    pub fn all(&self) -> DocSet { DocSet::full(self.postings.doc_count) }

    pub fn by_category(&self, name: &str) -> DocSet { self.postings.category.get(name).cloned().map(DocSet).unwrap_or_default() }

    pub fn by_platform(&self, name: &str) -> DocSet {
        self.postings.platform.get(&name.trim().to_lowercase()).cloned().map(DocSet).unwrap_or_default()
    }

    pub fn by_installation(&self, name: &str) -> DocSet {
        self.postings.installation.get(&name.trim().to_lowercase()).cloned().map(DocSet).unwrap_or_default()
    }

    /// Union of difficulty buckets in `min..=max`.
    pub fn by_difficulty_range(&self, min: u8, max: u8) -> DocSet {
        if min > max {
            return DocSet::empty();
        }
        (min..=max).filter_map(|d| self.postings.difficulty.get(&d)).flatten().copied().collect()
    }

    /// Category names with their bucket sizes, sorted by name.
    pub fn categories(&self) -> Vec<(&str, usize)> {
        let mut out: Vec<(&str, usize)> = self.postings.category.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        out.sort_unstable_by(|a, b| a.0.cmp(b.0));
        out
    }

    pub fn cache_result(&mut self, key: String, set: DocSet) { self.cache_result_at(key, set, Instant::now()) }

    pub fn cache_result_at(&mut self, key: String, set: DocSet, now: Instant) {
        debug!(key = %key, len = set.len(), "filter cache store");
        self.cache.insert_at(key, set, now);
    }

    pub fn cached_result(&mut self, key: &str) -> Option<DocSet> { self.cached_result_at(key, Instant::now()) }

    pub fn cached_result_at(&mut self, key: &str, now: Instant) -> Option<DocSet> {
        let hit = self.cache.get_at(&key.to_string(), now);
        metrics::counter!("filter_cache_lookups_total", 1u64, "hit" => if hit.is_some() { "true" } else { "false" });
        hit
    }

    pub fn clear_cache(&mut self) { self.cache.clear() }
    pub fn cache_len(&self) -> usize { self.cache.len() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, category: &str, platforms: &[&str], installation: &[&str], difficulty: u8) -> ToolRecord {
        ToolRecord {
            id: name.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            platforms: platforms.iter().map(|s| s.to_string()).collect::<Vec<_>>().into(),
            installation: installation.iter().map(|s| s.to_string()).collect::<Vec<_>>().into(),
            difficulty,
            ..Default::default()
        }
    }

    fn sample() -> Vec<ToolRecord> {
        vec![
            tool("git", "Development", &["macOS", "Linux"], &["homebrew", "package-manager"], 2),
            tool("htop", "System", &["Linux"], &["package-manager"], 1),
            tool("curl", "Networking", &["macOS", "Linux", "Windows"], &["built-in"], 1),
            tool("docker", "Development", &["cross-platform"], &["download"], 4),
            tool("mystery", "", &[], &[], 3),
        ]
    }

    #[test]
    fn docset_ops() {
        let a = DocSet::from_unsorted(vec![5, 1, 3, 3]);
        let b: DocSet = [3, 4, 5].into_iter().collect();
        assert_eq!(a.as_slice(), &[1, 3, 5]);
        assert_eq!(a.intersect(&b).as_slice(), &[3, 5]);
        assert_eq!(a.union(&b).as_slice(), &[1, 3, 4, 5]);
        assert!(a.contains(5) && !a.contains(4));
        assert_eq!(DocSet::full(3).as_slice(), &[0, 1, 2]);
    }

    #[test]
    fn facet_lookups() {
        let mut idx = FilterIndex::new();
        idx.build(&sample());
        assert_eq!(idx.by_category("Development").as_slice(), &[0, 3]);
        assert!(idx.by_category("development").is_empty());
        assert_eq!(idx.by_platform("linux").as_slice(), &[0, 1, 2]);
        assert_eq!(idx.by_platform("LINUX"), idx.by_platform("Linux"));
        assert_eq!(idx.by_installation("Package-Manager").as_slice(), &[0, 1]);
        assert_eq!(idx.by_difficulty_range(1, 2).as_slice(), &[0, 1, 2]);
        assert_eq!(idx.by_difficulty_range(4, 4).as_slice(), &[3]);
        assert!(idx.by_difficulty_range(5, 1).is_empty());
        assert!(idx.by_platform("plan9").is_empty());
    }

    #[test]
    fn empty_category_still_partitions() {
        let mut idx = FilterIndex::new();
        idx.build(&sample());
        let union = idx.categories().iter().fold(DocSet::empty(), |acc, (c, _)| acc.union(&idx.by_category(c)));
        assert_eq!(union, idx.all());
        assert_eq!(idx.by_category("").as_slice(), &[4]);
    }

    #[test]
    fn rebuild_replaces_postings_and_cache() {
        let mut idx = FilterIndex::new();
        idx.build(&sample());
        idx.cache_result("k".into(), idx.by_category("System"));
        assert_eq!(idx.cache_len(), 1);
        idx.build(&sample()[..2]);
        assert_eq!(idx.cache_len(), 0);
        assert_eq!(idx.len(), 2);
        assert!(idx.by_category("Networking").is_empty());
    }

    #[test]
    fn cache_ttl_and_capacity() {
        let mut idx = FilterIndex::new();
        let t0 = Instant::now();
        for i in 0..=FILTER_CACHE_CAP {
            idx.cache_result_at(format!("k{i}"), DocSet::full(i), t0);
        }
        assert_eq!(idx.cache_len(), FILTER_CACHE_CAP);
        assert_eq!(idx.cached_result_at("k0", t0), None);
        assert_eq!(idx.cached_result_at("k1", t0), Some(DocSet::full(1)));
        assert_eq!(idx.cached_result_at("k2", t0 + FILTER_CACHE_TTL + Duration::from_millis(1)), None);
    }
}
