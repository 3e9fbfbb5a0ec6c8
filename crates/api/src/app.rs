//! Application controller: owns the filter state, the catalog snapshot and
//! both indexes, and turns state into ordered result pages.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use toolctx_catalog::{CatalogStore, Loader};
use toolctx_core::{
    is_active, Catalog, DocId, FilterState, SearchResult, SearchStatus, Settings, SortBy, SourceKind, StrategyKind, ToolCtxError, ToolCtxResult,
    ToolRecord, MIN_QUERY_CHARS,
};
use toolctx_filter::{DocSet, FilterIndex};
use toolctx_normalize::Normalizer;
use toolctx_search::{spawn_search_worker, suggest, Records, SearchEngine, SearchWorker};
use tracing::{debug, info, warn};

use crate::surface::{RenderSurface, SessionStorage};
use crate::{AppStatus, Page};

pub const HISTORY_KEY: &str = "toolctx-history";
pub const HISTORY_CAP: usize = 50;

pub struct AppController {
    settings: Settings,
    store: CatalogStore,
    loader: Loader,
    records: Records,
    filter: FilterIndex,
    engine: SearchEngine,
    worker: Option<SearchWorker>,
    worker_status: Option<SearchStatus>,
    state: FilterState,
    filtered: Vec<DocId>,
    history: Vec<String>,
    storage: Arc<dyn SessionStorage>,
    surface: Arc<dyn RenderSurface>,
    online: watch::Receiver<bool>,
    index_builds: u64,
}

impl AppController {
    pub fn new(settings: Settings, storage: Arc<dyn SessionStorage>, surface: Arc<dyn RenderSurface>, online: watch::Receiver<bool>) -> Self {
        let loader = Loader::from_settings(&settings);
        let history = read_history(storage.as_ref());
        Self {
            settings,
            store: CatalogStore::new(),
            loader,
            records: Arc::from(Vec::<ToolRecord>::new()),
            filter: FilterIndex::new(),
            engine: SearchEngine::new(),
            worker: None,
            worker_status: None,
            state: FilterState::default(),
            filtered: Vec::new(),
            history,
            storage,
            surface,
            online,
            index_builds: 0,
        }
    }

    pub fn with_loader(mut self, loader: Loader) -> Self {
        self.loader = loader;
        self
    }

    pub fn settings(&self) -> &Settings { &self.settings }
    pub fn store(&self) -> &CatalogStore { &self.store }
    pub fn state(&self) -> &FilterState { &self.state }
    pub fn records(&self) -> &Records { &self.records }
    pub fn filter_index(&self) -> &FilterIndex { &self.filter }
    pub fn engine(&self) -> &SearchEngine { &self.engine }
    pub fn storage(&self) -> &Arc<dyn SessionStorage> { &self.storage }
    pub fn surface(&self) -> &Arc<dyn RenderSurface> { &self.surface }
    pub fn online(&self) -> watch::Receiver<bool> { self.online.clone() }
    pub fn history(&self) -> &[String] { &self.history }
    /// Times the indexes were rebuilt from a new catalog.
    pub fn index_builds(&self) -> u64 { self.index_builds }
    pub fn has_worker(&self) -> bool { self.worker.is_some() }

    /// Ids of the current result list, in display order.
    pub fn filtered_ids(&self) -> &[DocId] { &self.filtered }

    /// Run the whole source chain and install the result.
    pub async fn load(&mut self) -> ToolCtxResult<usize> {
        let catalog = self.loader.load_chain().await?;
        self.install(catalog).await
    }

    /// Reload starting at `from`; the full chain when no such source is configured.
    pub async fn load_from(&mut self, from: SourceKind) -> ToolCtxResult<usize> {
        let catalog = if self.loader.kinds().contains(&from) { self.loader.load_starting_at(from).await? } else { self.loader.load_chain().await? };
        self.install(catalog).await
    }

    /// Publish `catalog`, rebuild filter and search indexes once, then apply
    /// the current filters. Returns the tool count.
    pub async fn install(&mut self, catalog: Catalog) -> ToolCtxResult<usize> {
        let t0 = Instant::now();
        let snap = self.store.publish(catalog);
        self.records = Arc::from(snap.tools.clone());
        self.filter.build(&self.records);
        self.rebuild_search().await;
        self.index_builds += 1;
        info!(
            epoch = snap.epoch,
            tools = self.records.len(),
            source = %snap.source,
            strategy = ?self.strategy(),
            took_ms = %t0.elapsed().as_millis(),
            "catalog installed"
        );
        if let Err(e) = self.apply_filters().await {
            warn!(error = %e, "filters could not be applied to the new catalog; showing all tools");
            self.show_all();
        }
        Ok(self.records.len())
    }

    async fn rebuild_search(&mut self) {
        self.worker_status = None;
        if self.settings.use_worker {
            let cap = self.settings.queue_cap;
            let worker = self.worker.get_or_insert_with(|| spawn_search_worker(cap));
            match worker.build(Arc::clone(&self.records)).await {
                Ok(n) => {
                    self.worker_status = Some(SearchStatus { ready: true, strategy: Some(StrategyKind::FullText), tool_count: n });
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "search worker failed to build its index; using in-process engine");
                    self.terminate_worker();
                }
            }
        }
        if !self.engine.initialize(Arc::clone(&self.records)) {
            warn!(state = ?self.engine.state(), "no search tier built; queries will use the scan");
        }
    }

    fn terminate_worker(&mut self) -> bool {
        self.worker_status = None;
        match self.worker.take() {
            Some(w) => {
                w.terminate();
                true
            }
            None => false,
        }
    }

    /// Stop the worker and move search in-process. False when no worker ran.
    pub fn drop_worker(&mut self) -> bool {
        if !self.terminate_worker() {
            return false;
        }
        self.engine.initialize(Arc::clone(&self.records));
        self.filter.clear_cache();
        info!(strategy = ?self.engine.strategy(), "search moved in-process");
        true
    }

    pub fn strategy(&self) -> Option<StrategyKind> {
        match &self.worker_status {
            Some(s) => s.strategy,
            None => self.engine.strategy(),
        }
    }

    pub fn search_status(&self) -> SearchStatus { self.worker_status.clone().unwrap_or_else(|| self.engine.status()) }

    /// Rebuild search on the next weaker tier.
    pub fn demote_search(&mut self) -> ToolCtxResult<StrategyKind> {
        let kind = self.engine.demote()?;
        self.filter.clear_cache();
        Ok(kind)
    }

    pub fn degrade_search(&mut self) {
        self.engine.degrade();
        self.filter.clear_cache();
    }

    /// Probe whichever backend is answering queries.
    pub async fn search_self_test(&mut self) -> bool {
        match self.worker.as_mut() {
            Some(w) => matches!(w.health().await, Ok(s) if s.ready),
            None => self.engine.self_test(),
        }
    }

    /// Ranked search. In-process search never fails; worker errors come back
    /// as `QueryFailure` so they route to search recovery.
    pub async fn search(&mut self, query: &str, limit: usize) -> ToolCtxResult<Vec<SearchResult>> {
        match self.worker.as_mut() {
            Some(w) => w.search(query, limit).await.map_err(|e| match e {
                ToolCtxError::ResourceUnavailable(m) => ToolCtxError::QueryFailure(m),
                other => other,
            }),
            None => Ok(self.engine.search(query, limit)),
        }
    }

    pub fn set_search(&mut self, q: &str) {
        self.state.search = q.to_string();
        self.state.current_page = 1;
    }

    pub fn set_category(&mut self, c: &str) {
        self.state.category = c.to_string();
        self.state.current_page = 1;
    }

    pub fn set_difficulty(&mut self, d: &str) {
        self.state.difficulty = d.to_string();
        self.state.current_page = 1;
    }

    pub fn set_platform(&mut self, p: &str) {
        self.state.platform = p.to_string();
        self.state.current_page = 1;
    }

    pub fn set_installation(&mut self, i: &str) {
        self.state.installation = i.to_string();
        self.state.current_page = 1;
    }

    pub fn set_sort(&mut self, sort: SortBy) {
        self.state.sort_by = sort;
        self.state.current_page = 1;
    }

    /// Replace the whole state, e.g. one restored from elsewhere. Not validated here.
    pub fn set_state(&mut self, state: FilterState) { self.state = state; }

    pub fn reset_filters(&mut self) {
        self.state.reset();
        debug!("filters reset");
    }

    /// Show one more page. False when everything is already shown.
    pub fn load_more(&mut self) -> bool {
        if self.shown() >= self.filtered.len() {
            return false;
        }
        self.state.current_page += 1;
        true
    }

    fn shown(&self) -> usize { (self.state.current_page as usize).saturating_mul(self.settings.items_per_page).min(self.filtered.len()) }

    /// Recompute the result list from the filter state.
    pub async fn apply_filters(&mut self) -> ToolCtxResult<usize> {
        self.state.validate()?;
        let t0 = Instant::now();
        let key = self.state.cache_key(self.store.epoch());
        let set = match self.filter.cached_result(&key) {
            Some(set) => set,
            None => {
                let set = self.matching().await?;
                self.filter.cache_result(key, set.clone());
                set
            }
        };
        self.filtered = self.sorted(set.into_vec());
        self.state.current_page = 1;
        let q = self.state.search.trim().to_string();
        if q.chars().count() >= MIN_QUERY_CHARS && !self.filtered.is_empty() {
            self.remember_query(&q);
        }
        metrics::gauge!("filtered_tools", self.filtered.len() as f64);
        metrics::histogram!("apply_filters_ms", t0.elapsed().as_secs_f64() * 1_000.0);
        debug!(filtered = self.filtered.len(), sort = self.state.sort_by.as_str(), "filters applied");
        Ok(self.filtered.len())
    }

    async fn matching(&mut self) -> ToolCtxResult<DocSet> {
        let mut set = self.filter.all();
        let q = self.state.search.trim().to_string();
        if q.chars().count() >= MIN_QUERY_CHARS {
            let hits = self.search(&q, self.records.len().max(1)).await?;
            set = set.intersect(&DocSet::from_unsorted(hits.into_iter().map(|h| h.doc).collect()));
        }
        if is_active(&self.state.category) {
            set = set.intersect(&self.filter.by_category(self.state.category.trim()));
        }
        if let Some(d) = self.state.difficulty_level()? {
            set = set.intersect(&self.filter.by_difficulty_range(d, d));
        }
        let norm = Normalizer::shared();
        if is_active(&self.state.platform) {
            set = set.intersect(&self.filter.by_platform(&norm.normalize_platform(&self.state.platform)));
        }
        if is_active(&self.state.installation) {
            set = set.intersect(&self.filter.by_installation(&norm.normalize_installation_method(&self.state.installation)));
        }
        Ok(set)
    }

    fn sorted(&self, mut ids: Vec<DocId>) -> Vec<DocId> {
        let recs = &self.records;
        let name = |d: &DocId| recs.get(*d as usize).map(|r| r.name.to_lowercase()).unwrap_or_default();
        match self.state.sort_by {
            SortBy::Name => ids.sort_by_cached_key(|d| (name(d), *d)),
            SortBy::NameDesc => ids.sort_by_cached_key(|d| (std::cmp::Reverse(name(d)), *d)),
            SortBy::Category => ids.sort_by_cached_key(|d| (recs.get(*d as usize).map(|r| r.category.to_lowercase()).unwrap_or_default(), name(d), *d)),
            SortBy::Difficulty => ids.sort_by_cached_key(|d| (recs.get(*d as usize).map(|r| r.difficulty).unwrap_or_default(), name(d), *d)),
        }
        ids
    }

    /// Every record in the current sort order, page 1. Used when filters cannot be applied.
    pub fn show_all(&mut self) -> usize {
        self.filtered = self.sorted(self.filter.all().into_vec());
        self.state.current_page = 1;
        self.filtered.len()
    }

    /// Records up to the end of the current page.
    pub fn page(&self) -> Page {
        let items: Vec<ToolRecord> = self.filtered[..self.shown()].iter().filter_map(|d| self.records.get(*d as usize).cloned()).collect();
        Page { items, page: self.state.current_page, per_page: self.settings.items_per_page, total: self.filtered.len(), has_more: self.shown() < self.filtered.len() }
    }

    pub fn status(&self) -> AppStatus {
        let catalog = self.store.current();
        let search = self.search_status();
        AppStatus {
            ready: search.ready,
            strategy: search.strategy,
            tool_count: self.records.len(),
            filtered_count: self.filtered.len(),
            filters_active: self.state.has_active_filters(),
            source: catalog.source,
            epoch: catalog.epoch,
            worker: self.worker.is_some(),
        }
    }

    pub fn suggestions(&self, partial: &str, limit: usize) -> Vec<String> { suggest(&self.records, partial, &self.history, limit) }

    /// Newest first, distinct ignoring case, capped.
    pub fn remember_query(&mut self, q: &str) {
        let q = q.trim();
        if q.chars().count() < MIN_QUERY_CHARS {
            return;
        }
        self.history.retain(|h| !h.eq_ignore_ascii_case(q));
        self.history.insert(0, q.to_string());
        self.history.truncate(HISTORY_CAP);
        match serde_json::to_string(&self.history) {
            Ok(json) => {
                if let Err(e) = self.storage.set(HISTORY_KEY, &json) {
                    warn!(error = %e, "search history not persisted");
                }
            }
            Err(e) => warn!(error = %e, "search history not serializable"),
        }
    }

    pub fn clear_derived_caches(&mut self) {
        self.filter.clear_cache();
        self.engine.clear_cache();
    }

    /// Refuses with `StateCorruption` so callers can route the failure to recovery.
    pub fn check_state(&self) -> ToolCtxResult<()> { self.state.validate() }

    /// Stop background work owned by the controller.
    pub fn shutdown(&mut self) {
        if self.terminate_worker() {
            debug!("search worker stopped on shutdown");
        }
    }
}

fn read_history(storage: &dyn SessionStorage) -> Vec<String> {
    match storage.get(HISTORY_KEY) {
        Ok(Some(json)) => match serde_json::from_str::<Vec<String>>(&json) {
            Ok(mut h) => {
                h.truncate(HISTORY_CAP);
                h
            }
            Err(e) => {
                warn!(error = %e, "stored search history unreadable; discarding");
                storage.remove(HISTORY_KEY);
                Vec::new()
            }
        },
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!(error = %e, "session storage unavailable; starting without history");
            Vec::new()
        }
    }
}

