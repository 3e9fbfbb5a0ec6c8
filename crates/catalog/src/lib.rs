//! toolctx catalog: published snapshot store and the data-source fallback chain.

#![forbid(unsafe_code)]

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::Value;
use tokio::sync::watch;
use toolctx_core::{Catalog, SourceKind};
use toolctx_normalize::{categories_from_value, recalculate_category_counts, reconcile_stats, stats_from_value, Normalizer};
use tracing::info;

pub mod fetch;
pub mod loader;
pub mod source;

pub use fetch::{read_with_retry, with_retry, FetchPolicy};
pub use loader::Loader;
pub use source::{strip_script_wrapper, DataSource, DirSource, EmbeddedSource, MinimalSource, ReparseSource};

/// Raw `{tools, categories, stats}` payload as read from a source.
#[derive(Debug, Clone, Default)]
pub struct RawBundle {
    pub tools: Value,
    pub categories: Value,
    pub stats: Value,
}

impl RawBundle {
    /// Split a combined `{tools, categories, stats}` object. Anything else is
    /// taken to be the tool list itself.
    pub fn from_value(v: Value) -> Self {
        match v {
            Value::Object(mut map) if map.contains_key("tools") => Self {
                tools: map.remove("tools").unwrap_or(Value::Null),
                categories: map.remove("categories").unwrap_or(Value::Null),
                stats: map.remove("stats").unwrap_or(Value::Null),
            },
            other => Self { tools: other, ..Default::default() },
        }
    }
}

/// Normalize a raw payload into a catalog. Category counts and stats totals
/// are recomputed from the tools actually present.
pub fn build_catalog(raw: &RawBundle, source: SourceKind) -> Catalog {
    let tools = Normalizer::shared().tools_from_value(&raw.tools);
    let mut categories = categories_from_value(&raw.categories);
    recalculate_category_counts(&mut categories, &tools);
    let mut stats = stats_from_value(&raw.stats);
    reconcile_stats(&mut stats, &tools, &categories);
    Catalog { epoch: 0, tools, categories, stats, source }
}

/// Readers load the current snapshot lock-free and can watch for swaps.
#[derive(Clone)]
pub struct CatalogStore {
    snap: Arc<ArcSwap<Catalog>>,
    epoch_tx: Arc<watch::Sender<u64>>,
    epoch_rx: watch::Receiver<u64>,
}

impl Default for CatalogStore {
    fn default() -> Self { Self::new() }
}

impl CatalogStore {
    pub fn new() -> Self {
        let (epoch_tx, epoch_rx) = watch::channel(0u64);
        Self { snap: Arc::new(ArcSwap::from_pointee(Catalog::default())), epoch_tx: Arc::new(epoch_tx), epoch_rx }
    }

    pub fn current(&self) -> Arc<Catalog> { self.snap.load_full() }
    pub fn epoch(&self) -> u64 { *self.epoch_rx.borrow() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }

    /// Swap in `catalog` under the next epoch and notify subscribers.
    pub fn publish(&self, mut catalog: Catalog) -> Arc<Catalog> {
        catalog.epoch = self.snap.load().epoch + 1;
        let epoch = catalog.epoch;
        let next = Arc::new(catalog);
        self.snap.store(Arc::clone(&next));
        let _ = self.epoch_tx.send(epoch);
        metrics::gauge!("catalog_epoch", epoch as f64);
        metrics::gauge!("catalog_tools", next.tools.len() as f64);
        info!(epoch, tools = next.tools.len(), categories = next.categories.len(), source = %next.source, "catalog published");
        next
    }
}
