//! Ordered data-source chain. The first source yielding a non-empty tool list wins.

use std::sync::Arc;
use std::time::Instant;

use toolctx_core::{Catalog, Settings, SourceKind, ToolCtxError, ToolCtxResult};
use tracing::{info, warn};

use crate::fetch::FetchPolicy;
use crate::source::{DataSource, DirSource, EmbeddedSource, MinimalSource, ReparseSource};
use crate::build_catalog;

#[derive(Clone)]
pub struct Loader {
    sources: Vec<Arc<dyn DataSource>>,
}

impl Loader {
    /// Data directory, re-parse, embedded, minimal.
    pub fn from_settings(s: &Settings) -> Self {
        let policy = FetchPolicy::from_settings(s);
        Self::with_sources(vec![
            Arc::new(DirSource::new(s.data_dir.clone(), policy)),
            // the re-parse pass runs after the primary already retried; one attempt is enough
            Arc::new(ReparseSource::new(s.data_dir.clone(), FetchPolicy::once(s.fetch_timeout))),
            Arc::new(EmbeddedSource),
            Arc::new(MinimalSource),
        ])
    }

    pub fn with_sources(sources: Vec<Arc<dyn DataSource>>) -> Self { Self { sources } }

    pub fn kinds(&self) -> Vec<SourceKind> { self.sources.iter().map(|s| s.kind()).collect() }

    /// Walk the chain in order. `DataUnavailable` only after every source failed or came back empty.
    pub async fn load_chain(&self) -> ToolCtxResult<Catalog> { self.load_from(0).await }

    /// Run the chain starting at the first source of `kind`.
    pub async fn load_starting_at(&self, kind: SourceKind) -> ToolCtxResult<Catalog> {
        match self.sources.iter().position(|s| s.kind() == kind) {
            Some(i) => self.load_from(i).await,
            None => Err(ToolCtxError::DataUnavailable(format!("no {kind} data source configured"))),
        }
    }

    /// Only the source of `kind`, no fallback.
    pub async fn load_only(&self, kind: SourceKind) -> ToolCtxResult<Catalog> {
        let Some(src) = self.sources.iter().find(|s| s.kind() == kind) else {
            return Err(ToolCtxError::DataUnavailable(format!("no {kind} data source configured")));
        };
        self.try_source(src.as_ref()).await.ok_or_else(|| ToolCtxError::DataUnavailable(format!("{kind} source produced no tools")))
    }

    async fn load_from(&self, start: usize) -> ToolCtxResult<Catalog> {
        for src in self.sources.iter().skip(start) {
            if let Some(cat) = self.try_source(src.as_ref()).await {
                return Ok(cat);
            }
        }
        metrics::counter!("catalog_load_exhausted_total", 1u64);
        Err(ToolCtxError::DataUnavailable("every data source failed".into()))
    }

    async fn try_source(&self, src: &dyn DataSource) -> Option<Catalog> {
        let kind = src.kind();
        let t0 = Instant::now();
        match src.fetch().await {
            Ok(raw) => {
                let cat = build_catalog(&raw, kind);
                if cat.tools.is_empty() {
                    warn!(source = %kind, "data source returned no tools; falling back");
                    return None;
                }
                info!(source = %kind, tools = cat.tools.len(), categories = cat.categories.len(), took_ms = %t0.elapsed().as_millis(), "catalog loaded");
                metrics::counter!("catalog_loads_total", 1u64, "source" => kind.to_string());
                metrics::histogram!("catalog_load_ms", t0.elapsed().as_secs_f64() * 1_000.0);
                Some(cat)
            }
            Err(e) => {
                warn!(source = %kind, error = %format!("{e:#}"), "data source failed; falling back");
                None
            }
        }
    }
}
