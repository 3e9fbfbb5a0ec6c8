//! Default recovery actions, one per failure class.

use std::sync::Arc;
use std::time::Duration;

use toolctx_core::SourceKind;
use tracing::{debug, info, warn};

use crate::{FailureClass, RecoveryContext, RecoveryHandler};

/// Session-storage keys owned by the app.
pub const STORAGE_PREFIX: &str = "toolctx-";
pub const THEME_KEY: &str = "theme";
pub const ONLINE_WAIT: Duration = Duration::from_secs(30);

pub fn is_app_key(key: &str) -> bool { key.starts_with(STORAGE_PREFIX) || key == THEME_KEY }

/// Reload through the whole source chain, strongest first.
pub struct DataReload;

#[async_trait::async_trait]
impl RecoveryHandler for DataReload {
    async fn recover(&self, ctx: &dyn RecoveryContext) -> anyhow::Result<bool> {
        let n = ctx.reload_data(SourceKind::Primary).await?;
        Ok(n > 0)
    }
}

/// Drop the worker if one is running; otherwise rebuild on the next tier,
/// ending at the scan.
pub struct SearchFallback;

#[async_trait::async_trait]
impl RecoveryHandler for SearchFallback {
    async fn recover(&self, ctx: &dyn RecoveryContext) -> anyhow::Result<bool> {
        if ctx.drop_worker().await && ctx.search_self_test().await {
            info!("search worker replaced by in-process engine");
            return Ok(true);
        }
        match ctx.rebuild_search_next_tier().await {
            Ok(kind) => {
                info!(strategy = %kind, "search rebuilt on weaker tier");
                Ok(true)
            }
            Err(e) => {
                debug!(error = %e, "no weaker tier; degrading search");
                ctx.degrade_search().await?;
                Ok(true)
            }
        }
    }
}

/// Clear every filter and show the full list. Counts as success once the
/// state is reset, even if reapplying fails.
pub struct FilterReset;

#[async_trait::async_trait]
impl RecoveryHandler for FilterReset {
    async fn recover(&self, ctx: &dyn RecoveryContext) -> anyhow::Result<bool> {
        ctx.reset_filters().await;
        ctx.clear_derived_caches().await;
        if let Err(e) = ctx.reapply_filters().await {
            warn!(error = %e, "reapplying filters failed; showing all tools");
            ctx.show_all().await;
        }
        Ok(true)
    }
}

pub struct AnchorRepair;

#[async_trait::async_trait]
impl RecoveryHandler for AnchorRepair {
    async fn recover(&self, ctx: &dyn RecoveryContext) -> anyhow::Result<bool> {
        let mut recreated = 0usize;
        for id in ctx.missing_anchors().await {
            if ctx.recreate_anchor(&id).await {
                recreated += 1;
            }
        }
        Ok(recreated > 0)
    }
}

/// Remove the app's keys, then check storage round-trips.
pub struct StorageCleanup;

#[async_trait::async_trait]
impl RecoveryHandler for StorageCleanup {
    async fn recover(&self, ctx: &dyn RecoveryContext) -> anyhow::Result<bool> {
        for key in ctx.storage_keys().await.into_iter().filter(|k| is_app_key(k)) {
            ctx.storage_remove(&key).await;
        }
        Ok(ctx.storage_probe().await)
    }
}

pub struct NetworkWait;

#[async_trait::async_trait]
impl RecoveryHandler for NetworkWait {
    async fn recover(&self, ctx: &dyn RecoveryContext) -> anyhow::Result<bool> {
        if !ctx.is_online().await {
            return Ok(ctx.wait_online(ONLINE_WAIT).await);
        }
        Ok(ctx.reload_data(SourceKind::Primary).await.is_ok())
    }
}

pub fn default_handler(class: FailureClass) -> Arc<dyn RecoveryHandler> {
    match class {
        FailureClass::DataLoad => Arc::new(DataReload),
        FailureClass::SearchWorker => Arc::new(SearchFallback),
        FailureClass::Filter | FailureClass::FilterStateCorruption => Arc::new(FilterReset),
        FailureClass::RenderAnchor => Arc::new(AnchorRepair),
        FailureClass::StorageCorruption => Arc::new(StorageCleanup),
        FailureClass::Network => Arc::new(NetworkWait),
    }
}
