//! Shared handle to the controller. Recovery handlers reach the app only
//! through this, using the same entry points as user actions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use toolctx_core::{SourceKind, StrategyKind};
use toolctx_recovery::RecoveryContext;
use tracing::debug;

use crate::app::AppController;

#[derive(Clone)]
pub struct AppHandle(Arc<Mutex<AppController>>);

impl AppHandle {
    pub fn new(app: AppController) -> Self { Self(Arc::new(Mutex::new(app))) }

    pub async fn lock(&self) -> MutexGuard<'_, AppController> { self.0.lock().await }
}

#[async_trait::async_trait]
impl RecoveryContext for AppHandle {
    async fn reload_data(&self, from: SourceKind) -> anyhow::Result<usize> { Ok(self.lock().await.load_from(from).await?) }

    async fn drop_worker(&self) -> bool { self.lock().await.drop_worker() }

    async fn rebuild_search_next_tier(&self) -> anyhow::Result<StrategyKind> { Ok(self.lock().await.demote_search()?) }

    async fn degrade_search(&self) -> anyhow::Result<()> {
        self.lock().await.degrade_search();
        Ok(())
    }

    async fn search_self_test(&self) -> bool { self.lock().await.search_self_test().await }

    async fn reset_filters(&self) { self.lock().await.reset_filters() }

    async fn clear_derived_caches(&self) { self.lock().await.clear_derived_caches() }

    async fn reapply_filters(&self) -> anyhow::Result<usize> { Ok(self.lock().await.apply_filters().await?) }

    async fn show_all(&self) -> usize { self.lock().await.show_all() }

    async fn filters_active(&self) -> bool { self.lock().await.state().has_active_filters() }

    async fn filter_state_valid(&self) -> bool { self.lock().await.check_state().is_ok() }

    async fn missing_anchors(&self) -> Vec<String> { self.lock().await.surface().missing_anchors() }

    async fn recreate_anchor(&self, id: &str) -> bool { self.lock().await.surface().create_anchor(id) }

    async fn storage_keys(&self) -> Vec<String> { self.lock().await.storage().keys() }

    async fn storage_remove(&self, key: &str) { self.lock().await.storage().remove(key) }

    async fn storage_probe(&self) -> bool { self.lock().await.storage().probe() }

    async fn is_online(&self) -> bool {
        let rx = self.lock().await.online();
        let online = *rx.borrow();
        online
    }

    /// Waits without holding the controller lock.
    async fn wait_online(&self, timeout: Duration) -> bool {
        let mut rx = self.lock().await.online();
        let wait = async {
            loop {
                if *rx.borrow_and_update() {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(online) => online,
            Err(_) => {
                debug!(waited_ms = %timeout.as_millis(), "still offline");
                false
            }
        }
    }

    async fn tool_count(&self) -> usize { self.lock().await.records().len() }
}
