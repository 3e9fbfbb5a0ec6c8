//! Periodic session sweep: detect problems and recover them quietly.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{FailureClass, RecoveryContext, RecoveryController, Trigger};

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub issues: Vec<FailureClass>,
    /// Outcome per issue, in detection order.
    pub recovered: Vec<(FailureClass, bool)>,
}

impl HealthReport {
    pub fn healthy(&self) -> bool { self.issues.is_empty() }
}

impl RecoveryController {
    /// Probe data, anchors, search, storage and filter state; attempt
    /// recovery for each issue found. Successes raise no notification.
    pub async fn perform_health_check(&self, ctx: &dyn RecoveryContext) -> HealthReport {
        let mut issues = Vec::new();
        if ctx.tool_count().await == 0 {
            issues.push(FailureClass::DataLoad);
        }
        if !ctx.missing_anchors().await.is_empty() {
            issues.push(FailureClass::RenderAnchor);
        }
        if !ctx.search_self_test().await {
            issues.push(FailureClass::SearchWorker);
        }
        if !ctx.storage_probe().await {
            issues.push(FailureClass::StorageCorruption);
        }
        if !ctx.filter_state_valid().await {
            issues.push(FailureClass::FilterStateCorruption);
        }
        let mut recovered = Vec::with_capacity(issues.len());
        for class in &issues {
            recovered.push((*class, self.attempt_recovery(*class, Trigger::HealthCheck, ctx).await));
        }
        metrics::gauge!("health_issues", issues.len() as f64);
        if issues.is_empty() {
            debug!("health check clean");
        } else {
            warn!(issues = ?issues, "health check found issues");
        }
        HealthReport { issues, recovered }
    }

    /// First sweep after `initial_delay`, then every `interval` until stopped.
    pub fn spawn_health_loop(self: &Arc<Self>, ctx: Arc<dyn RecoveryContext>, initial_delay: Duration, interval: Duration) -> HealthLoop {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let ctl = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut wait = initial_delay;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = stop_rx.changed() => break,
                }
                ctl.perform_health_check(ctx.as_ref()).await;
                wait = interval;
            }
            info!("health loop stopped");
        });
        HealthLoop { stop_tx, handle }
    }
}

pub struct HealthLoop {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HealthLoop {
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }

    pub fn is_finished(&self) -> bool { self.handle.is_finished() }
}
