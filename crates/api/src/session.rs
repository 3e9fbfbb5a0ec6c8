//! One interactive session: controller, recovery, toasts, debouncer and the
//! health sweep, wired together.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use toolctx_core::{Settings, ToolCtxError, ToolCtxResult};
use toolctx_recovery::{
    classify, EmptyResultsOutcome, ErrorReport, HealthLoop, HealthReport, Notification, Notifier, NotifyAction, NotifyKind, RecoveryController,
    ToastQueue,
};
use tracing::{info, warn};

use crate::app::AppController;
use crate::debounce::{Debouncer, FILTER_ID, SEARCH_ID};
use crate::handle::AppHandle;
use crate::surface::{RenderSurface, SessionStorage};
use crate::{AppStatus, Page};

pub struct Session {
    app: AppHandle,
    recovery: Arc<RecoveryController>,
    toasts: Arc<ToastQueue>,
    debouncer: Debouncer,
    online_tx: watch::Sender<bool>,
    health: Option<HealthLoop>,
    search_delay: Duration,
    filter_delay: Duration,
    health_initial_delay: Duration,
    health_interval: Duration,
}

impl Session {
    pub fn new(settings: Settings, storage: Arc<dyn SessionStorage>, surface: Arc<dyn RenderSurface>) -> Self {
        let (online_tx, online_rx) = watch::channel(true);
        Self::from_controller(AppController::new(settings, storage, surface, online_rx), online_tx)
    }

    /// Wrap a prepared controller. `online_tx` must feed the controller's connectivity receiver.
    pub fn from_controller(app: AppController, online_tx: watch::Sender<bool>) -> Self {
        let s = app.settings().clone();
        let toasts = Arc::new(ToastQueue::new());
        let recovery = Arc::new(RecoveryController::new(toasts.clone()));
        Self {
            app: AppHandle::new(app),
            recovery,
            toasts,
            debouncer: Debouncer::new(),
            online_tx,
            health: None,
            search_delay: s.search_debounce,
            filter_delay: s.filter_debounce,
            health_initial_delay: s.health_initial_delay,
            health_interval: s.health_interval,
        }
    }

    pub fn app(&self) -> &AppHandle { &self.app }
    pub fn recovery(&self) -> &Arc<RecoveryController> { &self.recovery }
    pub fn toasts(&self) -> &Arc<ToastQueue> { &self.toasts }
    pub fn debouncer(&self) -> &Debouncer { &self.debouncer }

    /// Initial load. A failed chain goes through recovery once before the error is returned.
    pub async fn start(&self) -> ToolCtxResult<usize> {
        let loaded = self.app.lock().await.load().await;
        match loaded {
            Ok(n) => Ok(n),
            Err(e) => {
                if report(&self.app, &self.recovery, ErrorReport::from_error(e.clone()).origin("loader")).await {
                    Ok(self.app.lock().await.records().len())
                } else {
                    Err(e)
                }
            }
        }
    }

    pub fn start_health_loop(&mut self) {
        if self.health.is_some() {
            return;
        }
        let ctx: Arc<dyn toolctx_recovery::RecoveryContext> = Arc::new(self.app.clone());
        self.health = Some(self.recovery.spawn_health_loop(ctx, self.health_initial_delay, self.health_interval));
        info!(first_in_ms = %self.health_initial_delay.as_millis(), every_ms = %self.health_interval.as_millis(), "health loop started");
    }

    pub async fn health_check(&self) -> HealthReport { self.recovery.perform_health_check(&self.app).await }

    /// Route an error to recovery; the user sees at most a short notice.
    pub async fn report_error(&self, err: ToolCtxError, origin: &str) -> bool {
        report(&self.app, &self.recovery, ErrorReport::from_error(err).origin(origin)).await
    }

    /// Search-as-you-type; coalesced with the search debounce.
    pub fn queue_search(&self, q: impl Into<String>) {
        let q = q.into();
        let (app, recovery) = (self.app.clone(), Arc::clone(&self.recovery));
        self.debouncer.queue(SEARCH_ID, self.search_delay, move || async move {
            app.lock().await.set_search(&q);
            apply_and_recover(&app, &recovery, "search").await;
        });
    }

    /// Apply a filter change after the filter debounce.
    pub fn queue_filter<F>(&self, change: F)
    where
        F: FnOnce(&mut AppController) + Send + 'static,
    {
        let (app, recovery) = (self.app.clone(), Arc::clone(&self.recovery));
        self.debouncer.queue(FILTER_ID, self.filter_delay, move || async move {
            change(&mut *app.lock().await);
            apply_and_recover(&app, &recovery, "filter").await;
        });
    }

    /// Apply right away, dropping pending debounced work.
    pub async fn apply_now(&self) -> usize {
        self.debouncer.cancel(SEARCH_ID);
        self.debouncer.cancel(FILTER_ID);
        apply_and_recover(&self.app, &self.recovery, "filter").await
    }

    pub async fn search_now(&self, q: &str) -> usize {
        self.app.lock().await.set_search(q);
        self.apply_now().await
    }

    pub async fn run_action(&self, action: NotifyAction) -> bool { self.recovery.run_action(action, &self.app).await }

    pub async fn page(&self) -> Page { self.app.lock().await.page() }

    pub async fn status(&self) -> AppStatus { self.app.lock().await.status() }

    pub fn set_online(&self, online: bool) {
        self.online_tx.send_replace(online);
    }

    /// Spawn `fut`; an error it returns is reported as an unhandled async failure.
    pub fn spawn_guarded<F>(&self, origin: &'static str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ToolCtxResult<()>> + Send + 'static,
    {
        let (app, recovery) = (self.app.clone(), Arc::clone(&self.recovery));
        tokio::spawn(async move {
            if let Err(e) = fut.await {
                report(&app, &recovery, ErrorReport::from_error(e).origin(origin).unhandled()).await;
            }
        })
    }

    pub async fn shutdown(mut self) {
        self.debouncer.cancel_all();
        if let Some(h) = self.health.take() {
            h.stop().await;
        }
        self.app.lock().await.shutdown();
        info!("session closed");
    }
}

async fn report(app: &AppHandle, recovery: &RecoveryController, report: ErrorReport) -> bool {
    let class = classify(&report);
    if recovery.handle_error(&report, app).await {
        return true;
    }
    if let Some(class) = class {
        warn!(class = %class, message = %report.message, "recovery did not resolve error");
        recovery.notifier().notify(
            Notification::new(NotifyKind::Error, format!("Something went wrong with {}.", class.capability()))
                .with_actions(&[NotifyAction::ResetAllFilters]),
        );
    }
    false
}

/// Apply filters; route failures to recovery and retry once if it succeeds.
/// Empty results go to the throttled empty-results check.
async fn apply_and_recover(app: &AppHandle, recovery: &RecoveryController, origin: &str) -> usize {
    let applied = app.lock().await.apply_filters().await;
    let n = match applied {
        Ok(n) => n,
        Err(e) => {
            let recovered = report(app, recovery, ErrorReport::from_error(e).origin(origin)).await;
            let retried = if recovered { app.lock().await.apply_filters().await.ok() } else { None };
            match retried {
                Some(n) => n,
                None => app.lock().await.filtered_ids().len(),
            }
        }
    };
    if n == 0 {
        if let EmptyResultsOutcome::Reloaded(ok) = recovery.handle_empty_results(app).await {
            info!(recovered = ok, "empty catalog reloaded");
        }
    }
    n
}
