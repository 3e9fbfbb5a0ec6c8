use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use toolctx_core::{SourceKind, StrategyKind};
use toolctx_recovery::{
    EmptyResultsOutcome, ErrorReport, FailureClass, NotifyAction, NotifyKind, Outcome, RecoveryContext, RecoveryController, RecoveryHandler, ToastQueue,
};

#[derive(Default)]
struct State {
    tools: usize,
    filters_active: bool,
    filter_valid: bool,
    reapply_fails: bool,
    resets: u32,
    show_all_calls: u32,
    missing: Vec<String>,
    keys: Vec<String>,
    storage_ok: bool,
    online: bool,
    probes: u32,
    reloads: Vec<SourceKind>,
}

struct Mock(Mutex<State>);

impl Mock {
    fn healthy() -> Self {
        Self(Mutex::new(State { tools: 10, filter_valid: true, storage_ok: true, online: true, ..Default::default() }))
    }
    fn with(f: impl FnOnce(&mut State)) -> Self {
        let m = Self::healthy();
        f(&mut m.0.lock().unwrap());
        m
    }
    fn st(&self) -> std::sync::MutexGuard<'_, State> { self.0.lock().unwrap() }
}

#[async_trait::async_trait]
impl RecoveryContext for Mock {
    async fn reload_data(&self, from: SourceKind) -> anyhow::Result<usize> {
        let mut s = self.st();
        s.reloads.push(from);
        s.tools = 3;
        Ok(3)
    }
    async fn drop_worker(&self) -> bool { false }
    async fn rebuild_search_next_tier(&self) -> anyhow::Result<StrategyKind> { Ok(StrategyKind::Fuzzy) }
    async fn degrade_search(&self) -> anyhow::Result<()> { Ok(()) }
    async fn search_self_test(&self) -> bool { true }
    async fn reset_filters(&self) {
        let mut s = self.st();
        s.resets += 1;
        s.filters_active = false;
        s.filter_valid = true;
    }
    async fn clear_derived_caches(&self) {}
    async fn reapply_filters(&self) -> anyhow::Result<usize> {
        let s = self.st();
        if s.reapply_fails { anyhow::bail!("filter index gone") } else { Ok(s.tools) }
    }
    async fn show_all(&self) -> usize {
        let mut s = self.st();
        s.show_all_calls += 1;
        s.tools
    }
    async fn filters_active(&self) -> bool { self.st().filters_active }
    async fn filter_state_valid(&self) -> bool { self.st().filter_valid }
    async fn missing_anchors(&self) -> Vec<String> { self.st().missing.clone() }
    async fn recreate_anchor(&self, id: &str) -> bool {
        let mut s = self.st();
        s.missing.retain(|m| m != id);
        true
    }
    async fn storage_keys(&self) -> Vec<String> { self.st().keys.clone() }
    async fn storage_remove(&self, key: &str) { self.st().keys.retain(|k| k != key) }
    async fn storage_probe(&self) -> bool {
        let mut s = self.st();
        s.probes += 1;
        s.storage_ok
    }
    async fn is_online(&self) -> bool { self.st().online }
    async fn wait_online(&self, _timeout: Duration) -> bool { false }
    async fn tool_count(&self) -> usize { self.st().tools }
}

struct AlwaysFails(Arc<AtomicU32>);

#[async_trait::async_trait]
impl RecoveryHandler for AlwaysFails {
    async fn recover(&self, _ctx: &dyn RecoveryContext) -> anyhow::Result<bool> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }
}

#[derive(Default)]
struct Gated {
    calls: AtomicU32,
    release: tokio::sync::Notify,
}

#[async_trait::async_trait]
impl RecoveryHandler for Gated {
    async fn recover(&self, _ctx: &dyn RecoveryContext) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.release.notified().await;
        Ok(true)
    }
}

fn controller() -> (Arc<ToastQueue>, RecoveryController) {
    let toasts = Arc::new(ToastQueue::new());
    (Arc::clone(&toasts), RecoveryController::new(toasts))
}

#[tokio::test]
async fn budget_of_three_then_handler_is_skipped() {
    let calls = Arc::new(AtomicU32::new(0));
    let (_, ctl) = controller();
    let ctl = ctl.with_handler(FailureClass::Network, Arc::new(AlwaysFails(Arc::clone(&calls))));
    let ctx = Mock::healthy();
    let report = ErrorReport::new("network unreachable");
    for _ in 0..3 {
        assert!(!ctl.handle_error(&report, &ctx).await);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(!ctl.handle_error(&report, &ctx).await);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(ctl.journal().last().map(|e| e.outcome.clone()), Some(Outcome::Exhausted));

    ctl.reset_attempt_counters();
    assert_eq!(ctl.attempts(FailureClass::Network), 0);
    assert!(!ctl.handle_error(&report, &ctx).await);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn success_clears_counter_and_notifies() {
    let (toasts, ctl) = controller();
    let ctx = Mock::with(|s| s.tools = 0);
    assert!(ctl.handle_error(&ErrorReport::new("boom").unhandled(), &ctx).await);
    assert_eq!(ctl.attempts(FailureClass::DataLoad), 0);
    assert_eq!(ctx.st().reloads, vec![SourceKind::Primary]);
    let notes = toasts.drain();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NotifyKind::Success);
    assert!(notes[0].message.contains("data loading"));
}

#[tokio::test]
async fn filter_reset_falls_back_to_show_all() {
    let (_, ctl) = controller();
    let ctx = Mock::with(|s| {
        s.filters_active = true;
        s.reapply_fails = true;
    });
    assert!(ctl.attempt_recovery(FailureClass::Filter, toolctx_recovery::Trigger::Error, &ctx).await);
    let s = ctx.st();
    assert_eq!(s.resets, 1);
    assert_eq!(s.show_all_calls, 1);
    assert!(!s.filters_active);
}

#[tokio::test]
async fn storage_cleanup_removes_only_app_keys() {
    let (_, ctl) = controller();
    let ctx = Mock::with(|s| s.keys = vec!["toolctx-history".into(), "theme".into(), "other-app".into()]);
    assert!(ctl.attempt_recovery(FailureClass::StorageCorruption, toolctx_recovery::Trigger::User, &ctx).await);
    assert_eq!(ctx.st().keys, vec!["other-app".to_string()]);
}

#[tokio::test]
async fn offline_network_waits_and_reports_failure() {
    let (_, ctl) = controller();
    let ctx = Mock::with(|s| s.online = false);
    assert!(!ctl.handle_error(&ErrorReport::new("fetch failed"), &ctx).await);
    assert_eq!(ctl.attempts(FailureClass::Network), 1);
    assert!(ctx.st().reloads.is_empty());
}

#[tokio::test]
async fn health_check_recovers_silently() {
    let (toasts, ctl) = controller();
    let ctx = Mock::with(|s| {
        s.tools = 0;
        s.missing = vec!["tools-grid".into()];
        s.filter_valid = false;
    });
    let report = ctl.perform_health_check(&ctx).await;
    assert_eq!(report.issues, vec![FailureClass::DataLoad, FailureClass::RenderAnchor, FailureClass::FilterStateCorruption]);
    assert!(report.recovered.iter().all(|(_, ok)| *ok));
    assert!(toasts.is_empty());
    assert!(ctl.perform_health_check(&ctx).await.healthy());
}

#[tokio::test]
async fn empty_results_are_throttled_and_respect_filters() {
    let (toasts, ctl) = controller();
    let ctx = Mock::healthy();
    let t0 = Instant::now();
    assert_eq!(ctl.handle_empty_results_at(&ctx, t0).await, EmptyResultsOutcome::Suggested);
    let notes = toasts.drain();
    assert_eq!(notes[0].kind, NotifyKind::Suggestion);
    assert_eq!(notes[0].actions, vec![NotifyAction::ResetAllFilters, NotifyAction::ViewAllTools]);

    assert_eq!(ctl.handle_empty_results_at(&ctx, t0 + Duration::from_secs(5)).await, EmptyResultsOutcome::Throttled);
    ctx.st().filters_active = true;
    assert_eq!(ctl.handle_empty_results_at(&ctx, t0 + Duration::from_secs(11)).await, EmptyResultsOutcome::FiltersActive);
    assert!(toasts.is_empty());

    let empty = Mock::with(|s| s.tools = 0);
    assert_eq!(ctl.handle_empty_results_at(&empty, t0 + Duration::from_secs(30)).await, EmptyResultsOutcome::Reloaded(true));
}

#[tokio::test]
async fn filtered_empty_results_do_not_start_the_throttle() {
    let (toasts, ctl) = controller();
    let ctx = Mock::with(|s| s.filters_active = true);
    let t0 = Instant::now();
    assert_eq!(ctl.handle_empty_results_at(&ctx, t0).await, EmptyResultsOutcome::FiltersActive);
    ctx.st().filters_active = false;
    assert_eq!(ctl.handle_empty_results_at(&ctx, t0 + Duration::from_secs(2)).await, EmptyResultsOutcome::Suggested);
    assert_eq!(toasts.drain().len(), 1);
    assert_eq!(ctl.handle_empty_results_at(&ctx, t0 + Duration::from_secs(4)).await, EmptyResultsOutcome::Throttled);
}

#[tokio::test]
async fn concurrent_recovery_of_one_class_runs_the_handler_once() {
    let gate = Arc::new(Gated::default());
    let (_, ctl) = controller();
    let ctl = ctl.with_handler(FailureClass::SearchWorker, gate.clone());
    let ctx = Mock::healthy();
    let first = ctl.attempt_recovery(FailureClass::SearchWorker, toolctx_recovery::Trigger::Error, &ctx);
    let second = async {
        tokio::task::yield_now().await;
        let ran = ctl.attempt_recovery(FailureClass::SearchWorker, toolctx_recovery::Trigger::HealthCheck, &ctx).await;
        gate.release.notify_one();
        ran
    };
    let (first, second) = tokio::join!(first, second);
    assert!(first);
    assert!(!second);
    assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
    assert_eq!(ctl.attempts(FailureClass::SearchWorker), 0);

    // the mark is cleared once the handler returns
    gate.release.notify_one();
    assert!(ctl.attempt_recovery(FailureClass::SearchWorker, toolctx_recovery::Trigger::User, &ctx).await);
    assert_eq!(gate.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn actions_reset_filters() {
    let (_, ctl) = controller();
    let ctx = Mock::with(|s| s.filters_active = true);
    assert!(ctl.run_action(NotifyAction::ViewAllTools, &ctx).await);
    assert_eq!(ctx.st().show_all_calls, 1);
    assert!(ctl.run_action(NotifyAction::ResetAllFilters, &ctx).await);
    assert_eq!(ctx.st().resets, 2);
}

#[tokio::test(start_paused = true)]
async fn health_loop_schedule() {
    let (_, ctl) = controller();
    let ctl = Arc::new(ctl);
    let ctx = Arc::new(Mock::healthy());
    let sweep = ctl.spawn_health_loop(ctx.clone(), Duration::from_secs(5), Duration::from_secs(30));
    tokio::time::sleep(Duration::from_millis(4_900)).await;
    assert_eq!(ctx.st().probes, 0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(ctx.st().probes, 1);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(ctx.st().probes, 2);
    sweep.stop().await;
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(ctx.st().probes, 2);
}
