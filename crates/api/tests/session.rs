use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::watch;
use toolctx_api::{AppController, MemoryStorage, MemorySurface, RenderSurface, Session};
use toolctx_catalog::{DataSource, EmbeddedSource, Loader, RawBundle};
use toolctx_core::{Settings, SourceKind, ToolCtxError};
use toolctx_recovery::{FailureClass, NotifyAction, NotifyKind};

struct Fixed(Value);

#[async_trait::async_trait]
impl DataSource for Fixed {
    fn kind(&self) -> SourceKind { SourceKind::Primary }
    async fn fetch(&self) -> anyhow::Result<RawBundle> { Ok(RawBundle::from_value(self.0.clone())) }
}

struct Unreachable;

#[async_trait::async_trait]
impl DataSource for Unreachable {
    fn kind(&self) -> SourceKind { SourceKind::Primary }
    async fn fetch(&self) -> anyhow::Result<RawBundle> { anyhow::bail!("connection refused") }
}

fn tools() -> Value {
    json!([
        { "name": "Docker", "description": "Container platform", "category": "Cloud & Containers", "platforms": ["Linux"], "difficulty": 4 },
        { "name": "git", "description": "Distributed version control", "category": "Development Tools", "platforms": ["Linux"], "difficulty": 3 },
        { "name": "jq", "description": "Command-line JSON processor", "category": "Data Processing", "platforms": ["Linux"], "difficulty": 2 }
    ])
}

struct Rig {
    session: Session,
    storage: Arc<MemoryStorage>,
    surface: Arc<MemorySurface>,
}

fn rig_with(settings: Settings, loader: Loader) -> Rig {
    let storage = Arc::new(MemoryStorage::new());
    let surface = Arc::new(MemorySurface::new());
    let (tx, rx) = watch::channel(true);
    let app = AppController::new(settings, storage.clone(), surface.clone(), rx).with_loader(loader);
    Rig { session: Session::from_controller(app, tx), storage, surface }
}

fn rig() -> Rig { rig_with(Settings::default(), Loader::with_sources(vec![Arc::new(Fixed(tools()))])) }

#[tokio::test(start_paused = true)]
async fn typing_burst_applies_only_the_last_query() {
    let r = rig();
    assert_eq!(r.session.start().await.unwrap(), 3);
    for q in ["j", "js", "jso", "json", "docker"] {
        r.session.queue_search(q);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(r.session.debouncer().is_pending(toolctx_api::SEARCH_ID));
    tokio::time::sleep(Duration::from_millis(400)).await;
    let app = r.session.app().lock().await;
    assert_eq!(app.state().search, "docker");
    assert_eq!(app.history(), ["docker".to_string()]);
    assert_eq!(app.filtered_ids().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn queued_filter_change_applies_after_delay() {
    let r = rig();
    r.session.start().await.unwrap();
    r.session.queue_filter(|app| app.set_difficulty("2"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(r.session.status().await.filtered_count, 3);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(r.session.status().await.filtered_count, 1);
}

#[tokio::test]
async fn empty_search_results_stay_quiet() {
    let r = rig();
    r.session.start().await.unwrap();
    assert_eq!(r.session.search_now("kubernetes").await, 0);
    // an active query explains the empty list
    assert!(r.session.toasts().is_empty());

    assert!(r.session.run_action(NotifyAction::ViewAllTools).await);
    let st = r.session.status().await;
    assert_eq!(st.filtered_count, 3);
    assert!(!st.filters_active);
}

#[tokio::test]
async fn worker_failure_falls_back_in_process() {
    let r = rig_with(Settings { use_worker: true, ..Settings::default() }, Loader::with_sources(vec![Arc::new(Fixed(tools()))]));
    r.session.start().await.unwrap();
    assert!(r.session.status().await.worker);
    assert!(r.session.report_error(ToolCtxError::QueryFailure("search worker timed out".into()), "search").await);
    let st = r.session.status().await;
    assert!(!st.worker);
    assert!(st.ready);
    assert_eq!(r.session.search_now("json").await, 1);
    let journal = r.session.recovery().journal();
    assert_eq!(journal.last().map(|e| e.class), Some(FailureClass::SearchWorker));
}

#[tokio::test]
async fn start_falls_back_to_embedded_data() {
    let r = rig_with(Settings::default(), Loader::with_sources(vec![Arc::new(Unreachable), Arc::new(EmbeddedSource)]));
    let n = r.session.start().await.unwrap();
    assert!(n > 0);
    assert_eq!(r.session.status().await.source, SourceKind::Embedded);
}

#[tokio::test]
async fn exhausted_chain_is_reported_not_thrown_at_the_user() {
    let r = rig_with(Settings::default(), Loader::with_sources(vec![Arc::new(Unreachable)]));
    assert!(matches!(r.session.start().await, Err(ToolCtxError::DataUnavailable(_))));
    let notes = r.session.toasts().drain();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NotifyKind::Error);
    assert!(notes[0].message.contains("tool data"));
    assert!(!notes[0].message.contains("connection refused"));
}

#[tokio::test]
async fn health_check_repairs_anchors_and_reports_storage() {
    let r = rig();
    r.session.start().await.unwrap();
    assert!(r.session.health_check().await.healthy());

    r.surface.remove_anchor("tools-grid");
    let report = r.session.health_check().await;
    assert_eq!(report.issues, vec![FailureClass::RenderAnchor]);
    assert!(r.surface.has_anchor("tools-grid"));

    r.storage.set_broken(true);
    let report = r.session.health_check().await;
    assert_eq!(report.recovered, vec![(FailureClass::StorageCorruption, false)]);
    r.storage.set_broken(false);
    assert!(r.session.health_check().await.healthy());
    // health-check successes stay quiet
    assert!(r.session.toasts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn network_recovery_waits_for_connectivity() {
    let r = rig();
    r.session.start().await.unwrap();
    r.session.set_online(false);
    let (recovered, _) = tokio::join!(r.session.report_error(ToolCtxError::ResourceUnavailable("network fetch failed".into()), "loader"), async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        r.session.set_online(true);
    });
    assert!(recovered);
}

#[tokio::test(start_paused = true)]
async fn unhandled_task_errors_reach_recovery() {
    let r = rig();
    r.session.start().await.unwrap();
    r.session.app().lock().await.set_difficulty("0");
    let task = r.session.spawn_guarded("filter", async { Err(ToolCtxError::StateCorruption("difficulty out of range".into())) });
    task.await.unwrap();
    let app = r.session.app().lock().await;
    assert_eq!(app.state().difficulty, "");
    assert_eq!(app.filtered_ids().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn health_loop_runs_until_shutdown() {
    let mut r = rig();
    r.session.start().await.unwrap();
    r.surface.remove_anchor("category-filter");
    r.session.start_health_loop();
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(r.surface.has_anchor("category-filter"));
    let surface = r.surface.clone();
    r.session.shutdown().await;
    surface.remove_anchor("category-filter");
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(!surface.has_anchor("category-filter"));
}
