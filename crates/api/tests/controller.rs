use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::watch;
use toolctx_api::{AppController, MemoryStorage, MemorySurface, SessionStorage, HISTORY_CAP, HISTORY_KEY};
use toolctx_catalog::{build_catalog, DataSource, Loader, RawBundle};
use toolctx_core::{Settings, SortBy, SourceKind, StrategyKind, ToolCtxError};
use toolctx_recovery::{FailureClass, RecoveryController, ToastQueue, Trigger};

struct Fixed(Value);

#[async_trait::async_trait]
impl DataSource for Fixed {
    fn kind(&self) -> SourceKind { SourceKind::Primary }
    async fn fetch(&self) -> anyhow::Result<RawBundle> { Ok(RawBundle::from_value(self.0.clone())) }
}

fn bundle() -> Value {
    json!({
        "tools": [
            { "name": "Docker", "description": "Container platform for building and running applications", "category": "Cloud & Containers",
              "platforms": ["macOS", "Linux", "Windows"], "installation": "homebrew", "difficulty": 4, "tags": ["containers"] },
            { "name": "git", "description": "Distributed version control system", "category": "Development Tools",
              "platforms": ["mac", "linux", "windows"], "installation": "brew install git", "difficulty": 3 },
            { "name": "htop", "description": "Interactive process viewer", "category": "System Monitoring",
              "platforms": ["linux"], "installation": "apt", "difficulty": 2 },
            { "name": "jq", "description": "Lightweight command-line JSON processor", "category": "Data Processing",
              "platforms": ["linux", "macOS", "windows"], "installation": "brew", "difficulty": 2 },
            { "name": "ripgrep", "description": "Recursively search directories for a regex pattern", "category": "Text Processing",
              "platforms": ["Linux", "macOS", "Windows"], "installation": "cargo", "difficulty": 2 },
            { "name": "curl", "description": "Transfer data with URLs", "category": "Networking",
              "platforms": ["linux", "windows"], "installation": "built-in", "difficulty": 1 }
        ],
        "categories": [
            { "id": "cloud", "name": "Cloud & Containers" },
            { "id": "dev", "name": "Development Tools" },
            { "id": "monitoring", "name": "System Monitoring" },
            { "id": "data", "name": "Data Processing" },
            { "id": "text", "name": "Text Processing" },
            { "id": "net", "name": "Networking" }
        ]
    })
}

fn settings() -> Settings { Settings { items_per_page: 2, ..Settings::default() } }

fn controller_with(settings: Settings, storage: Arc<MemoryStorage>) -> AppController {
    let (_tx, rx) = watch::channel(true);
    AppController::new(settings, storage, Arc::new(MemorySurface::new()), rx).with_loader(Loader::with_sources(vec![Arc::new(Fixed(bundle()))]))
}

async fn loaded() -> AppController {
    let mut app = controller_with(settings(), Arc::new(MemoryStorage::new()));
    assert_eq!(app.load().await.unwrap(), 6);
    app
}

fn names(app: &AppController) -> Vec<String> { app.filtered_ids().iter().map(|d| app.records()[*d as usize].name.clone()).collect() }

#[tokio::test]
async fn load_builds_indexes_once_and_lists_everything() {
    let app = loaded().await;
    assert_eq!(app.index_builds(), 1);
    let st = app.status();
    assert!(st.ready);
    assert_eq!(st.strategy, Some(StrategyKind::FullText));
    assert_eq!((st.tool_count, st.filtered_count), (6, 6));
    assert_eq!(st.source, SourceKind::Primary);
    assert_eq!(st.epoch, 1);
    assert!(!st.filters_active);
    assert_eq!(names(&app), vec!["curl", "Docker", "git", "htop", "jq", "ripgrep"]);
}

#[tokio::test]
async fn filters_intersect_with_normalized_values() {
    let mut app = loaded().await;
    app.set_platform("osx");
    assert_eq!(app.apply_filters().await.unwrap(), 4);
    assert_eq!(names(&app), vec!["Docker", "git", "jq", "ripgrep"]);

    app.set_installation("brew");
    app.apply_filters().await.unwrap();
    assert_eq!(names(&app), vec!["Docker", "git", "jq"]);

    app.set_difficulty("2");
    app.apply_filters().await.unwrap();
    assert_eq!(names(&app), vec!["jq"]);

    app.reset_filters();
    app.set_category("System Monitoring");
    app.apply_filters().await.unwrap();
    assert_eq!(names(&app), vec!["htop"]);

    app.set_category("all");
    assert_eq!(app.apply_filters().await.unwrap(), 6);
}

#[tokio::test]
async fn search_intersects_with_filters() {
    let mut app = loaded().await;
    app.set_search("json");
    app.apply_filters().await.unwrap();
    assert_eq!(names(&app), vec!["jq"]);
    assert!(app.status().filters_active);

    app.set_category("Networking");
    assert_eq!(app.apply_filters().await.unwrap(), 0);

    // one character does not search
    app.reset_filters();
    app.set_search("j");
    assert_eq!(app.apply_filters().await.unwrap(), 6);
}

#[tokio::test]
async fn sort_orders() {
    let mut app = loaded().await;
    app.set_sort(SortBy::NameDesc);
    app.apply_filters().await.unwrap();
    assert_eq!(names(&app), vec!["ripgrep", "jq", "htop", "git", "Docker", "curl"]);

    app.set_sort(SortBy::Difficulty);
    app.apply_filters().await.unwrap();
    assert_eq!(names(&app), vec!["curl", "htop", "jq", "ripgrep", "git", "Docker"]);

    app.set_sort(SortBy::Category);
    app.apply_filters().await.unwrap();
    assert_eq!(names(&app), vec!["Docker", "jq", "git", "curl", "htop", "ripgrep"]);
}

#[tokio::test]
async fn pages_grow_until_exhausted() {
    let mut app = loaded().await;
    let p = app.page();
    assert_eq!(p.items.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), vec!["curl", "Docker"]);
    assert_eq!((p.page, p.total, p.has_more), (1, 6, true));

    assert!(app.load_more());
    assert_eq!(app.page().items.len(), 4);
    assert!(app.load_more());
    let p = app.page();
    assert_eq!((p.items.len(), p.page, p.has_more), (6, 3, false));
    assert!(!app.load_more());

    app.set_sort(SortBy::Name);
    assert_eq!(app.state().current_page, 1);
    assert!(app.load_more());
    app.apply_filters().await.unwrap();
    assert_eq!(app.page().page, 1);
}

#[tokio::test]
async fn invalid_state_is_refused() {
    let mut app = loaded().await;
    app.set_difficulty("9");
    assert!(matches!(app.apply_filters().await, Err(ToolCtxError::StateCorruption(_))));
    assert!(app.check_state().is_err());
    assert_eq!(app.filtered_ids().len(), 6);
}

#[tokio::test]
async fn filter_recovery_resets_everything() {
    let app = loaded().await;
    let handle = toolctx_api::AppHandle::new(app);
    {
        let mut app = handle.lock().await;
        app.set_search("json");
        app.set_platform("Linux");
        app.apply_filters().await.unwrap();
        let mut st = app.state().clone();
        st.current_page = 3;
        st.difficulty = "banana".into();
        app.set_state(st);
    }
    let ctl = RecoveryController::new(Arc::new(ToastQueue::new()));
    assert!(ctl.attempt_recovery(FailureClass::FilterStateCorruption, Trigger::Error, &handle).await);
    let app = handle.lock().await;
    assert_eq!(*app.state(), toolctx_core::FilterState::default());
    assert_eq!(app.state().current_page, 1);
    let mut ids = app.filtered_ids().to_vec();
    ids.sort_unstable();
    assert_eq!(ids, (0..6).collect::<Vec<u32>>());
}

#[tokio::test]
async fn new_catalog_invalidates_cached_results() {
    let mut app = loaded().await;
    app.set_category("Networking");
    assert_eq!(app.apply_filters().await.unwrap(), 1);
    let next = build_catalog(
        &RawBundle::from_value(json!([
            { "name": "nc", "description": "netcat", "category": "Networking" },
            { "name": "wget", "description": "downloader", "category": "Networking" }
        ])),
        SourceKind::Embedded,
    );
    assert_eq!(app.install(next).await.unwrap(), 2);
    assert_eq!(names(&app), vec!["nc", "wget"]);
    assert_eq!(app.index_builds(), 2);
    assert_eq!(app.status().epoch, 2);
}

#[tokio::test]
async fn large_catalog_filters_match_regardless_of_prior_searches() {
    let mut app = loaded().await;
    let raw: Vec<Value> = (0..70)
        .map(|i| json!({ "name": format!("util{i:02}"), "description": "a handy helper", "category": if i % 2 == 0 { "Even" } else { "Odd" } }))
        .collect();
    app.install(build_catalog(&RawBundle::from_value(json!(raw)), SourceKind::Embedded)).await.unwrap();
    // warm the search cache with a small limit first
    assert_eq!(app.search("helper", 10).await.unwrap().len(), 10);
    app.set_search("helper");
    assert_eq!(app.apply_filters().await.unwrap(), 70);
    app.set_category("Odd");
    assert_eq!(app.apply_filters().await.unwrap(), 35);
    let p = app.page();
    assert_eq!((p.total, p.has_more), (35, true));
}

#[tokio::test]
async fn history_is_distinct_capped_and_persisted() {
    let storage = Arc::new(MemoryStorage::new());
    let mut app = controller_with(settings(), storage.clone());
    app.load().await.unwrap();
    app.set_search("json");
    app.apply_filters().await.unwrap();
    assert_eq!(app.history(), ["json".to_string()]);
    assert_eq!(storage.get(HISTORY_KEY).unwrap().as_deref(), Some("[\"json\"]"));
    assert_eq!(app.suggestions("js", 5).first().map(String::as_str), Some("json"));

    for i in 0..60 {
        app.remember_query(&format!("query {i}"));
    }
    app.remember_query("JSON");
    assert_eq!(app.history().len(), HISTORY_CAP);
    assert_eq!(app.history()[0], "JSON");
    assert_eq!(app.history().iter().filter(|h| h.eq_ignore_ascii_case("json")).count(), 1);

    // a fresh controller picks the history back up
    let again = controller_with(settings(), storage.clone());
    assert_eq!(again.history()[0], "JSON");
}

#[tokio::test]
async fn unreadable_history_is_discarded() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(HISTORY_KEY, "{not json").unwrap();
    let app = controller_with(settings(), storage.clone());
    assert!(app.history().is_empty());
    assert_eq!(storage.get(HISTORY_KEY).unwrap(), None);
}

#[tokio::test]
async fn worker_backend_and_fallback() {
    let mut app = controller_with(Settings { use_worker: true, ..settings() }, Arc::new(MemoryStorage::new()));
    app.load().await.unwrap();
    let st = app.status();
    assert!(st.worker && st.ready);
    assert_eq!(st.strategy, Some(StrategyKind::FullText));
    assert!(app.search_self_test().await);

    app.set_search("json");
    app.apply_filters().await.unwrap();
    assert_eq!(names(&app), vec!["jq"]);

    assert!(app.drop_worker());
    assert!(!app.drop_worker());
    assert!(!app.status().worker);
    assert!(app.engine().is_ready());
    app.apply_filters().await.unwrap();
    assert_eq!(names(&app), vec!["jq"]);
    app.shutdown();
}

#[tokio::test]
async fn demotion_keeps_search_answering() {
    let mut app = loaded().await;
    assert_eq!(app.demote_search().unwrap(), StrategyKind::Fuzzy);
    assert_eq!(app.demote_search().unwrap(), StrategyKind::Substring);
    assert!(app.demote_search().is_err());
    app.degrade_search();
    assert_eq!(app.status().strategy, Some(StrategyKind::Scan));
    app.set_search("json");
    app.apply_filters().await.unwrap();
    assert_eq!(names(&app), vec!["jq"]);
}
