//! toolctx recovery: classify failures, run bounded recovery actions, and
//! sweep the session periodically for problems.
//!
//! The controller never owns the application. Every entry point takes a
//! `&dyn RecoveryContext` so it can be driven by the app, the health loop
//! or tests alike.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use toolctx_core::{SourceKind, StrategyKind, ToolCtxError};
use tracing::{debug, info, warn};

pub mod handlers;
pub mod health;
pub mod notify;

pub use handlers::{default_handler, is_app_key, ONLINE_WAIT, STORAGE_PREFIX, THEME_KEY};
pub use health::{HealthLoop, HealthReport};
pub use notify::{Notification, Notifier, NotifyAction, NotifyKind, ToastQueue};

pub const MAX_ATTEMPTS: u32 = 3;
pub const JOURNAL_CAP: usize = 100;
pub const EMPTY_RESULTS_THROTTLE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    DataLoad,
    SearchWorker,
    Filter,
    FilterStateCorruption,
    RenderAnchor,
    StorageCorruption,
    Network,
}

impl FailureClass {
    pub const ALL: [FailureClass; 7] = [
        FailureClass::DataLoad,
        FailureClass::SearchWorker,
        FailureClass::Filter,
        FailureClass::FilterStateCorruption,
        FailureClass::RenderAnchor,
        FailureClass::StorageCorruption,
        FailureClass::Network,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            FailureClass::DataLoad => "data_load_failure",
            FailureClass::SearchWorker => "search_worker_failure",
            FailureClass::Filter => "filter_failure",
            FailureClass::FilterStateCorruption => "filter_state_corruption",
            FailureClass::RenderAnchor => "dom_element_failure",
            FailureClass::StorageCorruption => "localstorage_corruption",
            FailureClass::Network => "network_failure",
        }
    }

    /// Lower runs first when several classes are pending.
    pub fn priority(&self) -> u8 {
        match self {
            FailureClass::DataLoad => 1,
            FailureClass::SearchWorker => 2,
            FailureClass::Filter | FailureClass::FilterStateCorruption => 3,
            FailureClass::RenderAnchor => 4,
            FailureClass::StorageCorruption => 5,
            FailureClass::Network => 6,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FailureClass::DataLoad => "Recover from data loading failures",
            FailureClass::SearchWorker => "Recover from search worker failures",
            FailureClass::Filter => "Recover from filtering failures",
            FailureClass::FilterStateCorruption => "Recover from corrupted filter state",
            FailureClass::RenderAnchor => "Recover missing render anchors",
            FailureClass::StorageCorruption => "Recover from session storage corruption",
            FailureClass::Network => "Recover from network connectivity issues",
        }
    }

    /// Short user-facing name of the affected capability.
    pub fn capability(&self) -> &'static str {
        match self {
            FailureClass::DataLoad => "tool data",
            FailureClass::SearchWorker => "search",
            FailureClass::Filter | FailureClass::FilterStateCorruption => "filters",
            FailureClass::RenderAnchor => "the results view",
            FailureClass::StorageCorruption => "saved preferences",
            FailureClass::Network => "the network connection",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.key()) }
}

/// What started a recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Error,
    HealthCheck,
    EmptyResults,
    User,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Error => "error",
            Trigger::HealthCheck => "health_check",
            Trigger::EmptyResults => "empty_results",
            Trigger::User => "user",
        }
    }
}

/// An error as seen by the recovery layer.
#[derive(Debug, Clone, Default)]
pub struct ErrorReport {
    pub message: String,
    pub error: Option<ToolCtxError>,
    /// Component the error came from, e.g. `"search"` or `"loader"`.
    pub origin: Option<String>,
    /// Escaped from a spawned task with nobody awaiting it.
    pub unhandled_async: bool,
}

impl ErrorReport {
    pub fn new(message: impl Into<String>) -> Self { Self { message: message.into(), ..Default::default() } }

    pub fn from_error(err: ToolCtxError) -> Self { Self { message: err.to_string(), error: Some(err), ..Default::default() } }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn unhandled(mut self) -> Self {
        self.unhandled_async = true;
        self
    }
}

/// Map an error to a failure class. Taxonomy variants win, then the origin,
/// then message keywords; unhandled async failures default to a data reload.
pub fn classify(report: &ErrorReport) -> Option<FailureClass> {
    match &report.error {
        Some(ToolCtxError::DataUnavailable(_)) => return Some(FailureClass::DataLoad),
        Some(ToolCtxError::IndexBuildFailure(_)) | Some(ToolCtxError::QueryFailure(_)) => return Some(FailureClass::SearchWorker),
        Some(ToolCtxError::StateCorruption(_)) => return Some(FailureClass::FilterStateCorruption),
        Some(ToolCtxError::ResourceUnavailable(_)) | None => {}
    }
    if report.origin.as_deref().map(|o| o.to_ascii_lowercase().contains("search")).unwrap_or(false) {
        return Some(FailureClass::SearchWorker);
    }
    let msg = report.message.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| msg.contains(w));
    if has(&["network", "fetch"]) {
        Some(FailureClass::Network)
    } else if has(&["localstorage", "storage"]) {
        Some(FailureClass::StorageCorruption)
    } else if has(&["filter"]) {
        Some(FailureClass::Filter)
    } else if has(&["corrupt", "state"]) {
        Some(FailureClass::FilterStateCorruption)
    } else if has(&["element", "anchor"]) {
        Some(FailureClass::RenderAnchor)
    } else if report.unhandled_async {
        Some(FailureClass::DataLoad)
    } else {
        None
    }
}

/// Operations recovery needs from the running session.
#[async_trait::async_trait]
pub trait RecoveryContext: Send + Sync {
    /// Reload starting at `from` in the source chain, republish and rebuild
    /// indexes. Returns the number of tools now loaded.
    async fn reload_data(&self, from: SourceKind) -> anyhow::Result<usize>;
    /// Terminate the background search worker; false when none was running.
    async fn drop_worker(&self) -> bool;
    async fn rebuild_search_next_tier(&self) -> anyhow::Result<StrategyKind>;
    async fn degrade_search(&self) -> anyhow::Result<()>;
    async fn search_self_test(&self) -> bool;

    async fn reset_filters(&self);
    async fn clear_derived_caches(&self);
    async fn reapply_filters(&self) -> anyhow::Result<usize>;
    /// Show the full record set unfiltered; returns its size.
    async fn show_all(&self) -> usize;
    async fn filters_active(&self) -> bool;
    async fn filter_state_valid(&self) -> bool;

    async fn missing_anchors(&self) -> Vec<String>;
    async fn recreate_anchor(&self, id: &str) -> bool;

    async fn storage_keys(&self) -> Vec<String>;
    async fn storage_remove(&self, key: &str);
    /// Write, read back and delete a probe key.
    async fn storage_probe(&self) -> bool;

    async fn is_online(&self) -> bool;
    async fn wait_online(&self, timeout: Duration) -> bool;
    async fn tool_count(&self) -> usize;
}

#[async_trait::async_trait]
pub trait RecoveryHandler: Send + Sync {
    async fn recover(&self, ctx: &dyn RecoveryContext) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Recovered,
    Failed,
    Errored(String),
    /// Budget used up; the handler was not invoked.
    Exhausted,
}

#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub at: DateTime<Utc>,
    pub class: FailureClass,
    pub trigger: Trigger,
    pub attempt: u32,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyResultsOutcome {
    Throttled,
    /// The user narrowed the list; empty is expected.
    FiltersActive,
    Reloaded(bool),
    Suggested,
}

/// Clears the in-flight mark when the handler finishes or is dropped.
struct InFlight<'a> {
    ctl: &'a RecoveryController,
    class: FailureClass,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) { self.ctl.ledger().in_flight.remove(&self.class); }
}

#[derive(Default)]
struct Ledger {
    attempts: FxHashMap<FailureClass, u32>,
    /// Classes whose handler is running right now.
    in_flight: FxHashSet<FailureClass>,
    journal: VecDeque<JournalEntry>,
    last_empty: Option<Instant>,
}

pub struct RecoveryController {
    handlers: FxHashMap<FailureClass, Arc<dyn RecoveryHandler>>,
    notifier: Arc<dyn Notifier>,
    max_attempts: u32,
    ledger: Mutex<Ledger>,
}

impl RecoveryController {
    /// Controller with the default handler for every class.
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        let handlers = FailureClass::ALL.iter().map(|c| (*c, default_handler(*c))).collect();
        Self { handlers, notifier, max_attempts: MAX_ATTEMPTS, ledger: Mutex::new(Ledger::default()) }
    }

    pub fn with_handler(mut self, class: FailureClass, handler: Arc<dyn RecoveryHandler>) -> Self {
        self.handlers.insert(class, handler);
        self
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> { self.ledger.lock().unwrap_or_else(PoisonError::into_inner) }

    pub fn notifier(&self) -> &Arc<dyn Notifier> { &self.notifier }

    pub fn attempts(&self, class: FailureClass) -> u32 { self.ledger().attempts.get(&class).copied().unwrap_or(0) }

    pub fn reset_attempt_counters(&self) {
        self.ledger().attempts.clear();
        debug!("recovery attempt counters reset");
    }

    /// Most recent entries last.
    pub fn journal(&self) -> Vec<JournalEntry> { self.ledger().journal.iter().cloned().collect() }

    fn record(&self, class: FailureClass, trigger: Trigger, attempt: u32, outcome: Outcome) {
        let label = match &outcome {
            Outcome::Recovered => "recovered",
            Outcome::Failed => "failed",
            Outcome::Errored(_) => "errored",
            Outcome::Exhausted => "exhausted",
        };
        metrics::counter!("recovery_attempts_total", 1u64, "class" => class.key(), "outcome" => label);
        let mut l = self.ledger();
        if l.journal.len() >= JOURNAL_CAP {
            l.journal.pop_front();
        }
        l.journal.push_back(JournalEntry { at: Utc::now(), class, trigger, attempt, outcome });
    }

    /// Run the handler for `class` unless its budget is spent. Success clears
    /// the class's counter.
    pub async fn attempt_recovery(&self, class: FailureClass, trigger: Trigger, ctx: &dyn RecoveryContext) -> bool {
        let Some(handler) = self.handlers.get(&class).cloned() else {
            warn!(class = %class, "no recovery handler registered");
            return false;
        };
        let attempt = {
            let mut l = self.ledger();
            if l.in_flight.contains(&class) {
                debug!(class = %class, trigger = trigger.as_str(), "recovery already in progress");
                return false;
            }
            let n = l.attempts.entry(class).or_insert(0);
            if *n >= self.max_attempts {
                None
            } else {
                *n += 1;
                let n = *n;
                l.in_flight.insert(class);
                Some(n)
            }
        };
        let Some(attempt) = attempt else {
            warn!(class = %class, trigger = trigger.as_str(), max = self.max_attempts, "recovery budget exhausted");
            self.record(class, trigger, self.max_attempts, Outcome::Exhausted);
            return false;
        };
        info!(class = %class, trigger = trigger.as_str(), attempt, "attempting recovery");
        let _running = InFlight { ctl: self, class };
        match handler.recover(ctx).await {
            Ok(true) => {
                self.ledger().attempts.remove(&class);
                info!(class = %class, trigger = trigger.as_str(), attempt, "recovery succeeded");
                self.record(class, trigger, attempt, Outcome::Recovered);
                if trigger != Trigger::HealthCheck {
                    self.notifier.notify(Notification::new(NotifyKind::Success, format!("System issue resolved: {}", class.description())));
                }
                true
            }
            Ok(false) => {
                warn!(class = %class, trigger = trigger.as_str(), attempt, "recovery did not succeed");
                self.record(class, trigger, attempt, Outcome::Failed);
                false
            }
            Err(e) => {
                warn!(class = %class, trigger = trigger.as_str(), attempt, error = %format!("{e:#}"), "recovery handler failed");
                self.record(class, trigger, attempt, Outcome::Errored(format!("{e:#}")));
                false
            }
        }
    }

    /// Classify and recover. Unclassifiable errors are only logged.
    pub async fn handle_error(&self, report: &ErrorReport, ctx: &dyn RecoveryContext) -> bool {
        match classify(report) {
            Some(class) => self.attempt_recovery(class, Trigger::Error, ctx).await,
            None => {
                debug!(message = %report.message, "error has no recovery class");
                false
            }
        }
    }

    pub async fn handle_empty_results(&self, ctx: &dyn RecoveryContext) -> EmptyResultsOutcome { self.handle_empty_results_at(ctx, Instant::now()).await }

    /// Reaction to an empty result list, at most once per throttle window.
    pub async fn handle_empty_results_at(&self, ctx: &dyn RecoveryContext, now: Instant) -> EmptyResultsOutcome {
        {
            let l = self.ledger();
            if let Some(last) = l.last_empty {
                if now.saturating_duration_since(last) < EMPTY_RESULTS_THROTTLE {
                    return EmptyResultsOutcome::Throttled;
                }
            }
        }
        if ctx.filters_active().await {
            debug!("empty results with active filters; nothing to do");
            return EmptyResultsOutcome::FiltersActive;
        }
        // only outcomes the user hears about start the throttle window
        self.ledger().last_empty = Some(now);
        if ctx.tool_count().await == 0 {
            return EmptyResultsOutcome::Reloaded(self.attempt_recovery(FailureClass::DataLoad, Trigger::EmptyResults, ctx).await);
        }
        self.notifier.notify(
            Notification::new(NotifyKind::Suggestion, "No results found. Try adjusting your filters or search terms.")
                .with_actions(&[NotifyAction::ResetAllFilters, NotifyAction::ViewAllTools]),
        );
        EmptyResultsOutcome::Suggested
    }

    /// Carry out a notification action chosen by the user.
    pub async fn run_action(&self, action: NotifyAction, ctx: &dyn RecoveryContext) -> bool {
        match action {
            NotifyAction::ResetAllFilters => self.attempt_recovery(FailureClass::Filter, Trigger::User, ctx).await,
            NotifyAction::ViewAllTools => {
                ctx.reset_filters().await;
                ctx.show_all().await > 0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_order() {
        assert_eq!(classify(&ErrorReport::from_error(ToolCtxError::DataUnavailable("x".into()))), Some(FailureClass::DataLoad));
        assert_eq!(classify(&ErrorReport::from_error(ToolCtxError::QueryFailure("x".into()))), Some(FailureClass::SearchWorker));
        assert_eq!(classify(&ErrorReport::from_error(ToolCtxError::StateCorruption("page 0".into()))), Some(FailureClass::FilterStateCorruption));
        assert_eq!(classify(&ErrorReport::new("boom").origin("search-worker")), Some(FailureClass::SearchWorker));
        assert_eq!(classify(&ErrorReport::new("Failed to fetch")), Some(FailureClass::Network));
        assert_eq!(classify(&ErrorReport::new("localStorage quota exceeded")), Some(FailureClass::StorageCorruption));
        assert_eq!(classify(&ErrorReport::new("filter returned garbage")), Some(FailureClass::Filter));
        assert_eq!(classify(&ErrorReport::new("corrupt payload")), Some(FailureClass::FilterStateCorruption));
        assert_eq!(classify(&ErrorReport::new("anchor tools-grid missing")), Some(FailureClass::RenderAnchor));
        assert_eq!(classify(&ErrorReport::new("weird")), None);
        assert_eq!(classify(&ErrorReport::new("weird").unhandled()), Some(FailureClass::DataLoad));
        // resource errors fall through to keywords
        assert_eq!(classify(&ErrorReport::from_error(ToolCtxError::ResourceUnavailable("storage locked".into()))), Some(FailureClass::StorageCorruption));
    }

    #[test]
    fn class_metadata() {
        assert_eq!(FailureClass::ALL.len(), 7);
        assert_eq!(FailureClass::RenderAnchor.key(), "dom_element_failure");
        assert!(FailureClass::DataLoad.priority() < FailureClass::Network.priority());
        assert!(FailureClass::ALL.iter().all(|c| !c.description().is_empty()));
    }
}
