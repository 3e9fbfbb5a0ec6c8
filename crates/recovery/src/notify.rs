//! User-facing notifications. The queue keeps toasts until they expire or are dismissed.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyKind {
    Info,
    Success,
    Suggestion,
    Warn,
    Error,
}

impl NotifyKind {
    pub fn duration(&self) -> Duration {
        match self {
            NotifyKind::Error => Duration::from_millis(5000),
            NotifyKind::Warn => Duration::from_millis(4000),
            _ => Duration::from_millis(3000),
        }
    }
}

/// Follow-up a notification can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotifyAction {
    ResetAllFilters,
    ViewAllTools,
}

impl NotifyAction {
    pub fn label(&self) -> &'static str {
        match self {
            NotifyAction::ResetAllFilters => "Reset All Filters",
            NotifyAction::ViewAllTools => "View All Tools",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotifyKind,
    pub message: String,
    pub actions: Vec<NotifyAction>,
}

impl Notification {
    pub fn new(kind: NotifyKind, message: impl Into<String>) -> Self { Self { kind, message: message.into(), actions: Vec::new() } }
    pub fn with_actions(mut self, actions: &[NotifyAction]) -> Self {
        self.actions.extend_from_slice(actions);
        self
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, n: Notification);
}

#[derive(Debug, Clone)]
struct Toast {
    id: u64,
    note: Notification,
    created: Instant,
}

#[derive(Debug, Default)]
struct Toasts {
    next_id: u64,
    items: Vec<Toast>,
}

/// Dismissible, self-expiring notifications.
#[derive(Debug, Default)]
pub struct ToastQueue {
    inner: Mutex<Toasts>,
}

impl ToastQueue {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, Toasts> { self.inner.lock().unwrap_or_else(PoisonError::into_inner) }

    pub fn push_at(&self, note: Notification, now: Instant) -> u64 {
        let mut t = self.lock();
        t.next_id += 1;
        let id = t.next_id;
        t.items.push(Toast { id, note, created: now });
        id
    }

    /// Live toasts as of `now`, oldest first; expired ones are dropped.
    pub fn active_at(&self, now: Instant) -> Vec<(u64, Notification)> {
        let mut t = self.lock();
        t.items.retain(|x| now.saturating_duration_since(x.created) < x.note.kind.duration());
        t.items.iter().map(|x| (x.id, x.note.clone())).collect()
    }

    pub fn active(&self) -> Vec<(u64, Notification)> { self.active_at(Instant::now()) }

    pub fn dismiss(&self, id: u64) -> bool {
        let mut t = self.lock();
        let before = t.items.len();
        t.items.retain(|x| x.id != id);
        t.items.len() != before
    }

    /// Take everything still queued, expired or not.
    pub fn drain(&self) -> Vec<Notification> { self.lock().items.drain(..).map(|x| x.note).collect() }

    pub fn len(&self) -> usize { self.lock().items.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl Notifier for ToastQueue {
    fn notify(&self, n: Notification) { self.push_at(n, Instant::now()); }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_depends_on_kind() {
        let q = ToastQueue::new();
        let t0 = Instant::now();
        q.push_at(Notification::new(NotifyKind::Info, "info"), t0);
        q.push_at(Notification::new(NotifyKind::Warn, "warn"), t0);
        q.push_at(Notification::new(NotifyKind::Error, "error"), t0);
        assert_eq!(q.active_at(t0 + Duration::from_millis(2_999)).len(), 3);
        assert_eq!(q.active_at(t0 + Duration::from_millis(3_500)).len(), 2);
        let left = q.active_at(t0 + Duration::from_millis(4_500));
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].1.kind, NotifyKind::Error);
        assert!(q.active_at(t0 + Duration::from_millis(5_000)).is_empty());
    }

    #[test]
    fn dismiss_by_id() {
        let q = ToastQueue::new();
        let id = q.push_at(Notification::new(NotifyKind::Success, "ok").with_actions(&[NotifyAction::ViewAllTools]), Instant::now());
        assert!(q.dismiss(id));
        assert!(!q.dismiss(id));
        assert!(q.is_empty());
        assert_eq!(NotifyAction::ResetAllFilters.label(), "Reset All Filters");
    }
}
