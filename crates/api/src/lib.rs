//! toolctx application façade.
//!
//! Frontends depend on this crate only: `AppController` owns filter state and
//! indexes, `Session` adds recovery, notifications, debounced updates and the
//! periodic health sweep around it.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use toolctx_core::{SourceKind, StrategyKind, ToolRecord};

pub mod app;
pub mod debounce;
pub mod handle;
pub mod session;
pub mod surface;

pub use app::{AppController, HISTORY_CAP, HISTORY_KEY};
pub use debounce::{Debouncer, FILTER_ID, SEARCH_ID};
pub use handle::AppHandle;
pub use session::Session;
pub use surface::{MemoryStorage, MemorySurface, RenderSurface, SessionStorage, StorageError, PROBE_KEY, REQUIRED_ANCHORS};

/// Records shown so far: pages `1..=page` of the filtered list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Page {
    pub items: Vec<ToolRecord>,
    pub page: u32,
    pub per_page: usize,
    /// Size of the whole filtered list.
    pub total: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppStatus {
    pub ready: bool,
    pub strategy: Option<StrategyKind>,
    pub tool_count: usize,
    pub filtered_count: usize,
    pub filters_active: bool,
    pub source: SourceKind,
    pub epoch: u64,
    /// Search runs on the background worker.
    pub worker: bool,
}
