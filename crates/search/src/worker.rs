//! Background search worker: a tokio task that owns its own record copy and
//! full-text engine, driven by request/response channels.
//!
//! Requests are handled one at a time in arrival order. Responses are matched
//! to requests by type (and query text for searches), so stale responses left
//! over from an abandoned call are skipped. A worker that misbehaves is
//! terminated by aborting its task; in-flight work is never cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use toolctx_core::{SearchResult, SearchStatus, ToolCtxError, ToolCtxResult};
use tracing::{debug, info, warn};

use crate::{FullTextBuilder, Records, SearchEngine};

pub const WORKER_SEARCH_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug)]
pub enum WorkerRequest {
    BuildIndex { records: Records },
    Search { query: String, limit: usize },
    HealthCheck,
}

#[derive(Debug)]
pub enum WorkerResponse {
    IndexReady { tool_count: usize },
    IndexError { message: String },
    SearchResults { query: String, results: Vec<SearchResult> },
    SearchError { query: String, message: String },
    Health(SearchStatus),
}

pub struct SearchWorker {
    tx: mpsc::Sender<WorkerRequest>,
    rx: mpsc::Receiver<WorkerResponse>,
    task: JoinHandle<()>,
}

fn stopped() -> ToolCtxError { ToolCtxError::ResourceUnavailable("search worker stopped".into()) }

/// Spawn the worker loop. `cap` bounds both channels.
pub fn spawn_search_worker(cap: usize) -> SearchWorker {
    let (tx, mut req_rx) = mpsc::channel::<WorkerRequest>(cap.max(1));
    let (resp_tx, rx) = mpsc::channel::<WorkerResponse>(cap.max(1));
    let task = tokio::spawn(async move {
        let mut engine = SearchEngine::with_tiers(vec![Arc::new(FullTextBuilder)]);
        while let Some(req) = req_rx.recv().await {
            let resp = match req {
                WorkerRequest::BuildIndex { records } => {
                    let n = records.len();
                    if engine.initialize(records) {
                        info!(tool_count = n, "search worker index ready");
                        WorkerResponse::IndexReady { tool_count: n }
                    } else {
                        WorkerResponse::IndexError { message: format!("{:?}", engine.state()) }
                    }
                }
                WorkerRequest::Search { query, limit } => {
                    if engine.is_ready() {
                        let results = engine.search(&query, limit);
                        WorkerResponse::SearchResults { query, results }
                    } else {
                        WorkerResponse::SearchError { query, message: "search index not built".into() }
                    }
                }
                WorkerRequest::HealthCheck => WorkerResponse::Health(engine.status()),
            };
            if resp_tx.send(resp).await.is_err() {
                debug!("worker response channel closed");
                break;
            }
        }
        debug!("search worker exiting");
    });
    SearchWorker { tx, rx, task }
}

impl SearchWorker {
    async fn send(&self, req: WorkerRequest) -> ToolCtxResult<()> { self.tx.send(req).await.map_err(|_| stopped()) }

    /// Build (or rebuild) the worker's index; supersedes earlier builds.
    pub async fn build(&mut self, records: Records) -> ToolCtxResult<usize> {
        self.send(WorkerRequest::BuildIndex { records }).await?;
        loop {
            match self.rx.recv().await {
                Some(WorkerResponse::IndexReady { tool_count }) => return Ok(tool_count),
                Some(WorkerResponse::IndexError { message }) => return Err(ToolCtxError::IndexBuildFailure(message)),
                Some(other) => debug!(response = ?other, "skipping stale worker response"),
                None => return Err(stopped()),
            }
        }
    }

    /// Run a query on the worker; errors when the worker is not ready, gone,
    /// or does not answer within `WORKER_SEARCH_TIMEOUT`.
    pub async fn search(&mut self, query: &str, limit: usize) -> ToolCtxResult<Vec<SearchResult>> {
        self.send(WorkerRequest::Search { query: query.to_string(), limit }).await?;
        let wait = async {
            loop {
                match self.rx.recv().await {
                    Some(WorkerResponse::SearchResults { query: q, results }) if q == query => return Ok(results),
                    Some(WorkerResponse::SearchError { query: q, message }) if q == query => return Err(ToolCtxError::QueryFailure(message)),
                    Some(other) => debug!(response = ?other, "skipping stale worker response"),
                    None => return Err(stopped()),
                }
            }
        };
        match tokio::time::timeout(WORKER_SEARCH_TIMEOUT, wait).await {
            Ok(r) => r,
            Err(_) => {
                warn!(query = %query, "search worker timed out");
                Err(ToolCtxError::QueryFailure("search worker timed out".into()))
            }
        }
    }

    pub async fn health(&mut self) -> ToolCtxResult<SearchStatus> {
        self.send(WorkerRequest::HealthCheck).await?;
        loop {
            match self.rx.recv().await {
                Some(WorkerResponse::Health(status)) => return Ok(status),
                Some(other) => debug!(response = ?other, "skipping stale worker response"),
                None => return Err(stopped()),
            }
        }
    }

    pub fn is_finished(&self) -> bool { self.task.is_finished() }

    /// Abort the worker task. Pending requests are dropped.
    pub fn terminate(self) {
        self.task.abort();
        debug!("search worker terminated");
    }
}
