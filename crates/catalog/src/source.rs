//! Data sources, strongest first: the data directory, a lenient re-parse of
//! the same directory, the dataset compiled into the binary, and a built-in
//! three-tool list.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde_json::{json, Value};
use toolctx_core::SourceKind;
use tracing::{debug, warn};

use crate::fetch::{read_with_retry, FetchPolicy};
use crate::RawBundle;

const TOOLS_FILE: &str = "tools.json";
const CATEGORIES_FILE: &str = "categories.json";
const STATS_FILE: &str = "stats.json";
/// Single-file bundles tried by the re-parse source, in order.
const BUNDLE_FILES: [&str; 3] = ["bundle.js", "bundle.json", "data.js"];

static EMBEDDED: &str = include_str!("../data/embedded.json");

#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    fn kind(&self) -> SourceKind;
    async fn fetch(&self) -> anyhow::Result<RawBundle>;
}

/// Strip a UTF-8 BOM and a `window.NAME = ... ;` (or `var/const/let NAME =`)
/// script wrapper around a JSON document.
pub fn strip_script_wrapper(text: &str) -> &str {
    let t = text.trim_start_matches('\u{feff}').trim();
    let body = match t.find('=') {
        Some(eq) if !t.starts_with('{') && !t.starts_with('[') => {
            let lhs = t[..eq].trim();
            let assignment = lhs.starts_with("window.") || ["var ", "let ", "const "].iter().any(|p| lhs.starts_with(p));
            if assignment { &t[eq + 1..] } else { t }
        }
        _ => t,
    };
    body.trim().trim_end_matches(';').trim_end()
}

fn parse_lenient(text: &str) -> anyhow::Result<Value> { serde_json::from_str(strip_script_wrapper(text)).context("parsing JSON payload") }

/// `tools.json` (required) plus optional `categories.json` and `stats.json`,
/// fetched concurrently.
pub struct DirSource {
    dir: PathBuf,
    policy: FetchPolicy,
}

impl DirSource {
    pub fn new(dir: impl Into<PathBuf>, policy: FetchPolicy) -> Self { Self { dir: dir.into(), policy } }
    pub fn dir(&self) -> &Path { &self.dir }
}

#[async_trait::async_trait]
impl DataSource for DirSource {
    fn kind(&self) -> SourceKind { SourceKind::Primary }

    async fn fetch(&self) -> anyhow::Result<RawBundle> {
        let (tools_path, categories_path, stats_path) = (self.dir.join(TOOLS_FILE), self.dir.join(CATEGORIES_FILE), self.dir.join(STATS_FILE));
        let (tools, categories, stats) = futures::join!(
            read_with_retry(&tools_path, self.policy),
            read_with_retry(&categories_path, self.policy),
            read_with_retry(&stats_path, self.policy),
        );
        let tools: Value = serde_json::from_str(&tools?).with_context(|| format!("parsing {TOOLS_FILE}"))?;
        let optional = |name: &str, r: anyhow::Result<String>| match r.and_then(|s| serde_json::from_str::<Value>(&s).map_err(anyhow::Error::from)) {
            Ok(v) => v,
            Err(e) => {
                warn!(file = name, error = %e, "optional catalog file unavailable");
                Value::Null
            }
        };
        Ok(RawBundle { tools, categories: optional(CATEGORIES_FILE, categories), stats: optional(STATS_FILE, stats) })
    }
}

/// Second pass over the data directory that tolerates script wrappers and BOMs,
/// and also accepts a single combined bundle file.
pub struct ReparseSource {
    dir: PathBuf,
    policy: FetchPolicy,
}

impl ReparseSource {
    pub fn new(dir: impl Into<PathBuf>, policy: FetchPolicy) -> Self { Self { dir: dir.into(), policy } }

    async fn read_value(&self, name: &str) -> anyhow::Result<Value> {
        let text = read_with_retry(&self.dir.join(name), self.policy).await?;
        parse_lenient(&text).with_context(|| format!("re-parsing {name}"))
    }
}

#[async_trait::async_trait]
impl DataSource for ReparseSource {
    fn kind(&self) -> SourceKind { SourceKind::Reparse }

    async fn fetch(&self) -> anyhow::Result<RawBundle> {
        for name in BUNDLE_FILES {
            if !tokio::fs::try_exists(self.dir.join(name)).await.unwrap_or(false) {
                continue;
            }
            match self.read_value(name).await {
                Ok(v) => return Ok(RawBundle::from_value(v)),
                Err(e) => debug!(file = name, error = %e, "bundle candidate rejected"),
            }
        }
        let mut raw = RawBundle::from_value(self.read_value(TOOLS_FILE).await?);
        if raw.categories.is_null() {
            raw.categories = self.read_value(CATEGORIES_FILE).await.unwrap_or(Value::Null);
        }
        if raw.stats.is_null() {
            raw.stats = self.read_value(STATS_FILE).await.unwrap_or(Value::Null);
        }
        Ok(raw)
    }
}

/// Dataset compiled into the binary.
pub struct EmbeddedSource;

#[async_trait::async_trait]
impl DataSource for EmbeddedSource {
    fn kind(&self) -> SourceKind { SourceKind::Embedded }

    async fn fetch(&self) -> anyhow::Result<RawBundle> {
        let v = parse_lenient(EMBEDDED).context("embedded dataset")?;
        if !v.get("tools").map(Value::is_array).unwrap_or(false) {
            bail!("embedded dataset has no tool list");
        }
        Ok(RawBundle::from_value(v))
    }
}

/// Last resort: three well-known tools so the UI always has something.
pub struct MinimalSource;

#[async_trait::async_trait]
impl DataSource for MinimalSource {
    fn kind(&self) -> SourceKind { SourceKind::Minimal }

    async fn fetch(&self) -> anyhow::Result<RawBundle> {
        Ok(RawBundle {
            tools: json!([
                {
                    "name": "docker",
                    "description": "Container platform for developing, shipping, and running applications",
                    "category": "Cloud & Containers",
                    "platforms": ["macOS", "Linux", "Windows"],
                    "installation": "download",
                    "difficulty": 4,
                    "tags": ["containers", "virtualization", "deployment"],
                    "examples": [{ "command": "docker ps", "description": "List running containers" }],
                },
                {
                    "name": "git",
                    "description": "Distributed version control system for tracking changes in source code",
                    "category": "Development Tools",
                    "platforms": ["macOS", "Linux", "Windows"],
                    "installation": "homebrew",
                    "difficulty": 4,
                    "tags": ["version-control", "development", "collaboration"],
                    "examples": [{ "command": "git status", "description": "Show working tree status" }],
                },
                {
                    "name": "curl",
                    "description": "Command line tool for transferring data with URLs",
                    "category": "Networking",
                    "platforms": ["macOS", "Linux", "Windows"],
                    "installation": "built-in",
                    "difficulty": 3,
                    "tags": ["http", "download", "api"],
                    "examples": [{ "command": "curl -I https://example.com", "description": "Get headers only" }],
                },
            ]),
            categories: json!([
                { "id": "cloud", "name": "Cloud & Containers" },
                { "id": "development", "name": "Development Tools" },
                { "id": "networking", "name": "Networking" },
            ]),
            stats: json!({ "version": "1.0.0" }),
        })
    }
}
