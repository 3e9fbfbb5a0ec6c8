//! toolctx core types: tool records, catalog snapshots, filter state and errors

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod cache;
pub mod config;

pub use cache::TtlCache;
pub use config::Settings;

/// Position of a record inside the loaded catalog. Stable for one epoch.
pub type DocId = u32;

/// Short ordered tag list (platforms, installation methods).
pub type TagList = SmallVec<[String; 4]>;

/// Highlighted HTML fragments keyed by field name.
pub type Highlights = BTreeMap<String, String>;

/// Queries shorter than this (after trimming) never match anything.
pub const MIN_QUERY_CHARS: usize = 2;

pub const MIN_DIFFICULTY: u8 = 1;
pub const MAX_DIFFICULTY: u8 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Example {
    pub command: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Grade {
    A,
    B,
    C,
    D,
    #[default]
    F,
}

impl Grade {
    pub fn from_ratio(r: f64) -> Self {
        if r >= 0.9 { Grade::A } else if r >= 0.8 { Grade::B } else if r >= 0.7 { Grade::C } else if r >= 0.6 { Grade::D } else { Grade::F }
    }
}

/// Completeness score of a raw tool entry. Diagnostic only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Quality {
    pub score: u32,
    pub max_score: u32,
    pub percentage: u32,
    pub grade: Grade,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    /// Canonical platform tags in vocabulary order, unknown tags after.
    pub platforms: TagList,
    /// Canonical installation tags in vocabulary order, unknown tags after.
    pub installation: TagList,
    pub difficulty: u8,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub examples: Vec<Example>,
    #[serde(default)]
    pub alternatives: Vec<String>,
    #[serde(default)]
    pub quality: Quality,
}

impl ToolRecord {
    /// Lower-cased concatenation of every searchable field.
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<&str> = vec![self.name.as_str(), self.description.as_str(), self.category.as_str()];
        parts.extend(self.tags.iter().map(String::as_str));
        parts.extend(self.platforms.iter().map(String::as_str));
        parts.extend(self.installation.iter().map(String::as_str));
        for ex in &self.examples {
            parts.push(&ex.command);
            parts.push(&ex.description);
        }
        parts.extend(self.alternatives.iter().map(String::as_str));
        parts.retain(|s| !s.is_empty());
        parts.join(" ").to_lowercase()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub tool_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Stats {
    pub total_tools: usize,
    pub total_categories: usize,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub version: String,
}

/// Which data source in the fallback chain produced a catalog.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    #[default]
    Empty,
    Primary,
    Reparse,
    Embedded,
    Minimal,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::Empty => "empty",
            SourceKind::Primary => "primary",
            SourceKind::Reparse => "reparse",
            SourceKind::Embedded => "embedded",
            SourceKind::Minimal => "minimal",
        })
    }
}

/// Immutable catalog snapshot; one per successful load.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Catalog {
    pub epoch: u64,
    pub tools: Vec<ToolRecord>,
    pub categories: Vec<Category>,
    pub stats: Stats,
    pub source: SourceKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SortBy {
    #[default]
    Name,
    NameDesc,
    Category,
    Difficulty,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Name => "name",
            SortBy::NameDesc => "name-desc",
            SortBy::Category => "category",
            SortBy::Difficulty => "difficulty",
        }
    }
}

impl FromStr for SortBy {
    type Err = ToolCtxError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "name" => Ok(SortBy::Name),
            "name-desc" => Ok(SortBy::NameDesc),
            "category" => Ok(SortBy::Category),
            "difficulty" => Ok(SortBy::Difficulty),
            other => Err(ToolCtxError::StateCorruption(format!("unknown sort order '{other}'"))),
        }
    }
}

/// `""` and `"all"` both mean "no filter".
pub fn is_active(value: &str) -> bool {
    let v = value.trim();
    !v.is_empty() && !v.eq_ignore_ascii_case("all")
}

/// User-visible filter selection. Single selection per dimension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterState {
    pub search: String,
    pub category: String,
    pub difficulty: String,
    pub platform: String,
    pub installation: String,
    pub sort_by: SortBy,
    pub current_page: u32,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            search: String::new(),
            category: String::new(),
            difficulty: String::new(),
            platform: String::new(),
            installation: String::new(),
            sort_by: SortBy::Name,
            current_page: 1,
        }
    }
}

impl FilterState {
    pub fn reset(&mut self) { *self = Self::default(); }

    /// True when the search box or any filter narrows the list. Sort order and page do not count.
    pub fn has_active_filters(&self) -> bool {
        is_active(&self.search) || is_active(&self.category) || is_active(&self.difficulty) || is_active(&self.platform) || is_active(&self.installation)
    }

    /// Parsed difficulty filter; `None` when unset.
    pub fn difficulty_level(&self) -> ToolCtxResult<Option<u8>> {
        if !is_active(&self.difficulty) { return Ok(None); }
        match self.difficulty.trim().parse::<u8>() {
            Ok(d) if (MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&d) => Ok(Some(d)),
            _ => Err(ToolCtxError::StateCorruption(format!("invalid difficulty '{}'", self.difficulty))),
        }
    }

    pub fn validate(&self) -> ToolCtxResult<()> {
        if self.current_page == 0 {
            return Err(ToolCtxError::StateCorruption("current page must be >= 1".into()));
        }
        self.difficulty_level().map(|_| ())
    }

    /// Cache key for a filtered result set, scoped to a dataset version.
    pub fn cache_key(&self, version: u64) -> String {
        format!(
            "filter:v{}:{}:{}:{}:{}:{}",
            version,
            self.search.trim().to_lowercase(),
            self.category,
            self.difficulty,
            self.platform,
            self.installation
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    FullText,
    Fuzzy,
    Substring,
    /// Build-free scan used once every indexed tier has failed.
    Scan,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::FullText => "full-text",
            StrategyKind::Fuzzy => "fuzzy",
            StrategyKind::Substring => "substring",
            StrategyKind::Scan => "scan",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for StrategyKind {
    type Err = ToolCtxError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full-text" | "fulltext" => Ok(StrategyKind::FullText),
            "fuzzy" => Ok(StrategyKind::Fuzzy),
            "substring" => Ok(StrategyKind::Substring),
            "scan" => Ok(StrategyKind::Scan),
            other => Err(ToolCtxError::QueryFailure(format!("unknown strategy '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub doc: DocId,
    pub record: ToolRecord,
    pub score: f32,
    pub highlights: Highlights,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchStatus {
    pub ready: bool,
    pub strategy: Option<StrategyKind>,
    pub tool_count: usize,
}

#[derive(thiserror::Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolCtxError {
    #[error("data unavailable: {0}")]
    DataUnavailable(String),
    #[error("index build failure: {0}")]
    IndexBuildFailure(String),
    #[error("query failure: {0}")]
    QueryFailure(String),
    #[error("state corruption: {0}")]
    StateCorruption(String),
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
}

pub type ToolCtxResult<T> = Result<T, ToolCtxError>;

pub mod prelude {
    pub use super::{
        Catalog, Category, DocId, Example, FilterState, Highlights, SearchResult, SearchStatus, SortBy, SourceKind, Stats, StrategyKind,
        TagList, ToolCtxError, ToolCtxResult, ToolRecord,
    };
}
