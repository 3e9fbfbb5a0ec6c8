//! Raw JSON entries to typed records.

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tracing::debug;

use toolctx_core::{Category, Example, Grade, Quality, Stats, ToolRecord, MAX_DIFFICULTY, MIN_DIFFICULTY};

use crate::Normalizer;

static NULL: Value = Value::Null;

/// Lower-case, non-alphanumeric runs collapsed to `-`, trimmed of `-`.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut dash = false;
    for ch in name.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            dash = false;
        } else if !dash {
            out.push('-');
            dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

/// Difficulty in 1..=5. Strings parse their leading digits; anything unknown
/// or out of range becomes 1.
pub fn parse_difficulty(raw: Option<&Value>) -> u8 {
    let n = match raw {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => {
            let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<i64>().ok()
        }
        _ => None,
    };
    match n {
        Some(d) if (MIN_DIFFICULTY as i64..=MAX_DIFFICULTY as i64).contains(&d) => d as u8,
        _ => MIN_DIFFICULTY,
    }
}

fn str_field<'a>(raw: &'a Value, key: &str) -> Option<&'a str> { raw.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty()) }

fn truthy(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
    }
}

fn string_list(raw: Option<&Value>) -> Vec<String> {
    match raw {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect(),
        Some(Value::String(s)) => s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

fn example_of(v: &Value) -> Option<Example> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(Example { command: s.trim().to_string(), description: String::new() }),
        Value::Object(_) => {
            let command = str_field(v, "command").or_else(|| str_field(v, "code"))?;
            let description = str_field(v, "description").unwrap_or("");
            Some(Example { command: command.to_string(), description: description.to_string() })
        }
        _ => None,
    }
}

fn examples_of(raw: &Value) -> Vec<Example> {
    match raw.get("examples").or_else(|| raw.get("example")) {
        Some(Value::Array(items)) => items.iter().filter_map(example_of).collect(),
        Some(v) => example_of(v).into_iter().collect(),
        None => Vec::new(),
    }
}

/// Completeness score. Required fields weigh 10, important ones 5 (+2 when a
/// list carries more than one entry), optional ones 3.
pub fn quality(raw: &Value, rec: &ToolRecord) -> Quality {
    let mut score = 0u32;
    let mut max = 0u32;
    for present in [!rec.name.is_empty() && truthy(raw.get("name")), !rec.description.is_empty(), truthy(raw.get("difficulty"))] {
        max += 10;
        if present {
            score += 10;
        }
    }
    for len in [usize::from(!rec.category.is_empty()), rec.platforms.len(), rec.installation.len(), rec.examples.len()] {
        max += 5;
        if len > 0 {
            score += 5;
        }
        if len > 1 {
            score += 2;
            max += 2;
        }
    }
    for key in ["alternatives", "related", "documentation", "tips"] {
        max += 3;
        if truthy(raw.get(key)) {
            score += 3;
        }
    }
    let ratio = score as f64 / max as f64;
    Quality { score, max_score: max, percentage: (ratio * 100.0).round() as u32, grade: Grade::from_ratio(ratio) }
}

impl Normalizer {
    /// Typed record from one raw entry. Missing fields get defaults; never fails.
    pub fn normalize_tool(&self, raw: &Value) -> ToolRecord {
        let name = str_field(raw, "name").unwrap_or("Unknown Tool").to_string();
        let platforms_raw = raw.get("platforms").filter(|v| truthy(Some(*v))).or_else(|| raw.get("platform")).unwrap_or(&NULL);
        let install_raw = raw.get("installation").filter(|v| truthy(Some(*v))).or_else(|| raw.get("install")).unwrap_or(&NULL);
        let mut rec = ToolRecord {
            id: str_field(raw, "id").map(str::to_string).unwrap_or_else(|| slugify(&name)),
            description: str_field(raw, "description").unwrap_or("").to_string(),
            category: str_field(raw, "category").unwrap_or("").to_string(),
            platforms: self.normalize_platforms(platforms_raw),
            installation: self.normalize_installation(install_raw),
            difficulty: parse_difficulty(raw.get("difficulty")),
            tags: string_list(raw.get("tags")),
            examples: examples_of(raw),
            alternatives: string_list(raw.get("alternatives")),
            name,
            ..Default::default()
        };
        rec.quality = quality(raw, &rec);
        rec
    }

    /// Tool list from `[...]`, `{tools: [...]}`, or the first list-valued key
    /// of an object. Non-object entries are skipped and duplicate ids get a
    /// numeric suffix.
    pub fn tools_from_value(&self, raw: &Value) -> Vec<ToolRecord> {
        let items = match raw {
            Value::Array(items) => items.as_slice(),
            Value::Object(map) => match map.get("tools") {
                Some(Value::Array(items)) => items.as_slice(),
                _ => match map.values().find_map(Value::as_array) {
                    Some(items) => items.as_slice(),
                    None => {
                        debug!("tools payload has no list; treating as empty");
                        return Vec::new();
                    }
                },
            },
            _ => return Vec::new(),
        };
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            if !item.is_object() {
                debug!(index = i, "skipping non-object tool entry");
                continue;
            }
            let mut rec = self.normalize_tool(item);
            if rec.id.is_empty() {
                rec.id = format!("tool-{i}");
            }
            if !seen.insert(rec.id.clone()) {
                let mut n = 2;
                while seen.contains(&format!("{}-{n}", rec.id)) {
                    n += 1;
                }
                rec.id = format!("{}-{n}", rec.id);
                seen.insert(rec.id.clone());
            }
            out.push(rec);
        }
        out
    }
}

fn category_of(raw: &Value, key: Option<&str>) -> Category {
    let name = str_field(raw, "name").or(key).unwrap_or("Unknown Category").to_string();
    let id = str_field(raw, "id").map(str::to_string).or_else(|| key.map(str::to_string)).unwrap_or_else(|| slugify(&name));
    let listed = raw.get("tools").and_then(Value::as_array).map(|a| a.len()).unwrap_or(0);
    let tool_count = raw.get("toolCount").or_else(|| raw.get("tool_count")).and_then(Value::as_u64).map(|n| n as usize).unwrap_or(listed);
    Category {
        id,
        name,
        description: str_field(raw, "description").unwrap_or("").to_string(),
        icon: str_field(raw, "icon").map(str::to_string),
        tool_count,
    }
}

/// Categories from `[...]`, `{categories: [...]}`, or an object keyed by id.
pub fn categories_from_value(raw: &Value) -> Vec<Category> {
    match raw {
        Value::Array(items) => items.iter().filter(|v| v.is_object()).map(|v| category_of(v, None)).collect(),
        Value::Object(map) => match map.get("categories") {
            Some(Value::Array(items)) => items.iter().filter(|v| v.is_object()).map(|v| category_of(v, None)).collect(),
            _ => map.iter().filter(|(_, v)| v.is_object()).map(|(k, v)| category_of(v, Some(k.as_str()))).collect(),
        },
        _ => Vec::new(),
    }
}

/// Replace every category's count with the number of tools naming it (by name, then id).
pub fn recalculate_category_counts(categories: &mut [Category], tools: &[ToolRecord]) {
    let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
    for t in tools.iter().filter(|t| !t.category.is_empty()) {
        *counts.entry(t.category.as_str()).or_insert(0) += 1;
    }
    for c in categories.iter_mut() {
        c.tool_count = counts.get(c.name.as_str()).or_else(|| counts.get(c.id.as_str())).copied().unwrap_or(0);
    }
}

/// Stats from `{...}` or `{stats: {...}}`; absent fields default.
pub fn stats_from_value(raw: &Value) -> Stats {
    let s = raw.get("stats").filter(|v| v.is_object()).unwrap_or(raw);
    let count = |a: &str, b: &str| s.get(a).or_else(|| s.get(b)).and_then(Value::as_u64).unwrap_or(0) as usize;
    Stats {
        total_tools: count("totalTools", "total_tools"),
        total_categories: count("totalCategories", "total_categories"),
        last_updated: str_field(s, "lastUpdated").or_else(|| str_field(s, "last_updated")).map(str::to_string),
        version: str_field(s, "version").unwrap_or("1.0.0").to_string(),
    }
}

/// Totals follow the data actually loaded.
pub fn reconcile_stats(stats: &mut Stats, tools: &[ToolRecord], categories: &[Category]) {
    stats.total_tools = tools.len();
    stats.total_categories = categories.len();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slug_from_name() {
        assert_eq!(slugify("Ripgrep (rg)"), "ripgrep-rg");
        assert_eq!(slugify("  --GNU  Make--"), "gnu-make");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn difficulty_defaults_and_clamps() {
        assert_eq!(parse_difficulty(Some(&json!(3))), 3);
        assert_eq!(parse_difficulty(Some(&json!("4 - advanced"))), 4);
        assert_eq!(parse_difficulty(Some(&json!(9))), 1);
        assert_eq!(parse_difficulty(Some(&json!("hard"))), 1);
        assert_eq!(parse_difficulty(None), 1);
    }

    #[test]
    fn tool_entry_defaults_and_lists() {
        let n = Normalizer::shared();
        let rec = n.normalize_tool(&json!({
            "name": "ripgrep",
            "description": "Fast grep",
            "category": "Text Processing",
            "platform": "osx, linux",
            "install": "brew, cargo",
            "difficulty": "2",
            "tags": "search, regex",
            "examples": [{"command": "rg foo", "description": "find foo"}, "rg -i bar"]
        }));
        assert_eq!(rec.id, "ripgrep");
        assert_eq!(rec.platforms.to_vec(), vec!["macOS", "Linux"]);
        assert_eq!(rec.installation.to_vec(), vec!["homebrew", "cargo"]);
        assert_eq!(rec.difficulty, 2);
        assert_eq!(rec.tags, vec!["search", "regex"]);
        assert_eq!(rec.examples.len(), 2);
        assert_eq!(rec.examples[1].command, "rg -i bar");

        let bare = n.normalize_tool(&json!({}));
        assert_eq!(bare.name, "Unknown Tool");
        assert_eq!(bare.id, "unknown-tool");
        assert_eq!(bare.difficulty, 1);
        assert!(bare.platforms.is_empty());
    }

    #[test]
    fn quality_rewards_rich_entries() {
        let n = Normalizer::shared();
        let raw = json!({
            "name": "git", "description": "vcs", "difficulty": 2, "category": "Dev",
            "platforms": ["mac", "linux"], "installation": "brew",
            "examples": ["git status"], "alternatives": ["hg"], "documentation": "https://git-scm.com"
        });
        let rec = n.normalize_tool(&raw);
        // required 30 + category 5 + platforms 7 + install 5 + examples 5 + optional 6
        assert_eq!(rec.quality.score, 58);
        assert_eq!(rec.quality.max_score, 64);
        assert_eq!(rec.quality.percentage, 91);
        assert_eq!(rec.quality.grade, Grade::A);

        let poor = n.normalize_tool(&json!({"name": "x"}));
        assert_eq!(poor.quality.grade, Grade::F);
    }

    #[test]
    fn wrapped_tool_lists_and_duplicate_ids() {
        let n = Normalizer::shared();
        let wrapped = json!({"tools": [{"name": "jq"}, {"name": "jq"}, 5, {"name": "fd"}]});
        let tools = n.tools_from_value(&wrapped);
        let ids: Vec<_> = tools.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["jq", "jq-2", "fd"]);
        assert_eq!(n.tools_from_value(&json!({"items": [{"name": "bat"}]})).len(), 1);
        assert!(n.tools_from_value(&json!("nope")).is_empty());
    }

    #[test]
    fn categories_keyed_and_recounted() {
        let mut cats = categories_from_value(&json!({"dev": {"name": "Development", "toolCount": 40}, "net": {"description": "Networking"}}));
        assert_eq!(cats.len(), 2);
        let net = cats.iter().find(|c| c.id == "net").unwrap();
        assert_eq!(net.name, "net");
        let tools = vec![
            ToolRecord { category: "Development".into(), ..Default::default() },
            ToolRecord { category: "Development".into(), ..Default::default() },
            ToolRecord { category: "net".into(), ..Default::default() },
        ];
        recalculate_category_counts(&mut cats, &tools);
        let dev = cats.iter().find(|c| c.id == "dev").unwrap();
        assert_eq!(dev.tool_count, 2);
        assert_eq!(cats.iter().find(|c| c.id == "net").unwrap().tool_count, 1);
    }

    #[test]
    fn stats_accept_wrapped_and_reconcile() {
        let mut s = stats_from_value(&json!({"stats": {"totalTools": 999, "version": "2.1.0"}}));
        assert_eq!(s.total_tools, 999);
        assert_eq!(s.version, "2.1.0");
        reconcile_stats(&mut s, &[ToolRecord::default()], &[]);
        assert_eq!(s.total_tools, 1);
        assert_eq!(s.total_categories, 0);
    }
}
