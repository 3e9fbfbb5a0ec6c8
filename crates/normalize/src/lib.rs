//! toolctx normalizer: maps free-form platform and installation metadata onto
//! canonical vocabularies, and turns raw JSON tool entries into `ToolRecord`s.
//!
//! Resolution order for a single token (trimmed):
//! - exact canonical name (so canonical output always maps to itself)
//! - lower-cased alias table lookup (first group in vocabulary order wins)
//! - case-insensitive match against the canonical names
//! - installation only: substring containment against every alias, either direction
//! - otherwise the trimmed token is kept verbatim
//!
//! Normalization never fails and is idempotent.

#![forbid(unsafe_code)]

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use serde_json::Value;
use toolctx_core::TagList;

mod entry;

pub use entry::{categories_from_value, parse_difficulty, quality, recalculate_category_counts, reconcile_stats, slugify, stats_from_value};

/// `(canonical, aliases)` groups in canonical vocabulary order.
pub type AliasTable = &'static [(&'static str, &'static [&'static str])];

pub const PLATFORM_ALIASES: AliasTable = &[
    ("macOS", &["mac", "macos", "osx", "os x", "darwin", "apple", "macintosh", "mac os", "mac-os", "macosx", "mac os x"]),
    (
        "Linux",
        &[
            "linux", "nix", "unix", "gnu", "ubuntu", "debian", "fedora", "centos", "rhel", "arch", "manjaro", "redhat", "red hat", "suse",
            "opensuse", "gentoo", "mint", "kali", "alpine", "gnu/linux",
        ],
    ),
    ("Windows", &["windows", "win", "win32", "win64", "pc", "microsoft", "dos", "ms-dos", "msdos", "windows nt", "winnt"]),
    (
        "cross-platform",
        &["cross-platform", "cross platform", "crossplatform", "universal", "any", "all", "multi-platform", "multiplatform", "portable"],
    ),
    ("web", &["web", "browser", "online", "webapp", "web-based", "cloud", "saas"]),
    ("BSD", &["bsd", "freebsd", "openbsd", "netbsd", "dragonfly", "dragonflybsd"]),
    ("Unix", &["unix", "posix", "unix-like", "unixlike"]),
    ("Android", &["android", "droid"]),
    ("iOS", &["ios", "iphone", "ipad", "ipados"]),
];

pub const INSTALLATION_ALIASES: AliasTable = &[
    (
        "built-in",
        &[
            "builtin", "built in", "built-in", "native", "system", "default", "included", "preinstalled", "pre-installed", "bundled",
            "ships with", "comes with", "out of the box", "ootb",
        ],
    ),
    ("homebrew", &["brew", "home-brew", "home brew", "homebrew", "linuxbrew", "homebrew/core", "homebrew/cask", "brewfile"]),
    ("npm", &["node", "npm", "npx", "nodejs", "node.js", "yarn", "pnpm", "bun", "node package manager", "javascript", "js"]),
    (
        "pip",
        &[
            "pip", "pip3", "python", "pypi", "python-pip", "conda", "pipenv", "poetry", "python package", "py", "python3", "pip install",
            "easy_install",
        ],
    ),
    (
        "package-manager",
        &[
            "package manager", "pkg", "package", "apt", "yum", "dnf", "pacman", "zypper", "apk", "emerge", "apt-get", "aptitude", "snap",
            "flatpak", "nix", "guix", "port", "macports", "ports",
        ],
    ),
    (
        "download",
        &[
            "download", "binary", "executable", "installer", "dmg", "msi", "exe", "app", "appimage", "deb", "rpm", "tar", "zip", "archive",
            "release", "github release", "direct download",
        ],
    ),
    (
        "source",
        &[
            "source", "compile", "build", "git", "github", "manual", "make", "cmake", "from source", "build from source", "compilation",
            "svn", "mercurial", "hg", "clone",
        ],
    ),
    ("cargo", &["cargo", "rust", "rustup", "crates.io", "cargo install"]),
    ("gem", &["gem", "ruby", "rubygems", "bundler", "gem install"]),
    ("go", &["go", "golang", "go get", "go install", "go mod"]),
    ("docker", &["docker", "container", "docker hub", "dockerfile", "docker image", "docker pull"]),
    ("script", &["script", "curl", "wget", "shell", "bash", "sh", "install script", "installer script", "one-liner"]),
];

/// Boolean platform flags recognised on object-shaped platform fields.
const PLATFORM_FLAGS: [&str; 5] = ["macOS", "linux", "windows", "mac", "win"];

enum Resolved<'a> {
    Canonical(usize),
    Unknown(&'a str),
}

/// One canonical vocabulary with its alias lookup tables.
pub struct Vocabulary {
    table: AliasTable,
    by_exact: FxHashMap<&'static str, usize>,
    by_alias: FxHashMap<&'static str, usize>,
    by_canonical: FxHashMap<String, usize>,
    substring: bool,
}

impl Vocabulary {
    fn new(table: AliasTable, substring: bool) -> Self {
        let mut by_alias = FxHashMap::default();
        for (i, (_, aliases)) in table.iter().enumerate() {
            for a in aliases.iter() {
                by_alias.entry(*a).or_insert(i);
            }
        }
        let by_exact = table.iter().enumerate().map(|(i, (c, _))| (*c, i)).collect();
        let by_canonical = table.iter().enumerate().map(|(i, (c, _))| (c.to_lowercase(), i)).collect();
        Self { table, by_exact, by_alias, by_canonical, substring }
    }

    pub fn canonical(&self) -> impl Iterator<Item = &'static str> + '_ { self.table.iter().map(|(c, _)| *c) }

    pub fn aliases(&self) -> AliasTable { self.table }

    fn resolve<'a>(&self, token: &'a str) -> Option<Resolved<'a>> {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Some(&i) = self.by_exact.get(trimmed) {
            return Some(Resolved::Canonical(i));
        }
        let key = trimmed.to_lowercase();
        if let Some(&i) = self.by_alias.get(key.as_str()) {
            return Some(Resolved::Canonical(i));
        }
        if let Some(&i) = self.by_canonical.get(&key) {
            return Some(Resolved::Canonical(i));
        }
        if self.substring {
            for (i, (_, aliases)) in self.table.iter().enumerate() {
                if aliases.iter().any(|a| key.contains(a) || a.contains(key.as_str())) {
                    return Some(Resolved::Canonical(i));
                }
            }
        }
        Some(Resolved::Unknown(trimmed))
    }

    /// Canonical form of one token; `None` for blank input.
    pub fn normalize_token(&self, token: &str) -> Option<String> {
        match self.resolve(token)? {
            Resolved::Canonical(i) => Some(self.table[i].0.to_string()),
            Resolved::Unknown(s) => Some(s.to_string()),
        }
    }

    /// Deduplicated tags: canonical ones in vocabulary order, then unknown ones in first-seen order.
    pub fn normalize_all<'a, I: IntoIterator<Item = &'a str>>(&self, tokens: I) -> TagList {
        let mut hit = vec![false; self.table.len()];
        let mut unknown: Vec<String> = Vec::new();
        for t in tokens {
            match self.resolve(t) {
                Some(Resolved::Canonical(i)) => hit[i] = true,
                Some(Resolved::Unknown(s)) => {
                    if !unknown.iter().any(|u| u.eq_ignore_ascii_case(s)) {
                        unknown.push(s.to_string());
                    }
                }
                None => {}
            }
        }
        let mut out: TagList = self.table.iter().zip(hit).filter(|(_, h)| *h).map(|((c, _), _)| c.to_string()).collect();
        out.extend(unknown);
        out
    }
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn split_on(s: &str, seps: &[char]) -> Vec<String> { s.split(seps).map(str::trim).filter(|p| !p.is_empty()).map(str::to_string).collect() }

/// Raw platform tokens from a string, list or object-shaped field.
pub fn extract_platforms(raw: &Value) -> Vec<String> {
    match raw {
        Value::String(s) => split_on(s, &[',', '|']),
        Value::Array(items) => items.iter().filter_map(scalar_string).collect(),
        Value::Object(map) => {
            let flags: Vec<String> = PLATFORM_FLAGS.iter().filter(|k| map.get(**k) == Some(&Value::Bool(true))).map(|k| k.to_string()).collect();
            if !flags.is_empty() {
                return flags;
            }
            match (map.get("platforms"), map.get("platform")) {
                (Some(list @ Value::Array(_)), _) => extract_platforms(list),
                (_, Some(s @ Value::String(_))) => extract_platforms(s),
                _ => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}

fn infer_from_command(command: &str) -> &'static str {
    let c = command.to_lowercase();
    if c.contains("brew") {
        "homebrew"
    } else if c.contains("npm") || c.contains("npx") {
        "npm"
    } else if c.contains("pip") {
        "pip"
    } else if c.contains("cargo") {
        "cargo"
    } else if c.contains("gem") {
        "gem"
    } else if c.contains("apt") || c.contains("yum") {
        "package-manager"
    } else {
        "source"
    }
}

/// Raw installation tokens from a string, list or object-shaped field.
pub fn extract_installation(raw: &Value) -> Vec<String> {
    match raw {
        Value::String(s) => split_on(s, &[',', '|', '/']),
        Value::Array(items) => items.iter().filter_map(scalar_string).collect(),
        Value::Object(map) => {
            let present = |k: &str| map.get(k).filter(|v| !v.is_null());
            if let Some(m) = present("method") {
                extract_installation(m)
            } else if let Some(list @ Value::Array(_)) = present("methods") {
                extract_installation(list)
            } else if let Some(t) = present("type") {
                extract_installation(t)
            } else if let Some(Value::String(cmd)) = present("command") {
                vec![infer_from_command(cmd).to_string()]
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    }
}

pub struct Normalizer {
    platforms: Vocabulary,
    installation: Vocabulary,
}

static SHARED: Lazy<Normalizer> = Lazy::new(Normalizer::new);

impl Default for Normalizer {
    fn default() -> Self { Self::new() }
}

impl Normalizer {
    pub fn new() -> Self { Self { platforms: Vocabulary::new(PLATFORM_ALIASES, false), installation: Vocabulary::new(INSTALLATION_ALIASES, true) } }

    /// Process-wide instance; the tables are immutable so sharing is free.
    pub fn shared() -> &'static Normalizer { &SHARED }

    pub fn platforms(&self) -> &Vocabulary { &self.platforms }
    pub fn installation(&self) -> &Vocabulary { &self.installation }

    pub fn normalize_platforms(&self, raw: &Value) -> TagList {
        let tokens = extract_platforms(raw);
        self.platforms.normalize_all(tokens.iter().map(String::as_str))
    }

    pub fn normalize_installation(&self, raw: &Value) -> TagList {
        let tokens = extract_installation(raw);
        self.installation.normalize_all(tokens.iter().map(String::as_str))
    }

    /// Canonical form of a single platform value (e.g. a filter selection).
    pub fn normalize_platform(&self, token: &str) -> String { self.platforms.normalize_token(token).unwrap_or_default() }

    /// Canonical form of a single installation value.
    pub fn normalize_installation_method(&self, token: &str) -> String { self.installation.normalize_token(token).unwrap_or_default() }
}
