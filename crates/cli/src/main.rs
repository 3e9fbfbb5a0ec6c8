use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use toolctx_api::{AppStatus, MemoryStorage, MemorySurface, Page, Session};
use toolctx_core::{Category, SearchResult, Settings, SortBy, ToolRecord};
use toolctx_normalize::Normalizer;
use toolctx_recovery::{HealthReport, NotifyAction};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "toolctx", version, about = "Search and filter a catalogue of command-line tools")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Directory holding tools.json, categories.json and stats.json
    #[arg(long = "data", global = true, env = "TOOLCTX_DATA_DIR")]
    data: Option<PathBuf>,

    /// Run full-text search on a background worker task
    #[arg(long = "worker", global = true, action = ArgAction::SetTrue)]
    worker: bool,

    /// Results per page
    #[arg(long = "per-page", global = true)]
    per_page: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Field {
    Platform,
    Installation,
}

#[derive(Args, Debug)]
struct FilterArgs {
    /// Free-text query (at least two characters)
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    category: Option<String>,
    /// Exact difficulty, 1-5
    #[arg(long)]
    difficulty: Option<String>,
    /// Platform; aliases like "osx" are accepted
    #[arg(long)]
    platform: Option<String>,
    /// Installation method; aliases like "brew" are accepted
    #[arg(long)]
    installation: Option<String>,
    /// name, name-desc, category or difficulty
    #[arg(long, default_value = "name")]
    sort: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ranked search over names, descriptions, tags and examples
    Search {
        query: String,
        #[arg(long = "limit", default_value_t = 20)]
        limit: usize,
    },
    /// List tools matching filters
    Ls {
        #[command(flatten)]
        filters: FilterArgs,
        /// Number of pages to show
        #[arg(long = "pages", default_value_t = 1)]
        pages: u32,
    },
    /// Categories with tool counts
    Categories,
    /// Canonical tags for a raw platform or installation value (string or JSON)
    Normalize {
        #[arg(value_enum)]
        field: Field,
        value: String,
    },
    /// Complete a partial query
    Suggest {
        partial: String,
        #[arg(long = "limit", default_value_t = 8)]
        limit: usize,
    },
    /// Catalog, search and health status
    Status,
    /// Interactive search-as-you-type; Ctrl-C or :q to quit
    Browse,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Search { .. } => "search",
            Commands::Ls { .. } => "ls",
            Commands::Categories => "categories",
            Commands::Normalize { .. } => "normalize",
            Commands::Suggest { .. } => "suggest",
            Commands::Status => "status",
            Commands::Browse => "browse",
        }
    }
}

fn init_tracing() {
    let env = std::env::var("TOOLCTX_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("TOOLCTX_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid TOOLCTX_METRICS_ADDR; expected host:port");
        }
    }
}

fn settings_from(cli: &Cli) -> Settings {
    let mut s = Settings::from_env();
    if let Some(dir) = &cli.data {
        s.data_dir = dir.clone();
    }
    if cli.worker {
        s.use_worker = true;
    }
    if let Some(n) = cli.per_page.filter(|n| *n > 0) {
        s.items_per_page = n;
    }
    s
}

fn print_json<T: Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn print_records(items: &[ToolRecord]) {
    println!("{:<20} {:<24} {:>4}  DESCRIPTION", "NAME", "CATEGORY", "DIFF");
    for r in items {
        println!("{:<20} {:<24} {:>4}  {}", clip(&r.name, 20), clip(&r.category, 24), r.difficulty, clip(&r.description, 60));
    }
}

fn print_page(page: &Page, output: Output) -> Result<()> {
    match output {
        Output::Json => print_json(page),
        Output::Human => {
            print_records(&page.items);
            let more = if page.has_more { " (more: --pages or :more)" } else { "" };
            println!("showing {} of {}{}", page.items.len(), page.total, more);
            Ok(())
        }
    }
}

fn print_results(results: &[SearchResult], output: Output) -> Result<()> {
    match output {
        Output::Json => print_json(&results),
        Output::Human => {
            println!("{:<20} {:>7}  {:<24} DESCRIPTION", "NAME", "SCORE", "CATEGORY");
            for r in results {
                println!("{:<20} {:>7.2}  {:<24} {}", clip(&r.record.name, 20), r.score, clip(&r.record.category, 24), clip(&r.record.description, 60));
            }
            Ok(())
        }
    }
}

fn print_status(status: &AppStatus, health: &HealthReport, output: Output) -> Result<()> {
    #[derive(Serialize)]
    struct Full<'a> {
        status: &'a AppStatus,
        health: &'a HealthReport,
    }
    match output {
        Output::Json => print_json(&Full { status, health }),
        Output::Human => {
            let strategy = status.strategy.map(|s| s.as_str()).unwrap_or("none");
            println!("source      {} (epoch {})", status.source, status.epoch);
            println!("tools       {} ({} shown)", status.tool_count, status.filtered_count);
            println!("search      {} ready={} worker={}", strategy, status.ready, status.worker);
            if health.healthy() {
                println!("health      ok");
            } else {
                for (class, ok) in &health.recovered {
                    println!("health      {} recovered={}", class, ok);
                }
            }
            Ok(())
        }
    }
}

fn print_categories(categories: &[Category], output: Output) -> Result<()> {
    match output {
        Output::Json => print_json(&categories),
        Output::Human => {
            for c in categories {
                println!("{:<32} {:>4}", c.name, c.tool_count);
            }
            Ok(())
        }
    }
}

/// Notifications go to stderr so JSON output stays clean.
fn flush_toasts(session: &Session) {
    for n in session.toasts().drain() {
        let actions: Vec<&str> = n.actions.iter().map(NotifyAction::label).collect();
        if actions.is_empty() {
            eprintln!("[{}] {}", format!("{:?}", n.kind).to_lowercase(), n.message);
        } else {
            eprintln!("[{}] {} ({})", format!("{:?}", n.kind).to_lowercase(), n.message, actions.join(", "));
        }
    }
}

async fn apply_filter_args(session: &Session, f: &FilterArgs) -> Result<usize> {
    let sort = SortBy::from_str(&f.sort).with_context(|| format!("invalid --sort '{}'", f.sort))?;
    {
        let mut app = session.app().lock().await;
        app.set_search(f.search.as_deref().unwrap_or(""));
        app.set_category(f.category.as_deref().unwrap_or(""));
        app.set_difficulty(f.difficulty.as_deref().unwrap_or(""));
        app.set_platform(f.platform.as_deref().unwrap_or(""));
        app.set_installation(f.installation.as_deref().unwrap_or(""));
        app.set_sort(sort);
    }
    Ok(session.apply_now().await)
}

async fn search(session: &Session, query: &str, limit: usize) -> Vec<SearchResult> {
    let first = session.app().lock().await.search(query, limit).await;
    match first {
        Ok(r) => r,
        Err(e) => {
            session.report_error(e, "search").await;
            session.app().lock().await.search(query, limit).await.unwrap_or_default()
        }
    }
}

async fn browse(session: &mut Session, settings: &Settings, output: Output) -> Result<()> {
    session.start_health_loop();
    print_page(&session.page().await, output)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let line = line.trim().to_string();
        let (cmd, arg) = match line.split_once(' ') {
            Some((c, a)) => (c.to_string(), a.trim().to_string()),
            None => (line.clone(), String::new()),
        };
        let wait = match cmd.as_str() {
            ":q" | ":quit" => break,
            ":more" => {
                session.app().lock().await.load_more();
                None
            }
            ":reset" => {
                session.run_action(NotifyAction::ResetAllFilters).await;
                None
            }
            ":status" => {
                let health = session.health_check().await;
                print_status(&session.status().await, &health, output)?;
                flush_toasts(session);
                continue;
            }
            ":cat" => {
                session.queue_filter(move |app| app.set_category(&arg));
                Some(settings.filter_debounce)
            }
            ":platform" => {
                session.queue_filter(move |app| app.set_platform(&arg));
                Some(settings.filter_debounce)
            }
            ":install" => {
                session.queue_filter(move |app| app.set_installation(&arg));
                Some(settings.filter_debounce)
            }
            ":difficulty" => {
                session.queue_filter(move |app| app.set_difficulty(&arg));
                Some(settings.filter_debounce)
            }
            ":sort" => match SortBy::from_str(&arg) {
                Ok(sort) => {
                    session.queue_filter(move |app| app.set_sort(sort));
                    Some(settings.filter_debounce)
                }
                Err(e) => {
                    eprintln!("{e}");
                    continue;
                }
            },
            _ => {
                session.queue_search(line);
                Some(settings.search_debounce)
            }
        };
        if let Some(delay) = wait {
            // let the debounced apply land before printing
            tokio::time::sleep(delay + Duration::from_millis(25)).await;
        }
        print_page(&session.page().await, output)?;
        flush_toasts(session);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let settings = settings_from(&cli);
    let output = cli.output;
    metrics::counter!("cli_commands_total", 1u64, "command" => cli.command.name());

    if let Commands::Normalize { field, value } = &cli.command {
        let raw = serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.clone()));
        let tags = match field {
            Field::Platform => Normalizer::shared().normalize_platforms(&raw),
            Field::Installation => Normalizer::shared().normalize_installation(&raw),
        };
        return match output {
            Output::Json => print_json(&tags),
            Output::Human => {
                println!("{}", tags.join(", "));
                Ok(())
            }
        };
    }

    info!(data_dir = %settings.data_dir.display(), worker = settings.use_worker, "starting session");
    let mut session = Session::new(settings.clone(), Arc::new(MemoryStorage::new()), Arc::new(MemorySurface::new()));
    if session.start().await.is_err() {
        flush_toasts(&session);
        session.shutdown().await;
        anyhow::bail!("no tool data could be loaded from {}", settings.data_dir.display());
    }

    match cli.command {
        Commands::Search { query, limit } => {
            let results = search(&session, &query, limit).await;
            print_results(&results, output)?;
        }
        Commands::Ls { filters, pages } => {
            let n = apply_filter_args(&session, &filters).await?;
            {
                let mut app = session.app().lock().await;
                for _ in 1..pages.max(1) {
                    if !app.load_more() {
                        break;
                    }
                }
            }
            info!(matched = n, "listing");
            print_page(&session.page().await, output)?;
        }
        Commands::Categories => {
            let catalog = session.app().lock().await.store().current();
            print_categories(&catalog.categories, output)?;
        }
        Commands::Suggest { partial, limit } => {
            let out = session.app().lock().await.suggestions(&partial, limit);
            match output {
                Output::Json => print_json(&out)?,
                Output::Human => out.iter().for_each(|s| println!("{s}")),
            }
        }
        Commands::Status => {
            let health = session.health_check().await;
            print_status(&session.status().await, &health, output)?;
        }
        Commands::Browse => browse(&mut session, &settings, output).await?,
        Commands::Normalize { .. } => warn!("normalize handled before loading"),
    }

    flush_toasts(&session);
    session.shutdown().await;
    Ok(())
}
