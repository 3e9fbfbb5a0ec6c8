use std::sync::Arc;
use std::time::Instant;

use toolctx_core::{Example, ToolRecord};
use toolctx_search::{FullTextIndex, FuzzyIndex, Records, ScanStrategy, SearchStrategy, SubstringIndex};

const CATEGORIES: [&str; 6] = ["Development", "Networking", "Text Processing", "System", "Security", "Containers"];
const WORDS: [&str; 12] = ["fast", "search", "files", "process", "monitor", "network", "archive", "secure", "shell", "json", "stream", "build"];

fn gen_tool(i: usize) -> ToolRecord {
    let name = format!("tool{i:05}");
    ToolRecord {
        id: name.clone(),
        description: format!("{} {} {} utility", WORDS[i % 12], WORDS[(i / 12) % 12], WORDS[(i / 144) % 12]),
        category: CATEGORIES[i % CATEGORIES.len()].to_string(),
        tags: vec![WORDS[(i * 7) % 12].to_string()],
        examples: vec![Example { command: format!("{name} --help"), description: "show usage".into() }],
        difficulty: (i % 5 + 1) as u8,
        name,
        ..Default::default()
    }
}

fn percentile_us(xs: &mut [u128], p: f64) -> u128 {
    xs.sort_unstable();
    let idx = ((xs.len() as f64 - 1.0) * p).round() as usize;
    xs[idx]
}

fn env_or(key: &str, default: usize) -> usize { std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default) }

fn main() {
    let n = env_or("TOOLCTX_BENCH_DOCS", 10_000);
    let limit = env_or("TOOLCTX_BENCH_LIMIT", 50);

    eprintln!("generating {n} tools");
    let records: Records = Arc::from((0..n).map(gen_tool).collect::<Vec<_>>());

    let t = Instant::now();
    let full = match FullTextIndex::build(&records) {
        Ok(idx) => idx,
        Err(e) => {
            eprintln!("full-text build failed: {e}");
            return;
        }
    };
    println!("build full-text: {:.1}ms terms={}", t.elapsed().as_secs_f64() * 1_000.0, full.term_count());
    let t = Instant::now();
    let fuzzy = FuzzyIndex::build(&records);
    println!("build fuzzy: {:.1}ms", t.elapsed().as_secs_f64() * 1_000.0);
    let t = Instant::now();
    let substring = SubstringIndex::build(&records);
    println!("build substring: {:.1}ms", t.elapsed().as_secs_f64() * 1_000.0);
    let scan = ScanStrategy::new(Arc::clone(&records));

    let mut queries: Vec<String> = WORDS.iter().map(|w| w.to_string()).collect();
    queries.extend(["serch", "netw*", "fast files", "tool00042", "monitr~1"].map(String::from));

    let tiers: [(&str, &dyn SearchStrategy); 4] = [("full-text", &full), ("fuzzy", &fuzzy), ("substring", &substring), ("scan", &scan)];
    for (label, strategy) in tiers {
        let mut times: Vec<u128> = Vec::with_capacity(queries.len());
        let mut failures = 0usize;
        for q in &queries {
            let t = Instant::now();
            if strategy.search(q, limit).is_err() {
                failures += 1;
            }
            times.push(t.elapsed().as_micros());
        }
        let p50 = percentile_us(&mut times.clone(), 0.50) as f64 / 1000.0;
        let p99 = percentile_us(&mut times, 0.99) as f64 / 1000.0;
        println!("{label}: p50={p50:.3}ms p99={p99:.3}ms ({} queries, limit={limit}, failures={failures})", queries.len());
    }
}
