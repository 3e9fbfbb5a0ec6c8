use toolctx_core::ToolRecord;
use toolctx_filter::{DocSet, FilterIndex};

// Small deterministic LCG so the generated catalogue is stable across runs.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }
    fn pick<'a>(&mut self, xs: &[&'a str]) -> &'a str { xs[(self.next() as usize) % xs.len()] }
}

fn catalogue(n: usize, seed: u64) -> Vec<ToolRecord> {
    let cats = ["Development", "System", "Networking", "Text Processing", ""];
    let plats = ["macOS", "Linux", "Windows", "web", "BSD"];
    let inst = ["homebrew", "npm", "pip", "source", "cargo"];
    let mut rng = Lcg(seed);
    (0..n)
        .map(|i| {
            let platforms: Vec<String> = (0..rng.next() % 3).map(|_| rng.pick(&plats).to_string()).collect();
            let installation: Vec<String> = (0..rng.next() % 3).map(|_| rng.pick(&inst).to_string()).collect();
            ToolRecord {
                id: format!("tool-{i}"),
                name: format!("tool {i}"),
                category: rng.pick(&cats).to_string(),
                platforms: platforms.into(),
                installation: installation.into(),
                difficulty: (rng.next() % 5) as u8 + 1,
                ..Default::default()
            }
        })
        .collect()
}

#[test]
fn category_buckets_partition_ids() {
    for seed in [1u64, 7, 42, 2024] {
        let records = catalogue(300, seed);
        let mut idx = FilterIndex::new();
        idx.build(&records);

        let buckets: Vec<DocSet> = idx.categories().iter().map(|(c, _)| idx.by_category(c)).collect();
        let total: usize = buckets.iter().map(DocSet::len).sum();
        assert_eq!(total, records.len(), "seed {seed}: buckets must cover every id exactly once");
        for (i, a) in buckets.iter().enumerate() {
            for b in &buckets[i + 1..] {
                assert!(a.intersect(b).is_empty(), "seed {seed}: buckets overlap");
            }
        }
        let union = buckets.iter().fold(DocSet::empty(), |acc, b| acc.union(b));
        assert_eq!(union, idx.all());
    }
}

#[test]
fn difficulty_range_matches_scan() {
    let records = catalogue(200, 99);
    let mut idx = FilterIndex::new();
    idx.build(&records);
    for (lo, hi) in [(1u8, 1u8), (2, 4), (1, 5), (5, 5)] {
        let expected: DocSet = records.iter().enumerate().filter(|(_, r)| (lo..=hi).contains(&r.difficulty)).map(|(i, _)| i as u32).collect();
        assert_eq!(idx.by_difficulty_range(lo, hi), expected);
    }
}

#[test]
fn platform_lookup_matches_scan() {
    let records = catalogue(200, 5);
    let mut idx = FilterIndex::new();
    idx.build(&records);
    let expected: DocSet = records.iter().enumerate().filter(|(_, r)| r.platforms.iter().any(|p| p == "Linux")).map(|(i, _)| i as u32).collect();
    assert_eq!(idx.by_platform("linux"), expected);
}
