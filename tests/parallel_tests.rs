mod common;

use common::{probe, random_gallery, shared, ScriptedMatcher};
use huginn_afis::{EngineConfig, Identifier};

#[test]
fn test_pool_stats_after_searches() {
    let matcher = shared(ScriptedMatcher::new());
    let config = EngineConfig::default().with_workers(2).with_min_chunk_size(16);
    let identifier = match Identifier::new(matcher.clone(), config) {
        Ok(identifier) => identifier,
        Err(e) => panic!("Failed to create Identifier: {e}"),
    };

    let initial = identifier.pool_stats();
    assert_eq!(initial.workers.len(), 2);
    assert_eq!(initial.total_dispatched, 0);

    for seed in 0..3 {
        if let Err(e) = identifier.identify(&probe(), random_gallery(100, seed)) {
            panic!("identify failed: {e}");
        }
    }

    let stats = identifier.pool_stats();
    assert_eq!(stats.total_scored, 300);
    assert_eq!(stats.total_scored as usize, matcher.calls());
    assert!(stats.total_dispatched >= 3);
    let chunks: u64 = stats.workers.iter().map(|w| w.chunks).sum();
    assert_eq!(chunks, stats.total_dispatched);
    assert!(stats.workers.iter().all(|w| w.chunks > 0), "round-robin feeds every worker");
    assert!(stats.to_string().contains("entries scored: 300"));
}

#[test]
fn test_single_worker_pool() {
    let matcher = shared(ScriptedMatcher::new());
    let config = EngineConfig::default().with_workers(1).with_min_chunk_size(1);
    let identifier = match Identifier::new(matcher, config) {
        Ok(identifier) => identifier,
        Err(e) => panic!("Failed to create Identifier: {e}"),
    };

    if let Err(e) = identifier.identify(&probe(), random_gallery(10, 9)) {
        panic!("identify failed: {e}");
    }
    let stats = identifier.pool_stats();
    assert_eq!(stats.workers.len(), 1);
    // 10 entries, 1 worker: capped at 4 chunks
    assert_eq!(stats.total_dispatched, 4);
    assert_eq!(stats.workers[0].scored, 10);
}
