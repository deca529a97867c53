mod common;

use common::ScriptedMatcher;
use crossbeam::channel::{bounded, Receiver, Sender};
use huginn_afis::{
    AfisError, EnrolledRecord, GalleryCache, GallerySource, MemorySource, ValidatingDecoder,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

/// Memory source that counts enumerations and can be slowed down or made to fail.
struct CountingSource {
    inner: MemorySource,
    enumerations: AtomicUsize,
    delay: Duration,
    fail_next: AtomicBool,
}

impl CountingSource {
    fn new(inner: MemorySource) -> Self {
        Self {
            inner,
            enumerations: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail_next: AtomicBool::new(false),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }
}

impl GallerySource for CountingSource {
    fn enumerate(&self, partition: &str) -> Result<Vec<EnrolledRecord>, AfisError> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(AfisError::Source("enrollment store offline".to_string()));
        }
        self.inner.enumerate(partition)
    }
}

/// Source whose "slow" partition blocks until released.
struct GatedSource {
    entered: Sender<()>,
    release: Receiver<()>,
}

impl GallerySource for GatedSource {
    fn enumerate(&self, partition: &str) -> Result<Vec<EnrolledRecord>, AfisError> {
        if partition == "slow" {
            let _ = self.entered.send(());
            let _ = self.release.recv();
        }
        Ok(vec![EnrolledRecord::new(1u64, vec![42], None)])
    }
}

fn records(partition: &str, count: u64) -> MemorySource {
    let source = MemorySource::new();
    for id in 0..count {
        source.insert(partition, EnrolledRecord::new(id, vec![id as u8 + 1, 0x10], Some("thumb")));
    }
    source
}

fn cache(source: Arc<dyn GallerySource>) -> GalleryCache {
    GalleryCache::new(source, Arc::new(ValidatingDecoder::new(Arc::new(ScriptedMatcher::new()))))
}

#[test]
fn concurrent_first_loads_share_one_build() {
    const CALLERS: usize = 16;

    let source = Arc::new(
        CountingSource::new(records("right-thumb", 50)).with_delay(Duration::from_millis(50)),
    );
    let cache = cache(source.clone());
    let barrier = Barrier::new(CALLERS);

    let partitions: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    cache.load("right-thumb")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(Ok(partition)) => partition,
                Ok(Err(e)) => panic!("load failed: {e}"),
                Err(_) => panic!("loader thread panicked"),
            })
            .collect()
    });

    assert_eq!(source.enumerations(), 1);
    assert!(partitions.iter().all(|p| Arc::ptr_eq(p, &partitions[0])));
    assert_eq!(partitions[0].len(), 50);

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, (CALLERS - 1) as u64);
    assert_eq!(stats.builds, 1);
}

#[test]
fn building_one_key_does_not_block_another() {
    let (entered_tx, entered_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let cache = cache(Arc::new(GatedSource { entered: entered_tx, release: release_rx }));

    thread::scope(|scope| {
        let slow = scope.spawn(|| cache.load("slow"));

        if entered_rx.recv_timeout(Duration::from_secs(5)).is_err() {
            panic!("slow build never started");
        }
        // "slow" is still building here
        match cache.load("fast") {
            Ok(partition) => assert_eq!(partition.len(), 1),
            Err(e) => panic!("load failed: {e}"),
        }
        assert_eq!(cache.cached_partitions(), vec!["fast".to_string()]);

        let _ = release_tx.send(());
        match slow.join() {
            Ok(Ok(partition)) => assert_eq!(partition.len(), 1),
            Ok(Err(e)) => panic!("load failed: {e}"),
            Err(_) => panic!("loader thread panicked"),
        }
    });

    assert_eq!(cache.cached_partitions(), vec!["fast".to_string(), "slow".to_string()]);
}

#[test]
fn invalidate_rebuilds_from_current_source() {
    let memory = Arc::new(CountingSource::new(records("left-index", 3)));
    let cache = cache(memory.clone());

    let before = match cache.load("left-index") {
        Ok(partition) => partition,
        Err(e) => panic!("load failed: {e}"),
    };
    memory.inner.insert("left-index", EnrolledRecord::new(99u64, vec![7], None));

    // still the cached snapshot
    assert_eq!(cache.load("left-index").map(|p| p.len()), Ok(3));
    assert_eq!(memory.enumerations(), 1);

    assert!(cache.invalidate("left-index"));
    assert_eq!(cache.load("left-index").map(|p| p.len()), Ok(4));
    assert_eq!(memory.enumerations(), 2);

    // holders of the old snapshot are unaffected
    assert_eq!(before.len(), 3);
}

#[test]
fn reload_and_invalidate_all() {
    let memory = Arc::new(CountingSource::new(records("a", 2)));
    memory.inner.insert("b", EnrolledRecord::new(5u64, vec![9], None));
    let cache = cache(memory.clone());

    assert!(cache.load("a").is_ok());
    assert!(cache.load("b").is_ok());
    assert_eq!(cache.cached_partitions(), vec!["a".to_string(), "b".to_string()]);

    memory.inner.clear("a");
    memory.inner.insert("a", EnrolledRecord::new(8u64, vec![1], None));
    assert_eq!(cache.reload("a").map(|p| p.len()), Ok(1));

    cache.invalidate_all();
    assert!(cache.cached_partitions().is_empty());
    assert_eq!(cache.load("b").map(|p| p.len()), Ok(1));
    assert_eq!(memory.enumerations(), 4);
}

#[test]
fn failed_build_is_retried() {
    let memory = Arc::new(CountingSource::new(records("p", 2)));
    memory.fail_next.store(true, Ordering::SeqCst);
    let cache = cache(memory.clone());

    assert!(matches!(cache.load("p"), Err(AfisError::Source(_))));
    assert!(cache.cached_partitions().is_empty());

    assert_eq!(cache.load("p").map(|p| p.len()), Ok(2));
    assert_eq!(memory.enumerations(), 2);
}

#[test]
fn partition_of_only_corrupt_records_is_not_found() {
    let memory = MemorySource::new()
        .with_record("p", EnrolledRecord::new(1u64, Vec::new(), None))
        .with_record("p", EnrolledRecord::new(2u64, Vec::new(), Some("thumb")));
    let cache = cache(Arc::new(memory));

    assert!(matches!(cache.load("p"), Err(AfisError::NotFound(_))));
    assert_eq!(cache.stats().skipped, 2);
}
