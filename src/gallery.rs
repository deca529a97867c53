//! Gallery partitions and their process-lifetime cache.
//!
//! A partition is built on first request from a [`GallerySource`], decoded
//! record by record, and kept as an immutable snapshot until it is explicitly
//! invalidated. Concurrent first requests for the same key share one build;
//! builds of different keys never wait on each other.

use crate::error::AfisError;
use crate::matcher::Matcher;
use crate::template::{GalleryEntry, IdentityKey, Template};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

/// Immutable snapshot of one gallery partition.
pub type Partition = Arc<[GalleryEntry]>;

/// Persisted enrollment record as handed out by a gallery source.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrolledRecord {
    pub identity: IdentityKey,
    pub payload: Vec<u8>,
    pub label: Option<String>,
}

impl EnrolledRecord {
    pub fn new(identity: impl Into<IdentityKey>, payload: Vec<u8>, label: Option<&str>) -> Self {
        Self { identity: identity.into(), payload, label: label.map(str::to_string) }
    }
}

/// Source of truth for enrolled records.
///
/// Implementations may skip malformed records (logging why) but must not
/// duplicate or drop valid ones. An unknown partition is an empty one.
pub trait GallerySource: Send + Sync {
    /// Lists every record of `partition`.
    ///
    /// # Errors
    /// Returns `AfisError::Source` when the source as a whole cannot be read.
    fn enumerate(&self, partition: &str) -> Result<Vec<EnrolledRecord>, AfisError>;
}

/// Turns a persisted record into a gallery entry.
pub trait RecordDecoder: Send + Sync {
    fn decode(&self, record: EnrolledRecord) -> Result<GalleryEntry, AfisError>;
}

/// Decoder that wraps the payload as-is and checks it with the matcher's
/// structural validation.
pub struct ValidatingDecoder {
    matcher: Arc<dyn Matcher>,
}

impl ValidatingDecoder {
    pub fn new(matcher: Arc<dyn Matcher>) -> Self {
        Self { matcher }
    }
}

impl RecordDecoder for ValidatingDecoder {
    fn decode(&self, record: EnrolledRecord) -> Result<GalleryEntry, AfisError> {
        let template = Template::new(record.payload);
        self.matcher.validate(&template)?;
        Ok(GalleryEntry { identity: record.identity, template, label: record.label })
    }
}

/// In-memory gallery source.
#[derive(Default)]
pub struct MemorySource {
    partitions: RwLock<HashMap<String, Vec<EnrolledRecord>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, partition: &str, record: EnrolledRecord) {
        self.partitions
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .entry(partition.to_string())
            .or_default()
            .push(record);
    }

    pub fn with_record(self, partition: &str, record: EnrolledRecord) -> Self {
        self.insert(partition, record);
        self
    }

    /// Drops every record of `partition` from the source.
    pub fn clear(&self, partition: &str) {
        self.partitions.write().unwrap_or_else(|p| p.into_inner()).remove(partition);
    }
}

impl GallerySource for MemorySource {
    fn enumerate(&self, partition: &str) -> Result<Vec<EnrolledRecord>, AfisError> {
        Ok(self
            .partitions
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(partition)
            .cloned()
            .unwrap_or_default())
    }
}

/// Cache counters since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Loads served from an already built partition
    pub hits: u64,
    /// Loads that ran a build
    pub misses: u64,
    /// Builds that produced a partition
    pub builds: u64,
    /// Records skipped because they failed to decode
    pub skipped: u64,
}

/// Partition cache with build deduplication.
pub struct GalleryCache {
    source: Arc<dyn GallerySource>,
    decoder: Arc<dyn RecordDecoder>,
    partitions: Mutex<HashMap<String, Arc<OnceCell<Partition>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    builds: AtomicU64,
    skipped: AtomicU64,
}

impl GalleryCache {
    pub fn new(source: Arc<dyn GallerySource>, decoder: Arc<dyn RecordDecoder>) -> Self {
        Self {
            source,
            decoder,
            partitions: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            builds: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    /// Returns the partition for `key`, building it on first use.
    ///
    /// Concurrent callers for the same uncached key wait for a single build and
    /// all receive the same snapshot.
    ///
    /// # Errors
    /// - `AfisError::NotFound` if the key is empty or no valid entry exists for it.
    /// - `AfisError::Source` if the source cannot be enumerated.
    ///
    /// Failed builds are not cached; the next call retries.
    pub fn load(&self, key: &str) -> Result<Partition, AfisError> {
        if key.trim().is_empty() {
            return Err(AfisError::NotFound("empty partition key".to_string()));
        }

        let cell = {
            let mut partitions = self.partitions.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(partitions.entry(key.to_string()).or_default())
        };

        if let Some(partition) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(partition));
        }

        let mut built_here = false;
        let result = cell
            .get_or_try_init(|| {
                built_here = true;
                self.build(key)
            })
            .map(Arc::clone);

        if built_here {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }

        if result.is_err() {
            self.forget_failed(key, &cell);
        }
        result
    }

    /// Drops the cached partition for `key`. Returns whether one was cached.
    ///
    /// Callers already holding the old snapshot keep using it; the next `load`
    /// rebuilds from the source.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.partitions.lock().unwrap_or_else(|p| p.into_inner()).remove(key);
        let was_cached = removed.is_some_and(|cell| cell.get().is_some());
        if was_cached {
            debug!("Invalidated gallery partition {}", key);
        }
        was_cached
    }

    pub fn invalidate_all(&self) {
        self.partitions.lock().unwrap_or_else(|p| p.into_inner()).clear();
        debug!("Invalidated all gallery partitions");
    }

    /// Invalidates `key` and builds it again.
    pub fn reload(&self, key: &str) -> Result<Partition, AfisError> {
        self.invalidate(key);
        self.load(key)
    }

    /// Keys of the partitions currently built, sorted.
    pub fn cached_partitions(&self) -> Vec<String> {
        let partitions = self.partitions.lock().unwrap_or_else(|p| p.into_inner());
        let mut keys: Vec<String> = partitions
            .iter()
            .filter(|(_, cell)| cell.get().is_some())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    fn build(&self, key: &str) -> Result<Partition, AfisError> {
        let records = self.source.enumerate(key)?;
        let total = records.len();

        let mut entries = Vec::with_capacity(total);
        for record in records {
            let identity = record.identity.clone();
            match self.decoder.decode(record) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                    warn!("Skipping record of {} in partition {}: {}", identity, key, e);
                }
            }
        }

        if entries.is_empty() {
            debug!("Partition {} has no usable records ({} enumerated)", key, total);
            return Err(AfisError::NotFound(key.to_string()));
        }

        self.builds.fetch_add(1, Ordering::Relaxed);
        debug!("Built partition {}: {} of {} records usable", key, entries.len(), total);
        Ok(Arc::from(entries))
    }

    /// Removes the empty cell left behind by a failed build, unless it was
    /// already replaced.
    fn forget_failed(&self, key: &str, cell: &Arc<OnceCell<Partition>>) {
        let mut partitions = self.partitions.lock().unwrap_or_else(|p| p.into_inner());
        if partitions.get(key).is_some_and(|current| Arc::ptr_eq(current, cell) && current.get().is_none()) {
            partitions.remove(key);
        }
    }
}
