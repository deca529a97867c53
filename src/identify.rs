//! 1:N identification over a gallery partition.
//!
//! The gallery is cut into contiguous chunks that are scored concurrently by
//! the [`WorkerPool`]. Every chunk reports its local best (or, with fusion
//! enabled, all of its scores) and the caller reduces the reports in gallery
//! order. A candidate replaces the incumbent only with a strictly greater
//! score, so among equal maxima the entry that comes first in the gallery wins
//! no matter how chunks were scheduled.

use crate::config::EngineConfig;
use crate::error::AfisError;
use crate::fusion::FusionPolicy;
use crate::matcher::{checked_score, Matcher, MatcherError};
use crate::output::{MatchDecision, ScoreSample};
use crate::parallel::{CancelToken, PoolStats, WorkerPool};
use crate::template::{GalleryEntry, IdentityKey, Template};
use crossbeam::channel::{bounded, RecvTimeoutError};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Upper bound on chunks per worker for one search.
const CHUNKS_PER_WORKER: usize = 4;

/// Best entry found so far, addressed by its position in the gallery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Candidate {
    pub position: usize,
    pub score: f64,
}

impl Candidate {
    /// Strictly-greater replacement; ties keep the incumbent.
    fn offer(best: &mut Option<Candidate>, challenger: Candidate) {
        if best.map_or(true, |incumbent| challenger.score > incumbent.score) {
            *best = Some(challenger);
        }
    }
}

/// Why a chunk stopped before scoring all of its entries.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ChunkAbort {
    Cancelled,
    Fault(String),
}

/// Outcome of one chunk.
#[derive(Debug)]
pub(crate) struct ChunkReport {
    pub chunk_index: usize,
    /// Matcher calls issued for this chunk.
    pub scored: usize,
    pub outcome: Result<ChunkScores, ChunkAbort>,
}

impl ChunkReport {
    pub(crate) fn panicked(chunk_index: usize) -> Self {
        Self {
            chunk_index,
            scored: 0,
            outcome: Err(ChunkAbort::Fault("worker panicked while scoring".to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ChunkScores {
    /// Highest valid score in the chunk.
    best: Option<Candidate>,
    /// Per-entry scores in chunk order when fusion needs them; `None` marks an
    /// entry that could not be scored.
    samples: Vec<Option<f64>>,
}

/// One unit of work for a pool worker.
pub(crate) struct ScanJob {
    pub chunk_index: usize,
    pub probe: Template,
    pub gallery: Arc<[GalleryEntry]>,
    pub range: Range<usize>,
    pub matcher: Arc<dyn Matcher>,
    pub cancel: CancelToken,
    pub collect_samples: bool,
    pub reply: crossbeam::channel::Sender<ChunkReport>,
}

impl ScanJob {
    pub(crate) fn run(self) -> ChunkReport {
        let mut scores = ChunkScores::default();
        if self.collect_samples {
            scores.samples.reserve(self.range.len());
        }
        let mut scored = 0usize;

        for position in self.range.clone() {
            if self.cancel.is_cancelled() {
                return ChunkReport {
                    chunk_index: self.chunk_index,
                    scored,
                    outcome: Err(ChunkAbort::Cancelled),
                };
            }

            let entry = &self.gallery[position];
            scored += 1;
            let score = match checked_score(self.matcher.as_ref(), &self.probe, &entry.template) {
                Ok(score) => Some(score),
                Err(MatcherError::InvalidTemplate(reason)) => {
                    warn!(
                        "Skipping gallery entry {} ({}), template {}: {}",
                        entry.identity,
                        entry.label.as_deref().unwrap_or("unlabelled"),
                        entry.template.digest(),
                        reason
                    );
                    None
                }
                Err(MatcherError::Fault(reason)) => {
                    return ChunkReport {
                        chunk_index: self.chunk_index,
                        scored,
                        outcome: Err(ChunkAbort::Fault(reason)),
                    };
                }
            };

            if let Some(score) = score {
                Candidate::offer(&mut scores.best, Candidate { position, score });
            }
            if self.collect_samples {
                scores.samples.push(score);
            }
        }

        ChunkReport { chunk_index: self.chunk_index, scored, outcome: Ok(scores) }
    }
}

/// Splits `len` entries into contiguous ranges for `workers` threads.
pub(crate) fn chunk_ranges(len: usize, workers: usize, min_chunk_size: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let max_chunks = workers.max(1).saturating_mul(CHUNKS_PER_WORKER);
    let chunk_count = len.div_ceil(min_chunk_size.max(1)).clamp(1, max_chunks);
    let chunk_size = len.div_ceil(chunk_count);

    (0..len)
        .step_by(chunk_size)
        .map(|start| start..(start + chunk_size).min(len))
        .collect()
}

/// Concurrent 1:N search engine.
pub struct Identifier {
    matcher: Arc<dyn Matcher>,
    pool: WorkerPool,
    config: EngineConfig,
}

impl Identifier {
    /// Creates an identifier with its own worker pool sized from `config`.
    ///
    /// # Errors
    /// Returns `AfisError::Misconfiguration` if the configuration is invalid or
    /// the worker threads cannot be spawned.
    pub fn new(matcher: Arc<dyn Matcher>, config: EngineConfig) -> Result<Self, AfisError> {
        config.validate()?;
        let pool = WorkerPool::new(config.workers, config.queue_size)?;
        Ok(Self { matcher, pool, config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Finds the best-scoring identity in `gallery`.
    ///
    /// An empty gallery yields a no-match decision without calling the matcher.
    pub fn identify(
        &self,
        probe: &Template,
        gallery: impl Into<Arc<[GalleryEntry]>>,
    ) -> Result<MatchDecision, AfisError> {
        self.identify_with_cancel(probe, gallery, &CancelToken::new())
    }

    /// Same as [`Identifier::identify`], stopping early once `cancel` fires.
    ///
    /// An empty gallery returns a no-match decision before the probe is
    /// validated, so a malformed probe is only reported against a non-empty
    /// gallery. The search timeout runs from entry, including time spent
    /// waiting for room in the worker queues.
    ///
    /// # Errors
    /// - `AfisError::InvalidTemplate` if the probe fails validation.
    /// - `AfisError::Cancelled` if `cancel` fired or the search timeout expired
    ///   before every chunk was scored. Partial results are discarded.
    /// - `AfisError::MatcherFault` if the matcher reported a systemic failure.
    pub fn identify_with_cancel(
        &self,
        probe: &Template,
        gallery: impl Into<Arc<[GalleryEntry]>>,
        cancel: &CancelToken,
    ) -> Result<MatchDecision, AfisError> {
        let deadline = self.config.search_timeout.map(|timeout| Instant::now() + timeout);
        let gallery: Arc<[GalleryEntry]> = gallery.into();
        if gallery.is_empty() {
            debug!("Empty gallery, probe {} has nothing to match", probe.digest());
            return Ok(MatchDecision::no_match());
        }
        self.matcher.validate(probe)?;
        if cancel.is_cancelled() {
            return Err(AfisError::Cancelled);
        }

        let ranges =
            chunk_ranges(gallery.len(), self.pool.num_workers.get(), self.config.min_chunk_size);
        let chunk_count = ranges.len();
        let search_cancel = cancel.child();
        let collect_samples = self.config.fusion.is_some();
        let (reply_tx, reply_rx) = bounded::<ChunkReport>(chunk_count);

        debug!(
            "Identifying probe {} against {} entries in {} chunks",
            probe.digest(),
            gallery.len(),
            chunk_count
        );

        for (chunk_index, range) in ranges.iter().enumerate() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!("Identify of probe {} timed out while dispatching", probe.digest());
                search_cancel.cancel();
                return Err(AfisError::Cancelled);
            }
            let job = ScanJob {
                chunk_index,
                probe: probe.clone(),
                gallery: Arc::clone(&gallery),
                range: range.clone(),
                matcher: Arc::clone(&self.matcher),
                cancel: search_cancel.clone(),
                collect_samples,
                reply: reply_tx.clone(),
            };
            if let Err(e) = self.pool.dispatch(job, deadline) {
                search_cancel.cancel();
                return Err(e);
            }
        }
        drop(reply_tx);

        let mut chunks: Vec<Option<ChunkScores>> = (0..chunk_count).map(|_| None).collect();

        for _ in 0..chunk_count {
            let received = match deadline {
                Some(deadline) => reply_rx.recv_deadline(deadline),
                None => reply_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            let report = match received {
                Ok(report) => report,
                Err(RecvTimeoutError::Timeout) => {
                    warn!("Identify of probe {} timed out, cancelling search", probe.digest());
                    search_cancel.cancel();
                    return Err(AfisError::Cancelled);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    search_cancel.cancel();
                    return Err(AfisError::MatcherFault(
                        "identify workers stopped before reporting".to_string(),
                    ));
                }
            };

            match report.outcome {
                Ok(scores) => {
                    if let Some(slot) = chunks.get_mut(report.chunk_index) {
                        *slot = Some(scores);
                    }
                }
                Err(ChunkAbort::Cancelled) => {
                    debug!("Identify of probe {} cancelled", probe.digest());
                    search_cancel.cancel();
                    return Err(AfisError::Cancelled);
                }
                Err(ChunkAbort::Fault(reason)) => {
                    search_cancel.cancel();
                    return Err(AfisError::MatcherFault(reason));
                }
            }
        }

        if search_cancel.is_cancelled() {
            return Err(AfisError::Cancelled);
        }

        let best = match self.config.fusion {
            Some(policy) => reduce_fused(&gallery, &ranges, chunks, policy),
            None => reduce_best(chunks),
        };

        Ok(self.decide(&gallery, best))
    }

    fn decide(&self, gallery: &[GalleryEntry], best: Option<Candidate>) -> MatchDecision {
        let Some(best) = best else {
            return MatchDecision::no_match();
        };
        let entry = &gallery[best.position];
        let decision = MatchDecision::from_candidate(
            best.score,
            self.config.threshold,
            entry.identity.clone(),
            entry.label.clone(),
        );
        debug!(
            "Best candidate {} scored {:.3} (match: {})",
            entry.identity, best.score, decision.is_match
        );
        decision
    }
}

/// Reduces per-chunk local bests in chunk order.
fn reduce_best(chunks: Vec<Option<ChunkScores>>) -> Option<Candidate> {
    let mut best = None;
    for candidate in chunks.into_iter().flatten().filter_map(|scores| scores.best) {
        Candidate::offer(&mut best, candidate);
    }
    best
}

/// Groups per-entry scores by identity, fuses each group and reduces the fused
/// scores in order of each identity's first appearance in the gallery.
fn reduce_fused(
    gallery: &[GalleryEntry],
    ranges: &[Range<usize>],
    chunks: Vec<Option<ChunkScores>>,
    policy: FusionPolicy,
) -> Option<Candidate> {
    let mut group_of: HashMap<&IdentityKey, usize> = HashMap::new();
    // (samples, gallery position of each sample, validity of each sample)
    let mut groups: Vec<(Vec<ScoreSample>, Vec<usize>, Vec<bool>)> = Vec::new();

    for (range, scores) in ranges.iter().zip(chunks) {
        let Some(scores) = scores else { continue };
        for (position, score) in range.clone().zip(scores.samples) {
            let entry = &gallery[position];
            let index = *group_of.entry(&entry.identity).or_insert_with(|| {
                groups.push((Vec::new(), Vec::new(), Vec::new()));
                groups.len() - 1
            });
            let (samples, positions, valid) = &mut groups[index];
            samples.push(ScoreSample {
                identity: entry.identity.clone(),
                label: entry.label.clone(),
                score: score.unwrap_or(0.0),
            });
            positions.push(position);
            valid.push(score.is_some());
        }
    }

    let mut best = None;
    for (samples, positions, valid) in &groups {
        let Some((offset, selected)) = policy.select(samples) else {
            continue;
        };
        if !valid[offset] {
            continue;
        }
        Candidate::offer(&mut best, Candidate { position: positions[offset], score: selected.score });
    }
    best
}
