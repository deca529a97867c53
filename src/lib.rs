#![forbid(unsafe_code)]

//! # huginn-afis
//!
//! Fingerprint identity matching engine.
//!
//! This crate provides:
//! - 1:1 verification of a probe against one candidate template
//! - Concurrent 1:N identification across a cached gallery partition
//! - Take-k-of-n fusion for identities enrolled with several samples
//! - A gallery cache that deduplicates concurrent builds of the same partition
//!
//! Similarity scoring is not part of this crate: it is injected as a
//! [`Matcher`] implementation, together with a [`GallerySource`] that lists
//! enrolled records.

pub mod config;
pub mod error;
pub mod fusion;
pub mod gallery;
pub mod identify;
pub mod manifest;
pub mod matcher;
pub mod output;
pub mod parallel;
pub mod template;
pub mod verify;

pub use config::EngineConfig;
pub use error::AfisError;
pub use fusion::FusionPolicy;
pub use gallery::{
    CacheStats, EnrolledRecord, GalleryCache, GallerySource, MemorySource, Partition,
    RecordDecoder, ValidatingDecoder,
};
pub use identify::Identifier;
pub use manifest::ManifestSource;
pub use matcher::{Matcher, MatcherError};
pub use output::{MatchDecision, ScoreSample};
pub use parallel::{CancelToken, PoolStats, WorkerStats};
pub use template::{GalleryEntry, IdentityKey, Template};
pub use verify::{LabelledSample, Verifier};

use std::sync::Arc;
use tracing::debug;

/// Verification and identification front end.
///
/// Owns the engines and the gallery cache for one deployment; the threshold
/// and fusion policy in its [`EngineConfig`] apply to both engines.
pub struct HuginnAfis {
    verifier: Verifier,
    identifier: Identifier,
    gallery: Arc<GalleryCache>,
}

impl HuginnAfis {
    /// Creates a new instance of `HuginnAfis`.
    ///
    /// # Parameters
    /// - `matcher`: Scoring capability shared by both engines.
    /// - `source`: Gallery source; records are decoded with a [`ValidatingDecoder`]
    ///   built on `matcher`.
    /// - `config`: Optional engine configuration. If None, uses the default.
    ///
    /// # Errors
    /// Returns `AfisError::Misconfiguration` if the configuration is invalid or
    /// the worker pool cannot be started.
    pub fn new(
        matcher: Arc<dyn Matcher>,
        source: Arc<dyn GallerySource>,
        config: Option<EngineConfig>,
    ) -> Result<Self, AfisError> {
        let decoder = Arc::new(ValidatingDecoder::new(Arc::clone(&matcher)));
        let gallery = Arc::new(GalleryCache::new(source, decoder));
        Self::with_cache(matcher, gallery, config)
    }

    /// Same as [`HuginnAfis::new`] with a caller-provided gallery cache, e.g. one
    /// shared with other components.
    pub fn with_cache(
        matcher: Arc<dyn Matcher>,
        gallery: Arc<GalleryCache>,
        config: Option<EngineConfig>,
    ) -> Result<Self, AfisError> {
        let config = config.unwrap_or_default();
        config.validate()?;

        debug!(
            "Starting matching engine: threshold {}, fusion {}, {} workers",
            config.threshold,
            config.fusion.map(|p| p.to_string()).unwrap_or_else(|| "none".to_string()),
            config.workers
        );

        let verifier = Verifier::new(Arc::clone(&matcher), config.threshold, config.fusion);
        let identifier = Identifier::new(matcher, config)?;
        Ok(Self { verifier, identifier, gallery })
    }

    /// 1:1 verification. See [`Verifier::verify`].
    pub fn verify(&self, probe: &Template, candidate: &Template) -> Result<MatchDecision, AfisError> {
        self.verifier.verify(probe, candidate)
    }

    /// Multi-sample person verification. See [`Verifier::verify_samples`].
    pub fn verify_samples(
        &self,
        probe: &[LabelledSample<'_>],
        candidate: &[LabelledSample<'_>],
    ) -> Result<MatchDecision, AfisError> {
        self.verifier.verify_samples(probe, candidate)
    }

    /// 1:N identification against the gallery partition `partition`.
    ///
    /// # Errors
    /// - `AfisError::NotFound` if the partition has no usable entries.
    /// - `AfisError::Source` if the gallery source cannot be read.
    /// - Any error of [`Identifier::identify_with_cancel`].
    pub fn identify(&self, probe: &Template, partition: &str) -> Result<MatchDecision, AfisError> {
        self.identify_with_cancel(probe, partition, &CancelToken::new())
    }

    /// Cancellable form of [`HuginnAfis::identify`].
    pub fn identify_with_cancel(
        &self,
        probe: &Template,
        partition: &str,
        cancel: &CancelToken,
    ) -> Result<MatchDecision, AfisError> {
        let entries = self.gallery.load(partition)?;
        self.identifier.identify_with_cancel(probe, entries, cancel)
    }

    pub fn gallery(&self) -> &GalleryCache {
        &self.gallery
    }

    pub fn config(&self) -> &EngineConfig {
        self.identifier.config()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.identifier.pool_stats()
    }
}
