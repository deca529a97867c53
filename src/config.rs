use crate::error::AfisError;
use crate::fusion::FusionPolicy;
use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

/// Default decision threshold.
pub const DEFAULT_THRESHOLD: f64 = 40.0;

const DEFAULT_MAX_WORKERS: usize = 8;

/// Configuration shared by the verification and identification engines.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Minimum score for a decision to count as a match (inclusive).
    pub threshold: f64,
    /// Multi-sample fusion applied per identity. `None` lets every sample compete on its own.
    pub fusion: Option<FusionPolicy>,
    /// Number of identification worker threads.
    pub workers: usize,
    /// Bound of each worker's job queue.
    pub queue_size: usize,
    /// Smallest number of gallery entries handed to one worker at a time.
    pub min_chunk_size: usize,
    /// Identify calls running longer than this are cancelled.
    pub search_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let workers = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
            .min(DEFAULT_MAX_WORKERS);
        Self {
            threshold: DEFAULT_THRESHOLD,
            fusion: None,
            workers,
            queue_size: 64,
            min_chunk_size: 16,
            search_timeout: None,
        }
    }
}

impl EngineConfig {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_fusion(mut self, policy: FusionPolicy) -> Self {
        self.fusion = Some(policy);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_min_chunk_size(mut self, min_chunk_size: usize) -> Self {
        self.min_chunk_size = min_chunk_size;
        self
    }

    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = Some(timeout);
        self
    }

    /// Checks every field, returning the first problem found.
    pub fn validate(&self) -> Result<(), AfisError> {
        // a no-match decision scores 0 and must stay below the threshold
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(AfisError::Misconfiguration(format!(
                "threshold must be a finite positive number, got {}",
                self.threshold
            )));
        }
        if self.workers == 0 {
            return Err(AfisError::Misconfiguration(
                "Worker count must be greater than 0".to_string(),
            ));
        }
        if self.queue_size == 0 {
            return Err(AfisError::Misconfiguration(
                "queue_size must be greater than 0".to_string(),
            ));
        }
        if self.min_chunk_size == 0 {
            return Err(AfisError::Misconfiguration(
                "min_chunk_size must be greater than 0".to_string(),
            ));
        }
        if let Some(policy) = self.fusion {
            if !policy.is_valid() {
                return Err(AfisError::Misconfiguration(format!(
                    "fusion policy {policy} can never be satisfied"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::TAKE_2_OF_3;

    #[test]
    fn default_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.threshold, DEFAULT_THRESHOLD);
        assert!(config.workers >= 1 && config.workers <= DEFAULT_MAX_WORKERS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        let bad = [
            EngineConfig::default().with_threshold(f64::NAN),
            EngineConfig::default().with_threshold(-1.0),
            EngineConfig::default().with_threshold(0.0),
            EngineConfig::default().with_workers(0),
            EngineConfig::default().with_min_chunk_size(0),
            EngineConfig::default().with_fusion(FusionPolicy::new(3, 3)),
            EngineConfig { queue_size: 0, ..EngineConfig::default() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(AfisError::Misconfiguration(_))));
        }
    }

    #[test]
    fn builder_sets_fields() {
        let config = EngineConfig::default()
            .with_fusion(TAKE_2_OF_3)
            .with_workers(2)
            .with_search_timeout(Duration::from_millis(5));
        assert_eq!(config.fusion, Some(TAKE_2_OF_3));
        assert_eq!(config.workers, 2);
        assert_eq!(config.search_timeout, Some(Duration::from_millis(5)));
    }
}
