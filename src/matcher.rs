use crate::template::Template;
use thiserror::Error;

/// Failure reported by a [`Matcher`] implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatcherError {
    /// One of the two templates could not be compared.
    ///
    /// Inside a gallery scan this is recovered locally: the entry scores 0.
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// The scoring capability itself is broken. Aborts the calling operation.
    #[error("Matcher fault: {0}")]
    Fault(String),
}

/// Similarity scoring capability between two templates.
///
/// Implementations must be deterministic for a fixed pair and free of shared
/// mutable state, since one instance is called concurrently from every worker
/// of the identification pool. Scores are bounded and non-negative; higher is
/// more similar.
pub trait Matcher: Send + Sync {
    /// Scores `candidate` against `probe`.
    fn score(&self, probe: &Template, candidate: &Template) -> Result<f64, MatcherError>;

    /// Structural validation of a template before it is scored.
    ///
    /// The default only rejects empty payloads; extraction-aware matchers
    /// override it with their own format checks.
    fn validate(&self, template: &Template) -> Result<(), MatcherError> {
        if template.is_empty() {
            Err(MatcherError::InvalidTemplate("empty payload".to_string()))
        } else {
            Ok(())
        }
    }
}

impl<M: Matcher + ?Sized> Matcher for std::sync::Arc<M> {
    fn score(&self, probe: &Template, candidate: &Template) -> Result<f64, MatcherError> {
        (**self).score(probe, candidate)
    }

    fn validate(&self, template: &Template) -> Result<(), MatcherError> {
        (**self).validate(template)
    }
}

/// Scores one pair and checks the result is usable.
///
/// NaN, infinite and negative scores are reported as an invalid comparison so
/// they are handled like any other per-entry failure.
pub(crate) fn checked_score(
    matcher: &dyn Matcher,
    probe: &Template,
    candidate: &Template,
) -> Result<f64, MatcherError> {
    let score = matcher.score(probe, candidate)?;
    if score.is_finite() && score >= 0.0 {
        Ok(score)
    } else {
        Err(MatcherError::InvalidTemplate(format!("matcher returned out-of-range score {score}")))
    }
}
