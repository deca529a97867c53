//! Decisions returned by verification and identification.

use crate::template::IdentityKey;
use std::fmt;
use std::fmt::Formatter;

/// Score of one gallery entry against the probe, produced by a single matcher call.
///
/// Only lives for the duration of one search.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreSample {
    pub identity: IdentityKey,
    pub label: Option<String>,
    pub score: f64,
}

/// Outcome of a verification or identification call.
///
/// `is_match` is always `score >= threshold`. For 1:N searches `identity` and
/// `label` name the winning entry and are only present on a match; the best
/// score is reported either way so callers can tune thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchDecision {
    pub score: f64,
    pub is_match: bool,
    pub identity: Option<IdentityKey>,
    pub label: Option<String>,
}

impl MatchDecision {
    /// Decision for a bare score, as produced by 1:1 verification.
    pub fn from_score(score: f64, threshold: f64) -> Self {
        Self { score, is_match: score >= threshold, identity: None, label: None }
    }

    /// Decision for the best gallery candidate.
    ///
    /// Identity fields are dropped when the candidate does not clear the threshold.
    pub fn from_candidate(
        score: f64,
        threshold: f64,
        identity: IdentityKey,
        label: Option<String>,
    ) -> Self {
        if score >= threshold {
            Self { score, is_match: true, identity: Some(identity), label }
        } else {
            Self::from_score(score, threshold)
        }
    }

    /// Decision for a search that had nothing to compare against.
    pub fn no_match() -> Self {
        Self { score: 0.0, is_match: false, identity: None, label: None }
    }
}

impl fmt::Display for MatchDecision {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ".-[ match decision ]-\n\
            |\n\
            | score    = {:.3}\n\
            | match    = {}\n\
            | identity = {}\n\
            | label    = {}\n\
            `----\n",
            self.score,
            if self.is_match { "yes" } else { "no" },
            self.identity.as_ref().map(|id| id.as_str()).unwrap_or("none"),
            self.label.as_deref().unwrap_or("none"),
        )
    }
}

impl fmt::Display for ScoreSample {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{:.3}", self.identity, self.label.as_deref().unwrap_or_default(), self.score)
    }
}
