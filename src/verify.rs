use crate::error::AfisError;
use crate::fusion::{FusionPolicy, TAKE_1_OF_1};
use crate::matcher::{checked_score, Matcher};
use crate::output::MatchDecision;
use crate::template::{labels_compatible, Template};
use std::sync::Arc;
use tracing::debug;

/// A template with its optional origin label, used for multi-sample verification.
#[derive(Debug, Clone, Copy)]
pub struct LabelledSample<'a> {
    pub template: &'a Template,
    pub label: Option<&'a str>,
}

impl<'a> LabelledSample<'a> {
    pub fn new(template: &'a Template, label: Option<&'a str>) -> Self {
        Self { template, label }
    }
}

/// 1:1 verification engine.
pub struct Verifier {
    matcher: Arc<dyn Matcher>,
    threshold: f64,
    fusion: FusionPolicy,
}

impl Verifier {
    /// Creates a verifier. `fusion` only matters for [`Verifier::verify_samples`];
    /// `None` takes the single best partial score.
    pub fn new(matcher: Arc<dyn Matcher>, threshold: f64, fusion: Option<FusionPolicy>) -> Self {
        Self { matcher, threshold, fusion: fusion.unwrap_or(TAKE_1_OF_1) }
    }

    /// Compares `probe` with `candidate`, calling the matcher exactly once.
    ///
    /// # Errors
    /// - `AfisError::InvalidTemplate` if either template fails validation or the
    ///   matcher rejects the pair.
    /// - `AfisError::MatcherFault` if the matcher itself fails.
    pub fn verify(&self, probe: &Template, candidate: &Template) -> Result<MatchDecision, AfisError> {
        self.matcher.validate(probe)?;
        self.matcher.validate(candidate)?;

        let score = checked_score(self.matcher.as_ref(), probe, candidate)?;
        let decision = MatchDecision::from_score(score, self.threshold);
        debug!(
            "Verified probe {} against {}: score {:.3} (match: {})",
            probe.digest(),
            candidate.digest(),
            score,
            decision.is_match
        );
        Ok(decision)
    }

    /// Verifies a person enrolled with several samples against several probe samples.
    ///
    /// Each probe sample's partial score is its best score against the candidate
    /// samples with a compatible label. The partials are then combined with the
    /// configured fusion policy.
    ///
    /// # Errors
    /// - `AfisError::InvalidTemplate` if either side is empty or any sample fails validation.
    /// - `AfisError::MatcherFault` if the matcher itself fails.
    pub fn verify_samples(
        &self,
        probe: &[LabelledSample<'_>],
        candidate: &[LabelledSample<'_>],
    ) -> Result<MatchDecision, AfisError> {
        if probe.is_empty() || candidate.is_empty() {
            return Err(AfisError::InvalidTemplate("no samples to verify".to_string()));
        }
        for sample in probe.iter().chain(candidate) {
            self.matcher.validate(sample.template)?;
        }

        let mut partials = Vec::with_capacity(probe.len());
        for probe_sample in probe {
            let mut best: Option<f64> = None;
            for candidate_sample in candidate {
                if !labels_compatible(probe_sample.label, candidate_sample.label) {
                    continue;
                }
                let score = checked_score(
                    self.matcher.as_ref(),
                    probe_sample.template,
                    candidate_sample.template,
                )?;
                best = Some(best.map_or(score, |b| b.max(score)));
            }
            if let Some(best) = best {
                partials.push(best);
            }
        }

        let score = self.fusion.combine(&partials);
        debug!(
            "Verified {} probe samples ({} comparable) with {}: score {:.3}",
            probe.len(),
            partials.len(),
            self.fusion,
            score
        );
        Ok(MatchDecision::from_score(score, self.threshold))
    }
}
