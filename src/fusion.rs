//! Multi-sample fusion for identities enrolled with several samples.
//!
//! A take-k-of-n policy sorts the per-sample scores of one identity in
//! descending order and keeps the (k+1)-th highest, so a high fused score
//! needs `k+1` samples that score at least that high.

use crate::output::ScoreSample;
use std::fmt;

/// Take-k-of-n selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionPolicy {
    /// Zero-based rank of the score that is kept after sorting descending.
    pub select_index: usize,
    /// Number of samples an identity is expected to be enrolled with.
    pub expected_count: usize,
}

/// Best single sample decides.
pub const TAKE_1_OF_1: FusionPolicy = FusionPolicy::new(0, 1);
/// Best of two samples decides.
pub const TAKE_1_OF_2: FusionPolicy = FusionPolicy::new(0, 2);
/// Second best of three samples decides.
pub const TAKE_2_OF_3: FusionPolicy = FusionPolicy::new(1, 3);
/// Second best of four samples decides.
pub const TAKE_2_OF_4: FusionPolicy = FusionPolicy::new(1, 4);
/// Third best of five samples decides.
pub const TAKE_3_OF_5: FusionPolicy = FusionPolicy::new(2, 5);

impl FusionPolicy {
    pub const fn new(select_index: usize, expected_count: usize) -> Self {
        Self { select_index, expected_count }
    }

    /// Whether the policy can ever be satisfied by an identity enrolled with
    /// `expected_count` samples.
    pub fn is_valid(&self) -> bool {
        self.expected_count > 0 && self.select_index < self.expected_count
    }

    /// Combines the scores of one identity into a single decision score.
    ///
    /// Returns 0 when fewer than `select_index + 1` scores are available.
    pub fn combine(&self, scores: &[f64]) -> f64 {
        if self.select_index >= scores.len() {
            return 0.0;
        }
        let mut sorted = scores.to_vec();
        sorted.sort_by(|a, b| b.total_cmp(a));
        sorted[self.select_index]
    }

    /// Same selection as [`FusionPolicy::combine`], returning the index and
    /// sample that carry the kept score.
    ///
    /// Equal scores keep their input order, so the earlier sample wins a tie.
    pub fn select<'a>(&self, samples: &'a [ScoreSample]) -> Option<(usize, &'a ScoreSample)> {
        if self.select_index >= samples.len() {
            return None;
        }
        let mut ranked: Vec<usize> = (0..samples.len()).collect();
        ranked.sort_by(|&a, &b| samples[b].score.total_cmp(&samples[a].score));
        ranked.get(self.select_index).map(|&index| (index, &samples[index]))
    }
}

impl Default for FusionPolicy {
    fn default() -> Self {
        TAKE_1_OF_1
    }
}

impl fmt::Display for FusionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "take-{}-of-{}", self.select_index.saturating_add(1), self.expected_count)
    }
}
