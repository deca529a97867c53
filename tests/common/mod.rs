#![allow(dead_code)]

use huginn_afis::{GalleryEntry, Matcher, MatcherError, Template};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Candidate payload byte that makes [`ScriptedMatcher`] reject the entry.
pub const INVALID: u8 = 0xFF;
/// Candidate payload byte that makes [`ScriptedMatcher`] report a fault.
pub const FAULT: u8 = 0xFE;

/// Matcher whose score is the first byte of the candidate payload.
///
/// Counts its calls and can run a hook on a given call number.
#[derive(Default)]
pub struct ScriptedMatcher {
    calls: AtomicUsize,
    delay: Option<Duration>,
    on_call: Option<(usize, Box<dyn Fn() + Send + Sync>)>,
}

impl ScriptedMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Runs `hook` when the `call`-th score request (1-based) starts.
    pub fn on_call(mut self, call: usize, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_call = Some((call, Box::new(hook)));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Matcher for ScriptedMatcher {
    fn score(&self, _probe: &Template, candidate: &Template) -> Result<f64, MatcherError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, hook)) = &self.on_call {
            if *at == call {
                hook();
            }
        }
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        match candidate.payload()[0] {
            INVALID => Err(MatcherError::InvalidTemplate("unreadable minutiae".to_string())),
            FAULT => Err(MatcherError::Fault("scoring backend unavailable".to_string())),
            score => Ok(f64::from(score)),
        }
    }
}

pub fn probe() -> Template {
    Template::new(vec![1, 2, 3])
}

/// Entry whose template scores `score` under [`ScriptedMatcher`].
pub fn entry(identity: u64, score: u8) -> GalleryEntry {
    GalleryEntry::new(identity, Template::new(vec![score, 0x5a]), None)
}

pub fn labelled_entry(identity: u64, label: &str, score: u8) -> GalleryEntry {
    GalleryEntry::new(identity, Template::new(vec![score, 0x5a]), Some(label))
}

/// Deterministic pseudo-random gallery with plenty of tied scores, all above 0.
pub fn random_gallery(len: usize, seed: u64) -> Vec<GalleryEntry> {
    let mut state = seed;
    (0..len)
        .map(|i| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            // 1..=200, clear of the INVALID and FAULT markers
            let score = ((state >> 33) % 200) as u8 + 1;
            entry(i as u64, score)
        })
        .collect()
}

/// Serial reference: first entry with the highest score.
pub fn serial_best(gallery: &[GalleryEntry]) -> Option<(u64, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (position, entry) in gallery.iter().enumerate() {
        let score = f64::from(entry.template.payload()[0]);
        if best.map_or(true, |(_, incumbent)| score > incumbent) {
            best = Some((position, score));
        }
    }
    best.map(|(position, score)| {
        let identity = gallery[position].identity.as_str().parse().unwrap_or(u64::MAX);
        (identity, score)
    })
}

pub fn shared(matcher: ScriptedMatcher) -> Arc<ScriptedMatcher> {
    Arc::new(matcher)
}
