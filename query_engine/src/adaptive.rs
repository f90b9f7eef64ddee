//! Adaptive strategy learning.
//!
//! Per fingerprint, the tracker keeps a bounded ring of execution
//! measurements. Until enough history exists the caller's heuristic choice
//! stands; once at least two candidate strategies hold two samples each,
//! the strategy with the lowest observed mean wall time becomes the
//! suggestion, and a one-shot `has_improved` flag records that learning
//! changed something.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use observability_deps::tracing::debug;
use parking_lot::{Mutex, RwLock};

use crate::physical::Strategy;

/// History required before suggestions replace the heuristic.
const MIN_RUNS: usize = 5;
/// Samples a strategy needs before it competes.
const MIN_SAMPLES_PER_STRATEGY: usize = 2;
/// Ring capacity per fingerprint.
const MAX_SAMPLES: usize = 100;

/// One recorded execution.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionSample {
    pub strategy: Strategy,
    pub elapsed: Duration,
    pub rows: u64,
    pub predicate_count: usize,
}

#[derive(Debug, Default)]
struct FingerprintStats {
    samples: VecDeque<ExecutionSample>,
    optimal: Option<Strategy>,
    has_improved: bool,
}

impl FingerprintStats {
    fn record(&mut self, sample: ExecutionSample) {
        if self.samples.len() == MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.recompute();
    }

    fn recompute(&mut self) {
        let mut per_strategy: HashMap<Strategy, (Duration, usize)> = HashMap::new();
        for sample in &self.samples {
            let entry = per_strategy
                .entry(sample.strategy)
                .or_insert((Duration::ZERO, 0));
            entry.0 += sample.elapsed;
            entry.1 += 1;
        }

        let candidates = per_strategy
            .iter()
            .filter(|(_, (_, n))| *n >= MIN_SAMPLES_PER_STRATEGY)
            .map(|(s, (total, n))| (*s, *total / *n as u32))
            .collect::<Vec<_>>();
        if candidates.len() < 2 {
            return;
        }

        let best = candidates
            .iter()
            .min_by_key(|(_, mean)| *mean)
            .map(|(s, _)| *s);
        if best != self.optimal {
            self.optimal = best;
            self.has_improved = true;
        }
    }
}

/// Per-store execution statistics, keyed by plan fingerprint.
#[derive(Debug, Default)]
pub struct AdaptiveTracker {
    entries: RwLock<HashMap<String, Arc<Mutex<FingerprintStats>>>>,
}

impl AdaptiveTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The learned strategy for `fingerprint`, if history warrants one.
    pub fn suggest(&self, fingerprint: &str) -> Option<Strategy> {
        let entry = {
            let entries = self.entries.read();
            Arc::clone(entries.get(fingerprint)?)
        };
        let stats = entry.lock();
        if stats.samples.len() < MIN_RUNS {
            return None;
        }
        stats.optimal
    }

    /// Record a measurement for `fingerprint`.
    pub fn record(&self, fingerprint: &str, sample: ExecutionSample) {
        let entry = {
            let mut entries = self.entries.write();
            Arc::clone(
                entries
                    .entry_ref(fingerprint)
                    .or_insert_with(|| Arc::new(Mutex::new(FingerprintStats::default()))),
            )
        };
        let mut stats = entry.lock();
        stats.record(sample);
        debug!(
            fingerprint,
            strategy = %sample.strategy,
            elapsed_us = sample.elapsed.as_micros() as u64,
            optimal = ?stats.optimal,
            "recorded execution sample"
        );
    }

    /// Take the one-shot improvement flag for `fingerprint`.
    pub fn take_improved(&self, fingerprint: &str) -> bool {
        let entry = {
            let entries = self.entries.read();
            match entries.get(fingerprint) {
                Some(e) => Arc::clone(e),
                None => return false,
            }
        };
        let mut stats = entry.lock();
        std::mem::take(&mut stats.has_improved)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample(strategy: Strategy, micros: u64) -> ExecutionSample {
        ExecutionSample {
            strategy,
            elapsed: Duration::from_micros(micros),
            rows: 1_000,
            predicate_count: 1,
        }
    }

    #[test]
    fn no_suggestion_before_min_runs() {
        let tracker = AdaptiveTracker::new();
        for _ in 0..4 {
            tracker.record("q", sample(Strategy::Simd, 50));
        }
        // 4 runs, only one strategy: nothing to say
        assert_eq!(tracker.suggest("q"), None);
        assert_eq!(tracker.suggest("unknown"), None);
    }

    #[test]
    fn learns_fastest_strategy() {
        let tracker = AdaptiveTracker::new();
        tracker.record("q", sample(Strategy::Sequential, 500));
        tracker.record("q", sample(Strategy::Sequential, 450));
        tracker.record("q", sample(Strategy::Simd, 40));
        tracker.record("q", sample(Strategy::Simd, 60));
        assert_eq!(tracker.suggest("q"), None); // only 4 runs

        tracker.record("q", sample(Strategy::Sequential, 480));
        assert_eq!(tracker.suggest("q"), Some(Strategy::Simd));
        assert!(tracker.take_improved("q"));
        // one-shot
        assert!(!tracker.take_improved("q"));
    }

    #[test]
    fn relearns_when_the_balance_shifts() {
        let tracker = AdaptiveTracker::new();
        for _ in 0..3 {
            tracker.record("q", sample(Strategy::Simd, 10));
            tracker.record("q", sample(Strategy::Parallel, 100));
        }
        assert_eq!(tracker.suggest("q"), Some(Strategy::Simd));
        tracker.take_improved("q");

        // parallel becomes much faster; its mean drops below simd's
        for _ in 0..80 {
            tracker.record("q", sample(Strategy::Parallel, 1));
        }
        assert_eq!(tracker.suggest("q"), Some(Strategy::Parallel));
        assert!(tracker.take_improved("q"));
    }

    #[test]
    fn ring_is_bounded() {
        let tracker = AdaptiveTracker::new();
        for i in 0..300 {
            tracker.record("q", sample(Strategy::Simd, i));
        }
        let entries = tracker.entries.read();
        let stats = entries.get("q").unwrap().lock();
        assert_eq!(stats.samples.len(), MAX_SAMPLES);
    }

}
