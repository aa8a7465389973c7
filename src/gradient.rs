//! Per-arm gradient accumulation windows
//!
//! Stores flattened gradient segments per arm between curriculum update
//! cycles: the latest observation, a running average over the current
//! window, and the pull count feeding the averaging weights.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Flattened gradient snapshot split by parameter group
///
/// `shared` covers the encoder parameters common to all task families,
/// `head` and `decoder` the family-conditioned groups. Segment shapes must
/// stay fixed across a run; they are compared elementwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientTriple {
    pub shared: Array1<f32>,
    pub head: Array1<f32>,
    pub decoder: Array1<f32>,
}

impl GradientTriple {
    /// Create a triple from its three segments
    pub fn new(shared: Array1<f32>, head: Array1<f32>, decoder: Array1<f32>) -> Self {
        Self {
            shared,
            head,
            decoder,
        }
    }

    /// Total flattened length across the three segments
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.len() + self.head.len() + self.decoder.len()
    }

    /// True when all three segments are empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenation in shared, head, decoder order
    #[must_use]
    pub fn concat(&self) -> Array1<f32> {
        let mut out = Vec::with_capacity(self.len());
        out.extend(self.shared.iter().copied());
        out.extend(self.head.iter().copied());
        out.extend(self.decoder.iter().copied());
        Array1::from_vec(out)
    }

    /// L2 norm of the full concatenation
    #[must_use]
    pub fn norm(&self) -> f32 {
        (self.shared.dot(&self.shared)
            + self.head.dot(&self.head)
            + self.decoder.dot(&self.decoder))
        .sqrt()
    }

    /// Elementwise scaling of all three segments
    #[must_use]
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            shared: &self.shared * factor,
            head: &self.head * factor,
            decoder: &self.decoder * factor,
        }
    }

    fn blend_into(&self, running: &mut Self, w_new: f32, w_old: f32) {
        running
            .shared
            .zip_mut_with(&self.shared, |r, &l| *r = w_new * l + w_old * *r);
        running
            .head
            .zip_mut_with(&self.head, |r, &l| *r = w_new * l + w_old * *r);
        running
            .decoder
            .zip_mut_with(&self.decoder, |r, &l| *r = w_new * l + w_old * *r);
    }
}

/// Window state for one arm
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct GradientRecord {
    latest: Option<GradientTriple>,
    running: Option<GradientTriple>,
    pulls: u64,
}

/// Per-arm gradient statistics between update cycles
///
/// `record` folds each new observation into a running average with weight
/// `1/(n+1)` against `n/(n+1)` for the old value, which keeps the running
/// value equal to the plain mean of the window. `reset_window` starts a new
/// window but retains the latest observation so an arm that goes unpulled
/// still contributes a row to the influence computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientAccumulator {
    records: Vec<GradientRecord>,
}

impl GradientAccumulator {
    /// Create an empty accumulator for `nb_arms` arms
    #[must_use]
    pub fn new(nb_arms: usize) -> Self {
        Self {
            records: vec![GradientRecord::default(); nb_arms],
        }
    }

    /// Rebuild from latest-only observations with fresh windows
    ///
    /// Used when restoring a checkpoint that carries only the latest
    /// gradient per arm; running averages and pull counts start over.
    #[must_use]
    pub fn from_latest(latest: Vec<Option<GradientTriple>>) -> Self {
        Self {
            records: latest
                .into_iter()
                .map(|latest| GradientRecord {
                    latest,
                    running: None,
                    pulls: 0,
                })
                .collect(),
        }
    }

    /// Number of arms tracked
    #[must_use]
    pub fn nb_arms(&self) -> usize {
        self.records.len()
    }

    /// Fold a new observation into the arm's window
    pub fn record(&mut self, arm: usize, triple: GradientTriple) {
        let record = &mut self.records[arm];
        match &mut record.running {
            None => record.running = Some(triple.clone()),
            Some(running) => {
                let n = record.pulls as f32;
                triple.blend_into(running, 1.0 / (n + 1.0), n / (n + 1.0));
            }
        }
        record.latest = Some(triple);
        record.pulls += 1;
    }

    /// Start a new window on every arm
    ///
    /// Running averages and pull counts reset; latest observations survive.
    pub fn reset_window(&mut self) {
        for record in &mut self.records {
            record.running = None;
            record.pulls = 0;
        }
    }

    /// Running average when the arm was pulled this window, else the latest
    /// observation from an earlier window
    #[must_use]
    pub fn effective(&self, arm: usize) -> Option<&GradientTriple> {
        let record = &self.records[arm];
        record.running.as_ref().or(record.latest.as_ref())
    }

    /// Running average for the current window
    #[must_use]
    pub fn running(&self, arm: usize) -> Option<&GradientTriple> {
        self.records[arm].running.as_ref()
    }

    /// Latest observation across windows
    #[must_use]
    pub fn latest(&self, arm: usize) -> Option<&GradientTriple> {
        self.records[arm].latest.as_ref()
    }

    /// Pulls recorded for the arm in the current window
    #[must_use]
    pub fn pulls(&self, arm: usize) -> u64 {
        self.records[arm].pulls
    }

    /// Pull counts for all arms in arm order
    #[must_use]
    pub fn pull_counts(&self) -> Vec<u64> {
        self.records.iter().map(|r| r.pulls).collect()
    }

    /// Latest observation per arm, for latest-only persistence
    #[must_use]
    pub fn latest_snapshot(&self) -> Vec<Option<GradientTriple>> {
        self.records.iter().map(|r| r.latest.clone()).collect()
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The incremental blend equals the plain mean of the window
        #[test]
        fn prop_running_equals_arithmetic_mean(
            samples in prop::collection::vec(prop::collection::vec(-10.0f32..10.0, 3), 1..12)
        ) {
            let mut acc = GradientAccumulator::new(1);
            for s in &samples {
                acc.record(0, GradientTriple::new(
                    Array1::from_vec(vec![s[0]]),
                    Array1::from_vec(vec![s[1]]),
                    Array1::from_vec(vec![s[2]]),
                ));
            }

            let n = samples.len() as f32;
            let mean: Vec<f32> = (0..3)
                .map(|i| samples.iter().map(|s| s[i]).sum::<f32>() / n)
                .collect();

            let running = acc.running(0).unwrap();
            prop_assert!((running.shared[0] - mean[0]).abs() < 1e-3);
            prop_assert!((running.head[0] - mean[1]).abs() < 1e-3);
            prop_assert!((running.decoder[0] - mean[2]).abs() < 1e-3);
            prop_assert_eq!(acc.pulls(0), samples.len() as u64);
        }

        /// Reset always clears the window and keeps the last observation
        #[test]
        fn prop_reset_semantics(values in prop::collection::vec(-5.0f32..5.0, 1..8)) {
            let mut acc = GradientAccumulator::new(1);
            for &v in &values {
                acc.record(0, GradientTriple::new(
                    Array1::from_vec(vec![v]),
                    Array1::from_vec(vec![v]),
                    Array1::from_vec(vec![v]),
                ));
            }
            acc.reset_window();

            prop_assert_eq!(acc.pulls(0), 0);
            prop_assert!(acc.running(0).is_none());
            let last = values[values.len() - 1];
            prop_assert_eq!(acc.latest(0).unwrap().shared[0], last);
        }
    }
}
