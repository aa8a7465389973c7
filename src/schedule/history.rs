//! Step, cycle, and evaluation records accumulated over a run

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::gradient::GradientTriple;
use crate::influence::InfluenceMatrices;

/// How an arm choice was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceOrigin {
    /// Round-robin sweep before the policy takes over
    WarmStart,
    /// Drawn by the bandit policy
    Bandit,
}

/// One scheduling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmChoice {
    /// Flat arm id to train on this step
    pub arm: usize,
    /// Whether the warm start or the policy picked it
    pub origin: ChoiceOrigin,
}

impl ArmChoice {
    /// True while the round-robin warm start is still running
    #[must_use]
    pub fn is_warm_start(&self) -> bool {
        self.origin == ChoiceOrigin::WarmStart
    }
}

/// What the caller observed while training one step on an arm
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Arm the step trained on
    pub arm: usize,
    /// Training loss of the step
    pub loss: f32,
    /// Parameter gradients, when the caller exposes them
    pub gradients: Option<GradientTriple>,
    /// Wall-clock seconds the step took
    pub elapsed: f64,
}

impl StepOutcome {
    /// Outcome with no gradients and no timing
    #[must_use]
    pub fn new(arm: usize, loss: f32) -> Self {
        Self {
            arm,
            loss,
            gradients: None,
            elapsed: 0.0,
        }
    }

    /// Attach the step's gradient triple
    #[must_use]
    pub fn with_gradients(mut self, gradients: GradientTriple) -> Self {
        self.gradients = Some(gradients);
        self
    }

    /// Attach the step's wall-clock duration
    #[must_use]
    pub fn with_elapsed(mut self, elapsed: f64) -> Self {
        self.elapsed = elapsed;
        self
    }
}

/// Influence matrices and rewards captured at one reward cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    /// Pairwise influence and similarity matrices over the closing window
    pub matrices: InfluenceMatrices,
    /// Per-arm rewards fed to the policy
    pub rewards: Array1<f32>,
}

/// Summary returned to the caller when a step closes a reward cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Scheduler step that closed the cycle
    pub step: u64,
    /// Per-arm rewards fed to the policy
    pub rewards: Array1<f32>,
    /// Cumulative policy restarts (nonzero only for drift-aware policies)
    pub restarts: u32,
}

/// Everything a run accumulates: choices, losses, cycles, and evaluations
///
/// Serialized wholesale into checkpoints so a resumed run continues the
/// same record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    choices: Vec<usize>,
    cycles: Vec<CycleRecord>,
    eval: Vec<Array1<f32>>,
    loss_per_arm: Vec<Vec<f32>>,
    grad_norms: Vec<Vec<f32>>,
    #[serde(default)]
    epoch_seconds: Vec<f64>,
    #[serde(default)]
    step_seconds: Vec<f64>,
}

impl TrainingHistory {
    /// Empty history for `nb_arms` arms
    #[must_use]
    pub fn new(nb_arms: usize) -> Self {
        Self {
            choices: Vec::new(),
            cycles: Vec::new(),
            eval: Vec::new(),
            loss_per_arm: vec![Vec::new(); nb_arms],
            grad_norms: vec![Vec::new(); nb_arms],
            epoch_seconds: Vec::new(),
            step_seconds: Vec::new(),
        }
    }

    /// Number of arms the per-arm records cover
    #[must_use]
    pub fn nb_arms(&self) -> usize {
        self.loss_per_arm.len()
    }

    /// Append a scheduling decision
    pub fn record_choice(&mut self, arm: usize) {
        self.choices.push(arm);
    }

    /// Append a training loss under its arm
    pub fn record_loss(&mut self, arm: usize, loss: f32) {
        self.loss_per_arm[arm].push(loss);
    }

    /// Append a gradient norm under its arm
    pub fn record_grad_norm(&mut self, arm: usize, norm: f32) {
        self.grad_norms[arm].push(norm);
    }

    /// Append a closed reward cycle
    pub fn record_cycle(&mut self, matrices: InfluenceMatrices, rewards: Array1<f32>) {
        self.cycles.push(CycleRecord { matrices, rewards });
    }

    /// Append one evaluation round (seen then unseen scores, arm order)
    pub fn record_eval(&mut self, scores: Array1<f32>) {
        self.eval.push(scores);
    }

    /// Append an epoch duration in seconds
    pub fn record_epoch_seconds(&mut self, seconds: f64) {
        self.epoch_seconds.push(seconds);
    }

    /// Append a step duration in seconds
    pub fn record_step_seconds(&mut self, seconds: f64) {
        self.step_seconds.push(seconds);
    }

    /// Every arm chosen so far, in step order
    #[must_use]
    pub fn choices(&self) -> &[usize] {
        &self.choices
    }

    /// Every closed reward cycle, in order
    #[must_use]
    pub fn cycles(&self) -> &[CycleRecord] {
        &self.cycles
    }

    /// Every evaluation round, in order
    #[must_use]
    pub fn eval(&self) -> &[Array1<f32>] {
        &self.eval
    }

    /// Training losses recorded for one arm
    #[must_use]
    pub fn losses(&self, arm: usize) -> &[f32] {
        &self.loss_per_arm[arm]
    }

    /// Gradient norms recorded for one arm
    #[must_use]
    pub fn grad_norms(&self, arm: usize) -> &[f32] {
        &self.grad_norms[arm]
    }

    /// Epoch durations in seconds
    #[must_use]
    pub fn epoch_seconds(&self) -> &[f64] {
        &self.epoch_seconds
    }

    /// Step durations in seconds
    #[must_use]
    pub fn step_seconds(&self) -> &[f64] {
        &self.step_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_per_arm_records_stay_separate() {
        let mut history = TrainingHistory::new(3);
        history.record_choice(1);
        history.record_loss(1, 0.5);
        history.record_grad_norm(1, 2.0);
        history.record_choice(2);
        history.record_loss(2, 0.25);

        assert_eq!(history.choices(), &[1, 2]);
        assert_eq!(history.losses(0), &[] as &[f32]);
        assert_eq!(history.losses(1), &[0.5]);
        assert_eq!(history.losses(2), &[0.25]);
        assert_eq!(history.grad_norms(1), &[2.0]);
    }

    #[test]
    fn test_cycle_and_eval_records() {
        let mut history = TrainingHistory::new(2);
        history.record_cycle(InfluenceMatrices::zeros(2), array![0.5f32, 0.0]);
        history.record_eval(array![1.0f32, 2.0, 3.0, 4.0]);

        assert_eq!(history.cycles().len(), 1);
        assert_eq!(history.cycles()[0].rewards, array![0.5f32, 0.0]);
        assert_eq!(history.eval().len(), 1);
        assert_eq!(history.eval()[0][3], 4.0);
    }

    #[test]
    fn test_step_outcome_builders() {
        let outcome = StepOutcome::new(2, 0.75).with_elapsed(1.5);
        assert_eq!(outcome.arm, 2);
        assert!(outcome.gradients.is_none());
        assert_eq!(outcome.elapsed, 1.5);

        let triple = GradientTriple::new(array![1.0f32], array![2.0f32], array![3.0f32]);
        let outcome = StepOutcome::new(0, 0.1).with_gradients(triple);
        assert!(outcome.gradients.is_some());
    }

    #[test]
    fn test_choice_origin() {
        let warm = ArmChoice {
            arm: 0,
            origin: ChoiceOrigin::WarmStart,
        };
        let drawn = ArmChoice {
            arm: 0,
            origin: ChoiceOrigin::Bandit,
        };
        assert!(warm.is_warm_start());
        assert!(!drawn.is_warm_start());
    }

    #[test]
    fn test_timing_fields_default_on_older_payloads() {
        let mut history = TrainingHistory::new(1);
        history.record_choice(0);
        history.record_epoch_seconds(12.0);

        let mut value = serde_json::to_value(&history).unwrap();
        let map = value.as_object_mut().unwrap();
        map.remove("epoch_seconds");
        map.remove("step_seconds");

        let back: TrainingHistory = serde_json::from_value(value).unwrap();
        assert_eq!(back.choices(), &[0]);
        assert!(back.epoch_seconds().is_empty());
    }

    #[test]
    fn test_serde_round_trip() {
        let mut history = TrainingHistory::new(2);
        history.record_choice(1);
        history.record_loss(1, 0.5);
        history.record_cycle(InfluenceMatrices::zeros(2), array![0.1f32, 0.2]);
        history.record_step_seconds(0.25);

        let json = serde_json::to_string(&history).unwrap();
        let back: TrainingHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, history);
    }
}
