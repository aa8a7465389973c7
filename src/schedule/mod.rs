//! Curriculum scheduler driving arm choice, reward cycles, and evaluation

pub mod history;

pub use history::{
    ArmChoice, ChoiceOrigin, CycleRecord, CycleReport, StepOutcome, TrainingHistory,
};

use ndarray::Array1;
use tracing::{debug, info};

use crate::arms::{ArmError, ArmIndex};
use crate::bandit::{rewards_from_similarity, ArmPolicy, BanditController};
use crate::checkpoint::TrainerCheckpoint;
use crate::comm::{CommError, Communicator};
use crate::config::{ConfigError, CurriculumConfig};
use crate::gradient::GradientAccumulator;
use crate::influence::InfluenceMatrices;
use crate::validate::{BestSnapshots, EvalData, Split, ValidationError, ValidationSets};

/// Errors from driving the curriculum
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigError),

    #[error("arm lookup failed: {0}")]
    Arm(#[from] ArmError),

    #[error("communication failed: {0}")]
    Comm(#[from] CommError),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("policy covers {policy} arms but the layout defines {layout}")]
    PolicyArmMismatch { policy: usize, layout: usize },

    #[error("checkpoint covers {checkpoint} arms but the layout defines {layout}")]
    CheckpointArmMismatch { checkpoint: usize, layout: usize },
}

/// Result alias for scheduling operations
pub type Result<T> = std::result::Result<T, ScheduleError>;

/// Adaptive curriculum scheduler
///
/// Rank 0 owns the bandit and decides which arm every rank trains next;
/// workers receive the decision over the communicator. Gradients reported
/// through [`complete_step`](Self::complete_step) accumulate into per-arm
/// windows, and on the reward cadence the coordinator turns the window's
/// influence matrices into rewards for the policy. All ranks keep their
/// step counters and gradient windows in lockstep, so the reward cadence
/// lands on the same step everywhere.
pub struct CurriculumScheduler<P, C> {
    arms: ArmIndex,
    config: CurriculumConfig,
    pub(crate) controller: BanditController<P>,
    pub(crate) accumulator: GradientAccumulator,
    pub(crate) history: TrainingHistory,
    pub(crate) snapshots: BestSnapshots,
    comm: C,
    pub(crate) total_count: u64,
    select_freq: usize,
}

impl<P: ArmPolicy, C: Communicator> CurriculumScheduler<P, C> {
    /// Build a fresh scheduler from a validated configuration
    pub fn new(config: CurriculumConfig, policy: P, comm: C) -> Result<Self> {
        config.validate()?;
        let arms = config.arm_index()?;
        if policy.nb_arms() != arms.nb_arms() {
            return Err(ScheduleError::PolicyArmMismatch {
                policy: policy.nb_arms(),
                layout: arms.nb_arms(),
            });
        }
        let nb_arms = arms.nb_arms();
        let select_freq = config.effective_select_freq();
        Ok(Self {
            arms,
            config,
            controller: BanditController::new(policy),
            accumulator: GradientAccumulator::new(nb_arms),
            history: TrainingHistory::new(nb_arms),
            snapshots: BestSnapshots::new(nb_arms),
            comm,
            total_count: 0,
            select_freq,
        })
    }

    /// Rebuild a scheduler from checkpointed state and a restored policy
    ///
    /// The checkpointed reward cadence overrides the configured one, so a
    /// resumed run keeps the cycle boundaries of the original.
    pub fn restore(
        config: CurriculumConfig,
        policy: P,
        comm: C,
        checkpoint: &TrainerCheckpoint,
    ) -> Result<Self> {
        config.validate()?;
        let arms = config.arm_index()?;
        let nb_arms = arms.nb_arms();
        if policy.nb_arms() != nb_arms {
            return Err(ScheduleError::PolicyArmMismatch {
                policy: policy.nb_arms(),
                layout: nb_arms,
            });
        }
        if checkpoint.history.nb_arms() != nb_arms {
            return Err(ScheduleError::CheckpointArmMismatch {
                checkpoint: checkpoint.history.nb_arms(),
                layout: nb_arms,
            });
        }

        // Older checkpoints carry only the latest gradient per arm; the
        // running window restarts empty in that case.
        let accumulator = if let Some(acc) = &checkpoint.accumulator {
            acc.clone()
        } else if let Some(latest) = &checkpoint.latest_gradients {
            GradientAccumulator::from_latest(latest.clone())
        } else {
            GradientAccumulator::new(nb_arms)
        };
        if accumulator.nb_arms() != nb_arms {
            return Err(ScheduleError::CheckpointArmMismatch {
                checkpoint: accumulator.nb_arms(),
                layout: nb_arms,
            });
        }

        debug!(
            epoch = checkpoint.epoch,
            total_count = checkpoint.total_count,
            restarts = checkpoint.num_restart.unwrap_or(0),
            "Scheduler state restored"
        );
        Ok(Self {
            arms,
            config,
            controller: BanditController::new(policy),
            accumulator,
            history: checkpoint.history.clone(),
            snapshots: checkpoint.snapshots.clone(),
            comm,
            total_count: checkpoint.total_count,
            select_freq: checkpoint.select_freq,
        })
    }

    /// Decide the arm every rank trains on this step
    ///
    /// The coordinator sweeps arms round-robin during the warm start and
    /// asks the policy afterwards, then sends the choice to each worker
    /// under the worker's own rank as tag. Every rank returns the same
    /// choice for the same step.
    pub fn next_arm(&mut self) -> Result<ArmChoice> {
        let warm = (self.total_count as f64) < self.config.warm_start_steps();
        let arm = if self.comm.rank() == 0 {
            let arm = if warm {
                let arm = (self.total_count as usize) % self.arms.nb_arms();
                self.controller.record_pull(arm);
                arm
            } else {
                self.controller.select()
            };
            for dst in 1..self.comm.world_size() {
                self.comm.send_u64(dst, dst as u64, arm as u64)?;
            }
            arm
        } else {
            self.comm.recv_u64(0, self.comm.rank() as u64)? as usize
        };

        let origin = if warm {
            ChoiceOrigin::WarmStart
        } else {
            ChoiceOrigin::Bandit
        };
        self.history.record_choice(arm);
        debug!(step = self.total_count, arm, warm, "Arm selected");
        Ok(ArmChoice { arm, origin })
    }

    /// Fold one finished training step back in
    ///
    /// Records the loss, gradients, and timing, then closes the reward
    /// cycle when the step lands on the cadence: the coordinator computes
    /// the window's influence matrices, feeds the derived rewards to the
    /// policy, and reports the cycle; every rank resets its gradient
    /// window. Advances the shared step counter last.
    pub fn complete_step(&mut self, outcome: StepOutcome) -> Result<Option<CycleReport>> {
        let nb_arms = self.arms.nb_arms();
        if outcome.arm >= nb_arms {
            return Err(ArmError::ArmOutOfRange {
                arm: outcome.arm,
                nb_arms,
            }
            .into());
        }

        if let Some(triple) = outcome.gradients {
            self.history.record_grad_norm(outcome.arm, triple.norm());
            self.accumulator.record(outcome.arm, triple);
        }
        self.history.record_loss(outcome.arm, outcome.loss);
        self.history.record_step_seconds(outcome.elapsed);

        let t = self.total_count;
        let due = (t as f64) >= self.config.warm_start_steps() - 1.0
            && t % (self.select_freq as u64) == 0
            && t != 0;

        let mut report = None;
        if due {
            if self.comm.rank() == 0 {
                let window_pulls = self.accumulator.pull_counts();
                let matrices = InfluenceMatrices::compute(&self.accumulator, &self.arms);
                let rewards = rewards_from_similarity(&matrices.sim, &window_pulls);
                self.controller.inject_cycle_rewards(&rewards, &window_pulls);
                let restarts = self.controller.restarts();
                info!(step = t, restarts, "Reward cycle closed");
                self.history.record_cycle(matrices, rewards.clone());
                report = Some(CycleReport {
                    step: t,
                    rewards,
                    restarts,
                });
            }
            self.accumulator.reset_window();
        }

        self.total_count += 1;
        Ok(report)
    }

    /// Score every task on both splits and track historical bests
    ///
    /// Calls the scorer once per (task, split) on this rank's local data,
    /// averages the scores across ranks, and updates the best-snapshot
    /// table against earlier rounds before appending the new round to the
    /// history. Returns the averaged round: seen scores at `0..nb_arms`,
    /// unseen at `nb_arms..2 * nb_arms`, in arm order.
    pub fn validate_and_snapshot<F>(
        &mut self,
        sets: &ValidationSets,
        mut score: F,
        weights: &[u8],
    ) -> Result<Array1<f32>>
    where
        F: FnMut(usize, usize, Split, &EvalData) -> f32,
    {
        let nb_arms = self.arms.nb_arms();
        let mut scores = vec![0.0f32; 2 * nb_arms];
        for arm in 0..nb_arms {
            let (family, scale) = self.arms.from_arm(arm)?;
            scores[arm] = score(family, scale, Split::Seen, sets.seen(family, scale));
            scores[nb_arms + arm] = score(family, scale, Split::Unseen, sets.unseen(family, scale));
        }

        self.comm.all_reduce_sum(&mut scores)?;
        let world = self.comm.world_size() as f32;
        for value in &mut scores {
            *value /= world;
        }

        let round = Array1::from(scores);
        self.snapshots.update_from_round(
            &self.arms,
            &self.config.directions,
            self.history.eval(),
            &round,
            self.total_count,
            weights,
        );
        self.history.record_eval(round.clone());
        Ok(round)
    }

    /// Record how long the last epoch took
    pub fn record_epoch_time(&mut self, seconds: f64) {
        self.history.record_epoch_seconds(seconds);
    }

    /// Arm layout in use
    #[must_use]
    pub fn arms(&self) -> &ArmIndex {
        &self.arms
    }

    /// Configuration the scheduler was built from
    #[must_use]
    pub fn config(&self) -> &CurriculumConfig {
        &self.config
    }

    /// Accumulated run history
    #[must_use]
    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    /// Historical best snapshots per task
    #[must_use]
    pub fn snapshots(&self) -> &BestSnapshots {
        &self.snapshots
    }

    /// Per-arm gradient window
    #[must_use]
    pub fn accumulator(&self) -> &GradientAccumulator {
        &self.accumulator
    }

    /// Bandit controller (authoritative on the coordinator only)
    #[must_use]
    pub fn controller(&self) -> &BanditController<P> {
        &self.controller
    }

    /// Steps taken across all epochs
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Steps between reward cycles
    #[must_use]
    pub fn select_freq(&self) -> usize {
        self.select_freq
    }

    /// True on the rank that owns the bandit
    #[must_use]
    pub fn is_coordinator(&self) -> bool {
        self.comm.rank() == 0
    }

    /// Communicator, for validation scatter and caller-side collectives
    pub fn comm_mut(&mut self) -> &mut C {
        &mut self.comm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandit::Thompson;
    use crate::comm::LocalComm;
    use crate::config::BanditAlgorithm;
    use crate::gradient::GradientTriple;
    use crate::validate::Direction;
    use ndarray::array;

    fn test_config() -> CurriculumConfig {
        // Two families, four arms, eight steps per epoch
        CurriculumConfig::new(vec![2, 2])
            .with_algorithm(BanditAlgorithm::Thompson)
            .with_train_episodes(8)
            .with_train_batch_size(1)
            .with_warm_start(0.5)
            .with_select_freq(2)
            .with_seed(11)
    }

    fn uniform_triple(value: f32) -> GradientTriple {
        GradientTriple::new(
            array![value, value],
            array![value],
            array![value, -value],
        )
    }

    fn single_scheduler() -> CurriculumScheduler<Thompson, LocalComm> {
        let config = test_config();
        let policy = Thompson::new(config.nb_arms(), config.seed);
        CurriculumScheduler::new(config, policy, LocalComm::single()).unwrap()
    }

    #[test]
    fn test_policy_arm_mismatch_rejected() {
        let config = test_config();
        let policy = Thompson::new(3, 0);
        let result = CurriculumScheduler::new(config, policy, LocalComm::single());
        assert!(matches!(
            result,
            Err(ScheduleError::PolicyArmMismatch {
                policy: 3,
                layout: 4
            })
        ));
    }

    #[test]
    fn test_warm_start_sweeps_arms_in_order() {
        // warm_start 0.5 of 8 steps per epoch forces 4 round-robin picks
        let mut sched = single_scheduler();
        let mut arms = Vec::new();
        for _ in 0..5 {
            let choice = sched.next_arm().unwrap();
            arms.push((choice.arm, choice.origin));
            sched
                .complete_step(StepOutcome::new(choice.arm, 1.0))
                .unwrap();
        }

        for (step, &(arm, origin)) in arms.iter().take(4).enumerate() {
            assert_eq!(arm, step);
            assert_eq!(origin, ChoiceOrigin::WarmStart);
        }
        assert_eq!(arms[4].1, ChoiceOrigin::Bandit);
        assert_eq!(sched.history().choices().len(), 5);
    }

    #[test]
    fn test_warm_start_pulls_feed_the_policy() {
        let mut sched = single_scheduler();
        for _ in 0..4 {
            let choice = sched.next_arm().unwrap();
            sched
                .complete_step(StepOutcome::new(choice.arm, 1.0))
                .unwrap();
        }
        assert_eq!(sched.controller().pulls(), &[1, 1, 1, 1]);
    }

    #[test]
    fn test_cycle_closes_on_cadence() {
        // warm gate opens at step 1, cadence 2: first cycle at step 2
        let config = test_config().with_warm_start(0.25);
        let policy = Thompson::new(config.nb_arms(), config.seed);
        let mut sched = CurriculumScheduler::new(config, policy, LocalComm::single()).unwrap();

        let mut cycle_steps = Vec::new();
        for _ in 0..7 {
            let choice = sched.next_arm().unwrap();
            let outcome =
                StepOutcome::new(choice.arm, 0.5).with_gradients(uniform_triple(1.0));
            if let Some(report) = sched.complete_step(outcome).unwrap() {
                cycle_steps.push(report.step);
            }
        }

        assert_eq!(cycle_steps, vec![2, 4, 6]);
        assert_eq!(sched.history().cycles().len(), 3);
    }

    #[test]
    fn test_step_zero_never_closes_a_cycle() {
        let config = test_config().with_warm_start(0.0);
        let policy = Thompson::new(config.nb_arms(), config.seed);
        let mut sched = CurriculumScheduler::new(config, policy, LocalComm::single()).unwrap();

        let choice = sched.next_arm().unwrap();
        let outcome = StepOutcome::new(choice.arm, 0.5).with_gradients(uniform_triple(1.0));
        assert!(sched.complete_step(outcome).unwrap().is_none());
    }

    #[test]
    fn test_cycle_resets_gradient_window() {
        let config = test_config().with_warm_start(0.25);
        let policy = Thompson::new(config.nb_arms(), config.seed);
        let mut sched = CurriculumScheduler::new(config, policy, LocalComm::single()).unwrap();

        let mut saw_cycle = false;
        for _ in 0..3 {
            let choice = sched.next_arm().unwrap();
            let outcome =
                StepOutcome::new(choice.arm, 0.5).with_gradients(uniform_triple(2.0));
            saw_cycle |= sched.complete_step(outcome).unwrap().is_some();
        }

        assert!(saw_cycle);
        assert_eq!(sched.accumulator().pull_counts(), vec![0, 0, 0, 0]);
        // The latest gradient of the last-trained arm survives the reset
        let last = *sched.history().choices().last().unwrap();
        assert!(sched.accumulator().latest(last).is_some());
    }

    #[test]
    fn test_rewards_reach_the_policy() {
        let config = test_config().with_warm_start(0.25);
        let policy = Thompson::new(config.nb_arms(), config.seed);
        let mut sched = CurriculumScheduler::new(config, policy, LocalComm::single()).unwrap();

        let mut last_report = None;
        for _ in 0..3 {
            let choice = sched.next_arm().unwrap();
            let outcome =
                StepOutcome::new(choice.arm, 0.5).with_gradients(uniform_triple(1.0));
            if let Some(report) = sched.complete_step(outcome).unwrap() {
                last_report = Some(report);
            }
        }

        let report = last_report.unwrap();
        assert_eq!(report.rewards.len(), 4);
        let total: f64 = sched.controller().policy().reward_totals().iter().sum();
        assert!(total > 0.0);
    }

    #[test]
    fn test_out_of_range_arm_rejected() {
        let mut sched = single_scheduler();
        let result = sched.complete_step(StepOutcome::new(9, 0.5));
        assert!(matches!(
            result,
            Err(ScheduleError::Arm(ArmError::ArmOutOfRange { arm: 9, .. }))
        ));
    }

    #[test]
    fn test_validation_orders_seen_then_unseen() {
        let mut sched = single_scheduler();
        let sets = ValidationSets::generate(sched.arms(), |_, _, _| EvalData::zeros(1, 1));

        let round = sched
            .validate_and_snapshot(
                &sets,
                |family, scale, split, _| {
                    let offset = if split == Split::Unseen { 1000.0 } else { 0.0 };
                    offset + (family * 10 + scale) as f32
                },
                b"w0",
            )
            .unwrap();

        assert_eq!(round, array![0.0f32, 1.0, 10.0, 11.0, 1000.0, 1001.0, 1010.0, 1011.0]);
        assert_eq!(sched.history().eval().len(), 1);
        assert!(sched.snapshots().seen(3).is_some());
        assert!(sched.snapshots().unseen(0).is_some());
    }

    #[test]
    fn test_snapshot_updates_compare_against_prior_rounds() {
        let mut sched = single_scheduler();
        let sets = ValidationSets::generate(sched.arms(), |_, _, _| EvalData::zeros(1, 1));

        // Directions default to Minimize; a higher second round must not
        // displace the first capture.
        sched
            .validate_and_snapshot(&sets, |_, _, _, _| 1.0, b"first")
            .unwrap();
        sched.total_count = 5;
        sched
            .validate_and_snapshot(&sets, |_, _, _, _| 2.0, b"second")
            .unwrap();

        assert_eq!(sched.snapshots().seen(0).unwrap().weights, b"first");
        assert_eq!(sched.snapshots().seen(0).unwrap().step, 0);

        sched.total_count = 9;
        sched
            .validate_and_snapshot(&sets, |_, _, _, _| 0.5, b"third")
            .unwrap();
        assert_eq!(sched.snapshots().unseen(2).unwrap().weights, b"third");
        assert_eq!(sched.snapshots().unseen(2).unwrap().step, 9);
    }

    #[test]
    fn test_maximize_family_direction() {
        let config = test_config().with_directions(vec![Direction::Maximize, Direction::Minimize]);
        let policy = Thompson::new(config.nb_arms(), config.seed);
        let mut sched = CurriculumScheduler::new(config, policy, LocalComm::single()).unwrap();
        let sets = ValidationSets::generate(sched.arms(), |_, _, _| EvalData::zeros(1, 1));

        sched
            .validate_and_snapshot(&sets, |_, _, _, _| 1.0, b"first")
            .unwrap();
        sched.total_count = 3;
        sched
            .validate_and_snapshot(&sets, |_, _, _, _| 2.0, b"second")
            .unwrap();

        // Family 0 maximizes, family 1 minimizes
        assert_eq!(sched.snapshots().seen(0).unwrap().weights, b"second");
        assert_eq!(sched.snapshots().seen(2).unwrap().weights, b"first");
    }

    #[test]
    fn test_epoch_time_recorded() {
        let mut sched = single_scheduler();
        sched.record_epoch_time(42.5);
        assert_eq!(sched.history().epoch_seconds(), &[42.5]);
    }
}
