//! Pluggable arm-selection policies
//!
//! Provides the `ArmPolicy` trait, the four supported policies, the
//! serializable `CurriculumBandit` union used for checkpointing, and the
//! `BanditController` that drives whichever policy is configured through
//! the curriculum's selection and reward protocol.

mod exp3;
mod thompson;

pub use exp3::{Exp3, Exp3R};
pub use thompson::{DiscountedThompson, Thompson};

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::config::{BanditAlgorithm, CurriculumConfig};

/// How a policy produces its next-arm decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKind {
    /// Sample an index per arm and take the argmax (posterior samplers)
    IndexArgmax,
    /// The policy draws internally from its own distribution (Exp3 family)
    InternalDraw,
}

/// Selection, reward and bookkeeping surface every curriculum policy offers
pub trait ArmPolicy {
    /// Number of arms
    fn nb_arms(&self) -> usize;

    /// Reset learned state for a fresh game
    fn start_game(&mut self);

    /// How selections are produced
    fn selection(&self) -> SelectionKind;

    /// Draw the next arm from the policy's own distribution
    fn choose(&mut self) -> usize;

    /// Sample the selection index for one arm
    fn compute_index(&mut self, arm: usize) -> f64;

    /// Credit a reward to an arm; bumps the policy's own pull count
    fn give_reward(&mut self, arm: usize, reward: f64);

    /// Bump an arm's pull count without crediting a reward
    fn record_pull(&mut self, arm: usize);

    /// Pull counts per arm
    fn pulls(&self) -> &[u64];

    /// Accumulated reward totals per arm
    fn reward_totals(&self) -> &[f64];

    /// Accumulate a reward outside the regular update path
    ///
    /// Posterior samplers track these in their reward totals without
    /// touching the posterior; adversarial policies ignore them.
    fn add_raw_reward(&mut self, _arm: usize, _reward: f64) {}

    /// Restart count for drift-detecting policies
    fn restarts(&self) -> Option<u32> {
        None
    }

    /// Policy name
    fn name(&self) -> &'static str;
}

/// First index holding the maximum value; NaN entries never win
pub(crate) fn argmax_f64(values: &[f64]) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}

/// Serializable union of the supported policies
///
/// Checkpointing needs one concrete type; the tag records which algorithm
/// produced the state so resume rebuilds the same weights or posteriors,
/// RNG position included.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "algorithm", content = "state", rename_all = "snake_case")]
pub enum CurriculumBandit {
    Exp3(Exp3),
    Exp3R(Exp3R),
    Thompson(Thompson),
    DiscountedThompson(DiscountedThompson),
}

impl CurriculumBandit {
    /// Build the policy the configuration names
    #[must_use]
    pub fn from_config(config: &CurriculumConfig) -> Self {
        let nb_arms = config.nb_arms();
        match config.algorithm {
            BanditAlgorithm::Exp3 => Self::Exp3(Exp3::new(nb_arms, config.gamma, config.seed)),
            BanditAlgorithm::Exp3R => Self::Exp3R(Exp3R::new(
                nb_arms,
                config.gamma,
                config.exp3r_horizon(),
                config.seed,
            )),
            BanditAlgorithm::Thompson => Self::Thompson(Thompson::new(nb_arms, config.seed)),
            BanditAlgorithm::DiscountedThompson => Self::DiscountedThompson(
                DiscountedThompson::new(nb_arms, config.discount, config.seed),
            ),
        }
    }

    fn inner(&self) -> &dyn ArmPolicy {
        match self {
            Self::Exp3(p) => p,
            Self::Exp3R(p) => p,
            Self::Thompson(p) => p,
            Self::DiscountedThompson(p) => p,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ArmPolicy {
        match self {
            Self::Exp3(p) => p,
            Self::Exp3R(p) => p,
            Self::Thompson(p) => p,
            Self::DiscountedThompson(p) => p,
        }
    }
}

impl ArmPolicy for CurriculumBandit {
    fn nb_arms(&self) -> usize {
        self.inner().nb_arms()
    }

    fn start_game(&mut self) {
        self.inner_mut().start_game();
    }

    fn selection(&self) -> SelectionKind {
        self.inner().selection()
    }

    fn choose(&mut self) -> usize {
        self.inner_mut().choose()
    }

    fn compute_index(&mut self, arm: usize) -> f64 {
        self.inner_mut().compute_index(arm)
    }

    fn give_reward(&mut self, arm: usize, reward: f64) {
        self.inner_mut().give_reward(arm, reward);
    }

    fn record_pull(&mut self, arm: usize) {
        self.inner_mut().record_pull(arm);
    }

    fn pulls(&self) -> &[u64] {
        self.inner().pulls()
    }

    fn reward_totals(&self) -> &[f64] {
        self.inner().reward_totals()
    }

    fn add_raw_reward(&mut self, arm: usize, reward: f64) {
        self.inner_mut().add_raw_reward(arm, reward);
    }

    fn restarts(&self) -> Option<u32> {
        self.inner().restarts()
    }

    fn name(&self) -> &'static str {
        self.inner().name()
    }
}

/// Drives a policy through the curriculum's selection and reward protocol
///
/// Posterior samplers select by drawing one index per arm and taking the
/// argmax, which bumps the pull count at selection time; adversarial
/// policies draw internally and account pulls at reward time.
#[derive(Debug, Clone)]
pub struct BanditController<P> {
    policy: P,
}

impl<P: ArmPolicy> BanditController<P> {
    /// Wrap a policy
    pub fn new(policy: P) -> Self {
        Self { policy }
    }

    /// Select the next arm under the policy's own selection style
    pub fn select(&mut self) -> usize {
        match self.policy.selection() {
            SelectionKind::IndexArgmax => {
                let indices: Vec<f64> = (0..self.policy.nb_arms())
                    .map(|arm| self.policy.compute_index(arm))
                    .collect();
                let choice = argmax_f64(&indices);
                self.policy.record_pull(choice);
                choice
            }
            SelectionKind::InternalDraw => self.policy.choose(),
        }
    }

    /// Bump an arm's pull count directly (warm-start selections)
    pub fn record_pull(&mut self, arm: usize) {
        self.policy.record_pull(arm);
    }

    /// Feed one update cycle's rewards into the policy
    ///
    /// Arms pulled this window receive a regular reward update; every arm's
    /// raw total is then topped up for policies that track it.
    pub fn inject_cycle_rewards(&mut self, rewards: &Array1<f32>, window_pulls: &[u64]) {
        for (arm, &reward) in rewards.iter().enumerate() {
            if window_pulls[arm] > 0 {
                self.policy.give_reward(arm, f64::from(reward));
            }
        }
        for (arm, &reward) in rewards.iter().enumerate() {
            self.policy.add_raw_reward(arm, f64::from(reward));
        }
    }

    /// Restart count, zero for policies without drift detection
    #[must_use]
    pub fn restarts(&self) -> u32 {
        self.policy.restarts().unwrap_or(0)
    }

    /// Pull counts per arm
    #[must_use]
    pub fn pulls(&self) -> &[u64] {
        self.policy.pulls()
    }

    /// Wrapped policy
    #[must_use]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Mutable access to the wrapped policy
    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    /// Unwrap the policy
    #[must_use]
    pub fn into_policy(self) -> P {
        self.policy
    }
}

/// Map cosine column sums to bandit rewards
///
/// Sigmoid squashes each column sum into (0, 1); arms without pulls this
/// window are forced to exactly zero so they cannot be credited for
/// gradients they never produced.
#[must_use]
pub fn rewards_from_similarity(sim: &Array2<f32>, window_pulls: &[u64]) -> Array1<f32> {
    let mut rewards = sim.sum_axis(Axis(0));
    rewards.mapv_inplace(sigmoid);
    for (arm, &pulls) in window_pulls.iter().enumerate() {
        if pulls == 0 {
            rewards[arm] = 0.0;
        }
    }
    rewards
}

/// Blend one evaluation round into a single reward for the chosen arm
///
/// `alpha = 1` looks only at the chosen arm's score, `alpha = 0.5` weights
/// the chosen arm and the overall sum evenly. `scores` must be non-empty
/// and indexed by arm.
#[must_use]
pub fn blended_eval_reward(scores: &[f32], choice: usize, alpha: f32) -> f32 {
    let total: f32 = scores.iter().sum();
    ((2.0 * alpha - 1.0) * scores[choice] + (1.0 - alpha) * total) / scores.len() as f32
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
