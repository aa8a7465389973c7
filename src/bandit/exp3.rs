//! Adversarial-weighting policies

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{argmax_f64, ArmPolicy, SelectionKind};

/// Exp3, exponential weighting for adversarial bandits
///
/// Auer, Cesa-Bianchi, Freund and Schapire (2002). One weight per arm;
/// draws follow the gamma-mixed distribution over normalized weights and
/// reward estimates are importance-weighted by the draw probability, so
/// rarely-drawn arms get proportionally larger updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exp3 {
    gamma: f64,
    weights: Vec<f64>,
    pulls: Vec<u64>,
    rewards: Vec<f64>,
    steps: u64,
    rng: ChaCha8Rng,
}

impl Exp3 {
    /// Create a uniform-weight policy
    ///
    /// `gamma` is the exploration rate in (0, 1]; rewards are expected in
    /// [0, 1] and are clamped to that range.
    #[must_use]
    pub fn new(nb_arms: usize, gamma: f64, seed: u64) -> Self {
        Self {
            gamma,
            weights: vec![1.0; nb_arms],
            pulls: vec![0; nb_arms],
            rewards: vec![0.0; nb_arms],
            steps: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Current draw distribution: `(1 - gamma) w_j / W + gamma / K`
    #[must_use]
    pub fn trusts(&self) -> Vec<f64> {
        let total: f64 = self.weights.iter().sum();
        let k = self.weights.len() as f64;
        self.weights
            .iter()
            .map(|w| (1.0 - self.gamma) * w / total + self.gamma / k)
            .collect()
    }

    /// Current arm weights, normalized after every update
    #[must_use]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn sample(&mut self, probs: &[f64]) -> usize {
        let u: f64 = self.rng.random();
        let mut cumulative = 0.0;
        for (arm, &p) in probs.iter().enumerate() {
            cumulative += p;
            if u < cumulative {
                return arm;
            }
        }
        probs.len() - 1
    }

    fn reset_weights(&mut self) {
        self.weights.fill(1.0);
    }
}

impl ArmPolicy for Exp3 {
    fn nb_arms(&self) -> usize {
        self.weights.len()
    }

    fn start_game(&mut self) {
        self.weights.fill(1.0);
        self.pulls.fill(0);
        self.rewards.fill(0.0);
        self.steps = 0;
    }

    fn selection(&self) -> SelectionKind {
        SelectionKind::InternalDraw
    }

    fn choose(&mut self) -> usize {
        let trusts = self.trusts();
        self.sample(&trusts)
    }

    fn compute_index(&mut self, arm: usize) -> f64 {
        self.trusts()[arm]
    }

    fn give_reward(&mut self, arm: usize, reward: f64) {
        let reward = reward.clamp(0.0, 1.0);
        self.pulls[arm] += 1;
        self.rewards[arm] += reward;
        self.steps += 1;

        let trust = self.trusts()[arm];
        if trust > 0.0 {
            let estimate = reward / trust;
            let k = self.weights.len() as f64;
            self.weights[arm] *= (self.gamma * estimate / k).exp();
        }
        // Keep weights normalized; the draw distribution is scale-invariant
        let total: f64 = self.weights.iter().sum();
        if total > 0.0 {
            for w in &mut self.weights {
                *w /= total;
            }
        }
    }

    fn record_pull(&mut self, arm: usize) {
        self.pulls[arm] += 1;
    }

    fn pulls(&self) -> &[u64] {
        &self.pulls
    }

    fn reward_totals(&self) -> &[f64] {
        &self.rewards
    }

    fn name(&self) -> &'static str {
        "Exp3"
    }
}

/// Exp3 with restarts on drift detection (Exp3.R)
///
/// Allesiardo and Feraud (2015). Runs Exp3 over fixed-length observation
/// intervals; at each interval boundary, if some arm's empirical mean beats
/// the weight leader's by more than the detection threshold, the weights
/// restart while global pull and reward totals carry on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exp3R {
    exp3: Exp3,
    horizon: u64,
    interval: u64,
    epsilon: f64,
    interval_rewards: Vec<f64>,
    interval_pulls: Vec<u64>,
    observed: u64,
    number_of_restart: u32,
}

impl Exp3R {
    /// Create a drift-detecting policy sized for `horizon` reward updates
    #[must_use]
    pub fn new(nb_arms: usize, gamma: f64, horizon: u64, seed: u64) -> Self {
        let horizon = horizon.max(2);
        // Detection intervals of roughly sqrt(T), at least two looks per arm
        let interval = ((horizon as f64).sqrt().ceil() as u64).max(2 * nb_arms as u64);
        let delta = 1.0 / horizon as f64;
        let epsilon =
            (nb_arms as f64 * (1.0 / delta).ln() / (2.0 * gamma * interval as f64)).sqrt();
        Self {
            exp3: Exp3::new(nb_arms, gamma, seed),
            horizon,
            interval,
            epsilon,
            interval_rewards: vec![0.0; nb_arms],
            interval_pulls: vec![0; nb_arms],
            observed: 0,
            number_of_restart: 0,
        }
    }

    /// Horizon the detection threshold was derived from
    #[must_use]
    pub fn horizon(&self) -> u64 {
        self.horizon
    }

    /// Observations per detection interval
    #[must_use]
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Current arm weights of the wrapped Exp3
    #[must_use]
    pub fn weights(&self) -> &[f64] {
        self.exp3.weights()
    }

    fn end_interval(&mut self) {
        let leader = argmax_f64(self.exp3.weights());
        let mut best_arm = None;
        let mut best_mean = f64::NEG_INFINITY;
        for arm in 0..self.interval_pulls.len() {
            if self.interval_pulls[arm] > 0 {
                let mean = self.interval_rewards[arm] / self.interval_pulls[arm] as f64;
                if mean > best_mean {
                    best_mean = mean;
                    best_arm = Some(arm);
                }
            }
        }
        if let Some(best) = best_arm {
            let leader_mean = if self.interval_pulls[leader] > 0 {
                self.interval_rewards[leader] / self.interval_pulls[leader] as f64
            } else {
                0.0
            };
            if best != leader && best_mean - leader_mean >= 2.0 * self.epsilon {
                self.exp3.reset_weights();
                self.number_of_restart += 1;
            }
        }
        self.interval_rewards.fill(0.0);
        self.interval_pulls.fill(0);
        self.observed = 0;
    }
}

impl ArmPolicy for Exp3R {
    fn nb_arms(&self) -> usize {
        self.exp3.nb_arms()
    }

    fn start_game(&mut self) {
        self.exp3.start_game();
        self.interval_rewards.fill(0.0);
        self.interval_pulls.fill(0);
        self.observed = 0;
        self.number_of_restart = 0;
    }

    fn selection(&self) -> SelectionKind {
        SelectionKind::InternalDraw
    }

    fn choose(&mut self) -> usize {
        self.exp3.choose()
    }

    fn compute_index(&mut self, arm: usize) -> f64 {
        self.exp3.compute_index(arm)
    }

    fn give_reward(&mut self, arm: usize, reward: f64) {
        self.exp3.give_reward(arm, reward);
        self.interval_rewards[arm] += reward.clamp(0.0, 1.0);
        self.interval_pulls[arm] += 1;
        self.observed += 1;
        if self.observed >= self.interval {
            self.end_interval();
        }
    }

    fn record_pull(&mut self, arm: usize) {
        self.exp3.record_pull(arm);
    }

    fn pulls(&self) -> &[u64] {
        self.exp3.pulls()
    }

    fn reward_totals(&self) -> &[f64] {
        self.exp3.reward_totals()
    }

    fn restarts(&self) -> Option<u32> {
        Some(self.number_of_restart)
    }

    fn name(&self) -> &'static str {
        "Exp3R"
    }
}
