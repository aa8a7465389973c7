//! Posterior-sampling policies

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};

use super::{argmax_f64, ArmPolicy, SelectionKind};

/// Thompson sampling over Beta posteriors
///
/// Thompson (1933); Agrawal and Goyal (2012) for the Bernoulli analysis.
/// Continuous rewards in [0, 1] update the posterior fractionally: the
/// reward adds to the success mass, its complement to the failure mass,
/// over a uniform Beta(1, 1) prior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thompson {
    successes: Vec<f64>,
    failures: Vec<f64>,
    pulls: Vec<u64>,
    rewards: Vec<f64>,
    rng: ChaCha8Rng,
}

impl Thompson {
    /// Create a policy with uniform priors on every arm
    #[must_use]
    pub fn new(nb_arms: usize, seed: u64) -> Self {
        Self {
            successes: vec![0.0; nb_arms],
            failures: vec![0.0; nb_arms],
            pulls: vec![0; nb_arms],
            rewards: vec![0.0; nb_arms],
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Posterior parameters (alpha, beta) for one arm
    #[must_use]
    pub fn posterior(&self, arm: usize) -> (f64, f64) {
        (1.0 + self.successes[arm], 1.0 + self.failures[arm])
    }

    fn sample_posterior(&mut self, arm: usize) -> f64 {
        let (alpha, beta) = self.posterior(arm);
        // Parameters stay >= 1, Beta::new cannot reject them
        match Beta::new(alpha, beta) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => 0.5,
        }
    }
}

impl ArmPolicy for Thompson {
    fn nb_arms(&self) -> usize {
        self.successes.len()
    }

    fn start_game(&mut self) {
        self.successes.fill(0.0);
        self.failures.fill(0.0);
        self.pulls.fill(0);
        self.rewards.fill(0.0);
    }

    fn selection(&self) -> SelectionKind {
        SelectionKind::IndexArgmax
    }

    fn choose(&mut self) -> usize {
        let indices: Vec<f64> = (0..self.nb_arms())
            .map(|arm| self.sample_posterior(arm))
            .collect();
        argmax_f64(&indices)
    }

    fn compute_index(&mut self, arm: usize) -> f64 {
        self.sample_posterior(arm)
    }

    fn give_reward(&mut self, arm: usize, reward: f64) {
        let reward = reward.clamp(0.0, 1.0);
        self.pulls[arm] += 1;
        self.rewards[arm] += reward;
        self.successes[arm] += reward;
        self.failures[arm] += 1.0 - reward;
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

    fn add_raw_reward(&mut self, arm: usize, reward: f64) {
        self.rewards[arm] += reward;
    }

    fn name(&self) -> &'static str {
        "Thompson"
    }
}

/// Thompson sampling with discounted Beta posteriors
///
/// Raj and Kalyani (2017). Every reward first decays the posterior mass of
/// all arms by the discount factor, then credits the played arm, so old
/// evidence fades and the policy tracks non-stationary task utility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountedThompson {
    discount: f64,
    successes: Vec<f64>,
    failures: Vec<f64>,
    pulls: Vec<u64>,
    rewards: Vec<f64>,
    rng: ChaCha8Rng,
}

impl DiscountedThompson {
    /// Create a policy with discount factor in (0, 1]
    #[must_use]
    pub fn new(nb_arms: usize, discount: f64, seed: u64) -> Self {
        Self {
            discount,
            successes: vec![0.0; nb_arms],
            failures: vec![0.0; nb_arms],
            pulls: vec![0; nb_arms],
            rewards: vec![0.0; nb_arms],
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Posterior parameters (alpha, beta) for one arm
    #[must_use]
    pub fn posterior(&self, arm: usize) -> (f64, f64) {
        (1.0 + self.successes[arm], 1.0 + self.failures[arm])
    }

    fn sample_posterior(&mut self, arm: usize) -> f64 {
        let (alpha, beta) = self.posterior(arm);
        match Beta::new(alpha, beta) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => 0.5,
        }
    }
}

impl ArmPolicy for DiscountedThompson {
    fn nb_arms(&self) -> usize {
        self.successes.len()
    }

    fn start_game(&mut self) {
        self.successes.fill(0.0);
        self.failures.fill(0.0);
        self.pulls.fill(0);
        self.rewards.fill(0.0);
    }

    fn selection(&self) -> SelectionKind {
        SelectionKind::IndexArgmax
    }

    fn choose(&mut self) -> usize {
        let indices: Vec<f64> = (0..self.nb_arms())
            .map(|arm| self.sample_posterior(arm))
            .collect();
        argmax_f64(&indices)
    }

    fn compute_index(&mut self, arm: usize) -> f64 {
        self.sample_posterior(arm)
    }

    fn give_reward(&mut self, arm: usize, reward: f64) {
        let reward = reward.clamp(0.0, 1.0);
        // All posteriors decay before the played arm is credited
        for mass in &mut self.successes {
            *mass *= self.discount;
        }
        for mass in &mut self.failures {
            *mass *= self.discount;
        }
        self.pulls[arm] += 1;
        self.rewards[arm] += reward;
        self.successes[arm] += reward;
        self.failures[arm] += 1.0 - reward;
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

    fn add_raw_reward(&mut self, arm: usize, reward: f64) {
        self.rewards[arm] += reward;
    }

    fn name(&self) -> &'static str {
        "DiscountedThompson"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_indices_in_unit_interval() {
        let mut policy = Thompson::new(3, 7);
        for arm in 0..3 {
            for _ in 0..20 {
                let index = policy.compute_index(arm);
                assert!((0.0..=1.0).contains(&index));
            }
        }
    }

    #[test]
    fn test_fractional_posterior_update() {
        let mut policy = Thompson::new(2, 7);
        policy.give_reward(0, 0.3);

        let (alpha, beta) = policy.posterior(0);
        assert_relative_eq!(alpha, 1.3);
        assert_relative_eq!(beta, 1.7);
        assert_eq!(policy.posterior(1), (1.0, 1.0));
    }

    #[test]
    fn test_posterior_concentrates_on_rewarded_arm() {
        let mut policy = Thompson::new(2, 7);
        for _ in 0..50 {
            policy.give_reward(0, 1.0);
            policy.give_reward(1, 0.0);
        }

        let mean_0: f64 = (0..50).map(|_| policy.compute_index(0)).sum::<f64>() / 50.0;
        let mean_1: f64 = (0..50).map(|_| policy.compute_index(1)).sum::<f64>() / 50.0;
        assert!(mean_0 > 0.8);
        assert!(mean_1 < 0.2);
    }

    #[test]
    fn test_choose_prefers_rewarded_arm() {
        let mut policy = Thompson::new(2, 7);
        for _ in 0..50 {
            policy.give_reward(0, 1.0);
            policy.give_reward(1, 0.0);
        }
        assert_eq!(policy.choose(), 0);
    }

    #[test]
    fn test_add_raw_reward_skips_posterior() {
        let mut policy = Thompson::new(2, 7);
        policy.add_raw_reward(1, 0.9);

        assert_relative_eq!(policy.reward_totals()[1], 0.9);
        assert_eq!(policy.pulls(), &[0, 0]);
        assert_eq!(policy.posterior(1), (1.0, 1.0));
    }

    #[test]
    fn test_record_pull_only_counts() {
        let mut policy = Thompson::new(2, 7);
        policy.record_pull(0);

        assert_eq!(policy.pulls(), &[1, 0]);
        assert_eq!(policy.posterior(0), (1.0, 1.0));
    }

    #[test]
    fn test_deterministic_given_seed() {
        let mut a = Thompson::new(4, 123);
        let mut b = Thompson::new(4, 123);
        for _ in 0..10 {
            assert_eq!(a.choose(), b.choose());
        }
    }

    #[test]
    fn test_serde_round_trip_preserves_rng() {
        let mut policy = Thompson::new(3, 11);
        policy.give_reward(1, 0.7);

        let json = serde_json::to_string(&policy).unwrap();
        let mut restored: Thompson = serde_json::from_str(&json).unwrap();

        for _ in 0..10 {
            assert_eq!(policy.choose(), restored.choose());
        }
    }

    #[test]
    fn test_discount_fades_history() {
        let mut policy = DiscountedThompson::new(2, 0.5, 7);
        policy.give_reward(0, 1.0);
        policy.give_reward(1, 1.0);

        // Arm 0's success mass halved when arm 1 was credited
        let (alpha_0, beta_0) = policy.posterior(0);
        assert_relative_eq!(alpha_0, 1.5);
        assert_relative_eq!(beta_0, 1.0);
        let (alpha_1, beta_1) = policy.posterior(1);
        assert_relative_eq!(alpha_1, 2.0);
        assert_relative_eq!(beta_1, 1.0);
    }

    #[test]
    fn test_discounted_tracks_recent_rewards() {
        let mut policy = DiscountedThompson::new(2, 0.95, 7);
        // Arm 0 paid early, arm 1 pays now
        for _ in 0..30 {
            policy.give_reward(0, 1.0);
        }
        for _ in 0..30 {
            policy.give_reward(1, 1.0);
            policy.give_reward(0, 0.0);
        }
        assert_eq!(policy.choose(), 1);
    }

    #[test]
    fn test_start_game_clears_posteriors() {
        let mut policy = DiscountedThompson::new(2, 0.9, 7);
        policy.give_reward(0, 1.0);
        policy.start_game();

        assert_eq!(policy.posterior(0), (1.0, 1.0));
        assert_eq!(policy.pulls(), &[0, 0]);
    }
}
