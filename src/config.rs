//! Curriculum run configuration

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::arms::ArmIndex;
use crate::validate::Direction;

/// Errors from configuration validation
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown bandit algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("task layout has no families")]
    EmptyLayout,

    #[error("family {0} has no scales")]
    EmptyFamily(usize),

    #[error("directions cover {got} families, layout has {expected}")]
    DirectionCount { expected: usize, got: usize },

    #[error("train_batch_size must be positive")]
    ZeroBatchSize,

    #[error("train_episodes must be positive")]
    ZeroEpisodes,

    #[error("train_episodes ({episodes}) must be at least train_batch_size ({batch})")]
    EpisodesBelowBatch { episodes: usize, batch: usize },

    #[error("epochs must be positive")]
    ZeroEpochs,

    #[error("evaluation_size must be positive")]
    ZeroEvaluationSize,

    #[error("select_freq must be positive when set")]
    ZeroSelectFreq,

    #[error("warm_start must be a non-negative finite fraction, got {0}")]
    BadWarmStart(f64),

    #[error("gamma must be in (0, 1], got {0}")]
    GammaOutOfRange(f64),

    #[error("discount must be in (0, 1], got {0}")]
    DiscountOutOfRange(f64),

    #[error("rew_alpha must be in [0, 1], got {0}")]
    RewAlphaOutOfRange(f32),
}

/// Result alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Supported arm-selection algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanditAlgorithm {
    Exp3,
    Exp3R,
    Thompson,
    DiscountedThompson,
}

impl FromStr for BanditAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "exp3" => Ok(Self::Exp3),
            "exp3r" | "exp3_r" | "exp3.r" => Ok(Self::Exp3R),
            "thompson" | "ts" => Ok(Self::Thompson),
            "discounted_thompson" | "dts" => Ok(Self::DiscountedThompson),
            _ => Err(ConfigError::UnknownAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for BanditAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Exp3 => "exp3",
            Self::Exp3R => "exp3r",
            Self::Thompson => "thompson",
            Self::DiscountedThompson => "discounted_thompson",
        };
        write!(f, "{name}")
    }
}

/// Configuration for a curriculum-scheduled training run
///
/// # Example
///
/// ```
/// use elegir::config::{BanditAlgorithm, CurriculumConfig};
///
/// let config = CurriculumConfig::new(vec![3, 2])
///     .with_algorithm(BanditAlgorithm::Thompson)
///     .with_warm_start(1.0)
///     .with_seed(7);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.nb_arms(), 5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurriculumConfig {
    /// Scales per task family, in family order; one arm per (family, scale)
    pub scales_per_family: Vec<usize>,
    /// Objective direction per family, for best-model tracking
    pub directions: Vec<Direction>,
    /// Arm-selection algorithm
    pub algorithm: BanditAlgorithm,
    /// Fraction of an epoch spent forcing round-robin arm coverage
    pub warm_start: f64,
    /// Steps between update cycles; defaults to the number of arms
    pub select_freq: Option<usize>,
    /// Training epochs
    pub epochs: usize,
    /// Episodes per epoch
    pub train_episodes: usize,
    /// Episodes consumed per training step
    pub train_batch_size: usize,
    /// Per-rank validation rows per task
    pub evaluation_size: usize,
    /// Chosen-arm weight of the evaluation-blend reward
    pub rew_alpha: f32,
    /// Exploration rate of the adversarial policies
    pub gamma: f64,
    /// Discount factor of the discounted posterior sampler
    pub discount: f64,
    /// Policy RNG seed
    pub seed: u64,
}

impl CurriculumConfig {
    /// Create a configuration with default training shape
    ///
    /// Directions default to `Minimize` for every family.
    #[must_use]
    pub fn new(scales_per_family: Vec<usize>) -> Self {
        let families = scales_per_family.len();
        Self {
            scales_per_family,
            directions: vec![Direction::Minimize; families],
            algorithm: BanditAlgorithm::Exp3R,
            warm_start: 1.0,
            select_freq: None,
            epochs: 1000,
            train_episodes: 100_000,
            train_batch_size: 512,
            evaluation_size: 512,
            rew_alpha: 0.5,
            gamma: 0.1,
            discount: 0.95,
            seed: 42,
        }
    }

    pub fn with_directions(mut self, directions: Vec<Direction>) -> Self {
        self.directions = directions;
        self
    }

    pub fn with_algorithm(mut self, algorithm: BanditAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_warm_start(mut self, warm_start: f64) -> Self {
        self.warm_start = warm_start;
        self
    }

    pub fn with_select_freq(mut self, select_freq: usize) -> Self {
        self.select_freq = Some(select_freq);
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_train_episodes(mut self, train_episodes: usize) -> Self {
        self.train_episodes = train_episodes;
        self
    }

    pub fn with_train_batch_size(mut self, train_batch_size: usize) -> Self {
        self.train_batch_size = train_batch_size;
        self
    }

    pub fn with_evaluation_size(mut self, evaluation_size: usize) -> Self {
        self.evaluation_size = evaluation_size;
        self
    }

    pub fn with_rew_alpha(mut self, rew_alpha: f32) -> Self {
        self.rew_alpha = rew_alpha;
        self
    }

    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_discount(mut self, discount: f64) -> Self {
        self.discount = discount;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Total number of arms
    #[must_use]
    pub fn nb_arms(&self) -> usize {
        self.scales_per_family.iter().sum()
    }

    /// Number of task families
    #[must_use]
    pub fn families(&self) -> usize {
        self.scales_per_family.len()
    }

    /// Training steps per epoch, rounded down
    #[must_use]
    pub fn steps_per_epoch(&self) -> usize {
        self.train_episodes / self.train_batch_size
    }

    /// Steps between update cycles
    #[must_use]
    pub fn effective_select_freq(&self) -> usize {
        self.select_freq.unwrap_or_else(|| self.nb_arms())
    }

    /// Step threshold below which selections are forced round-robin
    #[must_use]
    pub fn warm_start_steps(&self) -> f64 {
        self.warm_start * self.steps_per_epoch() as f64
    }

    /// Number of reward updates a drift-detecting policy should expect
    ///
    /// Uses the rounded-up step count so the horizon never undershoots.
    #[must_use]
    pub fn exp3r_horizon(&self) -> u64 {
        let steps = self.train_episodes.div_ceil(self.train_batch_size);
        let total = steps * self.epochs;
        total.div_ceil(self.effective_select_freq()) as u64
    }

    /// Build the arm index for this layout
    pub fn arm_index(&self) -> crate::arms::Result<ArmIndex> {
        ArmIndex::new(self.scales_per_family.clone())
    }

    /// Check the configuration for fatal inconsistencies
    pub fn validate(&self) -> Result<()> {
        if self.scales_per_family.is_empty() {
            return Err(ConfigError::EmptyLayout);
        }
        for (family, &scales) in self.scales_per_family.iter().enumerate() {
            if scales == 0 {
                return Err(ConfigError::EmptyFamily(family));
            }
        }
        if self.directions.len() != self.families() {
            return Err(ConfigError::DirectionCount {
                expected: self.families(),
                got: self.directions.len(),
            });
        }
        if self.train_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.train_episodes == 0 {
            return Err(ConfigError::ZeroEpisodes);
        }
        if self.train_episodes < self.train_batch_size {
            return Err(ConfigError::EpisodesBelowBatch {
                episodes: self.train_episodes,
                batch: self.train_batch_size,
            });
        }
        if self.epochs == 0 {
            return Err(ConfigError::ZeroEpochs);
        }
        if self.evaluation_size == 0 {
            return Err(ConfigError::ZeroEvaluationSize);
        }
        if self.select_freq == Some(0) {
            return Err(ConfigError::ZeroSelectFreq);
        }
        if !self.warm_start.is_finite() || self.warm_start < 0.0 {
            return Err(ConfigError::BadWarmStart(self.warm_start));
        }
        if !(self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err(ConfigError::GammaOutOfRange(self.gamma));
        }
        if !(self.discount > 0.0 && self.discount <= 1.0) {
            return Err(ConfigError::DiscountOutOfRange(self.discount));
        }
        if !(0.0..=1.0).contains(&self.rew_alpha) {
            return Err(ConfigError::RewAlphaOutOfRange(self.rew_alpha));
        }
        Ok(())
    }
}
