//! Adaptive curriculum scheduling for multi-task reinforcement learning.
//!
//! This crate decides which task a shared solver trains on next:
//! - Flat arm indexing over (family, scale) task pairs
//! - Per-arm gradient windows and pairwise influence matrices
//! - Pluggable bandit policies: Exp3, Exp3R, and Thompson variants
//! - Coordinator/worker choice broadcast over a pluggable communicator
//! - Epoch checkpoints that resume the exact decision sequence
//!
//! # Toyota Way Principles
//!
//! - **Jidoka**: configuration and checkpoint validation reject mismatched state before training
//! - **Heijunka**: the warm start levels arm coverage before the policy concentrates it
//! - **Kaizen**: reward cycles continuously steer training toward tasks that transfer
//!
//! # Example
//!
//! ```
//! use elegir::bandit::Thompson;
//! use elegir::comm::LocalComm;
//! use elegir::config::{BanditAlgorithm, CurriculumConfig};
//! use elegir::schedule::{CurriculumScheduler, StepOutcome};
//!
//! let config = CurriculumConfig::new(vec![2, 3])
//!     .with_algorithm(BanditAlgorithm::Thompson)
//!     .with_train_episodes(64)
//!     .with_train_batch_size(8)
//!     .with_seed(7);
//! let policy = Thompson::new(config.nb_arms(), config.seed);
//! let mut sched = CurriculumScheduler::new(config, policy, LocalComm::single())?;
//!
//! let choice = sched.next_arm()?;
//! sched.complete_step(StepOutcome::new(choice.arm, 0.5))?;
//! assert_eq!(sched.total_count(), 1);
//! # Ok::<(), elegir::schedule::ScheduleError>(())
//! ```

pub mod arms;
pub mod bandit;
pub mod checkpoint;
pub mod comm;
pub mod config;
pub mod gradient;
pub mod influence;
pub mod schedule;
pub mod validate;

pub use arms::ArmIndex;
pub use bandit::{
    ArmPolicy, BanditController, CurriculumBandit, DiscountedThompson, Exp3, Exp3R, Thompson,
};
pub use checkpoint::{CheckpointStore, TrainerCheckpoint};
pub use comm::{Communicator, LocalComm};
pub use config::{BanditAlgorithm, CurriculumConfig};
pub use gradient::{GradientAccumulator, GradientTriple};
pub use influence::InfluenceMatrices;
pub use schedule::{
    ArmChoice, ChoiceOrigin, CurriculumScheduler, CycleReport, StepOutcome, TrainingHistory,
};
pub use validate::{BestSnapshots, Direction, EvalData, Snapshot, Split, ValidationSets};
