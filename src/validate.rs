//! Fixed validation sets, the scatter protocol, and historical-best
//! model snapshots

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::arms::ArmIndex;
use crate::comm::{CommError, Communicator};

/// Errors from validation data handling
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("{rows} rows of length {row_len} need {expected} values, got {got}")]
    ShapeMismatch {
        rows: usize,
        row_len: usize,
        expected: usize,
        got: usize,
    },

    #[error("{rows} rows cannot split evenly into {parts} chunks")]
    UnevenChunk { rows: usize, parts: usize },

    #[error("chunk {part} out of range for {parts} parts")]
    ChunkOutOfRange { part: usize, parts: usize },

    #[error("coordinator rank holds no overall validation sets")]
    MissingOverall,

    #[error("communication failed: {0}")]
    Comm(#[from] CommError),
}

/// Result alias for validation operations
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Objective direction of a family's evaluation score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Higher scores are better (profit-style objectives)
    Maximize,
    /// Lower scores are better (cost-style objectives)
    Minimize,
}

/// Which validation split a dataset belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    /// Problem sizes the curriculum trains on
    Seen,
    /// Held-out problem sizes
    Unseen,
}

/// Opaque problem batch, flattened row-major
///
/// The curriculum never interprets the values; it only chunks rows across
/// ranks and hands batches to the caller's scoring closure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalData {
    rows: usize,
    row_len: usize,
    values: Vec<f32>,
}

impl EvalData {
    /// Wrap a flattened buffer, checking the shape
    pub fn new(rows: usize, row_len: usize, values: Vec<f32>) -> Result<Self> {
        let expected = rows * row_len;
        if values.len() != expected {
            return Err(ValidationError::ShapeMismatch {
                rows,
                row_len,
                expected,
                got: values.len(),
            });
        }
        Ok(Self {
            rows,
            row_len,
            values,
        })
    }

    /// All-zero batch of the given shape
    #[must_use]
    pub fn zeros(rows: usize, row_len: usize) -> Self {
        Self {
            rows,
            row_len,
            values: vec![0.0; rows * row_len],
        }
    }

    /// Number of rows
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Values per row
    #[must_use]
    pub fn row_len(&self) -> usize {
        self.row_len
    }

    /// Flattened values
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Mutable flattened values, for receiving into a placeholder
    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    /// Extract one of `parts` equal row-chunks
    pub fn chunk(&self, part: usize, parts: usize) -> Result<Self> {
        if part >= parts {
            return Err(ValidationError::ChunkOutOfRange { part, parts });
        }
        if self.rows % parts != 0 {
            return Err(ValidationError::UnevenChunk {
                rows: self.rows,
                parts,
            });
        }
        let rows = self.rows / parts;
        let start = part * rows * self.row_len;
        let end = start + rows * self.row_len;
        Ok(Self {
            rows,
            row_len: self.row_len,
            values: self.values[start..end].to_vec(),
        })
    }
}

/// Per-task fixed validation datasets, seen and unseen splits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSets {
    seen: Vec<Vec<EvalData>>,
    unseen: Vec<Vec<EvalData>>,
}

impl ValidationSets {
    /// Build both splits by calling the generator once per task and split
    pub fn generate<F>(arms: &ArmIndex, mut generate: F) -> Self
    where
        F: FnMut(usize, usize, Split) -> EvalData,
    {
        let mut seen = Vec::with_capacity(arms.families());
        let mut unseen = Vec::with_capacity(arms.families());
        for (family, &scales) in arms.scales_per_family().iter().enumerate() {
            let mut seen_row = Vec::with_capacity(scales);
            let mut unseen_row = Vec::with_capacity(scales);
            for scale in 0..scales {
                seen_row.push(generate(family, scale, Split::Seen));
                unseen_row.push(generate(family, scale, Split::Unseen));
            }
            seen.push(seen_row);
            unseen.push(unseen_row);
        }
        Self { seen, unseen }
    }

    /// Seen-split dataset for one task
    ///
    /// `family` and `scale` must come from the matching [`ArmIndex`].
    #[must_use]
    pub fn seen(&self, family: usize, scale: usize) -> &EvalData {
        &self.seen[family][scale]
    }

    /// Unseen-split dataset for one task
    #[must_use]
    pub fn unseen(&self, family: usize, scale: usize) -> &EvalData {
        &self.unseen[family][scale]
    }
}

fn seen_tag(family: usize, scale: usize, rank: usize) -> u64 {
    (family * 100 + scale * 10 + rank) as u64
}

fn unseen_tag(family: usize, scale: usize, rank: usize) -> u64 {
    1000 + seen_tag(family, scale, rank)
}

/// Scatter coordinator-held validation sets into per-rank local chunks
///
/// The coordinator keeps row-chunk 0 of every dataset and sends chunk `k`
/// to rank `k` under per-task tags; workers size a placeholder through the
/// generator and block on the receive. Returns this rank's local sets.
/// Overall row counts must be a multiple of the world size.
pub fn distribute<C, F>(
    comm: &mut C,
    arms: &ArmIndex,
    overall: Option<&ValidationSets>,
    mut placeholder: F,
) -> Result<ValidationSets>
where
    C: Communicator,
    F: FnMut(usize, usize, Split) -> EvalData,
{
    let world = comm.world_size();
    let rank = comm.rank();
    let mut seen = Vec::with_capacity(arms.families());
    let mut unseen = Vec::with_capacity(arms.families());

    if rank == 0 {
        let overall = overall.ok_or(ValidationError::MissingOverall)?;
        for (family, &scales) in arms.scales_per_family().iter().enumerate() {
            let mut seen_row = Vec::with_capacity(scales);
            let mut unseen_row = Vec::with_capacity(scales);
            for scale in 0..scales {
                let full = overall.seen(family, scale);
                for dst in 1..world {
                    let chunk = full.chunk(dst, world)?;
                    comm.send_f32s(dst, seen_tag(family, scale, dst), chunk.values())?;
                }
                seen_row.push(full.chunk(0, world)?);

                let full = overall.unseen(family, scale);
                for dst in 1..world {
                    let chunk = full.chunk(dst, world)?;
                    comm.send_f32s(dst, unseen_tag(family, scale, dst), chunk.values())?;
                }
                unseen_row.push(full.chunk(0, world)?);
            }
            seen.push(seen_row);
            unseen.push(unseen_row);
        }
    } else {
        for (family, &scales) in arms.scales_per_family().iter().enumerate() {
            let mut seen_row = Vec::with_capacity(scales);
            let mut unseen_row = Vec::with_capacity(scales);
            for scale in 0..scales {
                let mut local = placeholder(family, scale, Split::Seen);
                comm.recv_f32s(0, seen_tag(family, scale, rank), local.values_mut())?;
                seen_row.push(local);

                let mut local = placeholder(family, scale, Split::Unseen);
                comm.recv_f32s(0, unseen_tag(family, scale, rank), local.values_mut())?;
                unseen_row.push(local);
            }
            seen.push(seen_row);
            unseen.push(unseen_row);
        }
    }
    Ok(ValidationSets { seen, unseen })
}

/// One historical-best model capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Scheduler step the capture was taken at
    pub step: u64,
    /// Opaque serialized weights
    pub weights: Vec<u8>,
}

/// Historical best model weights per task, seen and unseen splits
///
/// Indexed by arm id. A capture replaces the previous one when the task's
/// new score strictly improves on every earlier round, under the family's
/// objective direction; the first round always captures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestSnapshots {
    seen: Vec<Option<Snapshot>>,
    unseen: Vec<Option<Snapshot>>,
}

impl BestSnapshots {
    /// Empty snapshot table for `nb_arms` arms
    #[must_use]
    pub fn new(nb_arms: usize) -> Self {
        Self {
            seen: vec![None; nb_arms],
            unseen: vec![None; nb_arms],
        }
    }

    /// Number of arms tracked
    #[must_use]
    pub fn nb_arms(&self) -> usize {
        self.seen.len()
    }

    /// Best capture on the seen split for one arm
    #[must_use]
    pub fn seen(&self, arm: usize) -> Option<&Snapshot> {
        self.seen[arm].as_ref()
    }

    /// Best capture on the unseen split for one arm
    #[must_use]
    pub fn unseen(&self, arm: usize) -> Option<&Snapshot> {
        self.unseen[arm].as_ref()
    }

    /// Fold one evaluation round in, comparing against prior rounds only
    ///
    /// `round` holds seen scores at `0..nb_arms` and unseen scores at
    /// `nb_arms..2 * nb_arms`, both in arm order.
    pub fn update_from_round(
        &mut self,
        arms: &ArmIndex,
        directions: &[Direction],
        prior: &[Array1<f32>],
        round: &Array1<f32>,
        step: u64,
        weights: &[u8],
    ) {
        let nb = self.seen.len();
        let family = arms.family_table();
        for arm in 0..nb {
            let direction = directions[family[arm]];
            if improves(direction, prior.iter().map(|r| r[arm]), round[arm]) {
                self.seen[arm] = Some(Snapshot {
                    step,
                    weights: weights.to_vec(),
                });
            }
            if improves(direction, prior.iter().map(|r| r[nb + arm]), round[nb + arm]) {
                self.unseen[arm] = Some(Snapshot {
                    step,
                    weights: weights.to_vec(),
                });
            }
        }
    }
}

fn improves(direction: Direction, prior: impl Iterator<Item = f32>, score: f32) -> bool {
    let mut seen_any = false;
    let mut best = match direction {
        Direction::Maximize => f32::NEG_INFINITY,
        Direction::Minimize => f32::INFINITY,
    };
    for v in prior {
        seen_any = true;
        best = match direction {
            Direction::Maximize => best.max(v),
            Direction::Minimize => best.min(v),
        };
    }
    if !seen_any {
        return true;
    }
    match direction {
        Direction::Maximize => score > best,
        Direction::Minimize => score < best,
    }
}
