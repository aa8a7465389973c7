//! Arm indexing over (family, scale) task pairs

use serde::{Deserialize, Serialize};

/// Errors from arm index construction and lookups
#[derive(Debug, thiserror::Error)]
pub enum ArmError {
    #[error("task layout has no families")]
    EmptyLayout,

    #[error("family {family} has no scales")]
    EmptyFamily { family: usize },

    #[error("arm {arm} out of range ({nb_arms} arms)")]
    ArmOutOfRange { arm: usize, nb_arms: usize },

    #[error("family {family} out of range ({families} families)")]
    FamilyOutOfRange { family: usize, families: usize },

    #[error("scale {scale} out of range for family {family} ({scales} scales)")]
    ScaleOutOfRange {
        family: usize,
        scale: usize,
        scales: usize,
    },
}

/// Result alias for arm index operations
pub type Result<T> = std::result::Result<T, ArmError>;

/// Fixed mapping between bandit arms and (family, scale) task pairs
///
/// Families are ordered as configured and each contributes one arm per
/// problem scale. Arm ids are contiguous: family 0 owns `0..scales[0]`,
/// family 1 the next `scales[1]` ids, and so on. The mapping is immutable
/// for the lifetime of a run, so arm ids recorded in histories and
/// checkpoints stay meaningful across resume.
///
/// # Example
///
/// ```
/// use elegir::arms::ArmIndex;
///
/// let index = ArmIndex::new(vec![3, 2]).unwrap();
/// assert_eq!(index.nb_arms(), 5);
/// assert_eq!(index.to_arm(1, 0).unwrap(), 3);
/// assert_eq!(index.from_arm(4).unwrap(), (1, 1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmIndex {
    /// Number of scales per family, in family order
    scales_per_family: Vec<usize>,
    /// Cumulative arm counts; `bounds[f]` is one past the last arm of family `f`
    bounds: Vec<usize>,
}

impl ArmIndex {
    /// Create an index from per-family scale counts
    ///
    /// Fails on an empty layout or a family with zero scales.
    pub fn new(scales_per_family: Vec<usize>) -> Result<Self> {
        if scales_per_family.is_empty() {
            return Err(ArmError::EmptyLayout);
        }
        for (family, &scales) in scales_per_family.iter().enumerate() {
            if scales == 0 {
                return Err(ArmError::EmptyFamily { family });
            }
        }
        let mut bounds = Vec::with_capacity(scales_per_family.len());
        let mut total = 0;
        for &scales in &scales_per_family {
            total += scales;
            bounds.push(total);
        }
        Ok(Self {
            scales_per_family,
            bounds,
        })
    }

    /// Total number of arms
    #[must_use]
    pub fn nb_arms(&self) -> usize {
        self.bounds.last().copied().unwrap_or(0)
    }

    /// Number of task families
    #[must_use]
    pub fn families(&self) -> usize {
        self.scales_per_family.len()
    }

    /// Number of scales in one family
    pub fn scales_in(&self, family: usize) -> Result<usize> {
        self.scales_per_family
            .get(family)
            .copied()
            .ok_or(ArmError::FamilyOutOfRange {
                family,
                families: self.families(),
            })
    }

    /// Map a (family, scale) pair to its arm id
    pub fn to_arm(&self, family: usize, scale: usize) -> Result<usize> {
        let scales = self.scales_in(family)?;
        if scale >= scales {
            return Err(ArmError::ScaleOutOfRange {
                family,
                scale,
                scales,
            });
        }
        let offset = if family == 0 {
            0
        } else {
            self.bounds[family - 1]
        };
        Ok(offset + scale)
    }

    /// Map an arm id back to its (family, scale) pair
    pub fn from_arm(&self, arm: usize) -> Result<(usize, usize)> {
        let family = self.family_of(arm)?;
        let offset = if family == 0 {
            0
        } else {
            self.bounds[family - 1]
        };
        Ok((family, arm - offset))
    }

    /// Family that owns an arm id
    pub fn family_of(&self, arm: usize) -> Result<usize> {
        if arm >= self.nb_arms() {
            return Err(ArmError::ArmOutOfRange {
                arm,
                nb_arms: self.nb_arms(),
            });
        }
        // Few families in practice, linear scan over the boundaries
        let family = self
            .bounds
            .iter()
            .position(|&bound| arm < bound)
            .unwrap_or(self.families() - 1);
        Ok(family)
    }

    /// Arm-indexed family lookup table
    ///
    /// Precomputed form of [`family_of`](Self::family_of) for hot loops over
    /// all arm pairs.
    #[must_use]
    pub fn family_table(&self) -> Vec<usize> {
        let mut table = Vec::with_capacity(self.nb_arms());
        for (family, &scales) in self.scales_per_family.iter().enumerate() {
            table.extend(std::iter::repeat(family).take(scales));
        }
        table
    }

    /// Scale counts per family, in family order
    #[must_use]
    pub fn scales_per_family(&self) -> &[usize] {
        &self.scales_per_family
    }
}
