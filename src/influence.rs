//! Pairwise gradient-influence matrices
//!
//! Each curriculum update cycle recomputes, for every ordered arm pair
//! (i, j), how the gradients accumulated for arm j this window align with
//! arm i's reference gradient. Column sums of the cosine form feed the
//! bandit rewards.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::arms::ArmIndex;
use crate::gradient::GradientAccumulator;

/// The seven matrices produced by one influence computation
///
/// `inner`, `head` and `decoder` hold raw inner products, the `sim_*`
/// matrices their cosine counterparts. The row side of entry (i, j) is arm
/// i's effective gradient (running average, or stale latest when unpulled);
/// the column side is arm j's running average scaled by its pull count, the
/// window total. Arms from the same family compare all three segments;
/// arms from different families compare only the shared segment, and their
/// full cosine is defined as the shared cosine. Entries stay zero on the
/// diagonal, for zero-pull columns, and where a cosine denominator would
/// vanish. No entry is ever NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfluenceMatrices {
    pub inner: Array2<f32>,
    pub head: Array2<f32>,
    pub decoder: Array2<f32>,
    pub sim: Array2<f32>,
    pub sim_shared: Array2<f32>,
    pub sim_head: Array2<f32>,
    pub sim_decoder: Array2<f32>,
}

impl InfluenceMatrices {
    /// All-zero matrices for `nb_arms` arms
    #[must_use]
    pub fn zeros(nb_arms: usize) -> Self {
        Self {
            inner: Array2::zeros((nb_arms, nb_arms)),
            head: Array2::zeros((nb_arms, nb_arms)),
            decoder: Array2::zeros((nb_arms, nb_arms)),
            sim: Array2::zeros((nb_arms, nb_arms)),
            sim_shared: Array2::zeros((nb_arms, nb_arms)),
            sim_head: Array2::zeros((nb_arms, nb_arms)),
            sim_decoder: Array2::zeros((nb_arms, nb_arms)),
        }
    }

    /// Number of arms the matrices cover
    #[must_use]
    pub fn nb_arms(&self) -> usize {
        self.inner.nrows()
    }

    /// Compute all seven matrices from the current window
    #[must_use]
    pub fn compute(acc: &GradientAccumulator, arms: &ArmIndex) -> Self {
        let n = arms.nb_arms();
        let family = arms.family_table();
        let mut m = Self::zeros(n);

        for i in 0..n {
            let Some(row) = acc.effective(i) else { continue };
            for j in 0..n {
                if j == i {
                    continue;
                }
                let pulls = acc.pulls(j);
                if pulls == 0 {
                    continue;
                }
                let Some(running) = acc.running(j) else {
                    continue;
                };
                // Column side carries the window total, mean times pulls
                let col = running.scaled(pulls as f32);

                let dot_shared = row.shared.dot(&col.shared);
                if family[i] == family[j] {
                    let dot_head = row.head.dot(&col.head);
                    let dot_decoder = row.decoder.dot(&col.decoder);
                    m.inner[[i, j]] = dot_shared + dot_head + dot_decoder;
                    m.head[[i, j]] = dot_head;
                    m.decoder[[i, j]] = dot_decoder;
                    m.sim[[i, j]] = cosine(m.inner[[i, j]], row.norm(), col.norm());
                    m.sim_shared[[i, j]] = cosine(dot_shared, l2(&row.shared), l2(&col.shared));
                    m.sim_head[[i, j]] = cosine(dot_head, l2(&row.head), l2(&col.head));
                    m.sim_decoder[[i, j]] =
                        cosine(dot_decoder, l2(&row.decoder), l2(&col.decoder));
                } else {
                    // Families only share the encoder parameters
                    m.inner[[i, j]] = dot_shared;
                    let shared_sim = cosine(dot_shared, l2(&row.shared), l2(&col.shared));
                    m.sim_shared[[i, j]] = shared_sim;
                    m.sim[[i, j]] = shared_sim;
                }
            }
        }
        m
    }

    /// Column sums of the cosine matrix
    ///
    /// Entry j aggregates how much training every other arm received from
    /// arm j's gradients this window.
    #[must_use]
    pub fn column_sums(&self) -> Array1<f32> {
        self.sim.sum_axis(Axis(0))
    }
}

fn cosine(dot: f32, norm_a: f32, norm_b: f32) -> f32 {
    let denom = norm_a * norm_b;
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

fn l2(v: &Array1<f32>) -> f32 {
    v.dot(v).sqrt()
}
