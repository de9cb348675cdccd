use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::{
    error::AppResult,
    models::{ItemId, RatingRecord, UserKey},
    services::{
        biases::{estimate_biases, BiasModel},
        factorization::{truncated_svd, SvdOptions},
        residuals::{build_residual_matrix, IdIndex},
    },
};

/// The two knobs hyperparameter search tunes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Requested latent factor count (clamped by the factorization)
    pub k: usize,
    /// Bias shrinkage strength
    pub damping: f64,
}

/// Settings shared by every training pass in a run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrainingOptions {
    pub svd: SvdOptions,
    pub residual_clip: Option<f64>,
}

/// Latent factors plus the index maps that address them
#[derive(Debug, Clone)]
pub struct FactorModel {
    /// n_users × k
    pub u: Array2<f64>,
    /// Length k, descending
    pub singular_values: Array1<f64>,
    /// k × n_items
    pub vt: Array2<f64>,
    pub users: IdIndex<UserKey>,
    pub items: IdIndex<ItemId>,
}

impl FactorModel {
    pub fn rank(&self) -> usize {
        self.singular_values.len()
    }

    /// (U[u] · Σ) · Vᵗ[:, i] for a pair seen in training
    pub fn interaction(&self, user: &UserKey, item: ItemId) -> Option<f64> {
        let u_idx = self.users.get(user)?;
        let i_idx = self.items.get(&item)?;
        let user_row = self.u.row(u_idx);
        let item_col = self.vt.column(i_idx);
        Some(
            user_row
                .iter()
                .zip(self.singular_values.iter())
                .zip(item_col.iter())
                .map(|((u, s), v)| u * s * v)
                .sum(),
        )
    }
}

/// Result of one full training pass
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub biases: BiasModel,
    pub factors: FactorModel,
    /// Parameters as requested
    pub params: Hyperparameters,
}

impl TrainedModel {
    /// Predicted rating, or `None` for cold-start users and items
    pub fn predict(&self, record: &RatingRecord) -> Option<f64> {
        let interaction = self.factors.interaction(&record.user, record.item)?;
        Some(self.biases.baseline(record) + interaction)
    }
}

/// Bias estimation, residual matrix and factorization over one frame
pub fn train_model(
    records: &[RatingRecord],
    params: Hyperparameters,
    options: &TrainingOptions,
) -> AppResult<TrainedModel> {
    tracing::info!(
        ratings = records.len(),
        k = params.k,
        damping = params.damping,
        "Training model"
    );

    let fit = estimate_biases(records, params.damping)?;
    let biases = fit.biases;
    drop(fit.residuals);

    let residual = build_residual_matrix(records, &biases, options.residual_clip);
    let svd = truncated_svd(&residual.matrix, params.k, &options.svd)?;

    let factors = FactorModel {
        u: svd.u,
        singular_values: svd.singular_values,
        vt: svd.vt,
        users: residual.users,
        items: residual.items,
    };

    Ok(TrainedModel {
        biases,
        factors,
        params,
    })
}
