use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::{Genre, ItemId, UserKey};

/// Bumped whenever the artifact layout changes
pub const MODEL_VERSION: &str = "3.0";

/// Summary of the run that produced an artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactMetadata {
    pub run_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub k: usize,
    pub damping: f64,
    pub n_users: usize,
    pub n_items: usize,
    pub n_ratings: usize,
    pub n_local_users: usize,
    pub n_external_users: usize,
    pub model_version: String,
}

/// Everything the prediction lookup needs, written once per training run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelArtifact {
    /// User factors, one row per entry of `user_to_idx`
    pub u: Array2<f64>,
    /// Diagonal k×k matrix of singular values, descending
    pub sigma: Array2<f64>,
    /// Item factors, one column per entry of `item_to_idx`
    pub vt: Array2<f64>,
    pub user_to_idx: HashMap<UserKey, usize>,
    pub item_to_idx: HashMap<ItemId, usize>,
    /// Item ids in index order
    pub known_item_ids: Vec<ItemId>,
    pub global_mean: f64,
    pub year_biases: HashMap<i32, f64>,
    pub item_biases: HashMap<ItemId, f64>,
    pub user_biases: HashMap<UserKey, f64>,
    pub user_genre_biases: HashMap<Genre, HashMap<UserKey, f64>>,
    pub user_decade_biases: HashMap<i32, HashMap<UserKey, f64>>,
    /// Raw genre tags per item
    pub item_genres: HashMap<ItemId, Vec<String>>,
    /// TMDB genre name -> MovieLens tag (None when there is no counterpart)
    pub genre_mapping: BTreeMap<String, Option<String>>,
    pub item_years: HashMap<ItemId, i32>,
    pub metadata: ArtifactMetadata,
}

impl ModelArtifact {
    /// Latent factor count
    pub fn rank(&self) -> usize {
        self.sigma.nrows()
    }

    /// Checks the shape invariants between factors and index maps
    pub fn is_consistent(&self) -> bool {
        let k = self.rank();
        self.sigma.ncols() == k
            && self.u.ncols() == k
            && self.vt.nrows() == k
            && self.u.nrows() == self.user_to_idx.len()
            && self.vt.ncols() == self.item_to_idx.len()
            && self.known_item_ids.len() == self.item_to_idx.len()
    }

    /// Latent interaction term for a seen (user, item) pair
    pub fn interaction(&self, user: &UserKey, item: ItemId) -> Option<f64> {
        let u_idx = *self.user_to_idx.get(user)?;
        let i_idx = *self.item_to_idx.get(&item)?;
        let user_row: ArrayView1<f64> = self.u.row(u_idx);
        let item_col = self.vt.column(i_idx);
        let weighted = user_row.dot(&self.sigma);
        Some(weighted.dot(&item_col))
    }
}
