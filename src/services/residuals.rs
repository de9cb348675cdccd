use std::collections::HashMap;
use std::hash::Hash;

use crate::{
    models::{ItemId, RatingRecord, UserKey},
    services::{biases::BiasModel, sparse::CsrMatrix},
};

/// Dense index assignment in first-seen order
#[derive(Debug, Clone, PartialEq)]
pub struct IdIndex<K: Hash + Eq> {
    keys: Vec<K>,
    positions: HashMap<K, usize>,
}

impl<K: Hash + Eq + Copy> Default for IdIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Copy> IdIndex<K> {
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Index of `key`, assigning the next free one on first sight
    pub fn insert(&mut self, key: K) -> usize {
        if let Some(&idx) = self.positions.get(&key) {
            return idx;
        }
        let idx = self.keys.len();
        self.keys.push(key);
        self.positions.insert(key, idx);
        idx
    }

    pub fn get(&self, key: &K) -> Option<usize> {
        self.positions.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys in index order
    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    pub fn to_map(&self) -> HashMap<K, usize> {
        self.positions.clone()
    }
}

/// Fully debiased ratings laid out as a user × item matrix
#[derive(Debug, Clone)]
pub struct ResidualMatrix {
    pub matrix: CsrMatrix,
    pub users: IdIndex<UserKey>,
    pub items: IdIndex<ItemId>,
}

/// Rating minus every bias level, optionally clamped to [-clip, clip]
pub fn debiased_rating(biases: &BiasModel, record: &RatingRecord, clip: Option<f64>) -> f64 {
    let residual = record.rating - biases.baseline(record);
    match clip {
        Some(limit) => residual.clamp(-limit, limit),
        None => residual,
    }
}

/// Builds the sparse residual matrix the factorization runs on
///
/// One coordinate entry is emitted per record; repeated (user, item) pairs
/// are summed by the CSR conversion.
pub fn build_residual_matrix(
    records: &[RatingRecord],
    biases: &BiasModel,
    clip: Option<f64>,
) -> ResidualMatrix {
    let mut users = IdIndex::new();
    let mut items = IdIndex::new();
    let mut rows = Vec::with_capacity(records.len());
    let mut cols = Vec::with_capacity(records.len());
    let mut values = Vec::with_capacity(records.len());

    for record in records {
        rows.push(users.insert(record.user));
        cols.push(items.insert(record.item));
        values.push(debiased_rating(biases, record, clip));
    }

    let matrix = CsrMatrix::from_triplets(users.len(), items.len(), &rows, &cols, &values);
    drop((rows, cols, values));

    tracing::info!(
        users = users.len(),
        items = items.len(),
        nnz = matrix.nnz(),
        ratings = records.len(),
        "Residual matrix built"
    );

    ResidualMatrix {
        matrix,
        users,
        items,
    }
}
