use std::collections::HashMap;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    models::{Genre, GenreSet, ItemId, RatingRecord, UserKey},
};

/// Genre and decade biases are noisier, so they are shrunk harder
pub const CONTEXT_DAMPING_MULTIPLIER: f64 = 2.0;

/// Learned bias hierarchy: global -> year -> item -> user -> user×genre -> user×decade
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BiasModel {
    pub global_mean: f64,
    pub year: HashMap<i32, f64>,
    pub item: HashMap<ItemId, f64>,
    pub user: HashMap<UserKey, f64>,
    pub user_genre: HashMap<Genre, HashMap<UserKey, f64>>,
    pub user_decade: HashMap<i32, HashMap<UserKey, f64>>,
}

impl BiasModel {
    pub fn year_bias(&self, year: i32) -> f64 {
        self.year.get(&year).copied().unwrap_or(0.0)
    }

    pub fn item_bias(&self, item: ItemId) -> f64 {
        self.item.get(&item).copied().unwrap_or(0.0)
    }

    pub fn user_bias(&self, user: &UserKey) -> f64 {
        self.user.get(user).copied().unwrap_or(0.0)
    }

    pub fn user_genre_bias(&self, user: &UserKey, genre: Genre) -> f64 {
        self.user_genre
            .get(&genre)
            .and_then(|by_user| by_user.get(user))
            .copied()
            .unwrap_or(0.0)
    }

    /// Sum of the user's biases over every genre in the set
    pub fn genre_bias_total(&self, user: &UserKey, genres: GenreSet) -> f64 {
        genres
            .iter()
            .map(|genre| self.user_genre_bias(user, genre))
            .sum()
    }

    pub fn user_decade_bias(&self, user: &UserKey, decade: i32) -> f64 {
        self.user_decade
            .get(&decade)
            .and_then(|by_user| by_user.get(user))
            .copied()
            .unwrap_or(0.0)
    }

    /// Rating explained by biases alone; missing lookups count as zero
    pub fn baseline(&self, record: &RatingRecord) -> f64 {
        self.global_mean
            + self.year_bias(record.year)
            + self.item_bias(record.item)
            + self.user_bias(&record.user)
            + self.genre_bias_total(&record.user, record.genres)
            + self.user_decade_bias(&record.user, record.decade)
    }
}

/// Output of a bias estimation pass
#[derive(Debug, Clone)]
pub struct BiasFit {
    pub biases: BiasModel,
    /// Per-row residual after every bias level was removed, in input order
    pub residuals: Vec<f64>,
}

/// Shrinkage-damped mean per group: sum / (count + damping)
pub fn damped_means<K, I>(pairs: I, damping: f64) -> HashMap<K, f64>
where
    K: Hash + Eq,
    I: IntoIterator<Item = (K, f64)>,
{
    let mut sums: HashMap<K, (f64, usize)> = HashMap::new();
    for (key, value) in pairs {
        let entry = sums.entry(key).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }

    sums.into_iter()
        .map(|(key, (sum, count))| (key, sum / (count as f64 + damping)))
        .collect()
}

/// Subtracts a per-row bias lookup from the residuals
fn subtract<F>(records: &[RatingRecord], mut residuals: Vec<f64>, lookup: F) -> Vec<f64>
where
    F: Fn(&RatingRecord) -> f64,
{
    for (residual, record) in residuals.iter_mut().zip(records) {
        *residual -= lookup(record);
    }
    residuals
}

/// Estimates the bias hierarchy over the training frame
///
/// Each level is fit on the residual left by all previous levels, so the
/// order of the steps below is part of the model definition.
pub fn estimate_biases(records: &[RatingRecord], damping: f64) -> AppResult<BiasFit> {
    if records.is_empty() {
        return Err(AppError::InvalidInput(
            "Cannot estimate biases on an empty training frame".to_string(),
        ));
    }
    if !damping.is_finite() || damping < 0.0 {
        return Err(AppError::InvalidInput(format!(
            "Damping must be a non-negative number, got {}",
            damping
        )));
    }

    let context_damping = damping * CONTEXT_DAMPING_MULTIPLIER;

    // 1. Global mean
    let global_mean = records.iter().map(|r| r.rating).sum::<f64>() / records.len() as f64;
    let residuals: Vec<f64> = records.iter().map(|r| r.rating - global_mean).collect();

    // 2. Year
    let year = damped_means(
        records.iter().zip(&residuals).map(|(r, res)| (r.year, *res)),
        damping,
    );
    let residuals = subtract(records, residuals, |r| year.get(&r.year).copied().unwrap_or(0.0));

    // 3. Item
    let item = damped_means(
        records.iter().zip(&residuals).map(|(r, res)| (r.item, *res)),
        damping,
    );
    let residuals = subtract(records, residuals, |r| item.get(&r.item).copied().unwrap_or(0.0));

    // 4. User
    let user = damped_means(
        records.iter().zip(&residuals).map(|(r, res)| (r.user, *res)),
        damping,
    );
    let mut residuals =
        subtract(records, residuals, |r| user.get(&r.user).copied().unwrap_or(0.0));

    tracing::debug!(
        years = year.len(),
        items = item.len(),
        users = user.len(),
        "Base biases estimated"
    );

    // 5. User × genre, one genre at a time in vocabulary order
    let mut user_genre = HashMap::new();
    for genre in Genre::ALL {
        let biases = damped_means(
            records
                .iter()
                .zip(&residuals)
                .filter(|(r, _)| r.genres.contains(genre))
                .map(|(r, res)| (r.user, *res)),
            context_damping,
        );
        if biases.is_empty() {
            continue;
        }
        residuals = subtract(records, residuals, |r| {
            if r.genres.contains(genre) {
                biases.get(&r.user).copied().unwrap_or(0.0)
            } else {
                0.0
            }
        });
        user_genre.insert(genre, biases);
    }

    // 6. User × decade; decades partition the rows so one pass suffices
    let by_decade = damped_means(
        records
            .iter()
            .zip(&residuals)
            .map(|(r, res)| ((r.decade, r.user), *res)),
        context_damping,
    );
    let residuals = subtract(records, residuals, |r| {
        by_decade.get(&(r.decade, r.user)).copied().unwrap_or(0.0)
    });

    let mut user_decade: HashMap<i32, HashMap<UserKey, f64>> = HashMap::new();
    for ((decade, user_key), bias) in by_decade {
        user_decade.entry(decade).or_default().insert(user_key, bias);
    }

    tracing::info!(
        global_mean,
        damping,
        genres = user_genre.len(),
        decades = user_decade.len(),
        "Biases computed"
    );

    Ok(BiasFit {
        biases: BiasModel {
            global_mean,
            year,
            item,
            user,
            user_genre,
            user_decade,
        },
        residuals,
    })
}
