use std::ops::RangeInclusive;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;

use crate::{
    config::SplitStrategy,
    error::AppError,
    models::RatingRecord,
    services::{
        evaluation::evaluate,
        training::{train_model, Hyperparameters, TrainingOptions},
    },
};

/// One evaluated parameter combination
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrialResult {
    pub params: Hyperparameters,
    /// Held-out RMSE; +inf when training failed
    pub score: f64,
}

/// Result of a search run
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub best: Hyperparameters,
    /// None when no trial was run or none produced a finite score
    pub best_score: Option<f64>,
    pub trials: Vec<TrialResult>,
}

/// Pluggable hyperparameter search
///
/// Strategies only see an objective to minimize, so the pipeline does not
/// depend on how candidates are proposed.
pub trait SearchStrategy {
    fn name(&self) -> &'static str;

    /// Whether `search` evaluates the objective at all
    fn uses_objective(&self) -> bool {
        true
    }

    fn search(&mut self, objective: &mut dyn FnMut(Hyperparameters) -> f64) -> SearchOutcome;
}

/// Returns the configured parameters without evaluating anything
#[derive(Debug, Clone)]
pub struct FixedParams {
    params: Hyperparameters,
}

impl FixedParams {
    pub fn new(params: Hyperparameters) -> Self {
        Self { params }
    }
}

impl SearchStrategy for FixedParams {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn uses_objective(&self) -> bool {
        false
    }

    fn search(&mut self, _objective: &mut dyn FnMut(Hyperparameters) -> f64) -> SearchOutcome {
        SearchOutcome {
            best: self.params,
            best_score: None,
            trials: Vec::new(),
        }
    }
}

/// Uniform random sampling over integer k and damping ranges
#[derive(Debug, Clone)]
pub struct RandomSearch {
    n_trials: usize,
    k_range: RangeInclusive<usize>,
    damping_range: RangeInclusive<u32>,
    fallback: Hyperparameters,
    rng: StdRng,
}

impl RandomSearch {
    /// Search over k in [20, 100] and damping in [2, 15]
    pub fn new(n_trials: usize, fallback: Hyperparameters, seed: u64) -> Self {
        Self::with_ranges(n_trials, 20..=100, 2..=15, fallback, seed)
    }

    pub fn with_ranges(
        n_trials: usize,
        k_range: RangeInclusive<usize>,
        damping_range: RangeInclusive<u32>,
        fallback: Hyperparameters,
        seed: u64,
    ) -> Self {
        Self {
            n_trials,
            k_range,
            damping_range,
            fallback,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn sample(&mut self) -> Hyperparameters {
        Hyperparameters {
            k: self.rng.gen_range(self.k_range.clone()),
            damping: f64::from(self.rng.gen_range(self.damping_range.clone())),
        }
    }
}

impl SearchStrategy for RandomSearch {
    fn name(&self) -> &'static str {
        "random"
    }

    fn search(&mut self, objective: &mut dyn FnMut(Hyperparameters) -> f64) -> SearchOutcome {
        let mut trials = Vec::with_capacity(self.n_trials);
        let mut best: Option<TrialResult> = None;

        for trial in 0..self.n_trials {
            let params = self.sample();
            let score = objective(params);
            tracing::info!(
                trial,
                k = params.k,
                damping = params.damping,
                score,
                "Trial finished"
            );

            let result = TrialResult { params, score };
            let improved = best.map_or(true, |b| score < b.score);
            if score.is_finite() && improved {
                best = Some(result);
            }
            trials.push(result);
        }

        match best {
            Some(b) => SearchOutcome {
                best: b.params,
                best_score: Some(b.score),
                trials,
            },
            None => {
                tracing::warn!(
                    trials = trials.len(),
                    "No trial produced a finite score, keeping configured parameters"
                );
                SearchOutcome {
                    best: self.fallback,
                    best_score: None,
                    trials,
                }
            }
        }
    }
}

/// Partitions records into (train, validation)
pub fn split_records(
    records: &[RatingRecord],
    strategy: SplitStrategy,
    train_fraction: f64,
    seed: u64,
) -> (Vec<RatingRecord>, Vec<RatingRecord>) {
    match strategy {
        SplitStrategy::Random => {
            let mut rng = StdRng::seed_from_u64(seed);
            let p = train_fraction.clamp(0.0, 1.0);
            records.iter().partition(|_| rng.gen_bool(p))
        }
        SplitStrategy::Temporal => {
            let cutoff = timestamp_quantile(records, train_fraction);
            records
                .iter()
                .partition(|r| (r.timestamp as f64) <= cutoff)
        }
    }
}

/// Linearly interpolated quantile of the record timestamps
fn timestamp_quantile(records: &[RatingRecord], q: f64) -> f64 {
    let mut timestamps: Vec<i64> = records.iter().map(|r| r.timestamp).collect();
    if timestamps.is_empty() {
        return 0.0;
    }
    timestamps.sort_unstable();
    let pos = q.clamp(0.0, 1.0) * (timestamps.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    timestamps[lower] as f64 + (timestamps[upper] - timestamps[lower]) as f64 * frac
}

/// Held-out RMSE of one parameter combination
///
/// Training failures, including degenerate factorizations, score +inf so
/// the search moves on instead of aborting.
pub fn trial_score(
    train: &[RatingRecord],
    validation: &[RatingRecord],
    params: Hyperparameters,
    options: &TrainingOptions,
) -> f64 {
    match train_model(train, params, options) {
        Ok(model) => evaluate(&model, validation).rmse(),
        Err(AppError::Factorization(e)) => {
            tracing::warn!(error = %e, k = params.k, "Degenerate trial");
            f64::INFINITY
        }
        Err(e) => {
            tracing::warn!(error = %e, k = params.k, "Trial failed");
            f64::INFINITY
        }
    }
}

/// Splits the frame and lets `strategy` pick parameters on it
///
/// Strategies that never evaluate the objective skip the split.
pub fn tune(
    records: &[RatingRecord],
    strategy: &mut dyn SearchStrategy,
    split: SplitStrategy,
    train_fraction: f64,
    seed: u64,
    options: &TrainingOptions,
) -> SearchOutcome {
    if !strategy.uses_objective() {
        return strategy.search(&mut |_| f64::INFINITY);
    }

    let (train, validation) = split_records(records, split, train_fraction, seed);
    tracing::info!(
        strategy = strategy.name(),
        train = train.len(),
        validation = validation.len(),
        "Starting hyperparameter search"
    );

    let outcome = strategy.search(&mut |params| trial_score(&train, &validation, params, options));
    drop((train, validation));

    tracing::info!(
        k = outcome.best.k,
        damping = outcome.best.damping,
        best_score = ?outcome.best_score,
        "Best parameters selected"
    );
    outcome
}
