use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// How the validation split is drawn during hyperparameter search
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SplitStrategy {
    /// Independent per-row coin flip
    Random,
    /// Older ratings train, newer ratings validate
    Temporal,
}

/// Training configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Directory holding ratings.csv, movies.csv and links.csv
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Where the trained model artifact is written
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// PostgreSQL connection URL for in-app ratings (skipped when unset)
    #[serde(default)]
    pub database_url: Option<String>,

    /// External users with fewer ratings than this are pruned
    #[serde(default = "default_min_user_ratings")]
    pub min_user_ratings: usize,

    /// Run hyperparameter search before the final training pass
    #[serde(default)]
    pub optimize: bool,

    /// Trial budget for hyperparameter search
    #[serde(default = "default_n_trials")]
    pub n_trials: usize,

    /// Fraction of rows kept for training during search
    #[serde(default = "default_train_fraction")]
    pub train_fraction: f64,

    #[serde(default = "default_split_strategy")]
    pub split_strategy: SplitStrategy,

    /// Latent factor count used when search is off
    #[serde(default = "default_latent_factors")]
    pub latent_factors: usize,

    /// Bias damping used when search is off
    #[serde(default = "default_damping")]
    pub damping: f64,

    /// Seed for the split, the search sampler and the SVD sketch
    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default = "default_svd_oversampling")]
    pub svd_oversampling: usize,

    #[serde(default = "default_svd_power_iterations")]
    pub svd_power_iterations: usize,

    /// Also keep a timestamped copy of every artifact
    #[serde(default = "default_keep_versioned")]
    pub keep_versioned: bool,

    /// Upper bound on how many times local reviews are repeated (1 = off)
    #[serde(default = "default_local_boost_max")]
    pub local_boost_max: usize,

    /// Clamp residuals to [-clip, clip] before factorization
    #[serde(default)]
    pub residual_clip: Option<f64>,

    /// Last release year the exported year-bias table is extended to
    #[serde(default = "default_extrapolate_years_until")]
    pub extrapolate_years_until: i32,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/ml-32m")
}

fn default_model_path() -> PathBuf {
    PathBuf::from("ml_models/svd_model_latest.bin")
}

fn default_min_user_ratings() -> usize {
    10
}

fn default_n_trials() -> usize {
    15
}

fn default_train_fraction() -> f64 {
    0.8
}

fn default_split_strategy() -> SplitStrategy {
    SplitStrategy::Random
}

fn default_latent_factors() -> usize {
    120
}

fn default_damping() -> f64 {
    15.0
}

fn default_seed() -> u64 {
    42
}

fn default_svd_oversampling() -> usize {
    10
}

fn default_svd_power_iterations() -> usize {
    4
}

fn default_keep_versioned() -> bool {
    true
}

fn default_local_boost_max() -> usize {
    1
}

fn default_extrapolate_years_until() -> i32 {
    2030
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            model_path: default_model_path(),
            database_url: None,
            min_user_ratings: default_min_user_ratings(),
            optimize: false,
            n_trials: default_n_trials(),
            train_fraction: default_train_fraction(),
            split_strategy: default_split_strategy(),
            latent_factors: default_latent_factors(),
            damping: default_damping(),
            seed: default_seed(),
            svd_oversampling: default_svd_oversampling(),
            svd_power_iterations: default_svd_power_iterations(),
            keep_versioned: default_keep_versioned(),
            local_boost_max: default_local_boost_max(),
            residual_clip: None,
            extrapolate_years_until: default_extrapolate_years_until(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()
            .map_err(|e| AppError::Config(format!("Failed to load config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the pipeline cannot run with
    pub fn validate(&self) -> AppResult<()> {
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return Err(AppError::Config(format!(
                "TRAIN_FRACTION must be in (0, 1), got {}",
                self.train_fraction
            )));
        }
        if !self.damping.is_finite() || self.damping < 0.0 {
            return Err(AppError::Config(format!(
                "DAMPING must be a non-negative number, got {}",
                self.damping
            )));
        }
        if self.latent_factors == 0 {
            return Err(AppError::Config("LATENT_FACTORS must be positive".to_string()));
        }
        if self.optimize && self.n_trials == 0 {
            return Err(AppError::Config(
                "N_TRIALS must be positive when OPTIMIZE is set".to_string(),
            ));
        }
        if self.local_boost_max == 0 {
            return Err(AppError::Config("LOCAL_BOOST_MAX must be at least 1".to_string()));
        }
        if let Some(clip) = self.residual_clip {
            if !clip.is_finite() || clip <= 0.0 {
                return Err(AppError::Config(format!(
                    "RESIDUAL_CLIP must be a positive number, got {}",
                    clip
                )));
            }
        }
        Ok(())
    }

    pub fn ratings_path(&self) -> PathBuf {
        self.data_dir.join("ratings.csv")
    }

    pub fn movies_path(&self) -> PathBuf {
        self.data_dir.join("movies.csv")
    }

    pub fn links_path(&self) -> PathBuf {
        self.data_dir.join("links.csv")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_user_ratings, 10);
        assert_eq!(config.n_trials, 15);
        assert_eq!(config.split_strategy, SplitStrategy::Random);
        assert_eq!(config.ratings_path(), PathBuf::from("data/ml-32m/ratings.csv"));
    }

    #[test]
    fn test_rejects_bad_train_fraction() {
        let config = Config {
            train_fraction: 1.0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_rejects_negative_damping() {
        let config = Config {
            damping: -1.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserializes_from_pairs() {
        let vars = vec![
            ("OPTIMIZE".to_string(), "true".to_string()),
            ("SPLIT_STRATEGY".to_string(), "temporal".to_string()),
            ("RESIDUAL_CLIP".to_string(), "3.0".to_string()),
        ];
        let config: Config = envy::from_iter(vars).unwrap();
        assert!(config.optimize);
        assert_eq!(config.split_strategy, SplitStrategy::Temporal);
        assert_eq!(config.residual_clip, Some(3.0));
        assert_eq!(config.latent_factors, 120);
    }
}
