use std::path::PathBuf;

use crate::services::factorization::FactorizationError;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Dataset file not found: {}", .0.display())]
    DatasetMissing(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Metadata encoding error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Factorization error: {0}")]
    Factorization(#[from] FactorizationError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the error should abort the run before any training work
    pub fn is_fatal_input(&self) -> bool {
        matches!(self, AppError::DatasetMissing(_) | AppError::Config(_))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_missing_message_names_path() {
        let err = AppError::DatasetMissing(PathBuf::from("data/ml-32m/ratings.csv"));
        assert_eq!(
            err.to_string(),
            "Dataset file not found: data/ml-32m/ratings.csv"
        );
        assert!(err.is_fatal_input());
    }

    #[test]
    fn test_factorization_error_converts() {
        let err: AppError = FactorizationError::Degenerate { rows: 1, cols: 4 }.into();
        assert!(matches!(err, AppError::Factorization(_)));
        assert!(!err.is_fatal_input());
    }
}
