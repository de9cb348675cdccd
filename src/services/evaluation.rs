use serde::Serialize;

use crate::{models::RatingRecord, services::training::TrainedModel};

/// Error metrics over one group of rows
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ErrorMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub samples: usize,
}

impl ErrorMetrics {
    fn from_errors(errors: &[f64]) -> Option<Self> {
        if errors.is_empty() {
            return None;
        }
        let n = errors.len() as f64;
        let mse = errors.iter().map(|e| e * e).sum::<f64>() / n;
        let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
        Some(Self {
            rmse: mse.sqrt(),
            mae,
            samples: errors.len(),
        })
    }
}

/// Held-out accuracy of a trained model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    /// None when no row could be scored
    pub overall: Option<ErrorMetrics>,
    /// Application users only
    pub local: Option<ErrorMetrics>,
    /// Dataset users only
    pub external: Option<ErrorMetrics>,
    /// Rows dropped because their user or item was unseen in training
    pub skipped: usize,
}

impl EvaluationReport {
    /// RMSE over every scored row; 0.0 when nothing was comparable
    pub fn rmse(&self) -> f64 {
        self.overall.map(|m| m.rmse).unwrap_or(0.0)
    }
}

/// Scores validation rows the model has seen both sides of
pub fn evaluate(model: &TrainedModel, validation: &[RatingRecord]) -> EvaluationReport {
    let mut all = Vec::new();
    let mut local = Vec::new();
    let mut external = Vec::new();
    let mut skipped = 0;

    for record in validation {
        let Some(predicted) = model.predict(record) else {
            skipped += 1;
            continue;
        };
        let error = predicted - record.rating;
        all.push(error);
        if record.user.is_local() {
            local.push(error);
        } else {
            external.push(error);
        }
    }

    let report = EvaluationReport {
        overall: ErrorMetrics::from_errors(&all),
        local: ErrorMetrics::from_errors(&local),
        external: ErrorMetrics::from_errors(&external),
        skipped,
    };

    if let Some(overall) = report.overall {
        tracing::info!(
            rmse = overall.rmse,
            mae = overall.mae,
            samples = overall.samples,
            skipped,
            "Evaluation complete"
        );
    } else {
        tracing::warn!(skipped, "No validation rows overlap the training data");
    }
    for (label, metrics) in [("local", report.local), ("external", report.external)] {
        if let Some(m) = metrics {
            tracing::info!(
                group = label,
                rmse = m.rmse,
                mae = m.mae,
                samples = m.samples,
                "Group metrics"
            );
        }
    }

    report
}
