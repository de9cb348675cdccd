pub mod biases;
pub mod evaluation;
pub mod exporter;
pub mod factorization;
pub mod loader;
pub mod residuals;
pub mod search;
pub mod sparse;
pub mod training;
