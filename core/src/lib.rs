//! Vendor spend anomaly detection: reconciles actual spend against planned
//! budgets and returns one explainable alert set per batch.

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod ingest;
pub mod joiner;
pub mod outlier;
pub mod rng;
pub mod rules;
pub mod types;

pub use engine::{detect_anomalies, AnomalyEngine};
pub use error::{DetectError, DetectResult};
