//! The detection engine: one batch in, one AnomalyReport out.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Validation      (every spend and budget row)
//!   2. DataJoiner
//!   3. FeatureBuilder
//!   4. OutlierScorer   \ independent, same input
//!   5. RuleEngine      /
//!   6. AlertAggregator
//!
//! RULES:
//!   - A run is all-or-nothing. Any stage error discards the batch;
//!     no partial report is ever returned.
//!   - The engine holds configuration only. Encoders, scalers and the
//!     fitted model are rebuilt on every run.
//!   - The outlier seed is part of the configuration, never global state.

use crate::{
    aggregator::{AlertAggregator, AnomalyAlert, AnomalyReport},
    config::DetectionConfig,
    error::DetectResult,
    features::FeatureBuilder,
    joiner::DataJoiner,
    outlier::{IsolationForest, MultivariateOutlierDetector, OutlierScorer},
    rules::RuleEngine,
    types::{BudgetRecord, SpendRecord},
};

pub struct AnomalyEngine {
    config:   DetectionConfig,
    features: FeatureBuilder,
    scorer:   OutlierScorer,
    rules:    RuleEngine,
}

impl AnomalyEngine {
    /// Build an engine backed by the default isolation forest.
    pub fn new(config: DetectionConfig) -> DetectResult<Self> {
        let detector = Box::new(IsolationForest::new(config.outlier.clone()));
        Self::with_detector(config, detector)
    }

    /// Build an engine around any outlier detector.
    pub fn with_detector(
        config: DetectionConfig,
        detector: Box<dyn MultivariateOutlierDetector>,
    ) -> DetectResult<Self> {
        config.validate()?;
        Ok(Self {
            features: FeatureBuilder::new(config.features.clone()),
            scorer:   OutlierScorer::new(detector),
            rules:    RuleEngine::new(config.rules.clone()),
            config,
        })
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn detector_name(&self) -> &'static str {
        self.scorer.detector_name()
    }

    /// Run one detection pass over a materialized batch.
    pub fn run(&self, spend: &[SpendRecord], budget: &[BudgetRecord]) -> DetectResult<AnomalyReport> {
        for (row, record) in spend.iter().enumerate() {
            record.validate(row)?;
        }
        for (row, record) in budget.iter().enumerate() {
            record.validate(row)?;
        }

        let joined = DataJoiner::join(spend, budget)?;
        let records = self.features.build(joined.matched);

        let verdicts = self.scorer.score(&records)?;
        let flags = self.rules.evaluate(&records);

        let report = AlertAggregator::aggregate(records, verdicts, flags, spend.len(), joined.dropped);

        log::info!(
            "detect: {} spend rows, {} joined, {} dropped, {} alerts ({} outliers via {}), impact {:.2}",
            report.records_in,
            report.records_joined,
            report.dropped_count(),
            report.alerts.len(),
            report.rule_counts.outliers,
            self.scorer.detector_name(),
            report.total_budget_impact
        );
        Ok(report)
    }
}

/// Detect anomalies with the default configuration.
/// Returns (alerts, total_impact, recommended_actions).
pub fn detect_anomalies(
    spend_data: &[SpendRecord],
    budget_data: &[BudgetRecord],
) -> DetectResult<(Vec<AnomalyAlert>, f64, Vec<String>)> {
    let engine = AnomalyEngine::new(DetectionConfig::default())?;
    Ok(engine.run(spend_data, budget_data)?.into_parts())
}
