//! AlertAggregator: fuses outlier labels and rule flags into one report.
//!
//! A record is an anomaly when the model calls it an outlier OR any rule
//! fires. The report keeps flagged records in spend-table order.
//!
//! total_budget_impact is the SIGNED sum of variance over flagged records.
//! Overruns and underruns offset each other; gross_exposure() gives the
//! unsigned figure when the caller needs it.

use crate::{
    features::JoinedRecord,
    outlier::{OutlierLabel, OutlierVerdict},
    rules::{AnomalyFlagSet, RuleKind},
    types::TransactionId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Guidance attached to every report, whichever rules fired.
pub const RECOMMENDED_ACTIONS: [&str; 4] = [
    "Review flagged transactions for approval errors or duplicate payments.",
    "Investigate vendors with sudden spend pattern changes.",
    "Check contracts for compliance on flagged items.",
    "Analyze seasonal anomalies for business justification.",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAlert {
    #[serde(flatten)]
    pub record:        JoinedRecord,
    pub outlier_label: OutlierLabel,
    pub outlier_score: f64,
    #[serde(flatten)]
    pub flags:         AnomalyFlagSet,
    pub is_anomaly:    bool,
}

impl AnomalyAlert {
    pub fn new(record: JoinedRecord, verdict: OutlierVerdict, flags: AnomalyFlagSet) -> Self {
        let is_anomaly = verdict.is_outlier() || flags.any();
        Self {
            record,
            outlier_label: verdict.label,
            outlier_score: verdict.score,
            flags,
            is_anomaly,
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.record.spend.transaction_id
    }

    /// Human-readable reasons this record was flagged.
    pub fn reasons(&self) -> Vec<&'static str> {
        let mut reasons: Vec<&'static str> = self.flags.fired().iter().map(RuleKind::name).collect();
        if self.outlier_label == OutlierLabel::Outlier {
            reasons.push("statistical_outlier");
        }
        reasons
    }
}

/// How often each signal fired across the flagged set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleCounts {
    pub by_rule:  BTreeMap<String, usize>,
    pub outliers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub alerts:              Vec<AnomalyAlert>,
    pub total_budget_impact: f64,
    pub recommended_actions: Vec<String>,
    pub records_in:          usize,
    pub records_joined:      usize,
    pub dropped_unmatched:   Vec<TransactionId>,
    pub rule_counts:         RuleCounts,
}

impl AnomalyReport {
    pub fn dropped_count(&self) -> usize {
        self.dropped_unmatched.len()
    }

    /// Sum of |variance| over flagged records.
    pub fn gross_exposure(&self) -> f64 {
        self.alerts.iter().map(|a| a.record.variance.abs()).sum()
    }

    /// Alerts by absolute variance, largest first. Ties keep report order.
    pub fn ranked(&self) -> Vec<&AnomalyAlert> {
        let mut ranked: Vec<&AnomalyAlert> = self.alerts.iter().collect();
        ranked.sort_by(|a, b| b.record.variance.abs().total_cmp(&a.record.variance.abs()));
        ranked
    }

    /// The (alerts, total_impact, recommended_actions) triple.
    pub fn into_parts(self) -> (Vec<AnomalyAlert>, f64, Vec<String>) {
        (self.alerts, self.total_budget_impact, self.recommended_actions)
    }
}

pub fn recommended_actions() -> Vec<String> {
    RECOMMENDED_ACTIONS.iter().map(|a| a.to_string()).collect()
}

pub struct AlertAggregator;

impl AlertAggregator {
    /// `records`, `verdicts` and `flags` are parallel, in spend order.
    pub fn aggregate(
        records: Vec<JoinedRecord>,
        verdicts: Vec<OutlierVerdict>,
        flags: Vec<AnomalyFlagSet>,
        records_in: usize,
        dropped_unmatched: Vec<TransactionId>,
    ) -> AnomalyReport {
        let records_joined = records.len();

        let alerts: Vec<AnomalyAlert> = records
            .into_iter()
            .zip(verdicts)
            .zip(flags)
            .map(|((record, verdict), flags)| AnomalyAlert::new(record, verdict, flags))
            .filter(|alert| alert.is_anomaly)
            .collect();

        let total_budget_impact: f64 = alerts.iter().map(|a| a.record.variance).sum();

        AnomalyReport {
            rule_counts: count_signals(&alerts),
            alerts,
            total_budget_impact,
            recommended_actions: recommended_actions(),
            records_in,
            records_joined,
            dropped_unmatched,
        }
    }
}

fn count_signals(alerts: &[AnomalyAlert]) -> RuleCounts {
    let mut counts = RuleCounts::default();
    for rule in RuleKind::ALL {
        let fired = alerts.iter().filter(|a| a.flags.get(rule)).count();
        counts.by_rule.insert(rule.name().to_string(), fired);
    }
    counts.outliers = alerts
        .iter()
        .filter(|a| a.outlier_label == OutlierLabel::Outlier)
        .count();
    counts
}
