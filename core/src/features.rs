//! FeatureBuilder: derived budget and time-series features.
//!
//! ORDER (fixed):
//!   1. variance
//!   2. utilization
//!   3. month_sin / month_cos
//!   4. rolling_mean      (per department+category group)
//!   5. prev_vendor_spend (per vendor)
//!
//! RULE: Steps 4 and 5 run over an explicit canonical order: fiscal
//! period ascending, ties broken by position in the spend table.
//! Arrival order of the batch never decides which record is "previous".

use crate::{
    config::FeatureConfig,
    joiner::MatchedSpend,
    types::{FiscalPeriod, SpendRecord},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedRecord {
    #[serde(flatten)]
    pub spend:             SpendRecord,
    pub budget:            f64,
    pub variance:          f64,
    pub utilization:       f64,
    pub month_sin:         f64,
    pub month_cos:         f64,
    pub rolling_mean:      f64,
    pub prev_vendor_spend: Option<f64>,
}

impl JoinedRecord {
    pub fn period(&self) -> FiscalPeriod {
        self.spend.period()
    }

    pub fn actual(&self) -> f64 {
        self.spend.actual_spend
    }
}

pub struct FeatureBuilder {
    config: FeatureConfig,
}

impl FeatureBuilder {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, matched: Vec<MatchedSpend>) -> Vec<JoinedRecord> {
        let rolling = self.rolling_means(&matched);
        let lags = vendor_lags(&matched);

        let records: Vec<JoinedRecord> = matched
            .into_iter()
            .zip(rolling)
            .zip(lags)
            .map(|((m, rolling_mean), prev_vendor_spend)| {
                let actual = m.spend.actual_spend;
                let variance = actual - m.budget;
                let utilization = actual / denominator(m.budget);
                let (month_sin, month_cos) = month_cycle(m.spend.fiscal_month);
                JoinedRecord {
                    spend: m.spend,
                    budget: m.budget,
                    variance,
                    utilization,
                    month_sin,
                    month_cos,
                    rolling_mean,
                    prev_vendor_spend,
                }
            })
            .collect();

        log::debug!("features: built {} joined records", records.len());
        records
    }

    /// Centered moving average of actual spend inside each
    /// (department, category) group, partial windows at the edges.
    fn rolling_means(&self, matched: &[MatchedSpend]) -> Vec<f64> {
        let half = self.config.rolling_window / 2;
        let mut out = vec![0.0; matched.len()];

        let groups = canonical_groups(matched, |s| (s.department.clone(), s.category.clone()));
        for members in groups.values() {
            for (pos, &idx) in members.iter().enumerate() {
                let lo = pos.saturating_sub(half);
                let hi = (pos + half).min(members.len() - 1);
                let window = &members[lo..=hi];
                let sum: f64 = window.iter().map(|&i| matched[i].spend.actual_spend).sum();
                out[idx] = sum / window.len() as f64;
            }
        }
        out
    }
}

/// Zero budgets divide by one. The resulting utilization equals the raw
/// spend, a known distortion that is reported rather than corrected.
fn denominator(budget: f64) -> f64 {
    if budget == 0.0 { 1.0 } else { budget }
}

/// Position of the month on the unit circle.
pub fn month_cycle(month: u32) -> (f64, f64) {
    let angle = 2.0 * PI * month as f64 / 12.0;
    (angle.sin(), angle.cos())
}

/// Actual spend of the immediately preceding record for the same vendor.
fn vendor_lags(matched: &[MatchedSpend]) -> Vec<Option<f64>> {
    let mut out = vec![None; matched.len()];
    let groups = canonical_groups(matched, |s| s.vendor.clone());
    for members in groups.values() {
        for pair in members.windows(2) {
            out[pair[1]] = Some(matched[pair[0]].spend.actual_spend);
        }
    }
    out
}

/// Group record indices by `key`, each group sorted by
/// (fiscal period, input position).
fn canonical_groups<K, F>(matched: &[MatchedSpend], key: F) -> HashMap<K, Vec<usize>>
where
    K: std::hash::Hash + Eq,
    F: Fn(&SpendRecord) -> K,
{
    let mut groups: HashMap<K, Vec<usize>> = HashMap::new();
    for (idx, m) in matched.iter().enumerate() {
        groups.entry(key(&m.spend)).or_default().push(idx);
    }
    for members in groups.values_mut() {
        members.sort_by_key(|&idx| (matched[idx].spend.period(), idx));
    }
    groups
}
