//! RuleEngine: deterministic budget, seasonal, vendor and contract rules.
//!
//! Each rule is evaluated independently for every record. Rules never see
//! the outlier label and never depend on record order except duplicate
//! detection, which looks at the whole batch.

use crate::{
    config::RuleThresholds,
    features::JoinedRecord,
    types::FiscalPeriod,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    BudgetOverrun,
    BudgetUnderrun,
    SeasonalAnomaly,
    VendorPatternChange,
    ContractViolation,
    Duplicate,
}

impl RuleKind {
    pub const ALL: [RuleKind; 6] = [
        Self::BudgetOverrun,
        Self::BudgetUnderrun,
        Self::SeasonalAnomaly,
        Self::VendorPatternChange,
        Self::ContractViolation,
        Self::Duplicate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::BudgetOverrun       => "budget_overrun",
            Self::BudgetUnderrun      => "budget_underrun",
            Self::SeasonalAnomaly     => "seasonal_anomaly",
            Self::VendorPatternChange => "vendor_pattern_change",
            Self::ContractViolation   => "contract_violation",
            Self::Duplicate           => "is_duplicate",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyFlagSet {
    pub budget_overrun:        bool,
    pub budget_underrun:       bool,
    pub seasonal_anomaly:      bool,
    pub vendor_pattern_change: bool,
    pub contract_violation:    bool,
    pub is_duplicate:          bool,
}

impl AnomalyFlagSet {
    pub fn get(&self, rule: RuleKind) -> bool {
        match rule {
            RuleKind::BudgetOverrun       => self.budget_overrun,
            RuleKind::BudgetUnderrun      => self.budget_underrun,
            RuleKind::SeasonalAnomaly     => self.seasonal_anomaly,
            RuleKind::VendorPatternChange => self.vendor_pattern_change,
            RuleKind::ContractViolation   => self.contract_violation,
            RuleKind::Duplicate           => self.is_duplicate,
        }
    }

    pub fn any(&self) -> bool {
        RuleKind::ALL.iter().any(|r| self.get(*r))
    }

    /// Rules that fired, in table order.
    pub fn fired(&self) -> Vec<RuleKind> {
        RuleKind::ALL.into_iter().filter(|r| self.get(*r)).collect()
    }
}

/// Records that agree on all four fields are the same payment twice.
#[derive(Debug, PartialEq, Eq, Hash)]
struct DuplicateKey<'a> {
    vendor:     &'a str,
    amount:     u64,
    period:     FiscalPeriod,
    department: &'a str,
}

impl<'a> DuplicateKey<'a> {
    fn of(record: &'a JoinedRecord) -> Self {
        // +0.0 folds -0.0 onto 0.0 so both hash alike.
        let amount = (record.actual() + 0.0).to_bits();
        Self {
            vendor: &record.spend.vendor,
            amount,
            period: record.period(),
            department: &record.spend.department,
        }
    }
}

pub struct RuleEngine {
    thresholds: RuleThresholds,
}

impl RuleEngine {
    pub fn new(thresholds: RuleThresholds) -> Self {
        Self { thresholds }
    }

    pub fn evaluate(&self, records: &[JoinedRecord]) -> Vec<AnomalyFlagSet> {
        let mut key_counts: HashMap<DuplicateKey<'_>, usize> = HashMap::new();
        for record in records {
            *key_counts.entry(DuplicateKey::of(record)).or_insert(0) += 1;
        }

        let flags: Vec<AnomalyFlagSet> = records
            .iter()
            .map(|record| AnomalyFlagSet {
                budget_overrun:        self.budget_overrun(record),
                budget_underrun:       self.budget_underrun(record),
                seasonal_anomaly:      self.seasonal_anomaly(record),
                vendor_pattern_change: self.vendor_pattern_change(record),
                contract_violation:    contract_violation(record),
                is_duplicate:          key_counts[&DuplicateKey::of(record)] > 1,
            })
            .collect();

        log::debug!(
            "rules: {} of {} records fired at least one rule",
            flags.iter().filter(|f| f.any()).count(),
            records.len()
        );
        flags
    }

    pub fn budget_overrun(&self, r: &JoinedRecord) -> bool {
        r.variance > self.thresholds.overrun_pct * r.budget
    }

    pub fn budget_underrun(&self, r: &JoinedRecord) -> bool {
        r.variance < -self.thresholds.underrun_pct * r.budget
    }

    pub fn seasonal_anomaly(&self, r: &JoinedRecord) -> bool {
        (r.actual() - r.rolling_mean).abs() > self.thresholds.seasonal_pct * r.rolling_mean
    }

    /// Needs a positive prior amount; a vendor's first record never fires.
    pub fn vendor_pattern_change(&self, r: &JoinedRecord) -> bool {
        match r.prev_vendor_spend {
            Some(prev) if prev > 0.0 => r.actual() > self.thresholds.vendor_spike_multiple * prev,
            _ => false,
        }
    }
}

/// No known limit means no violation.
pub fn contract_violation(r: &JoinedRecord) -> bool {
    r.spend.contract_limit.is_some_and(|limit| r.actual() > limit)
}
