//! Integration tests for derived features: rolling baseline and vendor lag.

use spend_anomaly_core::{
    config::{FeatureConfig, RuleThresholds},
    features::{FeatureBuilder, JoinedRecord},
    joiner::MatchedSpend,
    rules::RuleEngine,
    types::SpendRecord,
};

fn matched(id: &str, vendor: &str, dept: &str, year: i32, month: u32, amount: f64) -> MatchedSpend {
    MatchedSpend {
        spend: SpendRecord {
            transaction_id: id.into(),
            vendor:         vendor.into(),
            department:     dept.into(),
            category:       "IT".into(),
            fiscal_year:    year,
            fiscal_month:   month,
            actual_spend:   amount,
            contract_limit: None,
        },
        budget: amount,
    }
}

fn build(rows: Vec<MatchedSpend>) -> Vec<JoinedRecord> {
    FeatureBuilder::new(FeatureConfig::default()).build(rows)
}

fn by_id<'a>(records: &'a [JoinedRecord], id: &str) -> &'a JoinedRecord {
    records
        .iter()
        .find(|r| r.spend.transaction_id == id)
        .unwrap_or_else(|| panic!("record {id} missing"))
}

#[test]
fn singleton_group_baseline_equals_its_own_spend() {
    let records = build(vec![
        matched("A", "V1", "Engineering", 2024, 3, 12_345.0),
        matched("B", "V2", "Legal", 2024, 3, 77.0),
    ]);
    assert_eq!(by_id(&records, "A").rolling_mean, 12_345.0);
    assert_eq!(by_id(&records, "B").rolling_mean, 77.0);
}

#[test]
fn rolling_baseline_is_centered_over_sorted_periods() {
    // Deliberately out of period order.
    let records = build(vec![
        matched("M3", "V1", "Engineering", 2024, 3, 300.0),
        matched("M1", "V1", "Engineering", 2024, 1, 100.0),
        matched("M4", "V1", "Engineering", 2024, 4, 1_000.0),
        matched("M2", "V1", "Engineering", 2024, 2, 200.0),
    ]);

    assert_eq!(by_id(&records, "M1").rolling_mean, 150.0);
    assert_eq!(by_id(&records, "M2").rolling_mean, 200.0);
    assert_eq!(by_id(&records, "M3").rolling_mean, 500.0);
    assert_eq!(by_id(&records, "M4").rolling_mean, 650.0);

    // Output order is still input order.
    let ids: Vec<&str> = records.iter().map(|r| r.spend.transaction_id.as_str()).collect();
    assert_eq!(ids, vec!["M3", "M1", "M4", "M2"]);
}

#[test]
fn groups_do_not_share_a_baseline() {
    let records = build(vec![
        matched("E1", "V1", "Engineering", 2024, 1, 100.0),
        matched("L1", "V1", "Legal", 2024, 2, 10_000.0),
        matched("E2", "V1", "Engineering", 2024, 3, 300.0),
    ]);
    assert_eq!(by_id(&records, "E1").rolling_mean, 200.0);
    assert_eq!(by_id(&records, "E2").rolling_mean, 200.0);
    assert_eq!(by_id(&records, "L1").rolling_mean, 10_000.0);
}

#[test]
fn vendor_lag_follows_fiscal_order_across_years() {
    let records = build(vec![
        matched("JAN24", "V9", "Ops", 2024, 1, 40.0),
        matched("DEC23", "V9", "Ops", 2023, 12, 30.0),
        matched("NOV23", "V9", "Finance", 2023, 11, 20.0),
        matched("OTHER", "V1", "Ops", 2023, 12, 5.0),
    ]);

    assert_eq!(by_id(&records, "NOV23").prev_vendor_spend, None);
    assert_eq!(by_id(&records, "DEC23").prev_vendor_spend, Some(20.0));
    assert_eq!(by_id(&records, "JAN24").prev_vendor_spend, Some(30.0));
    assert_eq!(by_id(&records, "OTHER").prev_vendor_spend, None);
}

#[test]
fn same_period_ties_use_input_position() {
    let records = build(vec![
        matched("FIRST", "V5", "Ops", 2024, 1, 10.0),
        matched("SECOND", "V5", "Ops", 2024, 1, 40.0),
    ]);
    assert_eq!(by_id(&records, "FIRST").prev_vendor_spend, None);
    assert_eq!(by_id(&records, "SECOND").prev_vendor_spend, Some(10.0));

    let rules = RuleEngine::new(RuleThresholds::default());
    assert!(rules.vendor_pattern_change(by_id(&records, "SECOND")));
    assert!(!rules.vendor_pattern_change(by_id(&records, "FIRST")));
}

#[test]
fn vendor_spike_needs_more_than_double() {
    let records = build(vec![
        matched("M1", "V1", "Ops", 2024, 1, 100.0),
        matched("M2", "V1", "Ops", 2024, 2, 200.0),
        matched("M3", "V1", "Ops", 2024, 3, 401.0),
    ]);
    let rules = RuleEngine::new(RuleThresholds::default());
    assert!(!rules.vendor_pattern_change(by_id(&records, "M1")));
    assert!(!rules.vendor_pattern_change(by_id(&records, "M2")));
    assert!(rules.vendor_pattern_change(by_id(&records, "M3")));
}

#[test]
fn non_positive_prior_spend_never_signals_a_spike() {
    let records = build(vec![
        matched("CREDIT", "V3", "Ops", 2024, 1, -50.0),
        matched("NEXT", "V3", "Ops", 2024, 2, 5_000.0),
    ]);
    let rules = RuleEngine::new(RuleThresholds::default());
    assert_eq!(by_id(&records, "NEXT").prev_vendor_spend, Some(-50.0));
    assert!(!rules.vendor_pattern_change(by_id(&records, "NEXT")));
}

#[test]
fn seasonal_rule_compares_against_baseline() {
    let records = build(vec![
        matched("M1", "V1", "Ops", 2024, 1, 100.0),
        matched("M2", "V2", "Ops", 2024, 2, 100.0),
        matched("M3", "V3", "Ops", 2024, 3, 400.0),
    ]);
    let rules = RuleEngine::new(RuleThresholds::default());
    // M1 baseline 100, M2 baseline 200, M3 baseline 250.
    assert!(!rules.seasonal_anomaly(by_id(&records, "M1")));
    assert!(rules.seasonal_anomaly(by_id(&records, "M2")));
    assert!(rules.seasonal_anomaly(by_id(&records, "M3")));
}

#[test]
fn derived_budget_features() {
    let mut rows = vec![matched("A", "V1", "Ops", 2024, 6, 1_500.0)];
    rows[0].budget = 1_000.0;
    let records = build(rows);
    let r = &records[0];
    assert_eq!(r.variance, 500.0);
    assert_eq!(r.utilization, 1.5);
    assert!(r.month_sin.abs() < 1e-12, "June is half way round the cycle");
    assert!((r.month_cos + 1.0).abs() < 1e-12);
}
