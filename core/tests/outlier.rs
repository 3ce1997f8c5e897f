//! Integration tests for feature encoding and the isolation forest.

use spend_anomaly_core::{
    config::{DetectionConfig, OutlierConfig},
    engine::AnomalyEngine,
    error::{DetectError, DetectResult},
    outlier::{
        FeatureMatrix, IsolationForest, MultivariateOutlierDetector, OneHotEncoder, OutlierLabel,
        OutlierVerdict,
    },
    types::{BudgetRecord, SpendRecord},
};

fn cluster_with_one_far_point() -> FeatureMatrix {
    let mut rows: Vec<Vec<f64>> = (0..60)
        .map(|i| {
            let x = (i % 10) as f64 * 0.1;
            let y = (i / 10) as f64 * 0.1;
            vec![x, y]
        })
        .collect();
    rows.push(vec![25.0, -30.0]);
    FeatureMatrix {
        columns: vec!["x".into(), "y".into()],
        rows,
    }
}

fn label_count(verdicts: &[OutlierVerdict], label: OutlierLabel) -> usize {
    verdicts.iter().filter(|v| v.label == label).count()
}

// ─────────────────────────────────────────────────────────────────────────────
// Isolation forest
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn far_point_is_the_outlier() {
    let features = cluster_with_one_far_point();
    let forest = IsolationForest::new(OutlierConfig::default());
    let verdicts = forest.fit_and_label(&features).unwrap();

    assert_eq!(verdicts.len(), features.n_rows());
    let far = verdicts.last().unwrap();
    assert_eq!(far.label, OutlierLabel::Outlier);

    let max_other = verdicts[..verdicts.len() - 1]
        .iter()
        .map(|v| v.score)
        .fold(f64::NEG_INFINITY, f64::max);
    assert!(far.score > max_other, "far point {} vs cluster max {max_other}", far.score);
}

#[test]
fn contamination_bounds_the_outlier_count() {
    let features = cluster_with_one_far_point();
    let forest = IsolationForest::new(OutlierConfig::default());
    let verdicts = forest.fit_and_label(&features).unwrap();

    // 61 rows at 5%: at most the top 3 scores clear the cut.
    let outliers = label_count(&verdicts, OutlierLabel::Outlier);
    assert!((1..=3).contains(&outliers), "got {outliers} outliers");
}

#[test]
fn scores_lie_in_unit_interval() {
    let features = cluster_with_one_far_point();
    let scores = IsolationForest::new(OutlierConfig::default()).score(&features).unwrap();
    assert!(scores.iter().all(|s| *s > 0.0 && *s < 1.0));
}

#[test]
fn identical_rows_are_all_inliers() {
    let features = FeatureMatrix {
        columns: vec!["x".into()],
        rows:    vec![vec![3.0]; 40],
    };
    let verdicts = IsolationForest::new(OutlierConfig::default())
        .fit_and_label(&features)
        .unwrap();
    assert_eq!(label_count(&verdicts, OutlierLabel::Inlier), 40);
}

#[test]
fn same_seed_reproduces_scores() {
    let features = cluster_with_one_far_point();
    let a = IsolationForest::new(OutlierConfig::default()).score(&features).unwrap();
    let b = IsolationForest::new(OutlierConfig::default()).score(&features).unwrap();
    let bits_a: Vec<u64> = a.iter().map(|s| s.to_bits()).collect();
    let bits_b: Vec<u64> = b.iter().map(|s| s.to_bits()).collect();
    assert_eq!(bits_a, bits_b);
}

#[test]
fn different_seeds_change_scores() {
    let features = cluster_with_one_far_point();
    let a = IsolationForest::new(OutlierConfig { seed: 1, ..OutlierConfig::default() })
        .score(&features)
        .unwrap();
    let b = IsolationForest::new(OutlierConfig { seed: 2, ..OutlierConfig::default() })
        .score(&features)
        .unwrap();
    assert_ne!(a, b, "Different seeds produced identical scores; seed is not being used");
}

#[test]
fn empty_matrix_yields_no_labels() {
    let verdicts = IsolationForest::new(OutlierConfig::default())
        .fit_and_label(&FeatureMatrix::default())
        .unwrap();
    assert!(verdicts.is_empty());
}

#[test]
fn non_finite_feature_is_a_fit_error() {
    let features = FeatureMatrix {
        columns: vec!["x".into()],
        rows:    vec![vec![1.0], vec![f64::INFINITY]],
    };
    let err = IsolationForest::new(OutlierConfig::default())
        .fit_and_label(&features)
        .unwrap_err();
    assert!(matches!(err, DetectError::ModelFit { .. }), "unexpected error: {err}");
}

#[test]
fn ragged_matrix_is_a_fit_error() {
    let features = FeatureMatrix {
        columns: vec!["x".into(), "y".into()],
        rows:    vec![vec![1.0, 2.0], vec![3.0]],
    };
    assert!(matches!(
        IsolationForest::new(OutlierConfig::default()).fit_and_label(&features),
        Err(DetectError::ModelFit { .. })
    ));
}

#[test]
fn invalid_contamination_is_a_fit_error() {
    let features = cluster_with_one_far_point();
    for contamination in [0.0, 0.75, f64::NAN] {
        let forest = IsolationForest::new(OutlierConfig { contamination, ..OutlierConfig::default() });
        assert!(
            matches!(forest.fit_and_label(&features), Err(DetectError::ModelFit { .. })),
            "contamination {contamination} should be rejected"
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// One-hot encoding
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn unseen_category_routes_to_unknown_bucket() {
    let encoder = OneHotEncoder::fit(["Sales", "Engineering", "Sales"]);
    assert_eq!(encoder.width(), 3);
    assert_eq!(
        encoder.column_names("department"),
        vec!["department=Engineering", "department=Sales", "department=__unknown__"]
    );
    assert_eq!(encoder.transform("Engineering"), vec![1.0, 0.0, 0.0]);
    assert_eq!(encoder.transform("Sales"), vec![0.0, 1.0, 0.0]);
    assert_eq!(encoder.transform("Facilities"), vec![0.0, 0.0, 1.0]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Detector seam
// ─────────────────────────────────────────────────────────────────────────────

struct EverythingIsOdd;

impl MultivariateOutlierDetector for EverythingIsOdd {
    fn name(&self) -> &'static str {
        "everything_is_odd"
    }

    fn fit_and_label(&self, features: &FeatureMatrix) -> DetectResult<Vec<OutlierVerdict>> {
        Ok(vec![OutlierVerdict { label: OutlierLabel::Outlier, score: 1.0 }; features.n_rows()])
    }
}

struct DropsARow;

impl MultivariateOutlierDetector for DropsARow {
    fn name(&self) -> &'static str {
        "drops_a_row"
    }

    fn fit_and_label(&self, features: &FeatureMatrix) -> DetectResult<Vec<OutlierVerdict>> {
        Ok(vec![OutlierVerdict { label: OutlierLabel::Inlier, score: 0.0 }; features.n_rows() - 1])
    }
}

fn quiet_batch() -> (Vec<SpendRecord>, Vec<BudgetRecord>) {
    let spend = (1..=3)
        .map(|m| SpendRecord {
            transaction_id: format!("TX{m}"),
            vendor:         format!("V{m}"),
            department:     format!("Dept{m}"),
            category:       "IT".into(),
            fiscal_year:    2024,
            fiscal_month:   m,
            actual_spend:   1_000.0,
            contract_limit: None,
        })
        .collect();
    let budget = (1..=3)
        .map(|m| BudgetRecord {
            department:   format!("Dept{m}"),
            category:     "IT".into(),
            fiscal_year:  2024,
            fiscal_month: m,
            budget:       1_000.0,
        })
        .collect();
    (spend, budget)
}

#[test]
fn outlier_label_alone_raises_an_alert() {
    let (spend, budget) = quiet_batch();
    let engine =
        AnomalyEngine::with_detector(DetectionConfig::default(), Box::new(EverythingIsOdd)).unwrap();
    let report = engine.run(&spend, &budget).unwrap();

    assert_eq!(report.alerts.len(), 3);
    for alert in &report.alerts {
        assert!(!alert.flags.any());
        assert!(alert.is_anomaly);
        assert_eq!(alert.reasons(), vec!["statistical_outlier"]);
    }
    assert_eq!(report.rule_counts.outliers, 3);
}

#[test]
fn detector_label_count_mismatch_fails_the_run() {
    let (spend, budget) = quiet_batch();
    let engine = AnomalyEngine::with_detector(DetectionConfig::default(), Box::new(DropsARow)).unwrap();
    let err = engine.run(&spend, &budget).unwrap_err();
    assert!(matches!(err, DetectError::ModelFit { .. }));
}

#[test]
fn fit_failure_returns_no_partial_report() {
    let (spend, budget) = quiet_batch();
    let mut config = DetectionConfig::default();
    config.outlier.n_trees = 0;
    let engine = AnomalyEngine::new(config).unwrap();
    assert!(matches!(engine.run(&spend, &budget), Err(DetectError::ModelFit { .. })));
}
