//! OutlierScorer: batch-relative multivariate outlier labels.
//!
//! Encoding:
//!   - numeric features standardized over the current batch
//!   - department, category, vendor one-hot encoded, with a trailing
//!     "unknown" bucket for values not seen at fit time
//!
//! Labels are relative to the batch they were fitted on. The same record
//! can be an outlier in one batch and an inlier in another; only a fixed
//! input with a fixed seed reproduces a label.
//!
//! RULE: Encoder, scaler and model are built fresh for every call.
//! No fitted state outlives a detection run.

use crate::{
    config::OutlierConfig,
    error::{DetectError, DetectResult},
    features::JoinedRecord,
    rng::ModelRng,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;
const UNKNOWN_BUCKET: &str = "__unknown__";

const NUMERIC_COLUMNS: [&str; 6] = [
    "actual_spend",
    "budget",
    "variance",
    "utilization",
    "month_sin",
    "month_cos",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierLabel {
    Outlier,
    Inlier,
}

/// Label plus the detector's raw score, kept so an alert can say how
/// unusual the record looked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlierVerdict {
    pub label: OutlierLabel,
    pub score: f64,
}

impl OutlierVerdict {
    pub fn is_outlier(&self) -> bool {
        self.label == OutlierLabel::Outlier
    }
}

// ── Feature matrix ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub rows:    Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Every row must be as wide as the header and fully finite.
    pub fn check(&self) -> DetectResult<()> {
        for (r, row) in self.rows.iter().enumerate() {
            if row.len() != self.n_cols() {
                return Err(DetectError::model_fit(format!(
                    "row {r} has {} features, expected {}",
                    row.len(),
                    self.n_cols()
                )));
            }
            if let Some(c) = row.iter().position(|v| !v.is_finite()) {
                return Err(DetectError::model_fit(format!(
                    "row {r} feature '{}' is not finite ({})",
                    self.columns[c], row[c]
                )));
            }
        }
        Ok(())
    }
}

// ── One-hot encoding ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct OneHotEncoder {
    categories: Vec<String>,
}

impl OneHotEncoder {
    /// Categories are kept in sorted order so the column layout does not
    /// depend on record order.
    pub fn fit<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let categories: BTreeSet<&str> = values.into_iter().collect();
        Self {
            categories: categories.into_iter().map(str::to_string).collect(),
        }
    }

    /// Known categories plus the unknown bucket.
    pub fn width(&self) -> usize {
        self.categories.len() + 1
    }

    pub fn column_names(&self, prefix: &str) -> Vec<String> {
        self.categories
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(UNKNOWN_BUCKET))
            .map(|c| format!("{prefix}={c}"))
            .collect()
    }

    pub fn transform(&self, value: &str) -> Vec<f64> {
        let mut out = vec![0.0; self.width()];
        let slot = self
            .categories
            .binary_search_by(|c| c.as_str().cmp(value))
            .unwrap_or(self.categories.len());
        out[slot] = 1.0;
        out
    }
}

// ── Standardization ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    means: Vec<f64>,
    stds:  Vec<f64>,
}

impl StandardScaler {
    /// Population mean and standard deviation per column.
    pub fn fit(rows: &[Vec<f64>], width: usize) -> Self {
        let n = rows.len().max(1) as f64;
        let mut means = vec![0.0; width];
        for row in rows {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v;
            }
        }
        means.iter_mut().for_each(|m| *m /= n);

        let mut stds = vec![0.0; width];
        for row in rows {
            for ((s, v), m) in stds.iter_mut().zip(row).zip(&means) {
                *s += (v - m).powi(2);
            }
        }
        stds.iter_mut().for_each(|s| *s = (*s / n).sqrt());

        Self { means, stds }
    }

    /// A constant column carries no information and maps to 0.
    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(v, (m, s))| if *s > 0.0 { (v - m) / s } else { 0.0 })
            .collect()
    }

    pub fn constant_columns(&self) -> usize {
        self.stds.iter().filter(|s| **s == 0.0).count()
    }
}

/// Build the model input for a batch of joined records.
pub fn encode_features(records: &[JoinedRecord]) -> FeatureMatrix {
    let numeric: Vec<Vec<f64>> = records
        .iter()
        .map(|r| {
            vec![
                r.actual(),
                r.budget,
                r.variance,
                r.utilization,
                r.month_sin,
                r.month_cos,
            ]
        })
        .collect();
    let scaler = StandardScaler::fit(&numeric, NUMERIC_COLUMNS.len());
    if scaler.constant_columns() > 0 {
        log::debug!(
            "outlier: {} numeric features are constant across the batch",
            scaler.constant_columns()
        );
    }

    let departments = OneHotEncoder::fit(records.iter().map(|r| r.spend.department.as_str()));
    let categories = OneHotEncoder::fit(records.iter().map(|r| r.spend.category.as_str()));
    let vendors = OneHotEncoder::fit(records.iter().map(|r| r.spend.vendor.as_str()));

    let mut columns: Vec<String> = NUMERIC_COLUMNS.iter().map(|c| c.to_string()).collect();
    columns.extend(departments.column_names("department"));
    columns.extend(categories.column_names("category"));
    columns.extend(vendors.column_names("vendor"));

    let rows = records
        .iter()
        .zip(&numeric)
        .map(|(r, num)| {
            let mut row = scaler.transform(num);
            row.extend(departments.transform(&r.spend.department));
            row.extend(categories.transform(&r.spend.category));
            row.extend(vendors.transform(&r.spend.vendor));
            row
        })
        .collect();

    FeatureMatrix { columns, rows }
}

// ── Detector capability ───────────────────────────────────────────

/// Any unsupervised model that can label a batch in one shot.
pub trait MultivariateOutlierDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fit on `features` and label every row of it, in row order.
    fn fit_and_label(&self, features: &FeatureMatrix) -> DetectResult<Vec<OutlierVerdict>>;
}

// ── Isolation forest ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct IsolationForest {
    config: OutlierConfig,
}

enum IsolationNode {
    Leaf {
        size: usize,
    },
    Split {
        feature:   usize,
        threshold: f64,
        left:      Box<IsolationNode>,
        right:     Box<IsolationNode>,
    },
}

impl IsolationForest {
    pub fn new(config: OutlierConfig) -> Self {
        Self { config }
    }

    fn check_params(&self) -> DetectResult<()> {
        let c = &self.config;
        if !(c.contamination > 0.0 && c.contamination <= 0.5) {
            return Err(DetectError::model_fit(format!(
                "contamination must be in (0, 0.5], got {}",
                c.contamination
            )));
        }
        if c.n_trees == 0 {
            return Err(DetectError::model_fit("n_trees must be positive"));
        }
        if c.max_samples == 0 {
            return Err(DetectError::model_fit("max_samples must be positive"));
        }
        Ok(())
    }

    /// Anomaly score per row in [0, 1]; higher means easier to isolate.
    pub fn score(&self, features: &FeatureMatrix) -> DetectResult<Vec<f64>> {
        self.check_params()?;
        features.check()?;

        let n = features.n_rows();
        if n == 0 {
            return Ok(Vec::new());
        }
        let psi = self.config.max_samples.min(n);
        let height_limit = (psi as f64).log2().ceil() as usize;

        let mut path_sums = vec![0.0; n];
        for tree_index in 0..self.config.n_trees {
            let mut rng = ModelRng::new(self.config.seed, tree_index as u64);
            let sample = rng.sample_indices(n, psi);
            let tree = build_tree(features, sample, 0, height_limit, &mut rng);
            for (row, sum) in features.rows.iter().zip(path_sums.iter_mut()) {
                *sum += path_length(&tree, row, 0);
            }
        }

        let norm = average_path_length(psi);
        let scores = path_sums
            .into_iter()
            .map(|sum| {
                if norm > 0.0 {
                    let mean_depth = sum / self.config.n_trees as f64;
                    2f64.powf(-mean_depth / norm)
                } else {
                    0.5
                }
            })
            .collect();
        Ok(scores)
    }
}

impl MultivariateOutlierDetector for IsolationForest {
    fn name(&self) -> &'static str {
        "isolation_forest"
    }

    fn fit_and_label(&self, features: &FeatureMatrix) -> DetectResult<Vec<OutlierVerdict>> {
        let scores = self.score(features)?;
        if scores.is_empty() {
            return Ok(Vec::new());
        }

        // Strictly above the cut: a batch of identical scores has no outliers.
        let cut = percentile(&scores, 100.0 * (1.0 - self.config.contamination));
        Ok(scores
            .into_iter()
            .map(|score| OutlierVerdict {
                label: if score > cut { OutlierLabel::Outlier } else { OutlierLabel::Inlier },
                score,
            })
            .collect())
    }
}

fn build_tree(
    features: &FeatureMatrix,
    members: Vec<usize>,
    depth: usize,
    height_limit: usize,
    rng: &mut ModelRng,
) -> IsolationNode {
    if depth >= height_limit || members.len() <= 1 {
        return IsolationNode::Leaf { size: members.len() };
    }

    // Only features that still vary inside this node can split it.
    let splittable: Vec<(usize, f64, f64)> = (0..features.n_cols())
        .filter_map(|f| {
            let (lo, hi) = members.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                let v = features.rows[i][f];
                (lo.min(v), hi.max(v))
            });
            (lo < hi).then_some((f, lo, hi))
        })
        .collect();
    if splittable.is_empty() {
        return IsolationNode::Leaf { size: members.len() };
    }

    let (feature, lo, hi) = splittable[rng.next_index(splittable.len())];
    let mut threshold = rng.uniform(lo, hi);
    if threshold <= lo {
        threshold = lo + (hi - lo) / 2.0;
    }

    let (left, right): (Vec<usize>, Vec<usize>) = members
        .into_iter()
        .partition(|&i| features.rows[i][feature] < threshold);

    IsolationNode::Split {
        feature,
        threshold,
        left: Box::new(build_tree(features, left, depth + 1, height_limit, rng)),
        right: Box::new(build_tree(features, right, depth + 1, height_limit, rng)),
    }
}

fn path_length(node: &IsolationNode, row: &[f64], depth: usize) -> f64 {
    match node {
        IsolationNode::Leaf { size } => depth as f64 + average_path_length(*size),
        IsolationNode::Split { feature, threshold, left, right } => {
            let next = if row[*feature] < *threshold { left } else { right };
            path_length(next, row, depth + 1)
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated percentile, `q` in [0, 100].
fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (q / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

// ── Scorer ────────────────────────────────────────────────────────

pub struct OutlierScorer {
    detector: Box<dyn MultivariateOutlierDetector>,
}

impl OutlierScorer {
    pub fn new(detector: Box<dyn MultivariateOutlierDetector>) -> Self {
        Self { detector }
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    pub fn score(&self, records: &[JoinedRecord]) -> DetectResult<Vec<OutlierVerdict>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let matrix = encode_features(records);
        let verdicts = self.detector.fit_and_label(&matrix)?;
        if verdicts.len() != records.len() {
            return Err(DetectError::model_fit(format!(
                "{} returned {} labels for {} records",
                self.detector.name(),
                verdicts.len(),
                records.len()
            )));
        }
        log::debug!(
            "outlier: {} labelled {} of {} records as outliers ({} features)",
            self.detector.name(),
            verdicts.iter().filter(|v| v.is_outlier()).count(),
            records.len(),
            matrix.n_cols()
        );
        Ok(verdicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_path_length_small_cases() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        let c256 = average_path_length(256);
        assert!((c256 - 10.2448).abs() < 1e-3, "c(256) = {c256}");
    }

    #[test]
    fn percentile_interpolates_linearly() {
        let values = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 100.0), 5.0);
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert!((percentile(&values, 95.0) - 4.8).abs() < 1e-12);
    }

    #[test]
    fn scaler_maps_constant_column_to_zero() {
        let rows = vec![vec![1.0, 7.0], vec![3.0, 7.0]];
        let scaler = StandardScaler::fit(&rows, 2);
        assert_eq!(scaler.transform(&rows[0]), vec![-1.0, 0.0]);
        assert_eq!(scaler.transform(&rows[1]), vec![1.0, 0.0]);
        assert_eq!(scaler.constant_columns(), 1);
    }

    #[test]
    fn single_point_tree_is_a_leaf() {
        let features = FeatureMatrix {
            columns: vec!["x".into()],
            rows:    vec![vec![1.0]],
        };
        let mut rng = ModelRng::new(1, 0);
        let tree = build_tree(&features, vec![0], 0, 4, &mut rng);
        assert_eq!(path_length(&tree, &[1.0], 0), 0.0);
    }
}
