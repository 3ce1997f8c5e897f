use crate::error::{DetectError, DetectResult};
use serde::{Deserialize, Serialize};

// ── Rule thresholds ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuleThresholds {
    /// Fraction of budget the variance must exceed to count as an overrun.
    pub overrun_pct: f64,
    /// Fraction of budget the variance must fall below (negated) for an underrun.
    pub underrun_pct: f64,
    /// Allowed deviation from the rolling baseline, as a fraction of it.
    pub seasonal_pct: f64,
    /// Spend above this multiple of the vendor's prior amount is a pattern change.
    pub vendor_spike_multiple: f64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            overrun_pct:           0.10,
            underrun_pct:          0.10,
            seasonal_pct:          0.20,
            vendor_spike_multiple: 2.0,
        }
    }
}

// ── Feature engineering ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureConfig {
    /// Centered window for the seasonal baseline. Must be odd.
    /// Boundary records average whatever part of the window exists.
    pub rolling_window: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self { rolling_window: 3 }
    }
}

// ── Outlier model ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutlierConfig {
    /// Expected share of outliers in a batch, in (0, 0.5].
    pub contamination: f64,
    pub seed:          u64,
    pub n_trees:       usize,
    /// Per-tree subsample size, capped at the batch size.
    pub max_samples:   usize,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            contamination: 0.05,
            seed:          42,
            n_trees:       100,
            max_samples:   256,
        }
    }
}

// ── Top level ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    pub rules:    RuleThresholds,
    pub features: FeatureConfig,
    pub outlier:  OutlierConfig,
}

impl DetectionConfig {
    /// Load from a JSON file. Missing fields fall back to defaults.
    /// In tests, use DetectionConfig::default().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: DetectionConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Same configuration with a different outlier seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.outlier.seed = seed;
        self
    }

    pub fn validate(&self) -> DetectResult<()> {
        let r = &self.rules;
        for (name, value) in [
            ("rules.overrun_pct", r.overrun_pct),
            ("rules.underrun_pct", r.underrun_pct),
            ("rules.seasonal_pct", r.seasonal_pct),
            ("rules.vendor_spike_multiple", r.vendor_spike_multiple),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(config_error(format!("{name} must be a non-negative number, got {value}")));
            }
        }

        let f = &self.features;
        if f.rolling_window == 0 || f.rolling_window % 2 == 0 {
            return Err(config_error(format!(
                "features.rolling_window must be odd and positive, got {}",
                f.rolling_window
            )));
        }
        Ok(())
    }
}

fn config_error(reason: String) -> DetectError {
    DetectError::Config { reason }
}
