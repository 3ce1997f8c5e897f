use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("Invalid {table} data at row {row}: {reason}")]
    DataValidation {
        table:  &'static str,
        row:    usize,
        reason: String,
    },

    #[error("Outlier model fit failed: {reason}")]
    ModelFit { reason: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DetectError {
    pub fn validation(table: &'static str, row: usize, reason: impl Into<String>) -> Self {
        Self::DataValidation { table, row, reason: reason.into() }
    }

    pub fn model_fit(reason: impl Into<String>) -> Self {
        Self::ModelFit { reason: reason.into() }
    }
}

pub type DetectResult<T> = Result<T, DetectError>;
