//! Input records and the primitive types shared across the pipeline.
//!
//! RULE: Records are immutable once ingested. Every later stage borrows
//! them; derived values live on JoinedRecord, never on the inputs.

use crate::error::{DetectError, DetectResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type VendorId = String;
pub type TransactionId = String;

pub const SPEND_TABLE: &str = "spend";
pub const BUDGET_TABLE: &str = "budget";

/// Fiscal (year, month). Orders chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FiscalPeriod {
    pub year:  i32,
    pub month: u32,
}

impl FiscalPeriod {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// A period is valid when its first day exists on the calendar.
    pub fn is_valid(&self) -> bool {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).is_some()
    }
}

impl fmt::Display for FiscalPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// Budget-matching key: (department, category, period).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinKey {
    pub department: String,
    pub category:   String,
    pub period:     FiscalPeriod,
}

/// One categorized vendor transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendRecord {
    pub transaction_id: TransactionId,
    pub vendor:         VendorId,
    pub department:     String,
    pub category:       String,
    pub fiscal_year:    i32,
    pub fiscal_month:   u32,
    pub actual_spend:   f64,
    #[serde(default)]
    pub contract_limit: Option<f64>,
}

impl SpendRecord {
    pub fn period(&self) -> FiscalPeriod {
        FiscalPeriod::new(self.fiscal_year, self.fiscal_month)
    }

    pub fn join_key(&self) -> JoinKey {
        JoinKey {
            department: self.department.clone(),
            category:   self.category.clone(),
            period:     self.period(),
        }
    }

    /// Reject rows that would poison every derived feature downstream.
    /// Negative amounts (credit memos, refunds) are legal.
    pub fn validate(&self, row: usize) -> DetectResult<()> {
        require_text(SPEND_TABLE, row, "transaction_id", &self.transaction_id)?;
        require_text(SPEND_TABLE, row, "vendor", &self.vendor)?;
        require_text(SPEND_TABLE, row, "department", &self.department)?;
        require_text(SPEND_TABLE, row, "category", &self.category)?;
        require_period(SPEND_TABLE, row, self.period())?;
        require_amount(SPEND_TABLE, row, "actual_spend", self.actual_spend)?;
        if let Some(limit) = self.contract_limit {
            require_amount(SPEND_TABLE, row, "contract_limit", limit)?;
        }
        Ok(())
    }
}

/// Planned allocation for one (department, category, period).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetRecord {
    pub department:   String,
    pub category:     String,
    pub fiscal_year:  i32,
    pub fiscal_month: u32,
    pub budget:       f64,
}

impl BudgetRecord {
    pub fn period(&self) -> FiscalPeriod {
        FiscalPeriod::new(self.fiscal_year, self.fiscal_month)
    }

    pub fn join_key(&self) -> JoinKey {
        JoinKey {
            department: self.department.clone(),
            category:   self.category.clone(),
            period:     self.period(),
        }
    }

    pub fn validate(&self, row: usize) -> DetectResult<()> {
        require_text(BUDGET_TABLE, row, "department", &self.department)?;
        require_text(BUDGET_TABLE, row, "category", &self.category)?;
        require_period(BUDGET_TABLE, row, self.period())?;
        require_amount(BUDGET_TABLE, row, "budget", self.budget)?;
        Ok(())
    }
}

fn require_text(table: &'static str, row: usize, column: &str, value: &str) -> DetectResult<()> {
    if value.trim().is_empty() {
        return Err(DetectError::validation(table, row, format!("{column} is empty")));
    }
    Ok(())
}

fn require_period(table: &'static str, row: usize, period: FiscalPeriod) -> DetectResult<()> {
    if !period.is_valid() {
        return Err(DetectError::validation(
            table,
            row,
            format!("fiscal period {}/{} is not a calendar month", period.year, period.month),
        ));
    }
    Ok(())
}

fn require_amount(table: &'static str, row: usize, column: &str, value: f64) -> DetectResult<()> {
    if !value.is_finite() {
        return Err(DetectError::validation(table, row, format!("{column} is not finite ({value})")));
    }
    Ok(())
}
