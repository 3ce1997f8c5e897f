//! DataJoiner: reconciles spend rows against budget allocations.
//!
//! Inner join on (department, category, fiscal_year, fiscal_month).
//! Matched rows keep the spend table's order. Unmatched rows are dropped
//! and their transaction ids returned for audit; a missing budget is never
//! treated as a zero budget.

use crate::{
    error::{DetectError, DetectResult},
    types::{BudgetRecord, JoinKey, SpendRecord, TransactionId, BUDGET_TABLE},
};
use std::collections::HashMap;

/// A spend row paired with the allocation it is measured against.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedSpend {
    pub spend:  SpendRecord,
    pub budget: f64,
}

#[derive(Debug, Clone, Default)]
pub struct JoinOutcome {
    pub matched: Vec<MatchedSpend>,
    /// Spend rows with no budget for their key, in input order.
    pub dropped: Vec<TransactionId>,
}

impl JoinOutcome {
    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }
}

pub struct DataJoiner;

impl DataJoiner {
    pub fn join(spend: &[SpendRecord], budget: &[BudgetRecord]) -> DetectResult<JoinOutcome> {
        let index = Self::index_budget(budget)?;

        let mut outcome = JoinOutcome::default();
        for record in spend {
            match index.get(&record.join_key()) {
                Some(&amount) => outcome.matched.push(MatchedSpend {
                    spend:  record.clone(),
                    budget: amount,
                }),
                None => outcome.dropped.push(record.transaction_id.clone()),
            }
        }

        log::debug!(
            "join: {} spend rows, {} matched, {} dropped",
            spend.len(),
            outcome.matched.len(),
            outcome.dropped.len()
        );
        if !outcome.dropped.is_empty() {
            log::warn!(
                "join: {} spend rows have no budget allocation and were excluded",
                outcome.dropped.len()
            );
        }
        Ok(outcome)
    }

    /// One allocation per key. A repeated key has no single budget to
    /// compare against, so the budget table is rejected.
    fn index_budget(budget: &[BudgetRecord]) -> DetectResult<HashMap<JoinKey, f64>> {
        let mut index = HashMap::with_capacity(budget.len());
        for (row, record) in budget.iter().enumerate() {
            if index.insert(record.join_key(), record.budget).is_some() {
                return Err(DetectError::validation(
                    BUDGET_TABLE,
                    row,
                    format!(
                        "duplicate allocation for {}/{} in {}",
                        record.department,
                        record.category,
                        record.period()
                    ),
                ));
            }
        }
        Ok(index)
    }
}
