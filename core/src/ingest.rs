//! Table ingest: JSON row arrays into typed records.
//!
//! Upstream collaborators (spend classification, budget planning) hand
//! over tables as JSON arrays of row objects keyed by column name.
//! A missing required column or a wrong value type fails the whole table;
//! nothing is repaired or defaulted except `contract_limit`.

use crate::{
    error::{DetectError, DetectResult},
    types::{BudgetRecord, SpendRecord, BUDGET_TABLE, SPEND_TABLE},
};
use serde::de::DeserializeOwned;

pub fn spend_from_json(json: &str) -> DetectResult<Vec<SpendRecord>> {
    parse_table(SPEND_TABLE, json)
}

pub fn budget_from_json(json: &str) -> DetectResult<Vec<BudgetRecord>> {
    parse_table(BUDGET_TABLE, json)
}

pub fn load_spend(path: &str) -> DetectResult<Vec<SpendRecord>> {
    let content = std::fs::read_to_string(path)?;
    spend_from_json(&content)
}

pub fn load_budget(path: &str) -> DetectResult<Vec<BudgetRecord>> {
    let content = std::fs::read_to_string(path)?;
    budget_from_json(&content)
}

/// Parse row by row so the error can name the offending row.
fn parse_table<T: DeserializeOwned>(table: &'static str, json: &str) -> DetectResult<Vec<T>> {
    let rows: Vec<serde_json::Value> = serde_json::from_str(json)
        .map_err(|e| DetectError::validation(table, 0, format!("not a JSON array of rows: {e}")))?;

    let records = rows
        .into_iter()
        .enumerate()
        .map(|(row, value)| {
            serde_json::from_value(value).map_err(|e| DetectError::validation(table, row, e.to_string()))
        })
        .collect::<DetectResult<Vec<T>>>()?;

    log::debug!("ingest: parsed {} {table} rows", records.len());
    Ok(records)
}
