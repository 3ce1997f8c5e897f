//! SQLite audit store for detection runs.
//!
//! RULE: Only store.rs talks to the database.
//! The detection core never persists anything; the runner records each
//! finished report here for downstream readers.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use spend_anomaly_core::{aggregator::AnomalyReport, outlier::OutlierLabel};

pub struct RunMeta<'a> {
    pub run_id:     &'a str,
    pub started_at: &'a str,
    pub seed:       u64,
    pub detector:   &'a str,
}

pub struct AuditStore {
    conn: Connection,
}

impl AuditStore {
    /// Open (or create) the audit database at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(include_str!("../migrations/001_audit.sql"))?;
        Ok(())
    }

    /// Record one run and its alerts atomically.
    pub fn record_run(&mut self, meta: &RunMeta<'_>, report: &AnomalyReport) -> Result<()> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO detection_run (run_id, started_at, seed, detector, records_in,
                 records_joined, dropped_unmatched, alert_count, total_budget_impact, gross_exposure)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                meta.run_id,
                meta.started_at,
                meta.seed as i64,
                meta.detector,
                report.records_in as i64,
                report.records_joined as i64,
                report.dropped_count() as i64,
                report.alerts.len() as i64,
                report.total_budget_impact,
                report.gross_exposure(),
            ],
        )?;

        for transaction_id in &report.dropped_unmatched {
            tx.execute(
                "INSERT INTO dropped_spend (run_id, transaction_id) VALUES (?1, ?2)",
                params![meta.run_id, transaction_id],
            )?;
        }

        for (position, alert) in report.alerts.iter().enumerate() {
            let spend = &alert.record.spend;
            let label = match alert.outlier_label {
                OutlierLabel::Outlier => "outlier",
                OutlierLabel::Inlier  => "inlier",
            };
            tx.execute(
                "INSERT INTO anomaly_alert (run_id, position, transaction_id, vendor, department,
                     category, fiscal_year, fiscal_month, actual_spend, budget, variance,
                     outlier_label, outlier_score, reasons, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    meta.run_id,
                    position as i64,
                    spend.transaction_id,
                    spend.vendor,
                    spend.department,
                    spend.category,
                    spend.fiscal_year,
                    spend.fiscal_month,
                    spend.actual_spend,
                    alert.record.budget,
                    alert.record.variance,
                    label,
                    alert.outlier_score,
                    alert.reasons().join(","),
                    serde_json::to_string(alert)?,
                ],
            )?;
        }

        tx.commit()?;
        log::debug!("store: recorded run {} with {} alerts", meta.run_id, report.alerts.len());
        Ok(())
    }

    pub fn alert_count(&self, run_id: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM anomaly_alert WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn dropped_transactions(&self, run_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT transaction_id FROM dropped_spend WHERE run_id = ?1 ORDER BY rowid ASC",
        )?;
        let ids = stmt
            .query_map(params![run_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn total_impact(&self, run_id: &str) -> Result<Option<f64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT total_budget_impact FROM detection_run WHERE run_id = ?1")?;
        let impact = stmt.query_row(params![run_id], |row| row.get(0)).optional()?;
        Ok(impact)
    }
}
