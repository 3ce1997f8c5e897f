//! anomaly-runner: headless batch runner for the spend anomaly engine.
//!
//! Usage:
//!   anomaly-runner --spend spend.json --budget budget.json
//!   anomaly-runner --spend spend.json --budget budget.json --seed 7 --db audit.db
//!   anomaly-runner --spend spend.json --budget budget.json --config detect.json --json

mod store;

use anyhow::Result;
use spend_anomaly_core::{
    aggregator::AnomalyReport,
    config::DetectionConfig,
    engine::AnomalyEngine,
    ingest,
};
use std::env;
use store::{AuditStore, RunMeta};

const TOP_ALERTS: usize = 10;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let json_mode = args.iter().any(|a| a == "--json");
    let spend_path = required_arg(&args, "--spend")?;
    let budget_path = required_arg(&args, "--budget")?;
    let db = string_arg(&args, "--db");

    let mut config = match string_arg(&args, "--config") {
        Some(path) => DetectionConfig::load(path)?,
        None => DetectionConfig::default(),
    };
    if let Some(seed) = parse_arg::<u64>(&args, "--seed") {
        config = config.with_seed(seed);
    }

    if !json_mode {
        println!("Spend anomaly runner");
        println!("  spend:   {spend_path}");
        println!("  budget:  {budget_path}");
        println!("  seed:    {}", config.outlier.seed);
        println!("  db:      {}", db.unwrap_or("(none)"));
        println!();
    }

    let spend = ingest::load_spend(spend_path)?;
    let budget = ingest::load_budget(budget_path)?;

    let seed = config.outlier.seed;
    let engine = AnomalyEngine::new(config)?;
    let report = engine.run(&spend, &budget)?;

    if let Some(path) = db {
        let run_id = format!("run-{}", uuid::Uuid::new_v4());
        let started_at = chrono::Utc::now().to_rfc3339();
        let mut store = AuditStore::open(path)?;
        store.migrate()?;
        store.record_run(
            &RunMeta {
                run_id:     &run_id,
                started_at: &started_at,
                seed,
                detector:   engine.detector_name(),
            },
            &report,
        )?;
        log::info!(
            "recorded {run_id}: {} alerts, {} dropped rows, impact {:?}",
            store.alert_count(&run_id)?,
            store.dropped_transactions(&run_id)?.len(),
            store.total_impact(&run_id)?
        );
        if !json_mode {
            println!("  run_id:  {run_id}");
            println!();
        }
    }

    if json_mode {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &AnomalyReport) {
    println!("=== DETECTION SUMMARY ===");
    println!("  spend rows:      {}", report.records_in);
    println!("  joined:          {}", report.records_joined);
    println!("  dropped:         {}", report.dropped_count());
    println!("  alerts:          {}", report.alerts.len());
    println!("  outliers:        {}", report.rule_counts.outliers);
    println!("  budget impact:   ${:.2}", report.total_budget_impact);
    println!("  gross exposure:  ${:.2}", report.gross_exposure());

    println!();
    println!("=== SIGNALS ===");
    for (rule, count) in &report.rule_counts.by_rule {
        println!("  {rule:<22} {count}");
    }

    println!();
    println!("=== TOP ALERTS (by |variance|) ===");
    if report.alerts.is_empty() {
        println!("  (No anomalies flagged)");
    } else {
        for alert in report.ranked().into_iter().take(TOP_ALERTS) {
            let spend = &alert.record.spend;
            println!(
                "  {} | {} | {}/{} | {} | Var: ${:.2} | {}",
                alert.transaction_id(),
                spend.vendor,
                spend.department,
                spend.category,
                spend.period(),
                alert.record.variance,
                alert.reasons().join(", ")
            );
        }
    }

    println!();
    println!("=== RECOMMENDED ACTIONS ===");
    for (i, action) in report.recommended_actions.iter().enumerate() {
        println!("  {}. {action}", i + 1);
    }
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn required_arg<'a>(args: &'a [String], flag: &str) -> Result<&'a str> {
    string_arg(args, flag).ok_or_else(|| anyhow::anyhow!("missing required argument {flag} <path>"))
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    string_arg(args, flag).and_then(|v| v.parse().ok())
}
