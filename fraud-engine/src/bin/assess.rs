//! Fraud engine operator binary
//!
//! Reads one JSON transaction context per line from stdin and prints one JSON
//! assessment per line to stdout. Assessed transactions feed an in-process
//! history so later lines see earlier ones.
//!
//! Environment:
//! - `FRAUD_ENGINE_CONFIG` and other `FRAUD_ENGINE_*` overrides (see `EngineConfig::from_env`)
//! - `FRAUD_ENGINE_LOG_FORMAT=json` for JSON logs on stderr
//! - `RUST_LOG` for the log filter

use anyhow::Context;
use fraud_engine::{EngineConfig, FraudEngine, InMemoryHistory, TransactionContext};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = EngineConfig::from_env().context("loading configuration")?;
    let history = Arc::new(
        InMemoryHistory::new()
            .with_retention(chrono::Duration::days(config.history.baseline_window_days)),
    );
    let engine = FraudEngine::builder(config)
        .history(history.clone())
        .build()
        .context("building engine")?;

    tracing::info!("Reading transactions from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let ctx: TransactionContext = match serde_json::from_str(&line) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::error!("Line {}: malformed transaction: {}", line_no, e);
                continue;
            }
        };

        match engine.assess_transaction_risk(&ctx).await {
            Ok(assessment) => {
                let mut out = serde_json::to_vec(&assessment)?;
                out.push(b'\n');
                stdout.write_all(&out).await?;
                history.record_context(&ctx);
            }
            Err(e) => tracing::error!("Line {}: {}", line_no, e),
        }
    }
    stdout.flush().await?;

    let analytics = engine.analytics();
    tracing::info!(
        "Done: {} assessed, {} flagged, {} alerts, mean score {:.2}",
        analytics.total_transactions,
        analytics.flagged_transactions,
        analytics.alerts_created,
        analytics.mean_risk_score
    );
    tracing::debug!("Metrics:\n{}", engine.metrics().gather_text()?);

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match std::env::var("FRAUD_ENGINE_LOG_FORMAT").as_deref() {
        Ok("json") => builder.json().init(),
        _ => builder.init(),
    }
}
