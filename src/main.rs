use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

use auction_planner::bridge::{Bridge, FeedLine, FeedReader, JsonLinesSink};
use auction_planner::calendar::Calendar;
use auction_planner::compactor::run_compactor;
use auction_planner::config::PlannerConfig;
use auction_planner::engine::Planner;
use auction_planner::limits::MAX_FEED_LINE_BYTES;
use auction_planner::model::Tender;
use auction_planner::store::InMemoryStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the patches; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let metrics_port: Option<u16> = std::env::var("PLANNER_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    auction_planner::observability::init(metrics_port)?;

    let config = PlannerConfig::from_env()?;
    let data_dir = std::env::var("PLANNER_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let calendar_path = std::env::var("PLANNER_CALENDAR").ok();
    let compact_threshold: u64 = std::env::var("PLANNER_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    std::fs::create_dir_all(&data_dir)?;
    let store = Arc::new(InMemoryStore::open(&PathBuf::from(&data_dir).join("planner.wal"))?);
    let planner = Arc::new(Planner::new(store.clone(), config.clone()));

    planner.seed_stream_limits(config.stream_limits).await?;
    if let Some(path) = &calendar_path {
        let raw = tokio::fs::read_to_string(path).await?;
        let days: serde_json::Value = serde_json::from_str(&raw)?;
        planner.seed_calendar(&Calendar::from_document(&days)).await?;
    }

    info!("auction planner started");
    info!("  data_dir: {data_dir}");
    info!("  tz: {}", config.tz);
    info!("  sandbox_mode: {}", config.sandbox_mode);
    info!("  calendar: {}", calendar_path.as_deref().unwrap_or("(stored)"));
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let compactor = tokio::spawn(run_compactor(store.clone(), compact_threshold, Duration::from_secs(30)));
    let bridge = Bridge::new(planner, Arc::new(JsonLinesSink::new(tokio::io::stdout())));

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("cannot listen for SIGTERM: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    let mut feed = FeedReader::new(BufReader::new(tokio::io::stdin()), MAX_FEED_LINE_BYTES);
    let mut processed = 0u64;
    loop {
        tokio::select! {
            line = feed.next_line() => {
                let line = match line {
                    Ok(Some(FeedLine::Line(line))) => line,
                    Ok(Some(FeedLine::Oversized(len))) => {
                        tracing::warn!("skipping feed line of {len} bytes");
                        continue;
                    }
                    Ok(None) => {
                        info!("feed closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("feed read error: {e}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let tender: Tender = match serde_json::from_str(&line) {
                    Ok(tender) => tender,
                    Err(e) => {
                        tracing::warn!("skipping malformed tender: {e}");
                        continue;
                    }
                };
                let now = Utc::now().with_timezone(&config.tz);
                bridge.process(&tender, now).await;
                processed += 1;
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    compactor.abort();
    if let Err(e) = store.compact().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!(processed, "auction planner stopped");
    Ok(())
}
