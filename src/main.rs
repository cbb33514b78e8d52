use anyhow::{Context, Result};
use chrono::Utc;
use citybot::engine::{snapshot_channel, DecisionPipeline, IntakeBuffer};
use citybot::models::{FeatureBatch, FillReport, Outcome};
use citybot::CoreConfig;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "citybot", about = "Adaptive trading-decision core driver")]
struct Args {
    /// Optional TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of synthetic snapshots to run through the pipeline
    #[arg(long, default_value_t = 120)]
    ticks: u64,

    /// Producer pacing between snapshots
    #[arg(long, default_value_t = 250)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = CoreConfig::load(args.config.as_deref()).context("loading configuration")?;
    info!(
        ticks = args.ticks,
        capital = config.initial_capital,
        "starting decision core"
    );

    let (tx, rx) = snapshot_channel(config.feed_capacity);
    let interval_ms = args.interval_ms;
    let ticks = args.ticks;
    let producer = tokio::spawn(async move { produce_snapshots(tx, ticks, interval_ms).await });

    let mut pipeline = DecisionPipeline::new(config.clone())?;
    run_decision_loop(rx, &mut pipeline, &config).await;

    producer.await.context("snapshot producer task failed")?;

    let metrics = pipeline.metrics();
    info!(
        summary = %serde_json::to_string_pretty(&metrics)?,
        "session complete"
    );
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

/// Upper bound on one wait for the next snapshot; an idle feed surfaces in
/// the logs instead of parking the loop silently.
const IDLE_WAIT: Duration = Duration::from_secs(2);

/// Consume snapshots, reorder them through the intake buffer and drive the
/// decision pipeline. Trades are filled immediately at the limit price, which
/// stands in for the external execution collaborator.
async fn run_decision_loop(
    mut rx: mpsc::Receiver<FeatureBatch>,
    pipeline: &mut DecisionPipeline,
    config: &CoreConfig,
) {
    let mut intake = IntakeBuffer::new(config.late_tolerance_secs);
    let mut rng = StdRng::seed_from_u64(42);
    let mut price = 100.0;

    loop {
        let batch = match tokio::time::timeout(IDLE_WAIT, rx.recv()).await {
            Ok(Some(batch)) => batch,
            Ok(None) => break,
            Err(_) => {
                debug!("no snapshot within the wait window");
                continue;
            }
        };
        if !intake.push(batch) {
            continue;
        }
        while let Some(next) = intake.next() {
            price *= 1.0 + rng.gen_range(-0.012..0.012);
            let result = pipeline.tick(&next, price);

            if let Some(event) = &result.regime_change {
                info!(
                    old = event.old.as_str(),
                    new = event.new.as_str(),
                    version = event.parameters.version,
                    "regime swapped"
                );
            }

            match result.outcome {
                Outcome::Trade(intent) => {
                    info!(
                        instrument = %intent.instrument,
                        size = format!("{:.2}", intent.size).as_str(),
                        limit = format!("{:.4}", intent.limit_price).as_str(),
                        "trade intent"
                    );
                    pipeline.on_fill(&FillReport {
                        instrument: intent.instrument,
                        filled_size: intent.size,
                        fill_price: intent.limit_price,
                        timestamp: Utc::now(),
                    });
                }
                Outcome::Abstain { reasoning } => {
                    debug!(
                        cause = format!("{:?}", reasoning.abstain_cause).as_str(),
                        regime = reasoning.regime.as_str(),
                        "abstained"
                    );
                }
            }
        }
    }
}

/// Synthetic Munich snapshot feed: plausible weather, air-quality and flight
/// observations on a fixed seed.
async fn produce_snapshots(tx: mpsc::Sender<FeatureBatch>, ticks: u64, interval_ms: u64) {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..ticks {
        let batch = synthetic_batch(&mut rng);
        if tx.send(batch).await.is_err() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(interval_ms)).await;
    }
}

fn synthetic_batch(rng: &mut StdRng) -> FeatureBatch {
    let observations: HashMap<String, f64> = [
        ("temperature", rng.gen_range(-5.0..30.0)),
        ("humidity", rng.gen_range(30.0..95.0)),
        ("pressure", rng.gen_range(980.0..1040.0)),
        ("wind_speed", rng.gen_range(0.0..20.0)),
        ("precipitation", rng.gen_range(0.0..15.0)),
        ("aqi", rng.gen_range(1.0..5.0)),
        ("pm2_5", rng.gen_range(2.0..80.0)),
        ("active_flights", rng.gen_range(5.0..90.0)),
        ("departures", rng.gen_range(0.0..45.0)),
        ("arrivals", rng.gen_range(0.0..45.0)),
        ("avg_delay", rng.gen_range(-5.0..50.0)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    FeatureBatch {
        timestamp: Utc::now(),
        instrument: "MUC".to_string(),
        observations,
    }
}
