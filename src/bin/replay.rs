//! Synthetic replay harness.
//!
//! Seeds a demo trigger set into an in-memory registry, generates synthetic
//! telemetry (noisy CPU metric plus an availability stream with outage
//! windows), runs it through the full pipeline and prints the alerts that
//! fired. Useful for eyeballing engine behavior without a real feed:
//!
//! ```bash
//! cargo run --bin replay -- --samples 600
//! ```

use anyhow::Result;
use clap::Parser;
use rand::Rng;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use klaxon::alerts::{AlertProducer, AlertStore};
use klaxon::condition::{AvailabilityOp, CompareOp, Condition, ConditionSpec};
use klaxon::dampening::Dampening;
use klaxon::definitions::DefinitionsRegistry;
use klaxon::engine::external::ExternalRegistry;
use klaxon::engine::RuleEngine;
use klaxon::pipeline::{ProcessingLoop, ReplaySource};
use klaxon::storage::{MemoryAlertStore, MemoryDefinitionsStore};
use klaxon::types::{AvailabilityType, Data, Mode, Severity, Trigger};

#[derive(Parser, Debug)]
#[command(name = "replay")]
#[command(about = "Run synthetic telemetry through a demo trigger set")]
struct Args {
    /// Number of synthetic samples per stream
    #[arg(long, default_value = "600")]
    samples: usize,

    /// Delay between samples in milliseconds (0 = no delay)
    #[arg(long, default_value = "0")]
    delay_ms: u64,
}

const TENANT: &str = "demo";

fn seed_definitions(registry: &DefinitionsRegistry) -> Result<()> {
    // CPU spike trigger: 3 breaches out of any 5 samples.
    let mut cpu = Trigger::new(TENANT, "cpu-high", "CPU saturation");
    cpu.severity = Severity::High;
    registry.add_trigger(TENANT, cpu)?;
    registry.set_conditions(
        TENANT,
        "cpu-high",
        Mode::Firing,
        vec![Condition::new(
            TENANT,
            "cpu-high",
            Mode::Firing,
            ConditionSpec::Threshold {
                data_id: "host.cpu".to_string(),
                op: CompareOp::Gt,
                threshold: 90.0,
            },
        )],
    )?;
    registry.add_dampening(
        TENANT,
        Dampening::for_relaxed_count(TENANT, "cpu-high", Mode::Firing, 3, 5),
    )?;

    // Availability trigger with auto-resolve: two consecutive DOWNs fire,
    // one UP resolves.
    let mut avail = Trigger::new(TENANT, "svc-down", "Service down");
    avail.severity = Severity::Critical;
    avail.auto_resolve = true;
    avail.auto_resolve_alerts = true;
    registry.add_trigger(TENANT, avail)?;
    registry.set_conditions(
        TENANT,
        "svc-down",
        Mode::Firing,
        vec![Condition::new(
            TENANT,
            "svc-down",
            Mode::Firing,
            ConditionSpec::Availability {
                data_id: "svc.avail".to_string(),
                op: AvailabilityOp::Down,
            },
        )],
    )?;
    registry.set_conditions(
        TENANT,
        "svc-down",
        Mode::AutoResolve,
        vec![Condition::new(
            TENANT,
            "svc-down",
            Mode::AutoResolve,
            ConditionSpec::Availability {
                data_id: "svc.avail".to_string(),
                op: AvailabilityOp::Up,
            },
        )],
    )?;
    registry.add_dampening(
        TENANT,
        Dampening::for_strict(TENANT, "svc-down", Mode::Firing, 2),
    )?;
    Ok(())
}

/// Noisy CPU walk with spike bursts, plus an availability stream that goes
/// DOWN for a stretch every ~200 samples.
fn generate_batches(samples: usize) -> Vec<Vec<Data>> {
    let mut rng = rand::thread_rng();
    let mut batches = Vec::with_capacity(samples);
    let mut cpu: f64 = 70.0;

    for i in 0..samples {
        let ts = (i as u64) * 1_000;
        cpu = (cpu + rng.gen_range(-4.0..4.0)).clamp(30.0, 100.0);
        if rng.gen_bool(0.05) {
            cpu = rng.gen_range(91.0..100.0);
        }
        let avail = if (i % 200) >= 190 {
            AvailabilityType::Down
        } else {
            AvailabilityType::Up
        };
        batches.push(vec![
            Data::numeric(TENANT, "host.cpu", ts, cpu),
            Data::availability(TENANT, "svc.avail", ts, avail),
        ]);
    }
    batches
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let registry = Arc::new(DefinitionsRegistry::new(Arc::new(
        MemoryDefinitionsStore::default(),
    )));
    registry.load_blocking()?;
    seed_definitions(&registry)?;

    let alert_store = Arc::new(MemoryAlertStore::default());
    let producer = AlertProducer::new(alert_store.clone(), Arc::clone(&registry));
    let engine = RuleEngine::new(Arc::clone(&registry), Arc::new(ExternalRegistry::default()));

    info!("🧪 Generating {} synthetic samples per stream", args.samples);
    let mut source = ReplaySource::new(generate_batches(args.samples), args.delay_ms);

    let stats = ProcessingLoop::new(engine, producer, CancellationToken::new())
        .run(&mut source)
        .await;

    let alerts = alert_store.all_alerts(TENANT)?;
    info!("");
    info!("🔔 {} alerts fired over {} samples:", alerts.len(), stats.data_items);
    for alert in alerts {
        info!(
            "   [{}] {} {} ({} satisfying tuples)",
            alert.severity,
            alert.trigger.id,
            alert.status,
            alert.eval_sets.len()
        );
    }
    Ok(())
}
