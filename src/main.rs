//! PodSentry — Environmental Alarm Engine
//!
//! Evaluates pod telemetry against administrator-owned alarm policies
//! and drives the alarm lifecycle, escalation timers, and notification
//! fan-out.
//!
//! # Usage
//!
//! ```bash
//! # Run against the built-in simulator (demo pods)
//! cargo run --release -- --simulate
//!
//! # Run with JSON readings on stdin (one per line)
//! bridge-export | ./podsentry --stdin
//! ```
//!
//! # Environment Variables
//!
//! - `PODSENTRY_CONFIG`: Path to a TOML config file
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use podsentry::alarm_store::AlarmStore;
use podsentry::api::{api_routes, ApiState};
use podsentry::config::{self, defaults, EngineConfig};
use podsentry::engine::{Engine, PodRegistry, PolicyCatalog};
use podsentry::escalation::EscalationScheduler;
use podsentry::ingest::{SimulatedSource, SimulatorConfig, StdinSource};
use podsentry::notifier::{LoggingBackend, NotificationRouter, NotificationStore, RoutingTable};
use podsentry::storage::HistoryStorage;
use podsentry::types::{BatchStage, ParameterKind, PodProfile, PodType, Setpoint};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "podsentry")]
#[command(about = "PodSentry environmental alarm engine")]
#[command(version)]
struct CliArgs {
    /// Read JSON readings from stdin instead of live ingestion
    #[arg(long)]
    stdin: bool,

    /// Generate simulated readings for the demo pod set
    #[arg(long)]
    simulate: bool,

    /// HTTP port for the query/command API
    #[arg(long, env = "PODSENTRY_PORT")]
    port: Option<u16>,

    /// Override the database path
    #[arg(long)]
    data_dir: Option<String>,
}

/// Demo pod set for `--simulate` runs.
fn demo_pods() -> Vec<PodProfile> {
    let setpoints = vec![
        Setpoint {
            parameter: ParameterKind::Temperature,
            day_value: 24.0,
            night_value: Some(21.0),
            tolerance: 2.0,
        },
        Setpoint {
            parameter: ParameterKind::Humidity,
            day_value: 60.0,
            night_value: Some(55.0),
            tolerance: 5.0,
        },
        Setpoint {
            parameter: ParameterKind::Co2,
            day_value: 1100.0,
            night_value: Some(600.0),
            tolerance: 200.0,
        },
    ];
    (1..=3)
        .map(|i| PodProfile {
            pod_id: format!("pod-{i}"),
            org_id: "demo-org".into(),
            pod_type: PodType::Grow,
            stage: BatchStage::Flower,
            setpoints: setpoints.clone(),
            lights_on: true,
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    let mut engine_config = EngineConfig::load();
    if let Some(dir) = &args.data_dir {
        engine_config.storage.db_path = dir.clone();
    }
    config::init(engine_config.clone());
    let cfg = config::get();

    info!("PodSentry starting");

    let storage = Arc::new(
        HistoryStorage::open(&cfg.storage.db_path)
            .with_context(|| format!("opening history db at {}", cfg.storage.db_path))?,
    );
    let store = Arc::new(AlarmStore::new());

    // Restore alarm state so the one-open invariant and suppression
    // windows survive restarts.
    let restored = match storage.load_alarms() {
        Ok(alarms) => {
            info!(count = alarms.len(), "restored alarms from history");
            store.restore(alarms.clone());
            alarms
        }
        Err(e) => {
            warn!(error = %e, "could not restore alarms, starting empty");
            Vec::new()
        }
    };

    let cancel = CancellationToken::new();
    let notifications = Arc::new(NotificationStore::new());

    // Routing table and policy catalog are owned by the excluded CRUD
    // layer; the demo starts empty and the handles accept hot swaps.
    let router = NotificationRouter::new(
        Arc::clone(&store),
        Arc::clone(&notifications),
        RoutingTable::default(),
        Arc::new(LoggingBackend),
        defaults::DELIVERY_QUEUE_DEPTH,
        cfg.notifier.suppression_secs,
        cfg.notifier.notify_on_handled,
        cancel.clone(),
    );

    let mut scheduler = EscalationScheduler::new(
        Arc::clone(&store),
        cfg.escalation.max_level,
        cfg.escalation.default_expected_response_secs,
        cancel.clone(),
    );
    // Restored alarms produced no lifecycle events, so their response
    // timers must be armed explicitly.
    scheduler.bootstrap(&restored);

    let engine = Engine::new(
        Arc::clone(&store),
        Arc::clone(&storage),
        PolicyCatalog::default(),
        PodRegistry::new(demo_pods()),
        cfg.clone(),
        cancel.clone(),
    );
    let _persister = engine.spawn_transition_persister();

    let api_state = ApiState::new(
        Arc::clone(&store),
        Arc::clone(&notifications),
        Arc::clone(&storage),
        engine.stats(),
    );

    let mut tasks = JoinSet::new();
    tasks.spawn(router.run());
    tasks.spawn(scheduler.run());

    let port = args
        .port
        .or(cfg.api_port)
        .unwrap_or(defaults::DEFAULT_API_PORT);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding API on port {port}"))?;
    info!(port, "API listening");
    let api_cancel = cancel.clone();
    tasks.spawn(async move {
        let app = api_routes(api_state);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { api_cancel.cancelled().await })
            .await
        {
            warn!(error = %e, "API server exited with error");
        }
    });

    let engine_cancel = cancel.clone();
    let use_stdin = args.stdin;
    if !args.simulate && !use_stdin {
        // Without a bridge wired up, simulation is the sane default.
        warn!("no ingestion source configured, falling back to --simulate");
    }
    tasks.spawn(async move {
        let result = if use_stdin {
            engine.run(StdinSource::new()).await
        } else {
            engine
                .run(SimulatedSource::new(
                    demo_pods(),
                    SimulatorConfig::default(),
                ))
                .await
        };
        if let Err(e) = result {
            warn!(error = %e, "engine loop ended with error");
        }
        // Source exhausted (or failed): bring the other tasks down too.
        engine_cancel.cancel();
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        () = cancel.cancelled() => {}
    }

    cancel.cancel();
    while tasks.join_next().await.is_some() {}
    info!("PodSentry stopped");
    Ok(())
}
