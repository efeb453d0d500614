//! Engine binary for Throng.
//!
//! Wires the inference backend, the in-memory collaborators, the spawner
//! and the run loop together, then runs until a bound is reached or the
//! process receives Ctrl-C.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (first argument, default `throng-config.yaml`)
//! 2. Initialize structured logging (`RUST_LOG` overrides `logging.level`)
//! 3. Create the inference backend
//! 4. Build the engine and spawn the initial population
//! 5. Run the simulation loop
//! 6. Log the result and shut the engine down

mod callback;
mod error;
mod spawner;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use throng_agents::{DirtyTracker, InMemoryAttributeStore};
use throng_core::config::SimulationConfig;
use throng_core::{
    Collaborators, Engine, RotatingFeed, RunControl, TracingTelemetry, log_simulation_end,
    run_simulation,
};
use throng_inference::create_backend;
use throng_types::{HardwareClass, Tier};
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::callback::PopulationCallback;
use crate::error::EngineError;
use crate::spawner::Spawner;

/// Config file used when no path is given.
const DEFAULT_CONFIG_PATH: &str = "throng-config.yaml";

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if any initialization step or the simulation fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let (config, from_file) = load_config(&config_path)?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!("throng-engine starting");
    if from_file {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(path = %config_path.display(), "Config file not found, using defaults");
    }
    info!(
        world_name = %config.world.name,
        seed = config.world.seed,
        tick_interval_ms = config.world.tick_interval_ms,
        pool_capacity = config.population.pool_capacity,
        initial_agents = config.population.initial_agents,
        "Configuration summary"
    );

    // 3. Create the inference backend.
    let backend = Arc::new(create_backend(&config.backend_settings()).map_err(EngineError::from)?);

    // 4. Build the engine and the initial population.
    let store = Arc::new(InMemoryAttributeStore::new());
    let dirty = Arc::new(DirtyTracker::new());
    let hardware = HardwareClass::detect();
    let seed = config.world.seed;
    let volatile_fraction = config.population.volatile_fraction;
    let initial = usize::try_from(config.population.initial_agents).unwrap_or(usize::MAX);
    let report_interval = config.world.ticks_per_day;
    let control = Arc::new(RunControl::from_config(&config.world));
    let mut feed = RotatingFeed::from_config(&config.content);

    let mut engine = Engine::init(
        config,
        backend,
        Handle::current(),
        hardware,
        Collaborators {
            store: Arc::clone(&store) as _,
            gateway: Arc::clone(&dirty) as _,
            telemetry: Arc::new(TracingTelemetry),
        },
    )
    .map_err(EngineError::from)?;

    let mut spawner = Spawner::new(seed, volatile_fraction, Arc::clone(&store));
    let spawned = spawner.spawn_into(&mut engine, initial);
    let classified = engine.classify_now();
    let population = |tier: Tier| classified.populations.get(tier.index()).copied().unwrap_or(0);
    info!(
        spawned,
        high = population(Tier::High),
        medium = population(Tier::Medium),
        low = population(Tier::Low),
        dormant = population(Tier::Dormant),
        "Initial population spawned"
    );

    // Ctrl-C stops the loop before its next tick.
    {
        let control = Arc::clone(&control);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl-C received, stopping");
                    control.request_stop();
                }
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
            }
        });
    }

    // 5. Run the simulation.
    let mut callback = PopulationCallback::new(spawner, store, dirty, report_interval);
    let result = run_simulation(&mut engine, &control, &mut feed, &mut callback)
        .await
        .map_err(EngineError::from)?;

    // 6. Log results and shut down.
    log_simulation_end(&result);
    let report = engine.shutdown();
    info!(
        end_reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        released = report.released,
        live_agents = report.live_agents,
        "throng-engine shutdown complete"
    );

    Ok(())
}

/// Load the configuration at `path`, falling back to defaults when the
/// file does not exist.
///
/// Returns the configuration and whether it came from the file.
fn load_config(path: &Path) -> Result<(SimulationConfig, bool), EngineError> {
    if path.exists() {
        Ok((SimulationConfig::from_file(path)?, true))
    } else {
        Ok((SimulationConfig::parse("")?, false))
    }
}
