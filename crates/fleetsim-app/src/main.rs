use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use fleetsim_core::{FleetConfig, FleetWorld};
use fleetsim_render::{Renderer, RendererContext, SharedWorld, TerminalRenderer};
use tracing::info;

fn main() -> Result<()> {
    init_tracing();
    let config = config_from_env()?;
    let world = bootstrap_world(config)?;
    info!("Starting FleetSim dispatch shell");
    let renderer = TerminalRenderer::default();
    renderer.run(RendererContext { world })?;
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Assemble the run configuration, letting `FLEETSIM_*` variables override
/// the defaults.
fn config_from_env() -> Result<FleetConfig> {
    let defaults = FleetConfig::default();
    Ok(FleetConfig {
        truck_count: env_or("FLEETSIM_TRUCKS", defaults.truck_count)?,
        waypoint_count: env_or("FLEETSIM_WAYPOINTS", defaults.waypoint_count)?,
        region_size: env_or("FLEETSIM_REGION", defaults.region_size)?,
        max_ticks: env_or("FLEETSIM_MAX_TICKS", defaults.max_ticks)?,
        rng_seed: match std::env::var("FLEETSIM_SEED") {
            Ok(raw) => Some(
                raw.trim()
                    .parse::<u64>()
                    .context("FLEETSIM_SEED must be an unsigned integer")?,
            ),
            Err(_) => defaults.rng_seed,
        },
        ..defaults
    })
}

fn env_or<T: FromStr>(key: &'static str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .ok()
            .with_context(|| format!("{key} could not be parsed")),
        Err(_) => Ok(default),
    }
}

fn bootstrap_world(config: FleetConfig) -> Result<SharedWorld> {
    let mut world = FleetWorld::new(config).context("invalid dispatch configuration")?;
    world.populate_random();
    info!(
        trucks = world.truck_count(),
        waypoints = world.waypoint_count(),
        region = world.config().region_size,
        seed = world.config().rng_seed,
        "Populated dispatch world",
    );
    Ok(Arc::new(Mutex::new(world)))
}
