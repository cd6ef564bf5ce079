use anyhow::Result;
use attractor::{AppConfig, AttractorApp, SimulationConfig};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config =
        AppConfig::default().with_simulation(SimulationConfig::default().with_env_overrides());
    log::info!(
        "Starting with {} particles on {} threads ({} mode)",
        config.simulation.num_particles,
        config.simulation.num_threads,
        config.simulation.mode
    );

    AttractorApp::new(config).run()
}
