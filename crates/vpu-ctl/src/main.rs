#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use vpu_coordinator::Coordinator;
use vpu_ctl::Config;
use vpu_hal::{HardwareAccess, SimulatedVpu};

fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut sim = SimulatedVpu::new();
    if config.irq_latency_us > 0 {
        sim = sim.with_irq_latency(Duration::from_micros(config.irq_latency_us));
    }
    let hal: Arc<dyn HardwareAccess> = Arc::new(sim);
    let coord = Arc::new(Coordinator::new(hal, config.coordinator.clone())?);

    tracing::info!(
        instances = config.workload.instances,
        frames = config.workload.frames,
        slots = config.coordinator.slot_count,
        "starting decode workload"
    );
    let report = vpu_ctl::run(&coord, &config.workload)?;
    coord.shutdown();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
