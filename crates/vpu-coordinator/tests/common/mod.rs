#![allow(dead_code)]

use std::sync::{Arc, Once};

use tracing_subscriber::EnvFilter;
use vpu_coordinator::{Coordinator, CoordinatorConfig};
use vpu_hal::{HardwareAccess, SimulatedVpu};

static TRACING: Once = Once::new();

/// Route coordinator logs through the test harness; filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn test_config(slot_count: usize) -> CoordinatorConfig {
    CoordinatorConfig {
        slot_count,
        idle_poll_ms: 5,
        irq_timeout_ms: 50,
        force_close_timeout_ms: 150,
        work_region_bytes: 1 << 20,
        work_pool_bytes: 8 << 20,
    }
}

pub fn coordinator_with(sim: SimulatedVpu, config: CoordinatorConfig) -> (Arc<SimulatedVpu>, Coordinator) {
    init_tracing();
    let sim = Arc::new(sim);
    let hal: Arc<dyn HardwareAccess> = sim.clone();
    let coord = Coordinator::new(hal, config).expect("valid test config");
    (sim, coord)
}

pub fn coordinator(slot_count: usize) -> (Arc<SimulatedVpu>, Coordinator) {
    coordinator_with(SimulatedVpu::new(), test_config(slot_count))
}
