use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use vpu_coordinator::CoordinatorConfig;

use crate::workload::WorkloadOptions;

#[derive(Debug, Clone, Parser)]
#[command(name = "vpu-ctl", version, about = "Drive a decode workload through the coordinator")]
pub struct Args {
    /// JSON file with coordinator settings. Flags below override individual fields.
    ///
    /// Environment variable: `VPU_CONFIG`.
    #[arg(long, env = "VPU_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of decoder slots.
    ///
    /// Environment variable: `VPU_SLOTS`.
    #[arg(long, env = "VPU_SLOTS")]
    pub slots: Option<usize>,

    /// Completion interrupt timeout in milliseconds.
    ///
    /// Environment variable: `VPU_IRQ_TIMEOUT_MS`.
    #[arg(long, env = "VPU_IRQ_TIMEOUT_MS")]
    pub irq_timeout_ms: Option<u64>,

    /// Per-instance bound on forced CLOSE acknowledgement, in milliseconds.
    ///
    /// Environment variable: `VPU_FORCE_CLOSE_TIMEOUT_MS`.
    #[arg(long, env = "VPU_FORCE_CLOSE_TIMEOUT_MS")]
    pub force_close_timeout_ms: Option<u64>,

    /// Concurrent decode clients, each with its own instance.
    #[arg(long, default_value_t = 4)]
    pub instances: usize,

    /// Frames decoded per instance.
    #[arg(long, default_value_t = 32)]
    pub frames: u32,

    /// Bitstream bytes fed per frame.
    #[arg(long, default_value_t = 4096)]
    pub frame_bytes: u64,

    /// Simulated interrupt latency in microseconds (0 raises the interrupt inline).
    #[arg(long, default_value_t = 0)]
    pub irq_latency_us: u64,

    /// Force a timeout on every Nth DECODE_FRAME.
    #[arg(long)]
    pub timeout_every: Option<u32>,

    /// Suspend the engine this many milliseconds into the run, then resume.
    #[arg(long)]
    pub suspend_after_ms: Option<u64>,

    /// Log filter (tracing-subscriber EnvFilter syntax).
    ///
    /// Environment variable: `VPU_LOG`.
    #[arg(long, env = "VPU_LOG")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub coordinator: CoordinatorConfig,
    pub workload: WorkloadOptions,
    pub irq_latency_us: u64,
    pub log_level: String,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> anyhow::Result<Self> {
        let mut coordinator = match &args.config {
            Some(path) => read_config_file(path)?,
            None => CoordinatorConfig::default(),
        };
        if let Some(slots) = args.slots {
            coordinator.slot_count = slots;
        }
        if let Some(ms) = args.irq_timeout_ms {
            coordinator.irq_timeout_ms = ms;
        }
        if let Some(ms) = args.force_close_timeout_ms {
            coordinator.force_close_timeout_ms = ms;
        }
        coordinator.validate()?;

        if args.instances > coordinator.slot_count {
            anyhow::bail!(
                "{} instances requested but only {} slots configured",
                args.instances,
                coordinator.slot_count
            );
        }

        let log_level = args
            .log_level
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "info".to_string());

        Ok(Self {
            coordinator,
            workload: WorkloadOptions {
                instances: args.instances,
                frames: args.frames,
                frame_bytes: args.frame_bytes,
                timeout_every: args.timeout_every.filter(|n| *n > 0),
                suspend_after_ms: args.suspend_after_ms,
            },
            irq_latency_us: args.irq_latency_us,
            log_level,
        })
    }
}

fn read_config_file(path: &Path) -> anyhow::Result<CoordinatorConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}
