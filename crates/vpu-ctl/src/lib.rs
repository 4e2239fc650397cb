//! Command-line driver for the decode coordinator.
#![forbid(unsafe_code)]

pub mod config;
pub mod workload;

pub use config::{Args, Config};
pub use workload::{run, InstanceReport, WorkloadOptions, WorkloadReport};
