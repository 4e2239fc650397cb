//! Scripted multi-client decode run.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::Serialize;
use vpu_coordinator::{Coordinator, Opcode, Request, TaskError, TimeoutEvery};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadOptions {
    pub instances: usize,
    pub frames: u32,
    pub frame_bytes: u64,
    pub timeout_every: Option<u32>,
    pub suspend_after_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstanceReport {
    pub slot: usize,
    pub decoded: u32,
    pub timeouts: u32,
    pub rejected: u32,
    pub reinits: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadReport {
    pub instances: Vec<InstanceReport>,
    pub submitted: u64,
    pub executed: u64,
    pub failed: u64,
    pub discarded: u64,
    pub timeouts: u64,
    pub elapsed_ms: u64,
}

pub fn run(coord: &Arc<Coordinator>, opts: &WorkloadOptions) -> anyhow::Result<WorkloadReport> {
    if let Some(period) = opts.timeout_every {
        coord.set_fault_policy(Arc::new(TimeoutEvery::new(Some(Opcode::DecodeFrame), period)));
    }

    let started = Instant::now();
    // Every client opens its session before the suspend timer starts.
    let ready = Arc::new(Barrier::new(opts.instances + 1));

    let clients = (0..opts.instances)
        .map(|n| {
            let coord = Arc::clone(coord);
            let ready = Arc::clone(&ready);
            let opts = opts.clone();
            thread::Builder::new()
                .name(format!("vpu-client-{n}"))
                .spawn(move || client(&coord, &ready, &opts))
                .context("failed to spawn client thread")
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    ready.wait();
    if let Some(ms) = opts.suspend_after_ms {
        thread::sleep(Duration::from_millis(ms));
        coord.suspend();
        thread::sleep(Duration::from_millis(ms));
        coord.resume()?;
    }

    let mut instances = Vec::with_capacity(clients.len());
    for handle in clients {
        let report = handle
            .join()
            .map_err(|_| anyhow::anyhow!("client thread panicked"))??;
        instances.push(report);
    }
    coord.clear_fault_policy();

    let stats = coord.stats();
    Ok(WorkloadReport {
        instances,
        submitted: stats.submitted,
        executed: stats.executed,
        failed: stats.failed,
        discarded: stats.discarded,
        timeouts: stats.timeouts,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

fn client(
    coord: &Coordinator,
    ready: &Barrier,
    opts: &WorkloadOptions,
) -> anyhow::Result<InstanceReport> {
    let opened = coord.open();
    ready.wait();
    opened?;

    let slot = coord
        .acquire_instance_index()
        .context("no free decoder slot")?;
    let mut report = InstanceReport {
        slot,
        ..Default::default()
    };

    let mut open = start_stream(coord, slot, opts.frame_bytes).is_ok();
    for _ in 0..opts.frames {
        if !open {
            report.reinits += 1;
            open = start_stream(coord, slot, opts.frame_bytes).is_ok();
            if !open {
                report.rejected += 1;
                continue;
            }
        }

        let frame = |opcode| Request::new(slot, opcode).with_input_len(opts.frame_bytes);
        let result = coord
            .execute(frame(Opcode::FeedRingBuffer))
            .and_then(|_| coord.execute(frame(Opcode::DecodeFrame)));
        match result {
            Ok(_) => report.decoded += 1,
            Err(TaskError::HardwareTimeout) => {
                report.timeouts += 1;
                open = false;
            }
            Err(err) => {
                tracing::debug!(slot, error = %err, "frame rejected");
                report.rejected += 1;
                open = !coord.slot_closed(slot)?;
            }
        }
    }

    if open {
        let _ = coord.execute(Request::new(slot, Opcode::FlushOutput));
        let _ = coord.execute(Request::new(slot, Opcode::Close));
    }
    coord.release_instance_index(slot)?;
    coord.close()?;
    tracing::info!(
        slot,
        decoded = report.decoded,
        timeouts = report.timeouts,
        "client finished"
    );
    Ok(report)
}

fn start_stream(coord: &Coordinator, slot: usize, frame_bytes: u64) -> Result<(), TaskError> {
    coord.execute(Request::new(slot, Opcode::Init))?;
    coord.execute(Request::new(slot, Opcode::FeedRingBuffer).with_input_len(frame_bytes))?;
    coord.execute(Request::new(slot, Opcode::ParseSequenceHeader))?;
    coord.execute(Request::new(slot, Opcode::RegisterFrameBuffers).with_param(4))?;
    Ok(())
}
