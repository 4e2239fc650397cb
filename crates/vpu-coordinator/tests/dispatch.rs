mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use vpu_coordinator::{Opcode, Request, TaskError, TimeoutEvery, TimeoutNext};
use vpu_hal::SimulatedVpu;

use common::{coordinator, coordinator_with, test_config};

#[test]
fn commands_without_a_session_are_rejected() {
    let (sim, coord) = coordinator(2);
    assert_eq!(
        coord.execute(Request::new(0, Opcode::Init)),
        Err(TaskError::InvalidInstance)
    );
    assert_eq!(sim.op_log(), vec![]);
    assert_eq!(coord.stats().discarded, 1);
}

#[test]
fn unopened_and_out_of_range_instances_are_invalid() {
    let (sim, coord) = coordinator(2);
    coord.open().unwrap();
    assert_eq!(
        coord.execute(Request::new(1, Opcode::DecodeFrame).with_input_len(16)),
        Err(TaskError::InvalidInstance)
    );
    assert_eq!(
        coord.execute(Request::new(2, Opcode::Init)),
        Err(TaskError::InvalidInstance)
    );
    assert_eq!(sim.op_log(), vec![]);
    coord.close().unwrap();
}

#[test]
fn closing_a_closed_instance_never_reaches_the_engine() {
    let (sim, coord) = coordinator(2);
    coord.open().unwrap();
    coord.execute(Request::new(0, Opcode::Init)).unwrap();
    coord.execute(Request::new(0, Opcode::Close)).unwrap();
    assert_eq!(sim.op_count(Opcode::Close), 1);

    assert_eq!(
        coord.execute(Request::new(0, Opcode::Close)),
        Err(TaskError::AlreadyClosed)
    );
    assert_eq!(
        coord.execute(Request::new(1, Opcode::Close)),
        Err(TaskError::AlreadyClosed)
    );
    assert_eq!(sim.op_count(Opcode::Close), 1);
    coord.close().unwrap();
}

#[test]
fn init_returns_handle_and_opens_slot() {
    let (sim, coord) = coordinator(2);
    coord.open().unwrap();

    let out = coord.execute(Request::new(1, Opcode::Init)).unwrap();
    let slot = coord.slot(1).unwrap();
    assert!(!slot.closed);
    assert_eq!(slot.handle, out.value);
    assert_eq!(sim.live_handles(), vec![out.value]);

    let init = sim.op_log()[0];
    assert_eq!(init.opcode, Opcode::Init);
    assert_ne!(init.arg1, 0, "INIT carries the instance work region");
    assert_eq!(init.arg2, 1 << 20);
    coord.close().unwrap();
}

#[test]
fn init_without_handle_leaves_slot_closed() {
    let (sim, coord) = coordinator(2);
    coord.open().unwrap();
    sim.return_zero_handle_on_next_init();

    assert_eq!(
        coord.execute(Request::new(0, Opcode::Init)),
        Err(TaskError::HardwareReportedFailure { code: 0 })
    );
    assert!(coord.slot_closed(0).unwrap());
    coord.execute(Request::new(0, Opcode::Init)).unwrap();
    coord.close().unwrap();
}

#[test]
fn failed_init_leaves_slot_closed() {
    let (sim, coord) = coordinator(2);
    coord.open().unwrap();
    sim.fail_next(Opcode::Init, -12);
    assert_eq!(
        coord.execute(Request::new(0, Opcode::Init)),
        Err(TaskError::HardwareReportedFailure { code: -12 })
    );
    assert!(coord.slot_closed(0).unwrap());
    coord.close().unwrap();
}

#[test]
fn init_fails_when_work_memory_is_exhausted() {
    let mut config = test_config(4);
    config.work_pool_bytes = 2 << 20;
    let (sim, coord) = coordinator_with(SimulatedVpu::new(), config);
    coord.open().unwrap();

    coord.execute(Request::new(0, Opcode::Init)).unwrap();
    coord.execute(Request::new(1, Opcode::Init)).unwrap();
    assert_eq!(
        coord.execute(Request::new(2, Opcode::Init)),
        Err(TaskError::ResourceExhausted)
    );
    assert!(coord.slot_closed(2).unwrap());
    assert_eq!(sim.op_count(Opcode::Init), 2);

    // CLOSE hands the region back.
    coord.execute(Request::new(0, Opcode::Close)).unwrap();
    coord.execute(Request::new(2, Opcode::Init)).unwrap();
    coord.close().unwrap();
}

#[test]
fn reinit_of_open_slot_reuses_its_region() {
    let mut config = test_config(2);
    config.work_pool_bytes = 1 << 20;
    let (_sim, coord) = coordinator_with(SimulatedVpu::new(), config);
    coord.open().unwrap();
    coord.execute(Request::new(0, Opcode::Init)).unwrap();
    coord.execute(Request::new(0, Opcode::Init)).unwrap();
    assert!(!coord.slot_closed(0).unwrap());
    coord.close().unwrap();
}

#[test]
fn decodes_complete_in_order_and_drain_the_queue() {
    let (sim, coord) = coordinator(2);
    coord.open().unwrap();
    coord.execute(Request::new(0, Opcode::Init)).unwrap();
    coord
        .execute(Request::new(0, Opcode::FeedRingBuffer).with_input_len(3000))
        .unwrap();

    let tickets: Vec<_> = [1000, 1200, 800]
        .into_iter()
        .map(|len| coord.submit(Request::new(0, Opcode::DecodeFrame).with_input_len(len)))
        .collect();
    let decoded: Vec<u64> = tickets
        .iter()
        .map(|ticket| ticket.wait().unwrap().value)
        .collect();

    assert_eq!(decoded, vec![1000, 1200, 800]);
    assert_eq!(coord.queue_len(), 0);
    assert_eq!(coord.slot(0).unwrap().last_frame_len, 800);
    assert_eq!(sim.op_count(Opcode::DecodeFrame), 3);
    coord.close().unwrap();
}

#[test]
fn commands_reach_the_engine_in_submission_order() {
    let (sim, coord) = coordinator(3);
    coord.open().unwrap();
    let handles: Vec<u64> = (0..3)
        .map(|slot| coord.execute(Request::new(slot, Opcode::Init)).unwrap().value)
        .collect();
    sim.clear_op_log();

    let submitted: Vec<(usize, u64)> = (0..30u64).map(|n| ((n % 3) as usize, n)).collect();
    let tickets: Vec<_> = submitted
        .iter()
        .map(|&(slot, param)| coord.submit(Request::new(slot, Opcode::ClearBufferFlag).with_param(param)))
        .collect();
    for ticket in tickets {
        ticket.wait().unwrap();
    }

    let issued: Vec<(u64, u64)> = sim.op_log().iter().map(|op| (op.handle, op.arg1)).collect();
    let expected: Vec<(u64, u64)> = submitted
        .iter()
        .map(|&(slot, param)| (handles[slot], param))
        .collect();
    assert_eq!(issued, expected);
    coord.close().unwrap();
}

#[test]
fn concurrent_clients_each_see_their_own_results() {
    let (sim, coord) = coordinator(4);
    let coord = Arc::new(coord);
    coord.open().unwrap();

    let clients: Vec<_> = (0..4)
        .map(|slot| {
            let coord = Arc::clone(&coord);
            thread::spawn(move || {
                let handle = coord.execute(Request::new(slot, Opcode::Init)).unwrap().value;
                for _ in 0..10 {
                    let version = coord.execute(Request::new(slot, Opcode::GetVersion)).unwrap();
                    assert_eq!(version.value, u64::from(vpu_hal::sim::SIM_VERSION));
                }
                coord.execute(Request::new(slot, Opcode::Close)).unwrap();
                handle
            })
        })
        .collect();
    let mut handles: Vec<u64> = clients.into_iter().map(|c| c.join().unwrap()).collect();
    handles.sort_unstable();
    handles.dedup();

    assert_eq!(handles.len(), 4);
    assert!(sim.live_handles().is_empty());
    assert_eq!(coord.stats().failed, 0);
    coord.close().unwrap();
}

#[test]
fn each_injected_timeout_dumps_once_and_dispatch_continues() {
    let (sim, coord) = coordinator(2);
    coord.open().unwrap();
    coord.set_fault_policy(Arc::new(TimeoutEvery::new(Some(Opcode::DecodeFrame), 1)));

    const ROUNDS: u32 = 3;
    for round in 1..=ROUNDS {
        coord.execute(Request::new(0, Opcode::Init)).unwrap();
        assert_eq!(
            coord.execute(Request::new(0, Opcode::DecodeFrame).with_input_len(512)),
            Err(TaskError::HardwareTimeout)
        );
        assert_eq!(sim.dump_count(), round);
        assert!(coord.slot_closed(0).unwrap(), "timed-out instance is invalidated");
    }
    assert!(coord.needs_reset());
    assert_eq!(coord.stats().timeouts, u64::from(ROUNDS));

    coord.clear_fault_policy();
    coord.execute(Request::new(0, Opcode::Init)).unwrap();
    coord
        .execute(Request::new(0, Opcode::DecodeFrame).with_input_len(512))
        .unwrap();
    assert_eq!(sim.dump_count(), ROUNDS);
    coord.close().unwrap();
}

#[test]
fn timeout_on_one_instance_leaves_others_open() {
    let (_sim, coord) = coordinator(2);
    coord.open().unwrap();
    coord.execute(Request::new(0, Opcode::Init)).unwrap();
    coord.execute(Request::new(1, Opcode::Init)).unwrap();
    coord.set_fault_policy(Arc::new(TimeoutNext::new(Some(Opcode::FlushOutput), 1)));

    assert_eq!(
        coord.execute(Request::new(0, Opcode::FlushOutput)),
        Err(TaskError::HardwareTimeout)
    );
    assert!(coord.slot_closed(0).unwrap());
    assert!(!coord.slot_closed(1).unwrap());
    coord.execute(Request::new(1, Opcode::FlushOutput)).unwrap();
    coord.close().unwrap();
}

#[test]
fn delayed_interrupts_are_still_confirmed() {
    let sim = SimulatedVpu::new().with_irq_latency(std::time::Duration::from_millis(10));
    let (sim, coord) = coordinator_with(sim, test_config(1));
    coord.open().unwrap();
    coord.execute(Request::new(0, Opcode::Init)).unwrap();
    coord
        .execute(Request::new(0, Opcode::ParseSequenceHeader))
        .unwrap();
    assert_eq!(sim.dump_count(), 0);
    coord.close().unwrap();
}

#[test]
fn regions_in_use_follow_open_instances() {
    let (_sim, coord) = coordinator(4);
    coord.open().unwrap();
    assert_eq!(coord.stats().regions_in_use, 0);

    coord.execute(Request::new(0, Opcode::Init)).unwrap();
    coord.execute(Request::new(1, Opcode::Init)).unwrap();
    assert_eq!(coord.stats().regions_in_use, 2);

    coord.execute(Request::new(0, Opcode::Close)).unwrap();
    assert_eq!(coord.stats().regions_in_use, 1);

    coord.close().unwrap();
    assert_eq!(coord.stats().regions_in_use, 0);
}

#[test]
fn queries_and_submits_do_not_wait_for_a_stalled_command() {
    let mut config = test_config(2);
    config.irq_timeout_ms = 500;
    let (sim, coord) = coordinator_with(SimulatedVpu::new(), config);
    coord.open().unwrap();
    coord.execute(Request::new(0, Opcode::Init)).unwrap();
    sim.suppress_irqs(Opcode::DecodeFrame, 1);

    let stalled = coord.submit(Request::new(0, Opcode::DecodeFrame));
    let deadline = Instant::now() + Duration::from_secs(1);
    while sim.op_count(Opcode::DecodeFrame) == 0 {
        assert!(Instant::now() < deadline, "decode never reached the engine");
        thread::sleep(Duration::from_millis(1));
    }

    let start = Instant::now();
    let queued = coord.submit(Request::new(1, Opcode::Init));
    assert_eq!(coord.queue_len(), 1);
    assert!(!coord.slot(0).unwrap().closed);
    assert_eq!(coord.stats().submitted, 3);
    assert!(start.elapsed() < Duration::from_millis(250));
    assert!(!stalled.is_complete());

    assert_eq!(stalled.wait(), Err(TaskError::HardwareTimeout));
    queued.wait().unwrap();
    coord.close().unwrap();
}
