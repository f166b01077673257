// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Integration tests for fault routing: per-thread observers, propagation to
//! the fault policy and escalation onto the main thread.

use khora_threading::{
    ExecutionMode, Fault, FaultAction, FaultOrigin, ManagedThread, SchedulerConfig, ThreadClass,
    ThreadManager, ThreadState, ThreadingError,
};
use std::fmt;
use std::panic;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

#[derive(Debug, PartialEq)]
struct DeviceLost {
    adapter: u32,
}

impl fmt::Display for DeviceLost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graphics device {} lost", self.adapter)
    }
}

impl std::error::Error for DeviceLost {}

fn config(mode: ExecutionMode) -> SchedulerConfig {
    SchedulerConfig {
        execution_mode: mode,
        update_per_second: 200.0,
        frames_per_second: 200.0,
        escalation_timeout_ms: 2_000,
        ..SchedulerConfig::default()
    }
}

fn failing_update_thread(after_frames: u64) -> Arc<ManagedThread> {
    let update = ManagedThread::new("update", ThreadClass::Update);
    update.set_propagate_faults(true);
    update.on_new_frame(move |frame| {
        if frame.frame_number() >= after_frames {
            return Err(DeviceLost { adapter: 1 }.into());
        }
        Ok(())
    });
    update
}

// ─────────────────────────────────────────────────────────────────────────────
// Local handling
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_fault_without_propagation_fires_event_and_keeps_running() {
    init_logging();
    let thread = ManagedThread::new("update", ThreadClass::Update);
    thread.set_updates_per_second(200.0).unwrap();
    let observed = Arc::new(AtomicUsize::new(0));
    {
        let observed = observed.clone();
        thread.on_unhandled_fault(move |thread, fault| {
            assert_eq!(thread.name(), "update");
            assert!(fault.downcast_ref::<DeviceLost>().is_some());
            observed.fetch_add(1, Ordering::SeqCst);
        });
    }
    thread.on_new_frame(|_| Err(DeviceLost { adapter: 0 }.into()));

    thread.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        observed.load(Ordering::SeqCst) >= 3
    }));
    assert_eq!(thread.state(), ThreadState::Running);
    assert!(thread.stats().faults >= 3);

    thread.stop().unwrap();
    thread.join(Duration::from_secs(2)).unwrap();
}

#[test]
fn test_panicking_work_item_surfaces_through_the_owning_frame() {
    init_logging();
    let thread = ManagedThread::new("render", ThreadClass::Render);
    let observed = Arc::new(Mutex::new(Vec::new()));
    {
        let observed = observed.clone();
        thread.on_unhandled_fault(move |_, fault| {
            observed
                .lock()
                .unwrap()
                .push(fault.panic_message().map(str::to_string));
        });
    }
    thread.initialize().unwrap();

    let ran_after = Arc::new(AtomicUsize::new(0));
    thread.post(|| panic!("bad upload")).unwrap();
    {
        let ran_after = ran_after.clone();
        thread
            .post(move || {
                ran_after.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }

    thread.run_single_frame().unwrap();
    assert_eq!(*observed.lock().unwrap(), vec![Some("bad upload".to_string())]);
    assert_eq!(ran_after.load(Ordering::SeqCst), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Main thread faults
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_propagated_main_fault_ends_run_with_the_original_error() {
    init_logging();
    let manager = ThreadManager::with_config(config(ExecutionMode::MultiThread)).unwrap();
    let main = manager.main_thread();
    main.set_propagate_faults(true);
    main.on_new_frame(|frame| {
        if frame.frame_number() == 3 {
            return Err(DeviceLost { adapter: 7 }.into());
        }
        Ok(())
    });

    let fault = match manager.run() {
        Err(ThreadingError::Fault(fault)) => fault,
        other => panic!("expected a fault, got {other:?}"),
    };
    assert_eq!(fault.downcast_ref::<DeviceLost>(), Some(&DeviceLost { adapter: 7 }));
    assert!(fault.origin().is_main());
    assert_eq!(manager.main_thread().stats().frames, 3);
}

#[test]
fn test_panicking_main_frame_keeps_the_panic_payload() {
    init_logging();
    let manager = ThreadManager::with_config(config(ExecutionMode::SingleThread)).unwrap();
    manager.main_thread().set_propagate_faults(true);
    manager.main_thread().on_new_frame(|_| panic!("shader cache corrupt"));

    let Err(ThreadingError::Fault(fault)) = manager.run() else {
        panic!("run should abort");
    };
    assert!(fault.is_panic());

    let payload = panic::catch_unwind(panic::AssertUnwindSafe(|| fault.resume_unwind()))
        .unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"shader cache corrupt"));
}

#[test]
fn test_main_fault_without_propagation_does_not_end_run() {
    init_logging();
    let manager = Arc::new(ThreadManager::with_config(config(ExecutionMode::MultiThread)).unwrap());
    let faults = Arc::new(AtomicUsize::new(0));
    {
        let faults = faults.clone();
        manager.main_thread().on_unhandled_fault(move |_, _| {
            faults.fetch_add(1, Ordering::SeqCst);
        });
    }
    manager
        .main_thread()
        .on_new_frame(|_| anyhow::bail!("recoverable"));

    let stopper = {
        let manager = manager.clone();
        let faults = faults.clone();
        thread::spawn(move || {
            wait_until(Duration::from_secs(2), || faults.load(Ordering::SeqCst) >= 3);
            manager.stop()
        })
    };
    manager.run().unwrap();
    stopper.join().unwrap().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Escalation from secondary threads
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_secondary_fault_escalates_to_run_in_multi_thread_mode() {
    init_logging();
    let manager = ThreadManager::with_config(config(ExecutionMode::MultiThread)).unwrap();
    manager.add(&failing_update_thread(2)).unwrap();

    let Err(ThreadingError::Fault(fault)) = manager.run() else {
        panic!("run should abort");
    };
    assert!(fault.is_escalated());
    assert_eq!(
        fault.origin(),
        &FaultOrigin::Thread {
            name: "update".to_string(),
            main: false
        }
    );
    assert_eq!(fault.downcast_ref::<DeviceLost>(), Some(&DeviceLost { adapter: 1 }));
}

#[test]
fn test_secondary_fault_escalates_to_run_in_single_thread_mode() {
    init_logging();
    let manager = ThreadManager::with_config(config(ExecutionMode::SingleThread)).unwrap();
    let update = failing_update_thread(2);
    manager.add(&update).unwrap();

    let started = Instant::now();
    let Err(ThreadingError::Fault(fault)) = manager.run() else {
        panic!("run should abort");
    };
    assert!(started.elapsed() < Duration::from_secs(1), "reporter must not block");
    assert!(fault.downcast_ref::<DeviceLost>().is_some());
    assert!(!update.is_detached());
}

#[test]
fn test_policy_can_ignore_faults() {
    init_logging();
    let decisions = Arc::new(AtomicUsize::new(0));
    let policy = {
        let decisions = decisions.clone();
        move |_: &Fault| {
            decisions.fetch_add(1, Ordering::SeqCst);
            FaultAction::Ignore
        }
    };
    let manager =
        Arc::new(ThreadManager::new(config(ExecutionMode::MultiThread), policy).unwrap());
    let update = failing_update_thread(1);
    manager.add(&update).unwrap();

    let stopper = {
        let manager = manager.clone();
        let decisions = decisions.clone();
        thread::spawn(move || {
            wait_until(Duration::from_secs(2), || decisions.load(Ordering::SeqCst) >= 3);
            manager.stop()
        })
    };
    manager.run().unwrap();
    stopper.join().unwrap().unwrap();
    assert!(decisions.load(Ordering::SeqCst) >= 3);
    assert_eq!(update.state(), ThreadState::Exited);
}

// ─────────────────────────────────────────────────────────────────────────────
// Unobserved background faults
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_background_faults_reach_the_policy() {
    init_logging();
    let (seen_tx, seen_rx) = crossbeam_channel::unbounded();
    let policy = move |fault: &Fault| {
        let _ = seen_tx.send((fault.origin().clone(), fault.message()));
        FaultAction::Log
    };
    let manager = ThreadManager::new(SchedulerConfig::default(), policy).unwrap();

    let loader = manager
        .spawn_background("asset-loader", || anyhow::bail!("missing texture"))
        .unwrap();
    loader.join().unwrap();
    manager
        .fault_reporter()
        .report_error("audio", anyhow::anyhow!("buffer underrun"));

    let first = seen_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(
        first,
        (
            FaultOrigin::Unobserved {
                task: "asset-loader".to_string()
            },
            "missing texture".to_string()
        )
    );
    let second = seen_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(second.1, "buffer underrun");
}

#[test]
fn test_background_panic_escalates_when_configured() {
    init_logging();
    let config = SchedulerConfig {
        abort_on_unobserved: true,
        escalation_timeout_ms: 5_000,
        ..config(ExecutionMode::MultiThread)
    };
    let manager = ThreadManager::with_config(config).unwrap();
    let loader = manager
        .spawn_background("streamer", || panic!("decoder crashed"))
        .unwrap();

    let Err(ThreadingError::Fault(fault)) = manager.run() else {
        panic!("run should abort");
    };
    assert!(fault.is_panic());
    assert_eq!(
        fault.origin(),
        &FaultOrigin::Unobserved {
            task: "streamer".to_string()
        }
    );
    loader.join().unwrap();
}

#[test]
fn test_background_faults_are_only_logged_by_default() {
    init_logging();
    let manager = Arc::new(ThreadManager::with_config(config(ExecutionMode::MultiThread)).unwrap());
    manager
        .spawn_background("telemetry", || anyhow::bail!("socket closed"))
        .unwrap()
        .join()
        .unwrap();

    let stopper = {
        let manager = manager.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            manager.stop()
        })
    };
    manager.run().unwrap();
    stopper.join().unwrap().unwrap();
}
