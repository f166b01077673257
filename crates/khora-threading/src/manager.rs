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

//! The thread manager: owns the managed threads, applies the execution mode
//! and drives the frame loop.

use crate::config::{validate_rate, ExecutionMode, SchedulerConfig};
use crate::error::{Result, ThreadingError};
use crate::fault::{DefaultFaultPolicy, FaultBridge, FaultPolicy, FaultReporter};
use crate::locking::{lock, ThreadMark};
use crate::sync_context::SyncContext;
use crate::thread::{FrameOutcome, ManagedThread, ThreadClass, ThreadState, ThreadStats};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// Back-off of the loop while the main thread is not running.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

struct Rates {
    update: f64,
    render: f64,
    main: Option<f64>,
}

impl Rates {
    fn for_class(&self, class: ThreadClass) -> f64 {
        match class {
            ThreadClass::Update => self.update,
            ThreadClass::Render => self.render,
            ThreadClass::Main => self.main.unwrap_or(self.update),
        }
    }
}

/// Owns the main thread and every secondary managed thread.
///
/// [`run`](ThreadManager::run) blocks the calling OS thread, which becomes the
/// main thread's driver. Each iteration applies a pending execution mode
/// change, advances the main thread one frame and, in
/// [`ExecutionMode::SingleThread`], advances every secondary thread once.
/// In [`ExecutionMode::MultiThread`] secondaries free-run on their own OS
/// threads.
///
/// Unhandled faults from any thread go through the [`FaultPolicy`] given at
/// construction; an abort ends `run` with [`ThreadingError::Fault`].
pub struct ThreadManager {
    config: SchedulerConfig,
    main: Arc<ManagedThread>,
    threads: Mutex<Vec<Arc<ManagedThread>>>,
    // Held by add/remove, the single-threaded sweep and the restart phase of
    // a mode switch.
    membership: Mutex<()>,
    requested_mode: Mutex<ExecutionMode>,
    active_mode: Mutex<Option<ExecutionMode>>,
    mode_dirty: AtomicBool,
    rates: Mutex<Rates>,
    cancel: AtomicBool,
    running: AtomicBool,
    sweeping_on: Mutex<Option<ThreadId>>,
    bridge: Arc<FaultBridge>,
}

impl ThreadManager {
    /// Creates a manager with zero secondary threads.
    ///
    /// ## Arguments
    /// * `config` - Rates, initial execution mode and timeouts.
    /// * `policy` - The single decision point for unhandled faults.
    ///
    /// ## Errors
    /// Returns an error if `config` fails validation.
    pub fn new(config: SchedulerConfig, policy: impl FaultPolicy + 'static) -> Result<Self> {
        config.validate()?;

        let rates = Rates {
            update: config.update_per_second,
            render: config.frames_per_second,
            main: config.main_per_second,
        };
        let main = ManagedThread::new("main", ThreadClass::Main);
        main.set_updates_per_second(rates.for_class(ThreadClass::Main))?;
        main.set_transition_timeout(config.shutdown_timeout());

        let bridge = Arc::new(FaultBridge::new(
            Box::new(policy),
            Arc::clone(&main),
            config.escalation_timeout(),
        ));
        main.attach_fault_route(FaultReporter::new(Arc::clone(&bridge)));

        log::debug!(
            "Thread manager created ({:?}, update {} Hz, render {} Hz).",
            config.execution_mode,
            rates.update,
            rates.render
        );

        Ok(Self {
            requested_mode: Mutex::new(config.execution_mode),
            config,
            main,
            threads: Mutex::new(Vec::new()),
            membership: Mutex::new(()),
            active_mode: Mutex::new(None),
            mode_dirty: AtomicBool::new(true),
            rates: Mutex::new(rates),
            cancel: AtomicBool::new(false),
            running: AtomicBool::new(false),
            sweeping_on: Mutex::new(None),
            bridge,
        })
    }

    /// Creates a manager with the [`DefaultFaultPolicy`].
    pub fn with_config(config: SchedulerConfig) -> Result<Self> {
        let policy = DefaultFaultPolicy {
            abort_on_unobserved: config.abort_on_unobserved,
        };
        Self::new(config, policy)
    }

    /// The configuration the manager was created with.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The main thread, driven by [`run`](ThreadManager::run).
    pub fn main_thread(&self) -> &Arc<ManagedThread> {
        &self.main
    }

    /// Snapshot of the registered secondary threads.
    pub fn threads(&self) -> Vec<Arc<ManagedThread>> {
        lock(&self.threads).clone()
    }

    /// Stats of the main thread followed by every secondary thread.
    pub fn stats(&self) -> Vec<ThreadStats> {
        std::iter::once(self.main.stats())
            .chain(self.threads().iter().map(|thread| thread.stats()))
            .collect()
    }

    /// Returns `true` while [`run`](ThreadManager::run) is looping.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// A handle collaborators use to report faults from their own threads.
    pub fn fault_reporter(&self) -> FaultReporter {
        FaultReporter::new(Arc::clone(&self.bridge))
    }

    /// Posts `action` to the main thread.
    pub fn post<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_to(None, action)
    }

    /// Runs `action` on the main thread and waits for it.
    pub fn send<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.send_to(None, action)
    }

    /// Posts `action` to `context`, or to the main thread when `None`.
    pub fn post_to<F>(&self, context: Option<&SyncContext>, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        context.unwrap_or(self.main.sync_context()).post(action)
    }

    /// Runs `action` on `context`, or on the main thread when `None`, and
    /// waits for it.
    pub fn send_to<F>(&self, context: Option<&SyncContext>, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        context.unwrap_or(self.main.sync_context()).send(action)
    }

    /// Registers a secondary thread. Adding the same thread twice is a no-op.
    ///
    /// The thread immediately gets the rate of its class and its faults are
    /// routed to the fault policy. If the manager is running in
    /// `MultiThread` mode the thread is started right away; otherwise it stays
    /// dormant until the next mode application.
    ///
    /// ## Errors
    /// * [`ThreadingError::MainThreadImmutable`] for the main thread or any
    ///   `ThreadClass::Main` thread.
    /// * [`ThreadingError::ReentrantMutation`] from inside a single-threaded sweep.
    /// * Any error of [`ManagedThread::start`].
    pub fn add(&self, thread: &Arc<ManagedThread>) -> Result<()> {
        self.check_mutable(thread)?;
        if thread.state() == ThreadState::Exited {
            return Err(ThreadingError::InvalidTransition {
                thread: thread.name().to_string(),
                operation: "add",
                state: ThreadState::Exited,
            });
        }

        let _membership = lock(&self.membership);
        {
            let mut threads = lock(&self.threads);
            if threads.iter().any(|known| Arc::ptr_eq(known, thread)) {
                return Ok(());
            }
            threads.push(Arc::clone(thread));
        }
        // Read after registering so a concurrent rate change cannot be missed.
        let rate = lock(&self.rates).for_class(thread.class());
        thread.set_updates_per_second(rate)?;
        thread.set_transition_timeout(self.config.shutdown_timeout());
        thread.attach_fault_route(self.fault_reporter());
        log::debug!("Registered thread '{}' ({:?}).", thread.name(), thread.class());

        let multi_active = *lock(&self.active_mode) == Some(ExecutionMode::MultiThread);
        if self.is_running()
            && multi_active
            && !self.mode_dirty.load(Ordering::Acquire)
            && matches!(thread.state(), ThreadState::Idle | ThreadState::Paused)
        {
            thread.start_pumping(self.main_pump())?;
        }
        Ok(())
    }

    /// Unregisters a secondary thread and pauses it if it is running.
    ///
    /// ## Returns
    /// `true` if the thread was registered.
    ///
    /// ## Errors
    /// Same usage errors as [`add`](ThreadManager::add), or a pause timeout.
    pub fn remove(&self, thread: &Arc<ManagedThread>) -> Result<bool> {
        self.check_mutable(thread)?;
        {
            let _membership = lock(&self.membership);
            let mut threads = lock(&self.threads);
            let Some(index) = threads.iter().position(|known| Arc::ptr_eq(known, thread)) else {
                return Ok(false);
            };
            threads.remove(index);
        }
        thread.detach_fault_route();
        log::debug!("Unregistered thread '{}'.", thread.name());

        if thread.state() == ThreadState::Running {
            match thread.pause_pumping(thread.transition_timeout(), self.main_pump()) {
                Ok(()) | Err(ThreadingError::InvalidTransition { .. }) => {}
                Err(error) => return Err(error),
            }
        }
        Ok(true)
    }

    /// Requested execution mode. It becomes active at the start of the next
    /// iteration of [`run`](ThreadManager::run).
    pub fn execution_mode(&self) -> ExecutionMode {
        *lock(&self.requested_mode)
    }

    /// The mode the loop currently runs in, `None` before the first
    /// iteration or while a switch is in progress.
    pub fn active_execution_mode(&self) -> Option<ExecutionMode> {
        *lock(&self.active_mode)
    }

    /// Requests a new execution mode. No-op when unchanged.
    pub fn set_execution_mode(&self, mode: ExecutionMode) {
        let mut requested = lock(&self.requested_mode);
        if *requested != mode {
            log::info!("Execution mode change requested: {:?} -> {mode:?}.", *requested);
            *requested = mode;
            self.mode_dirty.store(true, Ordering::Release);
        }
    }

    /// Rate of update-class threads in Hz.
    pub fn update_per_second(&self) -> f64 {
        lock(&self.rates).update
    }

    /// Rate of render-class threads in Hz.
    pub fn frames_per_second(&self) -> f64 {
        lock(&self.rates).render
    }

    /// Effective rate of the main thread in Hz.
    pub fn main_per_second(&self) -> f64 {
        lock(&self.rates).for_class(ThreadClass::Main)
    }

    /// Sets the rate of update-class threads and republishes it to every
    /// registered one. The main thread follows unless it has its own rate.
    pub fn set_update_per_second(&self, hz: f64) -> Result<()> {
        validate_rate(hz)?;
        let main_follows = {
            let mut rates = lock(&self.rates);
            if rates.update == hz {
                return Ok(());
            }
            rates.update = hz;
            rates.main.is_none()
        };
        self.republish(ThreadClass::Update, hz)?;
        if main_follows {
            self.main.set_updates_per_second(hz)?;
        }
        Ok(())
    }

    /// Sets the rate of render-class threads and republishes it to every
    /// registered one.
    pub fn set_frames_per_second(&self, hz: f64) -> Result<()> {
        validate_rate(hz)?;
        {
            let mut rates = lock(&self.rates);
            if rates.render == hz {
                return Ok(());
            }
            rates.render = hz;
        }
        self.republish(ThreadClass::Render, hz)
    }

    /// Gives the main thread its own rate, or makes it follow the update rate
    /// again with `None`.
    pub fn set_main_per_second(&self, hz: Option<f64>) -> Result<()> {
        if let Some(hz) = hz {
            validate_rate(hz)?;
        }
        let effective = {
            let mut rates = lock(&self.rates);
            if rates.main == hz {
                return Ok(());
            }
            rates.main = hz;
            rates.for_class(ThreadClass::Main)
        };
        self.main.set_updates_per_second(effective)
    }

    /// Runs the frame loop on the calling OS thread until
    /// [`stop`](ThreadManager::stop) is called or the main thread exits.
    ///
    /// Once cancelled, the loop completes the shutdown itself: it keeps the
    /// main queue moving until every thread has exited.
    ///
    /// ## Errors
    /// * [`ThreadingError::AlreadyRunning`] if the loop is already running.
    /// * [`ThreadingError::Disposed`] after the manager was stopped.
    /// * [`ThreadingError::Fault`] when the fault policy aborts; the fault
    ///   keeps the original error or panic payload.
    /// * Errors from starting threads during a mode switch.
    pub fn run(&self) -> Result<()> {
        if self.main.state() == ThreadState::Exited {
            return Err(ThreadingError::Disposed);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ThreadingError::AlreadyRunning);
        }
        let _running = RunningFlag(&self.running);
        log::info!("Thread manager running.");

        let result = loop {
            if self.cancel.load(Ordering::Acquire) {
                break Ok(());
            }
            if self.mode_dirty.load(Ordering::Acquire) {
                if let Err(error) = self.apply_execution_mode() {
                    break Err(error);
                }
            }

            match self.main.run_single_frame() {
                Ok(FrameOutcome::Exited) => break Ok(()),
                Ok(FrameOutcome::Inactive | FrameOutcome::Paused) => thread::sleep(IDLE_BACKOFF),
                Ok(FrameOutcome::Advanced) => {}
                Err(fault) => {
                    if let Some(fault) = self.bridge.resolve_main_fault(fault) {
                        break Err(ThreadingError::Fault(fault));
                    }
                }
            }

            if self.active_execution_mode() == Some(ExecutionMode::SingleThread) {
                self.sweep();
            }
        };

        let result = if self.cancel.load(Ordering::Acquire) {
            // Finish the shutdown here so the main queue keeps being pumped
            // while secondaries wind down.
            result.and_then(|()| self.stop())
        } else {
            result
        };
        match &result {
            Ok(()) => log::info!("Thread manager loop ended."),
            Err(error) => log::error!("Thread manager loop aborted: {error}"),
        }
        result
    }

    /// Requests cancellation and brings every thread, the main thread last,
    /// to `Exited`. Each wait is bounded by the configured shutdown timeout.
    ///
    /// ## Errors
    /// The first failure, typically [`ThreadingError::Timeout`]. A timeout is
    /// fatal: the thread is left running and the process is expected to
    /// terminate.
    pub fn stop(&self) -> Result<()> {
        self.cancel.store(true, Ordering::Release);
        let timeout = self.config.shutdown_timeout();
        let pump = self.main_pump();

        let mut first_error = None;
        for thread in self.threads().iter().chain(std::iter::once(&self.main)) {
            if let Err(error) = thread.shutdown(timeout, pump) {
                log::error!("Failed to stop thread '{}': {error}", thread.name());
                first_error.get_or_insert(error);
            }
        }
        log::info!("Thread manager stopped.");
        first_error.map_or(Ok(()), Err)
    }

    /// Runs `job` on a detached OS thread. Nobody awaits it: an error or
    /// panic is reported to the fault policy as an unobserved fault.
    pub fn spawn_background<F>(&self, name: impl Into<String>, job: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let name = name.into();
        let task = name.clone();
        let reporter = self.fault_reporter();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(Ok(())) => log::debug!("Background task '{task}' finished."),
                Ok(Err(error)) => reporter.report_error(task, error),
                Err(payload) => reporter.report_panic(task, payload),
            })
            .map_err(|source| ThreadingError::Spawn {
                thread: name,
                source,
            })
    }

    fn check_mutable(&self, thread: &Arc<ManagedThread>) -> Result<()> {
        if Arc::ptr_eq(thread, &self.main) || thread.class() == ThreadClass::Main {
            return Err(ThreadingError::MainThreadImmutable);
        }
        if ThreadMark::is_held_here(&self.sweeping_on) {
            return Err(ThreadingError::ReentrantMutation);
        }
        Ok(())
    }

    fn republish(&self, class: ThreadClass, hz: f64) -> Result<()> {
        for thread in self.threads() {
            if thread.class() == class {
                thread.set_updates_per_second(hz)?;
            }
        }
        Ok(())
    }

    // While the driver waits on other threads it keeps the main queue moving,
    // so a detached thread blocked in `send` to main can reach its boundary.
    fn main_pump(&self) -> Option<&SyncContext> {
        let context = self.main.sync_context();
        context.is_current().then_some(context)
    }

    fn apply_execution_mode(&self) -> Result<()> {
        {
            let _membership = lock(&self.membership);
            self.mode_dirty.store(false, Ordering::Release);
            *lock(&self.active_mode) = None;
        }
        let mode = self.execution_mode();
        log::info!("Applying execution mode {mode:?}.");

        // Rendezvous: nothing restarts until every thread is suspended.
        let timeout = self.config.shutdown_timeout();
        let pump = self.main_pump();
        for thread in self.threads() {
            Self::pause_if_running(&thread, timeout, pump)?;
        }
        Self::pause_if_running(&self.main, timeout, None)?;

        // The driver keeps serving main while secondaries restart, so setup
        // hooks may `send` to it.
        let main_context = self.main.sync_context();
        main_context.bind_current();
        {
            let _membership = lock(&self.membership);
            *lock(&self.active_mode) = Some(mode);
            self.bridge
                .set_single_threaded(mode == ExecutionMode::SingleThread);
            for thread in self.threads() {
                if !matches!(thread.state(), ThreadState::Idle | ThreadState::Paused) {
                    continue;
                }
                match mode {
                    ExecutionMode::MultiThread => thread.start_pumping(Some(main_context))?,
                    ExecutionMode::SingleThread => thread.initialize()?,
                }
            }
        }

        if matches!(self.main.state(), ThreadState::Idle | ThreadState::Paused) {
            self.main.initialize()?;
        }
        Ok(())
    }

    fn pause_if_running(
        thread: &ManagedThread,
        timeout: Duration,
        pump: Option<&SyncContext>,
    ) -> Result<()> {
        if thread.state() != ThreadState::Running {
            return Ok(());
        }
        match thread.pause_pumping(timeout, pump) {
            // It suspended on its own in the meantime.
            Ok(()) | Err(ThreadingError::InvalidTransition { .. }) => Ok(()),
            Err(error) => Err(error),
        }
    }

    fn sweep(&self) {
        let _membership = lock(&self.membership);
        let _sweeping = ThreadMark::enter(&self.sweeping_on);
        for thread in self.threads() {
            if let Err(fault) = thread.run_single_frame() {
                thread.route_fault(fault);
            }
        }
    }
}

impl Drop for ThreadManager {
    fn drop(&mut self) {
        let all_exited = std::iter::once(&self.main)
            .chain(lock(&self.threads).iter())
            .all(|thread| thread.state() == ThreadState::Exited);
        if !all_exited {
            if let Err(error) = self.stop() {
                log::error!("Thread manager shutdown failed: {error}");
            }
        }
    }
}

struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
