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

use super::{FrameContext, FrameOutcome, ThreadClass, ThreadState, ThreadStats};
use crate::config::validate_rate;
use crate::error::{Result, ThreadingError};
use crate::fault::{Fault, FaultOrigin, FaultReporter};
use crate::locking::{lock, wait_timeout, ThreadMark};
use crate::sync_context::SyncContext;
use crossbeam_channel::{RecvTimeoutError, Sender};
use khora_core::Stopwatch;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

type FrameHandler = Box<dyn FnMut(&FrameContext<'_>) -> anyhow::Result<()> + Send>;
type SetupHook = Box<dyn FnMut() -> anyhow::Result<()> + Send>;
type ThreadObserver = Arc<dyn Fn(&ManagedThread) + Send + Sync>;
type SuspendObserver = Arc<dyn Fn(&ManagedThread, ThreadState) + Send + Sync>;
type FaultObserver = Arc<dyn Fn(&ManagedThread, &Fault) + Send + Sync>;

const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(30);
const PUMP_SLICE: Duration = Duration::from_millis(2);

#[derive(Default)]
struct Observers {
    running: Vec<ThreadObserver>,
    suspend: Vec<SuspendObserver>,
    exit: Vec<ThreadObserver>,
    fault: Vec<FaultObserver>,
}

struct FrameClock {
    stopwatch: Stopwatch,
    frame: u64,
}

#[derive(Default)]
struct Counters {
    frames: u64,
    overruns: u64,
    faults: u64,
    last_frame: Duration,
}

/// One logical game thread (main, update, render).
///
/// A managed thread owns a [`SyncContext`] for its whole life and a list of
/// frame handlers invoked once per frame. It runs either detached on its own
/// OS thread ([`ManagedThread::start`]) or multiplexed, advanced by whoever
/// calls [`ManagedThread::run_single_frame`] after
/// [`ManagedThread::initialize`].
///
/// State changes requested with [`pause`](ManagedThread::pause) and
/// [`stop`](ManagedThread::stop) are consumed at the next frame boundary,
/// never mid-frame. A stop requested together with a pause wins.
pub struct ManagedThread {
    name: String,
    class: ThreadClass,
    sync: SyncContext,
    state: Mutex<ThreadState>,
    state_changed: Condvar,
    pending_pause: AtomicBool,
    pending_exit: AtomicBool,
    rate_bits: AtomicU64,
    propagate_faults: AtomicBool,
    transition_timeout_ms: AtomicU64,
    // Serializes frames, initialization and retirement.
    frame: Mutex<FrameClock>,
    executing_on: Mutex<Option<ThreadId>>,
    os_thread: Mutex<Option<JoinHandle<()>>>,
    exit_notified: AtomicBool,
    handlers: Mutex<Vec<FrameHandler>>,
    setup_hooks: Mutex<Vec<SetupHook>>,
    observers: Mutex<Observers>,
    fault_route: Mutex<Option<FaultReporter>>,
    counters: Mutex<Counters>,
}

impl ManagedThread {
    /// Creates an `Idle`, unthrottled thread.
    ///
    /// ## Arguments
    /// * `name` - Used for diagnostics and as the OS thread name.
    /// * `class` - Selects which manager rate applies once the thread is added.
    pub fn new(name: impl Into<String>, class: ThreadClass) -> Arc<Self> {
        let name = name.into();
        Arc::new(Self {
            sync: SyncContext::for_thread(&name, class == ThreadClass::Main),
            name,
            class,
            state: Mutex::new(ThreadState::Idle),
            state_changed: Condvar::new(),
            pending_pause: AtomicBool::new(false),
            pending_exit: AtomicBool::new(false),
            rate_bits: AtomicU64::new(0f64.to_bits()),
            propagate_faults: AtomicBool::new(false),
            transition_timeout_ms: AtomicU64::new(DEFAULT_TRANSITION_TIMEOUT.as_millis() as u64),
            frame: Mutex::new(FrameClock {
                stopwatch: Stopwatch::stopped(),
                frame: 0,
            }),
            executing_on: Mutex::new(None),
            os_thread: Mutex::new(None),
            exit_notified: AtomicBool::new(false),
            handlers: Mutex::new(Vec::new()),
            setup_hooks: Mutex::new(Vec::new()),
            observers: Mutex::new(Observers::default()),
            fault_route: Mutex::new(None),
            counters: Mutex::new(Counters::default()),
        })
    }

    /// Name of the thread.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class of the thread.
    pub fn class(&self) -> ThreadClass {
        self.class
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ThreadState {
        *lock(&self.state)
    }

    /// The thread's synchronization context.
    pub fn sync_context(&self) -> &SyncContext {
        &self.sync
    }

    /// Returns `true` while the thread runs on its own OS thread.
    pub fn is_detached(&self) -> bool {
        lock(&self.os_thread).is_some()
    }

    /// Registers a handler invoked once per frame, in registration order.
    ///
    /// An error or panic from a handler skips the remaining handlers of that
    /// frame and is handled as a frame fault.
    pub fn on_new_frame<F>(&self, handler: F)
    where
        F: FnMut(&FrameContext<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        lock(&self.handlers).push(Box::new(handler));
    }

    /// Registers a hook run once, on the thread's own OS thread when detached,
    /// the first time it leaves `Idle`.
    pub fn on_setup<F>(&self, hook: F)
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        lock(&self.setup_hooks).push(Box::new(hook));
    }

    /// Observes every transition to `Running`.
    pub fn on_running<F>(&self, observer: F)
    where
        F: Fn(&ManagedThread) + Send + Sync + 'static,
    {
        lock(&self.observers).running.push(Arc::new(observer));
    }

    /// Observes every suspension, just before the state changes to the given
    /// target (`Paused` or `Exited`).
    pub fn on_suspend<F>(&self, observer: F)
    where
        F: Fn(&ManagedThread, ThreadState) + Send + Sync + 'static,
    {
        lock(&self.observers).suspend.push(Arc::new(observer));
    }

    /// Observes the transition to `Exited`. Fires exactly once.
    pub fn on_exit<F>(&self, observer: F)
    where
        F: Fn(&ManagedThread) + Send + Sync + 'static,
    {
        lock(&self.observers).exit.push(Arc::new(observer));
    }

    /// Observes every fault caught in a frame handler or work item of this
    /// thread, whether or not it is propagated.
    pub fn on_unhandled_fault<F>(&self, observer: F)
    where
        F: Fn(&ManagedThread, &Fault) + Send + Sync + 'static,
    {
        lock(&self.observers).fault.push(Arc::new(observer));
    }

    /// Posts `action` to this thread's synchronization context.
    pub fn post<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sync.post(action)
    }

    /// Runs `action` on this thread and waits for it. See [`SyncContext::send`].
    pub fn send<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sync.send(action)
    }

    /// Sets the target frequency in Hz. `0.0` means unthrottled.
    ///
    /// ## Errors
    /// [`ThreadingError::InvalidRate`] for negative, NaN or infinite values.
    pub fn set_updates_per_second(&self, hz: f64) -> Result<()> {
        validate_rate(hz)?;
        let previous = self.rate_bits.swap(hz.to_bits(), Ordering::AcqRel);
        if previous != hz.to_bits() {
            log::debug!("Thread '{}' now targets {hz} Hz.", self.name);
        }
        Ok(())
    }

    /// Target frequency in Hz, `0.0` when unthrottled.
    pub fn updates_per_second(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Acquire))
    }

    /// Target period, `None` when unthrottled.
    pub fn period(&self) -> Option<Duration> {
        let hz = self.updates_per_second();
        (hz > 0.0).then(|| Duration::try_from_secs_f64(1.0 / hz).unwrap_or(Duration::MAX))
    }

    /// When `true`, frame faults are returned from
    /// [`run_single_frame`](ManagedThread::run_single_frame) and routed to
    /// the fault policy. When `false` (the default) they are logged and the
    /// thread keeps running. Fault observers fire either way.
    pub fn set_propagate_faults(&self, propagate: bool) {
        self.propagate_faults.store(propagate, Ordering::Release);
    }

    /// See [`set_propagate_faults`](ManagedThread::set_propagate_faults).
    pub fn propagate_faults(&self) -> bool {
        self.propagate_faults.load(Ordering::Acquire)
    }

    /// Bound for blocking transitions (`start`, `pause`). Defaults to 30 seconds.
    pub fn set_transition_timeout(&self, timeout: Duration) {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.transition_timeout_ms.store(millis, Ordering::Release);
    }

    /// See [`set_transition_timeout`](ManagedThread::set_transition_timeout).
    pub fn transition_timeout(&self) -> Duration {
        Duration::from_millis(self.transition_timeout_ms.load(Ordering::Acquire))
    }

    /// Snapshot of the frame counters.
    pub fn stats(&self) -> ThreadStats {
        let counters = lock(&self.counters);
        ThreadStats {
            name: self.name.clone(),
            class: self.class,
            state: self.state(),
            frames: counters.frames,
            overruns: counters.overruns,
            faults: counters.faults,
            last_frame: counters.last_frame,
            period: self.period(),
        }
    }

    /// Starts the thread on a dedicated OS thread and blocks until it reports
    /// `Running`, bounded by the transition timeout.
    ///
    /// ## Errors
    /// * [`ThreadingError::InvalidTransition`] unless `Idle` or `Paused`, or
    ///   if an OS thread is still attached.
    /// * [`ThreadingError::Setup`] if a setup hook failed.
    /// * [`ThreadingError::Timeout`] if the thread did not report in time.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        self.start_pumping(None)
    }

    /// [`start`](ManagedThread::start), draining `pump` while waiting so a
    /// setup hook may `send` to the caller's own context.
    pub(crate) fn start_pumping(self: &Arc<Self>, pump: Option<&SyncContext>) -> Result<()> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        {
            let mut os_thread = lock(&self.os_thread);
            let state = self.state();
            if os_thread.is_some() {
                return Err(self.invalid("start", ThreadState::Running));
            }
            if !matches!(state, ThreadState::Idle | ThreadState::Paused) {
                return Err(self.invalid("start", state));
            }

            let this = Arc::clone(self);
            let handle = thread::Builder::new()
                .name(self.name.clone())
                .spawn(move || this.run_detached(ready_tx))
                .map_err(|source| ThreadingError::Spawn {
                    thread: self.name.clone(),
                    source,
                })?;
            *os_thread = Some(handle);
        }

        let timeout = self.transition_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pump) = pump {
                pump.pump();
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let slice = match pump {
                Some(_) => remaining.min(PUMP_SLICE),
                None => remaining,
            };
            match ready_rx.recv_timeout(slice) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) if Instant::now() < deadline => {}
                Err(RecvTimeoutError::Timeout) => {
                    return Err(ThreadingError::Timeout {
                        thread: self.name.clone(),
                        operation: "start",
                        timeout,
                    })
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ThreadingError::Setup {
                        thread: self.name.clone(),
                        source: anyhow::anyhow!("thread terminated before reporting its state"),
                    })
                }
            }
        }
    }

    /// Transitions `Idle`/`Paused` to `Running` on the calling OS thread.
    ///
    /// Runs the setup hooks when leaving `Idle`, restarts the pacing
    /// stopwatch and binds the synchronization context to the caller. The
    /// caller then advances the thread with
    /// [`run_single_frame`](ManagedThread::run_single_frame).
    ///
    /// ## Errors
    /// * [`ThreadingError::InvalidTransition`] unless `Idle` or `Paused`.
    /// * [`ThreadingError::Setup`] if a setup hook failed; the thread stays `Idle`.
    pub fn initialize(&self) -> Result<()> {
        if self.is_executing_here() {
            return Err(self.invalid("initialize", ThreadState::Running));
        }
        let mut clock = lock(&self.frame);
        let state = self.state();
        match state {
            ThreadState::Idle => self.run_setup_hooks()?,
            ThreadState::Paused => {}
            _ => return Err(self.invalid("initialize", state)),
        }

        self.pending_pause.store(false, Ordering::Release);
        clock.stopwatch.restart();
        self.sync.bind_current();
        self.set_state(ThreadState::Running);
        drop(clock);

        log::debug!("Thread '{}' is running ({state:?} -> Running).", self.name);
        let observers = lock(&self.observers).running.clone();
        for observer in observers {
            observer(self);
        }
        Ok(())
    }

    /// Requests a pause at the next frame boundary and waits for `Paused`.
    ///
    /// A multiplexed thread is advanced inline by the caller until it
    /// suspends. Called from the thread's own frame, only the request is
    /// recorded.
    ///
    /// ## Errors
    /// * [`ThreadingError::InvalidTransition`] unless `Running`.
    /// * [`ThreadingError::Timeout`] if a detached thread does not suspend in time.
    pub fn pause(&self) -> Result<()> {
        self.pause_pumping(self.transition_timeout(), None)
    }

    /// Requests an exit at the next frame boundary. Does not wait; see
    /// [`join`](ManagedThread::join).
    ///
    /// ## Errors
    /// [`ThreadingError::InvalidTransition`] unless `Running`.
    pub fn stop(&self) -> Result<()> {
        let state = self.state();
        if state != ThreadState::Running {
            return Err(self.invalid("stop", state));
        }
        self.request_exit();
        Ok(())
    }

    /// Waits until the thread is `Exited`.
    ///
    /// ## Errors
    /// * [`ThreadingError::InvalidTransition`] if the thread is `Idle` or
    ///   `Paused`, or when called from its own frame.
    /// * [`ThreadingError::Timeout`] if it did not exit in time.
    pub fn join(&self, timeout: Duration) -> Result<()> {
        match self.state() {
            ThreadState::Exited => Ok(()),
            ThreadState::Running if !self.is_executing_here() => {
                self.await_state(ThreadState::Exited, "exit", timeout, None)
            }
            state => Err(self.invalid("join", state)),
        }
    }

    /// Advances the thread by one frame.
    ///
    /// Binds the synchronization context, then consumes a pending exit or
    /// pause (exit first). Otherwise runs the frame handlers, drains the
    /// synchronization context and sleeps the rest of the period, measured
    /// from the start of this frame so an overrun is never made up later.
    ///
    /// ## Returns
    /// What the frame did, or the fault to hand to the fault policy when
    /// faults propagate.
    pub fn run_single_frame(&self) -> std::result::Result<FrameOutcome, Fault> {
        let mut clock = lock(&self.frame);
        if self.state() != ThreadState::Running {
            return Ok(FrameOutcome::Inactive);
        }
        let _executing = ThreadMark::enter(&self.executing_on);
        self.sync.bind_current();

        if self.pending_exit.load(Ordering::Acquire) {
            self.suspend(ThreadState::Exited);
            return Ok(FrameOutcome::Exited);
        }
        if self.pending_pause.swap(false, Ordering::AcqRel) {
            self.suspend(ThreadState::Paused);
            return Ok(FrameOutcome::Paused);
        }

        let delta = clock.stopwatch.lap();
        clock.frame += 1;
        let period = self.period();
        let frame = FrameContext::new(self, clock.frame, delta, period);

        let busy = Stopwatch::new();
        let mut fault = self.invoke_handlers(&frame);
        if let Err(queued) = self.sync.do_work() {
            fault = Some(match fault {
                Some(first) if !queued.is_escalated() => {
                    log::error!("Additional {queued}");
                    first
                }
                _ => queued,
            });
        }
        let busy = busy.elapsed().unwrap_or_default();

        let overrun = period.is_some_and(|period| busy > period);
        {
            let mut counters = lock(&self.counters);
            counters.frames += 1;
            counters.last_frame = busy;
            counters.overruns += u64::from(overrun);
        }
        match period {
            Some(period) if !overrun => thread::sleep(period - busy),
            Some(period) => log::trace!(
                "Thread '{}' overran its period: {busy:?} > {period:?}",
                self.name
            ),
            None => {}
        }

        match fault {
            Some(fault) => self.handle_fault(fault),
            None => Ok(FrameOutcome::Advanced),
        }
    }

    pub(crate) fn request_pause(&self) {
        self.pending_pause.store(true, Ordering::Release);
    }

    pub(crate) fn request_exit(&self) {
        self.pending_exit.store(true, Ordering::Release);
    }

    pub(crate) fn attach_fault_route(&self, reporter: FaultReporter) {
        *lock(&self.fault_route) = Some(reporter);
    }

    pub(crate) fn detach_fault_route(&self) {
        lock(&self.fault_route).take();
    }

    /// Hands a fault returned by `run_single_frame` to the fault policy.
    pub(crate) fn route_fault(&self, fault: Fault) {
        let route = lock(&self.fault_route).clone();
        match route {
            Some(route) => route.report(fault),
            None => log::error!("Unhandled {fault} (no fault policy attached)"),
        }
    }

    /// Pauses like [`pause`](ManagedThread::pause), pumping `pump` while
    /// waiting so its owner cannot be starved by the thread being paused.
    pub(crate) fn pause_pumping(&self, timeout: Duration, pump: Option<&SyncContext>) -> Result<()> {
        let state = self.state();
        if state != ThreadState::Running {
            return Err(self.invalid("pause", state));
        }
        self.request_pause();
        if self.is_executing_here() {
            return Ok(());
        }
        self.await_state(ThreadState::Paused, "pause", timeout, pump)
    }

    /// Drives the thread to `Exited` from any state. A thread that is not
    /// running is retired directly; a running one is stopped and awaited.
    pub(crate) fn shutdown(&self, timeout: Duration, pump: Option<&SyncContext>) -> Result<()> {
        loop {
            match self.state() {
                ThreadState::Exited => return Ok(()),
                ThreadState::Idle | ThreadState::Paused => {
                    if self.retire() {
                        return Ok(());
                    }
                }
                ThreadState::Running => {
                    self.request_exit();
                    if self.is_executing_here() {
                        return Ok(());
                    }
                    return self.await_state(ThreadState::Exited, "exit", timeout, pump);
                }
            }
        }
    }

    fn retire(&self) -> bool {
        let _clock = lock(&self.frame);
        match self.state() {
            ThreadState::Idle | ThreadState::Paused => {
                self.suspend(ThreadState::Exited);
                true
            }
            ThreadState::Exited => true,
            ThreadState::Running => false,
        }
    }

    fn run_detached(self: Arc<Self>, ready: Sender<Result<()>>) {
        let initialized = self.initialize();
        let failed = initialized.is_err();
        if failed {
            self.release_os_thread();
        }
        // The starter may have given up waiting.
        let _ = ready.send(initialized);
        if failed {
            return;
        }

        log::info!("Thread '{}' started.", self.name);
        let outcome = loop {
            match self.run_single_frame() {
                Ok(FrameOutcome::Advanced) => {}
                Ok(outcome) => break outcome,
                Err(fault) => self.route_fault(fault),
            }
        };
        self.release_os_thread();
        log::info!("Thread '{}' left its OS thread ({outcome:?}).", self.name);
    }

    // Drops the handle only if it belongs to the calling OS thread.
    fn release_os_thread(&self) {
        let mut os_thread = lock(&self.os_thread);
        if os_thread
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id())
        {
            os_thread.take();
        }
    }

    fn await_state(
        &self,
        target: ThreadState,
        operation: &'static str,
        timeout: Duration,
        pump: Option<&SyncContext>,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.state();
            if state == target || state == ThreadState::Exited {
                return Ok(());
            }
            if state != ThreadState::Running {
                return Err(self.invalid(operation, state));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ThreadingError::Timeout {
                    thread: self.name.clone(),
                    operation,
                    timeout,
                });
            }
            if !self.is_detached() {
                // Multiplexed: consume the request by advancing the thread here.
                if let Err(fault) = self.run_single_frame() {
                    self.route_fault(fault);
                }
                continue;
            }

            if let Some(pump) = pump {
                pump.pump();
            }
            let mut slice = deadline - now;
            if pump.is_some() {
                slice = slice.min(PUMP_SLICE);
            }
            let state = lock(&self.state);
            if *state == ThreadState::Running {
                drop(wait_timeout(&self.state_changed, state, slice));
            }
        }
    }

    fn suspend(&self, target: ThreadState) {
        self.sync.unbind();
        // Dropping the handle detaches the OS thread; it leaves its loop
        // right after this frame.
        lock(&self.os_thread).take();

        let suspend_observers = lock(&self.observers).suspend.clone();
        for observer in suspend_observers {
            observer(self, target);
        }

        self.pending_pause.store(false, Ordering::Release);
        self.set_state(target);
        log::debug!("Thread '{}' is now {target:?}.", self.name);

        if target == ThreadState::Exited && !self.exit_notified.swap(true, Ordering::AcqRel) {
            let exit_observers = lock(&self.observers).exit.clone();
            for observer in exit_observers {
                observer(self);
            }
            let abandoned = self.sync.close();
            if abandoned > 0 {
                log::warn!(
                    "Thread '{}' exited with {abandoned} unprocessed work item(s).",
                    self.name
                );
            }
        }
    }

    fn invoke_handlers(&self, frame: &FrameContext<'_>) -> Option<Fault> {
        let mut handlers = std::mem::take(&mut *lock(&self.handlers));
        let mut fault = None;
        for handler in handlers.iter_mut() {
            let caught = match panic::catch_unwind(AssertUnwindSafe(|| handler(frame))) {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => Fault::from_error(self.origin(), error),
                Err(payload) => Fault::from_panic(self.origin(), payload),
            };
            fault = Some(caught);
            break;
        }

        // Handlers registered during the frame landed in the emptied list.
        let mut slot = lock(&self.handlers);
        let added = std::mem::replace(&mut *slot, handlers);
        slot.extend(added);
        fault
    }

    fn handle_fault(&self, fault: Fault) -> std::result::Result<FrameOutcome, Fault> {
        lock(&self.counters).faults += 1;
        if fault.is_escalated() {
            return Err(fault);
        }

        let observers = lock(&self.observers).fault.clone();
        for observer in observers {
            observer(self, &fault);
        }
        if self.propagate_faults() {
            Err(fault)
        } else {
            log::error!("Unhandled {fault}; thread '{}' keeps running.", self.name);
            Ok(FrameOutcome::Advanced)
        }
    }

    fn run_setup_hooks(&self) -> Result<()> {
        let mut hooks = lock(&self.setup_hooks);
        for hook in hooks.iter_mut() {
            let result = match panic::catch_unwind(AssertUnwindSafe(|| hook())) {
                Ok(result) => result,
                Err(payload) => Err(anyhow::anyhow!(
                    "setup hook panicked: {}",
                    Fault::from_panic(self.origin(), payload).message()
                )),
            };
            result.map_err(|source| ThreadingError::Setup {
                thread: self.name.clone(),
                source,
            })?;
        }
        Ok(())
    }

    fn set_state(&self, state: ThreadState) {
        *lock(&self.state) = state;
        self.state_changed.notify_all();
    }

    fn is_executing_here(&self) -> bool {
        ThreadMark::is_held_here(&self.executing_on)
    }

    fn origin(&self) -> FaultOrigin {
        FaultOrigin::Thread {
            name: self.name.clone(),
            main: self.class == ThreadClass::Main,
        }
    }

    fn invalid(&self, operation: &'static str, state: ThreadState) -> ThreadingError {
        ThreadingError::InvalidTransition {
            thread: self.name.clone(),
            operation,
            state,
        }
    }
}

impl fmt::Debug for ManagedThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedThread")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("state", &self.state())
            .field("updates_per_second", &self.updates_per_second())
            .finish()
    }
}
