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

//! Fault capture and the bridge that routes every unhandled fault to a single
//! policy decision.
//!
//! A [`Fault`] is what the scheduler catches when a frame handler returns an
//! error or panics, when a posted work item panics, or when background work
//! nobody awaits fails. All of them end up in one [`FaultPolicy`], injected
//! into the [`ThreadManager`](crate::ThreadManager) at construction. When the
//! policy answers [`FaultAction::Abort`] the fault is re-raised on the main
//! thread, so `ThreadManager::run` fails the same way whichever thread the
//! fault came from.

use crate::thread::ManagedThread;
use crate::work_item::WorkItem;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Where a fault was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultOrigin {
    /// A frame handler or work item of a managed thread.
    Thread {
        /// Name of the managed thread.
        name: String,
        /// Whether it is the manager's main thread.
        main: bool,
    },
    /// Background work whose result nobody awaited.
    Unobserved {
        /// Name of the background task.
        task: String,
    },
}

impl FaultOrigin {
    /// Returns `true` when the fault was raised by the main thread.
    pub fn is_main(&self) -> bool {
        matches!(self, FaultOrigin::Thread { main: true, .. })
    }
}

impl fmt::Display for FaultOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultOrigin::Thread { name, .. } => write!(f, "thread '{name}'"),
            FaultOrigin::Unobserved { task } => write!(f, "background task '{task}'"),
        }
    }
}

enum Payload {
    Panic {
        message: String,
        // Kept behind a mutex so `Fault` stays `Sync`; taken by `into_panic_payload`.
        payload: Mutex<Option<Box<dyn Any + Send>>>,
    },
    Error(anyhow::Error),
}

/// A captured, unhandled fault.
///
/// The original error or panic payload is preserved: errors can be inspected
/// with [`Fault::downcast_ref`], panics can be resumed with
/// [`Fault::resume_unwind`].
pub struct Fault {
    origin: FaultOrigin,
    payload: Payload,
    escalated: bool,
}

impl Fault {
    /// Wraps a panic payload caught with `catch_unwind`.
    pub fn from_panic(origin: FaultOrigin, payload: Box<dyn Any + Send>) -> Self {
        let message = panic_message(payload.as_ref());
        Self {
            origin,
            payload: Payload::Panic {
                message,
                payload: Mutex::new(Some(payload)),
            },
            escalated: false,
        }
    }

    /// Wraps an error returned by a frame handler or background task.
    pub fn from_error(origin: FaultOrigin, error: anyhow::Error) -> Self {
        Self {
            origin,
            payload: Payload::Error(error),
            escalated: false,
        }
    }

    /// Where the fault was raised.
    pub fn origin(&self) -> &FaultOrigin {
        &self.origin
    }

    /// Whether the fault comes from a panic rather than a returned error.
    pub fn is_panic(&self) -> bool {
        matches!(self.payload, Payload::Panic { .. })
    }

    /// Whether the fault bridge already routed this fault to the main thread.
    pub fn is_escalated(&self) -> bool {
        self.escalated
    }

    pub(crate) fn escalate(mut self) -> Self {
        self.escalated = true;
        self
    }

    /// Human readable description of the fault, without its origin.
    pub fn message(&self) -> String {
        match &self.payload {
            Payload::Panic { message, .. } => message.clone(),
            Payload::Error(error) => format!("{error:#}"),
        }
    }

    /// The panic message when the fault is a panic.
    pub fn panic_message(&self) -> Option<&str> {
        match &self.payload {
            Payload::Panic { message, .. } => Some(message),
            Payload::Error(_) => None,
        }
    }

    /// The original error when the fault was returned by a handler.
    pub fn error(&self) -> Option<&anyhow::Error> {
        match &self.payload {
            Payload::Error(error) => Some(error),
            Payload::Panic { .. } => None,
        }
    }

    /// Downcasts the original error to its concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error().and_then(|error| error.downcast_ref::<E>())
    }

    /// Converts the fault into a panic payload. Panics give back their
    /// original payload; errors become their formatted message.
    pub fn into_panic_payload(self) -> Box<dyn Any + Send> {
        match self.payload {
            Payload::Panic { message, payload } => {
                let original = payload
                    .into_inner()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                original.unwrap_or_else(|| Box::new(message))
            }
            Payload::Error(error) => Box::new(format!("{error:#}")),
        }
    }

    /// Resumes unwinding with the original panic payload.
    pub fn resume_unwind(self) -> ! {
        std::panic::resume_unwind(self.into_panic_payload())
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("origin", &self.origin)
            .field("panic", &self.is_panic())
            .field("message", &self.message())
            .field("escalated", &self.escalated)
            .finish()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_panic() { "panic" } else { "error" };
        write!(f, "{kind} on {}: {}", self.origin, self.message())
    }
}

impl std::error::Error for Fault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.payload {
            Payload::Error(error) => {
                let source: &(dyn std::error::Error + 'static) = error.as_ref();
                Some(source)
            }
            Payload::Panic { .. } => None,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The decision a [`FaultPolicy`] takes for an unhandled fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    /// Log the fault at `error` level and keep running.
    Log,
    /// Re-raise the fault on the main thread; `ThreadManager::run` returns it.
    Abort,
    /// Drop the fault silently.
    Ignore,
}

/// The single decision point for unhandled faults.
///
/// Implemented for any `Fn(&Fault) -> FaultAction + Send + Sync` closure.
pub trait FaultPolicy: Send + Sync {
    /// Decides what to do with `fault`. Called on the thread that caught it.
    fn decide(&self, fault: &Fault) -> FaultAction;
}

impl<F> FaultPolicy for F
where
    F: Fn(&Fault) -> FaultAction + Send + Sync,
{
    fn decide(&self, fault: &Fault) -> FaultAction {
        self(fault)
    }
}

/// Aborts on thread faults; logs unobserved background faults unless
/// `abort_on_unobserved` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFaultPolicy {
    /// Escalate background faults the same way as thread faults.
    pub abort_on_unobserved: bool,
}

impl FaultPolicy for DefaultFaultPolicy {
    fn decide(&self, fault: &Fault) -> FaultAction {
        match fault.origin() {
            FaultOrigin::Thread { .. } => FaultAction::Abort,
            FaultOrigin::Unobserved { .. } if self.abort_on_unobserved => FaultAction::Abort,
            FaultOrigin::Unobserved { .. } => FaultAction::Log,
        }
    }
}

/// Routes faults from any thread to the policy and, on abort, to the main
/// thread's synchronization context.
pub(crate) struct FaultBridge {
    policy: Box<dyn FaultPolicy>,
    main: Arc<ManagedThread>,
    single_threaded: AtomicBool,
    escalation_timeout: Duration,
}

impl FaultBridge {
    pub(crate) fn new(
        policy: Box<dyn FaultPolicy>,
        main: Arc<ManagedThread>,
        escalation_timeout: Duration,
    ) -> Self {
        Self {
            policy,
            main,
            single_threaded: false.into(),
            escalation_timeout,
        }
    }

    pub(crate) fn set_single_threaded(&self, single_threaded: bool) {
        self.single_threaded.store(single_threaded, Ordering::Release);
    }

    /// Decides a fault raised by the main thread's own frame. Returns the
    /// fault when the caller, already on the main thread, must raise it.
    pub(crate) fn resolve_main_fault(&self, fault: Fault) -> Option<Fault> {
        if fault.is_escalated() {
            return Some(fault);
        }
        match self.decide(&fault) {
            FaultAction::Abort => Some(fault.escalate()),
            FaultAction::Log | FaultAction::Ignore => None,
        }
    }

    /// Decides a fault raised anywhere but the main thread's own frame.
    pub(crate) fn report(&self, fault: Fault) {
        if fault.is_escalated() {
            // Already on its way to the main thread.
            self.post_to_main(fault, false);
            return;
        }
        if self.decide(&fault) == FaultAction::Abort {
            // Blocking on the main thread's own OS thread, or while it drives
            // every thread inline, would deadlock.
            let wait = !fault.origin().is_main()
                && !self.single_threaded.load(Ordering::Acquire)
                && !self.main.sync_context().is_current();
            self.post_to_main(fault.escalate(), wait);
        }
    }

    fn decide(&self, fault: &Fault) -> FaultAction {
        let action = self.policy.decide(fault);
        match action {
            FaultAction::Abort => log::error!("Unhandled {fault}; escalating to the main thread."),
            FaultAction::Log => log::error!("Unhandled {fault}"),
            FaultAction::Ignore => log::trace!("Ignoring {fault}"),
        }
        action
    }

    fn post_to_main(&self, fault: Fault, wait: bool) {
        let description = fault.to_string();
        let item = WorkItem::raising(fault);
        match self.main.sync_context().post_tracked(item) {
            Ok(item) => {
                if wait && !item.wait(Some(self.escalation_timeout)) {
                    log::warn!(
                        "Main thread did not process the escalated fault within {:?}.",
                        self.escalation_timeout
                    );
                }
            }
            Err(error) => {
                log::error!("Could not escalate {description} to the main thread: {error}")
            }
        }
    }
}

/// Cloneable handle collaborators use to report faults from work the
/// scheduler does not drive (audio callbacks, asset loaders, ...).
#[derive(Clone)]
pub struct FaultReporter {
    bridge: Arc<FaultBridge>,
}

impl FaultReporter {
    pub(crate) fn new(bridge: Arc<FaultBridge>) -> Self {
        Self { bridge }
    }

    /// Reports an already captured fault.
    pub fn report(&self, fault: Fault) {
        self.bridge.report(fault);
    }

    /// Reports an error from background work nobody awaits.
    pub fn report_error(&self, task: impl Into<String>, error: anyhow::Error) {
        let origin = FaultOrigin::Unobserved { task: task.into() };
        self.report(Fault::from_error(origin, error));
    }

    /// Reports a panic payload caught in background work.
    pub fn report_panic(&self, task: impl Into<String>, payload: Box<dyn Any + Send>) {
        let origin = FaultOrigin::Unobserved { task: task.into() };
        self.report(Fault::from_panic(origin, payload));
    }
}

impl fmt::Debug for FaultReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultReporter")
            .field("main", &self.bridge.main.name())
            .finish()
    }
}
