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

//! A unit of work queued on a synchronization context.

use crate::fault::{Fault, FaultOrigin};
use crate::locking::{lock, wait, wait_timeout};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() -> Result<(), Fault> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Pending,
    Ran,
    Abandoned,
}

/// A queued callback with its completion flag and captured fault.
///
/// The job runs at most once. Completion is signalled exactly once, whether
/// the job ran, faulted or was abandoned.
pub(crate) struct WorkItem {
    job: Mutex<Option<Job>>,
    completed: Mutex<Completion>,
    completion: Condvar,
    fault: Mutex<Option<Fault>>,
    origin: FaultOrigin,
}

impl WorkItem {
    fn new(origin: FaultOrigin, job: Job) -> Self {
        Self {
            job: Mutex::new(Some(job)),
            completed: Mutex::new(Completion::Pending),
            completion: Condvar::new(),
            fault: Mutex::new(None),
            origin,
        }
    }

    /// Wraps a user action. A panic inside it is captured as a fault of `origin`.
    pub(crate) fn from_action<F>(origin: FaultOrigin, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(
            origin,
            Box::new(move || {
                action();
                Ok(())
            }),
        )
    }

    /// An item that re-raises `fault` on whichever thread executes it.
    pub(crate) fn raising(fault: Fault) -> Self {
        let origin = fault.origin().clone();
        Self::new(origin, Box::new(move || Err(fault)))
    }

    /// Runs the job if it has not run yet, then marks the item completed.
    /// Returns `false` when the job was already taken.
    pub(crate) fn execute(&self) -> bool {
        let Some(job) = lock(&self.job).take() else {
            return false;
        };
        let fault = match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(Ok(())) => None,
            Ok(Err(fault)) => Some(fault),
            Err(payload) => Some(Fault::from_panic(self.origin.clone(), payload)),
        };
        *lock(&self.fault) = fault;
        self.complete(Completion::Ran);
        true
    }

    /// Completes the item without running it.
    pub(crate) fn abandon(&self) {
        if lock(&self.job).take().is_some() {
            self.complete(Completion::Abandoned);
        }
    }

    pub(crate) fn take_fault(&self) -> Option<Fault> {
        lock(&self.fault).take()
    }

    #[cfg(test)]
    pub(crate) fn is_completed(&self) -> bool {
        *lock(&self.completed) != Completion::Pending
    }

    /// Returns `true` if the item was completed without its job running.
    pub(crate) fn is_abandoned(&self) -> bool {
        *lock(&self.completed) == Completion::Abandoned
    }

    /// Blocks until the item completes. Returns `false` if `timeout` elapsed first.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut completed = lock(&self.completed);
        while *completed == Completion::Pending {
            completed = match deadline {
                None => wait(&self.completion, completed),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    wait_timeout(&self.completion, completed, deadline - now)
                }
            };
        }
        true
    }

    fn complete(&self, outcome: Completion) {
        let mut completed = lock(&self.completed);
        debug_assert_eq!(*completed, Completion::Pending, "work item completed twice");
        *completed = outcome;
        self.completion.notify_all();
    }
}
