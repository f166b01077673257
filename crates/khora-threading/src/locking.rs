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

//! Lock helpers that survive poisoning.
//!
//! Frame handlers and work items run under `catch_unwind`, so a poisoned lock
//! only means a panic escaped an observer; the guarded data is still
//! consistent.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn wait<'a, T>(condvar: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    condvar.wait(guard).unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn wait_timeout<'a, T>(
    condvar: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
) -> MutexGuard<'a, T> {
    match condvar.wait_timeout(guard, timeout) {
        Ok((guard, _)) => guard,
        Err(poisoned) => poisoned.into_inner().0,
    }
}

/// Records the calling OS thread in `slot` until dropped, restoring the
/// previous occupant so nested marks unwind correctly.
pub(crate) struct ThreadMark<'a> {
    slot: &'a Mutex<Option<ThreadId>>,
    previous: Option<ThreadId>,
}

impl<'a> ThreadMark<'a> {
    pub(crate) fn enter(slot: &'a Mutex<Option<ThreadId>>) -> Self {
        let previous = lock(slot).replace(thread::current().id());
        Self { slot, previous }
    }

    pub(crate) fn is_held_here(slot: &Mutex<Option<ThreadId>>) -> bool {
        *lock(slot) == Some(thread::current().id())
    }
}

impl Drop for ThreadMark<'_> {
    fn drop(&mut self) {
        *lock(self.slot) = self.previous.take();
    }
}
