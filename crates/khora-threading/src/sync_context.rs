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

//! Per-thread queue of callbacks marshalled onto the owning thread.

use crate::error::{Result, ThreadingError};
use crate::fault::{Fault, FaultOrigin};
use crate::locking::lock;
use crate::work_item::WorkItem;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

/// A FIFO queue of work items owned by one managed thread.
///
/// Any thread may [`post`](SyncContext::post) or [`send`](SyncContext::send)
/// work; only the owning thread drains it with
/// [`do_work`](SyncContext::do_work), once per frame. The context is bound
/// ("current") to at most one OS thread at a time.
pub struct SyncContext {
    name: String,
    origin: FaultOrigin,
    sender: Sender<Arc<WorkItem>>,
    receiver: Receiver<Arc<WorkItem>>,
    owner: Mutex<Option<ThreadId>>,
    // Held while enqueuing and closing so no item slips in after `close`.
    closed: Mutex<bool>,
    deferred: Mutex<Option<Fault>>,
}

impl SyncContext {
    pub(crate) fn for_thread(name: &str, main: bool) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            name: name.to_string(),
            origin: FaultOrigin::Thread {
                name: name.to_string(),
                main,
            },
            sender,
            receiver,
            owner: Mutex::new(None),
            closed: Mutex::new(false),
            deferred: Mutex::new(None),
        }
    }

    /// Name of the owning managed thread.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues `action` to run on the owning thread and returns immediately.
    ///
    /// ## Errors
    /// [`ThreadingError::ContextClosed`] once the owning thread has exited.
    pub fn post<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_tracked(WorkItem::from_action(self.origin.clone(), action))
            .map(|_| ())
    }

    /// Enqueues `action` and blocks until it has run.
    ///
    /// Called from the owning thread itself, the queue is drained inline
    /// instead. A panic in `action` is not returned here: it surfaces through
    /// the owning thread's frame.
    ///
    /// ## Errors
    /// [`ThreadingError::ContextClosed`] once the owning thread has exited,
    /// including when it exits while `action` is still queued.
    pub fn send<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let item = self.post_tracked(WorkItem::from_action(self.origin.clone(), action))?;
        if self.is_current() {
            self.pump();
        } else {
            item.wait(None);
        }
        if item.is_abandoned() {
            return Err(ThreadingError::ContextClosed {
                context: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Runs every item queued at the time of the call, in enqueue order.
    ///
    /// Every item of the batch runs even if an earlier one faults. The first
    /// fault (or one deferred by an inline drain) is returned after the batch;
    /// later ones are logged. Does nothing unless the context is bound to the
    /// calling thread.
    ///
    /// ## Returns
    /// The number of items executed.
    pub fn do_work(&self) -> std::result::Result<usize, Fault> {
        if !self.is_current() {
            log::debug!(
                "Ignoring do_work on sync context '{}' from a thread it is not bound to.",
                self.name
            );
            return Ok(0);
        }

        let mut first = lock(&self.deferred).take();
        let executed = self.drain(|fault| self.keep_first(&mut first, fault));
        match first {
            Some(fault) => Err(fault),
            None => Ok(executed),
        }
    }

    /// Returns `true` when the context is bound to the calling OS thread.
    pub fn is_current(&self) -> bool {
        *lock(&self.owner) == Some(thread::current().id())
    }

    /// Number of queued items not yet drained.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Returns `true` once the owning thread has exited.
    pub fn is_closed(&self) -> bool {
        *lock(&self.closed)
    }

    pub(crate) fn bind_current(&self) {
        *lock(&self.owner) = Some(thread::current().id());
    }

    pub(crate) fn unbind(&self) {
        *lock(&self.owner) = None;
    }

    pub(crate) fn post_tracked(&self, item: WorkItem) -> Result<Arc<WorkItem>> {
        let closed = lock(&self.closed);
        if *closed {
            return Err(ThreadingError::ContextClosed {
                context: self.name.clone(),
            });
        }
        let item = Arc::new(item);
        self.sender
            .send(item.clone())
            .map_err(|_| ThreadingError::ContextClosed {
                context: self.name.clone(),
            })?;
        Ok(item)
    }

    /// Drains the queue from an owner that is blocked on something else.
    /// Faults are deferred to the next `do_work`.
    pub(crate) fn pump(&self) -> usize {
        self.drain(|fault| {
            let mut deferred = lock(&self.deferred);
            self.keep_first(&mut deferred, fault);
        })
    }

    /// Stops accepting work and completes every queued item without running it.
    pub(crate) fn close(&self) -> usize {
        let mut closed = lock(&self.closed);
        *closed = true;
        let mut abandoned = 0;
        while let Ok(item) = self.receiver.try_recv() {
            item.abandon();
            abandoned += 1;
        }
        if let Some(fault) = lock(&self.deferred).take() {
            log::error!("Sync context '{}' closed with an unraised {fault}", self.name);
        }
        abandoned
    }

    fn drain(&self, mut on_fault: impl FnMut(Fault)) -> usize {
        let batch = self.receiver.len();
        let mut executed = 0;
        for _ in 0..batch {
            let Ok(item) = self.receiver.try_recv() else {
                break;
            };
            if item.execute() {
                executed += 1;
            }
            if let Some(fault) = item.take_fault() {
                on_fault(fault);
            }
        }
        executed
    }

    // An escalated fault outranks a local one so aborts are never lost.
    fn keep_first(&self, slot: &mut Option<Fault>, fault: Fault) {
        let replace = match slot.as_ref() {
            None => true,
            Some(current) => fault.is_escalated() && !current.is_escalated(),
        };
        let dropped = if replace { slot.replace(fault) } else { Some(fault) };
        if let Some(dropped) = dropped {
            log::error!(
                "Additional fault in sync context '{}': {dropped}",
                self.name
            );
        }
    }
}

impl fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncContext")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}
