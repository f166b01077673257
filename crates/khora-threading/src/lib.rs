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

//! # Khora Threading
//!
//! The thread-lifecycle scheduler of the engine. It owns the cooperative game
//! threads (main, update, render), runs them either as dedicated OS threads
//! or multiplexed onto one driving thread, paces each to a target frequency,
//! marshals work onto the right thread through a [`SyncContext`], and routes
//! every unhandled fault to a single [`FaultPolicy`].
//!
//! ```rust,no_run
//! use khora_threading::prelude::*;
//!
//! # fn main() -> khora_threading::Result<()> {
//! let manager = ThreadManager::with_config(SchedulerConfig::default())?;
//!
//! let update = ManagedThread::new("update", ThreadClass::Update);
//! update.on_new_frame(|frame| {
//!     log::trace!("update frame {}", frame.frame_number());
//!     Ok(())
//! });
//! manager.add(&update)?;
//!
//! manager.run()?; // blocks until `stop` is called from another thread
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod fault;
pub mod manager;
pub mod sync_context;
pub mod thread;

mod locking;
mod work_item;

pub use config::{ExecutionMode, SchedulerConfig};
pub use error::{Result, ThreadingError};
pub use fault::{DefaultFaultPolicy, Fault, FaultAction, FaultOrigin, FaultPolicy, FaultReporter};
pub use manager::ThreadManager;
pub use sync_context::SyncContext;
pub use thread::{FrameContext, FrameOutcome, ManagedThread, ThreadClass, ThreadState, ThreadStats};

/// Convenient re-exports for engine subsystems and applications.
pub mod prelude {
    pub use crate::config::{ExecutionMode, SchedulerConfig};
    pub use crate::fault::{Fault, FaultAction, FaultPolicy};
    pub use crate::manager::ThreadManager;
    pub use crate::sync_context::SyncContext;
    pub use crate::thread::{FrameContext, ManagedThread, ThreadClass, ThreadState};
}
