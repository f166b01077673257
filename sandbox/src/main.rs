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

// Khora Engine Sandbox
// Runs a toy simulation on an update thread and "presents" it on a render
// thread, switching execution mode halfway through.
//
// Usage: sandbox [config.ron] [seconds]

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, TrySendError};
use khora_threading::prelude::*;
use khora_threading::ThreadStats;

const DEFAULT_CONFIG: &str = "sandbox/sandbox.ron";
const DEFAULT_SECONDS: u64 = 4;

/// State produced by the update thread and consumed by the render thread.
#[derive(Debug, Clone, Copy, Default)]
struct Snapshot {
    tick: u64,
    position: f64,
    velocity: f64,
}

fn load_config(path: &Path) -> Result<SchedulerConfig> {
    if !path.exists() {
        log::info!("No configuration at {}, using defaults.", path.display());
        return Ok(SchedulerConfig::default());
    }
    SchedulerConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

fn simulation_thread(snapshots: crossbeam_channel::Sender<Snapshot>) -> Arc<ManagedThread> {
    let update = ManagedThread::new("update", ThreadClass::Update);
    let mut state = Snapshot {
        velocity: 1.0,
        ..Snapshot::default()
    };
    update.on_new_frame(move |frame| {
        let dt = frame.delta_time().as_secs_f64();
        state.tick = frame.frame_number();
        state.position += state.velocity * dt;
        if state.position.abs() > 1.0 {
            state.velocity = -state.velocity;
        }
        match snapshots.try_send(state) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => anyhow::bail!("render thread is gone"),
        }
    });
    update
}

fn presentation_thread(snapshots: Receiver<Snapshot>, presented: Arc<AtomicU64>) -> Arc<ManagedThread> {
    let render = ManagedThread::new("render", ThreadClass::Render);
    render.on_setup(|| {
        log::info!("Render thread ready on {:?}.", thread::current().name());
        Ok(())
    });
    render.on_new_frame(move |frame| {
        // Present the most recent simulation state only.
        if let Some(latest) = snapshots.try_iter().last() {
            log::trace!(
                "[{}] frame {} shows tick {} at x={:+.3}",
                frame.thread_name(),
                frame.frame_number(),
                latest.tick,
                latest.position
            );
        }
        presented.fetch_add(1, Ordering::Relaxed);
        Ok(())
    });
    render
}

fn log_stats(stats: &[ThreadStats]) {
    for entry in stats {
        log::info!(
            "{:<7} {:?}: {} frames, {} overruns, {} faults, last frame {:?}",
            entry.name,
            entry.state,
            entry.frames,
            entry.overruns,
            entry.faults,
            entry.last_frame
        );
    }
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let seconds = match args.next() {
        Some(value) => value.parse().context("seconds must be a whole number")?,
        None => DEFAULT_SECONDS,
    };

    let config = load_config(Path::new(&config_path))?;
    let initial_mode = config.execution_mode;
    let manager = Arc::new(ThreadManager::with_config(config)?);

    let (snapshot_tx, snapshot_rx) = bounded(8);
    let presented = Arc::new(AtomicU64::new(0));
    manager.add(&simulation_thread(snapshot_tx))?;
    manager.add(&presentation_thread(snapshot_rx, presented.clone()))?;

    {
        let presented = presented.clone();
        let mut since_report = Duration::ZERO;
        manager.main_thread().on_new_frame(move |frame| {
            since_report += frame.delta_time();
            if since_report >= Duration::from_secs(1) {
                since_report = Duration::ZERO;
                log::info!("{} frames presented so far.", presented.load(Ordering::Relaxed));
            }
            Ok(())
        });
    }

    // Switch modes halfway, then stop. Both are requested from a background
    // task so the main thread keeps driving the loop.
    let director = {
        let handle = manager.clone();
        manager.spawn_background("director", move || {
            thread::sleep(Duration::from_secs(seconds) / 2);
            let next = match initial_mode {
                ExecutionMode::MultiThread => ExecutionMode::SingleThread,
                ExecutionMode::SingleThread => ExecutionMode::MultiThread,
            };
            handle.set_execution_mode(next);
            thread::sleep(Duration::from_secs(seconds) / 2);
            handle.stop()?;
            Ok(())
        })?
    };

    manager.run()?;
    if director.join().is_err() {
        log::warn!("Director task panicked.");
    }

    log_stats(&manager.stats());
    log::info!("Presented {} frames in total.", presented.load(Ordering::Relaxed));
    Ok(())
}
