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

//! Integration tests for frame pacing: minimum spacing, no catch-up after an
//! overrun, and the 10 Hz manager scenario.

use khora_threading::{ManagedThread, SchedulerConfig, ThreadClass, ThreadManager};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Tolerance for timestamps taken inside handlers rather than at the lap.
const EPSILON: Duration = Duration::from_millis(2);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn record_frame_starts(thread: &ManagedThread) -> Arc<Mutex<Vec<Instant>>> {
    let starts = Arc::new(Mutex::new(Vec::new()));
    let sink = starts.clone();
    thread.on_new_frame(move |_| {
        sink.lock().unwrap().push(Instant::now());
        Ok(())
    });
    starts
}

fn gaps(starts: &[Instant]) -> Vec<Duration> {
    starts.windows(2).map(|pair| pair[1] - pair[0]).collect()
}

#[test]
fn test_frames_are_never_closer_than_the_period() {
    init_logging();
    let thread = ManagedThread::new("update", ThreadClass::Update);
    thread.set_updates_per_second(50.0).unwrap();
    let starts = record_frame_starts(&thread);

    thread.start().unwrap();
    thread::sleep(Duration::from_millis(300));
    thread.stop().unwrap();
    thread.join(Duration::from_secs(2)).unwrap();

    let starts = starts.lock().unwrap();
    assert!(starts.len() >= 5, "only {} frames ran", starts.len());
    let period = Duration::from_millis(20);
    for gap in gaps(&starts) {
        assert!(gap + EPSILON >= period, "frames {gap:?} apart, period {period:?}");
    }
}

#[test]
fn test_overrun_is_not_compensated_by_shorter_frames() {
    init_logging();
    let thread = ManagedThread::new("update", ThreadClass::Update);
    thread.set_updates_per_second(20.0).unwrap();
    let starts = Arc::new(Mutex::new(Vec::new()));
    {
        let starts = starts.clone();
        thread.on_new_frame(move |frame| {
            starts.lock().unwrap().push(Instant::now());
            if frame.frame_number() == 2 {
                thread::sleep(Duration::from_millis(130));
            }
            Ok(())
        });
    }

    thread.initialize().unwrap();
    for _ in 0..5 {
        thread.run_single_frame().unwrap();
    }

    let starts = starts.lock().unwrap();
    let gaps = gaps(&starts);
    let period = Duration::from_millis(50);
    assert!(gaps[1] >= Duration::from_millis(130), "slow frame: {:?}", gaps[1]);
    for (index, gap) in gaps.iter().enumerate() {
        assert!(
            *gap + EPSILON >= period,
            "gap {index} is {gap:?}; the frame after an overrun must not be shortened"
        );
    }

    let stats = thread.stats();
    assert_eq!(stats.frames, 5);
    assert_eq!(stats.overruns, 1);
    assert_eq!(stats.period, Some(period));
}

#[test]
fn test_delta_time_measures_the_previous_frame() {
    init_logging();
    let thread = ManagedThread::new("render", ThreadClass::Render);
    thread.set_updates_per_second(25.0).unwrap();
    let deltas = Arc::new(Mutex::new(Vec::new()));
    {
        let deltas = deltas.clone();
        thread.on_new_frame(move |frame| {
            deltas.lock().unwrap().push(frame.delta_time());
            Ok(())
        });
    }

    thread.initialize().unwrap();
    for _ in 0..4 {
        thread.run_single_frame().unwrap();
    }

    let deltas = deltas.lock().unwrap();
    assert!(deltas[0] < Duration::from_millis(40));
    for delta in &deltas[1..] {
        assert!(*delta >= Duration::from_millis(40), "delta {delta:?}");
    }
}

#[test]
fn test_unthrottled_thread_does_not_sleep() {
    init_logging();
    let thread = ManagedThread::new("update", ThreadClass::Update);
    thread.initialize().unwrap();

    let started = Instant::now();
    for _ in 0..200 {
        thread.run_single_frame().unwrap();
    }
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(thread.stats().overruns, 0);
}

#[test]
fn test_ten_hertz_thread_runs_about_four_frames_in_350ms() {
    init_logging();
    let config = SchedulerConfig {
        update_per_second: 10.0,
        ..SchedulerConfig::default()
    };
    let manager = Arc::new(ThreadManager::with_config(config).unwrap());
    let update = ManagedThread::new("update", ThreadClass::Update);
    let frames = Arc::new(AtomicUsize::new(0));
    {
        let frames = frames.clone();
        update.on_new_frame(move |_| {
            frames.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    manager.add(&update).unwrap();

    let driver = {
        let manager = manager.clone();
        thread::spawn(move || manager.run())
    };
    thread::sleep(Duration::from_millis(350));
    manager.stop().unwrap();
    driver.join().unwrap().unwrap();

    let frames = frames.load(Ordering::SeqCst);
    assert!(
        (2..=5).contains(&frames),
        "expected 3-4 frames (+/-1 for jitter), got {frames}"
    );
}
