//! Frame Scheduler
//!
//! Drives execution passes from a repeating timer. The timer runs at the
//! display refresh rate and a [`FramePacer`] throttles it down to the target
//! frame rate.
//!
//! # Re-entrancy
//!
//! At most one pass is in flight. A tick that arrives while a pass is still
//! running is skipped, not queued. Each pass runs as its own task, so a slow
//! pass never delays the timer itself.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

use super::executor::Executor;
use super::result::ExecutionResults;

/// Throttles a fast timer down to a frame rate.
///
/// When a frame is due, the time past the frame boundary is carried over,
/// so the long-run rate matches the target instead of drifting low.
#[derive(Debug, Clone)]
pub struct FramePacer {
    frame_interval: Duration,
    last: Instant,
}

impl FramePacer {
    pub fn new(frame_interval: Duration, start: Instant) -> Self {
        Self {
            frame_interval,
            last: start,
        }
    }

    /// Report a timer tick at `now`. Returns true if a frame is due.
    pub fn advance(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last);
        if elapsed < self.frame_interval {
            return false;
        }
        if self.frame_interval.is_zero() {
            self.last = now;
            return true;
        }
        let remainder = elapsed.as_nanos() % self.frame_interval.as_nanos();
        self.last = now - Duration::from_nanos(remainder as u64);
        true
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }
}

#[derive(Debug, Default)]
struct Shared {
    in_flight: AtomicBool,
    completed: AtomicU64,
    skipped: AtomicU64,
}

/// Clears the in-flight flag when a pass task ends, even if it panics.
struct InFlight(Arc<Shared>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
    }
}

/// Runs passes of an [`Executor`] at its configured frame rate.
pub struct FrameScheduler {
    executor: Arc<Executor>,
    shared: Arc<Shared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl FrameScheduler {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self {
            executor,
            shared: Arc::new(Shared::default()),
            timer: Mutex::new(None),
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Start the repeating timer. Does nothing if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return;
        }

        let config = self.executor.config();
        let refresh = config.refresh_interval();
        let frame = config.frame_interval();
        let executor = Arc::clone(&self.executor);
        let shared = Arc::clone(&self.shared);

        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut pacer = FramePacer::new(frame, Instant::now());
            loop {
                let now = ticker.tick().await;
                if pacer.advance(now) {
                    dispatch(&executor, &shared);
                }
            }
        }));

        info!(
            target_fps = config.target_fps,
            refresh_hz = config.display_refresh_hz,
            "frame scheduler started"
        );
    }

    /// Cancel the repeating timer. A pass already in flight runs to
    /// completion. Does nothing if the timer is not running.
    pub fn stop(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
            info!("frame scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Dispatch one pass now, through the same guard the timer uses.
    ///
    /// Returns `None` if a pass is already in flight.
    pub fn fire(&self) -> Option<JoinHandle<ExecutionResults>> {
        dispatch(&self.executor, &self.shared)
    }

    pub fn in_flight(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Passes dispatched by this scheduler that ran to completion.
    pub fn completed_passes(&self) -> u64 {
        self.shared.completed.load(Ordering::Acquire)
    }

    /// Ticks dropped because a pass was still running.
    pub fn skipped_ticks(&self) -> u64 {
        self.shared.skipped.load(Ordering::Acquire)
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("running", &self.is_running())
            .field("in_flight", &self.in_flight())
            .field("completed", &self.completed_passes())
            .field("skipped", &self.skipped_ticks())
            .finish()
    }
}

fn dispatch(executor: &Arc<Executor>, shared: &Arc<Shared>) -> Option<JoinHandle<ExecutionResults>> {
    if shared.in_flight.swap(true, Ordering::AcqRel) {
        shared.skipped.fetch_add(1, Ordering::AcqRel);
        executor.metrics_handle().record_skipped_tick();
        trace!("pass still in flight, skipping tick");
        return None;
    }

    let executor = Arc::clone(executor);
    let guard = InFlight(Arc::clone(shared));
    Some(tokio::spawn(async move {
        let results = executor.execute().await;
        let completed = guard.0.completed.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(completed, roots = results.len(), "scheduled pass finished");
        drop(guard);
        results
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;

    #[test]
    fn pacer_carries_remainder() {
        let start = Instant::now();
        let mut pacer = FramePacer::new(Duration::from_secs(1) / 60, start);

        let fires = (1..=1000)
            .filter(|ms| pacer.advance(start + Duration::from_millis(*ms)))
            .count();
        assert_eq!(fires, 60);
    }

    #[test]
    fn pacer_fires_once_for_a_late_tick() {
        let start = Instant::now();
        let mut pacer = FramePacer::new(Duration::from_millis(10), start);

        // Three frames late still yields a single frame, aligned to the grid
        assert!(pacer.advance(start + Duration::from_millis(35)));
        assert!(!pacer.advance(start + Duration::from_millis(39)));
        assert!(pacer.advance(start + Duration::from_millis(40)));
    }

    #[test]
    fn pacer_waits_for_full_interval() {
        let start = Instant::now();
        let mut pacer = FramePacer::new(Duration::from_millis(10), start);
        assert!(!pacer.advance(start + Duration::from_millis(9)));
        assert!(pacer.advance(start + Duration::from_millis(12)));
        // The 2ms overshoot counts toward the next frame
        assert!(pacer.advance(start + Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn back_to_back_fires_run_once() {
        let scheduler = FrameScheduler::new(Arc::new(Executor::default()));

        let first = scheduler.fire();
        let second = scheduler.fire();
        assert!(first.is_some());
        assert!(second.is_none());

        first.unwrap().await.unwrap();
        assert_eq!(scheduler.completed_passes(), 1);
        assert_eq!(scheduler.skipped_ticks(), 1);
        assert!(!scheduler.in_flight());
        assert_eq!(scheduler.executor().metrics().ticks_skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_drives_passes_until_stopped() {
        let executor = Arc::new(Executor::new(ExecutorConfig::default()).unwrap());
        let scheduler = FrameScheduler::new(executor);

        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let completed = scheduler.completed_passes();
        assert!(completed >= 3, "only {completed} passes ran");

        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(scheduler.completed_passes() <= completed + 1);
    }
}
