//! Fixed-interval, single-flight poll scheduler.
//!
//! Each timer tick starts one tick task unless the previous one is still
//! running, in which case the tick is dropped (not queued, not coalesced).
//! At most one tick is ever in flight per scheduler.
//!
//! `stop()` cancels the timer and marks the scheduler inactive. A tick that
//! is already running is allowed to finish; its [`TickGuard`] reports
//! `is_current() == false` from then on, and consumers must discard its
//! result.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Enrollment capture cadence.
pub const ENROLL_INTERVAL: Duration = Duration::from_millis(300);
/// Live verification cadence.
pub const VERIFY_INTERVAL: Duration = Duration::from_millis(1500);

/// Monotonic now on the runtime clock (pauses with tokio's test clock).
pub fn now() -> std::time::Instant {
    Instant::now().into_std()
}

/// What the scheduler should do after a tick completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    /// End the loop; no further ticks start.
    Stop,
}

/// Handed to every tick. Tells a late tick whether its consumer is still live.
#[derive(Debug, Clone)]
pub struct TickGuard {
    active: Arc<AtomicBool>,
    sequence: u64,
}

impl TickGuard {
    /// False once the scheduler that started this tick has been stopped.
    pub fn is_current(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// 1-based index of this tick within its scheduler.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Ticks that started a task.
    pub started: u64,
    /// Timer firings dropped because a tick was still in flight.
    pub skipped: u64,
    /// Tick tasks that panicked.
    pub panicked: u64,
    /// Whether an in-flight tick was left to finish after stop.
    pub drained: bool,
}

/// Owned handle to a running poll loop. Dropping it stops the loop.
pub struct PollHandle {
    cancel: CancellationToken,
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<PollStats>>,
    last_stats: PollStats,
}

/// Start polling: `tick` is invoked every `period`, first after one period.
pub fn start<F, Fut>(period: Duration, tick: F) -> PollHandle
where
    F: FnMut(TickGuard) -> Fut + Send + 'static,
    Fut: Future<Output = TickControl> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let active = Arc::new(AtomicBool::new(true));
    let task = tokio::spawn(poll_loop(period, tick, Arc::clone(&active), cancel.clone()));
    tracing::debug!(period_ms = period.as_millis() as u64, "poll scheduler started");
    PollHandle {
        cancel,
        active,
        task: Some(task),
        last_stats: PollStats::default(),
    }
}

impl PollHandle {
    /// Cancel the timer and disown any in-flight tick. Idempotent.
    pub fn stop(&mut self) {
        if self.active.swap(false, Ordering::AcqRel) {
            tracing::debug!("poll scheduler stopping");
        }
        self.cancel.cancel();
    }

    /// True until `stop()` is called or the loop ends on its own.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && !self.is_finished()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }

    /// Wait for the loop to exit (after `stop()` or a tick returning `Stop`).
    ///
    /// Cancel-safe: dropping this future leaves the loop untouched.
    pub async fn join(&mut self) -> PollStats {
        if let Some(task) = self.task.as_mut() {
            match task.await {
                Ok(stats) => self.last_stats = stats,
                Err(e) => tracing::error!(error = %e, "poll loop task failed"),
            }
            self.task = None;
        }
        self.last_stats
    }

    /// `stop()` then `join()`.
    pub async fn shutdown(mut self) -> PollStats {
        self.stop();
        self.join().await
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop<F, Fut>(
    period: Duration,
    mut tick: F,
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
) -> PollStats
where
    F: FnMut(TickGuard) -> Fut + Send + 'static,
    Fut: Future<Output = TickControl> + Send + 'static,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut stats = PollStats::default();
    let mut in_flight: Option<JoinHandle<TickControl>> = None;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            joined = wait_in_flight(&mut in_flight) => {
                in_flight = None;
                match joined {
                    Ok(TickControl::Continue) => {}
                    Ok(TickControl::Stop) => {
                        tracing::debug!(ticks = stats.started, "tick requested stop");
                        break;
                    }
                    Err(e) => {
                        stats.panicked += 1;
                        tracing::error!(error = %e, "tick task failed; polling continues");
                    }
                }
            }

            _ = ticker.tick() => {
                if in_flight.is_some() {
                    stats.skipped += 1;
                    tracing::debug!(skipped = stats.skipped, "tick still in flight; skipping");
                    continue;
                }
                stats.started += 1;
                let guard = TickGuard {
                    active: Arc::clone(&active),
                    sequence: stats.started,
                };
                in_flight = Some(tokio::spawn(tick(guard)));
            }
        }
    }

    active.store(false, Ordering::Release);

    if let Some(task) = in_flight.take() {
        stats.drained = true;
        if let Err(e) = task.await {
            stats.panicked += 1;
            tracing::error!(error = %e, "in-flight tick failed during shutdown");
        }
    }

    tracing::debug!(
        started = stats.started,
        skipped = stats.skipped,
        drained = stats.drained,
        "poll loop exited"
    );
    stats
}

async fn wait_in_flight(
    slot: &mut Option<JoinHandle<TickControl>>,
) -> Result<TickControl, tokio::task::JoinError> {
    match slot {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Probe {
        running: AtomicUsize,
        max_running: AtomicUsize,
        runs: AtomicUsize,
    }

    fn slow_tick(probe: Arc<Probe>, work: Duration) -> impl FnMut(TickGuard) -> std::pin::Pin<Box<dyn Future<Output = TickControl> + Send>> {
        move |_guard| {
            let probe = Arc::clone(&probe);
            Box::pin(async move {
                let now = probe.running.fetch_add(1, Ordering::SeqCst) + 1;
                probe.max_running.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(work).await;
                probe.running.fetch_sub(1, Ordering::SeqCst);
                probe.runs.fetch_add(1, Ordering::SeqCst);
                TickControl::Continue
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_period() {
        let probe = Arc::new(Probe::default());
        let handle = start(Duration::from_millis(300), slow_tick(Arc::clone(&probe), Duration::ZERO));
        tokio::time::sleep(Duration::from_millis(299)).await;
        assert_eq!(probe.runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(probe.runs.load(Ordering::SeqCst), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_ticks_all_run() {
        let probe = Arc::new(Probe::default());
        let handle = start(Duration::from_millis(300), slow_tick(Arc::clone(&probe), Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(3050)).await;
        let stats = handle.shutdown().await;
        assert_eq!(stats.started, 10);
        assert_eq!(stats.skipped, 0);
        assert_eq!(probe.runs.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_ticks_are_skipped_not_queued() {
        let probe = Arc::new(Probe::default());
        let handle = start(
            Duration::from_millis(1500),
            slow_tick(Arc::clone(&probe), Duration::from_millis(4000)),
        );
        tokio::time::sleep(Duration::from_millis(15_100)).await;
        let stats = handle.shutdown().await;
        assert_eq!(probe.max_running.load(Ordering::SeqCst), 1);
        assert!(stats.skipped > 0);
        // 4s ticks on a 1.5s timer: a tick starts at most every 3 firings.
        assert!(stats.started <= 4, "started {}", stats.started);
        assert_eq!(stats.started + stats.skipped, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_in_flight_finish_but_marks_stale() {
        let seen_current = Arc::new(AtomicUsize::new(0));
        let seen_stale = Arc::new(AtomicUsize::new(0));
        let (cur, stale) = (Arc::clone(&seen_current), Arc::clone(&seen_stale));
        let mut handle = start(Duration::from_millis(100), move |guard: TickGuard| {
            let (cur, stale) = (Arc::clone(&cur), Arc::clone(&stale));
            async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                if guard.is_current() {
                    cur.fetch_add(1, Ordering::SeqCst);
                } else {
                    stale.fetch_add(1, Ordering::SeqCst);
                }
                TickControl::Continue
            }
        });
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.stop();
        assert!(!handle.is_active());
        let stats = handle.join().await;
        assert!(stats.drained);
        assert_eq!(stats.started, 1);
        assert_eq!(seen_current.load(Ordering::SeqCst), 0);
        assert_eq!(seen_stale.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let probe = Arc::new(Probe::default());
        let mut handle = start(Duration::from_millis(300), slow_tick(Arc::clone(&probe), Duration::ZERO));
        handle.stop();
        handle.stop();
        let a = handle.join().await;
        handle.stop();
        let b = handle.join().await;
        assert_eq!(a, b);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopping_one_scheduler_leaves_another_running() {
        let pa = Arc::new(Probe::default());
        let pb = Arc::new(Probe::default());
        let a = start(Duration::from_millis(100), slow_tick(Arc::clone(&pa), Duration::ZERO));
        let b = start(Duration::from_millis(100), slow_tick(Arc::clone(&pb), Duration::ZERO));
        a.shutdown().await;
        tokio::time::sleep(Duration::from_millis(1050)).await;
        assert_eq!(pa.runs.load(Ordering::SeqCst), 0);
        assert_eq!(pb.runs.load(Ordering::SeqCst), 10);
        assert!(b.is_active());
        b.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_can_stop_loop() {
        let mut handle = start(Duration::from_millis(100), |guard: TickGuard| async move {
            if guard.sequence() == 3 {
                TickControl::Stop
            } else {
                TickControl::Continue
            }
        });
        let stats = handle.join().await;
        assert_eq!(stats.started, 3);
        assert!(!stats.drained);
        assert!(!handle.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_tick_does_not_end_loop() {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&runs);
        let handle = start(Duration::from_millis(100), move |guard: TickGuard| {
            let r = Arc::clone(&r);
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                if guard.sequence() == 1 {
                    panic!("boom");
                }
                TickControl::Continue
            }
        });
        tokio::time::sleep(Duration::from_millis(350)).await;
        let stats = handle.shutdown().await;
        assert_eq!(stats.panicked, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
