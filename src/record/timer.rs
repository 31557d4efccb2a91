//! # Window Timer
//!
//! One-shot deadline that runs a callback on its own tokio task once the
//! window has elapsed. A timer is either armed, fired or cancelled; the last
//! two are terminal, so a timer never fires twice and cannot be re-armed.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Observable timer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Armed,
    Fired,
    Cancelled,
}

/// One-shot, cancellable deadline
///
/// Must be armed from within a tokio runtime.
#[derive(Debug)]
pub struct WindowTimer {
    lifespan: Duration,
    state: Arc<AtomicU8>,
    handle: JoinHandle<()>,
}

impl WindowTimer {
    /// Arm a timer that runs `on_fire` after `lifespan`
    ///
    /// Returns immediately; the callback runs on a spawned task.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use telemetry_archiver::record::timer::{TimerState, WindowTimer};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let timer = WindowTimer::arm(Duration::from_secs(60), || async {});
    /// assert_eq!(timer.state(), TimerState::Armed);
    /// assert!(timer.cancel());
    /// # }
    /// ```
    pub fn arm<F, Fut>(lifespan: Duration, on_fire: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(ARMED));
        let task_state = Arc::clone(&state);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(lifespan).await;

            if task_state
                .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                debug!("Window timer fired after {:?}", lifespan);
                on_fire().await;
            }
        });

        Self {
            lifespan,
            state,
            handle,
        }
    }

    /// Cancel the timer if it has not fired yet
    ///
    /// Returns `true` if this call prevented the callback from running.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        // Only abort while the callback cannot have started
        if cancelled {
            self.handle.abort();
        }
        cancelled
    }

    pub fn state(&self) -> TimerState {
        match self.state.load(Ordering::Acquire) {
            ARMED => TimerState::Armed,
            FIRED => TimerState::Fired,
            _ => TimerState::Cancelled,
        }
    }

    pub fn lifespan(&self) -> Duration {
        self.lifespan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_timer(lifespan: Duration) -> (WindowTimer, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let task_count = Arc::clone(&count);
        let timer = WindowTimer::arm(lifespan, move || async move {
            task_count.fetch_add(1, Ordering::SeqCst);
        });
        (timer, count)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once_after_lifespan() {
        let (timer, count) = counting_timer(Duration::from_secs(2));

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0, "Timer must not fire early");
        assert_eq!(timer.state(), TimerState::Armed);

        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(timer.state(), TimerState::Fired);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1, "Timer must fire exactly once");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_fire() {
        let (timer, count) = counting_timer(Duration::from_secs(2));

        assert!(timer.cancel());
        assert_eq!(timer.state(), TimerState::Cancelled);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!timer.cancel(), "Second cancel is a no-op");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fire_is_rejected() {
        let (timer, count) = counting_timer(Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert!(!timer.cancel());
        assert_eq!(timer.state(), TimerState::Fired);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_arm_does_not_block_caller() {
        let start = std::time::Instant::now();
        let timer = WindowTimer::arm(Duration::from_secs(3600), || async {});
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(timer.lifespan(), Duration::from_secs(3600));
        timer.cancel();
    }
}
