//! Time source for polling loops.
//!
//! Transport polling and inter-block delays go through [`Clock`] so the same
//! code runs against the Tokio timer in production and against a virtual
//! clock in tests.

#![allow(async_fn_in_trait)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Monotonic time source with async sleep.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was created.
    fn now(&self) -> Duration;

    /// Suspend the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the Tokio timer.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Default)]
struct ManualState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

/// Virtual clock for tests.
///
/// Sleeping advances virtual time immediately and records the requested
/// duration. Clones share the same timeline.
///
/// # Examples
///
/// ```
/// use keycard_hardware::clock::{Clock, ManualClock};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let clock = ManualClock::new();
///     clock.sleep(Duration::from_millis(200)).await;
///     assert_eq!(clock.now(), Duration::from_millis(200));
///     assert_eq!(clock.sleeps(), vec![Duration::from_millis(200)]);
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move virtual time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        self.state().elapsed += duration;
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state().sleeps.clone()
    }

    /// Total virtual time spent sleeping.
    pub fn total_slept(&self) -> Duration {
        self.state().sleeps.iter().sum()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.state().elapsed
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut state = self.state();
            state.elapsed += duration;
            state.sleeps.push(duration);
        }
        tokio::task::yield_now().await;
    }
}

/// Enum wrapper for clock dispatch.
///
/// `Clock` uses native `async fn`, so it cannot be boxed; this wrapper gives
/// components a single concrete clock type.
#[derive(Debug, Clone)]
pub enum AnyClock {
    Tokio(TokioClock),
    Manual(ManualClock),
}

impl Default for AnyClock {
    fn default() -> Self {
        AnyClock::Tokio(TokioClock::new())
    }
}

impl From<TokioClock> for AnyClock {
    fn from(clock: TokioClock) -> Self {
        AnyClock::Tokio(clock)
    }
}

impl From<ManualClock> for AnyClock {
    fn from(clock: ManualClock) -> Self {
        AnyClock::Manual(clock)
    }
}

impl Clock for AnyClock {
    fn now(&self) -> Duration {
        match self {
            AnyClock::Tokio(clock) => clock.now(),
            AnyClock::Manual(clock) => clock.now(),
        }
    }

    async fn sleep(&self, duration: Duration) {
        match self {
            AnyClock::Tokio(clock) => clock.sleep(duration).await,
            AnyClock::Manual(clock) => clock.sleep(duration).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new();
        let other = clock.clone();

        other.sleep(Duration::from_millis(100)).await;
        clock.advance(Duration::from_millis(50));

        assert_eq!(clock.now(), Duration::from_millis(150));
        assert_eq!(clock.total_slept(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = AnyClock::from(TokioClock::new());
        clock.sleep(Duration::from_secs(10)).await;
        assert!(clock.now() >= Duration::from_secs(10));
    }
}
