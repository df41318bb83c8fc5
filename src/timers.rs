//! Election and broadcast timers, abstracted behind a
//! `Clock` trait so tests can drive virtual time deterministically
//! instead of sleeping for real.
//!
//! Both timer types use a generation counter ("epoch") to make `stop`
//! synchronous with respect to future firings: bumping the epoch under
//! the same atomic that a parked timer thread checks before invoking its
//! callback means no callback scheduled before the bump will act on
//! post-stop state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;

/// A source of delay. `SystemClock` sleeps for real; `ManualClock` is
/// driven by tests.
pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

fn sample_duration(min: Duration, max: Duration) -> Duration {
    if min >= max {
        return min;
    }
    let millis = rand::thread_rng().gen_range(min.as_millis()..=max.as_millis());
    Duration::from_millis(millis as u64)
}

/// One-shot, re-armed explicitly. Fires `on_timeout` once unless
/// `stop`/`reset` beats it to the punch.
pub struct ElectionTimer {
    clock: Arc<dyn Clock>,
    min: Duration,
    max: Duration,
    epoch: AtomicU64,
    on_timeout: Box<dyn Fn() + Send + Sync>,
}

impl ElectionTimer {
    pub fn new(
        clock: Arc<dyn Clock>,
        min: Duration,
        max: Duration,
        on_timeout: impl Fn() + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(ElectionTimer {
            clock,
            min,
            max,
            epoch: AtomicU64::new(0),
            on_timeout: Box::new(on_timeout),
        })
    }

    pub fn start(self: &Arc<Self>) {
        self.reset();
    }

    /// Cancels any in-flight arm and schedules a fresh one with a newly
    /// sampled delay in `[min, max]`.
    pub fn reset(self: &Arc<Self>) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = sample_duration(self.min, self.max);
        let this = self.clone();
        thread::spawn(move || {
            this.clock.sleep(delay);
            if this.epoch.load(Ordering::SeqCst) == epoch {
                (this.on_timeout)();
            }
        });
    }

    pub fn stop(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

/// Periodic; fixed period, leader-only. Its period must be strictly less
/// than `election_timeout_min` (enforced by `Config::validate`) so a
/// healthy leader never lets followers spuriously time out.
pub struct BroadcastTimer {
    clock: Arc<dyn Clock>,
    period: Duration,
    epoch: AtomicU64,
    on_tick: Box<dyn Fn() + Send + Sync>,
}

impl BroadcastTimer {
    pub fn new(
        clock: Arc<dyn Clock>,
        period: Duration,
        on_tick: impl Fn() + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(BroadcastTimer {
            clock,
            period,
            epoch: AtomicU64::new(0),
            on_tick: Box::new(on_tick),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        Self::arm(self.clone(), epoch);
    }

    fn arm(this: Arc<Self>, epoch: u64) {
        thread::spawn(move || {
            this.clock.sleep(this.period);
            if this.epoch.load(Ordering::SeqCst) == epoch {
                (this.on_tick)();
                BroadcastTimer::arm(this.clone(), epoch);
            }
        });
    }

    pub fn stop(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::{Condvar, Mutex};

    /// A clock whose `sleep` blocks until the test calls `advance`,
    /// regardless of the requested duration. Lets property tests fire
    /// timers on demand instead of waiting on wall-clock time.
    #[derive(Default)]
    pub struct ManualClock {
        state: Mutex<u64>,
        cv: Condvar,
    }

    impl ManualClock {
        pub fn new() -> Arc<Self> {
            Arc::new(ManualClock { state: Mutex::new(0), cv: Condvar::new() })
        }

        /// Releases every timer thread currently parked in `sleep`.
        pub fn advance(&self) {
            let mut tick = self.state.lock().unwrap();
            *tick += 1;
            self.cv.notify_all();
        }
    }

    impl Clock for ManualClock {
        fn sleep(&self, _duration: Duration) {
            let mut tick = self.state.lock().unwrap();
            let start = *tick;
            while *tick == start {
                tick = self.cv.wait(tick).unwrap();
            }
        }
    }
}
