// crates/resilience/src/sliding_window.rs
//! Sliding window rate limiter
//!
//! The window is split into equal sub-intervals. Admissions take permits from
//! a semaphore that starts full and record themselves in the current
//! sub-interval's slot. A background ticker walks the slots; when it reaches
//! slot `i` it hands back the permits that slot `i` consumed exactly one
//! window earlier. Admissions are therefore capped at `capacity` per window
//! and come back gradually instead of all at once at a window boundary.

use crate::error::{ResilienceError, ResilienceResult};
use crate::rate_limiter::{invalid, RateLimiter};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Sliding window limiter with a background ticker
#[derive(Debug)]
pub struct SlidingWindow {
    inner: Arc<WindowInner>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct WindowInner {
    capacity: u32,
    window: Duration,
    sub_interval: Duration,
    permits: Semaphore,
    state: Mutex<WindowState>,
}

#[derive(Debug)]
struct WindowState {
    current: Vec<u32>,
    previous: Vec<u32>,
    index: usize,
}

impl SlidingWindow {
    /// Creates the limiter and starts its ticker on the current runtime
    pub fn new(window: Duration, sub_interval: Duration, capacity: u32) -> ResilienceResult<Self> {
        if capacity == 0 {
            return Err(invalid("capacity must be greater than 0"));
        }
        if sub_interval.is_zero()
            || window < sub_interval
            || window.as_nanos() % sub_interval.as_nanos() != 0
        {
            return Err(invalid(
                "window must be a whole multiple of a non-zero sub-interval",
            ));
        }

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| ResilienceError::InvalidBudget("sliding window needs a tokio runtime".into()))?;

        let slots = (window.as_nanos() / sub_interval.as_nanos()) as usize;
        let inner = Arc::new(WindowInner {
            capacity,
            window,
            sub_interval,
            permits: Semaphore::new(capacity as usize),
            state: Mutex::new(WindowState {
                current: vec![0; slots],
                previous: vec![0; slots],
                index: 0,
            }),
        });

        let ticker = handle.spawn(run_ticker(Arc::downgrade(&inner), sub_interval));

        log::debug!(
            capacity = capacity,
            window_ms = window.as_millis() as u64,
            slots = slots;
            "sliding window limiter started"
        );

        Ok(Self {
            inner,
            ticker: Mutex::new(Some(ticker)),
        })
    }

    /// Admissions allowed per window
    pub fn capacity(&self) -> u32 {
        self.inner.capacity
    }

    /// Window length
    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// Sub-interval length
    pub fn sub_interval(&self) -> Duration {
        self.inner.sub_interval
    }

    /// Permits that can be taken right now without waiting
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }
}

async fn run_ticker(inner: Weak<WindowInner>, sub_interval: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + sub_interval, sub_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Burst);

    loop {
        interval.tick().await;
        match inner.upgrade() {
            Some(inner) => inner.advance(),
            None => break,
        }
    }
}

impl WindowInner {
    fn advance(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let slots = state.current.len();

        state.index = (state.index + 1) % slots;
        if state.index == 0 {
            state.previous = std::mem::replace(&mut state.current, vec![0; slots]);
        }

        let index = state.index;
        let expiring = state.previous[index];
        state.previous[index] = 0;
        drop(state);

        if expiring == 0 || self.permits.is_closed() {
            return;
        }

        // Never grow past capacity; surplus permits are dropped
        let room = (self.capacity as usize).saturating_sub(self.permits.available_permits());
        let released = (expiring as usize).min(room);
        if released > 0 {
            self.permits.add_permits(released);
        }
    }

    fn record(&self, n: u32) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let index = state.index;
        state.current[index] = state.current[index].saturating_add(n);
    }
}

#[async_trait]
impl RateLimiter for SlidingWindow {
    async fn wait_n(&self, n: u32, cancel: &CancellationToken) -> ResilienceResult<()> {
        if self.inner.permits.is_closed() {
            return Err(ResilienceError::LimiterShutdown);
        }
        if cancel.is_cancelled() {
            return Err(ResilienceError::Cancelled);
        }
        if n == 0 {
            return Ok(());
        }
        if n > self.inner.capacity {
            return Err(ResilienceError::InvalidBudget(format!(
                "requested {} permits but capacity is {}",
                n, self.inner.capacity
            )));
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ResilienceError::Cancelled),
            acquired = self.inner.permits.acquire_many(n) => {
                acquired.map_err(|_| ResilienceError::LimiterShutdown)?
            }
        };

        // Permits come back through the ticker, not on drop
        permit.forget();
        self.inner.record(n);
        Ok(())
    }

    fn reset(&self) {
        {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            state.current.iter_mut().for_each(|slot| *slot = 0);
            state.previous.iter_mut().for_each(|slot| *slot = 0);
            state.index = 0;
        }

        let missing = (self.inner.capacity as usize)
            .saturating_sub(self.inner.permits.available_permits());
        if missing > 0 && !self.inner.permits.is_closed() {
            self.inner.permits.add_permits(missing);
        }
    }

    fn shutdown(&self) {
        self.inner.permits.close();
        let ticker = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(ticker) = ticker {
            ticker.abort();
        }
    }
}

impl Drop for SlidingWindow {
    fn drop(&mut self) {
        let ticker = self
            .ticker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(ticker) = ticker {
            ticker.abort();
        }
    }
}
