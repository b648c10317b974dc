//! Fixed-interval ticker for Moonshard's background loops.
//!
//! Every periodic job in a shard (store cleanup, session sync, status
//! reporting) and in the authority (session age-out) is driven by a
//! [`Ticker`]. One ticker per loop; the loop owns it and mutates shared
//! state only inside its own iteration, so there are no overlapping timer
//! callbacks.
//!
//! # Disabled mode
//!
//! A zero `period` disables the ticker: [`Ticker::wait_for_tick`] pends
//! forever. A loop can keep the same `select!` shape whether or not a job
//! is configured.
//!
//! # Integration
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = shutdown.changed() => break,
//!         _ = ticker.wait_for_tick() => {
//!             store.run_cleanup_pass(Instant::now());
//!             ticker.record_run_end();
//!         }
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for one [`Ticker`].
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Time between ticks. `Duration::ZERO` disables the ticker.
    pub period: Duration,
    /// Fire the first tick right away instead of after one period.
    pub fire_immediately: bool,
    /// Random delay (0..max) added before the first tick so that shards
    /// started together do not all hit the authority at the same instant.
    pub initial_jitter: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            period: Duration::ZERO,
            fire_immediately: false,
            initial_jitter: Duration::from_millis(250),
        }
    }
}

impl TickConfig {
    /// Smallest non-zero period accepted; shorter periods are raised to it.
    pub const MIN_PERIOD: Duration = Duration::from_millis(10);

    /// A config that ticks every `period` with default settings.
    pub fn every(period: Duration) -> Self {
        Self {
            period,
            ..Default::default()
        }
    }

    /// Disables the initial jitter.
    pub fn without_jitter(mut self) -> Self {
        self.initial_jitter = Duration::ZERO;
        self
    }

    /// Fires the first tick immediately.
    pub fn immediately(mut self) -> Self {
        self.fire_immediately = true;
        self
    }

    /// Clamp out-of-range values. Called by [`Ticker::new`].
    pub fn validated(mut self) -> Self {
        if !self.period.is_zero() && self.period < Self::MIN_PERIOD {
            warn!(
                period_ms = self.period.as_millis() as u64,
                "tick period below minimum, clamping"
            );
            self.period = Self::MIN_PERIOD;
        }
        if self.initial_jitter > self.period {
            self.initial_jitter = self.period;
        }
        self
    }
}

/// Information about a fired tick.
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1).
    pub tick: u64,
    /// How late the tick fired relative to its deadline.
    pub late_by: Duration,
    /// Whole periods missed before this tick (0 in normal operation).
    pub ticks_skipped: u64,
}

// ---------------------------------------------------------------------------
// Ticker
// ---------------------------------------------------------------------------

/// Fixed-interval ticker. One per background loop.
///
/// Missed ticks are skipped: after a late tick the next one is scheduled a
/// full period from when it fired, so a slow job never causes a burst of
/// back-to-back runs.
pub struct Ticker {
    config: TickConfig,
    tick_count: u64,
    /// When the next tick should fire. `None` when disabled.
    next_tick: Option<Instant>,
    /// Set by `wait_for_tick`, consumed by `record_run_end`.
    run_start: Option<Instant>,
}

impl Ticker {
    /// Creates a ticker. The first deadline is scheduled now.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();

        let next_tick = if config.period.is_zero() {
            debug!("ticker created disabled");
            None
        } else {
            let jitter = if config.initial_jitter.is_zero() {
                Duration::ZERO
            } else {
                let max = config.initial_jitter.as_millis() as u64;
                Duration::from_millis(rand::rng().random_range(0..=max))
            };
            let first = if config.fire_immediately {
                jitter
            } else {
                config.period + jitter
            };
            debug!(
                period_ms = config.period.as_millis() as u64,
                first_ms = first.as_millis() as u64,
                "ticker created"
            );
            Some(Instant::now() + first)
        };

        Self {
            config,
            tick_count: 0,
            next_tick,
            run_start: None,
        }
    }

    /// Waits until the next tick is due.
    ///
    /// Pends forever when disabled. Cancel-safe: dropping the future
    /// before it resolves leaves the schedule unchanged.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let Some(next) = self.next_tick else {
            return std::future::pending().await;
        };
        let period = self.config.period;

        time::sleep_until(next).await;

        let now = Instant::now();
        self.tick_count += 1;
        self.run_start = Some(now);

        let late_by = now.saturating_duration_since(next);
        let ticks_skipped = (late_by.as_nanos() / period.as_nanos().max(1)) as u64;
        self.next_tick = Some(now + period);

        if ticks_skipped > 0 {
            warn!(
                tick = self.tick_count,
                skipped = ticks_skipped,
                late_ms = late_by.as_millis() as u64,
                "tick overrun"
            );
        }
        trace!(tick = self.tick_count, "tick fired");

        TickInfo {
            tick: self.tick_count,
            late_by,
            ticks_skipped,
        }
    }

    /// Records that the job for the current tick finished.
    ///
    /// A job that runs longer than a whole period is logged, since the
    /// next tick will then fire late.
    pub fn record_run_end(&mut self) {
        let Some(start) = self.run_start.take() else {
            return;
        };
        let elapsed = start.elapsed();
        if !self.config.period.is_zero() && elapsed >= self.config.period {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_millis() as u64,
                period_ms = self.config.period.as_millis() as u64,
                "periodic job outran its period"
            );
        }
    }

    /// Whether the ticker was created with a zero period.
    pub fn is_disabled(&self) -> bool {
        self.config.period.is_zero()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn period(&self) -> Duration {
        self.config.period
    }
}
