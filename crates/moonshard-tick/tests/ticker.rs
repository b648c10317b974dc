//! Integration tests for the fixed-interval ticker.
//!
//! Uses paused Tokio time so `sleep_until` resolves as soon as the runtime
//! is idle, and `tokio::time::advance` to simulate slow jobs.

use std::time::Duration;

use moonshard_tick::{TickConfig, Ticker};
use tokio::time::Instant;

fn every_secs(secs: u64) -> TickConfig {
    TickConfig::every(Duration::from_secs(secs)).without_jitter()
}

// =========================================================================
// TickConfig
// =========================================================================

#[test]
fn test_default_config_is_disabled() {
    let cfg = TickConfig::default();
    assert!(cfg.period.is_zero());
    assert!(!cfg.fire_immediately);
}

#[test]
fn test_validated_clamps_tiny_period_and_jitter() {
    let cfg = TickConfig {
        period: Duration::from_millis(1),
        initial_jitter: Duration::from_secs(5),
        ..Default::default()
    }
    .validated();
    assert_eq!(cfg.period, TickConfig::MIN_PERIOD);
    assert_eq!(cfg.initial_jitter, TickConfig::MIN_PERIOD);
}

// =========================================================================
// Firing
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_first_tick_fires_after_one_period() {
    let start = Instant::now();
    let mut ticker = Ticker::new(every_secs(30));

    let info = ticker.wait_for_tick().await;
    assert_eq!(info.tick, 1);
    assert_eq!(info.ticks_skipped, 0);
    assert!(start.elapsed() >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_immediately_fires_first_tick_without_waiting() {
    let start = Instant::now();
    let mut ticker = Ticker::new(every_secs(30).immediately());

    ticker.wait_for_tick().await;
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_ticks_increment_monotonically() {
    let mut ticker = Ticker::new(every_secs(1));
    for expected in 1..=5 {
        assert_eq!(ticker.wait_for_tick().await.tick, expected);
    }
    assert_eq!(ticker.tick_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_jitter_delays_first_tick_by_at_most_max() {
    let start = Instant::now();
    let mut ticker = Ticker::new(TickConfig {
        period: Duration::from_secs(10),
        initial_jitter: Duration::from_secs(2),
        ..Default::default()
    });
    ticker.wait_for_tick().await;
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(10));
    assert!(waited <= Duration::from_secs(12) + Duration::from_millis(5));
}

#[tokio::test(start_paused = true)]
async fn test_disabled_ticker_never_fires() {
    let mut ticker = Ticker::new(TickConfig::default());
    assert!(ticker.is_disabled());
    let result = tokio::time::timeout(Duration::from_secs(3600), ticker.wait_for_tick()).await;
    assert!(result.is_err(), "disabled ticker should pend forever");
}

// =========================================================================
// Overrun
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_overrun_reports_skipped_periods_and_reschedules_from_now() {
    let mut ticker = Ticker::new(every_secs(10));
    ticker.wait_for_tick().await;

    // The job takes 35s: three deadlines pass.
    tokio::time::advance(Duration::from_secs(35)).await;
    ticker.record_run_end();

    let info = ticker.wait_for_tick().await;
    assert_eq!(info.tick, 2);
    assert_eq!(info.ticks_skipped, 2);
    assert!(info.late_by >= Duration::from_secs(25));

    let before = Instant::now();
    let info = ticker.wait_for_tick().await;
    assert_eq!(info.ticks_skipped, 0);
    assert!(before.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_record_run_end_short_job_keeps_cadence() {
    let mut ticker = Ticker::new(every_secs(10));
    ticker.wait_for_tick().await;
    tokio::time::advance(Duration::from_secs(3)).await;
    ticker.record_run_end();

    let before = Instant::now();
    let info = ticker.wait_for_tick().await;
    assert_eq!(info.ticks_skipped, 0);
    let waited = before.elapsed();
    assert!(waited >= Duration::from_secs(7), "waited {waited:?}");
    assert!(waited < Duration::from_secs(8), "waited {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn test_record_run_end_without_tick_is_noop() {
    let mut ticker = Ticker::new(every_secs(60));
    ticker.record_run_end();
    assert_eq!(ticker.tick_count(), 0);
    assert_eq!(ticker.period(), Duration::from_secs(60));
}

// =========================================================================
// select! loop pattern
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_select_loop_stops_on_shutdown_signal() {
    let mut ticker = Ticker::new(every_secs(1));
    let (tx, mut rx) = tokio::sync::watch::channel(false);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(3500)).await;
        tx.send(true).ok();
    });

    let mut runs = 0u64;
    loop {
        tokio::select! {
            _ = rx.changed() => break,
            info = ticker.wait_for_tick() => {
                runs += 1;
                assert_eq!(info.tick, runs);
                ticker.record_run_end();
            }
        }
    }
    assert_eq!(runs, 3);
}
