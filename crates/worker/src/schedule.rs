//! Cron-driven scheduler loops with a single-flight guard per scheduler.
//!
//! A tick that fires while the previous run of the same scheduler is still
//! going is dropped, not queued.

use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Parse a cron expression, auto-prepending "0 " for 5-field expressions.
///
/// The `cron` crate requires 6 fields (sec min hr dom mon dow).
pub fn parse_cron(expr: &str) -> Result<Schedule, cron::error::Error> {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        Schedule::from_str(&format!("0 {trimmed}"))
    } else {
        Schedule::from_str(trimmed)
    }
}

/// At most one run at a time.
#[derive(Debug, Default)]
pub struct SingleFlight {
    running: AtomicBool,
}

/// Held for the duration of a run; dropping it opens the flight again.
#[derive(Debug)]
pub struct FlightGuard {
    flight: Arc<SingleFlight>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.flight.running.store(false, Ordering::Release);
    }
}

impl SingleFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn try_start(self: &Arc<Self>) -> Option<FlightGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                flight: Arc::clone(self),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Start one run of `job` unless the previous one is still in flight.
pub fn fire<F, Fut>(name: &'static str, flight: &Arc<SingleFlight>, job: &F) -> Option<JoinHandle<()>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let Some(guard) = flight.try_start() else {
        info!(scheduler = name, "Previous run still in progress, tick skipped");
        return None;
    };
    let run = job();
    Some(tokio::spawn(async move {
        let _guard = guard;
        run.await;
    }))
}

/// Fire `job` on every tick of `schedule` until `shutdown` turns true, then
/// wait for the run in flight.
pub async fn run_cron<F, Fut>(
    name: &'static str,
    schedule: Schedule,
    flight: Arc<SingleFlight>,
    mut shutdown: watch::Receiver<bool>,
    job: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    info!(scheduler = name, "Scheduler started");
    let mut last: Option<JoinHandle<()>> = None;

    while !*shutdown.borrow() {
        let Some(next) = schedule.upcoming(Utc).next() else {
            warn!(scheduler = name, "Cron schedule has no upcoming tick");
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        debug!(scheduler = name, next = %next, "Waiting for next tick");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                if let Some(handle) = fire(name, &flight, &job) {
                    last = Some(handle);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(handle) = last {
        if let Err(e) = handle.await {
            warn!(scheduler = name, error = %e, "Scheduled run ended abnormally");
        }
    }
    info!(scheduler = name, "Scheduler stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;

    #[test]
    fn test_parse_cron_field_counts() {
        assert!(parse_cron("0 */5 * * * *").is_ok());
        assert!(parse_cron(" */10 * * * * ").is_ok());
        assert!(parse_cron("every five minutes").is_err());
    }

    #[test]
    fn test_single_flight_guard_releases_on_drop() {
        let flight = SingleFlight::new();
        let guard = flight.try_start().unwrap();
        assert!(flight.is_running());
        assert!(flight.try_start().is_none());

        drop(guard);
        assert!(!flight.is_running());
        assert!(flight.try_start().is_some());
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_dropped() {
        let flight = SingleFlight::new();
        let release = Arc::new(Notify::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let job = {
            let release = release.clone();
            let runs = runs.clone();
            move || {
                let release = release.clone();
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    release.notified().await;
                }
            }
        };

        let first = fire("test", &flight, &job).unwrap();
        assert!(fire("test", &flight, &job).is_none());

        while runs.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        release.notify_one();
        first.await.unwrap();

        assert!(!flight.is_running());
        assert!(fire("test", &flight, &job).is_some());
    }

    #[tokio::test]
    async fn test_loop_runs_until_shutdown() {
        let (stop, shutdown) = watch::channel(false);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let scheduler = tokio::spawn(run_cron(
            "every-second",
            parse_cron("* * * * * *").unwrap(),
            SingleFlight::new(),
            shutdown,
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        ));

        tokio::time::timeout(Duration::from_secs(5), async {
            while runs.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .unwrap();

        stop.send_replace(true);
        tokio::time::timeout(Duration::from_secs(5), scheduler)
            .await
            .unwrap()
            .unwrap();
    }
}
