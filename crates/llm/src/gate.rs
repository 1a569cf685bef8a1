//! Shared admission gate for outbound AI calls.
//!
//! One slot is consumed per batch call. The gate enforces a daily cap that
//! resets at the UTC day boundary and a minimum spacing between granted
//! slots. The internal lock is held while waiting out the spacing, so callers
//! are granted strictly one after another.

use std::time::Duration;

use changewire_core::config::RateGateConfig;
use chrono::{NaiveDate, Utc};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateResult {
    Ok,
    QuotaExceeded,
    Interrupted,
}

type Today = Box<dyn Fn() -> NaiveDate + Send + Sync>;

struct GateState {
    day: NaiveDate,
    used: u32,
    last_granted: Option<Instant>,
}

pub struct RateGate {
    state: Mutex<GateState>,
    min_interval: Duration,
    max_per_day: u32,
    interrupt: watch::Sender<bool>,
    today: Today,
}

fn utc_today() -> NaiveDate {
    Utc::now().date_naive()
}

impl RateGate {
    pub fn new(min_interval: Duration, max_per_day: u32) -> Self {
        let (interrupt, _) = watch::channel(false);
        Self {
            state: Mutex::new(GateState {
                day: utc_today(),
                used: 0,
                last_granted: None,
            }),
            min_interval,
            max_per_day,
            interrupt,
            today: Box::new(utc_today),
        }
    }

    pub fn from_config(config: &RateGateConfig) -> Self {
        Self::new(
            Duration::from_millis(config.min_interval_ms),
            config.max_requests_per_day,
        )
    }

    /// Replace the UTC calendar used for the daily reset.
    pub fn with_calendar(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.state.get_mut().day = today();
        self.today = Box::new(today);
        self
    }

    /// Wake every pending and future wait with [`GateResult::Interrupted`].
    pub fn interrupt(&self) {
        self.interrupt.send_replace(true);
    }

    pub async fn used_today(&self) -> u32 {
        let mut state = self.state.lock().await;
        self.roll_day(&mut state);
        state.used
    }

    fn roll_day(&self, state: &mut GateState) {
        let today = (self.today)();
        if state.day != today {
            debug!(previous = %state.day, today = %today, "AI quota day rolled over");
            state.day = today;
            state.used = 0;
            state.last_granted = None;
        }
    }

    pub async fn acquire(&self) -> GateResult {
        let mut state = self.state.lock().await;
        self.roll_day(&mut state);

        if state.used >= self.max_per_day {
            info!(used = state.used, cap = self.max_per_day, "Daily AI quota exhausted");
            return GateResult::QuotaExceeded;
        }
        if *self.interrupt.borrow() {
            return GateResult::Interrupted;
        }

        if let Some(last) = state.last_granted {
            let ready_at = last + self.min_interval;
            if ready_at > Instant::now() {
                let mut interrupted = self.interrupt.subscribe();
                tokio::select! {
                    _ = tokio::time::sleep_until(ready_at) => {}
                    _ = interrupted.wait_for(|stop| *stop) => {
                        debug!("AI gate wait interrupted");
                        return GateResult::Interrupted;
                    }
                }
            }
        }

        state.used += 1;
        state.last_granted = Some(Instant::now());
        GateResult::Ok
    }
}
