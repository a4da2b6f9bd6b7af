//! Named periodic alarm driving the countdown

use std::future;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

pub const ALARM_NAME: &str = "floating-clock-timer";

/// A single periodic registration. Arming an armed alarm replaces it.
pub struct Alarm {
    name: &'static str,
    period: Duration,
    deadline: Option<Instant>,
}

impl Alarm {
    pub fn new(period: Duration) -> Self {
        Self {
            name: ALARM_NAME,
            period,
            deadline: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn arm(&mut self) {
        if self.is_armed() {
            debug!("Replacing alarm {}", self.name);
        }
        self.deadline = Some(Instant::now() + self.period);
    }

    pub fn clear(&mut self) {
        if self.deadline.take().is_some() {
            debug!("Cleared alarm {}", self.name);
        }
    }

    /// Resolves at the next deadline; pending forever while cleared.
    ///
    /// Cancel-safe: dropping the future before it resolves leaves the
    /// deadline untouched.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = Some(Instant::now() + self.period);
            }
            None => future::pending().await,
        }
    }
}
