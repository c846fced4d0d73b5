//! Pacing for remote calls
//!
//! One limiter is shared by every crawl and sync worker, so its delay
//! reflects the load the remote service is seeing overall.

use anyhow::Result;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::config::{ThrottleSettings, ThrottleStrategy};

#[derive(Debug)]
struct Gate {
    delay: Duration,
    last_error: Option<Instant>,
}

/// Serializes remote calls and sleeps before each one
#[derive(Debug)]
pub struct RateLimiter {
    settings: ThrottleSettings,
    gate: Mutex<Gate>,
    calls: AtomicUsize,
    errors: AtomicUsize,
}

impl RateLimiter {
    pub fn new(settings: ThrottleSettings) -> Self {
        let delay = match settings.strategy {
            ThrottleStrategy::None => Duration::ZERO,
            _ => Duration::from_millis(
                settings
                    .base_delay_ms
                    .clamp(settings.min_delay_ms, settings.max_delay_ms),
            ),
        };

        Self {
            settings,
            gate: Mutex::new(Gate {
                delay,
                last_error: None,
            }),
            calls: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        }
    }

    /// Sleep for the current delay, then run `call`, holding the gate throughout.
    ///
    /// Errors grow the adaptive delay and are returned unchanged; retrying is
    /// up to the caller.
    pub fn execute<T>(&self, call: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());

        if !gate.delay.is_zero() {
            std::thread::sleep(gate.delay);
        }

        let result = call();
        self.calls.fetch_add(1, Ordering::Relaxed);

        match &result {
            Ok(_) => self.on_success(&mut gate),
            Err(_) => self.on_error(&mut gate),
        }

        result
    }

    /// Count a failure that happened outside [`execute`](Self::execute),
    /// such as a body read after the request was opened
    pub fn record_error(&self) {
        let mut gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        self.on_error(&mut gate);
    }

    fn on_success(&self, gate: &mut Gate) {
        if self.settings.strategy != ThrottleStrategy::Adaptive {
            return;
        }
        let quiet = Duration::from_secs(self.settings.quiet_window_secs);
        if gate.last_error.is_none_or(|at| at.elapsed() >= quiet) {
            let min = Duration::from_millis(self.settings.min_delay_ms);
            gate.delay = gate.delay.mul_f64(self.settings.decay).max(min);
        }
    }

    fn on_error(&self, gate: &mut Gate) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        if self.settings.strategy != ThrottleStrategy::Adaptive {
            return;
        }
        let max = Duration::from_millis(self.settings.max_delay_ms);
        let floor = Duration::from_millis(self.settings.min_delay_ms.max(1));
        gate.delay = gate.delay.max(floor).mul_f64(self.settings.growth).min(max);
        gate.last_error = Some(Instant::now());
    }

    pub fn current_delay(&self) -> Duration {
        self.gate.lock().unwrap_or_else(|e| e.into_inner()).delay
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }
}
