use std::{future::Future, time::Duration};

use quanta::{Clock, Instant};

/// Measures elapsed wall-clock time, in milliseconds.
///
/// The elapsed value is only available after the timer has been stopped. Starting the timer again clears it.
#[derive(Debug)]
pub struct Timer {
    clock: Clock,
    started: Option<Instant>,
    elapsed_ms: Option<u64>,
}

impl Timer {
    /// Creates a new timer backed by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Clock::new())
    }

    /// Creates a new timer backed by the given clock.
    pub fn with_clock(clock: Clock) -> Self {
        Timer { clock, started: None, elapsed_ms: None }
    }

    /// Starts the timer, clearing any previous result.
    pub fn start(&mut self) -> &mut Self {
        self.elapsed_ms = None;
        self.started = Some(self.clock.now());
        self
    }

    /// Stops the timer and returns the elapsed time since it was started, rounded to the nearest millisecond.
    ///
    /// Returns `None` if the timer was not running.
    pub fn stop(&mut self) -> Option<u64> {
        let started = self.started.take()?;
        let elapsed = self.clock.now().saturating_duration_since(started);
        let elapsed_ms = round_millis(elapsed);

        self.elapsed_ms = Some(elapsed_ms);
        Some(elapsed_ms)
    }

    /// Returns the elapsed time of the last completed start/stop cycle.
    pub fn elapsed_ms(&self) -> Option<u64> {
        self.elapsed_ms
    }

    /// Starts the timer and returns a guard that stops it when dropped.
    pub fn scoped(&mut self) -> TimerScope<'_> {
        self.start();
        TimerScope { timer: self }
    }

    /// Times the given future, returning its output untouched.
    pub async fn measure<F: Future>(&mut self, work: F) -> F::Output {
        let _scope = self.scoped();
        work.await
    }
}

impl Default for Timer {
    fn default() -> Self {
        Timer::new()
    }
}

fn round_millis(elapsed: Duration) -> u64 {
    ((elapsed.as_micros() + 500) / 1000) as u64
}

/// A running timer, stopped when dropped.
pub struct TimerScope<'a> {
    timer: &'a mut Timer,
}

impl<'a> Drop for TimerScope<'a> {
    fn drop(&mut self) {
        self.timer.stop();
    }
}
