//! The event loop that drives the scheduler.
//!
//! The loop owns the wall-clock cadence: it invokes a callback, sleeps for
//! the configured cadence, and repeats until the callback asks it to break or
//! someone flips the stop flag from another thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::HostOptions;
use crate::error::SimResult;
use crate::scheduler::{SchedulerState, Simulation};

/// Pause applied while the simulation is halted and no cadence is configured,
/// so a halted run does not spin a core.
const HALTED_IDLE: Duration = Duration::from_millis(1);

/// What a loop callback wants next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopControl {
    /// Invoke the callback again after the cadence.
    Continue,
    /// Invoke the callback again, idling first if the cadence is zero.
    Idle,
    /// Leave the loop.
    Break,
}

/// Why [`EventLoop::run_simulation`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// The hardware model signalled completion.
    Finished,
    /// The configured tick limit was reached.
    TickLimit,
    /// The stop flag was raised.
    Stopped,
}

/// Cloneable handle that stops a running loop.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Asks the loop to exit after the current callback.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A periodic callback driver.
#[derive(Debug)]
pub struct EventLoop {
    cadence: Duration,
    stop: StopHandle,
    iterations: u64,
}

impl EventLoop {
    /// Creates a loop invoking its callback every `cadence`.
    pub fn new(cadence: Duration) -> Self {
        Self {
            cadence,
            stop: StopHandle::default(),
            iterations: 0,
        }
    }

    /// Creates a loop using the cadence from the host options.
    pub fn from_options(options: &HostOptions) -> Self {
        Self::new(options.cadence)
    }

    /// Returns a handle that stops this loop.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Number of callbacks invoked so far.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Runs `callback` until it breaks, fails, or the loop is stopped.
    ///
    /// # Returns
    /// `true` if the callback asked to break, `false` if the stop flag ended the loop
    pub fn run<F>(&mut self, mut callback: F) -> SimResult<bool>
    where
        F: FnMut() -> SimResult<LoopControl>,
    {
        loop {
            if self.stop.is_stopped() {
                tracing::debug!(iterations = self.iterations, "event loop stopped");
                return Ok(false);
            }

            self.iterations += 1;
            let control = callback()?;
            match control {
                LoopControl::Break => return Ok(true),
                LoopControl::Continue if !self.cadence.is_zero() => {
                    std::thread::sleep(self.cadence)
                }
                LoopControl::Continue => {}
                LoopControl::Idle => std::thread::sleep(self.cadence.max(HALTED_IDLE)),
            }
        }
    }

    /// Drives a simulation until it finishes, reaches its tick limit, or is stopped.
    pub fn run_simulation(&mut self, sim: &mut Simulation) -> SimResult<LoopExit> {
        let max_ticks = sim.options().max_ticks;
        let mut exit = LoopExit::Stopped;

        tracing::info!(
            cadence_us = self.cadence.as_micros() as u64,
            batch_size = sim.options().batch_size,
            "event loop running"
        );

        self.run(|| {
            let outcome = sim.run_batch()?;
            if outcome.state == SchedulerState::Finished {
                exit = LoopExit::Finished;
                return Ok(LoopControl::Break);
            }
            if max_ticks.is_some_and(|max| sim.total_ticks() >= max) {
                exit = LoopExit::TickLimit;
                return Ok(LoopControl::Break);
            }
            if outcome.state == SchedulerState::Halted {
                return Ok(LoopControl::Idle);
            }
            Ok(LoopControl::Continue)
        })?;

        tracing::info!(?exit, time_ps = sim.time_ps(), ticks = sim.total_ticks(), "event loop exited");
        Ok(exit)
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}
