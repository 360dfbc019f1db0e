//! The simulation scheduler.
//!
//! [`Simulation`] owns the session arena, the clock, the pad registry and the
//! hardware model. The event loop calls [`Simulation::run_batch`] at its
//! cadence; each call services every session's I/O hook and then advances up
//! to `batch_size` ticks unless a halt is requested.
//!
//! Within one tick, tick-first sessions run before the model is evaluated and
//! therefore observe the previous tick's hardware state; the remaining
//! sessions run after evaluation and observe the state just computed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::config::{HostOptions, SimConfig};
use crate::error::{SimError, SimResult};
use crate::message::{Message, MessageResult};
use crate::model::HardwareModel;
use crate::module::{Module, SimContext, StartContext};
use crate::pads::PadRegistry;
use crate::registry::ModuleRegistry;
use crate::session::{SessionInfo, SessionTable};
use crate::stats::{SessionStats, SimulationStats, Timer};
use crate::types::{SessionId, SimClock, SimTime};

/// Lifecycle of a simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Sessions not yet instantiated
    NotStarted,
    /// Ticks advance on every callback
    Running,
    /// A halt is requested; callbacks only service I/O
    Halted,
    /// The model signalled completion; no further ticks
    Finished,
}

/// What the scheduler does when a session callback fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickErrorPolicy {
    /// Propagate the error and stop the event loop.
    Abort,
    /// Log the error, mark the session faulted and keep simulating without it.
    #[default]
    Isolate,
}

/// Which callback a session is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Callback {
    Poll,
    Tick,
}

/// Result of one scheduler callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Ticks executed in this callback
    pub ticks: u32,
    /// State after the callback
    pub state: SchedulerState,
}

/// A running simulation.
pub struct Simulation {
    clock: SimClock,
    sessions: SessionTable,
    tick_first: Vec<SessionId>,
    tick_last: Vec<SessionId>,
    model: Box<dyn HardwareModel>,
    pads: PadRegistry,
    halt: bool,
    state: SchedulerState,
    options: HostOptions,
    ticks: u64,
    batches: u64,
    halted_batches: u64,
    model_evals: u64,
    faults: u64,
    closed: bool,
    timer: Timer,
}

impl Simulation {
    /// Creates a simulation with no sessions and registers the model's pads.
    ///
    /// # Arguments
    /// * `timebase_ps` - Picoseconds per tick, non-zero
    /// * `model` - The hardware model to evaluate
    /// * `options` - Host knobs
    pub fn new(
        timebase_ps: SimTime,
        mut model: Box<dyn HardwareModel>,
        options: HostOptions,
    ) -> SimResult<Self> {
        if timebase_ps == 0 {
            return Err(SimError::InvalidArgument("timebase must be non-zero".to_string()));
        }
        if options.batch_size == 0 {
            return Err(SimError::InvalidArgument("batch size must be non-zero".to_string()));
        }

        let mut pads = PadRegistry::new();
        model.register_pads(&mut pads)?;
        tracing::debug!(pad_lists = pads.len(), "hardware model registered pads");

        Ok(Self {
            clock: SimClock::new(timebase_ps),
            sessions: SessionTable::new(),
            tick_first: Vec::new(),
            tick_last: Vec::new(),
            model,
            pads,
            halt: false,
            state: SchedulerState::NotStarted,
            options,
            ticks: 0,
            batches: 0,
            halted_batches: 0,
            model_evals: 0,
            faults: 0,
            closed: false,
            timer: Timer::start(),
        })
    }

    /// Builds and starts a simulation from a configuration in one step.
    pub fn from_config(
        config: &SimConfig,
        registry: &ModuleRegistry,
        model: Box<dyn HardwareModel>,
        options: HostOptions,
    ) -> SimResult<Self> {
        let mut sim = Self::new(config.timebase, model, options)?;
        sim.instantiate(config, registry)?;
        Ok(sim)
    }

    /// Instantiates every configured module and moves to `Running`.
    ///
    /// Any failure here is fatal: unknown module, too many instances of a
    /// singleton, a failing start hook, session factory or `add_pads`, or a
    /// reference to a pad list the model does not expose.
    pub fn instantiate(&mut self, config: &SimConfig, registry: &ModuleRegistry) -> SimResult<()> {
        if self.state != SchedulerState::NotStarted {
            return Err(SimError::Generic("simulation already started".to_string()));
        }
        if config.timebase != self.clock.timebase_ps() {
            return Err(SimError::InvalidArgument(format!(
                "configuration timebase {} differs from simulation timebase {}",
                config.timebase,
                self.clock.timebase_ps()
            )));
        }

        // Resolve descriptors and enforce instance limits before anything starts.
        let mut instances: HashMap<&str, usize> = HashMap::new();
        let mut start_order: Vec<&str> = Vec::new();
        for entry in &config.modules {
            let descriptor = registry.require(&entry.module)?;
            let count = instances.entry(descriptor.name.as_str()).or_insert(0);
            if *count == 0 {
                start_order.push(descriptor.name.as_str());
            }
            *count += 1;
            if let Some(max) = descriptor.max_instances {
                if *count > max {
                    return Err(SimError::InvalidArgument(format!(
                        "module {} allows at most {} instance(s)",
                        descriptor.name, max
                    )));
                }
            }
        }

        for name in &start_order {
            let descriptor = registry.require(name)?;
            if let Some(start) = descriptor.start {
                let ctx = StartContext {
                    timebase_ps: self.clock.timebase_ps(),
                    instances: instances.get(name).copied().unwrap_or(0),
                };
                start(&ctx)?;
                tracing::debug!(module = %name, "start hook ran");
            }
        }

        for entry in &config.modules {
            let descriptor = registry.require(&entry.module)?;
            let id = SessionId(self.sessions.len() as u32);
            let mut module: Box<dyn Module> = (descriptor.new_session)(&entry.args_string())
                .map_err(|e| e.in_session(id, &descriptor.name))?;

            for iface in &entry.interface {
                let list = self.pads.find(iface.name(), iface.index()).ok_or_else(|| {
                    SimError::InvalidArgument(format!(
                        "module {} references unknown interface {}[{}]",
                        descriptor.name,
                        iface.name(),
                        iface.index()
                    ))
                    .in_session(id, &descriptor.name)
                })?;
                module
                    .add_pads(list)
                    .map_err(|e| e.in_session(id, &descriptor.name))?;
            }

            let inserted = self.sessions.insert(
                &descriptor.name,
                entry.tickfirst,
                descriptor.capabilities,
                module,
            );
            if entry.tickfirst {
                self.tick_first.push(inserted);
            } else {
                self.tick_last.push(inserted);
            }
            tracing::info!(
                session = %inserted,
                module = %descriptor.name,
                tick_first = entry.tickfirst,
                interfaces = entry.interface.len(),
                "session created"
            );
        }

        self.state = SchedulerState::Running;
        self.timer = Timer::start();
        tracing::info!(
            sessions = self.sessions.len(),
            timebase_ps = self.clock.timebase_ps(),
            "simulation started"
        );
        Ok(())
    }

    /// One scheduler callback: service I/O, then advance up to a batch of ticks.
    pub fn run_batch(&mut self) -> SimResult<BatchOutcome> {
        match self.state {
            SchedulerState::NotStarted => {
                return Err(SimError::Generic("simulation not started".to_string()))
            }
            SchedulerState::Finished => {
                return Ok(BatchOutcome {
                    ticks: 0,
                    state: self.state,
                })
            }
            SchedulerState::Running | SchedulerState::Halted => {}
        }

        self.batches += 1;
        self.poll_io()?;
        self.sync_halt_state();

        let mut budget = self.options.batch_size;
        if let Some(max) = self.options.max_ticks {
            let remaining = max.saturating_sub(self.ticks);
            budget = budget.min(u32::try_from(remaining).unwrap_or(u32::MAX));
        }

        if self.halt {
            self.halted_batches += 1;
        }

        let mut ticks = 0;
        while ticks < budget && !self.halt && self.state != SchedulerState::Finished {
            self.step()?;
            ticks += 1;
        }
        self.sync_halt_state();

        Ok(BatchOutcome {
            ticks,
            state: self.state,
        })
    }

    /// Runs exactly `n` ticks, ignoring the batch size and halt requests.
    ///
    /// Stops early only if the model finishes.
    pub fn run_ticks(&mut self, n: u64) -> SimResult<u64> {
        if self.state == SchedulerState::NotStarted {
            return Err(SimError::Generic("simulation not started".to_string()));
        }
        let mut done = 0;
        while done < n && self.state != SchedulerState::Finished {
            self.step()?;
            done += 1;
        }
        Ok(done)
    }

    /// Executes one simulated tick.
    fn step(&mut self) -> SimResult<()> {
        for i in 0..self.tick_first.len() {
            self.run_callback(self.tick_first[i], Callback::Tick)?;
        }

        self.model.eval();
        self.model.flush_trace();
        self.model_evals += 1;

        for i in 0..self.tick_last.len() {
            self.run_callback(self.tick_last[i], Callback::Tick)?;
        }

        self.clock.advance();
        self.ticks += 1;

        if self.model.finished() {
            self.state = SchedulerState::Finished;
            tracing::info!(time_ps = self.clock.time_ps(), ticks = self.ticks, "hardware model finished");
        }
        Ok(())
    }

    /// Invokes every session's I/O hook once, in creation order.
    pub fn poll_io(&mut self) -> SimResult<()> {
        for i in 0..self.sessions.len() {
            self.run_callback(SessionId(i as u32), Callback::Poll)?;
        }
        Ok(())
    }

    fn run_callback(&mut self, id: SessionId, callback: Callback) -> SimResult<()> {
        if !self.sessions.is_active(id) {
            return Ok(());
        }
        let Some(mut module) = self.sessions.checkout(id) else {
            return Ok(());
        };

        let result = {
            let mut ctx = SimContext::new(id, self.clock, &mut self.halt, &mut self.sessions);
            match callback {
                Callback::Tick => module.tick(&mut ctx),
                Callback::Poll => module.poll(&mut ctx),
            }
        };
        self.sessions.checkin(id, module);
        if callback == Callback::Tick {
            self.sessions.record_tick(id);
        }

        match result {
            Ok(()) => Ok(()),
            Err(e) => self.handle_failure(id, callback, e),
        }
    }

    fn handle_failure(&mut self, id: SessionId, callback: Callback, err: SimError) -> SimResult<()> {
        self.faults += 1;
        let module = self
            .sessions
            .get(id)
            .map(|s| s.module_name().to_string())
            .unwrap_or_default();

        match self.options.tick_error_policy {
            TickErrorPolicy::Abort => {
                tracing::error!(session = %id, module = %module, ?callback, error = %err, "session failed, aborting");
                Err(err.in_session(id, &module))
            }
            TickErrorPolicy::Isolate => {
                tracing::error!(session = %id, module = %module, ?callback, error = %err, "session failed, isolating it");
                self.sessions.mark_faulted(id);
                Ok(())
            }
        }
    }

    fn sync_halt_state(&mut self) {
        self.state = match (self.state, self.halt) {
            (SchedulerState::Running, true) => SchedulerState::Halted,
            (SchedulerState::Halted, false) => SchedulerState::Running,
            (state, _) => state,
        };
    }

    /// Requests a halt; the next callback performs no ticks.
    pub fn halt(&mut self) {
        if !self.halt {
            tracing::info!(time_ps = self.clock.time_ps(), "halt requested");
        }
        self.halt = true;
        self.sync_halt_state();
    }

    /// Clears a halt request.
    pub fn resume(&mut self) {
        if self.halt {
            tracing::info!(time_ps = self.clock.time_ps(), "resuming");
        }
        self.halt = false;
        self.sync_halt_state();
    }

    /// Returns true if a halt is requested.
    pub fn is_halted(&self) -> bool {
        self.halt
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Returns true once the model has finished.
    pub fn is_finished(&self) -> bool {
        self.state == SchedulerState::Finished
    }

    /// Current simulated time.
    pub fn time_ps(&self) -> SimTime {
        self.clock.time_ps()
    }

    /// The simulation clock.
    pub fn clock(&self) -> SimClock {
        self.clock
    }

    /// Total ticks executed.
    pub fn total_ticks(&self) -> u64 {
        self.ticks
    }

    /// Host options in effect.
    pub fn options(&self) -> &HostOptions {
        &self.options
    }

    /// The pads the model exposed.
    pub fn pads(&self) -> &PadRegistry {
        &self.pads
    }

    /// Number of sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Summaries of every session.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.infos()
    }

    /// Sends a message to a session from outside any callback.
    pub fn send(&mut self, to: SessionId, msg: &Message) -> MessageResult {
        self.sessions.send(to, msg)
    }

    /// Calls `close` on every session that supports it. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.sessions.close_all();
        self.closed = true;
        tracing::info!(ticks = self.ticks, time_ps = self.clock.time_ps(), "simulation closed");
    }

    /// Snapshot of the run statistics.
    pub fn stats(&self) -> SimulationStats {
        let mut stats = SimulationStats::new();
        stats.scheduler.final_time_ps = self.clock.time_ps();
        stats.scheduler.timebase_ps = self.clock.timebase_ps();
        stats.scheduler.ticks_executed = self.ticks;
        stats.scheduler.batches = self.batches;
        stats.scheduler.halted_batches = self.halted_batches;
        stats.scheduler.model_evals = self.model_evals;
        stats.scheduler.messages_delivered = self.sessions.messages_delivered();
        stats.scheduler.faults = self.faults;
        stats.scheduler.finished = self.is_finished();
        stats.sessions = self
            .sessions
            .iter()
            .map(|s| SessionStats {
                id: s.id(),
                module: s.module_name().to_string(),
                ticks: s.ticks(),
                messages: s.messages_handled(),
                faulted: s.is_faulted(),
            })
            .collect();
        stats.compute_timing(self.timer.elapsed_ms());
        stats
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("state", &self.state)
            .field("time_ps", &self.clock.time_ps())
            .field("timebase_ps", &self.clock.timebase_ps())
            .field("sessions", &self.sessions.len())
            .field("halt", &self.halt)
            .finish()
    }
}
