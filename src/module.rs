//! Module definitions and the `Module` trait.
//!
//! A module is a peripheral emulation that drives and samples pads of the
//! hardware model. Each configured instance is a session: one boxed
//! [`Module`] created by its [`ModuleDescriptor`]'s factory.

use std::fmt;
use std::sync::Arc;

use crate::error::{SimError, SimResult};
use crate::message::{Message, MessageError, MessageResult};
use crate::pads::PadList;
use crate::session::{SessionInfo, SessionTable};
use crate::types::{SessionId, SimClock, SimTime};

/// Factory creating a session from its argument string.
pub type SessionFactory = Arc<dyn Fn(&str) -> SimResult<Box<dyn Module>> + Send + Sync>;

/// Optional per-descriptor start hook, run once before its first session.
pub type StartHook = fn(&StartContext) -> SimResult<()>;

/// Information handed to a descriptor's start hook.
#[derive(Clone, Debug)]
pub struct StartContext {
    /// Picoseconds per tick
    pub timebase_ps: SimTime,
    /// Number of sessions about to be created for this descriptor
    pub instances: usize,
}

/// Optional capabilities a module declares.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// The module handles messages
    pub message: bool,
    /// The module needs `close` at shutdown
    pub close: bool,
}

/// Static description of a module kind: its name and lifecycle callbacks.
#[derive(Clone)]
pub struct ModuleDescriptor {
    /// Unique module name, matched against the configuration
    pub name: String,
    /// Optional start hook
    pub start: Option<StartHook>,
    /// Session factory
    pub new_session: SessionFactory,
    /// Declared optional capabilities
    pub capabilities: Capabilities,
    /// Upper bound on sessions per simulation
    pub max_instances: Option<usize>,
}

impl ModuleDescriptor {
    /// Creates a descriptor with no optional capabilities.
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&str) -> SimResult<Box<dyn Module>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            start: None,
            new_session: Arc::new(factory),
            capabilities: Capabilities::default(),
            max_instances: None,
        }
    }

    /// Sets the start hook.
    pub fn with_start(mut self, hook: StartHook) -> Self {
        self.start = Some(hook);
        self
    }

    /// Declares the message capability.
    pub fn with_messages(mut self) -> Self {
        self.capabilities.message = true;
        self
    }

    /// Declares the close capability.
    pub fn with_close(mut self) -> Self {
        self.capabilities.close = true;
        self
    }

    /// Limits how many sessions a simulation may create.
    pub fn singleton(mut self) -> Self {
        self.max_instances = Some(1);
        self
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("start", &self.start.is_some())
            .field("capabilities", &self.capabilities)
            .field("max_instances", &self.max_instances)
            .finish()
    }
}

/// What a session sees while one of its callbacks runs.
///
/// The context borrows the rest of the session table, so a callback may send
/// messages to any other session synchronously.
pub struct SimContext<'a> {
    session: SessionId,
    clock: SimClock,
    halt: &'a mut bool,
    sessions: &'a mut SessionTable,
}

impl<'a> SimContext<'a> {
    pub(crate) fn new(
        session: SessionId,
        clock: SimClock,
        halt: &'a mut bool,
        sessions: &'a mut SessionTable,
    ) -> Self {
        Self {
            session,
            clock,
            halt,
            sessions,
        }
    }

    /// Current simulated time in picoseconds.
    pub fn time_ps(&self) -> SimTime {
        self.clock.time_ps()
    }

    /// Picoseconds per tick.
    pub fn timebase_ps(&self) -> SimTime {
        self.clock.timebase_ps()
    }

    /// Handle of the session running the callback.
    pub fn session_id(&self) -> SessionId {
        self.session
    }

    /// Returns true if a halt is requested.
    pub fn is_halted(&self) -> bool {
        *self.halt
    }

    /// Requests or clears a halt.
    pub fn set_halt(&mut self, halt: bool) {
        if *self.halt != halt {
            tracing::info!(session = %self.session, halt, "halt request changed");
        }
        *self.halt = halt;
    }

    /// Sends a message to another session and returns its reply.
    pub fn send(&mut self, to: SessionId, msg: &Message) -> MessageResult {
        if to == self.session {
            return Err(MessageError::Busy(to));
        }
        self.sessions.send(to, msg)
    }

    /// Lists the sessions of the simulation.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.infos()
    }
}

/// Runs `f` with a context over an empty session table at time zero.
#[cfg(test)]
pub(crate) fn with_test_context<R>(f: impl FnOnce(&mut SimContext<'_>) -> R) -> R {
    let mut halt = false;
    let mut table = SessionTable::new();
    let mut ctx = SimContext::new(SessionId(0), SimClock::new(1), &mut halt, &mut table);
    f(&mut ctx)
}

/// The capability set every peripheral implements.
///
/// `add_pads` and `tick` are mandatory; the rest have inert defaults.
pub trait Module: Send {
    /// Receives one configured pad list. Called once per interface.
    fn add_pads(&mut self, pads: &PadList) -> SimResult<()>;

    /// Called once per simulated tick.
    fn tick(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()>;

    /// Services external I/O. Called once per scheduler callback, even while halted.
    fn poll(&mut self, _ctx: &mut SimContext<'_>) -> SimResult<()> {
        Ok(())
    }

    /// Releases external resources at shutdown.
    fn close(&mut self) {}

    /// Handles a message from another session or the control channel.
    fn message(&mut self, _msg: &Message) -> MessageResult {
        Err(MessageError::Unsupported)
    }
}

/// Parsed module arguments.
///
/// Every module re-parses its own argument string and looks keys up itself.
#[derive(Clone, Debug, Default)]
pub struct ModuleArgs {
    value: serde_json::Value,
}

impl ModuleArgs {
    /// Parses an argument string. The empty string yields no arguments.
    pub fn parse(args: &str) -> SimResult<Self> {
        if args.trim().is_empty() {
            return Ok(Self {
                value: serde_json::Value::Object(serde_json::Map::new()),
            });
        }
        let value: serde_json::Value =
            serde_json::from_str(args).map_err(|e| SimError::Parse(e.to_string()))?;
        if !value.is_object() {
            return Err(SimError::Parse(format!(
                "module arguments must be a JSON object, got {value}"
            )));
        }
        Ok(Self { value })
    }

    /// Returns true if the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.value.get(key).is_some()
    }

    /// Reads an unsigned integer, accepting numeric strings as well.
    pub fn get_u64(&self, key: &str) -> SimResult<Option<u64>> {
        match self.value.get(key) {
            None => Ok(None),
            Some(serde_json::Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
                SimError::InvalidArgument(format!("argument {key} must be unsigned"))
            }),
            Some(serde_json::Value::String(s)) => parse_u64(s)
                .map(Some)
                .ok_or_else(|| SimError::InvalidArgument(format!("argument {key}: bad number {s}"))),
            Some(other) => Err(SimError::InvalidArgument(format!(
                "argument {key} must be a number, got {other}"
            ))),
        }
    }

    /// Reads an unsigned integer with a default.
    pub fn u64_or(&self, key: &str, default: u64) -> SimResult<u64> {
        Ok(self.get_u64(key)?.unwrap_or(default))
    }

    /// Reads a string argument.
    pub fn get_str(&self, key: &str) -> SimResult<Option<&str>> {
        match self.value.get(key) {
            None => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(SimError::InvalidArgument(format!(
                "argument {key} must be a string, got {other}"
            ))),
        }
    }

    /// Reads a boolean argument.
    pub fn get_bool(&self, key: &str) -> SimResult<Option<bool>> {
        match self.value.get(key) {
            None => Ok(None),
            Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(SimError::InvalidArgument(format!(
                "argument {key} must be a boolean, got {other}"
            ))),
        }
    }

    /// Reads a boolean with a default.
    pub fn bool_or(&self, key: &str, default: bool) -> SimResult<bool> {
        Ok(self.get_bool(key)?.unwrap_or(default))
    }

    /// The parsed argument object.
    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }
}

/// Parses a module argument string into a JSON object.
pub fn parse_args(args: &str) -> SimResult<serde_json::Value> {
    Ok(ModuleArgs::parse(args)?.value)
}

/// Parses decimal or `0x`-prefixed hexadecimal.
fn parse_u64(s: &str) -> Option<u64> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}
