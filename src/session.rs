//! Module sessions and the synchronous message bus.
//!
//! Sessions live in an arena indexed by [`SessionId`]. While one of a
//! session's callbacks runs, its module is checked out of the arena so the
//! callback can borrow every other session mutably through the bus.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::message::{Message, MessageError, MessageResult};
use crate::module::{Capabilities, Module};
use crate::types::SessionId;

/// One instantiated module.
pub struct Session {
    id: SessionId,
    module_name: String,
    tick_first: bool,
    capabilities: Capabilities,
    state: Option<Box<dyn Module>>,
    faulted: bool,
    closed: bool,
    ticks: u64,
    messages_handled: u64,
}

impl Session {
    /// Returns the session handle.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the name of the module this session instantiates.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Returns true if the session ticks before the hardware model.
    pub fn is_tick_first(&self) -> bool {
        self.tick_first
    }

    /// Returns true if a tick failure isolated this session.
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// Number of ticks this session has executed.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Number of messages this session has handled.
    pub fn messages_handled(&self) -> u64 {
        self.messages_handled
    }

    /// Returns a summary of the session.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            module: self.module_name.clone(),
            tick_first: self.tick_first,
            faulted: self.faulted,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("module", &self.module_name)
            .field("tick_first", &self.tick_first)
            .field("faulted", &self.faulted)
            .field("ticks", &self.ticks)
            .finish()
    }
}

/// Externally visible summary of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session handle
    pub id: SessionId,
    /// Module name
    pub module: String,
    /// Ticks before the hardware model
    pub tick_first: bool,
    /// Isolated after a tick failure
    pub faulted: bool,
}

/// Arena of sessions, doubling as the message bus.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: Vec<Session>,
    messages_delivered: u64,
}

impl SessionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session and returns its handle.
    pub(crate) fn insert(
        &mut self,
        module_name: &str,
        tick_first: bool,
        capabilities: Capabilities,
        state: Box<dyn Module>,
    ) -> SessionId {
        let id = SessionId(self.sessions.len() as u32);
        self.sessions.push(Session {
            id,
            module_name: module_name.to_string(),
            tick_first,
            capabilities,
            state: Some(state),
            faulted: false,
            closed: false,
            ticks: 0,
            messages_handled: 0,
        });
        id
    }

    /// Returns the number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns a session by handle.
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(id.index())
    }

    /// Iterates over all sessions in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    /// Returns summaries of all sessions.
    pub fn infos(&self) -> Vec<SessionInfo> {
        self.sessions.iter().map(Session::info).collect()
    }

    /// Total messages delivered to a handler.
    pub fn messages_delivered(&self) -> u64 {
        self.messages_delivered
    }

    /// Delivers a message synchronously and returns the handler's reply.
    ///
    /// A module that did not declare the message capability is never
    /// invoked; the caller receives [`MessageError::Unsupported`]. Faulted
    /// and closed sessions are no longer live and answer
    /// [`MessageError::NotFound`].
    pub fn send(&mut self, to: SessionId, msg: &Message) -> MessageResult {
        let Some(session) = self.sessions.get_mut(to.index()) else {
            tracing::error!(session = %to, op = %msg.op, "message sent to a session that does not exist");
            return Err(MessageError::NotFound(to));
        };
        if session.faulted || session.closed {
            tracing::warn!(session = %to, module = %session.module_name, op = %msg.op, "message sent to a session that is no longer live");
            return Err(MessageError::NotFound(to));
        }
        if !session.capabilities.message {
            tracing::debug!(session = %to, module = %session.module_name, op = %msg.op, "module has no message handler");
            return Err(MessageError::Unsupported);
        }
        let Some(state) = session.state.as_mut() else {
            return Err(MessageError::Busy(to));
        };

        let reply = state.message(msg);
        session.messages_handled += 1;
        self.messages_delivered += 1;
        reply
    }

    /// Takes a session's module out of the arena for the duration of a callback.
    pub(crate) fn checkout(&mut self, id: SessionId) -> Option<Box<dyn Module>> {
        self.sessions.get_mut(id.index()).and_then(|s| s.state.take())
    }

    /// Returns a module taken with [`SessionTable::checkout`].
    pub(crate) fn checkin(&mut self, id: SessionId, module: Box<dyn Module>) {
        if let Some(session) = self.sessions.get_mut(id.index()) {
            session.state = Some(module);
        }
    }

    pub(crate) fn record_tick(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.get_mut(id.index()) {
            session.ticks += 1;
        }
    }

    pub(crate) fn mark_faulted(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.get_mut(id.index()) {
            session.faulted = true;
        }
    }

    pub(crate) fn is_active(&self, id: SessionId) -> bool {
        self.get(id).is_some_and(|s| !s.faulted && !s.closed)
    }

    /// Runs `close` once on every session that declared the capability.
    pub(crate) fn close_all(&mut self) {
        for session in &mut self.sessions {
            if session.closed {
                continue;
            }
            if session.capabilities.close {
                if let Some(state) = session.state.as_mut() {
                    state.close();
                }
            }
            session.closed = true;
            tracing::debug!(session = %session.id, module = %session.module_name, "session closed");
        }
    }
}
