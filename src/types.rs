//! Core type definitions for the simulation host.
//!
//! This module defines the scalar types shared by the scheduler, the
//! peripheral modules and the messaging bus.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Simulated time in picoseconds.
///
/// Every tick advances the clock by exactly one timebase, so the value after
/// `n` ticks is always `n * timebase`.
pub type SimTime = u64;

/// Number of picoseconds in one second.
pub const PS_PER_SECOND: u64 = 1_000_000_000_000;

/// Stable handle of an instantiated module session.
///
/// Sessions live in an arena owned by the scheduler; the handle is the arena
/// index and is never reused while the simulation runs. The same integer is
/// what the control channel exposes to external clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u32);

impl SessionId {
    /// Returns the arena slot backing this session.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the small integer exposed over the control channel.
    pub fn wire_id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The simulation clock: current time plus the constant step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimClock {
    time_ps: SimTime,
    timebase_ps: SimTime,
}

impl SimClock {
    /// Creates a clock at time zero with the given step.
    pub fn new(timebase_ps: SimTime) -> Self {
        Self {
            time_ps: 0,
            timebase_ps,
        }
    }

    /// Returns the current simulated time.
    pub fn time_ps(&self) -> SimTime {
        self.time_ps
    }

    /// Returns the constant step.
    pub fn timebase_ps(&self) -> SimTime {
        self.timebase_ps
    }

    /// Advances the clock by one timebase.
    pub(crate) fn advance(&mut self) {
        self.time_ps += self.timebase_ps;
    }

    /// Returns how many ticks have elapsed since time zero.
    pub fn ticks(&self) -> u64 {
        if self.timebase_ps == 0 {
            0
        } else {
            self.time_ps / self.timebase_ps
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id() {
        let id = SessionId(3);
        assert_eq!(id.index(), 3);
        assert_eq!(id.wire_id(), 3);
        assert_eq!(id.to_string(), "#3");
    }

    #[test]
    fn test_clock_advance() {
        let mut clock = SimClock::new(125);
        for _ in 0..8 {
            clock.advance();
        }
        assert_eq!(clock.time_ps(), 1000);
        assert_eq!(clock.ticks(), 8);
    }

    #[test]
    fn test_session_id_serializes_as_integer() {
        let json = serde_json::to_string(&SessionId(7)).unwrap();
        assert_eq!(json, "7");
    }
}
