//! Pads: the named signals the hardware model exposes to modules.
//!
//! The hardware model registers one [`PadList`] per interface instance during
//! start-up. Modules look them up by `(interface, index)` in `add_pads` and
//! keep cheap clones of the [`Signal`] handles they need.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{SimError, SimResult};

/// A shared signal value, at most 64 bits wide.
///
/// Clones alias the same storage, so a module writing a clone is observed by
/// the hardware model on its next evaluation and vice versa.
#[derive(Clone, Default)]
pub struct Signal {
    value: Arc<AtomicU64>,
    mask: u64,
}

impl Signal {
    /// Creates a zeroed signal of the given width in bits.
    pub fn new(width: u32) -> Self {
        let mask = match width {
            0 => 0,
            w if w >= 64 => u64::MAX,
            w => (1u64 << w) - 1,
        };
        Self {
            value: Arc::new(AtomicU64::new(0)),
            mask,
        }
    }

    /// Reads the current value.
    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Writes a value, truncated to the signal width.
    #[inline]
    pub fn set(&self, value: u64) {
        self.value.store(value & self.mask, Ordering::Relaxed);
    }

    /// Reads a single-bit signal.
    #[inline]
    pub fn is_high(&self) -> bool {
        self.get() & 1 != 0
    }

    /// Drives a single-bit signal.
    #[inline]
    pub fn set_bool(&self, high: bool) {
        self.set(u64::from(high));
    }

    /// Returns true if both handles alias the same storage.
    pub fn same_as(&self, other: &Signal) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("value", &self.get())
            .field("mask", &format_args!("{:#x}", self.mask))
            .finish()
    }
}

/// One named, width-tagged signal.
#[derive(Clone, Debug)]
pub struct Pad {
    /// Signal name, e.g. `"source_data"`
    pub name: String,
    /// Width in bits
    pub width: u32,
    /// Shared storage
    pub signal: Signal,
}

impl Pad {
    /// Creates a pad with fresh storage.
    pub fn new(name: impl Into<String>, width: u32) -> Self {
        Self {
            name: name.into(),
            width,
            signal: Signal::new(width),
        }
    }
}

/// The pads of one interface instance.
#[derive(Clone, Debug)]
pub struct PadList {
    /// Interface name, e.g. `"serial"`
    pub interface: String,
    /// Interface index
    pub index: u32,
    /// Pads in declaration order
    pub pads: Vec<Pad>,
}

impl PadList {
    /// Finds a pad by signal name.
    pub fn pad(&self, name: &str) -> Option<&Pad> {
        self.pads.iter().find(|p| p.name == name)
    }

    /// Returns a handle to the named signal, if present.
    pub fn signal(&self, name: &str) -> Option<Signal> {
        self.pad(name).map(|p| p.signal.clone())
    }

    /// Returns a handle to the named signal or a `MissingPad` error.
    pub fn require(&self, name: &str) -> SimResult<Signal> {
        self.signal(name).ok_or_else(|| SimError::MissingPad {
            interface: self.interface.clone(),
            index: self.index,
            signal: name.to_string(),
        })
    }

    /// Returns the declared width of the named signal.
    pub fn width_of(&self, name: &str) -> Option<u32> {
        self.pad(name).map(|p| p.width)
    }
}

/// Registry of every pad list exposed by the hardware model.
///
/// Registration prepends, and lookup returns the first match, so the most
/// recently registered list wins for a repeated key.
#[derive(Debug, Default)]
pub struct PadRegistry {
    lists: Vec<PadList>,
}

impl PadRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the pads of one interface instance.
    ///
    /// # Arguments
    /// * `pads` - The signals of the interface
    /// * `interface` - Interface name; must not be empty
    /// * `index` - Interface index
    pub fn register(&mut self, pads: Vec<Pad>, interface: &str, index: u32) -> SimResult<()> {
        if interface.is_empty() {
            return Err(SimError::InvalidArgument(
                "pad list registered without an interface name".to_string(),
            ));
        }
        if pads.is_empty() {
            return Err(SimError::InvalidArgument(format!(
                "pad list {interface}[{index}] registered without pads"
            )));
        }
        tracing::trace!(interface, index, count = pads.len(), "registered pads");
        self.lists.insert(
            0,
            PadList {
                interface: interface.to_string(),
                index,
                pads,
            },
        );
        Ok(())
    }

    /// Looks up a pad list by `(interface, index)`.
    pub fn find(&self, interface: &str, index: u32) -> Option<&PadList> {
        self.lists
            .iter()
            .find(|l| l.interface == interface && l.index == index)
    }

    /// Returns the number of registered lists.
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Iterates over registered lists, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &PadList> {
        self.lists.iter()
    }
}

/// Rising-edge detector for a clock signal.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClockEdge {
    previous: bool,
}

impl ClockEdge {
    /// Creates a detector that assumes the clock starts low.
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples the clock and returns true on a 0 -> 1 transition.
    #[inline]
    pub fn rising(&mut self, level: bool) -> bool {
        let edge = level && !self.previous;
        self.previous = level;
        edge
    }

    /// Samples the clock and returns true on a 1 -> 0 transition.
    #[inline]
    pub fn falling(&mut self, level: bool) -> bool {
        let edge = !level && self.previous;
        self.previous = level;
        edge
    }
}
