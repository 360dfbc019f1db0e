//! Shared machinery of the serial bridges.
//!
//! A serial interface exposes a byte stream in each direction with
//! valid/ready handshakes:
//!
//! - `source_valid`, `source_ready`, `source_data`: hardware to host
//! - `sink_valid`, `sink_ready`, `sink_data`: host to hardware
//!
//! and is clocked by `sys_clk`. On every rising edge the bridge accepts at
//! most one byte from the hardware and presents at most one byte to it.
//! Host bytes wait in a fixed-capacity [`RingBuffer`].

use crate::error::{SimError, SimResult};
use crate::pads::{ClockEdge, PadList, Signal};

/// Capacity of the host-to-hardware ring.
pub const RING_CAPACITY: usize = 2048;

/// Fixed-capacity byte FIFO with wrap-around indices.
#[derive(Clone)]
pub struct RingBuffer {
    buf: Box<[u8]>,
    start: usize,
    len: usize,
}

impl RingBuffer {
    /// Creates an empty ring.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity].into_boxed_slice(),
            start: 0,
            len: 0,
        }
    }

    /// Total capacity.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes queued.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if no byte can be pushed.
    pub fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    /// Free space in bytes.
    pub fn free(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Appends a byte. Returns false, leaving the ring untouched, when full.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }
        let end = (self.start + self.len) % self.buf.len();
        self.buf[end] = byte;
        self.len += 1;
        true
    }

    /// Removes the oldest byte.
    pub fn pop(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let byte = self.buf[self.start];
        self.start = (self.start + 1) % self.buf.len();
        self.len -= 1;
        Some(byte)
    }

    /// Appends as many bytes as fit and returns how many were taken.
    pub fn extend_from(&mut self, bytes: &[u8]) -> usize {
        let mut taken = 0;
        for &b in bytes {
            if !self.push(b) {
                break;
            }
            taken += 1;
        }
        taken
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .finish()
    }
}

/// Resolved serial pads.
#[derive(Clone, Debug)]
struct SerialPads {
    source_valid: Signal,
    source_ready: Signal,
    source_data: Signal,
    sink_valid: Signal,
    sink_ready: Signal,
    sink_data: Signal,
}

/// Clock-edge driven core shared by the console and TCP bridges.
#[derive(Debug)]
pub struct SerialBridge {
    pads: Option<SerialPads>,
    sys_clk: Option<Signal>,
    edge: ClockEdge,
    rx: RingBuffer,
    presenting: bool,
    dropped: u64,
    bytes_to_hw: u64,
    bytes_from_hw: u64,
}

impl Default for SerialBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialBridge {
    /// Creates an unconnected bridge with a [`RING_CAPACITY`] ring.
    pub fn new() -> Self {
        Self {
            pads: None,
            sys_clk: None,
            edge: ClockEdge::new(),
            rx: RingBuffer::new(RING_CAPACITY),
            presenting: false,
            dropped: 0,
            bytes_to_hw: 0,
            bytes_from_hw: 0,
        }
    }

    /// Accepts the `serial` and `sys_clk` pad lists; others are ignored.
    pub fn add_pads(&mut self, pads: &PadList) -> SimResult<()> {
        match pads.interface.as_str() {
            "serial" => {
                self.pads = Some(SerialPads {
                    source_valid: pads.require("source_valid")?,
                    source_ready: pads.require("source_ready")?,
                    source_data: pads.require("source_data")?,
                    sink_valid: pads.require("sink_valid")?,
                    sink_ready: pads.require("sink_ready")?,
                    sink_data: pads.require("sink_data")?,
                });
            }
            "sys_clk" => self.sys_clk = Some(pads.require("sys_clk")?),
            other => tracing::debug!(interface = other, "serial bridge ignores interface"),
        }
        Ok(())
    }

    /// Queues host bytes for the hardware and returns how many were accepted.
    ///
    /// Bytes beyond the ring's free space are dropped and counted.
    pub fn feed(&mut self, bytes: &[u8]) -> usize {
        let taken = self.rx.extend_from(bytes);
        let dropped = bytes.len() - taken;
        if dropped > 0 {
            self.dropped += dropped as u64;
            tracing::warn!(dropped, "serial ring full, dropping host bytes");
        }
        taken
    }

    /// Free space in the host-to-hardware ring.
    pub fn free(&self) -> usize {
        self.rx.free()
    }

    /// Bytes waiting for the hardware.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Advances the bridge by one tick.
    ///
    /// # Returns
    /// The byte the hardware transmitted on this tick's rising edge, if any
    pub fn tick(&mut self) -> SimResult<Option<u8>> {
        let (Some(pads), Some(clk)) = (&self.pads, &self.sys_clk) else {
            return Err(SimError::InvalidArgument(
                "serial bridge needs both serial and sys_clk pads".to_string(),
            ));
        };
        if !self.edge.rising(clk.is_high()) {
            return Ok(None);
        }

        pads.source_ready.set_bool(true);
        let received = if pads.source_valid.is_high() {
            self.bytes_from_hw += 1;
            Some(pads.source_data.get() as u8)
        } else {
            None
        };

        if self.presenting && pads.sink_ready.is_high() {
            self.presenting = false;
        }
        if !self.presenting {
            match self.rx.pop() {
                Some(byte) => {
                    pads.sink_data.set(u64::from(byte));
                    pads.sink_valid.set_bool(true);
                    self.presenting = true;
                    self.bytes_to_hw += 1;
                }
                None => pads.sink_valid.set_bool(false),
            }
        }

        Ok(received)
    }

    /// Counters as a JSON object for message replies.
    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "pending": self.rx.len(),
            "dropped": self.dropped,
            "bytes_to_hw": self.bytes_to_hw,
            "bytes_from_hw": self.bytes_from_hw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pads::Pad;

    #[test]
    fn test_ring_wraps() {
        let mut ring = RingBuffer::new(4);
        assert_eq!(ring.extend_from(&[1, 2, 3]), 3);
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.extend_from(&[4, 5, 6, 7]), 3);
        assert!(ring.is_full());
        assert!(!ring.push(8));
        let drained: Vec<u8> = std::iter::from_fn(|| ring.pop()).collect();
        assert_eq!(drained, vec![3, 4, 5, 6]);
    }

    fn serial_pads() -> (PadList, PadList) {
        let serial = PadList {
            interface: "serial".to_string(),
            index: 0,
            pads: [
                ("source_valid", 1),
                ("source_ready", 1),
                ("source_data", 8),
                ("sink_valid", 1),
                ("sink_ready", 1),
                ("sink_data", 8),
            ]
            .iter()
            .map(|(n, w)| Pad::new(*n, *w))
            .collect(),
        };
        let clk = PadList {
            interface: "sys_clk".to_string(),
            index: 0,
            pads: vec![Pad::new("sys_clk", 1)],
        };
        (serial, clk)
    }

    #[test]
    fn test_one_byte_per_edge() {
        let (serial, clk) = serial_pads();
        let mut bridge = SerialBridge::new();
        bridge.add_pads(&serial).unwrap();
        bridge.add_pads(&clk).unwrap();
        bridge.feed(b"ab");

        let sys_clk = clk.signal("sys_clk").unwrap();
        let sink_valid = serial.signal("sink_valid").unwrap();
        let sink_data = serial.signal("sink_data").unwrap();
        let sink_ready = serial.signal("sink_ready").unwrap();

        // No edge, nothing moves.
        bridge.tick().unwrap();
        assert!(!sink_valid.is_high());

        sys_clk.set_bool(true);
        bridge.tick().unwrap();
        assert_eq!(sink_data.get(), b'a' as u64);
        assert_eq!(bridge.pending(), 1);

        // Hardware not ready: the byte is held across edges.
        sys_clk.set_bool(false);
        bridge.tick().unwrap();
        sys_clk.set_bool(true);
        bridge.tick().unwrap();
        assert_eq!(sink_data.get(), b'a' as u64);

        sink_ready.set_bool(true);
        sys_clk.set_bool(false);
        bridge.tick().unwrap();
        sys_clk.set_bool(true);
        bridge.tick().unwrap();
        assert_eq!(sink_data.get(), b'b' as u64);
        assert_eq!(bridge.pending(), 0);
    }

    #[test]
    fn test_receive_from_hardware() {
        let (serial, clk) = serial_pads();
        let mut bridge = SerialBridge::new();
        bridge.add_pads(&serial).unwrap();
        bridge.add_pads(&clk).unwrap();

        serial.signal("source_valid").unwrap().set_bool(true);
        serial.signal("source_data").unwrap().set(0x42);
        clk.signal("sys_clk").unwrap().set_bool(true);
        assert_eq!(bridge.tick().unwrap(), Some(0x42));
        assert!(serial.signal("source_ready").unwrap().is_high());
    }

    #[test]
    fn test_missing_pads() {
        let mut bridge = SerialBridge::new();
        assert!(bridge.tick().is_err());
    }

    #[test]
    fn test_feed_drops_overflow() {
        let mut bridge = SerialBridge::new();
        let data = vec![0u8; RING_CAPACITY + 10];
        assert_eq!(bridge.feed(&data), RING_CAPACITY);
        assert_eq!(bridge.status()["dropped"], 10);
    }
}
