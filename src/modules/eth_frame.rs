//! Ethernet framing helpers shared by the MAC emulations.
//!
//! Besides the CRC and padding helpers, this holds the two pieces the GMII
//! and XGMII modules have in common: [`TxAssembler`], which rebuilds frames
//! the device transmits, and [`MacClocks`], which resolves their clock pads.

use crate::error::SimResult;
use crate::modules::link::PacketLink;
use crate::pads::{ClockEdge, PadList, Signal};

/// Preamble byte, repeated [`PREAMBLE_LEN`] times.
pub const PREAMBLE_BYTE: u8 = 0x55;
/// Number of preamble bytes before the start-of-frame delimiter.
pub const PREAMBLE_LEN: usize = 7;
/// Start-of-frame delimiter.
pub const SFD: u8 = 0xD5;
/// Length of the frame check sequence.
pub const FCS_LEN: usize = 4;
/// Minimum frame length including the FCS.
pub const MIN_FRAME_LEN: usize = 64;
/// Minimum frame length excluding the FCS; shorter payloads are padded.
pub const MIN_PAYLOAD_LEN: usize = MIN_FRAME_LEN - FCS_LEN;
/// Largest frame (with FCS) the device-bound buffer holds.
pub const MAX_FRAME_LEN: usize = 1522;
/// Idle bytes between consecutive frames.
pub const IFG_LEN: usize = 12;

const CRC32_POLY: u32 = 0xEDB8_8320;

const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { CRC32_POLY ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
};

/// IEEE 802.3 CRC-32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &b in data {
        crc = CRC32_TABLE[((crc ^ u32::from(b)) & 0xFF) as usize] ^ (crc >> 8);
    }
    !crc
}

/// Appends the FCS in wire order (least significant byte first).
pub fn append_fcs(frame: &mut Vec<u8>) {
    let fcs = crc32(frame);
    frame.extend_from_slice(&fcs.to_le_bytes());
}

/// Checks the trailing FCS of a frame.
///
/// # Returns
/// `None` if the frame is too short to carry an FCS, otherwise whether it matches
pub fn check_fcs(frame: &[u8]) -> Option<bool> {
    if frame.len() < FCS_LEN {
        return None;
    }
    let (body, fcs) = frame.split_at(frame.len() - FCS_LEN);
    let received = u32::from_le_bytes([fcs[0], fcs[1], fcs[2], fcs[3]]);
    Some(crc32(body) == received)
}

/// Pads a frame without FCS to the minimum payload length with zeros.
pub fn pad_frame(frame: &mut Vec<u8>) {
    if frame.len() < MIN_PAYLOAD_LEN {
        frame.resize(MIN_PAYLOAD_LEN, 0);
    }
}

/// Prepares a host frame for the device: pad, truncate to fit, append FCS.
///
/// Truncated frames get an FCS computed over the truncated body, so the
/// result always checks as valid downstream.
pub fn device_bound(frame: &[u8]) -> Vec<u8> {
    let body_len = frame.len().min(MAX_FRAME_LEN - FCS_LEN);
    if body_len < frame.len() {
        tracing::warn!(len = frame.len(), max = MAX_FRAME_LEN, "truncating oversized host frame");
    }
    let mut out = Vec::with_capacity(body_len.max(MIN_PAYLOAD_LEN) + FCS_LEN);
    out.extend_from_slice(&frame[..body_len]);
    pad_frame(&mut out);
    append_fcs(&mut out);
    out
}

/// Maximum frames buffered from the host before new ones are dropped.
pub const RX_QUEUE_LIMIT: usize = 64;

/// Counters kept by the MAC emulations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct MacCounters {
    /// Device frames forwarded to the host
    pub tx_frames: u64,
    /// Device frames dropped for being shorter than the minimum
    pub tx_runts: u64,
    /// Device frames forwarded despite a bad FCS
    pub tx_crc_errors: u64,
    /// Device transmissions abandoned mid-frame
    pub tx_aborted: u64,
    /// Host frames delivered to the device
    pub rx_frames: u64,
    /// Host frames dropped because the queue was full
    pub rx_dropped: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TxState {
    Idle,
    Preamble(usize),
    Data,
    Drop,
}

/// Rebuilds frames from the device's transmit byte stream.
///
/// The caller feeds preamble, SFD and frame bytes one at a time and marks
/// the end of the transmission. Each abandoned transmission is reported
/// once, when it is abandoned; the rest of it is discarded silently.
#[derive(Debug)]
pub struct TxAssembler {
    state: TxState,
    buf: Vec<u8>,
}

impl Default for TxAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl TxAssembler {
    /// Creates an idle assembler.
    pub fn new() -> Self {
        Self {
            state: TxState::Idle,
            buf: Vec::with_capacity(MAX_FRAME_LEN),
        }
    }

    /// Returns true between transmissions.
    pub fn is_idle(&self) -> bool {
        self.state == TxState::Idle
    }

    /// Returns true while collecting frame bytes after the SFD.
    pub fn in_frame(&self) -> bool {
        self.state == TxState::Data
    }

    /// Starts a transmission; `preamble_seen` bytes of preamble are implied.
    pub fn begin(&mut self, preamble_seen: usize) {
        self.buf.clear();
        self.state = TxState::Preamble(preamble_seen);
    }

    /// Feeds one transmitted byte.
    pub fn push(&mut self, byte: u8, counters: &mut MacCounters) {
        match self.state {
            TxState::Idle | TxState::Drop => {}
            TxState::Preamble(n) => match byte {
                PREAMBLE_BYTE => self.state = TxState::Preamble(n + 1),
                SFD => {
                    if n != PREAMBLE_LEN {
                        tracing::debug!(preamble = n, "non-standard preamble length");
                    }
                    self.state = TxState::Data;
                }
                other => self.abort(&format!("unexpected byte {other:#04x} in preamble"), counters),
            },
            TxState::Data => {
                self.buf.push(byte);
                if self.buf.len() > MAX_FRAME_LEN {
                    self.abort("frame exceeds maximum length", counters);
                }
            }
        }
    }

    /// Abandons the current transmission, warning once.
    pub fn abort(&mut self, reason: &str, counters: &mut MacCounters) {
        if matches!(self.state, TxState::Preamble(_) | TxState::Data) {
            tracing::warn!(reason, bytes = self.buf.len(), "dropping transmitted frame");
            counters.tx_aborted += 1;
            self.state = TxState::Drop;
        }
        self.buf.clear();
    }

    /// Ends the transmission and forwards a complete frame to the host.
    ///
    /// Frames under [`MIN_FRAME_LEN`] are dropped with a warning. A bad FCS
    /// is reported but the frame is still forwarded, minus its FCS.
    pub fn finish(&mut self, link: &mut dyn PacketLink, counters: &mut MacCounters) -> SimResult<()> {
        let state = std::mem::replace(&mut self.state, TxState::Idle);
        match state {
            TxState::Idle | TxState::Drop => {}
            TxState::Preamble(_) => {
                tracing::warn!("transmission ended inside the preamble");
                counters.tx_aborted += 1;
            }
            TxState::Data => {
                if self.buf.len() < MIN_FRAME_LEN {
                    tracing::warn!(len = self.buf.len(), min = MIN_FRAME_LEN, "dropping runt frame");
                    counters.tx_runts += 1;
                } else {
                    if check_fcs(&self.buf) != Some(true) {
                        tracing::warn!(len = self.buf.len(), "FCS mismatch on transmitted frame");
                        counters.tx_crc_errors += 1;
                    }
                    link.send(&self.buf[..self.buf.len() - FCS_LEN])?;
                    counters.tx_frames += 1;
                }
            }
        }
        self.buf.clear();
        Ok(())
    }
}

/// Transmit and receive clocks of a MAC interface.
///
/// A pad list named `*tx_clk` or `*rx_clk` supplies that clock; `sys_clk`
/// supplies whichever is still missing.
#[derive(Debug, Default)]
pub struct MacClocks {
    tx: Option<Signal>,
    rx: Option<Signal>,
    tx_edge: ClockEdge,
    rx_edge: ClockEdge,
}

impl MacClocks {
    /// Tries to take a clock from `pads`; returns true if it was a clock list.
    pub fn add_pads(&mut self, pads: &PadList) -> SimResult<bool> {
        let name = pads.interface.as_str();
        let clock = || -> SimResult<Signal> {
            match pads.signal(name) {
                Some(s) => Ok(s),
                None if pads.pads.len() == 1 => Ok(pads.pads[0].signal.clone()),
                None => pads.require(name),
            }
        };
        if name.ends_with("tx_clk") {
            self.tx = Some(clock()?);
        } else if name.ends_with("rx_clk") {
            self.rx = Some(clock()?);
        } else if name == "sys_clk" {
            let clk = clock()?;
            self.tx.get_or_insert_with(|| clk.clone());
            self.rx.get_or_insert(clk);
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    /// Returns true once both clocks are known.
    pub fn is_complete(&self) -> bool {
        self.tx.is_some() && self.rx.is_some()
    }

    /// Samples both clocks and reports `(tx_rising, rx_rising)`.
    pub fn sample(&mut self) -> (bool, bool) {
        let tx = self.tx.as_ref().is_some_and(Signal::is_high);
        let rx = self.rx.as_ref().is_some_and(Signal::is_high);
        (self.tx_edge.rising(tx), self.rx_edge.rising(rx))
    }
}

/// Bounded queue of host frames waiting for the device.
#[derive(Debug, Default)]
pub struct HostFrames {
    frames: std::collections::VecDeque<Vec<u8>>,
}

impl HostFrames {
    /// Pulls every waiting frame from the link, dropping beyond the limit.
    pub fn fill(&mut self, link: &mut dyn PacketLink, counters: &mut MacCounters) -> SimResult<()> {
        while let Some(frame) = link.recv()? {
            if self.frames.len() >= RX_QUEUE_LIMIT {
                tracing::warn!(limit = RX_QUEUE_LIMIT, "host frame queue full, dropping frame");
                counters.rx_dropped += 1;
                continue;
            }
            self.frames.push_back(frame);
        }
        Ok(())
    }

    /// Takes the oldest frame.
    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }

    /// Frames waiting.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if no frame waits.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::modules::link::MemoryLink;

    fn transmit(asm: &mut TxAssembler, bytes: &[u8], link: &mut MemoryLink, c: &mut MacCounters) {
        asm.begin(0);
        for _ in 0..PREAMBLE_LEN {
            asm.push(PREAMBLE_BYTE, c);
        }
        asm.push(SFD, c);
        for &b in bytes {
            asm.push(b, c);
        }
        asm.finish(link, c).unwrap();
    }

    #[test]
    fn test_assembler_forwards_valid_frame() {
        let (mut dev, mut host) = MemoryLink::pair();
        let mut c = MacCounters::default();
        let mut asm = TxAssembler::new();
        let mut frame = vec![0x11; 60];
        append_fcs(&mut frame);

        transmit(&mut asm, &frame, &mut dev, &mut c);
        assert_eq!(host.recv().unwrap(), Some(vec![0x11; 60]));
        assert_eq!(c.tx_frames, 1);
        assert!(asm.is_idle());
    }

    #[test]
    fn test_assembler_drops_runt() {
        let (mut dev, host) = MemoryLink::pair();
        let mut c = MacCounters::default();
        let mut asm = TxAssembler::new();
        transmit(&mut asm, &[1, 2, 3], &mut dev, &mut c);
        assert_eq!(host.pending(), 0);
        assert_eq!(c.tx_runts, 1);
    }

    #[test]
    fn test_assembler_forwards_bad_crc() {
        let (mut dev, host) = MemoryLink::pair();
        let mut c = MacCounters::default();
        let mut asm = TxAssembler::new();
        let mut frame = vec![0x22; 70];
        append_fcs(&mut frame);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        transmit(&mut asm, &frame, &mut dev, &mut c);
        assert_eq!(host.pending(), 1);
        assert_eq!(c.tx_crc_errors, 1);
    }

    #[test]
    fn test_abort_counts_once() {
        let (mut dev, _host) = MemoryLink::pair();
        let mut c = MacCounters::default();
        let mut asm = TxAssembler::new();
        asm.begin(0);
        asm.push(0x42, &mut c);
        asm.push(0x55, &mut c);
        asm.abort("again", &mut c);
        asm.finish(&mut dev, &mut c).unwrap();
        assert_eq!(c.tx_aborted, 1);
        assert!(asm.is_idle());
    }

    #[test]
    fn test_crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn test_fcs_append_and_check() {
        let mut frame = vec![0xAB; 60];
        append_fcs(&mut frame);
        assert_eq!(check_fcs(&frame), Some(true));
        frame[10] ^= 1;
        assert_eq!(check_fcs(&frame), Some(false));
        assert_eq!(check_fcs(&[1, 2]), None);
    }

    #[test]
    fn test_device_bound_pads_short_frames() {
        let out = device_bound(&[1, 2, 3]);
        assert_eq!(out.len(), MIN_FRAME_LEN);
        assert_eq!(check_fcs(&out), Some(true));
    }

    #[test]
    fn test_device_bound_truncates_with_valid_fcs() {
        let out = device_bound(&vec![7u8; 2000]);
        assert_eq!(out.len(), MAX_FRAME_LEN);
        assert_eq!(check_fcs(&out), Some(true));
    }
}
