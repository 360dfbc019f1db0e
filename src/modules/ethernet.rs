//! Byte-stream Ethernet bridge to a host TAP device.
//!
//! The `eth` pad list carries whole frames as a byte stream, one byte per
//! `sys_clk` rising edge, delimited by the valid strobes:
//!
//! - `source_valid`, `source_data` (and optionally `source_ready`): device to host
//! - `sink_valid`, `sink_data`: host to device
//!
//! A device frame ends on the first edge where `source_valid` is low; it is
//! padded to the minimum Ethernet length and handed to the link. Host frames
//! are played back with one idle edge between them so the device sees every
//! boundary.
//!
//! Arguments: `interface` (tap name) and `ip`, or `link: "loopback"`.

use crate::error::{SimError, SimResult};
use crate::message::{Message, MessageError, MessageOp, MessageResult};
use crate::module::{Module, ModuleArgs, ModuleDescriptor, SimContext};
use crate::modules::eth_frame::{pad_frame, HostFrames, MacCounters, MAX_FRAME_LEN};
use crate::modules::link::{open_from_args, PacketLink};
use crate::pads::{ClockEdge, PadList, Signal};
use crate::registry::ModuleRegistry;

/// Module name.
pub const NAME: &str = "ethernet";

/// Registers the ethernet descriptor.
pub fn init(registry: &mut ModuleRegistry) -> SimResult<()> {
    registry.register(
        ModuleDescriptor::new(NAME, |args| {
            let args = ModuleArgs::parse(args)?;
            Ok(Box::new(Ethernet::new(open_from_args(&args)?)) as Box<dyn Module>)
        })
        .with_messages(),
    )
}

#[derive(Debug)]
struct EthPads {
    source_valid: Signal,
    source_ready: Option<Signal>,
    source_data: Signal,
    sink_valid: Signal,
    sink_data: Signal,
}

/// TAP bridge session.
pub struct Ethernet {
    link: Box<dyn PacketLink>,
    pads: Option<EthPads>,
    sys_clk: Option<Signal>,
    edge: ClockEdge,
    tx_frame: Vec<u8>,
    tx_oversized: bool,
    host: HostFrames,
    rx_frame: Option<(Vec<u8>, usize)>,
    rx_gap: bool,
    counters: MacCounters,
}

impl Ethernet {
    /// Creates a bridge over `link`.
    pub fn new(link: Box<dyn PacketLink>) -> Self {
        Self {
            link,
            pads: None,
            sys_clk: None,
            edge: ClockEdge::new(),
            tx_frame: Vec::new(),
            tx_oversized: false,
            host: HostFrames::default(),
            rx_frame: None,
            rx_gap: false,
            counters: MacCounters::default(),
        }
    }

    /// Frame counters.
    pub fn counters(&self) -> MacCounters {
        self.counters
    }

    fn end_tx_frame(&mut self) -> SimResult<()> {
        let mut frame = std::mem::take(&mut self.tx_frame);
        if std::mem::take(&mut self.tx_oversized) {
            self.counters.tx_aborted += 1;
            return Ok(());
        }
        pad_frame(&mut frame);
        self.link.send(&frame)?;
        self.counters.tx_frames += 1;
        tracing::trace!(len = frame.len(), link = self.link.name(), "frame sent to host");
        Ok(())
    }
}

impl Module for Ethernet {
    fn add_pads(&mut self, pads: &PadList) -> SimResult<()> {
        match pads.interface.as_str() {
            "eth" => {
                self.pads = Some(EthPads {
                    source_valid: pads.require("source_valid")?,
                    source_ready: pads.signal("source_ready"),
                    source_data: pads.require("source_data")?,
                    sink_valid: pads.require("sink_valid")?,
                    sink_data: pads.require("sink_data")?,
                });
            }
            "sys_clk" => self.sys_clk = Some(pads.require("sys_clk")?),
            other => tracing::debug!(interface = other, "ethernet ignores interface"),
        }
        Ok(())
    }

    fn poll(&mut self, _ctx: &mut SimContext<'_>) -> SimResult<()> {
        self.host.fill(self.link.as_mut(), &mut self.counters)
    }

    fn tick(&mut self, _ctx: &mut SimContext<'_>) -> SimResult<()> {
        let (Some(pads), Some(clk)) = (&self.pads, &self.sys_clk) else {
            return Err(SimError::InvalidArgument(
                "ethernet needs both eth and sys_clk pads".to_string(),
            ));
        };
        if !self.edge.rising(clk.is_high()) {
            return Ok(());
        }

        // Device to host.
        if let Some(ready) = &pads.source_ready {
            ready.set_bool(true);
        }
        let tx_byte = pads.source_valid.is_high().then(|| pads.source_data.get() as u8);

        // Host to device.
        if self.rx_frame.is_none() && !self.rx_gap {
            if let Some(frame) = self.host.pop() {
                let mut frame = frame;
                frame.truncate(MAX_FRAME_LEN);
                pad_frame(&mut frame);
                self.rx_frame = Some((frame, 0));
            }
        }
        match self.rx_frame.as_mut() {
            Some((frame, pos)) => {
                pads.sink_data.set(u64::from(frame[*pos]));
                pads.sink_valid.set_bool(true);
                *pos += 1;
                if *pos == frame.len() {
                    self.rx_frame = None;
                    self.rx_gap = true;
                    self.counters.rx_frames += 1;
                }
            }
            None => {
                pads.sink_valid.set_bool(false);
                self.rx_gap = false;
            }
        }

        match tx_byte {
            Some(byte) => {
                if self.tx_frame.len() < MAX_FRAME_LEN {
                    self.tx_frame.push(byte);
                } else if !self.tx_oversized {
                    tracing::warn!(max = MAX_FRAME_LEN, "device frame too long, dropping it");
                    self.tx_oversized = true;
                }
            }
            None if !self.tx_frame.is_empty() || self.tx_oversized => self.end_tx_frame()?,
            None => {}
        }
        Ok(())
    }

    fn message(&mut self, msg: &Message) -> MessageResult {
        match msg.op {
            MessageOp::Get => {
                let mut status = serde_json::to_value(self.counters)
                    .map_err(|e| MessageError::Failed(e.to_string()))?;
                status["link"] = serde_json::json!(self.link.name());
                status["rx_queued"] = serde_json::json!(self.host.len());
                Ok(status)
            }
            _ => Err(MessageError::Unsupported),
        }
    }
}

impl std::fmt::Debug for Ethernet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ethernet")
            .field("link", &self.link.name())
            .field("counters", &self.counters)
            .finish()
    }
}
