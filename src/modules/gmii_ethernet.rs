//! GMII MAC emulation: a byte-wide Ethernet PHY bridged to a host link.
//!
//! The device transmits on `tx_data`/`tx_en`/`tx_er` and receives on
//! `rx_data`/`rx_dv`/`rx_er` of the `gmii_eth` interface. Transmit is
//! sampled on the rising edge of the tx clock and receive is driven on the
//! rising edge of the rx clock; see [`MacClocks`] for how those are found.
//!
//! Frames on the wire carry the full preamble, SFD and FCS. Host frames are
//! sent with a minimum inter-frame gap of [`IFG_LEN`] idle clocks.

use crate::error::{SimError, SimResult};
use crate::message::{Message, MessageError, MessageOp, MessageResult};
use crate::module::{Module, ModuleArgs, ModuleDescriptor, SimContext};
use crate::modules::eth_frame::{
    device_bound, HostFrames, MacClocks, MacCounters, TxAssembler, IFG_LEN, PREAMBLE_BYTE,
    PREAMBLE_LEN, SFD,
};
use crate::modules::link::{open_from_args, PacketLink};
use crate::pads::{PadList, Signal};
use crate::registry::ModuleRegistry;

/// Module name.
pub const NAME: &str = "gmii_ethernet";

/// Interface carrying the data pads.
pub const INTERFACE: &str = "gmii_eth";

/// Registers the gmii_ethernet descriptor.
pub fn init(registry: &mut ModuleRegistry) -> SimResult<()> {
    registry.register(
        ModuleDescriptor::new(NAME, |args| {
            let args = ModuleArgs::parse(args)?;
            Ok(Box::new(GmiiEthernet::new(open_from_args(&args)?)) as Box<dyn Module>)
        })
        .with_messages(),
    )
}

#[derive(Debug)]
struct GmiiPads {
    tx_data: Signal,
    tx_en: Signal,
    tx_er: Option<Signal>,
    rx_data: Signal,
    rx_dv: Signal,
    rx_er: Option<Signal>,
}

#[derive(Debug)]
enum RxState {
    /// Counting idle clocks since the last frame.
    Idle { gap: usize },
    /// Sending preamble, SFD and frame bytes.
    Sending { wire: Vec<u8>, pos: usize },
}

/// GMII bridge session.
pub struct GmiiEthernet {
    link: Box<dyn PacketLink>,
    pads: Option<GmiiPads>,
    clocks: MacClocks,
    tx: TxAssembler,
    rx: RxState,
    host: HostFrames,
    counters: MacCounters,
}

/// Lays out a host frame as it appears on the wire.
fn wire_bytes(frame: &[u8]) -> Vec<u8> {
    let body = device_bound(frame);
    let mut wire = Vec::with_capacity(PREAMBLE_LEN + 1 + body.len());
    wire.resize(PREAMBLE_LEN, PREAMBLE_BYTE);
    wire.push(SFD);
    wire.extend_from_slice(&body);
    wire
}

impl GmiiEthernet {
    /// Creates a bridge over `link`.
    pub fn new(link: Box<dyn PacketLink>) -> Self {
        Self {
            link,
            pads: None,
            clocks: MacClocks::default(),
            tx: TxAssembler::new(),
            rx: RxState::Idle { gap: IFG_LEN },
            host: HostFrames::default(),
            counters: MacCounters::default(),
        }
    }

    /// Frame counters.
    pub fn counters(&self) -> MacCounters {
        self.counters
    }

    fn transmit_edge(&mut self, pads: &GmiiPads) -> SimResult<()> {
        if pads.tx_en.is_high() {
            if self.tx.is_idle() {
                self.tx.begin(0);
            }
            if pads.tx_er.as_ref().is_some_and(Signal::is_high) {
                self.tx.abort("tx_er asserted", &mut self.counters);
            } else {
                self.tx.push(pads.tx_data.get() as u8, &mut self.counters);
            }
        } else if !self.tx.is_idle() {
            self.tx.finish(self.link.as_mut(), &mut self.counters)?;
        }
        Ok(())
    }

    fn receive_edge(&mut self, pads: &GmiiPads) {
        if let Some(er) = &pads.rx_er {
            er.set_bool(false);
        }
        match &mut self.rx {
            RxState::Idle { gap } => {
                pads.rx_dv.set_bool(false);
                pads.rx_data.set(0);
                if *gap < IFG_LEN {
                    *gap += 1;
                } else if let Some(frame) = self.host.pop() {
                    self.rx = RxState::Sending {
                        wire: wire_bytes(&frame),
                        pos: 0,
                    };
                    self.receive_edge(pads);
                }
            }
            RxState::Sending { wire, pos } => {
                pads.rx_dv.set_bool(true);
                pads.rx_data.set(u64::from(wire[*pos]));
                *pos += 1;
                if *pos == wire.len() {
                    self.counters.rx_frames += 1;
                    self.rx = RxState::Idle { gap: 0 };
                }
            }
        }
    }
}

impl Module for GmiiEthernet {
    fn add_pads(&mut self, pads: &PadList) -> SimResult<()> {
        if pads.interface == INTERFACE {
            self.pads = Some(GmiiPads {
                tx_data: pads.require("tx_data")?,
                tx_en: pads.require("tx_en")?,
                tx_er: pads.signal("tx_er"),
                rx_data: pads.require("rx_data")?,
                rx_dv: pads.require("rx_dv")?,
                rx_er: pads.signal("rx_er"),
            });
        } else if !self.clocks.add_pads(pads)? {
            tracing::debug!(interface = %pads.interface, "gmii_ethernet ignores interface");
        }
        Ok(())
    }

    fn poll(&mut self, _ctx: &mut SimContext<'_>) -> SimResult<()> {
        self.host.fill(self.link.as_mut(), &mut self.counters)
    }

    fn tick(&mut self, _ctx: &mut SimContext<'_>) -> SimResult<()> {
        if !self.clocks.is_complete() {
            return Err(SimError::InvalidArgument(
                "gmii_ethernet has no tx/rx clock".to_string(),
            ));
        }
        let Some(pads) = self.pads.take() else {
            return Err(SimError::InvalidArgument(format!(
                "gmii_ethernet has no {INTERFACE} pads"
            )));
        };
        let (tx_rising, rx_rising) = self.clocks.sample();
        let result = if tx_rising {
            self.transmit_edge(&pads)
        } else {
            Ok(())
        };
        if rx_rising {
            self.receive_edge(&pads);
        }
        self.pads = Some(pads);
        result
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

impl std::fmt::Debug for GmiiEthernet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GmiiEthernet")
            .field("link", &self.link.name())
            .field("rx", &self.rx)
            .field("counters", &self.counters)
            .finish()
    }
}
