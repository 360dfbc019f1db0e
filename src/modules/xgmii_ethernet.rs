//! XGMII MAC emulation: a 64-bit, eight-lane Ethernet PHY bridged to a
//! host link.
//!
//! Lane `n` is byte `n` of `tx_data`/`rx_data` and bit `n` of
//! `tx_ctl`/`rx_ctl`. A set control bit marks the lane as a control
//! character: start, terminate, idle or error.

use std::collections::VecDeque;

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
pub const NAME: &str = "xgmii_ethernet";

/// Interface carrying the data pads.
pub const INTERFACE: &str = "xgmii_eth";

/// Lanes per XGMII word.
pub const LANES: usize = 8;

/// Idle control character.
pub const XGMII_IDLE: u8 = 0x07;
/// Start control character; takes the place of the first preamble byte.
pub const XGMII_START: u8 = 0xFB;
/// Terminate control character.
pub const XGMII_TERMINATE: u8 = 0xFD;
/// Error control character.
pub const XGMII_ERROR: u8 = 0xFE;

/// Registers the xgmii_ethernet descriptor.
pub fn init(registry: &mut ModuleRegistry) -> SimResult<()> {
    registry.register(
        ModuleDescriptor::new(NAME, |args| {
            let args = ModuleArgs::parse(args)?;
            Ok(Box::new(XgmiiEthernet::new(open_from_args(&args)?)) as Box<dyn Module>)
        })
        .with_messages(),
    )
}

/// One lane: its byte and whether it is a control character.
type Lane = (u8, bool);

#[derive(Debug)]
struct XgmiiPads {
    tx_data: Signal,
    tx_ctl: Signal,
    rx_data: Signal,
    rx_ctl: Signal,
}

/// XGMII bridge session.
pub struct XgmiiEthernet {
    link: Box<dyn PacketLink>,
    pads: Option<XgmiiPads>,
    clocks: MacClocks,
    tx: TxAssembler,
    rx_lanes: VecDeque<Lane>,
    host: HostFrames,
    counters: MacCounters,
}

/// Lays out a host frame as lanes: start, preamble, SFD, frame, terminate,
/// then idles up to the inter-frame gap and the next word boundary.
fn frame_lanes(frame: &[u8]) -> Vec<Lane> {
    let body = device_bound(frame);
    let mut lanes = Vec::with_capacity(PREAMBLE_LEN + body.len() + 2 + IFG_LEN + LANES);
    lanes.push((XGMII_START, true));
    lanes.extend(std::iter::repeat((PREAMBLE_BYTE, false)).take(PREAMBLE_LEN - 1));
    lanes.push((SFD, false));
    lanes.extend(body.iter().map(|&b| (b, false)));
    lanes.push((XGMII_TERMINATE, true));
    let mut idles = 0;
    while idles < IFG_LEN || lanes.len() % LANES != 0 {
        lanes.push((XGMII_IDLE, true));
        idles += 1;
    }
    lanes
}

impl XgmiiEthernet {
    /// Creates a bridge over `link`.
    pub fn new(link: Box<dyn PacketLink>) -> Self {
        Self {
            link,
            pads: None,
            clocks: MacClocks::default(),
            tx: TxAssembler::new(),
            rx_lanes: VecDeque::new(),
            host: HostFrames::default(),
            counters: MacCounters::default(),
        }
    }

    /// Frame counters.
    pub fn counters(&self) -> MacCounters {
        self.counters
    }

    fn transmit_lane(&mut self, lane: usize, (byte, ctl): Lane) -> SimResult<()> {
        if !ctl {
            if !self.tx.is_idle() {
                self.tx.push(byte, &mut self.counters);
            }
            return Ok(());
        }
        match byte {
            XGMII_START if self.tx.is_idle() => {
                if lane == 0 || lane == 4 {
                    self.tx.begin(1);
                } else {
                    tracing::warn!(lane, "start character on a misaligned lane ignored");
                }
            }
            XGMII_START => self.tx.abort("start character inside a frame", &mut self.counters),
            XGMII_TERMINATE => self.tx.finish(self.link.as_mut(), &mut self.counters)?,
            XGMII_IDLE => {
                if !self.tx.is_idle() {
                    self.tx.abort("idle inside a frame", &mut self.counters);
                    self.tx.finish(self.link.as_mut(), &mut self.counters)?;
                }
            }
            XGMII_ERROR => self.tx.abort("error character", &mut self.counters),
            other => {
                if !self.tx.is_idle() {
                    let reason = format!("unknown control character {other:#04x}");
                    self.tx.abort(&reason, &mut self.counters);
                }
            }
        }
        Ok(())
    }

    fn transmit_edge(&mut self, data: u64, ctl: u64) -> SimResult<()> {
        for lane in 0..LANES {
            let byte = (data >> (8 * lane)) as u8;
            let is_ctl = (ctl >> lane) & 1 != 0;
            self.transmit_lane(lane, (byte, is_ctl))?;
        }
        Ok(())
    }

    /// Builds the next receive word.
    fn receive_word(&mut self) -> (u64, u64) {
        if self.rx_lanes.is_empty() {
            if let Some(frame) = self.host.pop() {
                self.rx_lanes.extend(frame_lanes(&frame));
                self.counters.rx_frames += 1;
            }
        }
        let mut data = 0u64;
        let mut ctl = 0u64;
        for lane in 0..LANES {
            let (byte, is_ctl) = self.rx_lanes.pop_front().unwrap_or((XGMII_IDLE, true));
            data |= u64::from(byte) << (8 * lane);
            ctl |= u64::from(is_ctl) << lane;
        }
        (data, ctl)
    }
}

impl Module for XgmiiEthernet {
    fn add_pads(&mut self, pads: &PadList) -> SimResult<()> {
        if pads.interface == INTERFACE {
            self.pads = Some(XgmiiPads {
                tx_data: pads.require("tx_data")?,
                tx_ctl: pads.require("tx_ctl")?,
                rx_data: pads.require("rx_data")?,
                rx_ctl: pads.require("rx_ctl")?,
            });
        } else if !self.clocks.add_pads(pads)? {
            tracing::debug!(interface = %pads.interface, "xgmii_ethernet ignores interface");
        }
        Ok(())
    }

    fn poll(&mut self, _ctx: &mut SimContext<'_>) -> SimResult<()> {
        self.host.fill(self.link.as_mut(), &mut self.counters)
    }

    fn tick(&mut self, _ctx: &mut SimContext<'_>) -> SimResult<()> {
        if !self.clocks.is_complete() {
            return Err(SimError::InvalidArgument(
                "xgmii_ethernet has no tx/rx clock".to_string(),
            ));
        }
        let Some((tx_data, tx_ctl)) = self.pads.as_ref().map(|p| (p.tx_data.get(), p.tx_ctl.get()))
        else {
            return Err(SimError::InvalidArgument(format!(
                "xgmii_ethernet has no {INTERFACE} pads"
            )));
        };
        let (tx_rising, rx_rising) = self.clocks.sample();
        if tx_rising {
            self.transmit_edge(tx_data, tx_ctl)?;
        }
        if rx_rising {
            let (data, ctl) = self.receive_word();
            if let Some(pads) = &self.pads {
                pads.rx_data.set(data);
                pads.rx_ctl.set(ctl);
            }
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

impl std::fmt::Debug for XgmiiEthernet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XgmiiEthernet")
            .field("link", &self.link.name())
            .field("rx_lanes", &self.rx_lanes.len())
            .field("counters", &self.counters)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::with_test_context;
    use crate::modules::eth_frame::{append_fcs, check_fcs, MIN_FRAME_LEN};
    use crate::modules::link::MemoryLink;
    use crate::pads::Pad;

    struct Rig {
        mac: XgmiiEthernet,
        host: MemoryLink,
        clk: Signal,
        pads: PadList,
    }

    fn rig() -> Rig {
        let (dev, host) = MemoryLink::pair();
        let mut mac = XgmiiEthernet::new(Box::new(dev));
        let pads = PadList {
            interface: INTERFACE.to_string(),
            index: 0,
            pads: vec![
                Pad::new("tx_data", 64),
                Pad::new("tx_ctl", 8),
                Pad::new("rx_data", 64),
                Pad::new("rx_ctl", 8),
            ],
        };
        let clk = PadList {
            interface: "sys_clk".to_string(),
            index: 0,
            pads: vec![Pad::new("sys_clk", 1)],
        };
        mac.add_pads(&pads).unwrap();
        mac.add_pads(&clk).unwrap();
        Rig {
            mac,
            host,
            clk: clk.signal("sys_clk").unwrap(),
            pads,
        }
    }

    impl Rig {
        fn cycle(&mut self) {
            for level in [false, true] {
                self.clk.set_bool(level);
                with_test_context(|ctx| self.mac.tick(ctx)).unwrap();
            }
        }

        /// Drives one word of lanes and clocks it in.
        fn send_word(&mut self, lanes: &[Lane]) {
            let (mut data, mut ctl) = (0u64, 0u64);
            for (i, &(b, c)) in lanes.iter().enumerate() {
                data |= u64::from(b) << (8 * i);
                ctl |= u64::from(c) << i;
            }
            self.pads.signal("tx_data").unwrap().set(data);
            self.pads.signal("tx_ctl").unwrap().set(ctl);
            self.cycle();
        }
    }

    #[test]
    fn test_frame_lanes_are_word_aligned() {
        let lanes = frame_lanes(&[1, 2, 3]);
        assert_eq!(lanes.len() % LANES, 0);
        assert_eq!(lanes[0], (XGMII_START, true));
        assert_eq!(lanes[PREAMBLE_LEN], (SFD, false));
        let term = PREAMBLE_LEN + 1 + MIN_FRAME_LEN;
        assert_eq!(lanes[term], (XGMII_TERMINATE, true));
        let idles = lanes[term + 1..].iter().filter(|l| **l == (XGMII_IDLE, true)).count();
        assert!(idles >= IFG_LEN);
        let body: Vec<u8> = lanes[PREAMBLE_LEN + 1..term].iter().map(|l| l.0).collect();
        assert_eq!(check_fcs(&body), Some(true));
    }

    #[test]
    fn test_transmit_frame_to_host() {
        let mut rig = rig();
        let mut frame: Vec<u8> = (100..164u8).collect();
        frame.truncate(60);
        append_fcs(&mut frame);

        let mut lanes: Vec<Lane> = vec![(XGMII_START, true)];
        lanes.extend(std::iter::repeat((PREAMBLE_BYTE, false)).take(PREAMBLE_LEN - 1));
        lanes.push((SFD, false));
        lanes.extend(frame.iter().map(|&b| (b, false)));
        lanes.push((XGMII_TERMINATE, true));
        while lanes.len() % LANES != 0 {
            lanes.push((XGMII_IDLE, true));
        }
        for word in lanes.chunks(LANES) {
            rig.send_word(word);
        }

        assert_eq!(rig.host.recv().unwrap(), Some((100..160u8).collect()));
        assert_eq!(rig.mac.counters().tx_frames, 1);
    }

    #[test]
    fn test_idle_inside_frame_drops_it() {
        let mut rig = rig();
        let mut word = vec![(XGMII_START, true)];
        word.extend(std::iter::repeat((PREAMBLE_BYTE, false)).take(6));
        word.push((SFD, false));
        rig.send_word(&word);
        rig.send_word(&[(0xAA, false); LANES]);
        rig.send_word(&[(XGMII_IDLE, true); LANES]);

        assert_eq!(rig.host.pending(), 0);
        assert_eq!(rig.mac.counters().tx_aborted, 1);
    }

    #[test]
    fn test_misaligned_start_ignored() {
        let mut rig = rig();
        let mut word = vec![(XGMII_IDLE, true); LANES];
        word[3] = (XGMII_START, true);
        rig.send_word(&word);
        assert!(rig.mac.tx.is_idle());
    }

    #[test]
    fn test_receive_idles_then_frame() {
        let mut rig = rig();
        rig.cycle();
        assert_eq!(rig.pads.signal("rx_ctl").unwrap().get(), 0xFF);
        assert_eq!(rig.pads.signal("rx_data").unwrap().get(), 0x0707_0707_0707_0707);

        rig.host.send(&[0x11; 60]).unwrap();
        with_test_context(|ctx| rig.mac.poll(ctx)).unwrap();
        rig.cycle();
        let data = rig.pads.signal("rx_data").unwrap().get();
        assert_eq!(data & 0xFF, u64::from(XGMII_START));
        assert_eq!(data >> 56, u64::from(SFD));
        assert_eq!(rig.pads.signal("rx_ctl").unwrap().get(), 0x01);
        assert_eq!(rig.mac.counters().rx_frames, 1);
    }
}
