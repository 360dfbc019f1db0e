//! SPD EEPROM: a 256-byte I2C serial EEPROM as found on DRAM modules.
//!
//! Two state machines cooperate. The serial machine frames bits on SCL
//! edges (receive, transmit and the two acknowledge phases); the transaction
//! machine decides what each completed byte means (device address, word
//! address, write data, read data) and which serial phase comes next.
//! START and STOP conditions are detected before any bit-level work and
//! override whatever transfer is in progress.
//!
//! Pads (`i2c` interface): `scl`, `sda_out`, `sda_oe` from the hardware and
//! `sda_in` back to it. The line is open-drain: it is low whenever either
//! side pulls it low.
//!
//! Arguments: `addr` (3-bit address strap, default 0) and `filename`
//! (optional image; raw binary or whitespace-separated hex bytes).

use std::path::Path;

use crate::error::{SimError, SimResult};
use crate::message::{Message, MessageError, MessageOp, MessageResult};
use crate::module::{Module, ModuleArgs, ModuleDescriptor, SimContext};
use crate::pads::{PadList, Signal};
use crate::registry::ModuleRegistry;

/// Module name.
pub const NAME: &str = "spdeeprom";

/// EEPROM size in bytes.
pub const EEPROM_SIZE: usize = 256;

/// 7-bit device address with a zero strap.
pub const BASE_ADDRESS: u8 = 0x50;

/// Registers the spdeeprom descriptor.
pub fn init(registry: &mut ModuleRegistry) -> SimResult<()> {
    registry.register(
        ModuleDescriptor::new(NAME, |args| {
            Ok(Box::new(SpdEeprom::from_args(args)?) as Box<dyn Module>)
        })
        .with_messages(),
    )
}

/// Bit-level phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SerialState {
    /// Waiting for START
    Idle,
    /// Shifting in a byte from the master
    ReadBits,
    /// Shifting out a byte to the master
    WriteBits,
    /// Driving our acknowledge
    AckOut,
    /// Sampling the master's acknowledge
    AckIn,
}

/// Byte-level phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    /// Next byte is the device address and direction
    DeviceAddress,
    /// Next byte sets the word pointer
    WordAddress,
    /// Next bytes are stored at the pointer
    WriteData,
    /// Bytes are read from the pointer
    ReadData,
}

#[derive(Debug)]
struct I2cPads {
    scl: Signal,
    sda_in: Signal,
    sda_out: Signal,
    sda_oe: Signal,
}

/// EEPROM session.
#[derive(Debug)]
pub struct SpdEeprom {
    memory: [u8; EEPROM_SIZE],
    device_address: u8,
    pads: Option<I2cPads>,
    serial: SerialState,
    transaction: TransactionState,
    shift: u8,
    bits: u8,
    pointer: u8,
    master_ack: bool,
    /// Level we drive on SDA; `false` pulls the line low.
    drive: bool,
    prev_scl: bool,
    prev_sda: bool,
}

/// Loads an EEPROM image.
///
/// Text files made only of whitespace-separated hex bytes are parsed as
/// such; anything else is taken as a raw binary image. Bytes past the
/// image read as `0xFF`.
pub fn load_image(path: &Path) -> SimResult<[u8; EEPROM_SIZE]> {
    let raw = std::fs::read(path)?;
    let bytes = parse_hex_image(&raw).unwrap_or(raw);
    if bytes.len() > EEPROM_SIZE {
        return Err(SimError::InvalidArgument(format!(
            "{}: image has {} bytes, at most {EEPROM_SIZE} fit",
            path.display(),
            bytes.len()
        )));
    }
    let mut memory = [0xFF; EEPROM_SIZE];
    memory[..bytes.len()].copy_from_slice(&bytes);
    tracing::info!(path = %path.display(), bytes = bytes.len(), "SPD image loaded");
    Ok(memory)
}

fn parse_hex_image(raw: &[u8]) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(raw).ok()?;
    let mut out = Vec::new();
    for token in text.split_whitespace() {
        if token.len() > 2 {
            return None;
        }
        out.push(u8::from_str_radix(token, 16).ok()?);
    }
    (!out.is_empty()).then_some(out)
}

impl SpdEeprom {
    /// Creates an EEPROM with the given strap and contents.
    pub fn new(strap: u8, memory: [u8; EEPROM_SIZE]) -> SimResult<Self> {
        if strap > 0b111 {
            return Err(SimError::InvalidArgument(format!(
                "address strap {strap} does not fit in 3 bits"
            )));
        }
        Ok(Self {
            memory,
            device_address: BASE_ADDRESS | strap,
            pads: None,
            serial: SerialState::Idle,
            transaction: TransactionState::DeviceAddress,
            shift: 0,
            bits: 0,
            pointer: 0,
            master_ack: false,
            drive: true,
            prev_scl: true,
            prev_sda: true,
        })
    }

    /// Builds an EEPROM from its JSON argument string.
    pub fn from_args(args: &str) -> SimResult<Self> {
        let args = ModuleArgs::parse(args)?;
        let strap = args.u64_or("addr", 0)?;
        let strap = u8::try_from(strap)
            .map_err(|_| SimError::InvalidArgument(format!("address strap {strap} out of range")))?;
        let memory = match args.get_str("filename")? {
            Some(path) => load_image(Path::new(path))?,
            None => [0xFF; EEPROM_SIZE],
        };
        Self::new(strap, memory)
    }

    /// 7-bit device address this EEPROM answers to.
    pub fn device_address(&self) -> u8 {
        self.device_address
    }

    /// Current word pointer.
    pub fn pointer(&self) -> u8 {
        self.pointer
    }

    /// Current bit-level phase.
    pub fn serial_state(&self) -> SerialState {
        self.serial
    }

    /// Current byte-level phase.
    pub fn transaction_state(&self) -> TransactionState {
        self.transaction
    }

    /// EEPROM contents.
    pub fn memory(&self) -> &[u8; EEPROM_SIZE] {
        &self.memory
    }

    fn start_condition(&mut self) {
        tracing::trace!("i2c start");
        self.serial = SerialState::ReadBits;
        self.transaction = TransactionState::DeviceAddress;
        self.shift = 0;
        self.bits = 0;
        self.drive = true;
    }

    fn stop_condition(&mut self) {
        tracing::trace!("i2c stop");
        self.serial = SerialState::Idle;
        self.transaction = TransactionState::DeviceAddress;
        self.drive = true;
    }

    fn scl_rising(&mut self, sda: bool) {
        match self.serial {
            SerialState::ReadBits => {
                self.shift = (self.shift << 1) | u8::from(sda);
                self.bits += 1;
            }
            SerialState::AckIn => self.master_ack = !sda,
            SerialState::Idle | SerialState::WriteBits | SerialState::AckOut => {}
        }
    }

    fn scl_falling(&mut self) {
        match self.serial {
            SerialState::ReadBits if self.bits == 8 => self.byte_received(self.shift),
            SerialState::AckOut => {
                self.drive = true;
                self.bits = 0;
                self.shift = 0;
                if self.transaction == TransactionState::ReadData {
                    self.load_next_byte();
                } else {
                    self.serial = SerialState::ReadBits;
                }
            }
            SerialState::WriteBits => {
                if self.bits < 8 {
                    self.drive_next_bit();
                } else {
                    self.drive = true;
                    self.serial = SerialState::AckIn;
                }
            }
            SerialState::AckIn => {
                if self.master_ack {
                    self.load_next_byte();
                } else {
                    self.serial = SerialState::Idle;
                }
            }
            SerialState::Idle | SerialState::ReadBits => {}
        }
    }

    fn byte_received(&mut self, byte: u8) {
        match self.transaction {
            TransactionState::DeviceAddress => {
                if byte >> 1 != self.device_address {
                    tracing::trace!(address = byte >> 1, "i2c address not ours");
                    self.serial = SerialState::Idle;
                    return;
                }
                self.transaction = if byte & 1 == 1 {
                    TransactionState::ReadData
                } else {
                    TransactionState::WordAddress
                };
            }
            TransactionState::WordAddress => {
                self.pointer = byte;
                self.transaction = TransactionState::WriteData;
            }
            TransactionState::WriteData => {
                self.memory[usize::from(self.pointer)] = byte;
                self.pointer = self.pointer.wrapping_add(1);
            }
            TransactionState::ReadData => {}
        }
        self.serial = SerialState::AckOut;
        self.drive = false;
    }

    fn load_next_byte(&mut self) {
        self.shift = self.memory[usize::from(self.pointer)];
        self.pointer = self.pointer.wrapping_add(1);
        self.bits = 0;
        self.serial = SerialState::WriteBits;
        self.drive_next_bit();
    }

    fn drive_next_bit(&mut self) {
        self.drive = (self.shift >> (7 - self.bits)) & 1 == 1;
        self.bits += 1;
    }
}

impl Module for SpdEeprom {
    fn add_pads(&mut self, pads: &PadList) -> SimResult<()> {
        if pads.interface != "i2c" {
            tracing::debug!(interface = %pads.interface, "spdeeprom ignores interface");
            return Ok(());
        }
        self.pads = Some(I2cPads {
            scl: pads.require("scl")?,
            sda_in: pads.require("sda_in")?,
            sda_out: pads.require("sda_out")?,
            sda_oe: pads.require("sda_oe")?,
        });
        Ok(())
    }

    fn tick(&mut self, _ctx: &mut SimContext<'_>) -> SimResult<()> {
        let Some(pads) = &self.pads else {
            return Err(SimError::InvalidArgument("spdeeprom has no i2c pads".to_string()));
        };
        let scl = pads.scl.is_high();
        let sda = !pads.sda_oe.is_high() || pads.sda_out.is_high();
        let (prev_scl, prev_sda) = (self.prev_scl, self.prev_sda);
        self.prev_scl = scl;
        self.prev_sda = sda;

        if scl && prev_scl && sda != prev_sda {
            if sda {
                self.stop_condition();
            } else {
                self.start_condition();
            }
        } else if scl && !prev_scl {
            self.scl_rising(sda);
        } else if !scl && prev_scl {
            self.scl_falling();
        }

        if let Some(pads) = &self.pads {
            pads.sda_in.set_bool(sda && self.drive);
        }
        Ok(())
    }

    fn message(&mut self, msg: &Message) -> MessageResult {
        match msg.op {
            MessageOp::Get => Ok(serde_json::json!({
                "device_address": self.device_address,
                "pointer": self.pointer,
                "serial": format!("{:?}", self.serial),
                "transaction": format!("{:?}", self.transaction),
            })),
            MessageOp::Describe => Ok(serde_json::json!({
                "size": EEPROM_SIZE,
                "contents": self.memory.to_vec(),
            })),
            _ => Err(MessageError::Unsupported),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::with_test_context;
    use crate::pads::Pad;
    use std::io::Write;

    /// Bit-banging I2C master driving the EEPROM one tick per pin change.
    struct Master {
        eeprom: SpdEeprom,
        scl: Signal,
        sda_out: Signal,
        sda_oe: Signal,
        sda_in: Signal,
    }

    impl Master {
        fn new(eeprom: SpdEeprom) -> Self {
            let pads = PadList {
                interface: "i2c".to_string(),
                index: 0,
                pads: vec![
                    Pad::new("scl", 1),
                    Pad::new("sda_in", 1),
                    Pad::new("sda_out", 1),
                    Pad::new("sda_oe", 1),
                ],
            };
            let mut eeprom = eeprom;
            eeprom.add_pads(&pads).unwrap();
            let m = Self {
                eeprom,
                scl: pads.signal("scl").unwrap(),
                sda_out: pads.signal("sda_out").unwrap(),
                sda_oe: pads.signal("sda_oe").unwrap(),
                sda_in: pads.signal("sda_in").unwrap(),
            };
            m.scl.set_bool(true);
            m
        }

        fn tick(&mut self) {
            with_test_context(|ctx| self.eeprom.tick(ctx)).unwrap();
        }

        fn sda(&mut self, level: bool) {
            self.sda_oe.set_bool(!level);
            self.sda_out.set_bool(level);
            self.tick();
        }

        fn scl(&mut self, level: bool) {
            self.scl.set_bool(level);
            self.tick();
        }

        fn start(&mut self) {
            self.sda(true);
            self.scl(true);
            self.sda(false);
            self.scl(false);
        }

        fn stop(&mut self) {
            self.sda(false);
            self.scl(true);
            self.sda(true);
        }

        fn write_bit(&mut self, bit: bool) {
            self.sda(bit);
            self.scl(true);
            self.scl(false);
        }

        fn read_bit(&mut self) -> bool {
            self.sda(true);
            self.scl(true);
            let bit = self.sda_in.is_high();
            self.scl(false);
            bit
        }

        /// Returns true if the byte was acknowledged.
        fn write_byte(&mut self, byte: u8) -> bool {
            for i in (0..8).rev() {
                self.write_bit((byte >> i) & 1 == 1);
            }
            !self.read_bit()
        }

        fn read_byte(&mut self, ack: bool) -> u8 {
            let mut byte = 0;
            for _ in 0..8 {
                byte = (byte << 1) | u8::from(self.read_bit());
            }
            self.write_bit(!ack);
            byte
        }
    }

    fn sample_memory() -> [u8; EEPROM_SIZE] {
        let mut mem = [0u8; EEPROM_SIZE];
        for (i, b) in mem.iter_mut().enumerate() {
            *b = i as u8 ^ 0xA5;
        }
        mem
    }

    #[test]
    fn test_random_read() {
        let mut m = Master::new(SpdEeprom::new(0, sample_memory()).unwrap());
        m.start();
        assert!(m.write_byte(0x50 << 1));
        assert!(m.write_byte(0x10));
        m.start();
        assert!(m.write_byte((0x50 << 1) | 1));
        assert_eq!(m.read_byte(true), 0x10 ^ 0xA5);
        assert_eq!(m.read_byte(false), 0x11 ^ 0xA5);
        m.stop();
        assert_eq!(m.eeprom.serial_state(), SerialState::Idle);
        assert_eq!(m.eeprom.pointer(), 0x12);
    }

    #[test]
    fn test_write_then_read_wraps() {
        let mut m = Master::new(SpdEeprom::new(2, [0xFF; EEPROM_SIZE]).unwrap());
        m.start();
        assert!(m.write_byte(0x52 << 1));
        assert!(m.write_byte(0xFF));
        assert!(m.write_byte(0x11));
        assert!(m.write_byte(0x22));
        m.stop();
        assert_eq!(m.eeprom.memory()[0xFF], 0x11);
        assert_eq!(m.eeprom.memory()[0x00], 0x22);
        assert_eq!(m.eeprom.pointer(), 0x01);
    }

    #[test]
    fn test_strap_mismatch_is_ignored() {
        let mut m = Master::new(SpdEeprom::new(1, sample_memory()).unwrap());
        m.start();
        assert!(!m.write_byte(0x50 << 1));
        assert_eq!(m.eeprom.serial_state(), SerialState::Idle);
        // The rest of the transaction is ignored too.
        assert!(!m.write_byte(0x00));
        m.stop();
    }

    #[test]
    fn test_start_overrides_transfer() {
        let mut m = Master::new(SpdEeprom::new(0, sample_memory()).unwrap());
        m.start();
        m.write_bit(true);
        m.write_bit(false);
        m.write_bit(true);
        // Repeated start mid-byte: the partial byte is discarded.
        m.start();
        assert_eq!(m.eeprom.serial_state(), SerialState::ReadBits);
        assert_eq!(m.eeprom.transaction_state(), TransactionState::DeviceAddress);
        assert!(m.write_byte((0x50 << 1) | 1));
        assert_eq!(m.read_byte(false), 0xA5);
    }

    #[test]
    fn test_load_hex_and_binary_images() {
        let mut hex = tempfile::NamedTempFile::new().unwrap();
        writeln!(hex, "01 02 ff\n10").unwrap();
        let mem = load_image(hex.path()).unwrap();
        assert_eq!(&mem[..5], &[0x01, 0x02, 0xFF, 0x10, 0xFF]);

        let mut bin = tempfile::NamedTempFile::new().unwrap();
        bin.write_all(&[0x92, 0x10, 0x0B]).unwrap();
        let mem = load_image(bin.path()).unwrap();
        assert_eq!(&mem[..4], &[0x92, 0x10, 0x0B, 0xFF]);

        let mut big = tempfile::NamedTempFile::new().unwrap();
        big.write_all(&[0u8; 300]).unwrap();
        assert!(load_image(big.path()).is_err());
    }

    #[test]
    fn test_args() {
        let eeprom = SpdEeprom::from_args(r#"{"addr": 3}"#).unwrap();
        assert_eq!(eeprom.device_address(), 0x53);
        assert_eq!(eeprom.memory()[0], 0xFF);
        assert!(SpdEeprom::from_args(r#"{"addr": 8}"#).is_err());
    }
}
