//! GPIO bridge.
//!
//! Exposes the `gpio` interface's `oe`, `o` and `i` pads to the control
//! channel: `Get` reports the pin state, `Set {"i": value}` drives the inputs.

use crate::error::{SimError, SimResult};
use crate::message::{Message, MessageError, MessageOp, MessageResult};
use crate::module::{Module, ModuleArgs, ModuleDescriptor, SimContext};
use crate::pads::{PadList, Signal};
use crate::registry::ModuleRegistry;

/// Module name.
pub const NAME: &str = "gpio";

/// Widest bank the bridge handles.
pub const MAX_WIDTH: u32 = 64;

/// Registers the gpio descriptor.
pub fn init(registry: &mut ModuleRegistry) -> SimResult<()> {
    registry.register(
        ModuleDescriptor::new(NAME, |args| {
            ModuleArgs::parse(args)?;
            Ok(Box::new(Gpio::new()) as Box<dyn Module>)
        })
        .with_messages(),
    )
}

#[derive(Debug)]
struct GpioPads {
    oe: Signal,
    o: Signal,
    i: Signal,
}

/// GPIO bridge session.
#[derive(Debug, Default)]
pub struct Gpio {
    pads: Option<GpioPads>,
    width: u32,
    last_output: (u64, u64),
    output_changes: u64,
}

impl Gpio {
    /// Creates an unbound bridge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bank width in bits.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Number of ticks on which `o` or `oe` changed.
    pub fn output_changes(&self) -> u64 {
        self.output_changes
    }

    fn mask(&self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }

    fn pads(&self) -> Result<&GpioPads, MessageError> {
        self.pads
            .as_ref()
            .ok_or_else(|| MessageError::Failed("gpio has no pads".to_string()))
    }
}

impl Module for Gpio {
    fn add_pads(&mut self, pads: &PadList) -> SimResult<()> {
        if pads.interface != "gpio" {
            tracing::debug!(interface = %pads.interface, "gpio ignores interface");
            return Ok(());
        }
        let widths = ["oe", "o", "i"].map(|name| pads.width_of(name).unwrap_or(0));
        if widths.iter().any(|w| *w != widths[0]) {
            tracing::warn!(oe = widths[0], o = widths[1], i = widths[2], "gpio pad widths differ");
        }
        let width = widths.into_iter().max().unwrap_or(0);
        if width > MAX_WIDTH {
            tracing::warn!(width, max = MAX_WIDTH, "gpio bank too wide, capping");
        }
        self.width = width.min(MAX_WIDTH);
        self.pads = Some(GpioPads {
            oe: pads.require("oe")?,
            o: pads.require("o")?,
            i: pads.require("i")?,
        });
        Ok(())
    }

    fn tick(&mut self, _ctx: &mut SimContext<'_>) -> SimResult<()> {
        let Some(pads) = &self.pads else {
            return Err(SimError::InvalidArgument("gpio has no pads".to_string()));
        };
        let output = (pads.oe.get(), pads.o.get());
        if output != self.last_output {
            tracing::trace!(oe = output.0, o = output.1, "gpio outputs changed");
            self.last_output = output;
            self.output_changes += 1;
        }
        Ok(())
    }

    fn message(&mut self, msg: &Message) -> MessageResult {
        match msg.op {
            MessageOp::Get | MessageOp::Describe => {
                let pads = self.pads()?;
                Ok(serde_json::json!({
                    "oe": pads.oe.get(),
                    "o": pads.o.get(),
                    "i": pads.i.get(),
                    "width": self.width,
                }))
            }
            MessageOp::Set => {
                let value = msg
                    .data
                    .get("i")
                    .and_then(serde_json::Value::as_u64)
                    .ok_or_else(|| MessageError::Failed("set needs an unsigned `i`".to_string()))?;
                let mask = self.mask();
                if value & !mask != 0 {
                    return Err(MessageError::Failed(format!(
                        "value {value:#x} wider than {} pins",
                        self.width
                    )));
                }
                self.pads()?.i.set(value);
                Ok(serde_json::json!({ "i": value }))
            }
            _ => Err(MessageError::Unsupported),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::with_test_context;
    use crate::pads::Pad;

    fn bank(width: u32) -> PadList {
        PadList {
            interface: "gpio".to_string(),
            index: 0,
            pads: vec![Pad::new("oe", width), Pad::new("o", width), Pad::new("i", width)],
        }
    }

    #[test]
    fn test_get_and_set() {
        let pads = bank(8);
        let mut gpio = Gpio::new();
        gpio.add_pads(&pads).unwrap();
        pads.signal("oe").unwrap().set(0x0F);
        pads.signal("o").unwrap().set(0x05);

        let state = gpio.message(&Message::get()).unwrap();
        assert_eq!(state, serde_json::json!({"oe": 15, "o": 5, "i": 0, "width": 8}));

        gpio.message(&Message::set(serde_json::json!({"i": 0xA0}))).unwrap();
        assert_eq!(pads.signal("i").unwrap().get(), 0xA0);
        assert!(gpio.message(&Message::set(serde_json::json!({"i": 0x100}))).is_err());
        assert!(gpio.message(&Message::set(serde_json::json!({}))).is_err());
    }

    #[test]
    fn test_mismatched_widths_are_tolerated() {
        let pads = PadList {
            interface: "gpio".to_string(),
            index: 0,
            pads: vec![Pad::new("oe", 4), Pad::new("o", 8), Pad::new("i", 8)],
        };
        let mut gpio = Gpio::new();
        gpio.add_pads(&pads).unwrap();
        assert_eq!(gpio.width(), 8);
    }

    #[test]
    fn test_width_capped() {
        let mut gpio = Gpio::new();
        gpio.add_pads(&bank(96)).unwrap();
        assert_eq!(gpio.width(), MAX_WIDTH);
    }

    #[test]
    fn test_tick_tracks_output_changes() {
        let pads = bank(4);
        let mut gpio = Gpio::new();
        gpio.add_pads(&pads).unwrap();
        with_test_context(|ctx| gpio.tick(ctx)).unwrap();
        pads.signal("o").unwrap().set(1);
        with_test_context(|ctx| gpio.tick(ctx)).unwrap();
        with_test_context(|ctx| gpio.tick(ctx)).unwrap();
        assert_eq!(gpio.output_changes(), 1);
    }
}
