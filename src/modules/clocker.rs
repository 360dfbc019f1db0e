//! Clock generator.
//!
//! Drives one square-wave clock pad as a pure function of simulated time:
//!
//! ```text
//! value(t) = ((t + period - phase) mod period) < period / 2
//! period   = 10^12 / freq_hz            (picoseconds)
//! phase    = period * phase_deg / 360
//! ```
//!
//! All arithmetic is integer picoseconds, so the waveform is reproducible
//! bit-for-bit for a given timebase.
//!
//! Arguments: `freq_hz` (default 200 MHz), `phase_deg` (default 0).

use crate::error::{SimError, SimResult};
use crate::message::{Message, MessageError, MessageOp, MessageResult};
use crate::module::{Module, ModuleArgs, ModuleDescriptor, SimContext};
use crate::pads::{PadList, Signal};
use crate::registry::ModuleRegistry;
use crate::types::{SimTime, PS_PER_SECOND};

/// Module name.
pub const NAME: &str = "clocker";

/// Default output frequency.
pub const DEFAULT_FREQ_HZ: u64 = 200_000_000;

/// Registers the clocker descriptor.
pub fn init(registry: &mut ModuleRegistry) -> SimResult<()> {
    registry.register(
        ModuleDescriptor::new(NAME, |args| {
            Ok(Box::new(Clocker::from_args(args)?) as Box<dyn Module>)
        })
        .with_messages(),
    )
}

/// Integer clock waveform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockWave {
    period_ps: SimTime,
    phase_ps: SimTime,
}

impl ClockWave {
    /// Builds a waveform from a frequency and a phase in degrees.
    pub fn new(freq_hz: u64, phase_deg: u64) -> SimResult<Self> {
        if freq_hz == 0 {
            return Err(SimError::InvalidArgument("clock frequency must be non-zero".to_string()));
        }
        let period_ps = PS_PER_SECOND / freq_hz;
        if period_ps < 2 {
            return Err(SimError::InvalidArgument(format!(
                "clock frequency {freq_hz} Hz is too high for picosecond resolution"
            )));
        }
        if phase_deg >= 360 {
            return Err(SimError::InvalidArgument(format!(
                "clock phase {phase_deg} must be below 360 degrees"
            )));
        }
        Ok(Self {
            period_ps,
            phase_ps: period_ps * phase_deg / 360,
        })
    }

    /// Clock period in picoseconds.
    pub fn period_ps(&self) -> SimTime {
        self.period_ps
    }

    /// Phase offset in picoseconds.
    pub fn phase_ps(&self) -> SimTime {
        self.phase_ps
    }

    /// Level of the clock at time `t`.
    #[inline]
    pub fn value(&self, t: SimTime) -> bool {
        (t % self.period_ps + self.period_ps - self.phase_ps) % self.period_ps < self.period_ps / 2
    }
}

/// Clock generator session.
#[derive(Debug)]
pub struct Clocker {
    wave: ClockWave,
    freq_hz: u64,
    phase_deg: u64,
    clk: Option<Signal>,
    ticks: u64,
    edges: u64,
    aliasing_checked: bool,
}

impl Clocker {
    /// Creates a session from its JSON argument string.
    pub fn from_args(args: &str) -> SimResult<Self> {
        let args = ModuleArgs::parse(args)?;
        let freq_hz = args.u64_or("freq_hz", DEFAULT_FREQ_HZ)?;
        let phase_deg = args.u64_or("phase_deg", 0)?;
        Ok(Self {
            wave: ClockWave::new(freq_hz, phase_deg)?,
            freq_hz,
            phase_deg,
            clk: None,
            ticks: 0,
            edges: 0,
            aliasing_checked: false,
        })
    }

    /// The synthesized waveform.
    pub fn wave(&self) -> ClockWave {
        self.wave
    }

    /// Number of level changes driven so far.
    pub fn edges(&self) -> u64 {
        self.edges
    }
}

impl Module for Clocker {
    fn add_pads(&mut self, pads: &PadList) -> SimResult<()> {
        // The clock pad carries the interface's name; a single-pad list is
        // accepted under any name.
        let signal = match pads.signal(&pads.interface) {
            Some(signal) => signal,
            None if pads.pads.len() == 1 => pads.pads[0].signal.clone(),
            None => pads.require(&pads.interface)?,
        };
        self.clk = Some(signal);
        Ok(())
    }

    fn tick(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        if !self.aliasing_checked {
            self.aliasing_checked = true;
            if ctx.timebase_ps() * 2 > self.wave.period_ps {
                tracing::warn!(
                    session = %ctx.session_id(),
                    timebase_ps = ctx.timebase_ps(),
                    period_ps = self.wave.period_ps,
                    "timebase too coarse for clock, waveform will alias"
                );
            }
        }

        let level = self.wave.value(ctx.time_ps());
        if let Some(clk) = &self.clk {
            if clk.is_high() != level {
                self.edges += 1;
            }
            clk.set_bool(level);
        }
        self.ticks += 1;
        Ok(())
    }

    fn message(&mut self, msg: &Message) -> MessageResult {
        match msg.op {
            MessageOp::Get | MessageOp::Describe => Ok(serde_json::json!({
                "freq_hz": self.freq_hz,
                "phase_deg": self.phase_deg,
                "period_ps": self.wave.period_ps,
                "ticks": self.ticks,
                "edges": self.edges,
                "level": self.clk.as_ref().map(Signal::is_high),
            })),
            _ => Err(MessageError::Unsupported),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_wave() {
        let wave = ClockWave::new(DEFAULT_FREQ_HZ, 0).unwrap();
        assert_eq!(wave.period_ps(), 5000);
        assert!(wave.value(0));
        assert!(wave.value(2499));
        assert!(!wave.value(2500));
        assert!(!wave.value(4999));
        assert!(wave.value(5000));
    }

    #[test]
    fn test_phase_shift() {
        let wave = ClockWave::new(DEFAULT_FREQ_HZ, 90).unwrap();
        assert_eq!(wave.phase_ps(), 1250);
        assert!(!wave.value(0));
        assert!(wave.value(1250));
        assert!(!wave.value(3750));
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(ClockWave::new(0, 0).is_err());
        assert!(ClockWave::new(PS_PER_SECOND, 0).is_err());
        assert!(ClockWave::new(1_000_000, 360).is_err());
        assert!(Clocker::from_args(r#"{"freq_hz": "fast"}"#).is_err());
    }

    #[test]
    fn test_args() {
        let clk = Clocker::from_args(r#"{"freq_hz": 100000000, "phase_deg": 180}"#).unwrap();
        assert_eq!(clk.wave().period_ps(), 10_000);
        assert_eq!(clk.wave().phase_ps(), 5000);
    }
}
