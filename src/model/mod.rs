//! The hardware model the scheduler evaluates every tick.
//!
//! The generated RTL model is opaque to the host: it exposes pads at
//! start-up, then the scheduler calls [`HardwareModel::eval`] once per tick
//! and polls [`HardwareModel::finished`]. [`LoopbackModel`] is a small
//! behavioral stand-in that wires pads together, used by tests, demos and
//! benches.

mod loopback;

pub use loopback::LoopbackModel;

use crate::error::SimResult;
use crate::pads::PadRegistry;

/// An evaluable hardware model.
pub trait HardwareModel: Send {
    /// Registers every pad list the model exposes.
    fn register_pads(&mut self, pads: &mut PadRegistry) -> SimResult<()>;

    /// Evaluates one cycle of the model.
    fn eval(&mut self);

    /// Returns true once the model has signalled completion.
    fn finished(&self) -> bool;

    /// Flushes any waveform or trace sink after an evaluation.
    fn flush_trace(&mut self) {}
}
