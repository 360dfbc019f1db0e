//! # LiteSim
//!
//! An event-driven co-simulation host for LiteX-style SoCs, plus the DRAM
//! read/write leveling calibration used to bring up their memory PHYs.
//!
//! ## Design Principles
//!
//! - **Config-Driven**: A JSON or YAML list of `{timebase}` and `{module}`
//!   entries decides which peripheral sessions are created and which pad
//!   lists of the hardware model they bind to.
//! - **Single Timeline**: The scheduler owns the simulation clock; each tick
//!   runs tick-first sessions, evaluates the model, then runs the rest.
//! - **Batched Callbacks**: The event loop invokes the scheduler at a fixed
//!   wall-clock cadence and every callback advances up to a batch of ticks,
//!   servicing host I/O in between.
//! - **Typed Messaging**: Sessions talk to each other through
//!   [`SessionTable::send`] with structured [`Message`] values.
//!
//! ## Quick Start
//!
//! ```rust
//! use litesim::{HostOptions, LoopbackModel, ModuleRegistry, SimConfig, Simulation};
//!
//! let config = SimConfig::from_json(
//!     r#"[{"timebase": 125}, {"module": "clocker", "interface": ["sys_clk"]}]"#,
//! )
//! .unwrap();
//! let registry = ModuleRegistry::with_builtin_modules().unwrap();
//! let model = Box::new(LoopbackModel::new().with_sys_clk());
//!
//! let mut sim = Simulation::from_config(&config, &registry, model, HostOptions::default()).unwrap();
//! sim.run_ticks(8).unwrap();
//! assert_eq!(sim.time_ps(), 1000);
//! ```
//!
//! ## Calibration
//!
//! ```rust
//! use litesim::leveling::synthetic::{SyntheticLane, SyntheticPhy};
//! use litesim::leveling::{calibrate, LevelingConfig, LevelingReport};
//!
//! let mut phy = SyntheticPhy::new(32, 8, vec![SyntheticLane::new(6, 8, 3, 10, 20)]);
//! let mut report = LevelingReport::new();
//! let result = calibrate(&mut phy, &LevelingConfig::default(), &mut report).unwrap();
//! assert!(result.is_usable());
//! ```

pub mod types;
pub mod error;
pub mod config;
pub mod pads;
pub mod message;
pub mod module;
pub mod session;
pub mod registry;
pub mod scheduler;
pub mod event_loop;
pub mod model;
pub mod modules;
pub mod leveling;
pub mod stats;

// Re-export commonly used types
pub use types::{SessionId, SimClock, SimTime};
pub use error::{SimError, SimResult, Status};
pub use config::{ConfigError, HostOptions, ModuleConfig, SimConfig, SimConfigBuilder};
pub use pads::{PadList, PadRegistry, Signal};
pub use message::{Message, MessageError, MessageOp, MessageResult};
pub use module::{Module, ModuleArgs, ModuleDescriptor, SimContext};
pub use session::{SessionInfo, SessionTable};
pub use registry::{ModuleLoader, ModuleRegistry};
pub use scheduler::{SchedulerState, Simulation, TickErrorPolicy};
pub use event_loop::{EventLoop, LoopExit, StopHandle};
pub use model::{HardwareModel, LoopbackModel};
pub use stats::{SimulationStats, Timer};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging.
///
/// # Example
///
/// ```rust,ignore
/// litesim::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
