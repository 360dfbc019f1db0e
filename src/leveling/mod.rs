//! DRAM leveling: boot-time calibration of the PHY delay lines.
//!
//! The engine drives a [`LevelingPhy`] through three stages:
//!
//! 1. **Command delay search**: a coarse-to-fine sweep of the command/clock
//!    delay that re-runs write leveling at every candidate and keeps the
//!    one whose windows start closest to half the tap range.
//! 2. **Write leveling**: per lane, sweep the write delay, majority-vote the
//!    strobe status at each tap and settle on the start of the longest run
//!    of ones. Operator-forced delays are applied as given.
//! 3. **Read leveling**: per lane and per bitslip, sweep the read delay
//!    against an LFSR test pattern, keep the best bitslip, center the read
//!    delay in its window and verify.
//!
//! Lane failures do not abort the run; they are collected in the
//! [`LevelingResult`] and decide its [`LevelingOutcome`]. Only an
//! unresponsive delay line (a [`LevelingError::Timeout`]) or an unusable
//! PHY geometry stops calibration early.
//!
//! # Example
//!
//! ```
//! use litesim::leveling::{calibrate, LevelingConfig, LevelingOutcome, LevelingReport};
//! use litesim::leveling::synthetic::{SyntheticLane, SyntheticPhy};
//!
//! let mut phy = SyntheticPhy::new(32, 4, vec![SyntheticLane::new(5, 8, 1, 10, 20)]);
//! let config = LevelingConfig::default().without_cmd_delay_search();
//! let mut report = LevelingReport::new();
//! let result = calibrate(&mut phy, &config, &mut report).unwrap();
//! assert_eq!(result.outcome, LevelingOutcome::Success);
//! assert_eq!(result.lanes[0].write_delay, 5);
//! assert_eq!(result.lanes[0].delay_tap, 15);
//! ```

pub mod pattern;
pub mod phy;
pub mod read;
pub mod synthetic;
pub mod write;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub use pattern::Lfsr;
pub use phy::LevelingPhy;

/// Errors raised while leveling.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LevelingError {
    /// A delay line never reported ready
    #[error("timed out waiting for {what} (lane {lane:?})")]
    Timeout {
        /// Operation waited on
        what: &'static str,
        /// Lane, if the operation was per lane
        lane: Option<usize>,
    },

    /// A scan found no usable window
    #[error("lane {lane}: no {stage} window found")]
    NoWindow {
        /// Failing lane
        lane: usize,
        /// `"write"` or `"read"`
        stage: &'static str,
    },

    /// The centered read delay did not pass verification
    #[error("lane {lane}: read verification failed")]
    Verification {
        /// Failing lane
        lane: usize,
    },

    /// The PHY reports a geometry the engine cannot work with
    #[error("invalid PHY geometry: {0}")]
    Geometry(String),
}

/// How the command delay is chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmdDelay {
    /// Search for the best command delay
    #[default]
    Scan,
    /// Use the given number of taps
    Fixed(usize),
    /// Leave the command delay line untouched
    Skip,
}

/// Calibration knobs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelingConfig {
    /// Strobes per tap while searching the command delay
    pub search_samples: u32,
    /// Strobes per tap in the final write-leveling scan
    pub final_samples: u32,
    /// Lanes whose write delay is forced, and the delay to use
    pub forced_write_delays: BTreeMap<usize, usize>,
    /// Command delay strategy
    pub cmd_delay: CmdDelay,
    /// Read verification attempts per lane
    pub verify_retries: u32,
    /// Polls of the ready flag after each delay step before giving up
    pub ready_retries: u32,
    /// Bytes in the read-leveling test pattern
    pub pattern_len: usize,
    /// Row the test pattern is written to
    pub test_row: u32,
}

impl Default for LevelingConfig {
    fn default() -> Self {
        Self {
            search_samples: 8,
            final_samples: 128,
            forced_write_delays: BTreeMap::new(),
            cmd_delay: CmdDelay::Scan,
            verify_retries: 3,
            ready_retries: 1000,
            pattern_len: 64,
            test_row: 0,
        }
    }
}

impl LevelingConfig {
    /// Forces the write delay of `lane`.
    pub fn with_forced_write_delay(mut self, lane: usize, delay: usize) -> Self {
        self.forced_write_delays.insert(lane, delay);
        self
    }

    /// Uses a fixed command delay.
    pub fn with_cmd_delay(mut self, taps: usize) -> Self {
        self.cmd_delay = CmdDelay::Fixed(taps);
        self
    }

    /// Leaves the command delay alone.
    pub fn without_cmd_delay_search(mut self) -> Self {
        self.cmd_delay = CmdDelay::Skip;
        self
    }
}

/// Final settings of one byte lane.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneLeveling {
    /// Lane index
    pub lane: usize,
    /// Write delay taps
    pub write_delay: usize,
    /// The write delay came from the configuration
    pub write_forced: bool,
    /// Read delay taps
    pub delay_tap: usize,
    /// Read bitslip
    pub bitslip: usize,
    /// First tap of the read window
    pub window_start: usize,
    /// Width of the read window in taps
    pub window_width: usize,
}

/// Overall result of a calibration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelingOutcome {
    /// Every lane calibrated
    Success,
    /// Every lane usable, some with forced write delays
    PartialForced,
    /// At least one lane failed
    Failed,
}

/// Everything calibration decided.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LevelingResult {
    /// Per-lane settings, in lane order
    pub lanes: Vec<LaneLeveling>,
    /// Command delay in use, if the engine set one
    pub cmd_delay: Option<usize>,
    /// Lane failures
    pub failures: Vec<LevelingError>,
    /// Overall verdict
    pub outcome: LevelingOutcome,
}

impl LevelingResult {
    /// Returns true unless a lane failed.
    pub fn is_usable(&self) -> bool {
        self.outcome != LevelingOutcome::Failed
    }
}

/// Human-readable progress log of a calibration run.
///
/// Every line is also emitted through `tracing` at debug level.
#[derive(Clone, Debug, Default)]
pub struct LevelingReport {
    lines: Vec<String>,
}

impl LevelingReport {
    /// Creates an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a line.
    pub fn line(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!(target: "litesim::leveling", "{line}");
        self.lines.push(line);
    }

    /// Appends a scan row such as `m0: |00111100| delay: 02`.
    pub fn scan_row(&mut self, lane: usize, row: &[bool], chosen: Option<usize>) {
        let bits: String = row.iter().map(|b| if *b { '1' } else { '0' }).collect();
        let delay = chosen.map_or_else(|| "-".to_string(), |d| format!("{d:02}"));
        self.line(format!("m{lane}: |{bits}| delay: {delay}"));
    }

    /// All lines so far.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Returns true if no line was written.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl fmt::Display for LevelingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Runs the full calibration.
///
/// # Arguments
/// * `phy` - PHY to calibrate
/// * `config` - calibration knobs
/// * `report` - receives the progress log
///
/// # Returns
/// The per-lane settings and the overall outcome. `Err` only when a delay
/// line stops responding or the geometry is unusable.
pub fn calibrate(
    phy: &mut dyn LevelingPhy,
    config: &LevelingConfig,
    report: &mut LevelingReport,
) -> Result<LevelingResult, LevelingError> {
    let (modules, delays, bitslips) = (phy.modules(), phy.delays(), phy.bitslips());
    if modules == 0 || delays == 0 || bitslips == 0 {
        return Err(LevelingError::Geometry(format!(
            "{modules} lanes, {delays} delays, {bitslips} bitslips"
        )));
    }
    if config.pattern_len == 0 {
        return Err(LevelingError::Geometry("empty test pattern".to_string()));
    }
    tracing::info!(modules, delays, bitslips, "starting DRAM leveling");

    let cmd_delay = match config.cmd_delay {
        CmdDelay::Scan => Some(write::cmd_delay_search(phy, config, report)?),
        CmdDelay::Fixed(taps) => {
            phy::set_cmd_delay(phy, taps, config.ready_retries)?;
            report.line(format!("cmd delay fixed at {taps}"));
            Some(taps)
        }
        CmdDelay::Skip => None,
    };

    report.line("write leveling:");
    let write = write::write_leveling(phy, config, config.final_samples, report)?;

    report.line("read leveling:");
    let mut lanes = Vec::with_capacity(modules);
    let mut failures = Vec::new();
    for (lane, write_lane) in write.iter().enumerate() {
        let mut settings = LaneLeveling {
            lane,
            ..LaneLeveling::default()
        };
        match write_lane {
            write::WriteLane::Found(delay) => settings.write_delay = *delay,
            write::WriteLane::Forced(delay) => {
                settings.write_delay = *delay;
                settings.write_forced = true;
            }
            write::WriteLane::Failed => {
                failures.push(LevelingError::NoWindow {
                    lane,
                    stage: "write",
                });
                lanes.push(settings);
                continue;
            }
        }
        match read::level_lane(phy, lane, config, report) {
            Ok(read) => {
                settings.delay_tap = read.delay_tap;
                settings.bitslip = read.bitslip;
                settings.window_start = read.window_start;
                settings.window_width = read.window_width;
            }
            Err(e @ LevelingError::Timeout { .. }) | Err(e @ LevelingError::Geometry(_)) => {
                return Err(e)
            }
            Err(e) => failures.push(e),
        }
        lanes.push(settings);
    }

    let outcome = if !failures.is_empty() {
        LevelingOutcome::Failed
    } else if lanes.iter().any(|l| l.write_forced) {
        LevelingOutcome::PartialForced
    } else {
        LevelingOutcome::Success
    };
    match outcome {
        LevelingOutcome::Failed => {
            for failure in &failures {
                tracing::error!(%failure, "leveling failure");
            }
            report.line("leveling failed");
        }
        _ => report.line(format!("leveling done: {outcome:?}")),
    }
    Ok(LevelingResult {
        lanes,
        cmd_delay,
        failures,
        outcome,
    })
}
