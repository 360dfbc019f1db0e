//! Statistics collection and export for a simulation run.
//!
//! The scheduler keeps raw counters; [`SimulationStats`] is the exported
//! snapshot, with JSON, CSV and human-readable renderings.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use crate::types::{SessionId, SimTime};

/// Aggregate statistics for a simulation run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimulationStats {
    /// Run metadata
    pub metadata: SimulationMetadata,

    /// Scheduler-level counters
    pub scheduler: SchedulerStats,

    /// Per-session counters, in creation order
    pub sessions: Vec<SessionStats>,

    /// Timing statistics
    pub timing: TimingStats,
}

/// Metadata about the simulation run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimulationMetadata {
    /// Run name
    pub name: String,

    /// Crate version that produced the run
    pub version: String,

    /// Configuration file used, if any
    pub config_file: Option<String>,
}

/// Scheduler-level counters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Final simulated time in picoseconds
    pub final_time_ps: SimTime,

    /// Picoseconds per tick
    pub timebase_ps: SimTime,

    /// Simulated ticks executed
    pub ticks_executed: u64,

    /// Scheduler callbacks invoked
    pub batches: u64,

    /// Scheduler callbacks that found the simulation halted
    pub halted_batches: u64,

    /// Hardware model evaluations
    pub model_evals: u64,

    /// Messages delivered to a handler
    pub messages_delivered: u64,

    /// Tick or poll failures
    pub faults: u64,

    /// Whether the hardware model signalled completion
    pub finished: bool,
}

/// Counters for one session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionStats {
    /// Session handle
    pub id: SessionId,

    /// Module name
    pub module: String,

    /// Ticks executed
    pub ticks: u64,

    /// Messages handled
    pub messages: u64,

    /// Isolated after a failure
    pub faulted: bool,
}

/// Timing/performance statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TimingStats {
    /// Total wall-clock time in milliseconds
    pub total_wall_time_ms: f64,

    /// Simulated picoseconds per wall-clock second
    pub sim_ps_per_second: f64,

    /// Ticks executed per wall-clock second
    pub ticks_per_second: f64,
}

impl SimulationStats {
    /// Creates a new empty statistics container.
    pub fn new() -> Self {
        Self {
            metadata: SimulationMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Sets the run name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    /// Updates timing statistics from the measured wall time.
    pub fn compute_timing(&mut self, wall_time_ms: f64) {
        self.timing.total_wall_time_ms = wall_time_ms;

        if wall_time_ms > 0.0 {
            let seconds = wall_time_ms / 1000.0;
            self.timing.sim_ps_per_second = self.scheduler.final_time_ps as f64 / seconds;
            self.timing.ticks_per_second = self.scheduler.ticks_executed as f64 / seconds;
        }
    }

    /// Number of sessions that were isolated after a failure.
    pub fn faulted_sessions(&self) -> usize {
        self.sessions.iter().filter(|s| s.faulted).count()
    }

    /// Exports statistics to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Exports statistics to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Exports summary statistics to CSV.
    pub fn to_csv(&self) -> String {
        let s = &self.scheduler;
        let mut csv = String::from("metric,value\n");
        csv.push_str(&format!("final_time_ps,{}\n", s.final_time_ps));
        csv.push_str(&format!("timebase_ps,{}\n", s.timebase_ps));
        csv.push_str(&format!("ticks_executed,{}\n", s.ticks_executed));
        csv.push_str(&format!("batches,{}\n", s.batches));
        csv.push_str(&format!("halted_batches,{}\n", s.halted_batches));
        csv.push_str(&format!("messages_delivered,{}\n", s.messages_delivered));
        csv.push_str(&format!("faults,{}\n", s.faults));
        csv.push_str(&format!("wall_time_ms,{:.2}\n", self.timing.total_wall_time_ms));
        csv.push_str(&format!("ticks_per_second,{:.2}\n", self.timing.ticks_per_second));
        csv
    }

    /// Exports per-session statistics to CSV.
    pub fn sessions_to_csv(&self) -> String {
        let mut csv = String::from("session,module,ticks,messages,faulted\n");
        for session in &self.sessions {
            csv.push_str(&format!(
                "{},{},{},{},{}\n",
                session.id.wire_id(),
                session.module,
                session.ticks,
                session.messages,
                session.faulted
            ));
        }
        csv
    }

    /// Writes a human-readable summary to a writer.
    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(w, "=== Simulation Statistics ===")?;
        if !self.metadata.name.is_empty() {
            writeln!(w, "Name: {}", self.metadata.name)?;
        }
        if let Some(ref config) = self.metadata.config_file {
            writeln!(w, "Config: {}", config)?;
        }
        writeln!(w)?;

        let s = &self.scheduler;
        writeln!(w, "--- Scheduler ---")?;
        writeln!(w, "Final time: {} ps ({} ps/tick)", s.final_time_ps, s.timebase_ps)?;
        writeln!(w, "Ticks executed: {}", s.ticks_executed)?;
        writeln!(w, "Batches: {} ({} halted)", s.batches, s.halted_batches)?;
        writeln!(w, "Messages delivered: {}", s.messages_delivered)?;
        writeln!(w, "Faults: {}", s.faults)?;
        writeln!(w, "Finished: {}", s.finished)?;
        writeln!(w)?;

        writeln!(w, "--- Timing ---")?;
        writeln!(w, "Wall time: {:.2} ms", self.timing.total_wall_time_ms)?;
        writeln!(w, "Ticks/sec: {:.2}", self.timing.ticks_per_second)?;
        writeln!(w)?;

        writeln!(w, "--- Sessions ---")?;
        for session in &self.sessions {
            let flag = if session.faulted { " [faulted]" } else { "" };
            writeln!(
                w,
                "{} {}: {} ticks, {} messages{}",
                session.id, session.module, session.ticks, session.messages, flag
            )?;
        }

        Ok(())
    }

    /// Returns the summary as a string.
    pub fn summary(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_summary(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// A simple timer for measuring wall-clock time.
#[derive(Debug)]
pub struct Timer {
    start: std::time::Instant,
}

impl Timer {
    /// Starts a new timer.
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Returns elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SimulationStats {
        let mut stats = SimulationStats::new().with_name("sample");
        stats.scheduler.final_time_ps = 1000;
        stats.scheduler.timebase_ps = 125;
        stats.scheduler.ticks_executed = 8;
        stats.sessions.push(SessionStats {
            id: SessionId(0),
            module: "clocker".to_string(),
            ticks: 8,
            messages: 0,
            faulted: false,
        });
        stats.sessions.push(SessionStats {
            id: SessionId(1),
            module: "gpio".to_string(),
            ticks: 3,
            messages: 2,
            faulted: true,
        });
        stats
    }

    #[test]
    fn test_stats_creation() {
        let stats = SimulationStats::new();
        assert_eq!(stats.metadata.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_stats_json_export() {
        let json = sample().to_json().unwrap();
        assert!(json.contains("\"final_time_ps\": 1000"));
        assert!(json.contains("clocker"));
    }

    #[test]
    fn test_stats_csv_export() {
        let stats = sample();
        assert!(stats.to_csv().contains("ticks_executed,8"));
        assert!(stats.sessions_to_csv().contains("1,gpio,3,2,true"));
    }

    #[test]
    fn test_compute_timing() {
        let mut stats = sample();
        stats.compute_timing(2000.0);
        assert!((stats.timing.ticks_per_second - 4.0).abs() < 1e-9);
        assert!((stats.timing.sim_ps_per_second - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_output() {
        let stats = sample();
        let summary = stats.summary();
        assert!(summary.contains("sample"));
        assert!(summary.contains("#1 gpio"));
        assert!(summary.contains("[faulted]"));
        assert_eq!(stats.faulted_sessions(), 1);
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5.0);
    }
}
