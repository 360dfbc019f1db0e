//! Deterministic PHY model for tests, benches and `litesim calibrate`.
//!
//! Each lane is described by a write-leveling window (shifted later by the
//! command delay) and a read window valid at exactly one bitslip. A
//! description is plain serde data, so it can be loaded from JSON:
//!
//! ```json
//! {
//!   "delays": 32,
//!   "bitslips": 8,
//!   "lanes": [
//!     {"write_start": 4, "write_width": 6, "read_bitslip": 2, "read_min": 8, "read_max": 19}
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::phy::LevelingPhy;

/// Truth table of one lane.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticLane {
    /// First write delay tap reading 1 at command delay zero
    pub write_start: usize,
    /// Number of taps reading 1; zero means no window
    pub write_width: usize,
    /// Bitslip at which reads can succeed
    pub read_bitslip: usize,
    /// First read delay tap returning intact data
    pub read_min: usize,
    /// Last read delay tap returning intact data
    pub read_max: usize,
}

impl SyntheticLane {
    /// Lane with a write window at `write_start..write_start + write_width`
    /// and a read window `read_min..=read_max` at `read_bitslip`.
    pub fn new(
        write_start: usize,
        write_width: usize,
        read_bitslip: usize,
        read_min: usize,
        read_max: usize,
    ) -> Self {
        Self {
            write_start,
            write_width,
            read_bitslip,
            read_min,
            read_max,
        }
    }

    /// Lane whose write-leveling feedback never goes high.
    pub fn no_write_window(read_bitslip: usize, read_min: usize, read_max: usize) -> Self {
        Self::new(0, 0, read_bitslip, read_min, read_max)
    }
}

/// Serializable description of a synthetic PHY.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticDescription {
    /// Taps per delay line
    pub delays: usize,
    /// Bitslip positions
    pub bitslips: usize,
    /// Lanes
    pub lanes: Vec<SyntheticLane>,
    /// Taps adjacent to a write window read 1 on a third of the strobes
    #[serde(default)]
    pub edge_jitter: bool,
    /// Corrupted reads per lane right after its full read scan
    #[serde(default)]
    pub failed_verifies: u32,
    /// Polls before a delay step reports ready
    #[serde(default)]
    pub ready_latency: u32,
    /// The delay lines never report ready
    #[serde(default)]
    pub stuck: bool,
}

#[derive(Clone, Debug, Default)]
struct LaneState {
    wdly: usize,
    rdly: usize,
    bitslip: usize,
    reads: usize,
    corrupted: u32,
}

/// A PHY whose behavior follows a [`SyntheticDescription`].
#[derive(Clone, Debug)]
pub struct SyntheticPhy {
    desc: SyntheticDescription,
    lanes: Vec<LaneState>,
    cdly: usize,
    wlevel: bool,
    strobes: u64,
    busy: u32,
    memory: HashMap<(u32, usize), Vec<u8>>,
}

impl SyntheticPhy {
    /// Creates a PHY with the given geometry and lanes.
    pub fn new(delays: usize, bitslips: usize, lanes: Vec<SyntheticLane>) -> Self {
        Self::from_description(SyntheticDescription {
            delays,
            bitslips,
            lanes,
            edge_jitter: false,
            failed_verifies: 0,
            ready_latency: 0,
            stuck: false,
        })
    }

    /// Creates a PHY from a description.
    pub fn from_description(desc: SyntheticDescription) -> Self {
        let lanes = vec![LaneState::default(); desc.lanes.len()];
        Self {
            desc,
            lanes,
            cdly: 0,
            wlevel: false,
            strobes: 0,
            busy: 0,
            memory: HashMap::new(),
        }
    }

    /// Parses a JSON description.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::from_description(serde_json::from_str(json)?))
    }

    /// Makes taps next to each write window flicker.
    pub fn with_edge_jitter(mut self) -> Self {
        self.desc.edge_jitter = true;
        self
    }

    /// Corrupts the first `n` reads of each lane that follow its full
    /// bitslip by delay scan, as if the lane drifted right after leveling.
    pub fn with_failed_verifies(mut self, n: u32) -> Self {
        self.desc.failed_verifies = n;
        self
    }

    /// Delay steps take `polls` extra ready polls to settle.
    pub fn with_ready_latency(mut self, polls: u32) -> Self {
        self.desc.ready_latency = polls;
        self
    }

    /// Delay lines never settle.
    pub fn with_stuck_delay_line(mut self) -> Self {
        self.desc.stuck = true;
        self
    }

    /// The description in use.
    pub fn description(&self) -> &SyntheticDescription {
        &self.desc
    }

    /// Current write delay of a lane.
    pub fn write_delay(&self, lane: usize) -> usize {
        self.lanes[lane].wdly
    }

    /// Current read delay of a lane.
    pub fn read_delay(&self, lane: usize) -> usize {
        self.lanes[lane].rdly
    }

    /// Current bitslip of a lane.
    pub fn bitslip(&self, lane: usize) -> usize {
        self.lanes[lane].bitslip
    }

    /// Current command delay.
    pub fn cmd_delay(&self) -> usize {
        self.cdly
    }

    /// Pattern reads issued on a lane so far.
    pub fn pattern_reads(&self, lane: usize) -> usize {
        self.lanes[lane].reads
    }

    fn step(&mut self) {
        self.busy = self.desc.ready_latency;
    }

    fn wrap(&self, value: usize) -> usize {
        if value + 1 >= self.desc.delays {
            0
        } else {
            value + 1
        }
    }
}

impl LevelingPhy for SyntheticPhy {
    fn modules(&self) -> usize {
        self.desc.lanes.len()
    }

    fn delays(&self) -> usize {
        self.desc.delays
    }

    fn bitslips(&self) -> usize {
        self.desc.bitslips
    }

    fn wlevel_enable(&mut self, enable: bool) {
        self.wlevel = enable;
    }

    fn wdly_rst(&mut self, lane: usize) {
        self.lanes[lane].wdly = 0;
    }

    fn wdly_inc(&mut self, lane: usize) {
        self.lanes[lane].wdly = self.wrap(self.lanes[lane].wdly);
        self.step();
    }

    fn wlevel_strobe(&mut self) {
        self.strobes += 1;
    }

    fn wlevel_status(&mut self, lane: usize) -> bool {
        if !self.wlevel {
            return false;
        }
        let truth = &self.desc.lanes[lane];
        if truth.write_width == 0 {
            return false;
        }
        let tap = self.lanes[lane].wdly;
        let start = truth.write_start + self.cdly;
        let end = start + truth.write_width;
        if (start..end).contains(&tap) {
            return true;
        }
        let edge = tap + 1 == start || tap == end;
        self.desc.edge_jitter && edge && self.strobes % 3 == 0
    }

    fn cdly_rst(&mut self) {
        self.cdly = 0;
    }

    fn cdly_inc(&mut self) {
        self.cdly = self.wrap(self.cdly);
        self.step();
    }

    fn rdly_rst(&mut self, lane: usize) {
        self.lanes[lane].rdly = 0;
    }

    fn rdly_inc(&mut self, lane: usize) {
        self.lanes[lane].rdly = self.wrap(self.lanes[lane].rdly);
        self.step();
    }

    fn bitslip_rst(&mut self, lane: usize) {
        self.lanes[lane].bitslip = 0;
    }

    fn bitslip_inc(&mut self, lane: usize) {
        let state = &mut self.lanes[lane];
        state.bitslip = (state.bitslip + 1) % self.desc.bitslips.max(1);
    }

    fn write_pattern(&mut self, row: u32, lane: usize, data: &[u8]) {
        self.memory.insert((row, lane), data.to_vec());
    }

    fn read_pattern(&mut self, row: u32, lane: usize, len: usize) -> Vec<u8> {
        let scan_reads = self.desc.bitslips * self.desc.delays;
        let truth = &self.desc.lanes[lane];
        let state = &mut self.lanes[lane];
        state.reads += 1;

        let mut data = self.memory.get(&(row, lane)).cloned().unwrap_or_default();
        data.resize(len, 0);
        let mut intact = state.bitslip == truth.read_bitslip
            && (truth.read_min..=truth.read_max).contains(&state.rdly);
        if intact && state.reads > scan_reads && state.corrupted < self.desc.failed_verifies {
            state.corrupted += 1;
            intact = false;
        }
        if !intact {
            for b in &mut data {
                *b ^= 0xFF;
            }
        }
        data
    }

    fn delay_ready(&mut self) -> bool {
        if self.desc.stuck {
            return false;
        }
        if self.busy > 0 {
            self.busy -= 1;
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json() {
        let phy = SyntheticPhy::from_json(
            r#"{"delays": 32, "bitslips": 8, "lanes": [
                {"write_start": 4, "write_width": 6, "read_bitslip": 2, "read_min": 8, "read_max": 19}
            ]}"#,
        )
        .unwrap();
        assert_eq!(phy.modules(), 1);
        assert_eq!(phy.description().lanes[0], SyntheticLane::new(4, 6, 2, 8, 19));
        assert!(!phy.description().stuck);
    }

    #[test]
    fn test_write_window_follows_cmd_delay() {
        let mut phy = SyntheticPhy::new(16, 1, vec![SyntheticLane::new(2, 3, 0, 0, 0)]);
        phy.wlevel_enable(true);
        for _ in 0..2 {
            phy.wdly_inc(0);
        }
        assert!(phy.wlevel_status(0));
        phy.cdly_inc();
        assert!(!phy.wlevel_status(0));
    }

    #[test]
    fn test_ready_latency() {
        let mut phy = SyntheticPhy::new(8, 1, vec![SyntheticLane::new(0, 1, 0, 0, 0)])
            .with_ready_latency(2);
        phy.rdly_inc(0);
        assert!(!phy.delay_ready());
        assert!(!phy.delay_ready());
        assert!(phy.delay_ready());
    }

    #[test]
    fn test_delay_wraps() {
        let mut phy = SyntheticPhy::new(4, 1, vec![SyntheticLane::new(0, 1, 0, 0, 0)]);
        for _ in 0..5 {
            phy.rdly_inc(0);
        }
        assert_eq!(phy.read_delay(0), 1);
    }
}
