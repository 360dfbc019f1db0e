//! Write leveling and the command delay search wrapped around it.

use super::phy::{set_cmd_delay, set_write_delay, wait_ready, LevelingPhy};
use super::{LevelingConfig, LevelingError, LevelingReport};

/// Write-leveling result of one lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteLane {
    /// Delay found by the scan
    Found(usize),
    /// Delay taken from the configuration without a scan
    Forced(usize),
    /// No window
    Failed,
}

impl WriteLane {
    /// The delay in use, if any.
    pub fn delay(self) -> Option<usize> {
        match self {
            WriteLane::Found(d) | WriteLane::Forced(d) => Some(d),
            WriteLane::Failed => None,
        }
    }
}

/// Finds the longest run of `true`; ties go to the earliest run.
///
/// # Returns
/// `(start, length)` of the run, or `None` if `row` has no `true`
pub fn longest_run(row: &[bool]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    let mut start = 0;
    let mut len = 0;
    for (i, &bit) in row.iter().enumerate() {
        if bit {
            if len == 0 {
                start = i;
            }
            len += 1;
            if best.map_or(true, |(_, l)| len > l) {
                best = Some((start, len));
            }
        } else {
            len = 0;
        }
    }
    best
}

/// Sweeps a lane's write delay and majority-votes the status at each tap.
///
/// Leaves the write delay at the end of the sweep.
pub fn scan_lane(
    phy: &mut dyn LevelingPhy,
    lane: usize,
    samples: u32,
    retries: u32,
) -> Result<Vec<bool>, LevelingError> {
    let delays = phy.delays();
    let mut row = Vec::with_capacity(delays);
    phy.wdly_rst(lane);
    for tap in 0..delays {
        let mut ones = 0u32;
        for _ in 0..samples {
            phy.wlevel_strobe();
            if phy.wlevel_status(lane) {
                ones += 1;
            }
        }
        row.push(ones * 2 > samples);
        if tap + 1 < delays {
            phy.wdly_inc(lane);
            wait_ready(phy, retries, "write delay", Some(lane))?;
        }
    }
    Ok(row)
}

/// Runs write leveling on every lane and applies the chosen delays.
///
/// Forced lanes are set to their configured delay and never scanned.
pub fn write_leveling(
    phy: &mut dyn LevelingPhy,
    config: &LevelingConfig,
    samples: u32,
    report: &mut LevelingReport,
) -> Result<Vec<WriteLane>, LevelingError> {
    phy.wlevel_enable(true);
    let result = scan_all(phy, config, samples, report);
    phy.wlevel_enable(false);
    result
}

fn scan_all(
    phy: &mut dyn LevelingPhy,
    config: &LevelingConfig,
    samples: u32,
    report: &mut LevelingReport,
) -> Result<Vec<WriteLane>, LevelingError> {
    let mut lanes = Vec::with_capacity(phy.modules());
    for lane in 0..phy.modules() {
        if let Some(&delay) = config.forced_write_delays.get(&lane) {
            set_write_delay(phy, lane, delay, config.ready_retries)?;
            report.line(format!("m{lane}: forced delay: {delay:02}"));
            lanes.push(WriteLane::Forced(delay));
            continue;
        }
        let row = scan_lane(phy, lane, samples, config.ready_retries)?;
        let found = longest_run(&row).map(|(start, _)| start);
        report.scan_row(lane, &row, found);
        match found {
            Some(delay) => {
                set_write_delay(phy, lane, delay, config.ready_retries)?;
                lanes.push(WriteLane::Found(delay));
            }
            None => {
                tracing::warn!(lane, "no write-leveling window");
                phy.wdly_rst(lane);
                lanes.push(WriteLane::Failed);
            }
        }
    }
    Ok(lanes)
}

/// Score of one command delay candidate; higher is better.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct CandidateScore {
    ok_lanes: usize,
    /// Negated distance of the mean window start from the ideal, in 1/256 taps.
    closeness: i64,
}

/// Coarse-to-fine search of the command delay.
///
/// Candidates are spaced `delays / 8` apart (every tap for short delay
/// lines), and the spacing shrinks by four around the best candidate until
/// it reaches one tap. Each candidate is scored by how many lanes find a
/// write window and then by how close their mean window start is to half
/// the tap range. The search stops early on a perfect score.
///
/// Leaves the command delay set to the winner and returns it. A PHY with
/// no lanes or no delay taps is rejected with [`LevelingError::Geometry`].
pub fn cmd_delay_search(
    phy: &mut dyn LevelingPhy,
    config: &LevelingConfig,
    report: &mut LevelingReport,
) -> Result<usize, LevelingError> {
    let delays = phy.delays();
    let modules = phy.modules();
    if delays == 0 || modules == 0 {
        return Err(LevelingError::Geometry(format!(
            "{modules} lanes, {delays} delays"
        )));
    }
    let ideal = (delays as i64 / 2) * 256;
    let mut step = if delays <= 32 { 1 } else { delays / 8 };
    let (mut lo, mut hi) = (0, delays - 1);
    let mut best: Option<(CandidateScore, usize)> = None;
    let mut quiet = LevelingReport::new();

    report.line("cmd delay search:");
    'search: loop {
        for cdly in (lo..=hi).step_by(step) {
            set_cmd_delay(phy, cdly, config.ready_retries)?;
            let lanes = write_leveling(phy, config, config.search_samples, &mut quiet)?;
            let starts: Vec<i64> = lanes
                .iter()
                .filter_map(|l| l.delay())
                .map(|d| d as i64)
                .collect();
            let score = match starts.len() {
                0 => CandidateScore {
                    ok_lanes: 0,
                    closeness: i64::MIN,
                },
                n => {
                    let mean = starts.iter().sum::<i64>() * 256 / n as i64;
                    CandidateScore {
                        ok_lanes: n,
                        closeness: -(mean - ideal).abs(),
                    }
                }
            };
            report.line(format!(
                "cdly {cdly:02}: {}/{modules} lanes, error {}",
                score.ok_lanes,
                score.closeness.checked_neg().map_or_else(|| "-".to_string(), |e| e.to_string())
            ));
            if best.map_or(true, |(b, _)| score > b) {
                best = Some((score, cdly));
            }
            if score.ok_lanes == modules && score.closeness == 0 {
                break 'search;
            }
        }
        let Some((_, center)) = best else { break };
        if step == 1 {
            break;
        }
        lo = center.saturating_sub(step);
        hi = (center + step).min(delays - 1);
        step = (step / 4).max(1);
    }

    let (score, cdly) = best.unwrap_or((
        CandidateScore {
            ok_lanes: 0,
            closeness: i64::MIN,
        },
        0,
    ));
    set_cmd_delay(phy, cdly, config.ready_retries)?;
    report.line(format!("best: cdly {cdly:02} ({}/{modules} lanes)", score.ok_lanes));
    tracing::info!(cdly, ok_lanes = score.ok_lanes, "command delay selected");
    Ok(cdly)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leveling::synthetic::{SyntheticLane, SyntheticPhy};

    #[test]
    fn test_longest_run() {
        assert_eq!(longest_run(&[false, true, true, false, true]), Some((1, 2)));
        assert_eq!(longest_run(&[true, false, true, true, true]), Some((2, 3)));
        assert_eq!(longest_run(&[true, true, false, true, true]), Some((0, 2)));
        assert_eq!(longest_run(&[false, false]), None);
        assert_eq!(longest_run(&[]), None);
    }

    #[test]
    fn test_scan_selects_window_start() {
        for (start, width) in [(0, 4), (5, 8), (20, 12)] {
            let mut phy = SyntheticPhy::new(32, 1, vec![SyntheticLane::new(start, width, 0, 0, 1)]);
            let config = LevelingConfig::default();
            for _ in 0..3 {
                let lanes =
                    write_leveling(&mut phy, &config, 16, &mut LevelingReport::new()).unwrap();
                assert_eq!(lanes, vec![WriteLane::Found(start)]);
                assert_eq!(phy.write_delay(0), start);
            }
        }
    }

    #[test]
    fn test_majority_vote_rejects_edge_jitter() {
        let mut phy =
            SyntheticPhy::new(32, 1, vec![SyntheticLane::new(10, 6, 0, 0, 1)]).with_edge_jitter();
        let mut report = LevelingReport::new();
        let lanes = write_leveling(&mut phy, &LevelingConfig::default(), 9, &mut report).unwrap();
        assert_eq!(lanes, vec![WriteLane::Found(10)]);
        assert_eq!(report.lines()[0], "m0: |00000000001111110000000000000000| delay: 10");
    }

    #[test]
    fn test_cmd_search_coarse_to_fine() {
        // 64 taps: coarse step 8, then 2, then 1.
        let mut phy = SyntheticPhy::new(64, 1, vec![SyntheticLane::new(5, 10, 0, 0, 1)]);
        let cdly =
            cmd_delay_search(&mut phy, &LevelingConfig::default(), &mut LevelingReport::new())
                .unwrap();
        assert_eq!(cdly, 27);
        assert_eq!(phy.cmd_delay(), 27);
    }

    #[test]
    fn test_cmd_search_rejects_empty_delay_line() {
        let mut phy = SyntheticPhy::new(0, 1, vec![SyntheticLane::new(0, 1, 0, 0, 0)]);
        let err = cmd_delay_search(&mut phy, &LevelingConfig::default(), &mut LevelingReport::new())
            .unwrap_err();
        assert!(matches!(err, LevelingError::Geometry(_)));

        let mut phy = SyntheticPhy::new(16, 1, Vec::new());
        let err = cmd_delay_search(&mut phy, &LevelingConfig::default(), &mut LevelingReport::new())
            .unwrap_err();
        assert!(matches!(err, LevelingError::Geometry(_)));
    }
}
