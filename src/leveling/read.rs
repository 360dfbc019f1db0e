//! Read leveling: bitslip selection, read-delay centering and verification.

use super::pattern::{bit_errors, test_pattern};
use super::phy::{set_bitslip, set_read_delay, wait_ready, LevelingPhy};
use super::write::longest_run;
use super::{LevelingConfig, LevelingError, LevelingReport};

/// Read-leveling result of one lane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadLane {
    /// Chosen bitslip
    pub bitslip: usize,
    /// Centered read delay
    pub delay_tap: usize,
    /// First tap of the window
    pub window_start: usize,
    /// Window width in taps
    pub window_width: usize,
}

/// Outcome of sweeping the read delay at one bitslip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitslipScan {
    /// Bitslip scanned
    pub bitslip: usize,
    /// Taps at which the pattern read back intact
    pub row: Vec<bool>,
    /// Bit errors summed over all taps
    pub errors: u64,
}

impl BitslipScan {
    /// Number of taps that read back intact.
    pub fn working(&self) -> usize {
        self.row.iter().filter(|ok| **ok).count()
    }

    /// Ranks the scan: working taps first, then fewer errors.
    pub fn score(&self, max_errors: u64) -> u64 {
        let delays = self.row.len() as u64;
        (self.working() as u64)
            .saturating_mul(max_errors)
            .saturating_mul(delays)
            .saturating_add(max_errors - self.errors.min(max_errors))
    }
}

/// Sweeps the read delay of `lane` at the current bitslip.
pub fn scan_bitslip(
    phy: &mut dyn LevelingPhy,
    lane: usize,
    bitslip: usize,
    expected: &[u8],
    config: &LevelingConfig,
) -> Result<BitslipScan, LevelingError> {
    let delays = phy.delays();
    let mut row = Vec::with_capacity(delays);
    let mut errors = 0;
    phy.rdly_rst(lane);
    for tap in 0..delays {
        let got = phy.read_pattern(config.test_row, lane, expected.len());
        let e = bit_errors(expected, &got);
        errors += e;
        row.push(e == 0);
        if tap + 1 < delays {
            phy.rdly_inc(lane);
            wait_ready(phy, config.ready_retries, "read delay", Some(lane))?;
        }
    }
    Ok(BitslipScan {
        bitslip,
        row,
        errors,
    })
}

/// Levels one lane's read path.
///
/// Writes the lane's test pattern, scans every bitslip, keeps the best
/// one, centers the read delay in its longest window and verifies the
/// setting up to `verify_retries` times.
pub fn level_lane(
    phy: &mut dyn LevelingPhy,
    lane: usize,
    config: &LevelingConfig,
    report: &mut LevelingReport,
) -> Result<ReadLane, LevelingError> {
    let expected = test_pattern(config.test_row, lane, config.pattern_len);
    phy.write_pattern(config.test_row, lane, &expected);

    let delays = phy.delays();
    let max_errors = (expected.len() as u64)
        .saturating_mul(8)
        .saturating_mul(delays as u64);
    let mut best: Option<(u64, BitslipScan)> = None;
    for bitslip in 0..phy.bitslips() {
        set_bitslip(phy, lane, bitslip);
        let scan = scan_bitslip(phy, lane, bitslip, &expected, config)?;
        let score = scan.score(max_errors);
        report.line(format!(
            "m{lane}, b{bitslip:02}: |{}|",
            scan.row.iter().map(|b| if *b { '1' } else { '0' }).collect::<String>()
        ));
        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((score, scan));
        }
    }

    let Some((_, scan)) = best.filter(|(_, s)| s.working() > 0) else {
        report.line(format!("m{lane}: no read window"));
        phy.rdly_rst(lane);
        phy.bitslip_rst(lane);
        return Err(LevelingError::NoWindow {
            lane,
            stage: "read",
        });
    };
    let Some((window_start, window_width)) = longest_run(&scan.row) else {
        return Err(LevelingError::NoWindow {
            lane,
            stage: "read",
        });
    };
    let window_end = window_start + window_width - 1;
    let delay_tap = (window_start + window_end) / 2;
    report.line(format!(
        "best: m{lane}, b{:02}, delays: {delay_tap:02} +-{:02}",
        scan.bitslip,
        window_width / 2
    ));

    for attempt in 1..=config.verify_retries.max(1) {
        set_bitslip(phy, lane, scan.bitslip);
        set_read_delay(phy, lane, delay_tap, config.ready_retries)?;
        let got = phy.read_pattern(config.test_row, lane, expected.len());
        if got == expected {
            tracing::debug!(lane, attempt, "read leveling verified");
            return Ok(ReadLane {
                bitslip: scan.bitslip,
                delay_tap,
                window_start,
                window_width,
            });
        }
        tracing::warn!(lane, attempt, "read leveling verification failed");
    }
    report.line(format!("m{lane}: verification failed"));
    Err(LevelingError::Verification { lane })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leveling::synthetic::{SyntheticLane, SyntheticPhy};

    #[test]
    fn test_center_is_window_midpoint() {
        for (min, max) in [(0, 0), (3, 10), (4, 9), (20, 31)] {
            let mut phy = SyntheticPhy::new(32, 4, vec![SyntheticLane::new(0, 4, 2, min, max)]);
            let lane = level_lane(&mut phy, 0, &LevelingConfig::default(), &mut LevelingReport::new())
                .unwrap();
            assert_eq!(lane.delay_tap, (min + max) / 2);
            assert_eq!(lane.bitslip, 2);
            assert_eq!(lane.window_start, min);
            assert_eq!(lane.window_width, max - min + 1);
            assert_eq!(phy.read_delay(0), (min + max) / 2);
            // Full scan plus a single verification read.
            assert_eq!(phy.pattern_reads(0), 4 * 32 + 1);
        }
    }

    #[test]
    fn test_no_window() {
        let mut phy = SyntheticPhy::new(16, 2, vec![SyntheticLane::new(0, 4, 5, 3, 6)]);
        let err = level_lane(&mut phy, 0, &LevelingConfig::default(), &mut LevelingReport::new())
            .unwrap_err();
        assert_eq!(err, LevelingError::NoWindow { lane: 0, stage: "read" });
    }

    #[test]
    fn test_flaky_verification_retries() {
        let mut phy =
            SyntheticPhy::new(16, 1, vec![SyntheticLane::new(0, 4, 0, 2, 8)]).with_failed_verifies(2);
        let lane = level_lane(&mut phy, 0, &LevelingConfig::default(), &mut LevelingReport::new())
            .unwrap();
        assert_eq!(lane.delay_tap, 5);

        let mut phy =
            SyntheticPhy::new(16, 1, vec![SyntheticLane::new(0, 4, 0, 2, 8)]).with_failed_verifies(3);
        let err = level_lane(&mut phy, 0, &LevelingConfig::default(), &mut LevelingReport::new())
            .unwrap_err();
        assert_eq!(err, LevelingError::Verification { lane: 0 });
    }

    #[test]
    fn test_score_prefers_working_taps() {
        let a = BitslipScan {
            bitslip: 0,
            row: vec![true, false, false, false],
            errors: 900,
        };
        let b = BitslipScan {
            bitslip: 1,
            row: vec![false; 4],
            errors: 0,
        };
        assert!(a.score(1000) > b.score(1000));
    }

    #[test]
    fn test_score_saturates_on_huge_geometry() {
        let wide = BitslipScan {
            bitslip: 0,
            row: vec![true; 64],
            errors: 0,
        };
        let narrow = BitslipScan {
            bitslip: 1,
            row: vec![true; 8],
            errors: 0,
        };
        let max_errors = u64::MAX / 4;
        assert_eq!(wide.score(max_errors), u64::MAX);
        assert!(wide.score(max_errors) >= narrow.score(max_errors));
        assert_eq!(narrow.score(1000), 8 * 1000 * 8 + 1000);
    }
}
