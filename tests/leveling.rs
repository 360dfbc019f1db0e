//! DRAM leveling against synthetic PHYs described in JSON.

use litesim::leveling::synthetic::{SyntheticLane, SyntheticPhy};
use litesim::leveling::{
    calibrate, CmdDelay, LevelingConfig, LevelingError, LevelingOutcome, LevelingReport,
};
use proptest::prelude::*;

const THREE_LANES: &str = r#"{
    "delays": 32,
    "bitslips": 8,
    "lanes": [
        {"write_start": 4, "write_width": 6, "read_bitslip": 2, "read_min": 8, "read_max": 19},
        {"write_start": 10, "write_width": 5, "read_bitslip": 5, "read_min": 0, "read_max": 13},
        {"write_start": 0, "write_width": 3, "read_bitslip": 7, "read_min": 20, "read_max": 31}
    ]
}"#;

fn skip_cmd_delay() -> LevelingConfig {
    serde_json::from_str(r#"{"cmd_delay": "skip"}"#).unwrap()
}

#[test]
fn test_three_lanes_from_json() {
    let mut phy = SyntheticPhy::from_json(THREE_LANES).unwrap();
    let mut report = LevelingReport::new();
    let result = calibrate(&mut phy, &skip_cmd_delay(), &mut report).unwrap();

    assert_eq!(result.outcome, LevelingOutcome::Success);
    assert_eq!(result.cmd_delay, None);
    let settings: Vec<_> = result
        .lanes
        .iter()
        .map(|l| (l.write_delay, l.bitslip, l.delay_tap, l.window_start, l.window_width))
        .collect();
    assert_eq!(
        settings,
        vec![(4, 2, 13, 8, 12), (10, 5, 6, 0, 14), (0, 7, 25, 20, 12)]
    );

    // The PHY is left programmed with the chosen settings.
    for lane in &result.lanes {
        assert_eq!(phy.write_delay(lane.lane), lane.write_delay);
        assert_eq!(phy.read_delay(lane.lane), lane.delay_tap);
        assert_eq!(phy.bitslip(lane.lane), lane.bitslip);
    }

    let text = report.to_string();
    assert!(text.contains("write leveling:"));
    assert!(text.contains("m1: |00000000001111100000000000000000| delay: 10"));
    assert!(text.contains("best: m2, b07, delays: 25 +-06"));
}

#[test]
fn test_forced_lane_from_json_config() {
    let mut phy = SyntheticPhy::new(
        32,
        4,
        vec![SyntheticLane::new(3, 5, 0, 2, 6), SyntheticLane::no_write_window(1, 10, 14)],
    );
    let config: LevelingConfig =
        serde_json::from_str(r#"{"cmd_delay": "skip", "forced_write_delays": {"1": 9}}"#).unwrap();
    assert_eq!(config.forced_write_delays.get(&1), Some(&9));
    assert_eq!(config.final_samples, 128);

    let result = calibrate(&mut phy, &config, &mut LevelingReport::new()).unwrap();
    assert_eq!(result.outcome, LevelingOutcome::PartialForced);
    assert!(result.is_usable());
    assert!(result.lanes[1].write_forced);
    assert_eq!(result.lanes[1].write_delay, 9);
    assert_eq!(result.lanes[1].delay_tap, 12);
}

#[test]
fn test_fixed_cmd_delay_shifts_windows() {
    let mut phy = SyntheticPhy::new(32, 2, vec![SyntheticLane::new(4, 6, 1, 3, 9)]);
    let config = LevelingConfig {
        cmd_delay: CmdDelay::Fixed(5),
        ..LevelingConfig::default()
    };
    let result = calibrate(&mut phy, &config, &mut LevelingReport::new()).unwrap();
    assert_eq!(result.cmd_delay, Some(5));
    assert_eq!(phy.cmd_delay(), 5);
    assert_eq!(result.lanes[0].write_delay, 9);
}

#[test]
fn test_cmd_delay_search_centers_windows() {
    let mut phy = SyntheticPhy::from_json(THREE_LANES).unwrap();
    let result = calibrate(&mut phy, &LevelingConfig::default(), &mut LevelingReport::new()).unwrap();
    assert_eq!(result.outcome, LevelingOutcome::Success);

    // Starts 4, 10 and 0 average to 14/3; an 11-tap shift brings the mean
    // to 15.67, the closest any shift gets to the ideal 16.
    assert_eq!(result.cmd_delay, Some(11));
    let starts: Vec<usize> = result.lanes.iter().map(|l| l.write_delay).collect();
    assert_eq!(starts, vec![15, 21, 11]);
}

#[test]
fn test_slow_delay_lines_still_calibrate() {
    let mut phy = SyntheticPhy::from_json(THREE_LANES).unwrap().with_ready_latency(5);
    let result = calibrate(&mut phy, &skip_cmd_delay(), &mut LevelingReport::new()).unwrap();
    assert_eq!(result.outcome, LevelingOutcome::Success);
}

#[test]
fn test_stuck_delay_line_times_out() {
    let mut phy = SyntheticPhy::from_json(THREE_LANES).unwrap().with_stuck_delay_line();
    let config = LevelingConfig {
        ready_retries: 10,
        ..skip_cmd_delay()
    };
    let err = calibrate(&mut phy, &config, &mut LevelingReport::new()).unwrap_err();
    assert!(matches!(err, LevelingError::Timeout { lane: Some(0), .. }));
}

#[test]
fn test_drifting_lane_fails_verification() {
    let mut phy = SyntheticPhy::new(16, 2, vec![SyntheticLane::new(2, 4, 1, 3, 10)])
        .with_failed_verifies(5);
    let result = calibrate(&mut phy, &skip_cmd_delay(), &mut LevelingReport::new()).unwrap();
    assert_eq!(result.outcome, LevelingOutcome::Failed);
    assert_eq!(result.failures, vec![LevelingError::Verification { lane: 0 }]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_single_lane_settings(
        write_start in 0usize..28,
        write_width in 1usize..5,
        bitslip in 0usize..4,
        read_min in 0usize..32,
        read_span in 0usize..32,
    ) {
        let read_max = (read_min + read_span).min(31);
        let mut phy = SyntheticPhy::new(
            32,
            4,
            vec![SyntheticLane::new(write_start, write_width, bitslip, read_min, read_max)],
        );
        let result = calibrate(&mut phy, &skip_cmd_delay(), &mut LevelingReport::new()).unwrap();
        prop_assert_eq!(result.outcome, LevelingOutcome::Success);
        prop_assert_eq!(result.lanes[0].write_delay, write_start);
        prop_assert_eq!(result.lanes[0].bitslip, bitslip);
        prop_assert_eq!(result.lanes[0].delay_tap, (read_min + read_max) / 2);
    }
}
