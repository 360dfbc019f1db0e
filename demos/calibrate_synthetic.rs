//! DRAM calibration example.
//!
//! Runs the full leveling sequence (command delay search, write leveling,
//! read leveling) against a four-lane synthetic PHY with noisy write
//! leveling feedback and slow delay lines, then prints the progress log and
//! the chosen per-lane settings.

use litesim::leveling::synthetic::{SyntheticLane, SyntheticPhy};
use litesim::leveling::{calibrate, LevelingConfig, LevelingReport};

fn main() {
    litesim::init_logging("warn");

    let lanes = vec![
        SyntheticLane::new(3, 7, 1, 6, 18),
        SyntheticLane::new(5, 6, 2, 9, 22),
        SyntheticLane::new(2, 8, 1, 4, 15),
        SyntheticLane::new(6, 5, 3, 12, 27),
    ];
    let mut phy = SyntheticPhy::new(32, 8, lanes)
        .with_edge_jitter()
        .with_ready_latency(2);

    let mut report = LevelingReport::new();
    let result = calibrate(&mut phy, &LevelingConfig::default(), &mut report);
    print!("{report}");

    match result {
        Ok(result) => {
            println!();
            if let Some(cdly) = result.cmd_delay {
                println!("command delay: {cdly}");
            }
            for lane in &result.lanes {
                println!(
                    "m{}: write delay {:02}, read delay {:02} (window {:02}..{:02}), bitslip {}",
                    lane.lane,
                    lane.write_delay,
                    lane.delay_tap,
                    lane.window_start,
                    lane.window_start + lane.window_width.saturating_sub(1),
                    lane.bitslip
                );
            }
            println!("outcome: {:?}", result.outcome);
        }
        Err(e) => {
            eprintln!("calibration aborted: {e}");
            std::process::exit(1);
        }
    }
}
