//! LiteSim command-line host.
//!
//! Two subcommands:
//! 1. **run:** load a configuration, build a loopback hardware model exposing
//!    every interface it references, and drive the scheduler from the event loop.
//! 2. **calibrate:** run DRAM leveling against a synthetic PHY described in JSON
//!    and print the progress log and the chosen settings.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use litesim::leveling::synthetic::SyntheticPhy;
use litesim::leveling::{calibrate, LevelingConfig, LevelingReport};
use litesim::{
    EventLoop, HostOptions, LoopbackModel, ModuleRegistry, SimConfig, SimError, SimResult,
    Simulation, TickErrorPolicy,
};

#[derive(Parser, Debug)]
#[command(
    name = "litesim",
    author,
    version,
    about = "Co-simulation host for LiteX-style SoCs",
    long_about = "Run a simulation configuration or calibrate a synthetic DRAM PHY.\n\nExamples:\n  litesim run --config sim.json --max-ticks 1000000\n  litesim calibrate --phy phy.json"
)]
struct Cli {
    /// Log level used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a simulation configuration (JSON or YAML).
    Run {
        /// Configuration file.
        #[arg(short, long)]
        config: PathBuf,

        /// Maximum ticks per scheduler callback.
        #[arg(long, default_value_t = 1000)]
        batch: u32,

        /// Wall-clock pause between scheduler callbacks, in microseconds.
        #[arg(long, default_value_t = 0)]
        cadence_us: u64,

        /// Stop after this many ticks.
        #[arg(long)]
        max_ticks: Option<u64>,

        /// Stop the run when a session fails instead of isolating it.
        #[arg(long)]
        abort_on_tick_error: bool,

        /// Write run statistics as JSON to this file.
        #[arg(long)]
        stats: Option<PathBuf>,
    },

    /// Calibrate a synthetic DRAM PHY.
    Calibrate {
        /// PHY description (JSON).
        #[arg(long)]
        phy: PathBuf,

        /// Leveling configuration (JSON); defaults apply if omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    litesim::init_logging(&cli.log_level);

    let code = match cli.command {
        Commands::Run {
            config,
            batch,
            cadence_us,
            max_ticks,
            abort_on_tick_error,
            stats,
        } => {
            let options = HostOptions {
                batch_size: batch,
                cadence: Duration::from_micros(cadence_us),
                tick_error_policy: if abort_on_tick_error {
                    TickErrorPolicy::Abort
                } else {
                    TickErrorPolicy::Isolate
                },
                max_ticks,
            };
            match cmd_run(&config, options, stats) {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("Error: {e}");
                    1
                }
            }
        }
        Commands::Calibrate { phy, config } => match cmd_calibrate(&phy, config) {
            Ok(true) => 0,
            Ok(false) => 1,
            Err(e) => {
                eprintln!("Error: {e}");
                1
            }
        },
    };
    process::exit(code);
}

/// Loads the configuration and runs it until the model finishes or the tick
/// limit is reached.
fn cmd_run(path: &Path, options: HostOptions, stats_path: Option<PathBuf>) -> SimResult<()> {
    let config = SimConfig::from_file(path)?;
    let registry = ModuleRegistry::with_builtin_modules()?;
    let model = LoopbackModel::for_config(&config)?;

    let mut sim = Simulation::from_config(&config, &registry, Box::new(model), options)?;
    let mut event_loop = EventLoop::from_options(sim.options());
    let exit = event_loop.run_simulation(&mut sim)?;
    sim.close();

    let stats = sim.stats().with_name(path.display().to_string());
    println!("[*] Exit: {exit:?}");
    print!("{}", stats.summary());
    if let Some(out) = stats_path {
        stats.to_json_file(&out)?;
        println!("[*] Statistics written to {}", out.display());
    }
    Ok(())
}

/// Runs calibration; returns whether the result is usable.
fn cmd_calibrate(phy_path: &Path, config_path: Option<PathBuf>) -> SimResult<bool> {
    let mut phy = SyntheticPhy::from_json(&std::fs::read_to_string(phy_path)?)?;
    let config = match config_path {
        Some(p) => serde_json::from_str::<LevelingConfig>(&std::fs::read_to_string(p)?)?,
        None => LevelingConfig::default(),
    };

    let mut report = LevelingReport::new();
    let result = calibrate(&mut phy, &config, &mut report);
    print!("{report}");
    let result = result.map_err(|e| SimError::Generic(format!("calibration aborted: {e}")))?;

    for lane in &result.lanes {
        println!(
            "m{}: write {:02}{} read {:02} bitslip {} window {:02}+{:02}",
            lane.lane,
            lane.write_delay,
            if lane.write_forced { " (forced)" } else { "" },
            lane.delay_tap,
            lane.bitslip,
            lane.window_start,
            lane.window_width
        );
    }
    for failure in &result.failures {
        println!("[!] {failure}");
    }
    println!("[*] Outcome: {:?}", result.outcome);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.is_usable())
}
