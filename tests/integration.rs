//! End-to-end tests of the simulation host.
//!
//! These tests verify complete runs driven from configuration text:
//! - Clock generation against the picosecond timeline
//! - Configuration files in both formats
//! - Registry loading rules
//! - Statistics after a run

use std::io::Write;

use litesim::{
    EventLoop, HostOptions, LoopExit, LoopbackModel, Message, ModuleLoader, ModuleRegistry,
    SessionId, SimConfig, SimError, Simulation,
};
use proptest::prelude::*;

// ============================================================================
// Helpers
// ============================================================================

fn start(json: &str, options: HostOptions) -> Simulation {
    let config = SimConfig::from_json(json).unwrap();
    let registry = ModuleRegistry::with_builtin_modules().unwrap();
    let model = LoopbackModel::for_config(&config).unwrap();
    Simulation::from_config(&config, &registry, Box::new(model), options).unwrap()
}

// ============================================================================
// Clocker scenario
// ============================================================================

#[test]
fn test_clocker_scenario() {
    let mut sim = start(
        r#"[{"timebase": 125}, {"module": "clocker", "interface": ["sys_clk"]}]"#,
        HostOptions::default(),
    );
    assert_eq!(sim.session_count(), 1);
    assert_eq!(sim.sessions()[0].module, "clocker");

    assert_eq!(sim.run_ticks(8).unwrap(), 8);
    assert_eq!(sim.time_ps(), 1000);

    // 200 MHz has a 5000 ps period: the first 1000 ps are the high half, so
    // the pad went high once and stayed there.
    let status = sim.send(SessionId(0), &Message::get()).unwrap();
    assert_eq!(status["period_ps"], 5000);
    assert_eq!(status["ticks"], 8);
    assert_eq!(status["edges"], 1);
    assert_eq!(status["level"], true);
}

#[test]
fn test_clocker_full_periods() {
    let mut sim = start(
        r#"[{"timebase": 125},
            {"module": "clocker", "interface": ["sys_clk"], "args": {"freq_hz": 100000000}}]"#,
        HostOptions::default(),
    );
    // 10000 ps period, 80 ticks per period: 4 periods give 8 level changes.
    sim.run_ticks(320).unwrap();
    let status = sim.send(SessionId(0), &Message::get()).unwrap();
    assert_eq!(status["edges"], 8);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_time_is_ticks_times_timebase(timebase in 1u64..100_000, ticks in 0u64..500) {
        let json = format!(
            r#"[{{"timebase": {timebase}}}, {{"module": "clocker", "interface": ["sys_clk"], "args": {{"freq_hz": 1000}}}}]"#
        );
        let mut sim = start(&json, HostOptions::default());
        prop_assert_eq!(sim.run_ticks(ticks).unwrap(), ticks);
        prop_assert_eq!(sim.time_ps(), ticks * timebase);
    }
}

// ============================================================================
// Configuration files
// ============================================================================

#[test]
fn test_yaml_config_file() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        file,
        "- timebase: 500\n- module: clocker\n  interface: [sys_clk]\n- module: gpio\n  interface: [gpio]\n  tickfirst: true"
    )
    .unwrap();

    let config = SimConfig::from_file(file.path()).unwrap();
    assert_eq!(config.timebase, 500);
    assert_eq!(config.module_count(), 2);
    assert!(config.modules[1].tickfirst);

    let registry = ModuleRegistry::with_builtin_modules().unwrap();
    let model = LoopbackModel::for_config(&config).unwrap();
    let mut sim =
        Simulation::from_config(&config, &registry, Box::new(model), HostOptions::default())
            .unwrap();
    sim.run_ticks(4).unwrap();
    assert_eq!(sim.time_ps(), 2000);
}

#[test]
fn test_json_config_file() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(file, r#"[{{"timebase": 10}}, {{"module": "clocker", "interface": ["sys_clk"]}}]"#)
        .unwrap();
    let config = SimConfig::from_file(file.path()).unwrap();
    assert_eq!(config.timebase, 10);
}

#[test]
fn test_unknown_module_fails_startup() {
    let config = SimConfig::from_json(
        r#"[{"timebase": 1}, {"module": "sdcard", "interface": ["sys_clk"]}]"#,
    )
    .unwrap();
    let registry = ModuleRegistry::with_builtin_modules().unwrap();
    let model = LoopbackModel::for_config(&config).unwrap();
    let err = Simulation::from_config(&config, &registry, Box::new(model), HostOptions::default())
        .unwrap_err();
    assert!(matches!(err, SimError::UnknownModule(name) if name == "sdcard"));
}

// ============================================================================
// Registry
// ============================================================================

#[test]
fn test_loading_twice_is_rejected() {
    let mut registry = ModuleRegistry::new();
    let loader = ModuleLoader::builtin();
    assert_eq!(loader.load_all(&mut registry).unwrap(), loader.provider_count());
    let names: Vec<String> = registry.names().iter().map(|n| n.to_string()).collect();

    assert!(matches!(loader.load_all(&mut registry), Err(SimError::AlreadyLoaded)));
    let after: Vec<String> = registry.names().iter().map(|n| n.to_string()).collect();
    assert_eq!(names, after);
}

// ============================================================================
// Event loop and statistics
// ============================================================================

#[test]
fn test_event_loop_run_and_stats() {
    let options = HostOptions {
        batch_size: 64,
        max_ticks: Some(1000),
        ..Default::default()
    };
    let mut sim = start(
        r#"[{"timebase": 2500},
            {"module": "clocker", "interface": ["sys_clk"]},
            {"module": "gpio", "interface": ["gpio"], "tickfirst": true}]"#,
        options.clone(),
    );

    let exit = EventLoop::from_options(&options).run_simulation(&mut sim).unwrap();
    assert_eq!(exit, LoopExit::TickLimit);
    sim.close();

    let stats = sim.stats();
    assert_eq!(stats.scheduler.ticks_executed, 1000);
    assert_eq!(stats.scheduler.final_time_ps, 2_500_000);
    assert_eq!(stats.scheduler.model_evals, 1000);
    assert_eq!(stats.sessions.len(), 2);
    assert!(stats.sessions.iter().all(|s| s.ticks == 1000 && !s.faulted));
    assert!(stats.to_json().unwrap().contains("\"ticks_executed\": 1000"));
    assert!(!stats.summary().is_empty());
}
