use std::fmt;

use crate::config::SimConfig;
use crate::error::{SimError, SimResult};
use crate::model::HardwareModel;
use crate::pads::{Pad, PadRegistry, Signal};

/// Address of one signal: `(interface, index, pad)`.
type SignalPath = (String, u32, String);

/// A behavioral hardware model made of pad lists and combinational wires.
///
/// Every evaluation copies each wire's source value onto its destination.
/// The model can be told to finish after a number of evaluations.
///
/// # Example
///
/// ```
/// use litesim::model::{HardwareModel, LoopbackModel};
/// use litesim::pads::PadRegistry;
///
/// let mut model = LoopbackModel::new()
///     .with_interface("gpio", 0, &[("o", 8), ("i", 8)])
///     .with_wire(("gpio", 0, "o"), ("gpio", 0, "i"));
/// let mut pads = PadRegistry::new();
/// model.register_pads(&mut pads).unwrap();
///
/// let o = model.signal("gpio", 0, "o").unwrap();
/// o.set(0x5a);
/// model.eval();
/// assert_eq!(model.signal("gpio", 0, "i").unwrap().get(), 0x5a);
/// ```
#[derive(Default)]
pub struct LoopbackModel {
    interfaces: Vec<(String, u32, Vec<Pad>)>,
    wire_paths: Vec<(SignalPath, SignalPath)>,
    wires: Vec<(Signal, Signal)>,
    finish_after: Option<u64>,
    evals: u64,
    flushes: u64,
}

impl LoopbackModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Exposes `sys_clk[0]` with a single 1-bit `sys_clk` pad.
    pub fn with_sys_clk(self) -> Self {
        self.with_interface("sys_clk", 0, &[("sys_clk", 1)])
    }

    /// Exposes a serial interface whose sink is looped back to its source.
    ///
    /// Bytes the host writes on `sink_*` come back on `source_*` after one
    /// evaluation, with `sink_ready` following `source_ready`.
    pub fn with_serial_loopback(self, index: u32) -> Self {
        self.with_interface(
            "serial",
            index,
            &[
                ("source_valid", 1),
                ("source_ready", 1),
                ("source_data", 8),
                ("sink_valid", 1),
                ("sink_ready", 1),
                ("sink_data", 8),
            ],
        )
        .with_wire(("serial", index, "sink_valid"), ("serial", index, "source_valid"))
        .with_wire(("serial", index, "sink_data"), ("serial", index, "source_data"))
        .with_wire(("serial", index, "source_ready"), ("serial", index, "sink_ready"))
    }

    /// Builds a model exposing every interface `config` references.
    ///
    /// Known interfaces get their conventional pads with the device side
    /// looped back: serial and Ethernet sinks echo to their sources, GPIO
    /// outputs drive the inputs. Any name ending in `clk` becomes a single
    /// one-bit clock pad. Each `(interface, index)` is declared once.
    ///
    /// # Returns
    /// `InvalidArgument` for an interface with no known pad layout
    pub fn for_config(config: &SimConfig) -> SimResult<Self> {
        let mut model = Self::new();
        let mut seen: Vec<(String, u32)> = Vec::new();
        for iface in config.modules.iter().flat_map(|m| m.interface.iter()) {
            let (name, index) = (iface.name(), iface.index());
            if seen.iter().any(|(n, i)| n == name && *i == index) {
                continue;
            }
            seen.push((name.to_string(), index));
            model = model.with_standard_interface(name, index)?;
        }
        Ok(model)
    }

    fn with_standard_interface(self, name: &str, index: u32) -> SimResult<Self> {
        let model = match name {
            "serial" => self.with_serial_loopback(index),
            "gpio" => self
                .with_interface(name, index, &[("oe", 32), ("o", 32), ("i", 32)])
                .with_wire((name, index, "o"), (name, index, "i")),
            "i2c" => self.with_interface(
                name,
                index,
                &[("scl", 1), ("sda_in", 1), ("sda_out", 1), ("sda_oe", 1)],
            ),
            "eth" => self
                .with_interface(
                    name,
                    index,
                    &[
                        ("source_valid", 1),
                        ("source_ready", 1),
                        ("source_data", 8),
                        ("sink_valid", 1),
                        ("sink_data", 8),
                    ],
                )
                .with_wire((name, index, "sink_valid"), (name, index, "source_valid"))
                .with_wire((name, index, "sink_data"), (name, index, "source_data")),
            "gmii_eth" => self
                .with_interface(
                    name,
                    index,
                    &[("tx_data", 8), ("tx_en", 1), ("tx_er", 1), ("rx_data", 8), ("rx_dv", 1), ("rx_er", 1)],
                )
                .with_wire((name, index, "rx_data"), (name, index, "tx_data"))
                .with_wire((name, index, "rx_dv"), (name, index, "tx_en")),
            "xgmii_eth" => self
                .with_interface(
                    name,
                    index,
                    &[("tx_data", 64), ("tx_ctl", 8), ("rx_data", 64), ("rx_ctl", 8)],
                )
                .with_wire((name, index, "rx_data"), (name, index, "tx_data"))
                .with_wire((name, index, "rx_ctl"), (name, index, "tx_ctl")),
            clk if clk.ends_with("clk") => self.with_interface(clk, index, &[(clk, 1)]),
            other => {
                return Err(SimError::InvalidArgument(format!(
                    "no loopback pad layout for interface {other}"
                )))
            }
        };
        Ok(model)
    }

    /// Declares a pad list.
    ///
    /// # Arguments
    /// * `interface` - Interface name
    /// * `index` - Interface index
    /// * `pads` - `(name, width)` pairs
    pub fn with_interface(mut self, interface: &str, index: u32, pads: &[(&str, u32)]) -> Self {
        let pads = pads.iter().map(|(name, width)| Pad::new(*name, *width)).collect();
        self.interfaces.push((interface.to_string(), index, pads));
        self
    }

    /// Copies `from` onto `to` on every evaluation.
    pub fn with_wire(mut self, from: (&str, u32, &str), to: (&str, u32, &str)) -> Self {
        let path = |(i, n, p): (&str, u32, &str)| (i.to_string(), n, p.to_string());
        self.wire_paths.push((path(from), path(to)));
        self
    }

    /// Signals completion after `evals` evaluations.
    pub fn finish_after(mut self, evals: u64) -> Self {
        self.finish_after = Some(evals);
        self
    }

    /// Returns a handle to a declared signal.
    pub fn signal(&self, interface: &str, index: u32, pad: &str) -> Option<Signal> {
        self.interfaces
            .iter()
            .find(|(i, n, _)| i == interface && *n == index)
            .and_then(|(_, _, pads)| pads.iter().find(|p| p.name == pad))
            .map(|p| p.signal.clone())
    }

    /// Number of evaluations so far.
    pub fn evals(&self) -> u64 {
        self.evals
    }

    /// Number of trace flushes so far.
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    fn resolve(&self, path: &SignalPath) -> SimResult<Signal> {
        let (interface, index, pad) = path;
        self.signal(interface, *index, pad)
            .ok_or_else(|| SimError::MissingPad {
                interface: interface.clone(),
                index: *index,
                signal: pad.clone(),
            })
    }
}

impl HardwareModel for LoopbackModel {
    fn register_pads(&mut self, registry: &mut PadRegistry) -> SimResult<()> {
        let mut wires = Vec::with_capacity(self.wire_paths.len());
        for (from, to) in &self.wire_paths {
            wires.push((self.resolve(from)?, self.resolve(to)?));
        }
        self.wires = wires;

        for (interface, index, pads) in &self.interfaces {
            registry.register(pads.clone(), interface, *index)?;
        }
        Ok(())
    }

    fn eval(&mut self) {
        for (from, to) in &self.wires {
            to.set(from.get());
        }
        self.evals += 1;
    }

    fn finished(&self) -> bool {
        self.finish_after.is_some_and(|n| self.evals >= n)
    }

    fn flush_trace(&mut self) {
        self.flushes += 1;
    }
}

impl fmt::Debug for LoopbackModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .interfaces
            .iter()
            .map(|(i, n, _)| format!("{i}[{n}]"))
            .collect();
        f.debug_struct("LoopbackModel")
            .field("interfaces", &names)
            .field("wires", &self.wire_paths.len())
            .field("evals", &self.evals)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_loopback_wires() {
        let mut model = LoopbackModel::new().with_sys_clk().with_serial_loopback(0);
        let mut pads = PadRegistry::new();
        model.register_pads(&mut pads).unwrap();
        assert_eq!(pads.len(), 2);

        model.signal("serial", 0, "sink_valid").unwrap().set_bool(true);
        model.signal("serial", 0, "sink_data").unwrap().set(b'A' as u64);
        model.eval();
        assert!(model.signal("serial", 0, "source_valid").unwrap().is_high());
        assert_eq!(model.signal("serial", 0, "source_data").unwrap().get(), b'A' as u64);
    }

    #[test]
    fn test_registered_pads_alias_model_signals() {
        let mut model = LoopbackModel::new().with_sys_clk();
        let mut pads = PadRegistry::new();
        model.register_pads(&mut pads).unwrap();

        let from_registry = pads.find("sys_clk", 0).unwrap().require("sys_clk").unwrap();
        assert!(from_registry.same_as(&model.signal("sys_clk", 0, "sys_clk").unwrap()));
    }

    #[test]
    fn test_unknown_wire_fails() {
        let mut model = LoopbackModel::new()
            .with_sys_clk()
            .with_wire(("sys_clk", 0, "sys_clk"), ("nope", 0, "x"));
        let mut pads = PadRegistry::new();
        assert!(matches!(
            model.register_pads(&mut pads),
            Err(SimError::MissingPad { .. })
        ));
    }

    #[test]
    fn test_for_config_declares_each_interface_once() {
        let config = SimConfig::from_json(
            r#"[{"timebase": 1},
                {"module": "clocker", "interface": ["sys_clk"]},
                {"module": "serial2tcp", "interface": ["serial", "sys_clk"]},
                {"module": "gpio", "interface": ["gpio"]}]"#,
        )
        .unwrap();
        let mut model = LoopbackModel::for_config(&config).unwrap();
        let mut pads = PadRegistry::new();
        model.register_pads(&mut pads).unwrap();
        assert_eq!(pads.len(), 3);

        model.signal("gpio", 0, "o").unwrap().set(0x33);
        model.eval();
        assert_eq!(model.signal("gpio", 0, "i").unwrap().get(), 0x33);
    }

    #[test]
    fn test_for_config_rejects_unknown_interface() {
        let config = SimConfig::from_json(
            r#"[{"timebase": 1}, {"module": "gpio", "interface": ["sdcard"]}]"#,
        )
        .unwrap();
        assert!(matches!(
            LoopbackModel::for_config(&config),
            Err(SimError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_finish_after() {
        let mut model = LoopbackModel::new().finish_after(2);
        assert!(!model.finished());
        model.eval();
        model.eval();
        assert!(model.finished());
    }
}
