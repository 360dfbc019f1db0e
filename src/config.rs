//! Configuration system for the simulation host.
//!
//! A simulation is described by a JSON (or YAML) array. Exactly one entry
//! declares the global timebase; every other entry instantiates a module.
//!
//! # Configuration File Structure
//!
//! ```json
//! [
//!   { "timebase": 125 },
//!   { "module": "clocker", "interface": ["sys_clk"], "args": { "freq_hz": 200000000 } },
//!   { "module": "serial2tcp", "interface": ["serial", { "name": "sys_clk", "index": 0 }],
//!     "args": { "port": 1111 } },
//!   { "module": "spdeeprom", "interface": ["i2c"], "tickfirst": true }
//! ]
//! ```
//!
//! `args` is kept as an opaque JSON object; it is re-serialized and handed to
//! the module, which parses the keys it cares about itself.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::scheduler::TickErrorPolicy;
use crate::types::SimTime;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Reference to one pad list exposed by the hardware model.
///
/// Either a bare interface name (index 0) or an explicit `{name, index}` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InterfaceRef {
    /// Bare interface name, index 0.
    Name(String),
    /// Interface name with an explicit index.
    Indexed {
        /// Interface name
        name: String,
        /// Interface index
        #[serde(default)]
        index: u32,
    },
}

impl InterfaceRef {
    /// Returns the interface name.
    pub fn name(&self) -> &str {
        match self {
            InterfaceRef::Name(name) => name,
            InterfaceRef::Indexed { name, .. } => name,
        }
    }

    /// Returns the interface index.
    pub fn index(&self) -> u32 {
        match self {
            InterfaceRef::Name(_) => 0,
            InterfaceRef::Indexed { index, .. } => *index,
        }
    }
}

impl From<&str> for InterfaceRef {
    fn from(name: &str) -> Self {
        InterfaceRef::Name(name.to_string())
    }
}

/// Configuration of a single module instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Name of the module to instantiate
    pub module: String,

    /// Pad lists handed to the session, in order
    #[serde(default)]
    pub interface: Vec<InterfaceRef>,

    /// Opaque module arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,

    /// Run this session before the hardware model is evaluated
    #[serde(default)]
    pub tickfirst: bool,
}

impl ModuleConfig {
    /// Creates a module entry with no interfaces.
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            interface: Vec::new(),
            args: None,
            tickfirst: false,
        }
    }

    /// Adds an interface reference.
    pub fn with_interface(mut self, iface: impl Into<InterfaceRef>) -> Self {
        self.interface.push(iface.into());
        self
    }

    /// Sets the module arguments.
    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = Some(args);
        self
    }

    /// Marks the module as tick-first.
    pub fn tick_first(mut self) -> Self {
        self.tickfirst = true;
        self
    }

    /// Returns the arguments as the string handed to `new_session`.
    ///
    /// An absent `args` becomes the empty string.
    pub fn args_string(&self) -> String {
        self.args
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default()
    }
}

/// One raw element of the configuration array.
///
/// An element is either a timebase declaration or a module instance; one
/// carrying both `timebase` and `module` is rejected.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigEntry {
    /// `{"timebase": N}`
    Timebase {
        /// Picoseconds per tick
        timebase: SimTime,
    },
    /// `{"module": ...}`
    Module(ModuleConfig),
}

impl<'de> Deserialize<'de> for ConfigEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct TimebaseEntry {
            timebase: SimTime,
        }

        let raw = serde_json::Value::deserialize(deserializer)?;
        let has_timebase = raw.get("timebase").is_some();
        let has_module = raw.get("module").is_some();
        match (has_timebase, has_module) {
            (true, true) => Err(D::Error::custom(
                "entry declares both `timebase` and `module`",
            )),
            (true, false) => TimebaseEntry::deserialize(raw)
                .map(|e| ConfigEntry::Timebase {
                    timebase: e.timebase,
                })
                .map_err(D::Error::custom),
            (false, true) => ModuleConfig::deserialize(raw)
                .map(ConfigEntry::Module)
                .map_err(D::Error::custom),
            (false, false) => Err(D::Error::custom(
                "entry needs either `timebase` or `module`",
            )),
        }
    }
}

/// Complete, validated simulation configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct SimConfig {
    /// Picoseconds per tick, never zero
    pub timebase: SimTime,

    /// Module instances in declaration order
    pub modules: Vec<ModuleConfig>,
}

impl SimConfig {
    /// Builds a configuration from raw entries, validating the timebase rules.
    pub fn from_entries(entries: Vec<ConfigEntry>) -> ConfigResult<Self> {
        let mut timebase = None;
        let mut modules = Vec::new();

        for entry in entries {
            match entry {
                ConfigEntry::Timebase { timebase: tb } => {
                    if timebase.is_some() {
                        return Err(ConfigError::Validation(
                            "timebase declared more than once".to_string(),
                        ));
                    }
                    if tb == 0 {
                        return Err(ConfigError::Validation(
                            "timebase must be non-zero".to_string(),
                        ));
                    }
                    timebase = Some(tb);
                }
                ConfigEntry::Module(module) => {
                    if module.module.is_empty() {
                        return Err(ConfigError::Validation(
                            "module entry with empty name".to_string(),
                        ));
                    }
                    if let Some(args) = &module.args {
                        if !args.is_object() {
                            return Err(ConfigError::Validation(format!(
                                "args of module {} must be a JSON object",
                                module.module
                            )));
                        }
                    }
                    modules.push(module);
                }
            }
        }

        let timebase = timebase
            .ok_or_else(|| ConfigError::Validation("no timebase declared".to_string()))?;

        if modules.is_empty() {
            tracing::warn!("configuration instantiates no modules");
        }

        Ok(Self { timebase, modules })
    }

    /// Converts back into raw entries (timebase first).
    pub fn to_entries(&self) -> Vec<ConfigEntry> {
        let mut entries = Vec::with_capacity(self.modules.len() + 1);
        entries.push(ConfigEntry::Timebase {
            timebase: self.timebase,
        });
        entries.extend(self.modules.iter().cloned().map(ConfigEntry::Module));
        entries
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let entries: Vec<ConfigEntry> = serde_json::from_str(json)?;
        Self::from_entries(entries)
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let entries: Vec<ConfigEntry> = serde_yaml::from_str(yaml)?;
        Self::from_entries(entries)
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext.to_lowercase().as_str() {
            "json" => Self::from_json_file(path),
            "yaml" | "yml" => Self::from_yaml_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    /// Converts to a JSON string.
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(&self.to_entries())?)
    }

    /// Returns the number of module instances.
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }
}

/// Builder for creating a [`SimConfig`] programmatically.
#[derive(Debug, Default)]
pub struct SimConfigBuilder {
    entries: Vec<ConfigEntry>,
}

impl SimConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the timebase.
    pub fn timebase(mut self, timebase: SimTime) -> Self {
        self.entries.push(ConfigEntry::Timebase { timebase });
        self
    }

    /// Adds a module instance.
    pub fn module(mut self, module: ModuleConfig) -> Self {
        self.entries.push(ConfigEntry::Module(module));
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<SimConfig> {
        SimConfig::from_entries(self.entries)
    }
}

/// Host-side knobs that are not part of the configuration file.
#[derive(Clone, Debug)]
pub struct HostOptions {
    /// Maximum simulated ticks per scheduler callback
    pub batch_size: u32,

    /// Wall-clock pause between scheduler callbacks
    pub cadence: Duration,

    /// What to do when a session's tick fails
    pub tick_error_policy: TickErrorPolicy,

    /// Stop the event loop after this many ticks
    pub max_ticks: Option<u64>,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            cadence: Duration::ZERO,
            tick_error_policy: TickErrorPolicy::Isolate,
            max_ticks: None,
        }
    }
}
