//! Error types shared across the simulation host.
//!
//! Every fallible operation returns [`SimResult`]. The variants collapse onto
//! the five documented status codes through [`SimError::status`], which is
//! what the command line reports as its exit diagnostic.

use thiserror::Error;

use crate::config::ConfigError;
use crate::types::SessionId;

/// Coarse status codes used uniformly by the scheduler and the leveling engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Operation succeeded.
    Ok,
    /// Generic failure.
    Error,
    /// A caller supplied an invalid argument.
    InvalidArgument,
    /// An allocation or capacity limit was hit.
    OutOfMemory,
    /// Input could not be parsed.
    ParseError,
}

/// Errors raised by the simulation host.
#[derive(Error, Debug)]
pub enum SimError {
    #[error("{0}")]
    Generic(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("modules have already been loaded into this registry")]
    AlreadyLoaded,

    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("module registered twice: {0}")]
    DuplicateModule(String),

    #[error("pad list {interface}[{index}] has no signal named {signal}")]
    MissingPad {
        interface: String,
        index: u32,
        signal: String,
    },

    #[error("session {session} ({module}) failed: {source}")]
    Module {
        session: SessionId,
        module: String,
        #[source]
        source: Box<SimError>,
    },
}

/// Result type for simulation host operations.
pub type SimResult<T> = Result<T, SimError>;

impl SimError {
    /// Maps the error onto its documented status code.
    pub fn status(&self) -> Status {
        match self {
            SimError::InvalidArgument(_)
            | SimError::UnknownModule(_)
            | SimError::MissingPad { .. } => Status::InvalidArgument,
            SimError::OutOfMemory => Status::OutOfMemory,
            SimError::Parse(_) | SimError::Json(_) => Status::ParseError,
            SimError::Config(e) => match e {
                ConfigError::Json(_) | ConfigError::Yaml(_) => Status::ParseError,
                _ => Status::InvalidArgument,
            },
            SimError::Module { source, .. } => source.status(),
            SimError::Generic(_)
            | SimError::Io(_)
            | SimError::AlreadyLoaded
            | SimError::DuplicateModule(_) => Status::Error,
        }
    }

    /// Wraps an error raised by a session callback.
    pub fn in_session(self, session: SessionId, module: &str) -> Self {
        SimError::Module {
            session,
            module: module.to_string(),
            source: Box::new(self),
        }
    }
}
