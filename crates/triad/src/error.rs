//! # Orchestrator Error Types
//!
//! Configuration problems surface once, before any module runs. Module
//! failures travel as [`ModuleError`] and are turned into an
//! [`ExitStatus`](crate::ExitStatus) at the role-loop boundary.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use triad_core::{ChannelError, InvalidCapacity};

use crate::role::Role;

/// Errors raised while building or binding a kernel.
#[derive(Error, Debug)]
pub enum KernelError {
    /// A module depends on a module type that is not registered in its role.
    #[error("module {module} depends on {dependency}, which is not registered in this role")]
    MissingDependency {
        /// The dependent module.
        module: &'static str,
        /// The absent dependency.
        dependency: &'static str,
    },

    /// The dependency edges form a cycle.
    #[error("dependency cycle between modules: {}", .modules.join(", "))]
    DependencyCycle {
        /// Every module that could not be ordered.
        modules: Vec<&'static str>,
    },

    /// The same module type was registered twice in one role.
    #[error("module {0} registered twice")]
    DuplicateModule(&'static str),

    /// A module's bind hook failed.
    #[error("module {module} failed to bind: {source}")]
    Bind {
        /// The failing module.
        module: &'static str,
        /// What went wrong.
        #[source]
        source: ModuleError,
    },
}

/// Errors returned from module lifecycle hooks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    /// The role should stop, but the process state is intact.
    #[error("recoverable: {0}")]
    Recoverable(String),

    /// The role cannot continue.
    #[error("fatal: {0}")]
    Fatal(String),

    /// A blocking channel call ended (closed, canceled, or full).
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Result type for module lifecycle hooks.
pub type ModuleResult = Result<(), ModuleError>;

/// Errors loading or validating the runtime configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The TOML did not parse into a config.
    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    /// A channel capacity is unusable.
    #[error(transparent)]
    Capacity(#[from] InvalidCapacity),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors building a runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A role's kernel could not be built or bound.
    #[error("{role} kernel: {source}")]
    Kernel {
        /// Role whose kernel failed.
        role: Role,
        /// What went wrong.
        #[source]
        source: KernelError,
    },
}
