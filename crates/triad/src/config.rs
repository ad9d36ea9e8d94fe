//! # Runtime Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so an empty
//! file is a valid editor launch.
//!
//! ```toml
//! [launch]
//! mode = "custom"
//! roles = ["main", "game"]
//!
//! [channels]
//! frame_capacity = 4
//! input_policy = "drop_on_full"
//!
//! [clock]
//! fixed_hz = 60
//!
//! [main]
//! target_hz = 120
//! max_frames = 600
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use triad_core::{ChannelConfig, ClockConfig};

use crate::error::ConfigError;
use crate::role::{Role, RoleSet};

/// Which roles a launch runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Main, Game and Render, with editor tooling modules.
    #[default]
    Editor,
    /// Main, Game and Render.
    Client,
    /// Game only. The calling thread waits for it.
    DedicatedServer,
    /// Exactly the roles listed in `launch.roles`.
    Custom,
}

impl LaunchMode {
    /// Fixed role set of this mode. `None` for [`LaunchMode::Custom`].
    #[must_use]
    pub const fn preset(self) -> Option<RoleSet> {
        match self {
            LaunchMode::Editor | LaunchMode::Client => Some(RoleSet::ALL),
            LaunchMode::DedicatedServer => Some(RoleSet::NONE.with(Role::Game)),
            LaunchMode::Custom => None,
        }
    }
}

/// `[launch]` table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Launch mode.
    pub mode: LaunchMode,
    /// Roles to run when `mode = "custom"`. Ignored otherwise.
    pub roles: Vec<Role>,
}

impl LaunchConfig {
    /// Resolves the active role set.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if a custom launch names no role.
    pub fn role_set(&self) -> Result<RoleSet, ConfigError> {
        let set = self
            .mode
            .preset()
            .unwrap_or_else(|| RoleSet::from_roles(&self.roles));
        if set.is_empty() {
            return Err(ConfigError::Invalid(
                "custom launch must list at least one role".into(),
            ));
        }
        Ok(set)
    }
}

/// Loop settings of one role (`[main]`, `[game]`, `[render]`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleLoopConfig {
    /// Pace the frame loop to this rate. Unpaced when absent.
    pub target_hz: Option<u32>,
    /// Exit cleanly after this many frames.
    pub max_frames: Option<u64>,
}

/// Root of the runtime configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Role activation.
    pub launch: LaunchConfig,
    /// Channel sizes and policies.
    pub channels: ChannelConfig,
    /// Clock tuning shared by every role.
    pub clock: ClockConfig,
    /// Main role loop.
    pub main: RoleLoopConfig,
    /// Game role loop.
    pub game: RoleLoopConfig,
    /// Render role loop.
    pub render: RoleLoopConfig,
}

impl RuntimeConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] on bad syntax or unknown values, otherwise any
    /// error of [`validate`](Self::validate).
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks every value that would otherwise fail at runtime.
    ///
    /// # Errors
    ///
    /// The first invalid value found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.launch.role_set()?;
        self.channels.validate()?;

        if self.clock.fixed_hz == 0 {
            return Err(ConfigError::Invalid("clock.fixed_hz must be positive".into()));
        }
        if self.clock.max_fixed_steps == 0 {
            return Err(ConfigError::Invalid(
                "clock.max_fixed_steps must be positive".into(),
            ));
        }
        let delta = self.clock.max_frame_delta;
        if delta.is_nan() || delta <= 0.0 {
            return Err(ConfigError::Invalid(
                "clock.max_frame_delta must be positive".into(),
            ));
        }
        let scale = self.clock.time_scale;
        if scale.is_nan() || scale < 0.0 {
            return Err(ConfigError::Invalid(
                "clock.time_scale must not be negative".into(),
            ));
        }
        if self.channels.control_capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "channels.control_capacity must be positive when set".into(),
            ));
        }
        for role in Role::ALL {
            if self.role_loop(role).target_hz == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "{role}.target_hz must be positive when set"
                )));
            }
        }
        Ok(())
    }

    /// Active roles for this launch.
    ///
    /// # Errors
    ///
    /// See [`LaunchConfig::role_set`].
    pub fn active_roles(&self) -> Result<RoleSet, ConfigError> {
        self.launch.role_set()
    }

    /// Loop settings of `role`.
    #[must_use]
    pub const fn role_loop(&self, role: Role) -> &RoleLoopConfig {
        match role {
            Role::Main => &self.main,
            Role::Game => &self.game,
            Role::Render => &self.render,
        }
    }
}
