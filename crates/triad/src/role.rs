//! Execution roles, role sets, and exit status.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the three fixed execution contexts.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Coordinating role. Runs on the calling thread.
    Main = 0,
    /// Simulation role.
    Game = 1,
    /// Presentation role.
    Render = 2,
}

impl Role {
    /// Every role, in index order.
    pub const ALL: [Role; 3] = [Role::Main, Role::Game, Role::Render];

    /// Dense index (0..3).
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Lowercase name, used for thread names and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Role::Main => "main",
            Role::Game => "game",
            Role::Render => "render",
        }
    }

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Bitmask of the roles active for a launch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RoleSet(u8);

impl RoleSet {
    /// No role.
    pub const NONE: RoleSet = RoleSet(0);
    /// All three roles.
    pub const ALL: RoleSet = RoleSet(0b111);

    /// Builds a set from a list of roles.
    #[must_use]
    pub fn from_roles(roles: &[Role]) -> Self {
        roles.iter().fold(Self::NONE, |set, &role| set.with(role))
    }

    /// Returns a copy with `role` added.
    #[must_use]
    pub const fn with(self, role: Role) -> Self {
        RoleSet(self.0 | role.bit())
    }

    /// Returns whether `role` is active.
    #[inline]
    #[must_use]
    pub const fn contains(self, role: Role) -> bool {
        self.0 & role.bit() != 0
    }

    /// Returns whether no role is active.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Raw bits (bit `i` = `Role::ALL[i]`).
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Active roles in index order.
    pub fn iter(self) -> impl Iterator<Item = Role> {
        Role::ALL.into_iter().filter(move |&role| self.contains(role))
    }
}

/// How a role (or the whole run) ended. Ordered by ascending severity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExitStatus {
    /// Clean exit.
    #[default]
    Ok,
    /// Stopped by a user cancel or as collateral of another role's failure.
    Canceled,
    /// Failed, but nothing is corrupted.
    Recoverable,
    /// Failed hard: a fatal module error or a panic.
    Fatal,
}

impl ExitStatus {
    /// The most severe status of `statuses` (`Ok` if empty).
    #[must_use]
    pub fn worst(statuses: impl IntoIterator<Item = ExitStatus>) -> ExitStatus {
        statuses.into_iter().max().unwrap_or(ExitStatus::Ok)
    }

    /// Returns whether this status should bring the other roles down.
    #[inline]
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, ExitStatus::Recoverable | ExitStatus::Fatal)
    }

    /// Process exit code. A user cancel is not a failure.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            ExitStatus::Ok | ExitStatus::Canceled => 0,
            ExitStatus::Recoverable => 1,
            ExitStatus::Fatal => 2,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitStatus::Ok => "ok",
            ExitStatus::Canceled => "canceled",
            ExitStatus::Recoverable => "recoverable",
            ExitStatus::Fatal => "fatal",
        };
        f.pad(name)
    }
}
