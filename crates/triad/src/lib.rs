//! # TRIAD
//!
//! Thread lifecycle orchestration for a three-role process:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                             Runtime                               │
//! │                                                                   │
//! │   Main (calling thread)   Game (triad-game)   Render (triad-render)│
//! │   ┌─────────────────┐     ┌─────────────────┐  ┌─────────────────┐ │
//! │   │ BoundKernel     │     │ BoundKernel     │  │ BoundKernel     │ │
//! │   │  modules, clock │     │  modules, clock │  │  modules, clock │ │
//! │   └────────┬────────┘     └────────┬────────┘  └────────┬────────┘ │
//! │            │   frames, input       │    scene view      │          │
//! │            └──────────────────────>└───────────────────>│          │
//! │            └──────────────── render commands ──────────>│          │
//! │                                                                   │
//! │   Registry (root) ─┬─ main scope ─┬─ game scope ─┬─ render scope   │
//! │   CancelSignal ────┴── shared by every loop and blocking call ──   │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A role's [`Kernel`] owns its [`Module`]s, orders them by declared
//! dependencies, and drives them through the eight [`Phase`]s. The
//! [`Runtime`] builds one kernel per active role, hands each role its channel
//! endpoints through the [`Registry`], and reports the worst [`ExitStatus`].
//!
//! Channels and the clock live in [`triad_core`] and are re-exported here.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod graph;
pub mod kernel;
pub mod module;
pub mod registry;
pub mod role;
pub mod runtime;

pub use config::{LaunchConfig, LaunchMode, RoleLoopConfig, RuntimeConfig};
pub use error::{ConfigError, KernelError, ModuleError, ModuleResult, RuntimeError};
pub use graph::DependencyGraph;
pub use kernel::{BoundKernel, Kernel, KernelBuilder};
pub use module::{
    phase_mask_of, BindContext, Module, ModuleId, Phase, PhaseContext, PhaseMask, PHASE_COUNT,
};
pub use registry::Registry;
pub use role::{ExitStatus, Role, RoleSet};
pub use runtime::{RunReport, Runtime, RuntimeBuilder};

pub use triad_core;
pub use triad_core::{
    CancelReason, CancelSignal, ChannelConfig, ChannelError, Clock, ClockConfig, ControlDrainer,
    ControlPoster, FrameStart, InputSnapshot, ManualTime, RenderControl, RenderControlKind,
    RingReader, RingWriter, SceneView, SnapshotPublisher, SnapshotReader, TimeSource,
};
