//! # Channel Set & Role Views
//!
//! Fixed wiring between the three roles:
//!
//! ```text
//!                 ┌───────────────────── ChannelSet ─────────────────────┐
//!                 │                                                       │
//!   MainView ─────┼─ frames: RingWriter<FrameStart> ───────> GameView     │
//!                 ├─ input:  RingWriter<InputSnapshot> ────> GameView     │
//!                 ├─ render_control: ControlPoster ──────────────> RenderView
//!   GameView ─────┼─ scene:  SnapshotPublisher<SceneView> ─────────> RenderView
//!                 └───────────────────────────────────────────────────────┘
//! ```
//!
//! Each view holds only the ends its role may use. Because the ends are
//! owned and not `Clone`, the simulation role cannot read its own writes or
//! publish twice from two threads: that code does not type-check.

use serde::{Deserialize, Serialize};

use crate::control::{ControlBus, ControlDrainer, ControlPoster};
use crate::error::InvalidCapacity;
use crate::messages::{FrameStart, InputSnapshot, RenderControl, SceneView};
use crate::ring::{FullPolicy, RingChannel, RingReader, RingWriter, WaitStrategy};
use crate::snapshot::{SnapshotCell, SnapshotPublisher, SnapshotReader};

/// Sizes and policies of the channel set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Frame pacing ring capacity (power of two).
    pub frame_capacity: usize,
    /// Input ring capacity (power of two).
    pub input_capacity: usize,
    /// Bound on distinct pending render commands. `None` for unbounded.
    pub control_capacity: Option<usize>,
    /// Full-buffer policy of the frame pacing ring.
    pub frame_policy: FullPolicy,
    /// Full-buffer policy of the input ring.
    pub input_policy: FullPolicy,
    /// Wait strategy shared by both rings.
    pub wait_strategy: WaitStrategy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            frame_capacity: 4,
            input_capacity: 16,
            control_capacity: Some(8),
            frame_policy: FullPolicy::Wait,
            input_policy: FullPolicy::DropOnFull,
            wait_strategy: WaitStrategy::Hybrid,
        }
    }
}

impl ChannelConfig {
    /// Checks that both ring capacities are usable.
    ///
    /// # Errors
    ///
    /// Returns the first capacity that is zero or not a power of two.
    pub fn validate(&self) -> Result<(), InvalidCapacity> {
        for (channel, capacity) in [
            ("frame", self.frame_capacity),
            ("input", self.input_capacity),
        ] {
            if !capacity.is_power_of_two() {
                return Err(InvalidCapacity { channel, capacity });
            }
        }
        Ok(())
    }
}

/// Every channel of one run, before it is split into role views.
pub struct ChannelSet {
    frames: (RingWriter<FrameStart>, RingReader<FrameStart>),
    input: (RingWriter<InputSnapshot>, RingReader<InputSnapshot>),
    scene: (SnapshotPublisher<SceneView>, SnapshotReader<SceneView>),
    render_control: (ControlPoster<RenderControl>, ControlDrainer<RenderControl>),
}

impl ChannelSet {
    /// Builds the channel set.
    ///
    /// # Panics
    ///
    /// Panics if a ring capacity is invalid. Call
    /// [`ChannelConfig::validate`] first when the config comes from a file.
    #[must_use]
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            frames: RingChannel::bounded(
                config.frame_capacity,
                config.frame_policy,
                config.wait_strategy,
            ),
            input: RingChannel::bounded(
                config.input_capacity,
                config.input_policy,
                config.wait_strategy,
            ),
            scene: SnapshotCell::new(SceneView::default()),
            render_control: ControlBus::new(config.control_capacity, RenderControl::key),
        }
    }

    /// Splits the set into the three role views.
    #[must_use]
    pub fn into_views(self) -> (MainView, GameView, RenderView) {
        let (frames_tx, frames_rx) = self.frames;
        let (input_tx, input_rx) = self.input;
        let (scene_tx, scene_rx) = self.scene;
        let (control_tx, control_rx) = self.render_control;

        (
            MainView {
                frames: frames_tx,
                input: input_tx,
                render_control: control_tx,
            },
            GameView {
                frames: frames_rx,
                input: input_rx,
                scene: scene_tx,
            },
            RenderView {
                scene: scene_rx,
                render_control: control_rx,
            },
        )
    }
}

/// Coordinating role: writes pacing and input, posts render commands.
pub struct MainView {
    /// Frame pacing, consumed by Game.
    pub frames: RingWriter<FrameStart>,
    /// Input, consumed by Game.
    pub input: RingWriter<InputSnapshot>,
    /// Render commands, drained by Render.
    pub render_control: ControlPoster<RenderControl>,
}

/// Simulation role: reads pacing and input, publishes the scene view.
pub struct GameView {
    /// Frame pacing from Main.
    pub frames: RingReader<FrameStart>,
    /// Input from Main.
    pub input: RingReader<InputSnapshot>,
    /// Scene view, read by Render.
    pub scene: SnapshotPublisher<SceneView>,
}

/// Presentation role: reads the scene view, drains render commands.
pub struct RenderView {
    /// Latest scene view from Game.
    pub scene: SnapshotReader<SceneView>,
    /// Render commands from Main.
    pub render_control: ControlDrainer<RenderControl>,
}
