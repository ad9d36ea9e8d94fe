//! Per-frame messages exchanged between the roles.
//!
//! The ring and snapshot payloads are fixed-layout `Pod` types, so they can
//! be copied, recorded, or handed to a GPU upload without conversion.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Frame pacing event (Main -> Game).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct FrameStart {
    /// Coordinating-role frame counter.
    pub frame_id: u64,
    /// Unscaled seconds since the previous frame.
    pub delta: f64,
}

/// Input state captured for one frame (Main -> Game).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct InputSnapshot {
    /// Frame this input belongs to.
    pub frame_id: u64,
    /// One bit per bound button/key, set while held.
    pub buttons: u64,
    /// Pointer position in window pixels.
    pub pointer: [f32; 2],
    /// Scroll delta accumulated this frame.
    pub scroll: [f32; 2],
}

impl InputSnapshot {
    /// Returns whether the button bound to `bit` is held.
    #[inline]
    #[must_use]
    pub const fn is_held(&self, bit: u32) -> bool {
        bit < 64 && self.buttons & (1u64 << bit) != 0
    }
}

/// Scene state Render needs to draw a frame (Game -> Render).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct SceneView {
    /// Simulation frame that produced this view.
    pub frame_id: u64,
    /// Fixed-step interpolation fraction in `[0, 1]`.
    pub interpolation_alpha: f32,
    /// Number of visible entities.
    pub entity_count: u32,
}

/// Kind of a render command. Commands coalesce by kind.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderControlKind {
    /// Surface size changed.
    Resize = 0,
    /// Window hidden or minimized; stop presenting.
    Suspend = 1,
    /// Window visible again.
    Resume = 2,
    /// Rebuild pipelines (shader hot reload).
    Reload = 3,
}

/// Side-band command for the presentation role (Main -> Render).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderControl {
    /// What to do. Also the coalescing key.
    pub kind: RenderControlKind,
    /// New width for `Resize`, otherwise 0.
    pub width: u32,
    /// New height for `Resize`, otherwise 0.
    pub height: u32,
}

impl RenderControl {
    /// A resize command.
    #[must_use]
    pub const fn resize(width: u32, height: u32) -> Self {
        Self {
            kind: RenderControlKind::Resize,
            width,
            height,
        }
    }

    /// A command without a payload.
    #[must_use]
    pub const fn signal(kind: RenderControlKind) -> Self {
        Self {
            kind,
            width: 0,
            height: 0,
        }
    }

    /// Coalescing key for the control bus.
    #[inline]
    #[must_use]
    pub fn key(&self) -> u64 {
        self.kind as u64
    }
}
