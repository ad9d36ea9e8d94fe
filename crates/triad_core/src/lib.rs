//! # TRIAD Core
//!
//! Inter-thread communication substrate for the three execution roles:
//!
//! ```text
//!  ┌──────────┐  FrameStart ring   ┌──────────┐  SceneView snapshot  ┌──────────┐
//!  │   MAIN   │───────────────────>│   GAME   │─────────────────────>│  RENDER  │
//!  │ (coord.) │  InputSnapshot ring│  (sim)   │                      │ (present)│
//!  │          │───────────────────>│          │                      │          │
//!  │          │───────────────────────────────────────────────────────>│          │
//!  └──────────┘             RenderControl bus (coalesced by kind)     └──────────┘
//! ```
//!
//! ## Architecture Rules
//!
//! 1. **No locks on the frame path** - rings and the snapshot are lock-free
//! 2. **One writer, one reader** - endpoints are split, owned, and not `Clone`
//! 3. **Never block the simulation** - the only blocking calls are the
//!    explicit `write`/`read` on a ring, and they honor cancellation
//!
//! ## Example
//!
//! ```rust,ignore
//! use triad_core::{ChannelSet, ChannelConfig};
//!
//! let (main, game, render) = ChannelSet::new(&ChannelConfig::default()).into_views();
//! // move `game` into the simulation thread, `render` into the presentation thread
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod cancel;
pub mod channels;
pub mod clock;
pub mod control;
pub mod error;
pub mod messages;
pub mod ring;
pub mod snapshot;

pub use cancel::{CancelReason, CancelSignal};
pub use channels::{ChannelConfig, ChannelSet, GameView, MainView, RenderView};
pub use clock::{Clock, ClockConfig, ManualTime, MonotonicTime, TimeSource};
pub use control::{ControlBus, ControlDrainer, ControlPoster};
pub use error::{ChannelError, ChannelResult, InvalidCapacity};
pub use messages::{FrameStart, InputSnapshot, RenderControl, RenderControlKind, SceneView};
pub use ring::{FullPolicy, RingChannel, RingReader, RingWriter, WaitStrategy};
pub use snapshot::{SnapshotCell, SnapshotPublisher, SnapshotReader};
