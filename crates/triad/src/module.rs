//! # Modules & Phases
//!
//! A module is a unit of per-role behavior driven through eight lifecycle
//! phases:
//!
//! ```text
//! Load → Initialize → Start → ┌ FixedUpdate* ┐ → Shutdown
//!                             │ PreUpdate    │   (reverse order)
//!                             │ Update       │
//!                             └ PostUpdate ──┘ per frame
//! ```
//!
//! Every hook has a no-op default. A module type declares the hooks it
//! actually overrides in [`Module::phases`]; the kernel only dispatches to
//! those, so an idle module costs nothing per frame. The declared mask is
//! computed once per type and cached in a process-wide table keyed by
//! `TypeId`.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use triad_core::{CancelSignal, Clock};

use crate::error::ModuleResult;
use crate::registry::Registry;
use crate::role::Role;

/// A lifecycle phase. Variants are in execution order.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Acquire resources.
    Load = 0,
    /// Wire up state that needs every module loaded.
    Initialize = 1,
    /// Last call before the first frame.
    Start = 2,
    /// Zero or more times per frame, once per due fixed step.
    FixedUpdate = 3,
    /// Once per frame, before `Update`.
    PreUpdate = 4,
    /// Once per frame.
    Update = 5,
    /// Once per frame, after `Update`.
    PostUpdate = 6,
    /// Teardown, in reverse registration order.
    Shutdown = 7,
}

/// Number of lifecycle phases.
pub const PHASE_COUNT: usize = 8;

impl Phase {
    /// Every phase, in execution order.
    pub const ALL: [Phase; PHASE_COUNT] = [
        Phase::Load,
        Phase::Initialize,
        Phase::Start,
        Phase::FixedUpdate,
        Phase::PreUpdate,
        Phase::Update,
        Phase::PostUpdate,
        Phase::Shutdown,
    ];

    /// Dense index (0..8).
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Returns whether the phase runs inside the frame loop.
    #[must_use]
    pub const fn is_per_frame(self) -> bool {
        matches!(
            self,
            Phase::FixedUpdate | Phase::PreUpdate | Phase::Update | Phase::PostUpdate
        )
    }

    /// Entry point that invokes this phase's hook on a module.
    pub(crate) fn entry(self) -> PhaseFn {
        match self {
            Phase::Load => call_load,
            Phase::Initialize => call_initialize,
            Phase::Start => call_start,
            Phase::FixedUpdate => call_fixed_update,
            Phase::PreUpdate => call_pre_update,
            Phase::Update => call_update,
            Phase::PostUpdate => call_post_update,
            Phase::Shutdown => call_shutdown,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Load => "load",
            Phase::Initialize => "initialize",
            Phase::Start => "start",
            Phase::FixedUpdate => "fixed_update",
            Phase::PreUpdate => "pre_update",
            Phase::Update => "update",
            Phase::PostUpdate => "post_update",
            Phase::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Set of phases a module type participates in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PhaseMask(u8);

impl PhaseMask {
    /// No phase.
    pub const NONE: PhaseMask = PhaseMask(0);
    /// Every phase.
    pub const ALL: PhaseMask = PhaseMask(0xFF);
    /// The three per-frame step phases.
    pub const FRAME: PhaseMask = PhaseMask::of(&[Phase::PreUpdate, Phase::Update, Phase::PostUpdate]);

    /// Builds a mask from a list of phases.
    #[must_use]
    pub const fn of(phases: &[Phase]) -> Self {
        let mut bits = 0u8;
        let mut i = 0;
        while i < phases.len() {
            bits |= 1 << (phases[i] as u8);
            i += 1;
        }
        PhaseMask(bits)
    }

    /// Returns a copy with `phase` added.
    #[must_use]
    pub const fn with(self, phase: Phase) -> Self {
        PhaseMask(self.0 | 1 << (phase as u8))
    }

    /// Union of two masks.
    #[must_use]
    pub const fn union(self, other: PhaseMask) -> Self {
        PhaseMask(self.0 | other.0)
    }

    /// Returns whether `phase` is in the mask.
    #[inline]
    #[must_use]
    pub const fn contains(self, phase: Phase) -> bool {
        self.0 & (1 << (phase as u8)) != 0
    }

    /// Returns whether the mask is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Raw bits (bit `i` = `Phase::ALL[i]`).
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Phases in the mask, in execution order.
    pub fn iter(self) -> impl Iterator<Item = Phase> {
        Phase::ALL.into_iter().filter(move |&phase| self.contains(phase))
    }
}

/// Type identity of a module, used for dependency edges.
#[derive(Clone, Copy)]
pub struct ModuleId {
    type_id: TypeId,
    name: &'static str,
}

impl ModuleId {
    /// Identity of module type `M`.
    #[must_use]
    pub fn of<M: Module>() -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            name: type_name::<M>(),
        }
    }

    /// The type's `TypeId`.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The type's name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ModuleId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ModuleId {}

impl Hash for ModuleId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A unit of per-role behavior.
///
/// Override the hooks the module needs and list them in
/// [`phases`](Module::phases). A hook that is overridden but not listed is
/// never called; a hook that is listed but not overridden costs one no-op
/// call.
///
/// ```
/// use triad::{Module, ModuleResult, Phase, PhaseContext, PhaseMask};
///
/// struct FrameCounter(u64);
///
/// impl Module for FrameCounter {
///     fn phases() -> PhaseMask {
///         PhaseMask::of(&[Phase::Update])
///     }
///
///     fn update(&mut self, _cx: &mut PhaseContext<'_>) -> ModuleResult {
///         self.0 += 1;
///         Ok(())
///     }
/// }
/// ```
pub trait Module: Send + 'static {
    /// Phases this module type participates in.
    fn phases() -> PhaseMask
    where
        Self: Sized;

    /// Module types that must be registered before this one.
    fn dependencies() -> Vec<ModuleId>
    where
        Self: Sized,
    {
        Vec::new()
    }

    /// Name used in logs and errors.
    fn name(&self) -> &'static str {
        type_name::<Self>()
    }

    /// A disabled module is skipped by the per-frame phases. Load,
    /// Initialize, Start and Shutdown still reach it.
    fn enabled(&self) -> bool {
        true
    }

    /// Called exactly once, before any lifecycle hook of any module in the
    /// same role. Claim channel endpoints and look up services here.
    ///
    /// # Errors
    ///
    /// A failure aborts runtime construction.
    fn bind(&mut self, cx: &BindContext<'_>) -> ModuleResult {
        let _ = cx;
        Ok(())
    }

    /// See [`Phase::Load`].
    ///
    /// # Errors
    ///
    /// Any error stops the role; [`Phase::Shutdown`] still runs.
    fn load(&mut self, cx: &mut PhaseContext<'_>) -> ModuleResult {
        let _ = cx;
        Ok(())
    }

    /// See [`Phase::Initialize`].
    ///
    /// # Errors
    ///
    /// Any error stops the role; [`Phase::Shutdown`] still runs.
    fn initialize(&mut self, cx: &mut PhaseContext<'_>) -> ModuleResult {
        let _ = cx;
        Ok(())
    }

    /// See [`Phase::Start`].
    ///
    /// # Errors
    ///
    /// Any error stops the role; [`Phase::Shutdown`] still runs.
    fn start(&mut self, cx: &mut PhaseContext<'_>) -> ModuleResult {
        let _ = cx;
        Ok(())
    }

    /// See [`Phase::FixedUpdate`].
    ///
    /// # Errors
    ///
    /// Any error stops the role; [`Phase::Shutdown`] still runs.
    fn fixed_update(&mut self, cx: &mut PhaseContext<'_>) -> ModuleResult {
        let _ = cx;
        Ok(())
    }

    /// See [`Phase::PreUpdate`].
    ///
    /// # Errors
    ///
    /// Any error stops the role; [`Phase::Shutdown`] still runs.
    fn pre_update(&mut self, cx: &mut PhaseContext<'_>) -> ModuleResult {
        let _ = cx;
        Ok(())
    }

    /// See [`Phase::Update`].
    ///
    /// # Errors
    ///
    /// Any error stops the role; [`Phase::Shutdown`] still runs.
    fn update(&mut self, cx: &mut PhaseContext<'_>) -> ModuleResult {
        let _ = cx;
        Ok(())
    }

    /// See [`Phase::PostUpdate`].
    ///
    /// # Errors
    ///
    /// Any error stops the role; [`Phase::Shutdown`] still runs.
    fn post_update(&mut self, cx: &mut PhaseContext<'_>) -> ModuleResult {
        let _ = cx;
        Ok(())
    }

    /// See [`Phase::Shutdown`]. Called whenever the Load phase reached this
    /// module, even if its own Load failed; never called otherwise.
    ///
    /// # Errors
    ///
    /// Errors are logged and folded into the role's exit status.
    fn shutdown(&mut self, cx: &mut PhaseContext<'_>) -> ModuleResult {
        let _ = cx;
        Ok(())
    }
}

/// Dispatch entry for one (module, phase) pair.
pub(crate) type PhaseFn = fn(&mut dyn Module, &mut PhaseContext<'_>) -> ModuleResult;

fn call_load(module: &mut dyn Module, cx: &mut PhaseContext<'_>) -> ModuleResult {
    module.load(cx)
}

fn call_initialize(module: &mut dyn Module, cx: &mut PhaseContext<'_>) -> ModuleResult {
    module.initialize(cx)
}

fn call_start(module: &mut dyn Module, cx: &mut PhaseContext<'_>) -> ModuleResult {
    module.start(cx)
}

fn call_fixed_update(module: &mut dyn Module, cx: &mut PhaseContext<'_>) -> ModuleResult {
    module.fixed_update(cx)
}

fn call_pre_update(module: &mut dyn Module, cx: &mut PhaseContext<'_>) -> ModuleResult {
    module.pre_update(cx)
}

fn call_update(module: &mut dyn Module, cx: &mut PhaseContext<'_>) -> ModuleResult {
    module.update(cx)
}

fn call_post_update(module: &mut dyn Module, cx: &mut PhaseContext<'_>) -> ModuleResult {
    module.post_update(cx)
}

fn call_shutdown(module: &mut dyn Module, cx: &mut PhaseContext<'_>) -> ModuleResult {
    module.shutdown(cx)
}

static PHASE_TABLE: OnceLock<RwLock<HashMap<TypeId, PhaseMask>>> = OnceLock::new();

/// Cached phase mask of module type `M`.
///
/// `M::phases()` runs at most once per type per process.
#[must_use]
pub fn phase_mask_of<M: Module>() -> PhaseMask {
    let table = PHASE_TABLE.get_or_init(|| RwLock::new(HashMap::new()));
    let key = TypeId::of::<M>();

    if let Some(mask) = table.read().get(&key) {
        return *mask;
    }
    *table.write().entry(key).or_insert_with(M::phases)
}

/// Context handed to [`Module::bind`].
pub struct BindContext<'a> {
    role: Role,
    cancel: &'a CancelSignal,
    services: &'a Arc<Registry>,
}

impl<'a> BindContext<'a> {
    pub(crate) fn new(role: Role, cancel: &'a CancelSignal, services: &'a Arc<Registry>) -> Self {
        Self {
            role,
            cancel,
            services,
        }
    }

    /// Role the module runs on.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// The run's shared cancel signal.
    #[must_use]
    pub fn cancel(&self) -> &CancelSignal {
        self.cancel
    }

    /// The role's service scope.
    #[must_use]
    pub fn services(&self) -> &Arc<Registry> {
        self.services
    }

    /// Takes an owned resource offered to this role.
    #[must_use]
    pub fn claim<T: Any + Send>(&self) -> Option<T> {
        self.services.claim::<T>()
    }
}

/// Context handed to every lifecycle hook.
pub struct PhaseContext<'a> {
    role: Role,
    phase: Phase,
    clock: &'a Clock,
    cancel: &'a CancelSignal,
    services: &'a Arc<Registry>,
    exit_requested: bool,
}

impl<'a> PhaseContext<'a> {
    pub(crate) fn new(
        role: Role,
        phase: Phase,
        clock: &'a Clock,
        cancel: &'a CancelSignal,
        services: &'a Arc<Registry>,
    ) -> Self {
        Self {
            role,
            phase,
            clock,
            cancel,
            services,
            exit_requested: false,
        }
    }

    /// Role the module runs on.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Phase being dispatched.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// The role's clock.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        self.clock
    }

    /// The run's shared cancel signal.
    #[must_use]
    pub fn cancel(&self) -> &CancelSignal {
        self.cancel
    }

    /// The role's service scope.
    #[must_use]
    pub fn services(&self) -> &Arc<Registry> {
        self.services
    }

    /// Asks the role loop to exit cleanly after the current phase.
    pub fn request_exit(&mut self) {
        self.exit_requested = true;
    }

    /// Returns whether any module asked to exit during this phase.
    #[must_use]
    pub const fn exit_requested(&self) -> bool {
        self.exit_requested
    }
}
