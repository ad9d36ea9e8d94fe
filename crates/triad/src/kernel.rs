//! # Kernel
//!
//! Owns the modules of one role and drives them through the lifecycle.
//!
//! ```text
//! KernelBuilder ──build()──> Kernel ──bind()──> BoundKernel ──run()──> ExitStatus
//!   add modules      topo sort,         bind hook on          Load/Initialize/Start,
//!                    phase lists        every module          frames, Shutdown
//! ```
//!
//! ## Dispatch
//!
//! At build time every module's cached [`PhaseMask`] is expanded into one
//! list per phase of `(module index, entry fn)` pairs, in registration order.
//! The Shutdown list is stored reversed. Dispatching a phase is a walk over
//! its list: no lookup, no allocation, no call for a module that does not
//! take part in the phase. Modules reporting [`Module::enabled`] `false` are
//! skipped by the per-frame phases.
//!
//! ## Exit
//!
//! | Loop ended by                          | Status                   |
//! |----------------------------------------|--------------------------|
//! | `request_exit()` or `max_frames`       | `Ok`                     |
//! | cancel signal, reason `Shutdown`       | `Ok`                     |
//! | cancel signal, other reason            | `Canceled`               |
//! | `ModuleError::Recoverable`             | `Recoverable`            |
//! | `ModuleError::Fatal` or a panic        | `Fatal`                  |
//!
//! Shutdown runs in every case, in reverse order, for every module the Load
//! phase reached (including one whose Load failed). A module never loaded is
//! never torn down. Shutdown failures are folded into the status.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use triad_core::{CancelReason, CancelSignal, ChannelError, Clock, ClockConfig, TimeSource};

use crate::config::RoleLoopConfig;
use crate::error::{KernelError, ModuleError};
use crate::graph::DependencyGraph;
use crate::module::{
    phase_mask_of, BindContext, Module, ModuleId, Phase, PhaseContext, PhaseFn, PhaseMask,
    PHASE_COUNT,
};
use crate::registry::Registry;
use crate::role::{ExitStatus, Role};

/// Collects the modules of one role.
pub struct KernelBuilder {
    role: Role,
    graph: DependencyGraph,
    modules: Vec<Box<dyn Module>>,
    masks: Vec<PhaseMask>,
    duplicate: Option<&'static str>,
    time_source: Option<Box<dyn TimeSource>>,
}

impl KernelBuilder {
    /// Creates an empty builder for `role`.
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            role,
            graph: DependencyGraph::new(),
            modules: Vec::new(),
            masks: Vec::new(),
            duplicate: None,
            time_source: None,
        }
    }

    /// Registers a module. Chaining form of [`add`](Self::add).
    #[must_use]
    pub fn with<M: Module>(mut self, module: M) -> Self {
        self.add(module);
        self
    }

    /// Registers a module.
    ///
    /// Registering the same type twice is reported by [`build`](Self::build).
    pub fn add<M: Module>(&mut self, module: M) -> &mut Self {
        let id = ModuleId::of::<M>();
        if self.graph.contains(id) {
            if self.duplicate.is_none() {
                self.duplicate = Some(module.name());
            }
            return self;
        }

        self.graph.add(id, module.name(), M::dependencies());
        self.masks.push(phase_mask_of::<M>());
        self.modules.push(Box::new(module));
        self
    }

    /// Drives the kernel's clock from `source` instead of the monotonic clock.
    #[must_use]
    pub fn with_time_source(mut self, source: impl TimeSource + 'static) -> Self {
        self.time_source = Some(Box::new(source));
        self
    }

    /// Role this builder is for.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Number of registered modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns whether no module is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Orders the modules and builds the phase lists.
    ///
    /// No module hook runs here.
    ///
    /// # Errors
    ///
    /// [`KernelError::DuplicateModule`], [`KernelError::MissingDependency`]
    /// or [`KernelError::DependencyCycle`].
    pub fn build(self, clock: &ClockConfig) -> Result<Kernel, KernelError> {
        let role = self.role;
        if let Some(name) = self.duplicate {
            tracing::error!(role = %role, module = name, "module registered twice");
            return Err(KernelError::DuplicateModule(name));
        }

        let order = self.graph.topological_order().map_err(|err| {
            tracing::error!(role = %role, error = %err, "cannot order modules");
            err
        })?;

        let mut pending: Vec<Option<(Box<dyn Module>, PhaseMask)>> = self
            .modules
            .into_iter()
            .zip(self.masks)
            .map(Some)
            .collect();
        let (modules, masks): (Vec<_>, Vec<_>) = order
            .into_iter()
            .filter_map(|index| pending[index].take())
            .unzip();

        let mut lists: [Vec<(usize, PhaseFn)>; PHASE_COUNT] = Default::default();
        for (index, mask) in masks.iter().enumerate() {
            for phase in mask.iter() {
                lists[phase.index()].push((index, phase.entry()));
            }
        }
        lists[Phase::Shutdown.index()].reverse();

        let clock = match self.time_source {
            Some(source) => Clock::new(clock, source),
            None => Clock::monotonic(clock),
        };

        let kernel = Kernel {
            role,
            modules,
            lists,
            clock,
        };
        tracing::debug!(
            role = %role,
            order = ?kernel.registration_order(),
            per_phase = ?Phase::ALL.map(|phase| kernel.phase_len(phase)),
            "kernel built"
        );
        Ok(kernel)
    }
}

/// Ordered modules of one role, not yet bound.
pub struct Kernel {
    role: Role,
    modules: Vec<Box<dyn Module>>,
    lists: [Vec<(usize, PhaseFn)>; PHASE_COUNT],
    clock: Clock,
}

impl Kernel {
    /// Role this kernel runs.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Module names, dependencies first.
    #[must_use]
    pub fn registration_order(&self) -> Vec<&'static str> {
        self.modules.iter().map(|module| module.name()).collect()
    }

    /// Number of modules dispatched for `phase`.
    #[must_use]
    pub fn phase_len(&self, phase: Phase) -> usize {
        self.lists[phase.index()].len()
    }

    /// Number of modules.
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// The kernel's clock.
    #[must_use]
    pub const fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Calls every module's bind hook, in registration order.
    ///
    /// # Errors
    ///
    /// [`KernelError::Bind`] for the first module that refuses.
    pub fn bind(
        mut self,
        services: Arc<Registry>,
        cancel: CancelSignal,
    ) -> Result<BoundKernel, KernelError> {
        let cx = BindContext::new(self.role, &cancel, &services);
        for module in &mut self.modules {
            let name = module.name();
            if let Err(source) = module.bind(&cx) {
                tracing::error!(role = %self.role, module = name, error = %source, "bind failed");
                return Err(KernelError::Bind {
                    module: name,
                    source,
                });
            }
        }

        Ok(BoundKernel {
            kernel: self,
            services,
            cancel,
            frames: 0,
            entered: 0,
        })
    }
}

/// A kernel whose modules are bound and ready to run.
pub struct BoundKernel {
    kernel: Kernel,
    services: Arc<Registry>,
    cancel: CancelSignal,
    frames: u64,
    /// Modules `0..entered` (registration order) were reached by Load.
    entered: usize,
}

enum Stop {
    Exit,
    Signal,
}

impl BoundKernel {
    /// The underlying kernel.
    #[must_use]
    pub const fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Role this kernel runs.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.kernel.role
    }

    /// The cancel signal the kernel observes.
    #[must_use]
    pub const fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Frames completed by [`run`](Self::run).
    #[must_use]
    pub const fn frames(&self) -> u64 {
        self.frames
    }

    /// Dispatches one phase to every participating module.
    ///
    /// Returns whether a module requested exit.
    ///
    /// # Errors
    ///
    /// The first module error. Later modules in the list are not called.
    pub fn run_phase(&mut self, phase: Phase) -> Result<bool, ModuleError> {
        let Kernel {
            role,
            modules,
            lists,
            clock,
        } = &mut self.kernel;
        let mut cx = PhaseContext::new(*role, phase, clock, &self.cancel, &self.services);

        for &(index, entry) in &lists[phase.index()] {
            let module = &mut modules[index];
            if phase.is_per_frame() && !module.enabled() {
                continue;
            }
            if phase == Phase::Load {
                self.entered = self.entered.max(index + 1);
            }
            if let Err(err) = entry(module.as_mut(), &mut cx) {
                log_module_error(*role, module.name(), phase, &err);
                return Err(err);
            }
        }
        Ok(cx.exit_requested())
    }

    /// Runs the full role loop and returns how it ended.
    ///
    /// Panics escaping a module are caught here and reported as
    /// [`ExitStatus::Fatal`]. Call once; modules see Load again on a second
    /// call.
    pub fn run(&mut self, config: &RoleLoopConfig) -> ExitStatus {
        let role = self.role();
        tracing::info!(role = %role, modules = self.kernel.module_count(), "role loop starting");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.drive(config)));
        let status = match outcome {
            Ok(Ok(Stop::Exit)) => ExitStatus::Ok,
            Ok(Ok(Stop::Signal)) => signal_status(&self.cancel),
            Ok(Err(err)) => error_status(&err, &self.cancel),
            Err(payload) => {
                tracing::error!(role = %role, panic = panic_message(payload.as_ref()), "module panicked");
                ExitStatus::Fatal
            }
        };

        let teardown = match panic::catch_unwind(AssertUnwindSafe(|| self.teardown())) {
            Ok(teardown) => teardown,
            Err(payload) => {
                tracing::error!(role = %role, panic = panic_message(payload.as_ref()), "module panicked during shutdown");
                ExitStatus::Fatal
            }
        };

        let status = status.max(teardown);
        tracing::info!(role = %role, status = %status, frames = self.frames, "role loop stopped");
        status
    }

    fn drive(&mut self, config: &RoleLoopConfig) -> Result<Stop, ModuleError> {
        if self.cancel.is_canceled() {
            return Ok(Stop::Signal);
        }
        let exit = self.run_phase(Phase::Load)?;
        self.entered = self.kernel.module_count();
        if exit {
            return Ok(Stop::Exit);
        }

        for phase in [Phase::Initialize, Phase::Start] {
            if self.cancel.is_canceled() {
                return Ok(Stop::Signal);
            }
            if self.run_phase(phase)? {
                return Ok(Stop::Exit);
            }
        }

        // Startup time is not frame time.
        self.kernel.clock.restart();
        let mut pacer = config.target_hz.map(FramePacer::new);
        loop {
            if self.cancel.is_canceled() {
                return Ok(Stop::Signal);
            }
            if config.max_frames.is_some_and(|max| self.frames >= max) {
                return Ok(Stop::Exit);
            }

            self.kernel.clock.update();
            let mut exit = false;
            while self.kernel.clock.fixed_update() {
                exit |= self.run_phase(Phase::FixedUpdate)?;
            }
            exit |= self.run_phase(Phase::PreUpdate)?;
            exit |= self.run_phase(Phase::Update)?;
            exit |= self.run_phase(Phase::PostUpdate)?;
            self.frames += 1;

            if exit {
                return Ok(Stop::Exit);
            }
            if let Some(pacer) = pacer.as_mut() {
                pacer.wait();
            }
        }
    }

    /// Runs Shutdown on every participating module Load reached, even after
    /// a failure.
    fn teardown(&mut self) -> ExitStatus {
        let Kernel {
            role,
            modules,
            lists,
            clock,
        } = &mut self.kernel;
        let mut cx = PhaseContext::new(*role, Phase::Shutdown, clock, &self.cancel, &self.services);
        let mut status = ExitStatus::Ok;

        for &(index, entry) in &lists[Phase::Shutdown.index()] {
            if index >= self.entered {
                continue;
            }
            let module = &mut modules[index];
            if let Err(err) = entry(module.as_mut(), &mut cx) {
                log_module_error(*role, module.name(), Phase::Shutdown, &err);
                status = status.max(error_status(&err, &self.cancel));
            }
        }
        status
    }
}

fn log_module_error(role: Role, module: &'static str, phase: Phase, err: &ModuleError) {
    match err {
        ModuleError::Fatal(_) => {
            tracing::error!(role = %role, module, phase = %phase, error = %err, "module failed");
        }
        ModuleError::Recoverable(_) | ModuleError::Channel(ChannelError::Full) => {
            tracing::warn!(role = %role, module, phase = %phase, error = %err, "module failed");
        }
        ModuleError::Channel(_) => {
            tracing::debug!(role = %role, module, phase = %phase, error = %err, "channel ended");
        }
    }
}

/// Status of a loop that stopped on the cancel signal.
fn signal_status(cancel: &CancelSignal) -> ExitStatus {
    match cancel.reason() {
        Some(CancelReason::Shutdown) => ExitStatus::Ok,
        _ => ExitStatus::Canceled,
    }
}

fn error_status(err: &ModuleError, cancel: &CancelSignal) -> ExitStatus {
    match err {
        ModuleError::Recoverable(_) | ModuleError::Channel(ChannelError::Full) => {
            ExitStatus::Recoverable
        }
        ModuleError::Fatal(_) => ExitStatus::Fatal,
        // The peer finished. Clean unless the run is being torn down for
        // another reason.
        ModuleError::Channel(ChannelError::Closed) => match cancel.reason() {
            None | Some(CancelReason::Shutdown) => ExitStatus::Ok,
            Some(_) => ExitStatus::Canceled,
        },
        ModuleError::Channel(ChannelError::Canceled) => signal_status(cancel),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Sleep-then-spin frame pacing.
struct FramePacer {
    period: Duration,
    next: Instant,
}

impl FramePacer {
    const SPIN_MARGIN: Duration = Duration::from_micros(500);

    fn new(target_hz: u32) -> Self {
        let period = Duration::from_secs(1) / target_hz.max(1);
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    fn wait(&mut self) {
        let now = Instant::now();
        if now < self.next {
            let remaining = self.next - now;
            if remaining > Self::SPIN_MARGIN * 2 {
                std::thread::sleep(remaining - Self::SPIN_MARGIN);
            }
            while Instant::now() < self.next {
                std::hint::spin_loop();
            }
            self.next += self.period;
        } else {
            // Behind schedule: do not try to catch up.
            self.next = now + self.period;
        }
    }
}
