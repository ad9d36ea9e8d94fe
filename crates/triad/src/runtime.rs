//! # Runtime
//!
//! Wires the channel set, builds one kernel per active role, and runs them.
//!
//! ```text
//!   calling thread          triad-game            triad-render
//!   ──────────────          ──────────            ────────────
//!   build + bind all
//!   spawn ────────────────> Game loop
//!   spawn ───────────────────────────────────────> Render loop
//!   Main loop
//!   cancel(Shutdown) ─ ─ ─> observes signal ─ ─ ─> observes signal
//!   join <──────────────── ExitStatus
//!   join <──────────────────────────────────────── ExitStatus
//!   RunReport (worst status)
//! ```
//!
//! Any role that ends with `Recoverable` or `Fatal` raises the shared signal
//! with [`CancelReason::Fault`] so the others wind down. The signal is raised
//! before the failing kernel drops its modules, so a peer that sees a channel
//! close already knows why.

use std::sync::Arc;
use std::thread;

use triad_core::{CancelReason, CancelSignal, ChannelSet};

use crate::config::{RoleLoopConfig, RuntimeConfig};
use crate::error::RuntimeError;
use crate::kernel::{BoundKernel, Kernel, KernelBuilder};
use crate::registry::Registry;
use crate::role::{ExitStatus, Role, RoleSet};

/// Assembles a [`Runtime`].
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    registry: Option<Arc<Registry>>,
    kernels: [Option<KernelBuilder>; 3],
}

impl RuntimeBuilder {
    /// Starts from a configuration.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            registry: None,
            kernels: [None, None, None],
        }
    }

    /// Sets the modules of `builder.role()`, replacing any earlier builder
    /// for that role.
    #[must_use]
    pub fn kernel(mut self, builder: KernelBuilder) -> Self {
        let role = builder.role();
        if self.kernels[role.index()].replace(builder).is_some() {
            tracing::warn!(role = %role, "kernel builder replaced");
        }
        self
    }

    /// Uses `root` as the shared service scope instead of an empty one.
    #[must_use]
    pub fn registry(mut self, root: Arc<Registry>) -> Self {
        self.registry = Some(root);
        self
    }

    /// Validates the config, wires the channels, builds and binds every
    /// active role's kernel.
    ///
    /// Every kernel is built (and its dependency order checked) before any
    /// module is bound.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Config`] for an invalid configuration,
    /// [`RuntimeError::Kernel`] if a role's modules cannot be ordered or bound.
    pub fn build(self) -> Result<Runtime, RuntimeError> {
        let Self {
            config,
            registry,
            mut kernels,
        } = self;

        config.validate()?;
        let active = config.active_roles()?;
        let root = registry.unwrap_or_else(Registry::root);
        let cancel = CancelSignal::new();

        let mut built: [Option<Kernel>; 3] = [None, None, None];
        for role in Role::ALL {
            let builder = kernels[role.index()].take();
            if !active.contains(role) {
                if builder.is_some() {
                    tracing::debug!(role = %role, "role inactive, modules dropped");
                }
                continue;
            }
            let builder = builder.unwrap_or_else(|| KernelBuilder::new(role));
            let kernel = builder
                .build(&config.clock)
                .map_err(|source| RuntimeError::Kernel { role, source })?;
            built[role.index()] = Some(kernel);
        }

        let scopes = Role::ALL.map(|_| root.child());
        offer_endpoints(&config, active, &scopes);

        let mut bound: [Option<BoundKernel>; 3] = [None, None, None];
        for (kernel, scope) in built.into_iter().zip(scopes) {
            let Some(kernel) = kernel else { continue };
            let role = kernel.role();
            let kernel = kernel
                .bind(Arc::clone(&scope), cancel.clone())
                .map_err(|source| RuntimeError::Kernel { role, source })?;
            if scope.pending_offers() > 0 {
                tracing::debug!(
                    role = %role,
                    unclaimed = scope.pending_offers(),
                    "channel endpoints left unclaimed"
                );
            }
            bound[role.index()] = Some(kernel);
        }

        tracing::info!(roles = ?active.iter().collect::<Vec<_>>(), "runtime built");
        Ok(Runtime {
            config,
            active,
            cancel,
            registry: root,
            kernels: bound,
        })
    }
}

/// Offers each active role's channel endpoints into that role's scope. Ends of
/// inactive roles are dropped here, which completes their rings.
fn offer_endpoints(config: &RuntimeConfig, active: RoleSet, scopes: &[Arc<Registry>; 3]) {
    let (main, game, render) = ChannelSet::new(&config.channels).into_views();

    if active.contains(Role::Main) {
        let scope = &scopes[Role::Main.index()];
        scope.offer(main.frames);
        scope.offer(main.input);
        scope.offer(main.render_control);
    }
    if active.contains(Role::Game) {
        let scope = &scopes[Role::Game.index()];
        scope.offer(game.frames);
        scope.offer(game.input);
        scope.offer(game.scene);
    }
    if active.contains(Role::Render) {
        let scope = &scopes[Role::Render.index()];
        scope.offer(render.scene);
        scope.offer(render.render_control);
    }
}

/// Result of [`Runtime::run`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunReport {
    /// Worst status across roles.
    pub status: ExitStatus,
    /// Per-role status, `None` for roles that did not run.
    pub roles: [(Role, Option<ExitStatus>); 3],
}

impl RunReport {
    /// Status of one role.
    #[must_use]
    pub fn role(&self, role: Role) -> Option<ExitStatus> {
        self.roles[role.index()].1
    }
}

/// A built runtime, ready to run.
pub struct Runtime {
    config: RuntimeConfig,
    active: RoleSet,
    cancel: CancelSignal,
    registry: Arc<Registry>,
    kernels: [Option<BoundKernel>; 3],
}

impl Runtime {
    /// Handle to the run's cancel signal, e.g. for a Ctrl-C handler.
    #[must_use]
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Root service scope.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Roles that will run.
    #[must_use]
    pub const fn active_roles(&self) -> RoleSet {
        self.active
    }

    /// The configuration the runtime was built from.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Runs every active role until all have stopped.
    ///
    /// Game and Render get their own threads; Main runs on the calling
    /// thread. Without a Main role the calling thread only waits.
    #[must_use]
    pub fn run(self) -> RunReport {
        let Runtime {
            config,
            cancel,
            kernels: [main, game, render],
            ..
        } = self;
        let mut roles = Role::ALL.map(|role| (role, None));

        let mut workers = Vec::with_capacity(2);
        for kernel in [game, render].into_iter().flatten() {
            let role = kernel.role();
            let loop_config = *config.role_loop(role);
            let signal = cancel.clone();
            let spawned = thread::Builder::new()
                .name(format!("triad-{role}"))
                .spawn(move || run_role(kernel, &loop_config, &signal, false));

            match spawned {
                Ok(handle) => workers.push((role, handle)),
                Err(err) => {
                    tracing::error!(role = %role, error = %err, "cannot spawn role thread");
                    cancel.cancel(CancelReason::Fault);
                    roles[role.index()].1 = Some(ExitStatus::Fatal);
                }
            }
        }

        if let Some(kernel) = main {
            let status = run_role(kernel, config.role_loop(Role::Main), &cancel, true);
            roles[Role::Main.index()].1 = Some(status);
        }

        for (role, handle) in workers {
            let status = handle.join().unwrap_or_else(|_| {
                tracing::error!(role = %role, "role thread died outside its loop");
                ExitStatus::Fatal
            });
            roles[role.index()].1 = Some(status);
        }

        let status = ExitStatus::worst(roles.iter().filter_map(|&(_, status)| status));
        tracing::info!(status = %status, "runtime stopped");
        RunReport { status, roles }
    }
}

/// Runs one role loop, raises the signal if needed, then drops the kernel.
fn run_role(
    mut kernel: BoundKernel,
    config: &RoleLoopConfig,
    cancel: &CancelSignal,
    coordinating: bool,
) -> ExitStatus {
    let role = kernel.role();
    let status = kernel.run(config);

    if status.is_failure() {
        if cancel.cancel(CancelReason::Fault) {
            tracing::warn!(role = %role, status = %status, "role failed, canceling the run");
        }
    } else if coordinating {
        cancel.cancel(CancelReason::Shutdown);
    }

    drop(kernel);
    status
}
