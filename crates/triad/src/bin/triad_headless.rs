//! # TRIAD Headless
//!
//! Runs the full Main → Game → Render pipeline without a window or GPU and
//! prints what each role saw.
//!
//! ```bash
//! # Defaults: editor launch, 240 frames on Main at 120 Hz
//! ./triad_headless
//!
//! # Custom config
//! ./triad_headless triad.toml
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use triad::{
    BindContext, ControlDrainer, ControlPoster, ExitStatus, FrameStart, InputSnapshot,
    KernelBuilder, Module, ModuleError, ModuleResult, Phase, PhaseContext, PhaseMask,
    RenderControl, RenderControlKind, RingReader, RingWriter, Role, RoleSet, RuntimeBuilder,
    RuntimeConfig, SceneView, SnapshotPublisher, SnapshotReader,
};

/// Counters shared through the root registry.
#[derive(Default)]
struct PipelineStats {
    frames_sent: AtomicU64,
    inputs_dropped: AtomicU64,
    frames_simulated: AtomicU64,
    fixed_steps: AtomicU64,
    inputs_seen: AtomicU64,
    views_presented: AtomicU64,
    commands_applied: AtomicU64,
}

fn stats(cx: &BindContext<'_>) -> Result<Arc<PipelineStats>, ModuleError> {
    cx.services()
        .get::<PipelineStats>()
        .ok_or_else(|| ModuleError::Fatal("pipeline stats missing".into()))
}

fn claim<T: Send + 'static>(cx: &BindContext<'_>, what: &str) -> Result<T, ModuleError> {
    cx.claim::<T>()
        .ok_or_else(|| ModuleError::Fatal(format!("{} endpoint not offered to {}", what, cx.role())))
}

// =============================================================================
// MAIN: frame pacing + synthetic input
// =============================================================================

#[derive(Default)]
struct FrameDriver {
    frames: Option<RingWriter<FrameStart>>,
    input: Option<RingWriter<InputSnapshot>>,
    render_control: Option<ControlPoster<RenderControl>>,
    stats: Arc<PipelineStats>,
    frame_id: u64,
}

impl Module for FrameDriver {
    fn phases() -> PhaseMask {
        PhaseMask::of(&[Phase::Start, Phase::Update])
    }

    fn name(&self) -> &'static str {
        "FrameDriver"
    }

    fn bind(&mut self, cx: &BindContext<'_>) -> ModuleResult {
        self.frames = Some(claim(cx, "frame")?);
        self.input = Some(claim(cx, "input")?);
        self.render_control = Some(claim(cx, "render control")?);
        self.stats = stats(cx)?;
        Ok(())
    }

    fn start(&mut self, _cx: &mut PhaseContext<'_>) -> ModuleResult {
        if let Some(control) = &self.render_control {
            control.post(RenderControl::resize(1280, 720));
            control.post(RenderControl::resize(1920, 1080));
            control.post(RenderControl::signal(RenderControlKind::Reload));
        }
        Ok(())
    }

    fn update(&mut self, cx: &mut PhaseContext<'_>) -> ModuleResult {
        self.frame_id += 1;
        let delta = cx.clock().delta();

        if let Some(input) = self.input.as_mut() {
            let snapshot = InputSnapshot {
                frame_id: self.frame_id,
                buttons: self.frame_id % 4,
                pointer: [self.frame_id as f32, 0.0],
                scroll: [0.0; 2],
            };
            if input.try_write(snapshot).is_err() {
                self.stats.inputs_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Some(frames) = self.frames.as_mut() {
            frames.write(
                FrameStart {
                    frame_id: self.frame_id,
                    delta,
                },
                cx.cancel(),
            )?;
            self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

// =============================================================================
// GAME: consume frames, step the simulation, publish the scene
// =============================================================================

#[derive(Default)]
struct Simulation {
    frames: Option<RingReader<FrameStart>>,
    input: Option<RingReader<InputSnapshot>>,
    scene: Option<SnapshotPublisher<SceneView>>,
    stats: Arc<PipelineStats>,
    entities: u32,
}

impl Module for Simulation {
    fn phases() -> PhaseMask {
        PhaseMask::of(&[Phase::FixedUpdate, Phase::Update])
    }

    fn name(&self) -> &'static str {
        "Simulation"
    }

    fn bind(&mut self, cx: &BindContext<'_>) -> ModuleResult {
        self.frames = Some(claim(cx, "frame")?);
        self.input = Some(claim(cx, "input")?);
        self.scene = Some(claim(cx, "scene")?);
        self.stats = stats(cx)?;
        Ok(())
    }

    fn fixed_update(&mut self, _cx: &mut PhaseContext<'_>) -> ModuleResult {
        self.entities = self.entities.saturating_add(1).min(10_000);
        self.stats.fixed_steps.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn update(&mut self, cx: &mut PhaseContext<'_>) -> ModuleResult {
        let frame = match self.frames.as_mut() {
            Some(frames) => frames.read(cx.cancel())?,
            None => return Ok(()),
        };

        if let Some(input) = self.input.as_mut() {
            let seen = input.drain(usize::MAX, |_| {});
            self.stats.inputs_seen.fetch_add(seen as u64, Ordering::Relaxed);
        }

        if let Some(scene) = self.scene.as_mut() {
            scene.publish(SceneView {
                frame_id: frame.frame_id,
                interpolation_alpha: cx.clock().fixed_alpha() as f32,
                entity_count: self.entities,
            });
        }
        self.stats.frames_simulated.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// =============================================================================
// RENDER: present the latest scene, apply window commands
// =============================================================================

#[derive(Default)]
struct Presenter {
    scene: Option<SnapshotReader<SceneView>>,
    control: Option<ControlDrainer<RenderControl>>,
    stats: Arc<PipelineStats>,
    last_version: u64,
    surface: (u32, u32),
}

impl Module for Presenter {
    fn phases() -> PhaseMask {
        PhaseMask::of(&[Phase::PreUpdate, Phase::Update, Phase::Shutdown])
    }

    fn name(&self) -> &'static str {
        "Presenter"
    }

    fn bind(&mut self, cx: &BindContext<'_>) -> ModuleResult {
        self.scene = Some(claim(cx, "scene")?);
        self.control = Some(claim(cx, "render control")?);
        self.stats = stats(cx)?;
        Ok(())
    }

    fn pre_update(&mut self, _cx: &mut PhaseContext<'_>) -> ModuleResult {
        let Some(control) = self.control.as_mut() else {
            return Ok(());
        };
        let surface = &mut self.surface;
        let applied = control.drain(|command| {
            if command.kind == RenderControlKind::Resize {
                *surface = (command.width, command.height);
            }
        });
        self.stats.commands_applied.fetch_add(applied as u64, Ordering::Relaxed);
        Ok(())
    }

    fn update(&mut self, _cx: &mut PhaseContext<'_>) -> ModuleResult {
        if let Some((_, version)) = self.scene.as_ref().and_then(|s| s.read_if_newer(self.last_version)) {
            self.last_version = version;
            self.stats.views_presented.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn shutdown(&mut self, _cx: &mut PhaseContext<'_>) -> ModuleResult {
        println!("   Render surface at exit: {}x{}", self.surface.0, self.surface.1);
        Ok(())
    }
}

fn load_config() -> RuntimeConfig {
    match std::env::args().nth(1) {
        Some(path) => match RuntimeConfig::from_file(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("   ✗ FATAL: {err}");
                std::process::exit(2);
            }
        },
        None => {
            let mut config = RuntimeConfig::default();
            config.main.target_hz = Some(120);
            config.main.max_frames = Some(240);
            config.render.target_hz = Some(240);
            config
        }
    }
}

fn describe(roles: RoleSet) -> String {
    roles.iter().map(Role::name).collect::<Vec<_>>().join(", ")
}

fn main() {
    println!("═══════════════════════════════════════════════════════════════════");
    println!("                    TRIAD HEADLESS v{}", env!("CARGO_PKG_VERSION"));
    println!("═══════════════════════════════════════════════════════════════════");
    println!();

    let config = load_config();
    let stats = Arc::new(PipelineStats::default());
    let root = triad::Registry::root();
    root.insert_arc(Arc::clone(&stats));

    let runtime = RuntimeBuilder::new(config)
        .registry(root)
        .kernel(KernelBuilder::new(Role::Main).with(FrameDriver::default()))
        .kernel(KernelBuilder::new(Role::Game).with(Simulation::default()))
        .kernel(KernelBuilder::new(Role::Render).with(Presenter::default()))
        .build();

    let runtime = match runtime {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("   ✗ FATAL: {err}");
            std::process::exit(2);
        }
    };

    println!("   Roles: {}", describe(runtime.active_roles()));
    let started = Instant::now();
    let report = runtime.run();
    let elapsed = started.elapsed();

    println!();
    println!("   Frames sent:       {}", stats.frames_sent.load(Ordering::Relaxed));
    println!("   Inputs dropped:    {}", stats.inputs_dropped.load(Ordering::Relaxed));
    println!("   Frames simulated:  {}", stats.frames_simulated.load(Ordering::Relaxed));
    println!("   Fixed steps:       {}", stats.fixed_steps.load(Ordering::Relaxed));
    println!("   Inputs seen:       {}", stats.inputs_seen.load(Ordering::Relaxed));
    println!("   Views presented:   {}", stats.views_presented.load(Ordering::Relaxed));
    println!("   Commands applied:  {}", stats.commands_applied.load(Ordering::Relaxed));
    println!("   Wall time:         {:.3}s", elapsed.as_secs_f64());
    println!();
    for (role, status) in report.roles {
        match status {
            Some(status) => println!("   {role:<8} {status}"),
            None => println!("   {role:<8} (inactive)"),
        }
    }
    println!();
    println!("   Exit status: {}", report.status);

    if report.status != ExitStatus::Ok {
        std::process::exit(report.status.exit_code());
    }
}
