//! # Runtime Integration Tests
//!
//! Full multi-thread runs of the three roles:
//!
//! 1. **Pipeline**: frames flow Main → Game → Render in order
//! 2. **Launch modes**: inactive roles do not run, their channel ends close
//! 3. **Faults**: one failing role cancels the others, worst status wins
//! 4. **Configuration**: bad module graphs and claims fail before any run
//!
//! Run with: cargo test -p triad --test runtime_test -- --nocapture

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use triad::{
    BindContext, CancelReason, ChannelError, ControlDrainer, ControlPoster, ExitStatus,
    FrameStart, InputSnapshot, KernelBuilder, KernelError, LaunchMode, Module, ModuleError,
    ModuleId, ModuleResult, Phase, PhaseContext, PhaseMask, Registry, RenderControl,
    RenderControlKind, RingReader, RingWriter, Role, Runtime, RuntimeBuilder, RuntimeConfig,
    RuntimeError, SceneView, SnapshotPublisher, SnapshotReader,
};

// ============================================================================
// SHARED OBSERVATIONS
// ============================================================================

/// Everything the test modules saw. Lives in the root registry.
#[derive(Default)]
struct Observed {
    binds: Mutex<Vec<&'static str>>,
    frames_seen: Mutex<Vec<u64>>,
    inputs_seen: Mutex<Vec<u64>>,
    inputs_dropped: Mutex<u64>,
    versions: Mutex<Vec<u64>>,
    scene_frames: Mutex<Vec<u64>>,
    commands: Mutex<Vec<RenderControl>>,
    ticks: Mutex<u64>,
    closed_on_arrival: Mutex<Option<bool>>,
}

fn observed(cx: &BindContext<'_>, module: &'static str) -> Arc<Observed> {
    let observed = cx
        .services()
        .get::<Observed>()
        .expect("Observed is registered in the root scope");
    observed.binds.lock().push(module);
    observed
}

// ============================================================================
// TEST MODULES
// ============================================================================

/// Main: writes one frame per update and a random burst of input.
struct Driver {
    frames: Option<RingWriter<FrameStart>>,
    input: Option<RingWriter<InputSnapshot>>,
    control: Option<ControlPoster<RenderControl>>,
    observed: Option<Arc<Observed>>,
    rng: StdRng,
    frame_id: u64,
}

impl Driver {
    fn new() -> Self {
        Self {
            frames: None,
            input: None,
            control: None,
            observed: None,
            rng: StdRng::seed_from_u64(0x7121_AD00),
            frame_id: 0,
        }
    }
}

impl Module for Driver {
    fn phases() -> PhaseMask {
        PhaseMask::of(&[Phase::Start, Phase::Update])
    }

    fn name(&self) -> &'static str {
        "Driver"
    }

    fn bind(&mut self, cx: &BindContext<'_>) -> ModuleResult {
        self.frames = cx.claim();
        self.input = cx.claim();
        self.control = cx.claim();
        self.observed = Some(observed(cx, "Driver"));
        Ok(())
    }

    fn start(&mut self, _cx: &mut PhaseContext<'_>) -> ModuleResult {
        let control = self.control.as_ref().expect("render control claimed");
        control.post(RenderControl::resize(1280, 720));
        control.post(RenderControl::resize(1920, 1080));
        control.post(RenderControl::signal(RenderControlKind::Reload));
        Ok(())
    }

    fn update(&mut self, cx: &mut PhaseContext<'_>) -> ModuleResult {
        self.frame_id += 1;

        let input = self.input.as_mut().expect("input claimed");
        for _ in 0..self.rng.gen_range(0..=3) {
            let snapshot = InputSnapshot {
                frame_id: self.frame_id,
                ..Default::default()
            };
            match input.write(snapshot, cx.cancel()) {
                Ok(()) => {}
                Err(ChannelError::Full) => {
                    if let Some(observed) = &self.observed {
                        *observed.inputs_dropped.lock() += 1;
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        let frames = self.frames.as_mut().expect("frames claimed");
        frames.write(
            FrameStart {
                frame_id: self.frame_id,
                delta: cx.clock().delta(),
            },
            cx.cancel(),
        )?;
        Ok(())
    }
}

/// Game: one blocking frame read per update, then publish.
struct Sim {
    frames: Option<RingReader<FrameStart>>,
    input: Option<RingReader<InputSnapshot>>,
    scene: Option<SnapshotPublisher<SceneView>>,
    observed: Option<Arc<Observed>>,
    fail_at: Option<(u64, ModuleError)>,
    updates: u64,
}

impl Sim {
    fn new() -> Self {
        Self {
            frames: None,
            input: None,
            scene: None,
            observed: None,
            fail_at: None,
            updates: 0,
        }
    }

    fn failing_at(update: u64, error: ModuleError) -> Self {
        Self {
            fail_at: Some((update, error)),
            ..Self::new()
        }
    }
}

impl Module for Sim {
    fn phases() -> PhaseMask {
        PhaseMask::of(&[Phase::Update])
    }

    fn name(&self) -> &'static str {
        "Sim"
    }

    fn bind(&mut self, cx: &BindContext<'_>) -> ModuleResult {
        self.frames = cx.claim();
        self.input = cx.claim();
        self.scene = cx.claim();
        self.observed = Some(observed(cx, "Sim"));
        Ok(())
    }

    fn update(&mut self, cx: &mut PhaseContext<'_>) -> ModuleResult {
        self.updates += 1;
        if let Some((at, error)) = &self.fail_at {
            if *at == self.updates {
                return Err(error.clone());
            }
        }

        let frame = self.frames.as_mut().expect("frames claimed").read(cx.cancel())?;
        let observed = self.observed.as_ref().expect("bound");
        observed.frames_seen.lock().push(frame.frame_id);

        let mut inputs = observed.inputs_seen.lock();
        self.input
            .as_mut()
            .expect("input claimed")
            .drain(usize::MAX, |input| inputs.push(input.frame_id));
        drop(inputs);

        self.scene.as_mut().expect("scene claimed").publish(SceneView {
            frame_id: frame.frame_id,
            interpolation_alpha: cx.clock().fixed_alpha() as f32,
            entity_count: 1,
        });
        Ok(())
    }
}

/// Render: present newer scenes, apply commands.
struct Present {
    scene: Option<SnapshotReader<SceneView>>,
    control: Option<ControlDrainer<RenderControl>>,
    observed: Option<Arc<Observed>>,
    last_version: u64,
    panic_at: Option<u64>,
    updates: u64,
}

impl Present {
    fn new() -> Self {
        Self {
            scene: None,
            control: None,
            observed: None,
            last_version: 0,
            panic_at: None,
            updates: 0,
        }
    }
}

impl Module for Present {
    fn phases() -> PhaseMask {
        PhaseMask::of(&[Phase::PreUpdate, Phase::Update])
    }

    fn name(&self) -> &'static str {
        "Present"
    }

    fn bind(&mut self, cx: &BindContext<'_>) -> ModuleResult {
        self.scene = cx.claim();
        self.control = cx.claim();
        self.observed = Some(observed(cx, "Present"));
        Ok(())
    }

    fn pre_update(&mut self, _cx: &mut PhaseContext<'_>) -> ModuleResult {
        let observed = self.observed.as_ref().expect("bound");
        let mut commands = observed.commands.lock();
        self.control
            .as_mut()
            .expect("render control claimed")
            .drain(|command| commands.push(command));
        Ok(())
    }

    fn update(&mut self, _cx: &mut PhaseContext<'_>) -> ModuleResult {
        self.updates += 1;
        if self.panic_at == Some(self.updates) {
            panic!("present failed on update {}", self.updates);
        }

        let scene = self.scene.as_ref().expect("scene claimed");
        if let Some((view, version)) = scene.read_if_newer(self.last_version) {
            self.last_version = version;
            let observed = self.observed.as_ref().expect("bound");
            observed.versions.lock().push(version);
            observed.scene_frames.lock().push(view.frame_id);
        }
        Ok(())
    }
}

/// Game without a Main role: counts updates, checks the frame ring.
struct Ticker {
    frames: Option<RingReader<FrameStart>>,
    observed: Option<Arc<Observed>>,
}

impl Module for Ticker {
    fn phases() -> PhaseMask {
        PhaseMask::of(&[Phase::Start, Phase::Update])
    }

    fn bind(&mut self, cx: &BindContext<'_>) -> ModuleResult {
        self.frames = cx.claim();
        self.observed = Some(observed(cx, "Ticker"));
        Ok(())
    }

    fn start(&mut self, _cx: &mut PhaseContext<'_>) -> ModuleResult {
        let frames = self.frames.as_mut().expect("frames claimed");
        let closed = frames.channel().is_completed() && frames.try_read().is_none();
        *self.observed.as_ref().expect("bound").closed_on_arrival.lock() = Some(closed);
        Ok(())
    }

    fn update(&mut self, _cx: &mut PhaseContext<'_>) -> ModuleResult {
        *self.observed.as_ref().expect("bound").ticks.lock() += 1;
        Ok(())
    }
}

struct CycleA;
struct CycleB;

impl Module for CycleA {
    fn phases() -> PhaseMask {
        PhaseMask::ALL
    }

    fn dependencies() -> Vec<ModuleId> {
        vec![ModuleId::of::<CycleB>()]
    }

    fn bind(&mut self, cx: &BindContext<'_>) -> ModuleResult {
        observed(cx, "CycleA");
        Ok(())
    }
}

impl Module for CycleB {
    fn phases() -> PhaseMask {
        PhaseMask::ALL
    }

    fn dependencies() -> Vec<ModuleId> {
        vec![ModuleId::of::<CycleA>()]
    }
}

/// Render module that wants Main's frame writer.
struct Trespasser;

impl Module for Trespasser {
    fn phases() -> PhaseMask {
        PhaseMask::NONE
    }

    fn name(&self) -> &'static str {
        "Trespasser"
    }

    fn bind(&mut self, cx: &BindContext<'_>) -> ModuleResult {
        cx.claim::<RingWriter<FrameStart>>()
            .map(drop)
            .ok_or_else(|| ModuleError::Fatal("frame writer belongs to main".into()))
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn runtime(config: RuntimeConfig, game: Sim, render: Present) -> (Runtime, Arc<Observed>) {
    let observed = Arc::new(Observed::default());
    let root = Registry::root();
    root.insert_arc(Arc::clone(&observed));

    let runtime = RuntimeBuilder::new(config)
        .registry(root)
        .kernel(KernelBuilder::new(Role::Main).with(Driver::new()))
        .kernel(KernelBuilder::new(Role::Game).with(game))
        .kernel(KernelBuilder::new(Role::Render).with(render))
        .build()
        .expect("runtime builds");
    (runtime, observed)
}

fn paced_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.main.target_hz = Some(500);
    config.render.target_hz = Some(1000);
    config
}

// ============================================================================
// PIPELINE
// ============================================================================

#[test]
fn test_three_role_pipeline() {
    let mut config = paced_config();
    config.main.max_frames = Some(64);

    let (runtime, observed) = runtime(config, Sim::new(), Present::new());
    let report = runtime.run();

    assert_eq!(report.status, ExitStatus::Ok);
    for role in Role::ALL {
        assert_eq!(report.role(role), Some(ExitStatus::Ok), "{role}");
    }
    assert_eq!(*observed.binds.lock(), vec!["Driver", "Sim", "Present"]);

    // Game sees a gap-free prefix of Main's frames. Main cannot finish
    // 64 blocking writes into a 4-slot ring unless Game read at least 60.
    let frames = observed.frames_seen.lock().clone();
    assert!(frames.len() >= 60, "game saw {} frames", frames.len());
    assert!(frames.iter().copied().eq(1..=frames.len() as u64));

    // Input arrives in order. Some may be dropped, none duplicated.
    let inputs = observed.inputs_seen.lock().clone();
    assert!(inputs.windows(2).all(|w| w[0] <= w[1]));
    assert!(!inputs.is_empty());

    // Render sees increasing versions of increasing frames.
    let versions = observed.versions.lock().clone();
    assert!(!versions.is_empty());
    assert!(versions.windows(2).all(|w| w[0] < w[1]));
    let scene_frames = observed.scene_frames.lock().clone();
    assert!(scene_frames.windows(2).all(|w| w[0] <= w[1]));
    assert!(scene_frames.iter().all(|&id| id <= 64));

    // Both resizes coalesce or apply in order; reload applies once.
    let commands = observed.commands.lock().clone();
    let reloads = commands
        .iter()
        .filter(|c| c.kind == RenderControlKind::Reload)
        .count();
    assert_eq!(reloads, 1);
    let last_resize = commands
        .iter()
        .filter(|c| c.kind == RenderControlKind::Resize)
        .last()
        .copied();
    assert_eq!(last_resize, Some(RenderControl::resize(1920, 1080)));
}

#[test]
fn test_dedicated_server_runs_game_only() {
    let mut config = RuntimeConfig::default();
    config.launch.mode = LaunchMode::DedicatedServer;
    config.game.max_frames = Some(20);

    let observed = Arc::new(Observed::default());
    let root = Registry::root();
    root.insert_arc(Arc::clone(&observed));

    let report = RuntimeBuilder::new(config)
        .registry(root)
        .kernel(KernelBuilder::new(Role::Main).with(Driver::new()))
        .kernel(KernelBuilder::new(Role::Game).with(Ticker {
            frames: None,
            observed: None,
        }))
        .kernel(KernelBuilder::new(Role::Render).with(Present::new()))
        .build()
        .expect("runtime builds")
        .run();

    assert_eq!(report.status, ExitStatus::Ok);
    assert_eq!(report.role(Role::Main), None);
    assert_eq!(report.role(Role::Game), Some(ExitStatus::Ok));
    assert_eq!(report.role(Role::Render), None);

    assert_eq!(*observed.binds.lock(), vec!["Ticker"]);
    assert_eq!(*observed.ticks.lock(), 20);
    // No Main: the frame writer was dropped at build time.
    assert_eq!(*observed.closed_on_arrival.lock(), Some(true));
}

#[test]
fn test_custom_launch_from_file() {
    let path = std::env::temp_dir().join(format!("triad_runtime_test_{}.toml", std::process::id()));
    std::fs::write(
        &path,
        r#"
        [launch]
        mode = "custom"
        roles = ["game", "render"]

        [game]
        max_frames = 5

        [render]
        max_frames = 5
        "#,
    )
    .expect("temp dir is writable");

    let config = RuntimeConfig::from_file(&path);
    let _ = std::fs::remove_file(&path);
    let report = RuntimeBuilder::new(config.expect("config parses"))
        .build()
        .expect("runtime builds")
        .run();

    assert_eq!(report.status, ExitStatus::Ok);
    assert_eq!(report.role(Role::Main), None);
    assert_eq!(report.role(Role::Game), Some(ExitStatus::Ok));
    assert_eq!(report.role(Role::Render), Some(ExitStatus::Ok));
}

// ============================================================================
// FAULTS
// ============================================================================

#[test]
fn test_fatal_game_cancels_other_roles() {
    let (runtime, observed) = runtime(
        paced_config(),
        Sim::failing_at(5, ModuleError::Fatal("simulation diverged".into())),
        Present::new(),
    );
    let cancel = runtime.cancel_signal();
    let report = runtime.run();

    assert_eq!(report.status, ExitStatus::Fatal);
    assert_eq!(report.role(Role::Game), Some(ExitStatus::Fatal));
    assert_eq!(report.role(Role::Main), Some(ExitStatus::Canceled));
    assert_eq!(report.role(Role::Render), Some(ExitStatus::Canceled));
    assert_eq!(cancel.reason(), Some(CancelReason::Fault));
    assert_eq!(observed.frames_seen.lock().len(), 4);
}

#[test]
fn test_recoverable_game_aggregates_to_recoverable() {
    let (runtime, _observed) = runtime(
        paced_config(),
        Sim::failing_at(3, ModuleError::Recoverable("save slot busy".into())),
        Present::new(),
    );
    let report = runtime.run();

    assert_eq!(report.role(Role::Game), Some(ExitStatus::Recoverable));
    assert_eq!(report.role(Role::Main), Some(ExitStatus::Canceled));
    assert_eq!(report.status, ExitStatus::Recoverable);
    assert_ne!(report.status.exit_code(), 0);
}

#[test]
fn test_render_panic_is_fatal() {
    let mut present = Present::new();
    present.panic_at = Some(3);

    let (runtime, _observed) = runtime(paced_config(), Sim::new(), present);
    let report = runtime.run();

    assert_eq!(report.role(Role::Render), Some(ExitStatus::Fatal));
    assert_eq!(report.role(Role::Main), Some(ExitStatus::Canceled));
    assert_eq!(report.role(Role::Game), Some(ExitStatus::Canceled));
    assert_eq!(report.status, ExitStatus::Fatal);
}

#[test]
fn test_user_cancel_stops_every_role() {
    let (runtime, _observed) = runtime(paced_config(), Sim::new(), Present::new());
    let cancel = runtime.cancel_signal();

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        cancel.cancel(CancelReason::User);
    });
    let report = runtime.run();
    canceller.join().unwrap();

    for role in Role::ALL {
        assert_eq!(report.role(role), Some(ExitStatus::Canceled), "{role}");
    }
    assert_eq!(report.status, ExitStatus::Canceled);
    assert_eq!(report.status.exit_code(), 0);
}

// ============================================================================
// CONFIGURATION FAULTS
// ============================================================================

#[test]
fn test_cycle_rejected_before_any_module_runs() {
    let observed = Arc::new(Observed::default());
    let root = Registry::root();
    root.insert_arc(Arc::clone(&observed));

    let result = RuntimeBuilder::new(RuntimeConfig::default())
        .registry(root)
        .kernel(KernelBuilder::new(Role::Main).with(Driver::new()))
        .kernel(KernelBuilder::new(Role::Game).with(CycleA).with(CycleB))
        .build();

    match result {
        Err(RuntimeError::Kernel {
            role: Role::Game,
            source: KernelError::DependencyCycle { modules },
        }) => assert_eq!(modules.len(), 2),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("cycle accepted"),
    }
    // Main's kernel was valid, but nothing was bound.
    assert!(observed.binds.lock().is_empty());
}

#[test]
fn test_roles_cannot_claim_other_roles_endpoints() {
    let result = RuntimeBuilder::new(RuntimeConfig::default())
        .kernel(KernelBuilder::new(Role::Render).with(Trespasser))
        .build();

    assert!(matches!(
        result,
        Err(RuntimeError::Kernel {
            role: Role::Render,
            source: KernelError::Bind {
                module: "Trespasser",
                ..
            },
        })
    ));
}
