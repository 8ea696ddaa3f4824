//! Integration tests for the injection engine.
//!
//! Drive the full engine through the in-memory backend and check strategy
//! selection, fallback and argument handling end to end.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use keycast::devices::{DeviceDescriptor, DeviceKind};
use keycast::platform::msg::{WM_CHAR, WM_KEYDOWN, WM_KEYUP};
use keycast::platform::scripted::{Primitive, ScriptedBackend};
use keycast::platform::{SIMULATED_EVENT_MARKER, SyntheticInput};
use keycast::router::{KeyEvent, KeyRouter, Routed};
use keycast::strategy::InjectionContext;
use keycast::{
    EngineConfig, EngineError, EngineState, InjectionEngine, InjectionStrategy, KeyCode, KeyPhase,
    StaticRegistry, StrategyId, TargetWindow, WindowHandle,
};

/// Config with maintenance slow enough that it never ticks during a test.
fn quiet_config() -> EngineConfig {
    EngineConfig {
        maintenance_interval_ms: 60_000,
        inter_window_delay_ms: 0,
        press_duration_ms: 1,
        ..EngineConfig::default()
    }
}

fn engine_with(backend: &Arc<ScriptedBackend>, config: &EngineConfig) -> InjectionEngine {
    InjectionEngine::new(backend.clone(), StaticRegistry::new(vec![]), config)
        .expect("Failed to build engine")
}

/// Strategy with a fixed outcome that counts its invocations.
struct Counting {
    id: StrategyId,
    succeed: bool,
    calls: Arc<AtomicUsize>,
}

impl InjectionStrategy for Counting {
    fn id(&self) -> StrategyId {
        self.id
    }

    fn attempt(&self, _ctx: &InjectionContext<'_>, _key: KeyCode, _phase: KeyPhase) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.succeed
    }
}

/// Tests the mixed-family scenario: a D3D window resolves through the
/// render-surface strategy, an Edit window through the input-control one.
#[test]
fn test_broadcast_resolves_d3d_and_edit_windows() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.add_window(WindowHandle(0xA), "D3DWindowClass", 10);
    backend.add_window(WindowHandle(0xB), "Edit", 11);
    let engine = engine_with(&backend, &quiet_config());

    let windows = vec![
        TargetWindow::new(WindowHandle(0xA), 10),
        TargetWindow::new(WindowHandle(0xB), 11),
    ];
    let results = engine
        .broadcast_key(KeyCode::W, KeyPhase::Press, &windows)
        .expect("broadcast failed");

    assert_eq!(results.len(), 2);
    let a = &results[&WindowHandle(0xA)];
    let b = &results[&WindowHandle(0xB)];
    assert!(a.success && b.success);
    assert_eq!(a.strategy, Some(StrategyId::RenderSurface));
    assert_eq!(b.strategy, Some(StrategyId::InputControl));

    assert_eq!(backend.posted_to(WindowHandle(0xA)), vec![WM_KEYDOWN, WM_KEYUP]);
    assert_eq!(
        backend.posted_to(WindowHandle(0xB)),
        vec![WM_KEYDOWN, WM_CHAR, WM_KEYUP]
    );
    assert!(backend.injected().is_empty());
}

/// Tests that once strategy k succeeds, strategies after it never run.
#[test]
fn test_strategy_order_stops_at_first_success() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.add_window(WindowHandle(1), "Notepad", 3);

    let counters: Vec<Arc<AtomicUsize>> = (0..7).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let strategies: Vec<Box<dyn InjectionStrategy>> = StrategyId::ALL
        .into_iter()
        .zip(&counters)
        .map(|(id, calls)| {
            Box::new(Counting {
                id,
                succeed: id == StrategyId::ScanCode,
                calls: calls.clone(),
            }) as Box<dyn InjectionStrategy>
        })
        .collect();
    let engine = InjectionEngine::with_strategies(
        backend.clone(),
        StaticRegistry::new(vec![]),
        &quiet_config(),
        strategies,
    )
    .expect("Failed to build engine");

    assert!(engine.send_key_press(WindowHandle(1), KeyCode::W).unwrap());
    let calls: Vec<usize> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
    assert_eq!(calls, vec![1, 1, 1, 1, 1, 0, 0]);

    // The remembered strategy goes first next time.
    assert!(engine.send_key_press(WindowHandle(1), KeyCode::W).unwrap());
    let calls: Vec<usize> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
    assert_eq!(calls, vec![1, 1, 1, 1, 2, 0, 0]);
}

/// Tests that an empty device catalog only disables hardware tagging.
#[test]
fn test_empty_device_catalog_still_converges() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.add_window(WindowHandle(1), "Notepad", 3);
    backend.fail(Primitive::PostMessage);
    let config = EngineConfig {
        hardware_tagging: true,
        ..quiet_config()
    };
    let engine = engine_with(&backend, &config);
    assert!(engine.devices().is_empty());

    assert!(engine.send_key_press(WindowHandle(1), KeyCode::W).unwrap());
    assert!(
        backend
            .injected()
            .iter()
            .all(|i| matches!(i, SyntheticInput::Key { extra_info, .. } if *extra_info == SIMULATED_EVENT_MARKER))
    );

    // With every primitive failing the event is reported, not raised.
    backend.fail(Primitive::SendInput);
    backend.fail(Primitive::AttachThreadInput);
    assert!(!engine.send_key_press(WindowHandle(1), KeyCode::W).unwrap());
}

/// Tests that hardware tagging stamps the enumerated device's identity.
#[test]
fn test_hardware_tagging_uses_enumerated_device() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.add_window(WindowHandle(1), "Notepad", 3);
    backend.set_devices(vec![
        DeviceDescriptor::from_path(r"\\?\HID#VID_1532&PID_0084#6&1", DeviceKind::Mouse).unwrap(),
        DeviceDescriptor::from_path(r"\\?\HID#VID_046D&PID_C31C#7&2", DeviceKind::Keyboard)
            .unwrap(),
    ]);
    let config = EngineConfig {
        hardware_tagging: true,
        disabled_strategies: vec![
            "direct-message".to_string(),
            "input-control".to_string(),
            "render-surface".to_string(),
            "focus-bracket".to_string(),
            "scan-code".to_string(),
            "thread-attach".to_string(),
        ],
        ..quiet_config()
    };
    let engine = engine_with(&backend, &config);
    assert_eq!(engine.strategies(), vec![StrategyId::HardwareTagged]);
    assert_eq!(engine.devices().devices().len(), 2);

    assert!(engine.send_key_down(WindowHandle(1), KeyCode::W).unwrap());
    match backend.injected()[0] {
        SyntheticInput::Key { extra_info, .. } => assert_eq!(extra_info, 0x046D_C31C),
        other => panic!("unexpected input {other:?}"),
    }
    engine.shutdown();
}

/// Tests that device enumeration failure leaves the engine usable.
#[test]
fn test_device_enumeration_failure_is_not_fatal() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.fail(Primitive::EnumerateDevices);
    let engine = engine_with(&backend, &quiet_config());
    assert_eq!(engine.state(), EngineState::Ready);
    assert!(engine.devices().is_empty());
}

/// Tests that repeated classification reuses the cached profile.
#[test]
fn test_classification_is_cached_until_invalidated() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.add_window(WindowHandle(1), "Launcher", 3);
    backend.add_child(WindowHandle(1), WindowHandle(2), "Edit");
    let engine = engine_with(&backend, &quiet_config());

    engine.send_key_press(WindowHandle(1), KeyCode::A).unwrap();
    engine.send_key_press(WindowHandle(1), KeyCode::S).unwrap();
    assert_eq!(backend.child_enumerations(WindowHandle(1)), 1);

    assert!(engine.invalidate(WindowHandle(1)));
    engine.send_key_press(WindowHandle(1), KeyCode::D).unwrap();
    assert_eq!(backend.child_enumerations(WindowHandle(1)), 2);
}

/// Tests that only programming errors surface as `Err`.
#[test]
fn test_argument_errors_and_invalid_windows() {
    let backend = Arc::new(ScriptedBackend::new());
    let engine = engine_with(&backend, &quiet_config());

    assert!(matches!(
        engine.send_key_press(WindowHandle::NULL, KeyCode::W),
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        engine.send_key_down(WindowHandle(1), KeyCode(0)),
        Err(EngineError::InvalidArgument(_))
    ));

    // Unknown handle: a failed delivery, not an error.
    assert!(!engine.send_key_press(WindowHandle(77), KeyCode::W).unwrap());
    assert!(!engine.send_key_down(WindowHandle(77), KeyCode::W).unwrap());
    assert!(engine.tracked_windows().is_empty());
}

/// Tests that registry broadcasts only run while broadcasting is started.
#[test]
fn test_registry_broadcast_follows_start_and_stop() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.add_window(WindowHandle(1), "Notepad", 3);
    let registry = StaticRegistry::new(vec![TargetWindow::new(WindowHandle(1), 3)]);
    let engine = InjectionEngine::new(backend.clone(), registry, &quiet_config()).unwrap();

    assert!(engine.broadcast(KeyCode::W, KeyPhase::Down).unwrap().is_empty());

    engine.start_broadcast();
    assert!(engine.is_broadcasting());
    let results = engine.broadcast(KeyCode::W, KeyPhase::Down).unwrap();
    assert!(results[&WindowHandle(1)].success);
    assert_eq!(engine.held_keys(WindowHandle(1)).as_slice(), &[KeyCode::W]);

    assert_eq!(engine.stop_broadcast(), 1);
    assert!(!engine.is_broadcasting());
    assert!(engine.tracked_windows().is_empty());
}

/// Tests toggle handling and auto-repeat filtering in the key router.
#[test]
fn test_router_toggle_and_held_keys() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.add_window(WindowHandle(1), "Notepad", 3);
    let registry = StaticRegistry::new(vec![TargetWindow::new(WindowHandle(1), 3)]);
    let engine = Arc::new(InjectionEngine::new(backend.clone(), registry, &quiet_config()).unwrap());
    let mut router = KeyRouter::new(engine.clone(), KeyCode::SCROLL_LOCK, &[KeyCode::W]);

    assert_eq!(router.handle(KeyEvent::Pressed(KeyCode::W)), Routed::Ignored);
    router.handle(KeyEvent::Released(KeyCode::W));

    assert_eq!(
        router.handle(KeyEvent::Pressed(KeyCode::SCROLL_LOCK)),
        Routed::Toggled { broadcasting: true }
    );
    // Auto-repeat of the toggle key does not flip it back.
    assert_eq!(router.handle(KeyEvent::Pressed(KeyCode::SCROLL_LOCK)), Routed::Ignored);
    router.handle(KeyEvent::Released(KeyCode::SCROLL_LOCK));

    assert_eq!(
        router.handle(KeyEvent::Pressed(KeyCode::W)),
        Routed::Broadcast { key: KeyCode::W, phase: KeyPhase::Down, windows: 1 }
    );
    assert_eq!(router.handle(KeyEvent::Pressed(KeyCode::W)), Routed::Ignored);
    assert_eq!(
        router.handle(KeyEvent::Pressed(KeyCode::SPACE)),
        Routed::Broadcast { key: KeyCode::SPACE, phase: KeyPhase::Press, windows: 1 }
    );
    assert_eq!(
        router.handle(KeyEvent::Released(KeyCode::W)),
        Routed::Broadcast { key: KeyCode::W, phase: KeyPhase::Up, windows: 1 }
    );

    router.handle(KeyEvent::Pressed(KeyCode::W));
    assert_eq!(
        router.handle(KeyEvent::Pressed(KeyCode::SCROLL_LOCK)),
        Routed::Toggled { broadcasting: false }
    );
    assert!(engine.tracked_windows().is_empty());
    // Releasing after stop injects nothing further.
    assert_eq!(router.handle(KeyEvent::Released(KeyCode::W)), Routed::Ignored);
}

/// Tests that a press whose up edge cannot be injected is reported
/// delivered and does not escalate into a second down edge.
#[test]
fn test_lost_key_up_does_not_inject_second_down() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.add_window(WindowHandle(1), "Notepad", 3);
    backend.fail(Primitive::PostMessage);
    backend.fail_key_up_input();
    let engine = engine_with(&backend, &quiet_config());

    assert!(engine.send_key_press(WindowHandle(1), KeyCode::W).unwrap());

    let injected = backend.injected();
    let downs = injected.iter().filter(|i| !i.is_key_up()).count();
    assert_eq!(downs, 1);
    assert_eq!(injected.len(), 1);
}

/// Strategy that records how many callers are inside it at once.
struct Overlap {
    inside: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl InjectionStrategy for Overlap {
    fn id(&self) -> StrategyId {
        StrategyId::ScanCode
    }

    fn attempt(&self, _ctx: &InjectionContext<'_>, _key: KeyCode, _phase: KeyPhase) -> bool {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_micros(200));
        self.inside.fetch_sub(1, Ordering::SeqCst);
        true
    }
}

/// Tests that down/up calls for one window from different threads never
/// run inside the strategy chain at the same time.
#[test]
fn test_parallel_calls_for_one_window_never_interleave() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.add_window(WindowHandle(1), "Notepad", 3);
    let inside = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let strategies: Vec<Box<dyn InjectionStrategy>> = vec![Box::new(Overlap {
        inside: inside.clone(),
        peak: peak.clone(),
    })];
    let engine = InjectionEngine::with_strategies(
        backend.clone(),
        StaticRegistry::new(vec![]),
        &quiet_config(),
        strategies,
    )
    .expect("Failed to build engine");

    std::thread::scope(|s| {
        for key in [KeyCode::W, KeyCode::A, KeyCode::D] {
            let engine = &engine;
            s.spawn(move || {
                for _ in 0..20 {
                    assert!(engine.send_key_down(WindowHandle(1), key).unwrap());
                    assert!(engine.send_key_up(WindowHandle(1), key).unwrap());
                }
            });
        }
    });

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(engine.tracked_windows().is_empty());
}

/// Tests that a programmatic config is clamped like a loaded one.
#[test]
fn test_engine_clamps_out_of_range_config() {
    let backend = Arc::new(ScriptedBackend::new());
    let config = EngineConfig {
        maintenance_interval_ms: 0,
        press_duration_ms: 0,
        message_timeout_ms: 0,
        ..EngineConfig::default()
    };
    let engine = engine_with(&backend, &config);

    assert_eq!(
        engine.maintenance_interval(),
        Some(std::time::Duration::from_millis(10))
    );
    assert_eq!(engine.timing().press_duration, std::time::Duration::from_millis(1));
    assert_eq!(engine.timing().message_timeout, std::time::Duration::from_millis(10));

    engine.shutdown();
    assert_eq!(engine.maintenance_interval(), None);
}
