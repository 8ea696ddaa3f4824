//! Message-based delivery: keyboard messages posted straight into a
//! window's queue. Cheapest techniques, tried first.

use tracing::{debug, warn};

use super::{InjectionContext, InjectionStrategy, StrategyId};
use crate::error::Result;
use crate::keys::{KeyCode, KeyPhase, key_message_lparam};
use crate::platform::msg::{WM_CHAR, WM_KEYDOWN, WM_KEYUP};
use crate::window::WindowHandle;

/// How key messages reach the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Channel {
    /// Queued with `PostMessage`.
    Posted,
    /// Sent synchronously; ordered with every other sent message.
    Sent,
}

fn emit(
    ctx: &InjectionContext<'_>,
    channel: Channel,
    target: WindowHandle,
    msg: u32,
    wparam: usize,
    lparam: isize,
) -> Result<()> {
    match channel {
        Channel::Posted => ctx.backend.post_message(target, msg, wparam, lparam),
        Channel::Sent => ctx
            .backend
            .send_message_timeout(target, msg, wparam, lparam, ctx.timing.message_timeout)
            .map(|_| ()),
    }
}

/// Delivers the messages for one key event to `target`.
///
/// The outcome is decided by the first message. A press whose up edge fails
/// is still reported delivered, since the down edge already reached the
/// window.
pub(super) fn key_messages(
    ctx: &InjectionContext<'_>,
    channel: Channel,
    target: WindowHandle,
    key: KeyCode,
    phase: KeyPhase,
    with_char: bool,
) -> Result<()> {
    let scan = ctx.scan_code(key);
    let extended = key.is_extended();
    let wparam = key.vk() as usize;
    let down = key_message_lparam(scan, extended, false);
    let up = key_message_lparam(scan, extended, true);

    match phase {
        KeyPhase::Down => emit(ctx, channel, target, WM_KEYDOWN, wparam, down),
        KeyPhase::Up => emit(ctx, channel, target, WM_KEYUP, wparam, up),
        KeyPhase::Press => {
            emit(ctx, channel, target, WM_KEYDOWN, wparam, down)?;
            if with_char && let Some(c) = key.as_char() {
                let _ = emit(ctx, channel, target, WM_CHAR, c as usize, down);
            }
            if let Err(e) = emit(ctx, channel, target, WM_KEYUP, wparam, up) {
                warn!(hwnd = %target, key = %key, error = %e, "key up message lost");
            }
            Ok(())
        }
    }
}

/// Posts to every target; succeeds when at least one accepted the event.
fn post_to_any(
    ctx: &InjectionContext<'_>,
    targets: &[WindowHandle],
    key: KeyCode,
    phase: KeyPhase,
    with_char: bool,
) -> bool {
    let mut delivered = false;
    for &target in targets {
        match key_messages(ctx, Channel::Posted, target, key, phase, with_char) {
            Ok(()) => delivered = true,
            Err(e) => debug!(hwnd = %target, error = %e, "message to descendant failed"),
        }
    }
    delivered
}

/// Strategy 1: key messages to the main window of a plain message-driven UI.
pub struct DirectMessage;

impl InjectionStrategy for DirectMessage {
    fn id(&self) -> StrategyId {
        StrategyId::DirectMessage
    }

    fn attempt(&self, ctx: &InjectionContext<'_>, key: KeyCode, phase: KeyPhase) -> bool {
        let profile = ctx.profile;
        if !profile.is_message_driven() || !profile.input_controls().is_empty() {
            return false;
        }
        key_messages(ctx, Channel::Posted, ctx.window(), key, phase, true).is_ok()
    }
}

/// Strategy 2: key messages to input-capable controls (edit, static,
/// button, combo).
pub struct InputControlMessage;

impl InjectionStrategy for InputControlMessage {
    fn id(&self) -> StrategyId {
        StrategyId::InputControl
    }

    fn attempt(&self, ctx: &InjectionContext<'_>, key: KeyCode, phase: KeyPhase) -> bool {
        let controls = ctx.profile.input_controls();
        !controls.is_empty() && post_to_any(ctx, &controls, key, phase, true)
    }
}

/// Strategy 3: key messages to rendering / game surfaces.
pub struct RenderSurfaceMessage;

impl InjectionStrategy for RenderSurfaceMessage {
    fn id(&self) -> StrategyId {
        StrategyId::RenderSurface
    }

    fn attempt(&self, ctx: &InjectionContext<'_>, key: KeyCode, phase: KeyPhase) -> bool {
        let surfaces = ctx.profile.render_surfaces();
        !surfaces.is_empty() && post_to_any(ctx, &surfaces, key, phase, false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::classifier::ProcessClassifier;
    use crate::devices::DeviceCatalog;
    use crate::platform::scripted::{BackendCall, ScriptedBackend};
    use crate::strategy::Timing;

    fn run(
        backend: &Arc<ScriptedBackend>,
        strategy: &dyn InjectionStrategy,
        window: WindowHandle,
        phase: KeyPhase,
    ) -> bool {
        let classifier = ProcessClassifier::new(backend.clone());
        let profile = classifier.classify(window).unwrap();
        let devices = DeviceCatalog::default();
        let ctx = InjectionContext {
            backend: backend.as_ref(),
            profile: &profile,
            devices: &devices,
            timing: Timing::default(),
        };
        strategy.attempt(&ctx, KeyCode::W, phase)
    }

    #[test]
    fn test_direct_message_press_sequence() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.add_window(WindowHandle(1), "Notepad", 3);

        assert!(run(&backend, &DirectMessage, WindowHandle(1), KeyPhase::Press));
        assert_eq!(
            backend.posted_to(WindowHandle(1)),
            vec![WM_KEYDOWN, WM_CHAR, WM_KEYUP]
        );
        match &backend.calls()[1] {
            BackendCall::PostMessage { wparam, .. } => assert_eq!(*wparam, 'w' as usize),
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn test_direct_message_skips_game_windows() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.add_window(WindowHandle(1), "D3DWindow", 3);

        assert!(!run(&backend, &DirectMessage, WindowHandle(1), KeyPhase::Down));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_input_control_targets_edit_descendant() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.add_window(WindowHandle(1), "Launcher", 3);
        backend.add_child(WindowHandle(1), WindowHandle(2), "Edit");

        assert!(run(&backend, &InputControlMessage, WindowHandle(1), KeyPhase::Down));
        assert_eq!(backend.posted_to(WindowHandle(2)), vec![WM_KEYDOWN]);
        assert!(backend.posted_to(WindowHandle(1)).is_empty());
    }

    #[test]
    fn test_render_surface_any_accepting_target_wins() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.add_window(WindowHandle(1), "GameFrame", 3);
        backend.add_child(WindowHandle(1), WindowHandle(2), "RenderTarget");
        backend.add_child(WindowHandle(1), WindowHandle(3), "OpenGLCanvas");
        backend.reject_messages_to(WindowHandle(2));

        assert!(run(&backend, &RenderSurfaceMessage, WindowHandle(1), KeyPhase::Up));
        assert_eq!(backend.posted_to(WindowHandle(3)), vec![WM_KEYUP]);
    }

    #[test]
    fn test_render_surface_without_surfaces_fails() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.add_window(WindowHandle(1), "Notepad", 3);
        assert!(!run(&backend, &RenderSurfaceMessage, WindowHandle(1), KeyPhase::Press));
    }
}
