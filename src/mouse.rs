//! Background mouse clicks.
//!
//! A click is posted as button-down/button-up messages carrying client
//! coordinates, aimed at the window's first render surface when it has one.
//! If the window refuses the messages, a synthetic button event is injected
//! instead.

use tracing::{debug, warn};

use crate::error::Result;
use crate::platform::msg::{
    MK_LBUTTON, MK_MBUTTON, MK_RBUTTON, WM_LBUTTONDOWN, WM_LBUTTONUP, WM_MBUTTONDOWN,
    WM_MBUTTONUP, WM_RBUTTONDOWN, WM_RBUTTONUP,
};
use crate::platform::{InputBackend, MouseButton, SIMULATED_EVENT_MARKER, SyntheticInput};
use crate::strategy::{InjectionAttemptResult, StrategyChain, StrategyId};
use crate::util::pause;
use crate::window::WindowHandle;

/// Packs client coordinates the way `MAKELPARAM` does.
#[inline]
pub fn make_lparam(x: i32, y: i32) -> isize {
    (((y as u32 & 0xFFFF) << 16) | (x as u32 & 0xFFFF)) as i32 as isize
}

/// (down message, up message, modifier flag) for `button`.
#[inline]
fn button_messages(button: MouseButton) -> (u32, u32, usize) {
    match button {
        MouseButton::Left => (WM_LBUTTONDOWN, WM_LBUTTONUP, MK_LBUTTON),
        MouseButton::Right => (WM_RBUTTONDOWN, WM_RBUTTONUP, MK_RBUTTON),
        MouseButton::Middle => (WM_MBUTTONDOWN, WM_MBUTTONUP, MK_MBUTTON),
    }
}

fn post_click(
    backend: &dyn InputBackend,
    target: WindowHandle,
    button: MouseButton,
    lparam: isize,
) -> Result<()> {
    let (down, up, flag) = button_messages(button);
    backend.post_message(target, down, flag, lparam)?;
    if let Err(e) = backend.post_message(target, up, 0, lparam) {
        warn!(hwnd = %target, error = %e, "button up message lost");
    }
    Ok(())
}

fn inject_click(backend: &dyn InputBackend, button: MouseButton, chain: &StrategyChain) -> Result<()> {
    let event = |key_up| SyntheticInput::MouseButton {
        button,
        key_up,
        extra_info: SIMULATED_EVENT_MARKER,
    };
    backend.send_input(&[event(false)])?;
    pause(chain.timing().press_duration);
    if let Err(e) = backend.send_input(&[event(true)]) {
        warn!(?button, error = %e, "button up injection lost");
    }
    Ok(())
}

/// Clicks `button` at client position (`x`, `y`) of `window`.
///
/// Serialized with key injection for the same window.
pub fn click(
    chain: &StrategyChain,
    window: WindowHandle,
    button: MouseButton,
    x: i32,
    y: i32,
) -> InjectionAttemptResult {
    chain.with_window(window, |_| {
        let mut result = InjectionAttemptResult {
            window,
            success: false,
            strategy: None,
            attempted: Default::default(),
            window_invalid: false,
        };

        let profile = match chain.classifier().classify(window) {
            Ok(profile) => profile,
            Err(_) => {
                result.window_invalid = true;
                return result;
            }
        };
        let backend = chain.backend().as_ref();

        let (target, via) = match profile.render_surfaces().first() {
            Some(&surface) => (surface, StrategyId::RenderSurface),
            None => (window, StrategyId::DirectMessage),
        };
        result.attempted.push(via);
        match post_click(backend, target, button, make_lparam(x, y)) {
            Ok(()) => {
                result.success = true;
                result.strategy = Some(via);
                return result;
            }
            Err(e) => debug!(hwnd = %target, error = %e, "click message rejected"),
        }

        result.attempted.push(StrategyId::ScanCode);
        result.strategy = Some(StrategyId::ScanCode);
        match inject_click(backend, button, chain) {
            Ok(()) => result.success = true,
            Err(e) => debug!(hwnd = %window, error = %e, "synthetic click failed"),
        }
        result
    })
}
