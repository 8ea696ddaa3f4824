//! Platform input backend.
//!
//! Everything the engine needs from the OS goes through [`InputBackend`], so
//! the rest of the crate stays platform-agnostic. `win32` is the concrete
//! Windows implementation; `scripted` is an in-memory backend used for dry
//! runs and tests.

pub mod scripted;
#[cfg(windows)]
pub mod win32;

use std::time::Duration;

use crate::devices::DeviceDescriptor;
use crate::error::Result;
use crate::keys::KeyCode;
use crate::window::{TargetWindow, WindowHandle};

/// Marker placed in `dwExtraInfo` of every event we inject, so our own hook
/// can recognise and skip it.
pub const SIMULATED_EVENT_MARKER: usize = 0x4B43;

/// Window message numbers used by the message-based strategies.
pub mod msg {
    pub const WM_ACTIVATE: u32 = 0x0006;
    pub const WM_SETFOCUS: u32 = 0x0007;
    pub const WM_KILLFOCUS: u32 = 0x0008;
    pub const WM_KEYDOWN: u32 = 0x0100;
    pub const WM_KEYUP: u32 = 0x0101;
    pub const WM_CHAR: u32 = 0x0102;
    pub const WM_LBUTTONDOWN: u32 = 0x0201;
    pub const WM_LBUTTONUP: u32 = 0x0202;
    pub const WM_RBUTTONDOWN: u32 = 0x0204;
    pub const WM_RBUTTONUP: u32 = 0x0205;
    pub const WM_MBUTTONDOWN: u32 = 0x0207;
    pub const WM_MBUTTONUP: u32 = 0x0208;

    pub const WA_ACTIVE: usize = 1;
    pub const WA_INACTIVE: usize = 0;

    pub const MK_LBUTTON: usize = 0x0001;
    pub const MK_RBUTTON: usize = 0x0002;
    pub const MK_MBUTTON: usize = 0x0010;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// One synthetic OS-level input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticInput {
    Key {
        key: KeyCode,
        scan_code: u16,
        extended: bool,
        key_up: bool,
        extra_info: usize,
    },
    MouseButton {
        button: MouseButton,
        key_up: bool,
        extra_info: usize,
    },
}

impl SyntheticInput {
    pub fn key(key: KeyCode, scan_code: u16, key_up: bool, extra_info: usize) -> Self {
        SyntheticInput::Key {
            key,
            scan_code,
            extended: key.is_extended(),
            key_up,
            extra_info,
        }
    }

    #[inline]
    pub fn is_key_up(&self) -> bool {
        match self {
            SyntheticInput::Key { key_up, .. } | SyntheticInput::MouseButton { key_up, .. } => {
                *key_up
            }
        }
    }
}

/// OS input primitives consumed by the engine.
pub trait InputBackend: Send + Sync {
    fn is_window(&self, window: WindowHandle) -> bool;

    fn window_thread_id(&self, window: WindowHandle) -> Result<u32>;

    fn current_thread_id(&self) -> u32;

    fn post_message(&self, window: WindowHandle, msg: u32, wparam: usize, lparam: isize)
    -> Result<()>;

    fn send_message_timeout(
        &self,
        window: WindowHandle,
        msg: u32,
        wparam: usize,
        lparam: isize,
        timeout: Duration,
    ) -> Result<isize>;

    /// All descendants of `window`, depth-first.
    fn child_windows(&self, window: WindowHandle) -> Result<Vec<WindowHandle>>;

    fn class_name(&self, window: WindowHandle) -> Result<String>;

    /// Scan code for `key` in the current layout, 0 when unmapped.
    fn map_vk_to_scancode(&self, key: KeyCode) -> u16;

    /// Injects all events or fails; partial injection counts as failure.
    fn send_input(&self, inputs: &[SyntheticInput]) -> Result<()>;

    fn attach_thread_input(&self, from: u32, to: u32, attach: bool) -> Result<()>;

    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Visible top-level windows owned by processes with this image name.
    fn top_level_windows(&self, process_name: &str) -> Result<Vec<TargetWindow>>;
}
