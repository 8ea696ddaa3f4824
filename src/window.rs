//! Target windows and the registry the engine reads them from.
//!
//! Windows are owned by an external registry; the engine only keeps handles.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::platform::InputBackend;

/// Raw OS window handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct WindowHandle(pub isize);

impl WindowHandle {
    pub const NULL: WindowHandle = WindowHandle(0);

    #[inline(always)]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010X}", self.0)
    }
}

/// A registered window the engine may deliver input to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetWindow {
    pub handle: WindowHandle,
    pub process_id: u32,
    pub is_active: bool,
}

impl TargetWindow {
    pub fn new(handle: WindowHandle, process_id: u32) -> Self {
        Self {
            handle,
            process_id,
            is_active: true,
        }
    }

    /// Validity predicate; a window is valid while the OS still knows its handle.
    #[inline]
    pub fn is_valid(&self, backend: &dyn InputBackend) -> bool {
        !self.handle.is_null() && backend.is_window(self.handle)
    }
}

/// Source of the currently registered windows.
pub trait WindowRegistry: Send + Sync {
    fn windows(&self) -> Vec<TargetWindow>;
}

/// In-memory registry.
#[derive(Default)]
pub struct StaticRegistry {
    windows: RwLock<Vec<TargetWindow>>,
}

impl StaticRegistry {
    pub fn new(windows: Vec<TargetWindow>) -> Arc<Self> {
        Arc::new(Self {
            windows: RwLock::new(windows),
        })
    }

    /// Adds a window, replacing any entry with the same handle.
    pub fn register(&self, window: TargetWindow) {
        let mut windows = self.windows.write();
        windows.retain(|w| w.handle != window.handle);
        windows.push(window);
    }

    pub fn unregister(&self, handle: WindowHandle) -> bool {
        let mut windows = self.windows.write();
        let before = windows.len();
        windows.retain(|w| w.handle != handle);
        windows.len() != before
    }

    /// Registers the visible top-level windows of every named process.
    /// Returns the number of windows registered.
    pub fn register_processes(&self, backend: &dyn InputBackend, processes: &[String]) -> usize {
        let mut registered = 0;
        for process in processes {
            match backend.top_level_windows(process) {
                Ok(windows) => {
                    info!(process = %process, count = windows.len(), "registering windows");
                    registered += windows.len();
                    for window in windows {
                        self.register(window);
                    }
                }
                Err(e) => warn!(process = %process, error = %e, "window enumeration failed"),
            }
        }
        registered
    }

    pub fn set_active(&self, handle: WindowHandle, active: bool) {
        if let Some(window) = self.windows.write().iter_mut().find(|w| w.handle == handle) {
            window.is_active = active;
        }
    }
}

impl WindowRegistry for StaticRegistry {
    fn windows(&self) -> Vec<TargetWindow> {
        self.windows.read().clone()
    }
}
