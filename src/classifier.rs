//! Process classification.
//!
//! Guesses how a target window consumes input by looking at its own class
//! name and the class names of all its descendants. The resulting
//! [`ProcessProfile`] is cached per window handle and is never refreshed on
//! its own: it lives until the handle turns invalid or a caller invalidates
//! it explicitly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::error::{EngineError, Result};
use crate::platform::InputBackend;
use crate::strategy::StrategyId;
use crate::window::WindowHandle;

/// Keywords marking a DirectInput-style consumer.
pub const DIRECT_INPUT_KEYWORDS: &[&str] = &[
    "dinput",
    "directinput",
    "d3d",
    "directx",
    "dx9",
    "dx11",
    "dx12",
    "opengl",
    "vulkan",
    "unity",
    "unreal",
];

/// Keywords marking a Raw Input-style consumer.
pub const RAW_INPUT_KEYWORDS: &[&str] = &["raw", "hid", "engine"];

/// Class keywords of standard controls that accept key messages.
pub const INPUT_CONTROL_KEYWORDS: &[&str] = &["edit", "static", "button", "combo"];

/// Class keywords of rendering / game surfaces.
pub const RENDER_SURFACE_KEYWORDS: &[&str] = &[
    "directx", "d3d", "opengl", "vulkan", "unity", "unreal", "render", "canvas",
];

const NO_STRATEGY: u8 = u8::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildRole {
    InputControl,
    RenderSurface,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildWindow {
    pub handle: WindowHandle,
    pub class_name: String,
    pub role: ChildRole,
}

/// Cached classification of one window.
#[derive(Debug)]
pub struct ProcessProfile {
    pub window: WindowHandle,
    pub class_name: String,
    pub is_direct_input_like: bool,
    pub is_raw_input_like: bool,
    /// Descendant windows, excluding the window itself.
    pub descendants: Vec<ChildWindow>,
    root_role: ChildRole,
    last_success: AtomicU8,
}

impl ProcessProfile {
    /// Strategy that handled the previous event for this window.
    #[inline]
    pub fn last_success(&self) -> Option<StrategyId> {
        match self.last_success.load(Ordering::Acquire) {
            NO_STRATEGY => None,
            index => StrategyId::from_index(index as usize),
        }
    }

    #[inline]
    pub fn record_success(&self, strategy: StrategyId) {
        self.last_success
            .store(strategy.index() as u8, Ordering::Release);
    }

    /// Input-capable controls, the window itself first when it is one.
    pub fn input_controls(&self) -> SmallVec<[WindowHandle; 4]> {
        self.with_role(ChildRole::InputControl)
    }

    /// Rendering surfaces, the window itself first when it is one.
    pub fn render_surfaces(&self) -> SmallVec<[WindowHandle; 4]> {
        self.with_role(ChildRole::RenderSurface)
    }

    /// Neither family flag set.
    #[inline]
    pub fn is_message_driven(&self) -> bool {
        !self.is_direct_input_like && !self.is_raw_input_like
    }

    fn with_role(&self, role: ChildRole) -> SmallVec<[WindowHandle; 4]> {
        let mut handles = SmallVec::new();
        if self.root_role == role {
            handles.push(self.window);
        }
        handles.extend(
            self.descendants
                .iter()
                .filter(|c| c.role == role)
                .map(|c| c.handle),
        );
        handles
    }
}

/// Per-window profile cache.
pub struct ProcessClassifier {
    backend: Arc<dyn InputBackend>,
    profiles: scc::HashMap<WindowHandle, Arc<ProcessProfile>>,
    direct_input_keywords: Vec<String>,
    raw_input_keywords: Vec<String>,
}

impl ProcessClassifier {
    pub fn new(backend: Arc<dyn InputBackend>) -> Self {
        Self::with_keywords(backend, &[], &[])
    }

    /// Classifier with extra family keywords appended to the built-in sets.
    pub fn with_keywords(
        backend: Arc<dyn InputBackend>,
        extra_direct_input: &[String],
        extra_raw_input: &[String],
    ) -> Self {
        let merge = |builtin: &[&str], extra: &[String]| -> Vec<String> {
            builtin
                .iter()
                .map(|k| k.to_string())
                .chain(extra.iter().map(|k| k.trim().to_lowercase()))
                .filter(|k| !k.is_empty())
                .collect()
        };
        Self {
            backend,
            profiles: scc::HashMap::new(),
            direct_input_keywords: merge(DIRECT_INPUT_KEYWORDS, extra_direct_input),
            raw_input_keywords: merge(RAW_INPUT_KEYWORDS, extra_raw_input),
        }
    }

    /// Returns the cached profile, classifying the window on first use.
    ///
    /// An invalid handle evicts any cached profile and reports
    /// [`EngineError::WindowInvalid`].
    pub fn classify(&self, window: WindowHandle) -> Result<Arc<ProcessProfile>> {
        if window.is_null() || !self.backend.is_window(window) {
            self.invalidate(window);
            return Err(EngineError::WindowInvalid(window));
        }

        if let Some(profile) = self.profiles.read_sync(&window, |_, v| v.clone()) {
            return Ok(profile);
        }

        let profile = Arc::new(self.build_profile(window));
        match self.profiles.insert_sync(window, profile.clone()) {
            Ok(()) => Ok(profile),
            // Lost a race with another classifier call; keep the first one.
            Err(_) => Ok(self
                .profiles
                .read_sync(&window, |_, v| v.clone())
                .unwrap_or(profile)),
        }
    }

    /// Cached profile without classifying.
    pub fn cached(&self, window: WindowHandle) -> Option<Arc<ProcessProfile>> {
        self.profiles.read_sync(&window, |_, v| v.clone())
    }

    /// Drops the cached profile so the next call re-enumerates.
    pub fn invalidate(&self, window: WindowHandle) -> bool {
        let removed = self.profiles.remove_sync(&window).is_some();
        if removed {
            debug!(hwnd = %window, "process profile evicted");
        }
        removed
    }

    /// Evicts every profile whose window is no longer valid.
    pub fn purge_invalid(&self) -> usize {
        let mut purged = 0;
        self.profiles.retain_sync(|window, _| {
            let keep = self.backend.is_window(*window);
            if !keep {
                purged += 1;
            }
            keep
        });
        purged
    }

    fn build_profile(&self, window: WindowHandle) -> ProcessProfile {
        let class_name = self.backend.class_name(window).unwrap_or_default();
        let descendants: Vec<ChildWindow> = match self.backend.child_windows(window) {
            Ok(children) => children
                .into_iter()
                .map(|handle| {
                    let class_name = self.backend.class_name(handle).unwrap_or_default();
                    let role = child_role(&class_name);
                    ChildWindow {
                        handle,
                        class_name,
                        role,
                    }
                })
                .collect(),
            Err(e) => {
                debug!(hwnd = %window, error = %e, "descendant enumeration failed");
                Vec::new()
            }
        };

        let classes = || {
            std::iter::once(class_name.as_str()).chain(descendants.iter().map(|c| c.class_name.as_str()))
        };
        let is_direct_input_like = classes().any(|c| contains_any(c, &self.direct_input_keywords));
        let is_raw_input_like = classes().any(|c| contains_any(c, &self.raw_input_keywords));

        let profile = ProcessProfile {
            window,
            root_role: child_role(&class_name),
            class_name,
            is_direct_input_like,
            is_raw_input_like,
            descendants,
            last_success: AtomicU8::new(NO_STRATEGY),
        };
        debug!(
            hwnd = %window,
            class = %profile.class_name,
            descendants = profile.descendants.len(),
            direct_input = is_direct_input_like,
            raw_input = is_raw_input_like,
            "window classified"
        );
        trace!(?profile, "process profile");
        profile
    }
}

/// Role of a window judged by its class name alone.
pub fn child_role(class_name: &str) -> ChildRole {
    let lower = class_name.to_lowercase();
    if RENDER_SURFACE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        ChildRole::RenderSurface
    } else if INPUT_CONTROL_KEYWORDS.iter().any(|k| lower.contains(k)) {
        ChildRole::InputControl
    } else {
        ChildRole::Other
    }
}

#[inline]
fn contains_any(class_name: &str, keywords: &[String]) -> bool {
    let lower = class_name.to_lowercase();
    keywords.iter().any(|k| lower.contains(k.as_str()))
}
