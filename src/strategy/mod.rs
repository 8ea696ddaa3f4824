//! Injection strategy chain.
//!
//! A key event for an unfocused window is delivered by trying a fixed,
//! ordered list of techniques until one reports success. Each technique
//! implements [`InjectionStrategy`]; the chain owns the order, remembers the
//! technique that last worked for each window and serializes all injection
//! for one window.

pub mod attach;
pub mod focus;
pub mod message;
pub mod send_input;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::classifier::{ProcessClassifier, ProcessProfile};
use crate::config::EngineConfig;
use crate::devices::DeviceCatalog;
use crate::error::EngineError;
use crate::keys::{KeyCode, KeyPhase};
use crate::platform::InputBackend;
use crate::window::WindowHandle;

pub use attach::ThreadAttachInput;
pub use focus::FocusBracketMessage;
pub use message::{DirectMessage, InputControlMessage, RenderSurfaceMessage};
pub use send_input::{HardwareTaggedInput, ScanCodeInput};

/// Identifier of each technique, in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StrategyId {
    DirectMessage,
    InputControl,
    RenderSurface,
    FocusBracket,
    ScanCode,
    ThreadAttach,
    HardwareTagged,
}

impl StrategyId {
    pub const ALL: [StrategyId; 7] = [
        StrategyId::DirectMessage,
        StrategyId::InputControl,
        StrategyId::RenderSurface,
        StrategyId::FocusBracket,
        StrategyId::ScanCode,
        StrategyId::ThreadAttach,
        StrategyId::HardwareTagged,
    ];

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            StrategyId::DirectMessage => "direct-message",
            StrategyId::InputControl => "input-control",
            StrategyId::RenderSurface => "render-surface",
            StrategyId::FocusBracket => "focus-bracket",
            StrategyId::ScanCode => "scan-code",
            StrategyId::ThreadAttach => "thread-attach",
            StrategyId::HardwareTagged => "hardware-tagged",
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == wanted)
            .ok_or_else(|| EngineError::Config(format!("unknown strategy: {s}")))
    }
}

/// Timing knobs shared by all strategies.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Hold time between the down and up edge of a synthetic press.
    pub press_duration: Duration,
    /// Upper bound for synchronous window messages.
    pub message_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            press_duration: Duration::from_millis(10),
            message_timeout: Duration::from_millis(100),
        }
    }
}

impl From<&EngineConfig> for Timing {
    fn from(config: &EngineConfig) -> Self {
        Self {
            press_duration: Duration::from_millis(config.press_duration_ms),
            message_timeout: Duration::from_millis(config.message_timeout_ms),
        }
    }
}

/// What a strategy gets to work with for one event.
pub struct InjectionContext<'a> {
    pub backend: &'a dyn InputBackend,
    pub profile: &'a ProcessProfile,
    pub devices: &'a DeviceCatalog,
    pub timing: Timing,
}

impl InjectionContext<'_> {
    #[inline]
    pub fn window(&self) -> WindowHandle {
        self.profile.window
    }

    /// Layout scan code, falling back to the built-in table.
    pub fn scan_code(&self, key: KeyCode) -> u16 {
        match self.backend.map_vk_to_scancode(key) {
            0 => key.scan_code(),
            scan => scan,
        }
    }
}

/// One delivery technique.
///
/// `attempt` returns `false` both when the technique does not apply to the
/// window and when an OS call failed; either way the chain moves on. A
/// failed attempt must leave no input asserted.
pub trait InjectionStrategy: Send + Sync {
    fn id(&self) -> StrategyId;

    fn attempt(&self, ctx: &InjectionContext<'_>, key: KeyCode, phase: KeyPhase) -> bool;
}

/// Outcome of delivering one event to one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionAttemptResult {
    pub window: WindowHandle,
    pub success: bool,
    /// Strategy that handled the event, or the last one tried on failure.
    pub strategy: Option<StrategyId>,
    /// Every strategy invoked, in order.
    pub attempted: SmallVec<[StrategyId; 7]>,
    /// The handle was found invalid and the window evicted.
    pub window_invalid: bool,
}

impl InjectionAttemptResult {
    fn invalid(window: WindowHandle) -> Self {
        Self {
            window,
            success: false,
            strategy: None,
            attempted: SmallVec::new(),
            window_invalid: true,
        }
    }
}

/// Per-window mutual exclusion for injection.
#[derive(Default)]
pub struct WindowGate {
    locks: scc::HashMap<WindowHandle, Arc<Mutex<()>>>,
}

impl WindowGate {
    fn lock_for(&self, window: WindowHandle) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read_sync(&window, |_, v| v.clone()) {
            return lock;
        }
        let lock = Arc::new(Mutex::new(()));
        match self.locks.insert_sync(window, lock.clone()) {
            Ok(()) => lock,
            Err(_) => self
                .locks
                .read_sync(&window, |_, v| v.clone())
                .unwrap_or(lock),
        }
    }

    fn remove(&self, window: WindowHandle) {
        self.locks.remove_sync(&window);
    }

    fn retain(&self, mut keep: impl FnMut(WindowHandle) -> bool) {
        self.locks.retain_sync(|window, _| keep(*window));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Exclusive access to one window for a sequence of injections.
pub struct WindowSession<'a> {
    chain: &'a StrategyChain,
    window: WindowHandle,
}

impl WindowSession<'_> {
    #[inline]
    pub fn window(&self) -> WindowHandle {
        self.window
    }

    pub fn attempt(&self, key: KeyCode, phase: KeyPhase) -> InjectionAttemptResult {
        self.chain.run(self.window, key, phase)
    }
}

/// Ordered strategies plus the state needed to run them.
pub struct StrategyChain {
    backend: Arc<dyn InputBackend>,
    classifier: Arc<ProcessClassifier>,
    devices: Arc<DeviceCatalog>,
    strategies: Vec<Box<dyn InjectionStrategy>>,
    gate: WindowGate,
    timing: Timing,
}

impl StrategyChain {
    pub fn new(
        backend: Arc<dyn InputBackend>,
        classifier: Arc<ProcessClassifier>,
        devices: Arc<DeviceCatalog>,
        strategies: Vec<Box<dyn InjectionStrategy>>,
        timing: Timing,
    ) -> Self {
        debug!(
            strategies = ?strategies.iter().map(|s| s.id()).collect::<Vec<_>>(),
            "strategy chain built"
        );
        Self {
            backend,
            classifier,
            devices,
            strategies,
            gate: WindowGate::default(),
            timing,
        }
    }

    /// The seven built-in techniques in escalation order, minus the ones the
    /// configuration disables.
    pub fn default_strategies(config: &EngineConfig) -> Vec<Box<dyn InjectionStrategy>> {
        let disabled = config.disabled_strategy_ids();
        let all: Vec<Box<dyn InjectionStrategy>> = vec![
            Box::new(DirectMessage),
            Box::new(InputControlMessage),
            Box::new(RenderSurfaceMessage),
            Box::new(FocusBracketMessage),
            Box::new(ScanCodeInput),
            Box::new(ThreadAttachInput),
            Box::new(HardwareTaggedInput::new(config.hardware_tagging)),
        ];
        all.into_iter()
            .filter(|s| !disabled.contains(&s.id()))
            .collect()
    }

    pub fn strategy_ids(&self) -> Vec<StrategyId> {
        self.strategies.iter().map(|s| s.id()).collect()
    }

    #[inline]
    pub fn backend(&self) -> &Arc<dyn InputBackend> {
        &self.backend
    }

    #[inline]
    pub fn classifier(&self) -> &Arc<ProcessClassifier> {
        &self.classifier
    }

    #[inline]
    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// Delivers one event, serialized with every other injection for `window`.
    pub fn attempt(
        &self,
        window: WindowHandle,
        key: KeyCode,
        phase: KeyPhase,
    ) -> InjectionAttemptResult {
        self.with_window(window, |session| session.attempt(key, phase))
    }

    /// Runs `f` while holding the window's injection lock.
    pub fn with_window<R>(&self, window: WindowHandle, f: impl FnOnce(&WindowSession<'_>) -> R) -> R {
        let lock = self.gate.lock_for(window);
        let _guard = lock.lock();
        f(&WindowSession {
            chain: self,
            window,
        })
    }

    /// Like [`with_window`](Self::with_window) but gives up if the window is busy.
    pub fn try_with_window<R>(
        &self,
        window: WindowHandle,
        f: impl FnOnce(&WindowSession<'_>) -> R,
    ) -> Option<R> {
        let lock = self.gate.lock_for(window);
        let _guard = lock.try_lock()?;
        Some(f(&WindowSession {
            chain: self,
            window,
        }))
    }

    /// Removes every trace of `window` from the chain and the classifier.
    pub fn evict(&self, window: WindowHandle) {
        self.classifier.invalidate(window);
        self.gate.remove(window);
    }

    /// Evicts the profile and gate entry of every window that went away,
    /// including windows that never had a key held. Returns the number of
    /// profiles evicted.
    pub fn purge_invalid(&self) -> usize {
        let purged = self.classifier.purge_invalid();
        let backend = self.backend.as_ref();
        self.gate.retain(|window| backend.is_window(window));
        if purged > 0 {
            debug!(purged, "evicted profiles of closed windows");
        }
        purged
    }

    fn run(&self, window: WindowHandle, key: KeyCode, phase: KeyPhase) -> InjectionAttemptResult {
        let profile = match self.classifier.classify(window) {
            Ok(profile) => profile,
            Err(e) => {
                debug!(hwnd = %window, error = %e, "dropping event for invalid window");
                self.gate.remove(window);
                return InjectionAttemptResult::invalid(window);
            }
        };

        let ctx = InjectionContext {
            backend: self.backend.as_ref(),
            profile: &profile,
            devices: &self.devices,
            timing: self.timing,
        };

        let preferred = profile
            .last_success()
            .and_then(|id| self.strategies.iter().position(|s| s.id() == id));
        let order = preferred
            .into_iter()
            .chain((0..self.strategies.len()).filter(|i| Some(*i) != preferred));

        let mut attempted: SmallVec<[StrategyId; 7]> = SmallVec::new();
        for index in order {
            let strategy = &self.strategies[index];
            let id = strategy.id();
            attempted.push(id);
            if strategy.attempt(&ctx, key, phase) {
                profile.record_success(id);
                debug!(hwnd = %window, key = %key, %phase, strategy = %id, "event delivered");
                return InjectionAttemptResult {
                    window,
                    success: true,
                    strategy: Some(id),
                    attempted,
                    window_invalid: false,
                };
            }
            trace!(
                hwnd = %window,
                key = %key,
                %phase,
                error = %EngineError::StrategyFailed { strategy: id },
                "falling back"
            );
        }

        debug!(
            hwnd = %window,
            key = %key,
            %phase,
            error = %EngineError::AllStrategiesExhausted(window),
            "event not delivered"
        );
        InjectionAttemptResult {
            window,
            success: false,
            strategy: attempted.last().copied(),
            attempted,
            window_invalid: false,
        }
    }
}
