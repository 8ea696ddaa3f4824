//! Engine facade.
//!
//! Wires the device catalog, classifier, strategy chain, held-key tracker
//! and broadcast coordinator together and exposes the calls callers use.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::broadcast::{BroadcastCoordinator, BroadcastResults};
use crate::classifier::{ProcessClassifier, ProcessProfile};
use crate::config::EngineConfig;
use crate::devices::DeviceCatalog;
use crate::error::{EngineError, Result};
use crate::keys::{KeyCode, KeyPhase};
use crate::mouse;
use crate::platform::{InputBackend, MouseButton};
use crate::strategy::{
    InjectionAttemptResult, InjectionStrategy, StrategyChain, StrategyId, Timing,
};
use crate::tracker::{HeldKeySet, HeldKeyTracker, Maintenance};
use crate::window::{TargetWindow, WindowHandle, WindowRegistry};

/// Engine lifecycle; advances once, at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Idle = 0,
    EnumeratingDevices = 1,
    Ready = 2,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineState::EnumeratingDevices,
            2 => EngineState::Ready,
            _ => EngineState::Idle,
        }
    }
}

pub struct InjectionEngine {
    state: AtomicU8,
    broadcasting: AtomicBool,
    devices: Arc<DeviceCatalog>,
    chain: Arc<StrategyChain>,
    tracker: Arc<HeldKeyTracker>,
    broadcaster: BroadcastCoordinator,
    maintenance: Mutex<Option<Maintenance>>,
}

impl InjectionEngine {
    /// Engine with the built-in strategy chain.
    pub fn new(
        backend: Arc<dyn InputBackend>,
        registry: Arc<dyn WindowRegistry>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let strategies = StrategyChain::default_strategies(config);
        Self::with_strategies(backend, registry, config, strategies)
    }

    /// Engine with a caller-supplied strategy list, tried in the given order.
    ///
    /// Out-of-range timing values are clamped as they are when loading a file.
    pub fn with_strategies(
        backend: Arc<dyn InputBackend>,
        registry: Arc<dyn WindowRegistry>,
        config: &EngineConfig,
        strategies: Vec<Box<dyn InjectionStrategy>>,
    ) -> Result<Self> {
        let mut config = config.clone();
        config.clamp();
        let config = &config;
        let state = AtomicU8::new(EngineState::Idle as u8);

        Self::transition(&state, EngineState::EnumeratingDevices);
        let devices = Arc::new(DeviceCatalog::enumerate(backend.as_ref()));

        let classifier = Arc::new(ProcessClassifier::with_keywords(
            backend.clone(),
            &config.direct_input_keywords,
            &config.raw_input_keywords,
        ));
        let chain = Arc::new(StrategyChain::new(
            backend,
            classifier,
            devices.clone(),
            strategies,
            config.into(),
        ));
        let tracker = Arc::new(HeldKeyTracker::new(chain.clone()));
        let broadcaster = BroadcastCoordinator::new(
            registry,
            chain.clone(),
            tracker.clone(),
            config.parallelism(),
            Duration::from_millis(config.inter_window_delay_ms),
        );
        let maintenance = Maintenance::start(
            tracker.clone(),
            Duration::from_millis(config.maintenance_interval_ms),
        )?;

        Self::transition(&state, EngineState::Ready);
        Ok(Self {
            state,
            broadcasting: AtomicBool::new(false),
            devices,
            chain,
            tracker,
            broadcaster,
            maintenance: Mutex::new(Some(maintenance)),
        })
    }

    fn transition(state: &AtomicU8, next: EngineState) {
        let previous = EngineState::from_u8(state.swap(next as u8, Ordering::AcqRel));
        info!(from = ?previous, to = ?next, "engine state");
    }

    #[inline]
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_broadcasting(&self) -> bool {
        self.broadcasting.load(Ordering::Acquire)
    }

    pub fn devices(&self) -> &DeviceCatalog {
        &self.devices
    }

    /// Timing the strategies run with, after clamping.
    pub fn timing(&self) -> Timing {
        self.chain.timing()
    }

    /// Period of the held-key maintenance thread; `None` after shutdown.
    pub fn maintenance_interval(&self) -> Option<Duration> {
        self.maintenance.lock().as_ref().map(Maintenance::interval)
    }

    /// Cached classification of `window`, without classifying it.
    pub fn profile(&self, window: WindowHandle) -> Option<Arc<ProcessProfile>> {
        self.chain.classifier().cached(window)
    }

    pub fn strategies(&self) -> Vec<StrategyId> {
        self.chain.strategy_ids()
    }

    /// Transient press (down, hold, up) delivered to one window.
    pub fn send_key_press(&self, window: WindowHandle, key: KeyCode) -> Result<bool> {
        check_args(window, key)?;
        Ok(self.chain.attempt(window, key, KeyPhase::Press).success)
    }

    /// Holds `key` on `window` until [`send_key_up`](Self::send_key_up) or stop.
    pub fn send_key_down(&self, window: WindowHandle, key: KeyCode) -> Result<bool> {
        check_args(window, key)?;
        Ok(self.tracker.key_down(window, key).success)
    }

    pub fn send_key_up(&self, window: WindowHandle, key: KeyCode) -> Result<bool> {
        check_args(window, key)?;
        Ok(self.tracker.key_up(window, key).success)
    }

    pub fn send_mouse_click(
        &self,
        window: WindowHandle,
        button: MouseButton,
        x: i32,
        y: i32,
    ) -> Result<InjectionAttemptResult> {
        if window.is_null() {
            return Err(EngineError::InvalidArgument("null window handle".to_string()));
        }
        Ok(mouse::click(&self.chain, window, button, x, y))
    }

    pub fn start_broadcast(&self) {
        if !self.broadcasting.swap(true, Ordering::AcqRel) {
            info!("broadcast started");
        }
    }

    /// Stops broadcasting and releases every held key before returning.
    pub fn stop_broadcast(&self) -> usize {
        let was_broadcasting = self.broadcasting.swap(false, Ordering::AcqRel);
        let released = self.tracker.drain();
        if was_broadcasting {
            info!(released, "broadcast stopped");
        }
        released
    }

    /// Broadcasts to the registry snapshot; a no-op while not broadcasting.
    pub fn broadcast(&self, key: KeyCode, phase: KeyPhase) -> Result<BroadcastResults> {
        check_key(key)?;
        if !self.is_broadcasting() {
            debug!(key = %key, %phase, "broadcast ignored, not started");
            return Ok(BroadcastResults::new());
        }
        Ok(self.broadcaster.broadcast(key, phase))
    }

    /// Broadcasts to an explicit window list regardless of broadcast state.
    pub fn broadcast_key(
        &self,
        key: KeyCode,
        phase: KeyPhase,
        windows: &[TargetWindow],
    ) -> Result<BroadcastResults> {
        check_key(key)?;
        Ok(self.broadcaster.broadcast_to(key, phase, windows))
    }

    /// Forgets the cached classification of `window`, e.g. after the OS
    /// reused its handle.
    pub fn invalidate(&self, window: WindowHandle) -> bool {
        self.chain.classifier().invalidate(window)
    }

    pub fn held_keys(&self, window: WindowHandle) -> HeldKeySet {
        self.tracker.held_keys(window)
    }

    pub fn tracked_windows(&self) -> Vec<WindowHandle> {
        self.tracker.tracked_windows()
    }

    /// Stops maintenance and drains held keys. Idempotent.
    pub fn shutdown(&self) {
        if let Some(mut maintenance) = self.maintenance.lock().take() {
            maintenance.stop();
        }
        self.stop_broadcast();
    }
}

impl Drop for InjectionEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn check_key(key: KeyCode) -> Result<()> {
    if key.vk() == 0 {
        return Err(EngineError::InvalidArgument("key code 0".to_string()));
    }
    Ok(())
}

fn check_args(window: WindowHandle, key: KeyCode) -> Result<()> {
    if window.is_null() {
        return Err(EngineError::InvalidArgument("null window handle".to_string()));
    }
    check_key(key)
}
