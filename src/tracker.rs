//! Held-key state tracking.
//!
//! Keeps, per window, the keys the caller asked to hold down and re-asserts
//! them from a background [`Maintenance`] thread. All injection for a window
//! goes through the chain's window gate, so a re-assertion can never land
//! after the matching key-up.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, info, trace, warn};

use crate::error::{EngineError, Result};
use crate::keys::{KeyCode, KeyPhase};
use crate::strategy::{InjectionAttemptResult, StrategyChain};
use crate::window::WindowHandle;

pub type HeldKeySet = SmallVec<[KeyCode; 8]>;

/// Counters from one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Held-key windows dropped because their handle went away.
    pub purged: usize,
    /// Cached profiles of closed windows evicted, held keys or not.
    pub evicted: usize,
    /// Windows skipped because a caller held their gate.
    pub skipped: usize,
    /// Down injections issued.
    pub reasserted: usize,
}

pub struct HeldKeyTracker {
    chain: Arc<StrategyChain>,
    held: Mutex<HashMap<WindowHandle, HeldKeySet>>,
}

impl HeldKeyTracker {
    pub fn new(chain: Arc<StrategyChain>) -> Self {
        Self {
            chain,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Marks `key` held for `window` and injects one key-down.
    pub fn key_down(&self, window: WindowHandle, key: KeyCode) -> InjectionAttemptResult {
        self.chain.with_window(window, |session| {
            {
                let mut held = self.held.lock();
                let set = held.entry(window).or_default();
                if !set.contains(&key) {
                    set.push(key);
                }
            }
            let result = session.attempt(key, KeyPhase::Down);
            if result.window_invalid {
                self.held.lock().remove(&window);
            }
            result
        })
    }

    /// Releases `key` for `window` and injects one key-up.
    pub fn key_up(&self, window: WindowHandle, key: KeyCode) -> InjectionAttemptResult {
        self.chain.with_window(window, |session| {
            self.release(window, key);
            session.attempt(key, KeyPhase::Up)
        })
    }

    /// One maintenance pass: purge dead windows, then re-assert a key-down
    /// for every held key. Windows busy with a caller are left for the next
    /// pass.
    pub fn tick(&self) -> TickReport {
        let mut report = TickReport {
            purged: self.purge_invalid(),
            evicted: self.chain.purge_invalid(),
            ..TickReport::default()
        };

        let windows: SmallVec<[WindowHandle; 8]> = self.held.lock().keys().copied().collect();
        for window in windows {
            let reasserted = self.chain.try_with_window(window, |session| {
                // Re-read under the gate; a key-up may have landed since the snapshot.
                let keys = self.held_keys(window);
                for &key in &keys {
                    session.attempt(key, KeyPhase::Down);
                }
                keys.len()
            });
            match reasserted {
                Some(count) => report.reasserted += count,
                None => report.skipped += 1,
            }
        }

        trace!(?report, "maintenance tick");
        report
    }

    /// Injects a key-up for every held key and empties every set.
    ///
    /// Returns the number of key-ups issued. Loops until no set is left, so
    /// keys pressed while draining are released too.
    pub fn drain(&self) -> usize {
        let mut released = 0;
        loop {
            let windows: SmallVec<[WindowHandle; 8]> = self.held.lock().keys().copied().collect();
            if windows.is_empty() {
                break;
            }
            for window in windows {
                released += self.chain.with_window(window, |session| {
                    let keys = self.held.lock().remove(&window).unwrap_or_default();
                    for &key in &keys {
                        let result = session.attempt(key, KeyPhase::Up);
                        if !result.success && !result.window_invalid {
                            warn!(hwnd = %window, key = %key, "key release not delivered during drain");
                        }
                    }
                    keys.len()
                });
            }
        }
        if released > 0 {
            info!(released, "held keys drained");
        }
        released
    }

    pub fn held_keys(&self, window: WindowHandle) -> HeldKeySet {
        self.held.lock().get(&window).cloned().unwrap_or_default()
    }

    pub fn tracked_windows(&self) -> Vec<WindowHandle> {
        let mut windows: Vec<WindowHandle> = self.held.lock().keys().copied().collect();
        windows.sort();
        windows
    }

    pub fn is_empty(&self) -> bool {
        self.held.lock().is_empty()
    }

    fn release(&self, window: WindowHandle, key: KeyCode) {
        let mut held = self.held.lock();
        if let Some(set) = held.get_mut(&window) {
            set.retain(|k| *k != key);
            if set.is_empty() {
                held.remove(&window);
            }
        }
    }

    fn purge_invalid(&self) -> usize {
        let backend = self.chain.backend();
        let dead: SmallVec<[WindowHandle; 4]> = {
            let mut held = self.held.lock();
            let dead: SmallVec<[WindowHandle; 4]> = held
                .keys()
                .copied()
                .filter(|w| !backend.is_window(*w))
                .collect();
            for window in &dead {
                held.remove(window);
            }
            dead
        };
        for &window in &dead {
            debug!(hwnd = %window, "purging held keys of closed window");
            self.chain.evict(window);
        }
        dead.len()
    }
}

/// Background thread driving [`HeldKeyTracker::tick`] at a fixed interval.
///
/// Stopping joins the thread; no tick runs after `stop` returns.
pub struct Maintenance {
    interval: Duration,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Maintenance {
    pub fn start(tracker: Arc<HeldKeyTracker>, interval: Duration) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("held_key_maintenance".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            tracker.tick();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .map_err(|e| EngineError::Platform(format!("failed to spawn maintenance thread: {e}")))?;

        debug!(interval_ms = interval.as_millis() as u64, "held-key maintenance started");
        Ok(Self {
            interval,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("held-key maintenance thread panicked");
            }
            debug!("held-key maintenance stopped");
        }
    }
}

impl Drop for Maintenance {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ProcessClassifier;
    use crate::devices::DeviceCatalog;
    use crate::platform::scripted::ScriptedBackend;
    use crate::strategy::{ScanCodeInput, Timing};

    fn tracker(backend: Arc<ScriptedBackend>) -> HeldKeyTracker {
        let classifier = Arc::new(ProcessClassifier::new(backend.clone()));
        let chain = StrategyChain::new(
            backend,
            classifier,
            Arc::new(DeviceCatalog::default()),
            vec![Box::new(ScanCodeInput)],
            Timing::default(),
        );
        HeldKeyTracker::new(Arc::new(chain))
    }

    #[test]
    fn test_down_up_removes_key() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.add_window(WindowHandle(1), "Notepad", 3);
        let tracker = tracker(backend.clone());

        assert!(tracker.key_down(WindowHandle(1), KeyCode::W).success);
        tracker.key_down(WindowHandle(1), KeyCode::W);
        assert_eq!(tracker.held_keys(WindowHandle(1)).as_slice(), &[KeyCode::W]);

        assert!(tracker.key_up(WindowHandle(1), KeyCode::W).success);
        assert!(tracker.held_keys(WindowHandle(1)).is_empty());
        assert!(tracker.tracked_windows().is_empty());
    }

    #[test]
    fn test_tick_purges_closed_windows() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.add_window(WindowHandle(1), "Notepad", 3);
        let tracker = tracker(backend.clone());
        tracker.key_down(WindowHandle(1), KeyCode::A);

        backend.set_valid(WindowHandle(1), false);
        backend.clear_calls();
        let report = tracker.tick();

        assert_eq!(report.purged, 1);
        assert_eq!(report.reasserted, 0);
        assert!(tracker.is_empty());
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_tick_evicts_profile_of_window_without_held_keys() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.add_window(WindowHandle(1), "Notepad", 3);
        let tracker = tracker(backend.clone());
        assert!(tracker.chain.attempt(WindowHandle(1), KeyCode::W, KeyPhase::Press).success);
        assert!(tracker.chain.classifier().cached(WindowHandle(1)).is_some());

        backend.set_valid(WindowHandle(1), false);
        let report = tracker.tick();

        assert_eq!(report.purged, 0);
        assert_eq!(report.evicted, 1);
        assert!(tracker.chain.classifier().cached(WindowHandle(1)).is_none());
        assert_eq!(tracker.tick().evicted, 0);
    }

    #[test]
    fn test_tick_skips_busy_window() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.add_window(WindowHandle(1), "Notepad", 3);
        let tracker = tracker(backend.clone());
        tracker.key_down(WindowHandle(1), KeyCode::A);

        let report = tracker
            .chain
            .with_window(WindowHandle(1), |_| tracker.tick());
        assert_eq!(report.skipped, 1);
        assert_eq!(report.reasserted, 0);
    }

    #[test]
    fn test_maintenance_stops() {
        let backend = Arc::new(ScriptedBackend::new());
        let tracker = Arc::new(tracker(backend));
        let mut maintenance = Maintenance::start(tracker, Duration::from_millis(5)).unwrap();
        assert!(maintenance.is_running());
        maintenance.stop();
        assert!(!maintenance.is_running());
    }
}
