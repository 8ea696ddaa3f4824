//! Broadcast fan-out.
//!
//! One logical key event is delivered to every active, valid registered
//! window. Windows are split into lanes processed on scoped threads; within
//! a lane consecutive windows are spaced by the inter-window delay.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::keys::{KeyCode, KeyPhase};
use crate::strategy::{InjectionAttemptResult, StrategyChain};
use crate::tracker::HeldKeyTracker;
use crate::util::pause;
use crate::window::{TargetWindow, WindowHandle, WindowRegistry};

pub type BroadcastResults = HashMap<WindowHandle, InjectionAttemptResult>;

pub struct BroadcastCoordinator {
    registry: Arc<dyn WindowRegistry>,
    chain: Arc<StrategyChain>,
    tracker: Arc<HeldKeyTracker>,
    parallelism: usize,
    inter_window_delay: Duration,
}

impl BroadcastCoordinator {
    pub fn new(
        registry: Arc<dyn WindowRegistry>,
        chain: Arc<StrategyChain>,
        tracker: Arc<HeldKeyTracker>,
        parallelism: usize,
        inter_window_delay: Duration,
    ) -> Self {
        Self {
            registry,
            chain,
            tracker,
            parallelism: parallelism.max(1),
            inter_window_delay,
        }
    }

    /// Active, valid windows currently in the registry.
    pub fn snapshot(&self) -> Vec<TargetWindow> {
        self.eligible(&self.registry.windows())
    }

    /// Delivers to every window in the registry snapshot.
    pub fn broadcast(&self, key: KeyCode, phase: KeyPhase) -> BroadcastResults {
        let targets = self.snapshot();
        self.deliver_all(key, phase, &targets)
    }

    /// Delivers to an explicit window list; inactive or invalid entries are
    /// skipped and absent from the result.
    pub fn broadcast_to(
        &self,
        key: KeyCode,
        phase: KeyPhase,
        windows: &[TargetWindow],
    ) -> BroadcastResults {
        let targets = self.eligible(windows);
        self.deliver_all(key, phase, &targets)
    }

    fn eligible(&self, windows: &[TargetWindow]) -> Vec<TargetWindow> {
        let backend = self.chain.backend().as_ref();
        let mut targets: Vec<TargetWindow> = Vec::with_capacity(windows.len());
        for window in windows {
            if !window.is_active || !window.is_valid(backend) {
                continue;
            }
            if targets.iter().any(|t| t.handle == window.handle) {
                continue;
            }
            targets.push(window.clone());
        }
        targets
    }

    fn deliver_all(&self, key: KeyCode, phase: KeyPhase, targets: &[TargetWindow]) -> BroadcastResults {
        if targets.is_empty() {
            return BroadcastResults::new();
        }

        let lane_count = self.parallelism.min(targets.len());
        let mut results = BroadcastResults::with_capacity(targets.len());

        if lane_count == 1 {
            results.extend(self.run_lane(key, phase, targets.iter()));
        } else {
            // Round-robin so each lane gets a similar share.
            let lanes: Vec<Vec<&TargetWindow>> = (0..lane_count)
                .map(|lane| targets.iter().skip(lane).step_by(lane_count).collect())
                .collect();

            thread::scope(|scope| {
                let mut handles = Vec::with_capacity(lane_count);
                for (index, lane) in lanes.iter().enumerate() {
                    let spawned = thread::Builder::new()
                        .name(format!("broadcast_lane_{index}"))
                        .spawn_scoped(scope, move || {
                            self.run_lane(key, phase, lane.iter().copied())
                        });
                    match spawned {
                        Ok(handle) => handles.push(handle),
                        Err(e) => {
                            warn!(error = %e, "broadcast lane spawn failed, running inline");
                            results.extend(self.run_lane(key, phase, lane.iter().copied()));
                        }
                    }
                }
                for handle in handles {
                    match handle.join() {
                        Ok(lane_results) => results.extend(lane_results),
                        Err(_) => warn!("broadcast lane panicked"),
                    }
                }
            });
        }

        debug!(
            key = %key,
            %phase,
            windows = results.len(),
            delivered = results.values().filter(|r| r.success).count(),
            "broadcast complete"
        );
        results
    }

    fn run_lane<'a>(
        &self,
        key: KeyCode,
        phase: KeyPhase,
        lane: impl Iterator<Item = &'a TargetWindow>,
    ) -> Vec<(WindowHandle, InjectionAttemptResult)> {
        let mut out = Vec::new();
        for (index, window) in lane.enumerate() {
            if index > 0 {
                pause(self.inter_window_delay);
            }
            out.push((window.handle, self.deliver(window.handle, key, phase)));
        }
        out
    }

    fn deliver(&self, window: WindowHandle, key: KeyCode, phase: KeyPhase) -> InjectionAttemptResult {
        match phase {
            KeyPhase::Down => self.tracker.key_down(window, key),
            KeyPhase::Up => self.tracker.key_up(window, key),
            KeyPhase::Press => self.chain.attempt(window, key, phase),
        }
    }
}
