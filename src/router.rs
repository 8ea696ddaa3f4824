//! Routes physical key events from the hook into engine broadcasts.

use std::collections::HashSet;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::engine::InjectionEngine;
use crate::keys::{KeyCode, KeyPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Pressed(KeyCode),
    Released(KeyCode),
}

/// What the router did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Toggled { broadcasting: bool },
    Broadcast { key: KeyCode, phase: KeyPhase, windows: usize },
    Ignored,
}

pub struct KeyRouter {
    engine: Arc<InjectionEngine>,
    toggle_key: KeyCode,
    held_keys: SmallVec<[KeyCode; 8]>,
    /// Physically down right now; filters keyboard auto-repeat.
    pressed: HashSet<KeyCode>,
}

impl KeyRouter {
    pub fn new(engine: Arc<InjectionEngine>, toggle_key: KeyCode, held_keys: &[KeyCode]) -> Self {
        Self {
            engine,
            toggle_key,
            held_keys: held_keys.iter().copied().collect(),
            pressed: HashSet::new(),
        }
    }

    pub fn handle(&mut self, event: KeyEvent) -> Routed {
        match event {
            KeyEvent::Pressed(key) => {
                let first = self.pressed.insert(key);
                if key == self.toggle_key {
                    return if first { self.toggle() } else { Routed::Ignored };
                }
                if !self.engine.is_broadcasting() {
                    return Routed::Ignored;
                }
                if self.held_keys.contains(&key) {
                    if !first {
                        return Routed::Ignored;
                    }
                    self.broadcast(key, KeyPhase::Down)
                } else {
                    self.broadcast(key, KeyPhase::Press)
                }
            }
            KeyEvent::Released(key) => {
                let was_down = self.pressed.remove(&key);
                if was_down && self.held_keys.contains(&key) && self.engine.is_broadcasting() {
                    self.broadcast(key, KeyPhase::Up)
                } else {
                    Routed::Ignored
                }
            }
        }
    }

    fn toggle(&mut self) -> Routed {
        if self.engine.is_broadcasting() {
            self.engine.stop_broadcast();
            let toggle_key = self.toggle_key;
            self.pressed.retain(|k| *k == toggle_key);
            Routed::Toggled {
                broadcasting: false,
            }
        } else {
            self.engine.start_broadcast();
            Routed::Toggled { broadcasting: true }
        }
    }

    fn broadcast(&self, key: KeyCode, phase: KeyPhase) -> Routed {
        match self.engine.broadcast(key, phase) {
            Ok(results) => {
                let failed = results.values().filter(|r| !r.success).count();
                if failed > 0 {
                    debug!(key = %key, %phase, failed, "broadcast partially delivered");
                }
                Routed::Broadcast {
                    key,
                    phase,
                    windows: results.len(),
                }
            }
            Err(e) => {
                warn!(key = %key, error = %e, "broadcast rejected");
                Routed::Ignored
            }
        }
    }
}
