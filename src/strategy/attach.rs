//! Thread-input attachment.
//!
//! The calling thread joins the target window's input state for the length
//! of one injection, so the synthetic event lands in the target's own input
//! context without changing Z-order or keeping focus.

use tracing::debug;

use super::send_input::send_key;
use super::{InjectionContext, InjectionStrategy, StrategyId};
use crate::error::{EngineError, Result};
use crate::keys::{KeyCode, KeyPhase};
use crate::platform::{InputBackend, SIMULATED_EVENT_MARKER};

/// Scoped attachment; detaches on drop, on every exit path.
pub struct ThreadAttachment<'a> {
    backend: &'a dyn InputBackend,
    from: u32,
    to: u32,
}

impl<'a> ThreadAttachment<'a> {
    pub fn attach(backend: &'a dyn InputBackend, from: u32, to: u32) -> Result<Self> {
        backend
            .attach_thread_input(from, to, true)
            .map_err(|_| EngineError::ThreadAttachFailed { from, to })?;
        Ok(Self { backend, from, to })
    }
}

impl Drop for ThreadAttachment<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.attach_thread_input(self.from, self.to, false) {
            debug!(from = self.from, to = self.to, error = %e, "thread input detach failed");
        }
    }
}

/// Strategy 6: synthetic input issued while attached to the target's thread.
pub struct ThreadAttachInput;

impl ThreadAttachInput {
    fn deliver(ctx: &InjectionContext<'_>, key: KeyCode, phase: KeyPhase) -> Result<()> {
        let target = ctx.backend.window_thread_id(ctx.window())?;
        let own = ctx.backend.current_thread_id();
        if target == own {
            return send_key(ctx, key, phase, SIMULATED_EVENT_MARKER);
        }
        let _attachment = ThreadAttachment::attach(ctx.backend, own, target)?;
        send_key(ctx, key, phase, SIMULATED_EVENT_MARKER)
    }
}

impl InjectionStrategy for ThreadAttachInput {
    fn id(&self) -> StrategyId {
        StrategyId::ThreadAttach
    }

    fn attempt(&self, ctx: &InjectionContext<'_>, key: KeyCode, phase: KeyPhase) -> bool {
        match Self::deliver(ctx, key, phase) {
            Ok(()) => true,
            Err(e) => {
                debug!(hwnd = %ctx.window(), error = %e, "thread-attached input failed");
                false
            }
        }
    }
}
