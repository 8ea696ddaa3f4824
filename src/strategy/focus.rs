//! Focus-bracketed delivery for titles that ignore key messages unless they
//! believe they hold keyboard focus.

use tracing::debug;

use super::message::{Channel, key_messages};
use super::{InjectionContext, InjectionStrategy, StrategyId};
use crate::error::Result;
use crate::keys::{KeyCode, KeyPhase};
use crate::platform::msg::{WA_ACTIVE, WA_INACTIVE, WM_ACTIVATE, WM_KILLFOCUS, WM_SETFOCUS};
use crate::window::WindowHandle;

/// Synthetic focus notification held for the lifetime of the value; the
/// matching focus-lost notification is sent on drop.
struct FocusBracket<'a> {
    ctx: &'a InjectionContext<'a>,
    target: WindowHandle,
}

impl<'a> FocusBracket<'a> {
    fn enter(ctx: &'a InjectionContext<'a>, target: WindowHandle) -> Result<Self> {
        let timeout = ctx.timing.message_timeout;
        ctx.backend
            .send_message_timeout(target, WM_SETFOCUS, 0, 0, timeout)?;
        // Activation is advisory; many titles only look at WM_SETFOCUS.
        let _ = ctx
            .backend
            .send_message_timeout(target, WM_ACTIVATE, WA_ACTIVE, 0, timeout);
        Ok(Self { ctx, target })
    }
}

impl Drop for FocusBracket<'_> {
    fn drop(&mut self) {
        let timeout = self.ctx.timing.message_timeout;
        let backend = self.ctx.backend;
        let _ = backend.send_message_timeout(self.target, WM_ACTIVATE, WA_INACTIVE, 0, timeout);
        if let Err(e) = backend.send_message_timeout(self.target, WM_KILLFOCUS, 0, 0, timeout) {
            debug!(hwnd = %self.target, error = %e, "focus-lost notification failed");
        }
    }
}

/// Strategy 4: focus-gained / key / focus-lost around the key message.
///
/// The key goes through the same synchronous channel as the focus
/// notifications. A posted key would be handled after the focus-lost
/// notification, since sent messages are dispatched ahead of the queue.
pub struct FocusBracketMessage;

impl InjectionStrategy for FocusBracketMessage {
    fn id(&self) -> StrategyId {
        StrategyId::FocusBracket
    }

    fn attempt(&self, ctx: &InjectionContext<'_>, key: KeyCode, phase: KeyPhase) -> bool {
        if ctx.profile.is_message_driven() {
            return false;
        }
        let target = ctx
            .profile
            .render_surfaces()
            .first()
            .copied()
            .unwrap_or(ctx.window());

        let Ok(_bracket) = FocusBracket::enter(ctx, target) else {
            return false;
        };
        key_messages(ctx, Channel::Sent, target, key, phase, false).is_ok()
    }
}
