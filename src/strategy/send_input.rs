//! OS-level synthetic input.

use tracing::{debug, warn};

use super::{InjectionContext, InjectionStrategy, StrategyId};
use crate::error::{EngineError, Result};
use crate::keys::{KeyCode, KeyPhase};
use crate::platform::{SIMULATED_EVENT_MARKER, SyntheticInput};
use crate::util::pause;

/// Injects one key event as scan-code input stamped with `extra_info`.
///
/// A press holds for the configured duration. Once the down edge of a press
/// is injected the event counts as delivered: a failed up edge is retried
/// once and otherwise logged, never reported as a failure that would let the
/// chain inject a second down edge.
pub(super) fn send_key(
    ctx: &InjectionContext<'_>,
    key: KeyCode,
    phase: KeyPhase,
    extra_info: usize,
) -> Result<()> {
    let scan = ctx.scan_code(key);
    if scan == 0 {
        return Err(EngineError::InvalidArgument(format!(
            "no scan code for key {key}"
        )));
    }
    let down = SyntheticInput::key(key, scan, false, extra_info);
    let up = SyntheticInput::key(key, scan, true, extra_info);

    match phase {
        KeyPhase::Down => ctx.backend.send_input(&[down]),
        KeyPhase::Up => ctx.backend.send_input(&[up]),
        KeyPhase::Press => {
            ctx.backend.send_input(&[down])?;
            pause(ctx.timing.press_duration);
            if let Err(e) = ctx.backend.send_input(&[up]) {
                warn!(key = %key, error = %e, "key up injection failed, retrying");
                if let Err(e) = ctx.backend.send_input(&[up]) {
                    warn!(hwnd = %ctx.window(), key = %key, error = %e, "key up lost");
                }
            }
            Ok(())
        }
    }
}

/// Strategy 5: scan-code synthetic input.
pub struct ScanCodeInput;

impl InjectionStrategy for ScanCodeInput {
    fn id(&self) -> StrategyId {
        StrategyId::ScanCode
    }

    fn attempt(&self, ctx: &InjectionContext<'_>, key: KeyCode, phase: KeyPhase) -> bool {
        match send_key(ctx, key, phase, SIMULATED_EVENT_MARKER) {
            Ok(()) => true,
            Err(e) => {
                debug!(hwnd = %ctx.window(), error = %e, "scan-code input failed");
                false
            }
        }
    }
}

/// Strategy 7: synthetic input stamped with the vendor/product identity of
/// an enumerated physical device.
///
/// Disabled unless explicitly enabled; while disabled, or when no device was
/// enumerated, it fails without touching the OS.
pub struct HardwareTaggedInput {
    enabled: bool,
}

impl HardwareTaggedInput {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl InjectionStrategy for HardwareTaggedInput {
    fn id(&self) -> StrategyId {
        StrategyId::HardwareTagged
    }

    fn attempt(&self, ctx: &InjectionContext<'_>, key: KeyCode, phase: KeyPhase) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(device) = ctx.devices.tag_source() else {
            return false;
        };
        match send_key(ctx, key, phase, device.tag()) {
            Ok(()) => true,
            Err(e) => {
                debug!(hwnd = %ctx.window(), device = %device, error = %e, "tagged input failed");
                false
            }
        }
    }
}
