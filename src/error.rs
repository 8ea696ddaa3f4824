//! Error taxonomy for the injection engine.
//!
//! Most of these never reach a caller: strategies turn every failure into a
//! fallback signal and invalid windows are evicted silently. Only argument
//! errors are returned from the public engine calls.

use thiserror::Error;

use crate::strategy::StrategyId;
use crate::window::WindowHandle;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("strategy {strategy} failed")]
    StrategyFailed { strategy: StrategyId },
    #[error("window {0} is no longer valid")]
    WindowInvalid(WindowHandle),
    #[error("device enumeration failed: {0}")]
    DeviceEnumerationFailed(String),
    #[error("failed to attach thread input {from} -> {to}")]
    ThreadAttachFailed { from: u32, to: u32 },
    #[error("all strategies exhausted for window {0}")]
    AllStrategiesExhausted(WindowHandle),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("platform call failed: {0}")]
    Platform(String),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
