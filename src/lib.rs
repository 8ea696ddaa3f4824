//! Background input injection for unfocused windows.
//!
//! Delivers synthetic key and mouse events to windows that do not hold the
//! input focus by escalating through an ordered chain of techniques, keeps
//! held keys asserted, and fans events out to every registered window.

pub mod broadcast;
pub mod classifier;
pub mod config;
pub mod devices;
pub mod engine;
pub mod error;
#[cfg(windows)]
pub mod hook;
pub mod keys;
pub mod mouse;
pub mod platform;
pub mod router;
pub mod strategy;
pub mod tracker;
pub mod util;
pub mod window;

pub use broadcast::BroadcastResults;
pub use config::EngineConfig;
pub use engine::{EngineState, InjectionEngine};
pub use error::{EngineError, Result};
pub use keys::{KeyCode, KeyPhase};
pub use platform::{InputBackend, MouseButton};
pub use strategy::{InjectionAttemptResult, InjectionStrategy, StrategyId};
pub use window::{StaticRegistry, TargetWindow, WindowHandle, WindowRegistry};
