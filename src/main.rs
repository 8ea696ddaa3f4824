#[cfg(windows)]
mod signal;

use std::io::BufRead;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use keycast::platform::scripted::ScriptedBackend;
use keycast::{
    EngineConfig, InjectionEngine, KeyCode, KeyPhase, MouseButton, StaticRegistry, TargetWindow,
    WindowHandle,
};

const DEFAULT_CONFIG_PATH: &str = "Config.toml";

fn init_logging(fallback: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .try_init();
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let dry_run = args.iter().any(|a| a == "--dry-run");
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);

    // Load config or create default if not exists
    let config = EngineConfig::load_or_create(config_path)
        .with_context(|| format!("Failed to load configuration from {config_path}"))?;
    init_logging(&config.log_level);

    if dry_run {
        return run_dry(&config);
    }

    #[cfg(windows)]
    return run_hooked(&config);
    #[cfg(not(windows))]
    return run_dry(&config);
}

#[cfg(windows)]
fn run_hooked(config: &EngineConfig) -> Result<()> {
    use keycast::hook::{self, KeyboardHook};
    use keycast::platform::win32::Win32Backend;
    use keycast::router::KeyRouter;
    use windows::Win32::Media::{timeBeginPeriod, timeEndPeriod};

    // Request 1ms timer resolution for precise press timing
    unsafe { timeBeginPeriod(1) };

    let backend = Arc::new(Win32Backend::new());
    let registry = StaticRegistry::new(vec![]);
    registry.register_processes(backend.as_ref(), &config.target_processes);
    if config.target_processes.is_empty() {
        warn!("no target_processes configured, broadcasts will reach no window");
    }

    let engine = Arc::new(InjectionEngine::new(backend, registry, config)?);
    let router = KeyRouter::new(
        engine.clone(),
        config.toggle_key_code()?,
        &config.held_key_codes()?,
    );

    signal::set_control_ctrl_handler(hook::request_quit)?;

    let hook = KeyboardHook::install(router)?;
    info!(toggle = %config.toggle_key, "ready, press the toggle key to start broadcasting");
    let outcome = hook.run_message_loop();

    engine.shutdown();
    unsafe { timeEndPeriod(1) };
    outcome
}

/// Reads commands from stdin and drives an engine over an in-memory backend.
fn run_dry(config: &EngineConfig) -> Result<()> {
    let backend = Arc::new(ScriptedBackend::permissive());
    let registry = StaticRegistry::new(vec![]);
    let engine = InjectionEngine::new(backend.clone(), registry.clone(), config)?;
    engine.start_broadcast();

    info!("dry run: window <hwnd> | profile <hwnd> | down|up|press <key> | click <hwnd> <x> <y> | start | stop | quit");
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let words: Vec<&str> = line.split_whitespace().collect();
        // Only report what happened while this command ran.
        backend.clear_calls();
        match execute(&engine, &registry, &words) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => warn!(command = %line, error = %e, "command failed"),
        }
        for call in backend.calls() {
            info!(?call, "backend call");
        }
    }

    engine.shutdown();
    Ok(())
}

/// Runs one dry-run command; `Ok(false)` ends the session.
fn execute(engine: &InjectionEngine, registry: &StaticRegistry, words: &[&str]) -> Result<bool> {
    match words {
        [] => {}
        ["quit"] | ["exit"] => return Ok(false),
        ["start"] => engine.start_broadcast(),
        ["stop"] => {
            let released = engine.stop_broadcast();
            info!(released, "broadcast stopped");
        }
        ["window", handle] => {
            let handle = parse_handle(handle)?;
            registry.register(TargetWindow::new(handle, handle.0 as u32));
        }
        [phase @ ("down" | "up" | "press"), key] => {
            let phase = match *phase {
                "down" => KeyPhase::Down,
                "up" => KeyPhase::Up,
                _ => KeyPhase::Press,
            };
            let key: KeyCode = key.parse()?;
            for (window, result) in engine.broadcast(key, phase)? {
                info!(hwnd = %window, success = result.success, strategy = ?result.strategy, "delivered");
            }
        }
        ["profile", handle] => match engine.profile(parse_handle(handle)?) {
            Some(profile) => info!(?profile, "cached profile"),
            None => info!("window not classified yet"),
        },
        ["click", handle, x, y] => {
            let result = engine.send_mouse_click(
                parse_handle(handle)?,
                MouseButton::Left,
                x.parse()?,
                y.parse()?,
            )?;
            info!(success = result.success, strategy = ?result.strategy, "clicked");
        }
        _ => bail!("unknown command"),
    }
    Ok(true)
}

fn parse_handle(text: &str) -> Result<WindowHandle> {
    let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => isize::from_str_radix(hex, 16)?,
        None => text.parse()?,
    };
    Ok(WindowHandle(value))
}
