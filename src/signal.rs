use std::sync::OnceLock;

use windows::Win32::System::Console::*;
use windows::core::*;

type ShutdownFn = Box<dyn Fn() + Send + Sync>;

static ON_SHUTDOWN: OnceLock<ShutdownFn> = OnceLock::new();

/// Runs `on_shutdown` on Ctrl-C, Ctrl-Break or console close.
pub fn set_control_ctrl_handler(on_shutdown: impl Fn() + Send + Sync + 'static) -> Result<()> {
    let _ = ON_SHUTDOWN.set(Box::new(on_shutdown));
    unsafe { SetConsoleCtrlHandler(Some(console_handler), true) }
}

#[allow(non_snake_case)]
unsafe extern "system" fn console_handler(ctrl_type: u32) -> BOOL {
    match ctrl_type {
        CTRL_C_EVENT | CTRL_BREAK_EVENT | CTRL_CLOSE_EVENT => {
            match ON_SHUTDOWN.get() {
                Some(shutdown) => shutdown(),  // graceful shutdown
                None => std::process::exit(0), // force shutdown
            }
            BOOL(1) // Event has been handled
        }
        _ => BOOL(0), // Leave other events to the default handler
    }
}
