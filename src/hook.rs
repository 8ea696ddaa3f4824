//! Low-level keyboard hook feeding physical keystrokes to a [`KeyRouter`].
//!
//! The hook callback only forwards events over a channel; routing and
//! injection run on a dispatcher thread so the callback stays fast.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, info};
use windows::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::*;

use crate::keys::KeyCode;
use crate::platform::SIMULATED_EVENT_MARKER;
use crate::router::{KeyEvent, KeyRouter};

static HOOK_SINK: OnceLock<Sender<KeyEvent>> = OnceLock::new();
static HOOK_THREAD: AtomicU32 = AtomicU32::new(0);

pub struct KeyboardHook {
    hook_handle: HHOOK,
}

impl KeyboardHook {
    /// Installs the hook on the calling thread, which must then run
    /// [`run_message_loop`](Self::run_message_loop).
    pub fn install(router: KeyRouter) -> anyhow::Result<Self> {
        let (tx, rx) = unbounded();
        HOOK_SINK
            .set(tx)
            .map_err(|_| anyhow::anyhow!("keyboard hook already installed"))?;

        // Detached: the sink lives in a static, so the channel never closes.
        thread::Builder::new()
            .name("key_dispatcher".to_string())
            .spawn(move || Self::dispatch(router, rx))?;

        let hook = unsafe { SetWindowsHookExW(WH_KEYBOARD_LL, Some(Self::keyboard_proc), None, 0)? };
        if hook.0.is_null() {
            anyhow::bail!("Failed to set keyboard hook.");
        }
        HOOK_THREAD.store(unsafe { GetCurrentThreadId() }, Ordering::Release);

        info!("keyboard hook installed");
        Ok(Self { hook_handle: hook })
    }

    /// Pumps messages until [`request_quit`] is called.
    pub fn run_message_loop(mut self) -> anyhow::Result<()> {
        unsafe {
            let mut msg = MSG::default();
            loop {
                let result = GetMessageW(&mut msg, None, 0, 0);
                if result.0 == 0 || result.0 == -1 {
                    break;
                }
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
            let _ = UnhookWindowsHookEx(self.hook_handle);
        }
        self.hook_handle = HHOOK::default();
        debug!("keyboard hook message loop finished");
        Ok(())
    }

    unsafe extern "system" fn keyboard_proc(code: i32, w_param: WPARAM, l_param: LPARAM) -> LRESULT {
        if code < 0 {
            return unsafe { CallNextHookEx(None, code, w_param, l_param) };
        }

        let kb_struct = unsafe { &*(l_param.0 as *const KBDLLHOOKSTRUCT) };

        // Skip our own and other injected events
        let injected = (kb_struct.flags.0 & LLKHF_INJECTED.0) != 0;
        if kb_struct.dwExtraInfo == SIMULATED_EVENT_MARKER || injected {
            return unsafe { CallNextHookEx(None, code, w_param, l_param) };
        }

        if let Some(sink) = HOOK_SINK.get() {
            let key = KeyCode(kb_struct.vkCode as u16);
            let event = match w_param.0 as u32 {
                WM_KEYDOWN | WM_SYSKEYDOWN => Some(KeyEvent::Pressed(key)),
                WM_KEYUP | WM_SYSKEYUP => Some(KeyEvent::Released(key)),
                _ => None,
            };
            if let Some(event) = event {
                let _ = sink.send(event);
            }
        }

        unsafe { CallNextHookEx(None, code, w_param, l_param) }
    }

    fn dispatch(mut router: KeyRouter, events: Receiver<KeyEvent>) {
        while let Ok(event) = events.recv() {
            let routed = router.handle(event);
            debug!(?event, ?routed, "key event routed");
        }
    }
}

impl Drop for KeyboardHook {
    fn drop(&mut self) {
        if !self.hook_handle.0.is_null() {
            unsafe {
                let _ = UnhookWindowsHookEx(self.hook_handle);
            }
        }
    }
}

/// Ends the hook thread's message loop. Safe to call from any thread.
pub fn request_quit() {
    let thread_id = HOOK_THREAD.load(Ordering::Acquire);
    if thread_id != 0 {
        unsafe {
            let _ = PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
        }
    }
}
