//! In-memory input backend.
//!
//! Holds a scripted set of windows and devices, records every primitive
//! call and can be told to fail individual primitives. Used for dry runs
//! and to drive the engine in tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;

use super::{InputBackend, SyntheticInput};
use crate::devices::DeviceDescriptor;
use crate::error::{EngineError, Result};
use crate::keys::KeyCode;
use crate::window::{TargetWindow, WindowHandle};

/// Primitive that can be switched to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    PostMessage,
    SendMessage,
    ChildWindows,
    ClassName,
    SendInput,
    AttachThreadInput,
    EnumerateDevices,
}

/// Recorded primitive call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    PostMessage {
        window: WindowHandle,
        msg: u32,
        wparam: usize,
        lparam: isize,
    },
    SendMessage {
        window: WindowHandle,
        msg: u32,
        wparam: usize,
    },
    SendInput(Vec<SyntheticInput>),
    AttachThreadInput {
        from: u32,
        to: u32,
        attach: bool,
    },
}

#[derive(Debug, Clone)]
struct ScriptedWindow {
    class_name: String,
    thread_id: u32,
    process_id: u32,
    process_name: String,
    valid: bool,
    children: Vec<WindowHandle>,
}

#[derive(Default)]
struct Script {
    windows: HashMap<WindowHandle, ScriptedWindow>,
    devices: Vec<DeviceDescriptor>,
    failing: HashSet<Primitive>,
    rejecting: HashSet<WindowHandle>,
    failing_messages: HashSet<u32>,
    failing_key_up_input: bool,
    calls: VecDeque<BackendCall>,
    call_limit: Option<usize>,
    child_enumerations: HashMap<WindowHandle, usize>,
    attachments: HashMap<(u32, u32), i32>,
    accept_unknown: bool,
}

/// Calls retained by a [`ScriptedBackend::permissive`] backend.
pub const PERMISSIVE_CALL_LIMIT: usize = 256;

impl Script {
    fn record(&mut self, call: BackendCall) {
        if let Some(limit) = self.call_limit
            && self.calls.len() >= limit
        {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }
}

pub struct ScriptedBackend {
    script: Mutex<Script>,
    thread_id: u32,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script::default()),
            thread_id: 1,
        }
    }

    /// Backend that treats any non-null handle as a valid, unclassified
    /// window. Used for dry runs, so only the most recent
    /// [`PERMISSIVE_CALL_LIMIT`] calls are kept.
    pub fn permissive() -> Self {
        let backend = Self::new();
        {
            let mut script = backend.script.lock();
            script.accept_unknown = true;
            script.call_limit = Some(PERMISSIVE_CALL_LIMIT);
        }
        backend
    }

    pub fn add_window(&self, handle: WindowHandle, class_name: &str, thread_id: u32) {
        self.script.lock().windows.insert(
            handle,
            ScriptedWindow {
                class_name: class_name.to_string(),
                thread_id,
                process_id: thread_id,
                process_name: String::new(),
                valid: true,
                children: Vec::new(),
            },
        );
    }

    /// Adds a top-level window owned by a named process.
    pub fn add_process_window(&self, handle: WindowHandle, process_name: &str, process_id: u32) {
        self.add_window(handle, "", process_id);
        if let Some(window) = self.script.lock().windows.get_mut(&handle) {
            window.process_name = process_name.to_lowercase();
        }
    }

    /// Adds `child` under `parent`, inheriting the parent's thread.
    pub fn add_child(&self, parent: WindowHandle, child: WindowHandle, class_name: &str) {
        let mut script = self.script.lock();
        let thread_id = script.windows.get(&parent).map_or(0, |w| w.thread_id);
        script.windows.insert(
            child,
            ScriptedWindow {
                class_name: class_name.to_string(),
                thread_id,
                process_id: thread_id,
                process_name: String::new(),
                valid: true,
                children: Vec::new(),
            },
        );
        if let Some(parent) = script.windows.get_mut(&parent) {
            parent.children.push(child);
        }
    }

    pub fn set_valid(&self, handle: WindowHandle, valid: bool) {
        if let Some(window) = self.script.lock().windows.get_mut(&handle) {
            window.valid = valid;
        }
    }

    pub fn set_devices(&self, devices: Vec<DeviceDescriptor>) {
        self.script.lock().devices = devices;
    }

    /// Makes every call of `primitive` fail.
    pub fn fail(&self, primitive: Primitive) {
        self.script.lock().failing.insert(primitive);
    }

    pub fn restore(&self, primitive: Primitive) {
        self.script.lock().failing.remove(&primitive);
    }

    /// Makes posted and sent messages to `handle` fail.
    pub fn reject_messages_to(&self, handle: WindowHandle) {
        self.script.lock().rejecting.insert(handle);
    }

    /// Makes posted and sent messages with this id fail, on every window.
    pub fn fail_message(&self, msg: u32) {
        self.script.lock().failing_messages.insert(msg);
    }

    /// Makes synthetic input batches containing a key-up edge fail.
    pub fn fail_key_up_input(&self) {
        self.script.lock().failing_key_up_input = true;
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.script.lock().calls.iter().cloned().collect()
    }

    pub fn clear_calls(&self) {
        self.script.lock().calls.clear();
    }

    /// Messages posted to `handle`, in order.
    pub fn posted_to(&self, handle: WindowHandle) -> Vec<u32> {
        self.script
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::PostMessage { window, msg, .. } if *window == handle => Some(*msg),
                _ => None,
            })
            .collect()
    }

    /// Injected synthetic inputs, flattened.
    pub fn injected(&self) -> Vec<SyntheticInput> {
        self.script
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::SendInput(inputs) => Some(inputs.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn child_enumerations(&self, handle: WindowHandle) -> usize {
        self.script
            .lock()
            .child_enumerations
            .get(&handle)
            .copied()
            .unwrap_or(0)
    }

    /// Attachments not yet detached, summed over all thread pairs.
    pub fn outstanding_attachments(&self) -> i32 {
        self.script.lock().attachments.values().sum()
    }

    fn check(&self, script: &Script, primitive: Primitive) -> Result<()> {
        if script.failing.contains(&primitive) {
            Err(EngineError::Platform(format!("{primitive:?} scripted to fail")))
        } else {
            Ok(())
        }
    }

    fn check_target(&self, script: &Script, window: WindowHandle) -> Result<()> {
        if script.rejecting.contains(&window) || !Self::valid_in(script, window) {
            Err(EngineError::Platform(format!("window {window} rejected message")))
        } else {
            Ok(())
        }
    }

    fn check_message(&self, script: &Script, msg: u32) -> Result<()> {
        if script.failing_messages.contains(&msg) {
            Err(EngineError::Platform(format!("message {msg:#06x} scripted to fail")))
        } else {
            Ok(())
        }
    }

    fn valid_in(script: &Script, window: WindowHandle) -> bool {
        match script.windows.get(&window) {
            Some(w) => w.valid,
            None => script.accept_unknown && !window.is_null(),
        }
    }

    fn collect_descendants(script: &Script, window: WindowHandle, out: &mut Vec<WindowHandle>) {
        if let Some(w) = script.windows.get(&window) {
            for &child in &w.children {
                if Self::valid_in(script, child) {
                    out.push(child);
                    Self::collect_descendants(script, child, out);
                }
            }
        }
    }
}

impl InputBackend for ScriptedBackend {
    fn is_window(&self, window: WindowHandle) -> bool {
        Self::valid_in(&self.script.lock(), window)
    }

    fn window_thread_id(&self, window: WindowHandle) -> Result<u32> {
        let script = self.script.lock();
        match script.windows.get(&window) {
            Some(w) if w.valid => Ok(w.thread_id),
            None if script.accept_unknown && !window.is_null() => Ok(window.0 as u32),
            _ => Err(EngineError::WindowInvalid(window)),
        }
    }

    fn current_thread_id(&self) -> u32 {
        self.thread_id
    }

    fn post_message(
        &self,
        window: WindowHandle,
        msg: u32,
        wparam: usize,
        lparam: isize,
    ) -> Result<()> {
        let mut script = self.script.lock();
        self.check(&script, Primitive::PostMessage)?;
        self.check_target(&script, window)?;
        self.check_message(&script, msg)?;
        script.record(BackendCall::PostMessage {
            window,
            msg,
            wparam,
            lparam,
        });
        Ok(())
    }

    fn send_message_timeout(
        &self,
        window: WindowHandle,
        msg: u32,
        wparam: usize,
        _lparam: isize,
        _timeout: Duration,
    ) -> Result<isize> {
        let mut script = self.script.lock();
        self.check(&script, Primitive::SendMessage)?;
        self.check_target(&script, window)?;
        self.check_message(&script, msg)?;
        script.record(BackendCall::SendMessage { window, msg, wparam });
        Ok(0)
    }

    fn child_windows(&self, window: WindowHandle) -> Result<Vec<WindowHandle>> {
        let mut script = self.script.lock();
        *script.child_enumerations.entry(window).or_default() += 1;
        self.check(&script, Primitive::ChildWindows)?;
        let mut out = Vec::new();
        Self::collect_descendants(&script, window, &mut out);
        Ok(out)
    }

    fn class_name(&self, window: WindowHandle) -> Result<String> {
        let script = self.script.lock();
        self.check(&script, Primitive::ClassName)?;
        match script.windows.get(&window) {
            Some(w) => Ok(w.class_name.clone()),
            None if script.accept_unknown => Ok(String::new()),
            None => Err(EngineError::WindowInvalid(window)),
        }
    }

    fn map_vk_to_scancode(&self, key: KeyCode) -> u16 {
        key.scan_code()
    }

    fn send_input(&self, inputs: &[SyntheticInput]) -> Result<()> {
        let mut script = self.script.lock();
        self.check(&script, Primitive::SendInput)?;
        if script.failing_key_up_input && inputs.iter().any(SyntheticInput::is_key_up) {
            return Err(EngineError::Platform("key-up input scripted to fail".to_string()));
        }
        script.record(BackendCall::SendInput(inputs.to_vec()));
        Ok(())
    }

    fn attach_thread_input(&self, from: u32, to: u32, attach: bool) -> Result<()> {
        let mut script = self.script.lock();
        self.check(&script, Primitive::AttachThreadInput)?;
        if attach {
            *script.attachments.entry((from, to)).or_default() += 1;
        } else {
            let count = script.attachments.entry((from, to)).or_default();
            if *count == 0 {
                return Err(EngineError::Platform("detach without attach".to_string()));
            }
            *count -= 1;
        }
        script.record(BackendCall::AttachThreadInput { from, to, attach });
        Ok(())
    }

    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let script = self.script.lock();
        if script.failing.contains(&Primitive::EnumerateDevices) {
            return Err(EngineError::DeviceEnumerationFailed(
                "scripted to fail".to_string(),
            ));
        }
        Ok(script.devices.clone())
    }

    fn top_level_windows(&self, process_name: &str) -> Result<Vec<TargetWindow>> {
        let wanted = process_name.to_lowercase();
        let script = self.script.lock();
        let mut windows: Vec<TargetWindow> = script
            .windows
            .iter()
            .filter(|(_, w)| w.valid && !w.process_name.is_empty() && w.process_name == wanted)
            .map(|(handle, w)| TargetWindow::new(*handle, w.process_id))
            .collect();
        windows.sort_by_key(|w| w.handle);
        Ok(windows)
    }
}
