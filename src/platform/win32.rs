//! Windows implementation of [`InputBackend`].

use std::ffi::c_void;
use std::time::Duration;

use smallvec::SmallVec;
use tracing::{debug, trace};
use windows::Win32::Devices::HumanInterfaceDevice::{HidD_GetManufacturerString, HidD_GetProductString};
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND, LPARAM, MAX_PATH, WPARAM};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::Threading::{
    AttachThreadInput, GetCurrentThreadId, OpenProcess, PROCESS_NAME_WIN32,
    PROCESS_QUERY_LIMITED_INFORMATION, QueryFullProcessImageNameW,
};
use windows::Win32::UI::Input::KeyboardAndMouse::*;
use windows::Win32::UI::Input::{
    GetRawInputDeviceInfoW, GetRawInputDeviceList, RAWINPUTDEVICELIST, RID_DEVICE_INFO,
    RIDI_DEVICEINFO, RIDI_DEVICENAME, RIM_TYPEHID, RIM_TYPEKEYBOARD, RIM_TYPEMOUSE,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumChildWindows, EnumWindows, GetClassNameW, GetWindowThreadProcessId, IsWindow,
    IsWindowVisible, PostMessageW, SMTO_ABORTIFHUNG, SendMessageTimeoutW,
};
use windows::core::{BOOL, PCWSTR, PWSTR};

use super::{InputBackend, MouseButton, SyntheticInput};
use crate::devices::{DeviceDescriptor, DeviceKind};
use crate::error::{EngineError, Result};
use crate::keys::KeyCode;
use crate::window::{TargetWindow, WindowHandle};

#[inline(always)]
fn hwnd(window: WindowHandle) -> HWND {
    HWND(window.0 as *mut c_void)
}

fn last_error(call: &str) -> EngineError {
    EngineError::Platform(format!("{call}: {}", std::io::Error::last_os_error()))
}

/// Closes a device handle on every exit path.
struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Backend;

impl Win32Backend {
    pub fn new() -> Self {
        Self
    }

    fn to_input(input: &SyntheticInput) -> INPUT {
        match *input {
            SyntheticInput::Key {
                scan_code,
                extended,
                key_up,
                extra_info,
                ..
            } => {
                let mut flags = KEYEVENTF_SCANCODE;
                if extended {
                    flags |= KEYEVENTF_EXTENDEDKEY;
                }
                if key_up {
                    flags |= KEYEVENTF_KEYUP;
                }
                INPUT {
                    r#type: INPUT_KEYBOARD,
                    Anonymous: INPUT_0 {
                        ki: KEYBDINPUT {
                            wVk: VIRTUAL_KEY(0),
                            wScan: scan_code,
                            dwFlags: flags,
                            time: 0,
                            dwExtraInfo: extra_info,
                        },
                    },
                }
            }
            SyntheticInput::MouseButton {
                button,
                key_up,
                extra_info,
            } => {
                let flags = match (button, key_up) {
                    (MouseButton::Left, false) => MOUSEEVENTF_LEFTDOWN,
                    (MouseButton::Left, true) => MOUSEEVENTF_LEFTUP,
                    (MouseButton::Right, false) => MOUSEEVENTF_RIGHTDOWN,
                    (MouseButton::Right, true) => MOUSEEVENTF_RIGHTUP,
                    (MouseButton::Middle, false) => MOUSEEVENTF_MIDDLEDOWN,
                    (MouseButton::Middle, true) => MOUSEEVENTF_MIDDLEUP,
                };
                INPUT {
                    r#type: INPUT_MOUSE,
                    Anonymous: INPUT_0 {
                        mi: MOUSEINPUT {
                            dx: 0,
                            dy: 0,
                            mouseData: 0,
                            dwFlags: flags,
                            time: 0,
                            dwExtraInfo: extra_info,
                        },
                    },
                }
            }
        }
    }

    /// Interface path of a raw input device.
    fn device_name(device: HANDLE) -> Option<String> {
        unsafe {
            let mut size = 0u32;
            let result = GetRawInputDeviceInfoW(Some(device), RIDI_DEVICENAME, None, &mut size);
            if result != 0 || size == 0 {
                return None;
            }

            let mut path_buf = vec![0u16; size as usize];
            let result = GetRawInputDeviceInfoW(
                Some(device),
                RIDI_DEVICENAME,
                Some(path_buf.as_mut_ptr() as _),
                &mut size,
            );
            if result == u32::MAX {
                return None;
            }

            let len = path_buf.iter().position(|&c| c == 0).unwrap_or(path_buf.len());
            Some(String::from_utf16_lossy(&path_buf[..len]))
        }
    }

    /// Kind and, for HID devices, vendor/product reported by the driver.
    fn device_info(device: HANDLE) -> Option<(DeviceKind, Option<(u16, u16)>)> {
        unsafe {
            let mut info = RID_DEVICE_INFO {
                cbSize: std::mem::size_of::<RID_DEVICE_INFO>() as u32,
                ..Default::default()
            };
            let mut size = info.cbSize;
            let result = GetRawInputDeviceInfoW(
                Some(device),
                RIDI_DEVICEINFO,
                Some(&mut info as *mut RID_DEVICE_INFO as _),
                &mut size,
            );
            if result == u32::MAX {
                return None;
            }

            match info.dwType {
                t if t == RIM_TYPEKEYBOARD => Some((DeviceKind::Keyboard, None)),
                t if t == RIM_TYPEMOUSE => Some((DeviceKind::Mouse, None)),
                t if t == RIM_TYPEHID => {
                    let hid = &info.Anonymous.hid;
                    Some((
                        DeviceKind::Hid,
                        Some((hid.dwVendorId as u16, hid.dwProductId as u16)),
                    ))
                }
                _ => None,
            }
        }
    }

    /// Opens the interface just long enough to read its descriptive strings.
    fn device_strings(path: &str) -> (Option<String>, Option<String>) {
        let wide: Vec<u16> = path.encode_utf16().chain(std::iter::once(0)).collect();
        let handle = unsafe {
            CreateFileW(
                PCWSTR(wide.as_ptr()),
                0,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                OPEN_EXISTING,
                FILE_FLAGS_AND_ATTRIBUTES(0),
                None,
            )
        };
        let Ok(handle) = handle else {
            trace!(path, "device interface not openable");
            return (None, None);
        };
        let handle = OwnedHandle(handle);

        let read = |query: fn(HANDLE, *mut c_void, u32) -> bool| -> Option<String> {
            let mut buffer = [0u16; 127];
            let ok = query(
                handle.0,
                buffer.as_mut_ptr() as *mut c_void,
                (buffer.len() * 2) as u32,
            );
            if !ok {
                return None;
            }
            let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
            let text = String::from_utf16_lossy(&buffer[..len]).trim().to_string();
            (!text.is_empty()).then_some(text)
        };

        let product = read(|h, b, l| unsafe { HidD_GetProductString(h, b, l).into() });
        let manufacturer = read(|h, b, l| unsafe { HidD_GetManufacturerString(h, b, l).into() });
        (product, manufacturer)
    }

    fn process_name(process_id: u32) -> Option<String> {
        if process_id == 0 {
            return None;
        }
        unsafe {
            let process = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, process_id).ok()?;
            let process = OwnedHandle(process);

            let mut buffer = [0u16; MAX_PATH as usize];
            let mut size = buffer.len() as u32;
            QueryFullProcessImageNameW(
                process.0,
                PROCESS_NAME_WIN32,
                PWSTR(buffer.as_mut_ptr()),
                &mut size,
            )
            .ok()?;
            let path = String::from_utf16_lossy(&buffer[..size as usize]);
            path.split('\\').next_back().map(|s| s.to_lowercase())
        }
    }
}

unsafe extern "system" fn collect_handles(window: HWND, lparam: LPARAM) -> BOOL {
    let handles = unsafe { &mut *(lparam.0 as *mut Vec<WindowHandle>) };
    handles.push(WindowHandle(window.0 as isize));
    BOOL(1) // continue enumeration
}

impl InputBackend for Win32Backend {
    fn is_window(&self, window: WindowHandle) -> bool {
        !window.is_null() && unsafe { IsWindow(Some(hwnd(window))).as_bool() }
    }

    fn window_thread_id(&self, window: WindowHandle) -> Result<u32> {
        match unsafe { GetWindowThreadProcessId(hwnd(window), None) } {
            0 => Err(EngineError::WindowInvalid(window)),
            thread_id => Ok(thread_id),
        }
    }

    fn current_thread_id(&self) -> u32 {
        unsafe { GetCurrentThreadId() }
    }

    fn post_message(
        &self,
        window: WindowHandle,
        msg: u32,
        wparam: usize,
        lparam: isize,
    ) -> Result<()> {
        unsafe { PostMessageW(Some(hwnd(window)), msg, WPARAM(wparam), LPARAM(lparam)) }
            .map_err(|e| EngineError::Platform(format!("PostMessageW: {e}")))
    }

    fn send_message_timeout(
        &self,
        window: WindowHandle,
        msg: u32,
        wparam: usize,
        lparam: isize,
        timeout: Duration,
    ) -> Result<isize> {
        let mut result = 0usize;
        let ok = unsafe {
            SendMessageTimeoutW(
                hwnd(window),
                msg,
                WPARAM(wparam),
                LPARAM(lparam),
                SMTO_ABORTIFHUNG,
                timeout.as_millis().min(u32::MAX as u128) as u32,
                Some(&mut result as *mut usize),
            )
        };
        if ok.0 == 0 {
            return Err(last_error("SendMessageTimeoutW"));
        }
        Ok(result as isize)
    }

    fn child_windows(&self, window: WindowHandle) -> Result<Vec<WindowHandle>> {
        // EnumChildWindows already walks all descendants.
        let mut handles: Vec<WindowHandle> = Vec::new();
        unsafe {
            let _ = EnumChildWindows(
                Some(hwnd(window)),
                Some(collect_handles),
                LPARAM(&mut handles as *mut Vec<WindowHandle> as isize),
            );
        }
        Ok(handles)
    }

    fn class_name(&self, window: WindowHandle) -> Result<String> {
        let mut buffer = [0u16; 256];
        let len = unsafe { GetClassNameW(hwnd(window), &mut buffer) };
        if len <= 0 {
            return Err(last_error("GetClassNameW"));
        }
        Ok(String::from_utf16_lossy(&buffer[..len as usize]))
    }

    fn map_vk_to_scancode(&self, key: KeyCode) -> u16 {
        unsafe { MapVirtualKeyW(key.vk() as u32, MAPVK_VK_TO_VSC) as u16 }
    }

    fn send_input(&self, inputs: &[SyntheticInput]) -> Result<()> {
        let native: SmallVec<[INPUT; 4]> = inputs.iter().map(Self::to_input).collect();
        let sent = unsafe { SendInput(&native, std::mem::size_of::<INPUT>() as i32) };
        if sent as usize != native.len() {
            return Err(last_error("SendInput"));
        }
        Ok(())
    }

    fn attach_thread_input(&self, from: u32, to: u32, attach: bool) -> Result<()> {
        if unsafe { AttachThreadInput(from, to, attach) }.as_bool() {
            Ok(())
        } else {
            Err(EngineError::ThreadAttachFailed { from, to })
        }
    }

    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let entry_size = std::mem::size_of::<RAWINPUTDEVICELIST>() as u32;
        let mut count = 0u32;
        unsafe {
            if GetRawInputDeviceList(None, &mut count, entry_size) == u32::MAX {
                return Err(EngineError::DeviceEnumerationFailed(
                    std::io::Error::last_os_error().to_string(),
                ));
            }
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut list = vec![RAWINPUTDEVICELIST::default(); count as usize];
        let written = unsafe { GetRawInputDeviceList(Some(list.as_mut_ptr()), &mut count, entry_size) };
        if written == u32::MAX {
            return Err(EngineError::DeviceEnumerationFailed(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        list.truncate(written as usize);

        let mut devices = Vec::with_capacity(list.len());
        for entry in &list {
            let Some(path) = Self::device_name(entry.hDevice) else {
                continue;
            };
            let Some((kind, reported)) = Self::device_info(entry.hDevice) else {
                continue;
            };
            let descriptor = DeviceDescriptor::from_path(path.clone(), kind).or_else(|| {
                reported.map(|(vendor_id, product_id)| DeviceDescriptor {
                    vendor_id,
                    product_id,
                    path: path.clone(),
                    kind,
                    product: None,
                    manufacturer: None,
                })
            });
            let Some(mut descriptor) = descriptor else {
                trace!(path, "device without vendor/product, skipped");
                continue;
            };
            let (product, manufacturer) = Self::device_strings(&path);
            descriptor.product = product;
            descriptor.manufacturer = manufacturer;
            devices.push(descriptor);
        }

        debug!(raw = list.len(), usable = devices.len(), "raw input devices listed");
        Ok(devices)
    }

    fn top_level_windows(&self, process_name: &str) -> Result<Vec<TargetWindow>> {
        let wanted = process_name.to_lowercase();
        let mut handles: Vec<WindowHandle> = Vec::new();
        unsafe {
            EnumWindows(
                Some(collect_handles),
                LPARAM(&mut handles as *mut Vec<WindowHandle> as isize),
            )
            .map_err(|e| EngineError::Platform(format!("EnumWindows: {e}")))?;
        }

        let mut windows = Vec::new();
        for handle in handles {
            if !unsafe { IsWindowVisible(hwnd(handle)) }.as_bool() {
                continue;
            }
            let mut process_id = 0u32;
            unsafe { GetWindowThreadProcessId(hwnd(handle), Some(&mut process_id as *mut u32)) };
            if Self::process_name(process_id).as_deref() == Some(wanted.as_str()) {
                windows.push(TargetWindow::new(handle, process_id));
            }
        }
        Ok(windows)
    }
}
