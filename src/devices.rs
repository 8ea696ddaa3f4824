//! Hardware device catalog.
//!
//! Physical keyboards, mice and HID devices are enumerated once when the
//! engine is built. The hardware-tagged strategy borrows a vendor/product
//! pair from here; nothing else depends on it.

use std::fmt;

use tracing::{debug, info, warn};

use crate::platform::InputBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Keyboard,
    Mouse,
    Hid,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceKind::Keyboard => "keyboard",
            DeviceKind::Mouse => "mouse",
            DeviceKind::Hid => "hid",
        })
    }
}

/// One enumerated physical device. Immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub path: String,
    pub kind: DeviceKind,
    pub product: Option<String>,
    pub manufacturer: Option<String>,
}

impl DeviceDescriptor {
    /// Builds a descriptor from an interface path, taking VID/PID from it.
    pub fn from_path(path: impl Into<String>, kind: DeviceKind) -> Option<Self> {
        let path = path.into();
        let (vendor_id, product_id) = parse_vid_pid(&path)?;
        Some(Self {
            vendor_id,
            product_id,
            path,
            kind,
            product: None,
            manufacturer: None,
        })
    }

    /// Value stamped into `dwExtraInfo` by the hardware-tagged strategy.
    #[inline]
    pub fn tag(&self) -> usize {
        ((self.vendor_id as usize) << 16) | self.product_id as usize
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:04X}:{:04X}",
            self.kind, self.vendor_id, self.product_id
        )?;
        if let Some(product) = &self.product {
            write!(f, " ({product})")?;
        }
        Ok(())
    }
}

/// Parses `VID_xxxx` and `PID_xxxx` out of a device interface path such as
/// `\\?\HID#VID_046D&PID_C52B&MI_00#7&1a2b3c&0&0000#{...}`.
pub fn parse_vid_pid(path: &str) -> Option<(u16, u16)> {
    let upper = path.to_ascii_uppercase();
    let field = |prefix: &str| -> Option<u16> {
        let start = upper.find(prefix)? + prefix.len();
        let hex = upper.get(start..start + 4)?;
        u16::from_str_radix(hex, 16).ok()
    };
    Some((field("VID_")?, field("PID_")?))
}

/// Devices found at startup.
#[derive(Debug, Default)]
pub struct DeviceCatalog {
    devices: Vec<DeviceDescriptor>,
}

impl DeviceCatalog {
    /// Enumerates devices once. Failure leaves the catalog empty, which only
    /// disables the hardware-tagged strategy.
    pub fn enumerate(backend: &dyn InputBackend) -> Self {
        let devices = match backend.enumerate_devices() {
            Ok(mut devices) => {
                devices.retain(|d| d.vendor_id != 0);
                devices.sort_by_key(|d| (d.kind as u8, d.vendor_id, d.product_id));
                devices.dedup_by(|a, b| a.path == b.path);
                devices
            }
            Err(e) => {
                warn!(error = %e, "device enumeration failed, hardware tagging unavailable");
                Vec::new()
            }
        };

        info!(count = devices.len(), "device catalog ready");
        for device in &devices {
            debug!(device = %device, path = %device.path, "enumerated device");
        }
        Self { devices }
    }

    pub fn from_devices(devices: Vec<DeviceDescriptor>) -> Self {
        Self { devices }
    }

    #[inline]
    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Device whose identity is borrowed for hardware tagging: the first
    /// keyboard, else the first device of any kind.
    pub fn tag_source(&self) -> Option<&DeviceDescriptor> {
        self.devices
            .iter()
            .find(|d| d.kind == DeviceKind::Keyboard)
            .or_else(|| self.devices.first())
    }
}

impl Drop for DeviceCatalog {
    fn drop(&mut self) {
        if !self.devices.is_empty() {
            debug!(count = self.devices.len(), "releasing device catalog");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGITECH_PATH: &str =
        r"\\?\HID#VID_046D&PID_C52B&MI_00#7&1a2b3c&0&0000#{884b96c3-56ef-11d1-bc8c-00a0c91405dd}";

    #[test]
    fn test_parse_vid_pid() {
        assert_eq!(parse_vid_pid(LOGITECH_PATH), Some((0x046D, 0xC52B)));
        assert_eq!(parse_vid_pid(r"\\?\hid#vid_045e&pid_0b05#abc"), Some((0x045E, 0x0B05)));
        assert_eq!(parse_vid_pid(r"\\?\ACPI#PNP0303#4&1"), None);
        assert_eq!(parse_vid_pid(r"\\?\HID#VID_04"), None);
    }

    #[test]
    fn test_tag_layout() {
        let device = DeviceDescriptor::from_path(LOGITECH_PATH, DeviceKind::Keyboard).unwrap();
        assert_eq!(device.tag(), 0x046D_C52B);
    }

    #[test]
    fn test_tag_source_prefers_keyboard() {
        let mouse = DeviceDescriptor::from_path(r"\\?\HID#VID_1111&PID_2222#1", DeviceKind::Mouse)
            .unwrap();
        let keyboard =
            DeviceDescriptor::from_path(r"\\?\HID#VID_3333&PID_4444#1", DeviceKind::Keyboard)
                .unwrap();
        let catalog = DeviceCatalog::from_devices(vec![mouse.clone(), keyboard.clone()]);
        assert_eq!(catalog.tag_source(), Some(&keyboard));

        let empty = DeviceCatalog::default();
        assert!(empty.tag_source().is_none());
    }
}
