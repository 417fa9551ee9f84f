// Tiller Device Layer
// Concrete device instances, their controls, and the registry that owns them

pub mod registry;
pub mod template;

use std::fmt;

use crate::device::template::{ControlKind, DeviceTemplate};
use crate::fourcc::FourCC;
use crate::state::block::StateBlock;

pub use registry::{DeviceRegistry, RegistryError, RegistryResult};
pub use template::{ControlSpec, TemplateError, TemplateRegistry, TemplateResult};

/// Sentinel id meaning "no device" / "not yet assigned".
pub const INVALID_DEVICE_ID: i32 = 0;

/// Conventional ioctl result for "unhandled" or "no such device".
pub const IOCTL_UNHANDLED: i64 = -1;

/// Device-specific out-of-band request channel, distinct from the event
/// stream (haptics, polling frequency, and similar).
///
/// Handlers are installed once at startup, typically bridging to the native
/// runtime. A non-negative return value is handler-defined; negative values
/// conventionally mean unhandled.
pub trait IoctlHandler: Send {
    fn ioctl(&mut self, code: FourCC, buffer: &mut [u8]) -> i64;
}

impl<F> IoctlHandler for F
where
    F: FnMut(FourCC, &mut [u8]) -> i64 + Send,
{
    fn ioctl(&mut self, code: FourCC, buffer: &mut [u8]) -> i64 {
        self(code, buffer)
    }
}

/// One resolved control on a live device.
///
/// Sticks from the template expand into the stick entry itself plus
/// `<name>/x` and `<name>/y` axis children, giving paths their hierarchical
/// form.
#[derive(Debug, Clone, PartialEq)]
pub struct Control {
    name: String,
    kind: ControlKind,
    offset: u32,
    bit: u8,
}

impl Control {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ControlKind {
        self.kind
    }

    /// Byte offset into the owning device's state block.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Read this button from `state` (the owning device's state bytes).
    ///
    /// Returns `None` for non-button controls or a truncated slice.
    pub fn read_button(&self, state: &[u8]) -> Option<bool> {
        if self.kind != ControlKind::Button {
            return None;
        }
        let byte = state.get(self.offset as usize)?;
        Some(byte & (1 << self.bit) != 0)
    }

    /// Read this axis from `state`.
    ///
    /// Returns `None` for controls that are not axes (sticks expose their
    /// axes through their `/x` and `/y` children) or a truncated slice.
    pub fn read_axis(&self, state: &[u8]) -> Option<f32> {
        if self.kind != ControlKind::Axis {
            return None;
        }
        let start = self.offset as usize;
        let bytes: [u8; 4] = state.get(start..start + 4)?.try_into().ok()?;
        Some(f32::from_le_bytes(bytes))
    }
}

/// A live input device: a stable id, a unique display name, and a state
/// block inside the buffer set.
pub struct Device {
    id: i32,
    name: String,
    template: String,
    block: StateBlock,
    controls: Vec<Control>,
    last_event_time: f64,
    ioctl: Option<Box<dyn IoctlHandler>>,
}

impl Device {
    /// Resolve `template` into a fresh, unregistered device instance.
    ///
    /// The device starts with the invalid id and an unallocated state
    /// block; registration assigns both.
    pub fn from_template(template: &DeviceTemplate) -> Self {
        let mut controls = Vec::with_capacity(template.controls.len());
        for spec in &template.controls {
            controls.push(Control {
                name: spec.name.clone(),
                kind: spec.kind,
                offset: spec.offset,
                bit: spec.bit,
            });
            if spec.kind == ControlKind::Stick {
                controls.push(Control {
                    name: format!("{}/x", spec.name),
                    kind: ControlKind::Axis,
                    offset: spec.offset,
                    bit: 0,
                });
                controls.push(Control {
                    name: format!("{}/y", spec.name),
                    kind: ControlKind::Axis,
                    offset: spec.offset + 4,
                    bit: 0,
                });
            }
        }
        Self {
            id: INVALID_DEVICE_ID,
            name: template.name.clone(),
            template: template.name.clone(),
            block: StateBlock::new(template.format, template.state_size_in_bytes),
            controls,
            last_event_time: f64::NEG_INFINITY,
            ioctl: None,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template_name(&self) -> &str {
        &self.template
    }

    pub fn state_block(&self) -> &StateBlock {
        &self.block
    }

    /// Timestamp of the last event applied to this device's state.
    ///
    /// `f64::NEG_INFINITY` until the first event lands, so any incoming
    /// timestamp (negative ones included) passes the staleness check.
    pub fn last_event_time(&self) -> f64 {
        self.last_event_time
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    /// Look up a control by path, case-insensitively.
    ///
    /// A linear, allocation-free probe; unresolvable paths return `None`
    /// because dispatch-adjacent code probes speculatively.
    pub fn control(&self, path: &str) -> Option<&Control> {
        self.controls
            .iter()
            .find(|control| control.name.eq_ignore_ascii_case(path))
    }

    /// Install the out-of-band request handler for this device.
    pub fn set_ioctl_handler(&mut self, handler: impl IoctlHandler + 'static) {
        self.ioctl = Some(Box::new(handler));
    }

    pub(crate) fn handle_ioctl(&mut self, code: FourCC, buffer: &mut [u8]) -> i64 {
        match self.ioctl.as_mut() {
            Some(handler) => handler.ioctl(code, buffer),
            None => IOCTL_UNHANDLED,
        }
    }

    pub(crate) fn set_id(&mut self, id: i32) {
        self.id = id;
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub(crate) fn set_state_offset(&mut self, offset: u32) {
        self.block.set_offset(offset);
    }

    pub(crate) fn note_event_time(&mut self, time: f64) {
        self.last_event_time = time;
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("template", &self.template)
            .field("block", &self.block)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::template::DeviceTemplate;

    fn gamepad() -> DeviceTemplate {
        DeviceTemplate::new("Gamepad", FourCC::new(*b"GPAD"), 12)
            .with_button("buttonSouth", 0, 0)
            .with_button("buttonEast", 0, 1)
            .with_stick("leftStick", 4)
    }

    #[test]
    fn test_from_template_expands_stick_children() {
        let device = Device::from_template(&gamepad());
        assert!(device.control("leftStick").is_some());
        assert!(device.control("leftStick/x").is_some());
        assert!(device.control("leftStick/y").is_some());
        assert_eq!(device.control("leftStick/y").unwrap().offset(), 8);
    }

    #[test]
    fn test_control_lookup_is_case_insensitive_and_total() {
        let device = Device::from_template(&gamepad());
        assert!(device.control("BUTTONSOUTH").is_some());
        assert!(device.control("buttonWest").is_none());
    }

    #[test]
    fn test_button_reads_bits() {
        let device = Device::from_template(&gamepad());
        let state = [0b0000_0010u8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let south = device.control("buttonSouth").unwrap();
        let east = device.control("buttonEast").unwrap();
        assert_eq!(south.read_button(&state), Some(false));
        assert_eq!(east.read_button(&state), Some(true));
        assert_eq!(east.read_axis(&state), None);
    }

    #[test]
    fn test_axis_reads_little_endian_f32() {
        let device = Device::from_template(&gamepad());
        let mut state = [0u8; 12];
        state[4..8].copy_from_slice(&0.5f32.to_le_bytes());
        state[8..12].copy_from_slice(&(-1.0f32).to_le_bytes());
        let x = device.control("leftStick/x").unwrap();
        let y = device.control("leftStick/y").unwrap();
        assert_eq!(x.read_axis(&state), Some(0.5));
        assert_eq!(y.read_axis(&state), Some(-1.0));
        assert_eq!(x.read_button(&state), None);
    }

    #[test]
    fn test_ioctl_defaults_to_unhandled() {
        let mut device = Device::from_template(&gamepad());
        let mut buffer = [0u8; 4];
        assert_eq!(
            device.handle_ioctl(FourCC::new(*b"RMBL"), &mut buffer),
            IOCTL_UNHANDLED
        );

        device.set_ioctl_handler(|code: FourCC, buffer: &mut [u8]| {
            if code == FourCC::new(*b"RMBL") {
                buffer[0] = 1;
                0
            } else {
                IOCTL_UNHANDLED
            }
        });
        assert_eq!(device.handle_ioctl(FourCC::new(*b"RMBL"), &mut buffer), 0);
        assert_eq!(buffer[0], 1);
    }
}
