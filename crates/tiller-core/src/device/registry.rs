// Tiller Device Registry
// Ownership of live devices, id assignment, and name uniqueness

use std::collections::HashMap;

use crate::device::{Device, INVALID_DEVICE_ID};

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Externally supplied ids come from a trusted allocator; a collision
    /// means that trust was violated. Callers treat this as fatal.
    #[error("device id {0} is already in use")]
    DuplicateDeviceId(i32),

    #[error("device name is empty")]
    EmptyName,

    #[error("no device with id {0}")]
    UnknownDevice(i32),

    #[error("no template registered under `{0}`")]
    UnknownTemplate(String),
}

/// Owns the set of live devices and the id → device mapping.
///
/// Ids are stable for the registry's lifetime and allocated monotonically
/// from 1 unless the native layer supplies its own. Display names are kept
/// unique among live devices by numeric-suffix probing.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
    by_id: HashMap<i32, usize>,
    next_id: i32,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            by_id: HashMap::new(),
            next_id: 1,
        }
    }

    /// Register `device`, assigning its id and unique display name.
    ///
    /// A device arriving with a non-invalid id keeps it after a uniqueness
    /// check; otherwise an id is allocated. On error the registry is left
    /// unmutated.
    pub fn add(&mut self, mut device: Device) -> RegistryResult<i32> {
        if device.name().is_empty() {
            return Err(RegistryError::EmptyName);
        }

        let id = if device.id() != INVALID_DEVICE_ID {
            if self.by_id.contains_key(&device.id()) {
                return Err(RegistryError::DuplicateDeviceId(device.id()));
            }
            // Keep local allocation clear of the supplied range.
            self.next_id = self.next_id.max(device.id() + 1);
            device.id()
        } else {
            let id = self.next_id;
            self.next_id += 1;
            id
        };
        device.set_id(id);

        let name = self.resolve_unique_name(device.name());
        device.set_name(name);

        log::debug!(
            "registered device {} (`{}`, template `{}`)",
            id,
            device.name(),
            device.template_name()
        );

        let index = self.devices.len();
        self.devices.push(device);
        self.by_id.insert(id, index);
        Ok(id)
    }

    /// Remove the device with `id`, returning it.
    pub fn remove(&mut self, id: i32) -> RegistryResult<Device> {
        let index = self
            .by_id
            .remove(&id)
            .ok_or(RegistryError::UnknownDevice(id))?;
        let device = self.devices.remove(index);
        // Indices above the removal point shifted down by one.
        for slot in self.by_id.values_mut() {
            if *slot > index {
                *slot -= 1;
            }
        }
        log::debug!("removed device {} (`{}`)", id, device.name());
        Ok(device)
    }

    /// O(1) lookup; `None` for unknown ids, since dispatch routinely probes
    /// for devices that may have gone away.
    pub fn device_by_id(&self, id: i32) -> Option<&Device> {
        self.by_id.get(&id).map(|&index| &self.devices[index])
    }

    pub(crate) fn device_by_id_mut(&mut self, id: i32) -> Option<&mut Device> {
        let index = self.by_id.get(&id).copied()?;
        Some(&mut self.devices[index])
    }

    /// Case-insensitive lookup by display name.
    pub fn device_by_name(&self, name: &str) -> Option<&Device> {
        self.devices
            .iter()
            .find(|device| device.name().eq_ignore_ascii_case(name))
    }

    /// Live devices in registration order.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub(crate) fn devices_mut(&mut self) -> &mut [Device] {
        &mut self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn name_taken(&self, name: &str) -> bool {
        self.devices
            .iter()
            .any(|device| device.name().eq_ignore_ascii_case(name))
    }

    fn resolve_unique_name(&self, base: &str) -> String {
        if !self.name_taken(base) {
            return base.to_string();
        }
        let mut suffix = 1u32;
        loop {
            let candidate = format!("{base}{suffix}");
            if !self.name_taken(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }
}
