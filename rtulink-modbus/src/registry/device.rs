//! Device records: bus address, polling cadence and link health counters.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::RegistryError;
use crate::types::DeviceId;

/// Highest unicast slave address on a Modbus line.
pub const MAX_BUS_ADDRESS: u8 = 247;

/// Parameters of a device to be registered.
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub name: String,
    pub address: u8,
    pub enabled: bool,
    /// Minimum interval between two full read sweeps.
    pub sampling_time: Duration,
}

impl NewDevice {
    pub fn new(name: impl Into<String>, address: u8, sampling_time: Duration) -> Self {
        Self {
            name: name.into(),
            address,
            enabled: true,
            sampling_time,
        }
    }
}

/// A registered bus device.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    pub address: u8,
    pub enabled: bool,
    pub sampling_time: Duration,
    /// Consecutive failed transactions.
    pub transmit_attempts: u32,
    /// Set when the device ran out of transmit attempts.
    pub lost_at: Option<Instant>,
    pub last_read_at: Option<Instant>,
    pub last_write_at: Option<Instant>,
}

impl DeviceRecord {
    pub fn is_lost(&self) -> bool {
        self.lost_at.is_some()
    }
}

/// Owns every device record, in registration order.
#[derive(Debug, Default)]
pub struct DeviceStore {
    records: HashMap<DeviceId, DeviceRecord>,
    order: Vec<DeviceId>,
    next_id: u32,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device. Bus addresses and names must be unique.
    pub fn append(&mut self, device: NewDevice) -> Result<DeviceId, RegistryError> {
        if device.address == 0 || device.address > MAX_BUS_ADDRESS {
            return Err(RegistryError::InvalidBusAddress(device.address));
        }
        if self.by_address(device.address).is_some() {
            return Err(RegistryError::DuplicateDevice(device.address));
        }
        if self.by_name(&device.name).is_some() {
            return Err(RegistryError::DuplicateName(device.name));
        }

        self.next_id += 1;
        let id = DeviceId(self.next_id);
        self.records.insert(
            id,
            DeviceRecord {
                id,
                name: device.name,
                address: device.address,
                enabled: device.enabled,
                sampling_time: device.sampling_time,
                transmit_attempts: 0,
                lost_at: None,
                last_read_at: None,
                last_write_at: None,
            },
        );
        self.order.push(id);
        Ok(id)
    }

    /// Remove a device. Unknown ids are ignored.
    pub fn remove(&mut self, id: DeviceId) -> Option<DeviceRecord> {
        let record = self.records.remove(&id)?;
        self.order.retain(|other| *other != id);
        Some(record)
    }

    pub fn get(&self, id: DeviceId) -> Option<&DeviceRecord> {
        self.records.get(&id)
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut DeviceRecord> {
        self.records.get_mut(&id)
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn is_lost(&self, id: DeviceId) -> bool {
        self.get(id).is_some_and(DeviceRecord::is_lost)
    }

    pub fn by_address(&self, address: u8) -> Option<&DeviceRecord> {
        self.iter().find(|device| device.address == address)
    }

    pub fn by_name(&self, name: &str) -> Option<&DeviceRecord> {
        self.iter().find(|device| device.name == name)
    }

    /// Device ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.order.iter().copied()
    }

    /// Device records in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> + '_ {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
