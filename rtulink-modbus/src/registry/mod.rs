//! In-memory model of the bus: devices, registers and device properties.
//!
//! The three stores own their records exclusively. [`Registry`] bundles
//! them, keeps cross-store invariants (a register or property always has a
//! device, removing a device removes what it owns) and publishes a
//! [`ValueReport`] whenever a value a host can observe changes.

mod device;
mod property;
mod register;

pub use device::{DeviceRecord, DeviceStore, MAX_BUS_ADDRESS, NewDevice};
pub use property::{PropertyRecord, PropertyStore};
pub use register::{NewRegister, RegisterRecord, RegisterStore};

use std::time::Instant;

use rtulink_common::{ConnectionState, Value, ValueReport};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::RegistryError;
use crate::types::{DeviceId, DeviceProperty, PropertyId, RegisterId};

/// Reports buffered per subscriber before the slowest one starts lagging.
const REPORT_CAPACITY: usize = 1024;

/// Devices, registers and properties of one serial line.
#[derive(Debug)]
pub struct Registry {
    devices: DeviceStore,
    registers: RegisterStore,
    properties: PropertyStore,
    reports: broadcast::Sender<ValueReport>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let (reports, _) = broadcast::channel(REPORT_CAPACITY);
        Self {
            devices: DeviceStore::new(),
            registers: RegisterStore::new(),
            properties: PropertyStore::new(),
            reports,
        }
    }

    /// Receive a report for every observable change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ValueReport> {
        self.reports.subscribe()
    }

    pub fn devices(&self) -> &DeviceStore {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut DeviceStore {
        &mut self.devices
    }

    pub fn registers(&self) -> &RegisterStore {
        &self.registers
    }

    pub fn properties(&self) -> &PropertyStore {
        &self.properties
    }

    /// Register a device together with its connection-state property.
    pub fn add_device(&mut self, device: NewDevice) -> Result<DeviceId, RegistryError> {
        let id = self.devices.append(device)?;
        if let Err(e) = self.properties.append(
            id,
            DeviceProperty::State,
            Some(Value::from(ConnectionState::Unknown.as_str())),
        ) {
            self.devices.remove(id);
            return Err(e);
        }
        debug!(device = %id, "Device registered");
        Ok(id)
    }

    /// Register a register on an existing device.
    pub fn add_register(&mut self, register: NewRegister) -> Result<RegisterId, RegistryError> {
        if !self.devices.contains(register.device_id) {
            return Err(RegistryError::UnknownDevice(register.device_id));
        }
        self.registers.append(register)
    }

    /// Attach a static property to an existing device.
    pub fn add_property(
        &mut self,
        device: DeviceId,
        property: DeviceProperty,
        value: Option<Value>,
    ) -> Result<PropertyId, RegistryError> {
        if !self.devices.contains(device) {
            return Err(RegistryError::UnknownDevice(device));
        }
        let id = self.properties.append(device, property, value)?;
        self.publish_property(id);
        Ok(id)
    }

    /// Remove a device with all its registers and properties.
    ///
    /// Returns `false` if the device was not registered.
    pub fn remove_device(&mut self, id: DeviceId) -> bool {
        let Some(device) = self.devices.remove(id) else {
            return false;
        };
        for register in self.registers.ids_for_device(id) {
            self.registers.remove(register);
        }
        let properties: Vec<PropertyId> = self
            .properties
            .list_for_device(id, None)
            .map(|record| record.id)
            .collect();
        for property in properties {
            self.properties.remove(property);
        }
        info!(device = %device.name, address = device.address, "Device removed");
        true
    }

    pub fn remove_register(&mut self, id: RegisterId) -> bool {
        self.registers.remove(id).is_some()
    }

    /// Remove every register of a device grouped under `channel`.
    pub fn remove_channel(&mut self, device: DeviceId, channel: &str) -> Vec<RegisterId> {
        let ids: Vec<RegisterId> = self
            .registers
            .list_for_device(device, None)
            .filter(|record| record.channel.as_deref() == Some(channel))
            .map(|record| record.id)
            .collect();
        for id in &ids {
            self.registers.remove(*id);
        }
        ids
    }

    /// Connection state of a device, as stored in its state property.
    pub fn state(&self, device: DeviceId) -> ConnectionState {
        self.properties
            .find(device, &DeviceProperty::State)
            .and_then(|id| self.properties.get(id))
            .and_then(|record| match &record.value {
                Some(Value::Text(text)) => ConnectionState::parse(text),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Move a device to a connection state and apply its side effects on
    /// the device record.
    pub fn set_state(&mut self, device: DeviceId, state: ConnectionState, now: Instant) {
        let Some(record) = self.devices.get_mut(device) else {
            return;
        };
        match state {
            ConnectionState::Lost => {
                record.lost_at = Some(now);
            }
            ConnectionState::Connected => {
                record.lost_at = None;
                record.transmit_attempts = 0;
            }
            ConnectionState::Unknown | ConnectionState::Disconnected => {
                record.lost_at = None;
                record.transmit_attempts = 0;
                record.last_read_at = None;
                record.last_write_at = None;
            }
        }

        let value = Some(Value::from(state.as_str()));
        let id = match self.properties.find(device, &DeviceProperty::State) {
            Some(id) => id,
            None => match self.properties.append(device, DeviceProperty::State, None) {
                Ok(id) => id,
                Err(_) => return,
            },
        };
        let Some(property) = self.properties.get_mut(id) else {
            return;
        };
        if property.value != value {
            property.value = value;
            self.publish_property(id);
        }
    }

    /// Store a freshly read value.
    pub fn set_actual(&mut self, id: RegisterId, value: Option<Value>, valid: bool) {
        let Some(record) = self.registers.get_mut(id) else {
            return;
        };
        if record.actual_value != value || record.valid != valid {
            record.actual_value = value;
            record.valid = valid;
            self.publish_register(id);
        }
    }

    pub fn set_valid(&mut self, id: RegisterId, valid: bool) {
        let Some(record) = self.registers.get_mut(id) else {
            return;
        };
        if record.valid != valid {
            record.valid = valid;
            self.publish_register(id);
        }
    }

    /// Set or clear the pending write target. Always clears the pending
    /// timestamp, so a new target goes out on the next opportunity.
    pub fn set_expected(&mut self, id: RegisterId, value: Option<Value>) {
        let Some(record) = self.registers.get_mut(id) else {
            return;
        };
        record.expected_pending_at = None;
        if record.expected_value != value {
            record.expected_value = value;
            self.publish_register(id);
        }
    }

    pub fn mark_pending(&mut self, id: RegisterId, now: Instant) {
        if let Some(record) = self.registers.get_mut(id) {
            record.expected_pending_at = Some(now);
        }
    }

    /// Mark every register invalid, as after a (re)start or stop.
    pub fn invalidate_all(&mut self) {
        let ids: Vec<RegisterId> = self
            .registers
            .iter()
            .filter(|record| record.valid)
            .map(|record| record.id)
            .collect();
        for id in ids {
            self.set_valid(id, false);
        }
    }

    fn publish_register(&self, id: RegisterId) {
        let Some(record) = self.registers.get(id) else {
            return;
        };
        let Some(device) = self.devices.get(record.device_id) else {
            return;
        };
        let report = ValueReport::register(
            device.name.clone(),
            record.key.clone(),
            record.actual_value.clone(),
            record.valid,
        )
        .with_expected(record.expected_value.clone());
        // No subscribers is fine.
        let _ = self.reports.send(report);
    }

    fn publish_property(&self, id: PropertyId) {
        let Some(record) = self.properties.get(id) else {
            return;
        };
        let Some(device) = self.devices.get(record.device_id) else {
            return;
        };
        let report = ValueReport::property(
            device.name.clone(),
            record.property.as_str(),
            record.value.clone(),
        );
        let _ = self.reports.send(report);
    }
}
