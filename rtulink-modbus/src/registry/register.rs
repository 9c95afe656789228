//! Register records and their `(device, kind, address)` index.

use std::collections::HashMap;
use std::time::Instant;

use rtulink_common::Value;

use crate::codec::{self, WireShape};
use crate::error::RegistryError;
use crate::types::{DataType, DeviceId, RegisterId, RegisterKind, ValueFormat};

/// Declaration of a register to be registered.
#[derive(Debug, Clone)]
pub struct NewRegister {
    pub device_id: DeviceId,
    /// Grouping label; never owns the register.
    pub channel: Option<String>,
    /// Name part of the identifier.
    pub name: String,
    pub kind: RegisterKind,
    pub address: u16,
    pub data_type: DataType,
    pub format: Option<ValueFormat>,
    /// Decoded value the device uses to signal "no reading".
    pub invalid: Option<Value>,
}

impl NewRegister {
    pub fn new(
        device_id: DeviceId,
        name: impl Into<String>,
        kind: RegisterKind,
        address: u16,
        data_type: DataType,
    ) -> Self {
        Self {
            device_id,
            channel: None,
            name: name.into(),
            kind,
            address,
            data_type,
            format: None,
            invalid: None,
        }
    }

    pub fn with_format(mut self, format: ValueFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_invalid(mut self, invalid: Value) -> Self {
        self.invalid = Some(invalid);
        self
    }
}

/// A registered register and its process value.
#[derive(Debug, Clone)]
pub struct RegisterRecord {
    pub id: RegisterId,
    pub device_id: DeviceId,
    pub channel: Option<String>,
    /// `name_address` identifier used in reports.
    pub key: String,
    pub kind: RegisterKind,
    pub address: u16,
    pub data_type: DataType,
    pub format: Option<ValueFormat>,
    pub invalid: Option<Value>,
    /// Wire layout resolved at registration.
    pub shape: WireShape,
    /// Last successfully read value.
    pub actual_value: Option<Value>,
    /// Pending write target.
    pub expected_value: Option<Value>,
    /// When the pending write last went out.
    pub expected_pending_at: Option<Instant>,
    pub valid: bool,
}

impl RegisterRecord {
    pub fn has_pending_write(&self) -> bool {
        self.expected_value.is_some()
    }
}

/// Owns every register record.
#[derive(Debug, Default)]
pub struct RegisterStore {
    records: HashMap<RegisterId, RegisterRecord>,
    by_device: HashMap<DeviceId, Vec<RegisterId>>,
    by_address: HashMap<(DeviceId, RegisterKind, u16), RegisterId>,
    next_id: u32,
}

impl RegisterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new register.
    ///
    /// Fails without touching the store if `(device, kind, address)` is
    /// already taken or the declared layout can never be decoded.
    pub fn append(&mut self, register: NewRegister) -> Result<RegisterId, RegistryError> {
        let index_key = (register.device_id, register.kind, register.address);
        if self.by_address.contains_key(&index_key) {
            return Err(RegistryError::DuplicateAddress {
                device: register.device_id,
                kind: register.kind,
                address: register.address,
            });
        }

        let shape = codec::layout(register.kind, register.data_type, register.format.as_ref())?;

        self.next_id += 1;
        let id = RegisterId(self.next_id);
        let key = format!("{}_{}", register.name, register.address);

        self.records.insert(
            id,
            RegisterRecord {
                id,
                device_id: register.device_id,
                channel: register.channel,
                key,
                kind: register.kind,
                address: register.address,
                data_type: register.data_type,
                format: register.format,
                invalid: register.invalid,
                shape,
                actual_value: None,
                expected_value: None,
                expected_pending_at: None,
                valid: false,
            },
        );
        self.by_device.entry(register.device_id).or_default().push(id);
        self.by_address.insert(index_key, id);
        Ok(id)
    }

    /// Remove a register. Unknown ids are ignored.
    pub fn remove(&mut self, id: RegisterId) -> Option<RegisterRecord> {
        let record = self.records.remove(&id)?;
        self.by_address
            .remove(&(record.device_id, record.kind, record.address));
        if let Some(ids) = self.by_device.get_mut(&record.device_id) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_device.remove(&record.device_id);
            }
        }
        Some(record)
    }

    pub fn get(&self, id: RegisterId) -> Option<&RegisterRecord> {
        self.records.get(&id)
    }

    pub fn get_mut(&mut self, id: RegisterId) -> Option<&mut RegisterRecord> {
        self.records.get_mut(&id)
    }

    /// Look a register up by its protocol coordinates.
    pub fn find(&self, device: DeviceId, kind: RegisterKind, address: u16) -> Option<RegisterId> {
        self.by_address.get(&(device, kind, address)).copied()
    }

    /// Registers of a device in registration order, optionally of one kind.
    pub fn list_for_device(
        &self,
        device: DeviceId,
        kind: Option<RegisterKind>,
    ) -> impl Iterator<Item = &RegisterRecord> + '_ {
        self.by_device
            .get(&device)
            .into_iter()
            .flatten()
            .filter_map(|id| self.records.get(id))
            .filter(move |record| kind.is_none_or(|kind| record.kind == kind))
    }

    /// Ids of a device's registers, in registration order.
    pub fn ids_for_device(&self, device: DeviceId) -> Vec<RegisterId> {
        self.by_device.get(&device).cloned().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterRecord> + '_ {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
