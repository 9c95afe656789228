//! Scalar device properties that are not backed by bus registers.

use std::collections::HashMap;

use rtulink_common::Value;

use crate::error::RegistryError;
use crate::types::{DeviceId, DeviceProperty, PropertyId};

#[derive(Debug, Clone)]
pub struct PropertyRecord {
    pub id: PropertyId,
    pub device_id: DeviceId,
    pub property: DeviceProperty,
    pub value: Option<Value>,
}

/// Owns every property record.
#[derive(Debug, Default)]
pub struct PropertyStore {
    records: HashMap<PropertyId, PropertyRecord>,
    order: Vec<PropertyId>,
    index: HashMap<(DeviceId, DeviceProperty), PropertyId>,
    next_id: u32,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &mut self,
        device_id: DeviceId,
        property: DeviceProperty,
        value: Option<Value>,
    ) -> Result<PropertyId, RegistryError> {
        let index_key = (device_id, property);
        if self.index.contains_key(&index_key) {
            return Err(RegistryError::DuplicateProperty {
                device: device_id,
                property: index_key.1.as_str().to_string(),
            });
        }

        self.next_id += 1;
        let id = PropertyId(self.next_id);
        self.records.insert(
            id,
            PropertyRecord {
                id,
                device_id,
                property: index_key.1.clone(),
                value,
            },
        );
        self.order.push(id);
        self.index.insert(index_key, id);
        Ok(id)
    }

    /// Remove a property. Unknown ids are ignored.
    pub fn remove(&mut self, id: PropertyId) -> Option<PropertyRecord> {
        let record = self.records.remove(&id)?;
        self.order.retain(|other| *other != id);
        self.index
            .remove(&(record.device_id, record.property.clone()));
        Some(record)
    }

    pub fn get(&self, id: PropertyId) -> Option<&PropertyRecord> {
        self.records.get(&id)
    }

    pub fn get_mut(&mut self, id: PropertyId) -> Option<&mut PropertyRecord> {
        self.records.get_mut(&id)
    }

    pub fn find(&self, device_id: DeviceId, property: &DeviceProperty) -> Option<PropertyId> {
        self.index.get(&(device_id, property.clone())).copied()
    }

    /// Properties of a device in registration order, optionally of one kind.
    pub fn list_for_device<'a>(
        &'a self,
        device_id: DeviceId,
        property: Option<&'a DeviceProperty>,
    ) -> impl Iterator<Item = &'a PropertyRecord> + 'a {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(move |record| record.device_id == device_id)
            .filter(move |record| property.is_none_or(|property| &record.property == property))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
