//! Host-facing interface of one serial line.
//!
//! A [`Connector`] owns the [`Registry`] and the [`SerialEngine`] that
//! polls it. Configuration is turned into registry entries here, host writes
//! are validated here, and the connection lifecycle (start, stop,
//! enable, disable) is applied here.

use rtulink_common::{ConnectionState, Value, ValueReport};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::clock::{Clock, SystemClock};
use crate::config::{DeviceConfig, RegisterConfig};
use crate::engine::{self, SerialEngine, TickOutcome};
use crate::error::{RegistryError, RejectReason};
use crate::identifier::parse_identifier;
use crate::registry::{NewDevice, NewRegister, Registry};
use crate::transport::Transport;
use crate::types::{DeviceId, DeviceProperty, RegisterId};

pub struct Connector<T, C = SystemClock> {
    registry: Registry,
    engine: SerialEngine<T, C>,
    running: bool,
}

impl<T: Transport, C: Clock> Connector<T, C> {
    /// Create a stopped connector with an empty registry.
    pub fn new(engine: SerialEngine<T, C>) -> Self {
        Self {
            registry: Registry::new(),
            engine,
            running: false,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Receive change reports for registers and device properties.
    pub fn subscribe(&self) -> broadcast::Receiver<ValueReport> {
        self.registry.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start polling. Every device goes back to `Unknown` and every
    /// register is invalid until it is read again.
    pub fn start(&mut self) {
        self.reset_devices(ConnectionState::Unknown);
        self.engine.reset();
        self.running = true;
        info!(devices = self.registry.devices().len(), "Connector started");
    }

    /// Stop polling. Every device becomes `Disconnected`.
    pub fn stop(&mut self) {
        self.running = false;
        self.reset_devices(ConnectionState::Disconnected);
        info!("Connector stopped");
    }

    fn reset_devices(&mut self, state: ConnectionState) {
        let now = self.engine.clock().now();
        let ids: Vec<DeviceId> = self.registry.devices().ids().collect();
        for id in ids {
            self.registry.set_state(id, state, now);
        }
        self.registry.invalidate_all();
    }

    /// Register a device with its properties and registers.
    ///
    /// Nothing is left behind if any part is rejected.
    pub fn initialize_device(&mut self, config: &DeviceConfig) -> Result<DeviceId, RegistryError> {
        let id = self.registry.add_device(NewDevice {
            name: config.name.clone(),
            address: config.address,
            enabled: config.enabled,
            sampling_time: config.sampling_time(),
        })?;

        if let Err(e) = self.populate_device(id, config) {
            error!(device = %config.name, error = %e, "Device configuration rejected");
            self.remove_device(id);
            return Err(e);
        }

        info!(
            device = %config.name,
            address = config.address,
            registers = config.registers.len(),
            "Device initialized"
        );
        Ok(id)
    }

    fn populate_device(&mut self, id: DeviceId, config: &DeviceConfig) -> Result<(), RegistryError> {
        for (name, value) in &config.properties {
            self.registry.add_property(
                id,
                DeviceProperty::Custom(name.clone()),
                Some(value.clone()),
            )?;
        }
        for register in &config.registers {
            self.initialize_register(id, register)?;
        }
        Ok(())
    }

    /// Remove a device and everything it owns. Unknown ids are ignored.
    pub fn remove_device(&mut self, id: DeviceId) -> bool {
        self.engine.forget(id);
        self.registry.remove_device(id)
    }

    /// Register one register on an existing device.
    pub fn initialize_register(
        &mut self,
        device: DeviceId,
        config: &RegisterConfig,
    ) -> Result<RegisterId, RegistryError> {
        let identifier = parse_identifier(&config.identifier)?;
        let register = NewRegister {
            device_id: device,
            channel: config.channel.clone(),
            name: identifier.name,
            kind: config.kind,
            address: identifier.address,
            data_type: config.data_type,
            format: config.format.clone(),
            invalid: config.invalid.clone(),
        };
        let id = self.registry.add_register(register)?;
        debug!(
            device = %device,
            register = %config.identifier,
            kind = %config.kind,
            "Register initialized"
        );
        Ok(id)
    }

    /// Remove one register. Unknown ids are ignored.
    pub fn remove_register(&mut self, id: RegisterId) -> bool {
        self.registry.remove_register(id)
    }

    /// Remove every register of a device grouped under `channel`.
    pub fn remove_channel(&mut self, device: DeviceId, channel: &str) -> Vec<RegisterId> {
        self.registry.remove_channel(device, channel)
    }

    /// Resume polling a device. It starts over as `Unknown`.
    pub fn enable_device(&mut self, id: DeviceId) -> bool {
        self.set_enabled(id, true, ConnectionState::Unknown)
    }

    /// Stop polling a device. It is reported as `Disconnected`.
    pub fn disable_device(&mut self, id: DeviceId) -> bool {
        self.engine.forget(id);
        self.set_enabled(id, false, ConnectionState::Disconnected)
    }

    fn set_enabled(&mut self, id: DeviceId, enabled: bool, state: ConnectionState) -> bool {
        let Some(device) = self.registry.devices_mut().get_mut(id) else {
            return false;
        };
        device.enabled = enabled;
        let now = self.engine.clock().now();
        self.registry.set_state(id, state, now);
        true
    }

    pub fn device_state(&self, id: DeviceId) -> ConnectionState {
        self.registry.state(id)
    }

    /// Find a device by name.
    pub fn find_device(&self, name: &str) -> Option<DeviceId> {
        self.registry.devices().by_name(name).map(|device| device.id)
    }

    /// Find a register of a device by its `name_address` identifier.
    pub fn find_register(&self, device: DeviceId, identifier: &str) -> Option<RegisterId> {
        let parsed = parse_identifier(identifier).ok()?;
        self.registry
            .registers()
            .list_for_device(device, None)
            .find(|record| record.address == parsed.address && record.key == identifier)
            .map(|record| record.id)
    }

    /// Queue a value to be written to a register.
    ///
    /// Only validates and records the target; the engine sends it on a later
    /// tick. A newer value replaces one that has not gone out yet.
    pub fn write_property(&mut self, register: RegisterId, value: Value) -> Result<(), RejectReason> {
        if !self.running {
            return Err(RejectReason::Stopped);
        }
        let record = self
            .registry
            .registers()
            .get(register)
            .ok_or(RejectReason::UnknownRegister(register))?;
        engine::encode_for(record, &value)?;

        debug!(register = %record.key, value = %value, "Write queued");
        self.registry.set_expected(register, Some(value));
        Ok(())
    }

    /// Last successfully read value of a register.
    pub fn get_actual(&self, register: RegisterId) -> Option<Value> {
        self.registry
            .registers()
            .get(register)
            .and_then(|record| record.actual_value.clone())
    }

    /// Advance the engine by one unit of work. Does nothing while stopped.
    pub async fn tick(&mut self) -> TickOutcome {
        if !self.running {
            return TickOutcome::Idle;
        }
        self.engine.tick(&mut self.registry).await
    }
}
