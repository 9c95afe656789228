//! Serial protocol state machine.
//!
//! Each call to [`SerialEngine::tick`] advances one device by at most one
//! unit of work: a write followed by its read-back, a single register read,
//! or nothing when every device is disabled, lost or throttled. Faults never
//! leave `tick()`; they end up as device counters, connection state and
//! register validity.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use rtulink_common::{ConnectionState, Value};
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::codec::{self, WireShape, WireValue};
use crate::error::UnsupportedOperation;
use crate::registry::{RegisterRecord, Registry};
use crate::transport::{Transport, TransportError, TransportResult};
use crate::types::{DeviceId, RegisterId, RegisterKind};

/// Timing and retry policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    /// Consecutive failures after which a device is lost.
    pub max_attempts: u32,
    /// How long a lost device is left alone before it is probed again.
    pub lost_delay: Duration,
    /// Minimum gap between two attempts to write the same pending value.
    pub write_delay: Duration,
    /// Pause between a write and its read-back.
    pub verify_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lost_delay: Duration::from_secs(5),
            write_delay: Duration::from_secs(2),
            verify_delay: Duration::from_millis(10),
        }
    }
}

/// Result of the read-back that follows every accepted write.
#[derive(Debug, Clone, PartialEq)]
pub enum Verify {
    /// The device returned what was written; the pending value is cleared.
    Matched,
    /// The device returned something else; the pending value stays.
    Mismatched,
    /// The read-back itself failed.
    Failed(TransportError),
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No device had work.
    Idle,
    Wrote {
        device: DeviceId,
        register: RegisterId,
        verify: Verify,
    },
    WriteFailed {
        device: DeviceId,
        register: RegisterId,
        error: TransportError,
    },
    Read {
        device: DeviceId,
        register: RegisterId,
    },
    ReadFailed {
        device: DeviceId,
        register: RegisterId,
        error: TransportError,
    },
}

impl TickOutcome {
    /// Device that was served, if any.
    pub fn device(&self) -> Option<DeviceId> {
        match self {
            TickOutcome::Idle => None,
            TickOutcome::Wrote { device, .. }
            | TickOutcome::WriteFailed { device, .. }
            | TickOutcome::Read { device, .. }
            | TickOutcome::ReadFailed { device, .. } => Some(*device),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, TickOutcome::Idle)
    }
}

/// Frame to put on the bus for a pending write.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WriteRequest {
    Coil(bool),
    Register(u16),
    Registers(Vec<u16>),
}

#[derive(Debug)]
enum Work {
    Write {
        register: RegisterId,
        wire: WireValue,
        request: WriteRequest,
    },
    Read {
        register: RegisterId,
    },
}

/// Protocol coordinates of a register, copied out of the store for the
/// duration of one transaction.
#[derive(Debug, Clone)]
struct Target {
    slave: u8,
    device_name: String,
    key: String,
    kind: RegisterKind,
    address: u16,
    shape: WireShape,
}

/// Drives one serial line.
pub struct SerialEngine<T, C = SystemClock> {
    transport: T,
    clock: C,
    settings: EngineSettings,
    cursor: usize,
    visited: HashMap<DeviceId, HashSet<RegisterId>>,
}

impl<T: Transport> SerialEngine<T, SystemClock> {
    pub fn new(transport: T, settings: EngineSettings) -> Self {
        Self::with_clock(transport, SystemClock, settings)
    }
}

impl<T: Transport, C: Clock> SerialEngine<T, C> {
    pub fn with_clock(transport: T, clock: C, settings: EngineSettings) -> Self {
        Self {
            transport,
            clock,
            settings,
            cursor: 0,
            visited: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Drop all sweep progress and start over from the first device.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.visited.clear();
    }

    /// Forget the sweep progress of a removed device.
    pub fn forget(&mut self, device: DeviceId) {
        self.visited.remove(&device);
    }

    /// Perform one bounded unit of work.
    pub async fn tick(&mut self, registry: &mut Registry) -> TickOutcome {
        let ids: Vec<DeviceId> = registry.devices().ids().collect();
        if ids.is_empty() {
            return TickOutcome::Idle;
        }
        self.visited
            .retain(|device, _| registry.devices().contains(*device));

        let now = self.clock.now();
        let start = self.cursor % ids.len();
        for step in 0..ids.len() {
            let idx = (start + step) % ids.len();
            let device = ids[idx];
            if let Some(work) = self.plan(registry, device, now) {
                self.cursor = idx + 1;
                return self.execute(registry, device, work, now).await;
            }
        }

        trace!("No device has work");
        TickOutcome::Idle
    }

    /// Pick the next unit of work for a device, or `None` if it has none
    /// right now.
    fn plan(&mut self, registry: &mut Registry, device_id: DeviceId, now: Instant) -> Option<Work> {
        let device = registry.devices().get(device_id)?;
        if !device.enabled {
            return None;
        }
        let lost_delay = self.settings.lost_delay;
        if device
            .lost_at
            .is_some_and(|at| now.saturating_duration_since(at) < lost_delay)
        {
            return None;
        }
        let sampling_time = device.sampling_time;
        let last_read_at = device.last_read_at;
        let device_name = device.name.clone();

        if let Some(work) = self.plan_write(registry, device_id, &device_name, now) {
            return Some(work);
        }

        let registers = registry.registers();
        let order: Vec<RegisterId> = RegisterKind::READ_ORDER
            .into_iter()
            .flat_map(|kind| {
                registers
                    .list_for_device(device_id, Some(kind))
                    .map(|record| record.id)
            })
            .collect();
        let first = *order.first()?;

        let visited = self.visited.entry(device_id).or_default();
        if let Some(next) = order.iter().find(|id| !visited.contains(*id)) {
            return Some(Work::Read { register: *next });
        }

        if last_read_at.is_some_and(|at| now.saturating_duration_since(at) < sampling_time) {
            return None;
        }

        trace!(device = %device_name, "Sweep complete, starting over");
        visited.clear();
        Some(Work::Read { register: first })
    }

    /// First pending write that is due. Writes that can never succeed are
    /// discarded on the way.
    fn plan_write(
        &self,
        registry: &mut Registry,
        device_id: DeviceId,
        device_name: &str,
        now: Instant,
    ) -> Option<Work> {
        // Writable kinds first; pending values on read-only kinds are only
        // visited to be discarded.
        let kinds = RegisterKind::WRITABLE.into_iter().chain(
            RegisterKind::READ_ORDER
                .into_iter()
                .filter(|kind| !kind.is_writable()),
        );
        let registers = registry.registers();
        let pending: Vec<RegisterId> = kinds
            .flat_map(|kind| {
                registers
                    .list_for_device(device_id, Some(kind))
                    .filter(|record| record.has_pending_write())
                    .map(|record| record.id)
            })
            .collect();

        for register in pending {
            let Some(record) = registry.registers().get(register) else {
                continue;
            };
            let Some(value) = record.expected_value.as_ref() else {
                continue;
            };
            let due = record
                .expected_pending_at
                .is_none_or(|at| now.saturating_duration_since(at) >= self.settings.write_delay);
            if !due {
                continue;
            }

            match encode_for(record, value) {
                Ok((wire, request)) => {
                    return Some(Work::Write {
                        register,
                        wire,
                        request,
                    });
                }
                Err(e) => {
                    warn!(
                        device = %device_name,
                        register = %record.key,
                        kind = %record.kind,
                        error = %e,
                        "Discarding pending write"
                    );
                    registry.set_expected(register, None);
                }
            }
        }
        None
    }

    async fn execute(
        &mut self,
        registry: &mut Registry,
        device: DeviceId,
        work: Work,
        now: Instant,
    ) -> TickOutcome {
        let register = match &work {
            Work::Write { register, .. } | Work::Read { register } => *register,
        };
        let Some(target) = target(registry, device, register) else {
            return TickOutcome::Idle;
        };

        match work {
            Work::Write { wire, request, .. } => {
                self.write(registry, device, register, &target, wire, request, now)
                    .await
            }
            Work::Read { .. } => {
                self.visited.entry(device).or_default().insert(register);
                self.read(registry, device, register, &target, now).await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn write(
        &mut self,
        registry: &mut Registry,
        device: DeviceId,
        register: RegisterId,
        target: &Target,
        wire: WireValue,
        request: WriteRequest,
        now: Instant,
    ) -> TickOutcome {
        let result = match &request {
            WriteRequest::Coil(bit) => {
                self.transport
                    .write_coil(target.slave, target.address, *bit)
                    .await
            }
            WriteRequest::Register(word) => {
                self.transport
                    .write_register(target.slave, target.address, *word)
                    .await
            }
            WriteRequest::Registers(words) => {
                self.transport
                    .write_registers(target.slave, target.address, words)
                    .await
            }
        };

        if let Some(record) = registry.devices_mut().get_mut(device) {
            record.last_write_at = Some(now);
        }

        if let Err(error) = result {
            warn!(
                device = %target.device_name,
                address = target.slave,
                register = %target.key,
                error = %error,
                "Register write failed"
            );
            self.fault(registry, register, &error);
            self.record_failure(registry, device, target, now);
            return TickOutcome::WriteFailed {
                device,
                register,
                error,
            };
        }

        debug!(
            device = %target.device_name,
            register = %target.key,
            request = ?request,
            "Register written"
        );
        self.record_success(registry, device, target, now);
        registry.mark_pending(register, now);

        if !self.settings.verify_delay.is_zero() {
            tokio::time::sleep(self.settings.verify_delay).await;
        }

        let readback = self.read_wire(target).await;
        if let Some(record) = registry.devices_mut().get_mut(device) {
            record.last_read_at = Some(now);
        }

        let verify = match readback {
            Ok(read) if read.same_payload(&wire) => {
                if let Err(e) = store_reading(registry, register, &read) {
                    warn!(
                        device = %target.device_name,
                        register = %target.key,
                        error = %e,
                        "Read-back does not decode"
                    );
                    registry.set_valid(register, false);
                }
                registry.set_expected(register, None);
                self.record_success(registry, device, target, now);
                Verify::Matched
            }
            Ok(read) => {
                warn!(
                    device = %target.device_name,
                    register = %target.key,
                    written = ?wire,
                    read = ?read,
                    "Read-back does not match written value"
                );
                let actual = registry.registers().get(register).and_then(|record| {
                    codec::decode(record.data_type, record.format.as_ref(), &read).ok()
                });
                match actual {
                    Some(value) => registry.set_actual(register, Some(value), false),
                    None => registry.set_valid(register, false),
                }
                self.record_success(registry, device, target, now);
                Verify::Mismatched
            }
            Err(error) => {
                warn!(
                    device = %target.device_name,
                    register = %target.key,
                    error = %error,
                    "Read-back failed"
                );
                self.fault(registry, register, &error);
                self.record_failure(registry, device, target, now);
                Verify::Failed(error)
            }
        };

        TickOutcome::Wrote {
            device,
            register,
            verify,
        }
    }

    async fn read(
        &mut self,
        registry: &mut Registry,
        device: DeviceId,
        register: RegisterId,
        target: &Target,
        now: Instant,
    ) -> TickOutcome {
        let result = self.read_wire(target).await.and_then(|wire| {
            store_reading(registry, register, &wire)
                .map_err(|e| TransportError::Protocol(e.to_string()))
        });

        if let Some(record) = registry.devices_mut().get_mut(device) {
            record.last_read_at = Some(now);
        }

        match result {
            Ok(value) => {
                trace!(
                    device = %target.device_name,
                    register = %target.key,
                    value = ?value,
                    "Register read"
                );
                self.record_success(registry, device, target, now);
                TickOutcome::Read { device, register }
            }
            Err(error) => {
                warn!(
                    device = %target.device_name,
                    address = target.slave,
                    register = %target.key,
                    kind = %target.kind,
                    error = %error,
                    "Register read failed"
                );
                self.fault(registry, register, &error);
                self.record_failure(registry, device, target, now);
                TickOutcome::ReadFailed {
                    device,
                    register,
                    error,
                }
            }
        }
    }

    async fn read_wire(&mut self, target: &Target) -> TransportResult<WireValue> {
        let count = target.shape.register_count();
        if target.kind.is_bit() {
            let bits = self
                .transport
                .read_bits(target.slave, target.kind, target.address, count)
                .await?;
            bits.first()
                .copied()
                .map(WireValue::Bit)
                .ok_or_else(|| TransportError::Protocol("empty response".to_string()))
        } else {
            let words = self
                .transport
                .read_words(target.slave, target.kind, target.address, count)
                .await?;
            codec::from_words(target.shape, &words)
                .map_err(|e| TransportError::Protocol(e.to_string()))
        }
    }

    /// Garbled responses invalidate the register; silence leaves it alone.
    fn fault(&self, registry: &mut Registry, register: RegisterId, error: &TransportError) {
        if matches!(error, TransportError::Protocol(_)) {
            registry.set_valid(register, false);
        }
    }

    fn record_success(&self, registry: &mut Registry, device: DeviceId, target: &Target, now: Instant) {
        let Some(record) = registry.devices_mut().get_mut(device) else {
            return;
        };
        record.transmit_attempts = 0;
        let was_lost = record.is_lost();

        if was_lost || registry.state(device) != ConnectionState::Connected {
            info!(
                device = %target.device_name,
                address = target.slave,
                "Device connected"
            );
            registry.set_state(device, ConnectionState::Connected, now);
        }
    }

    fn record_failure(&self, registry: &mut Registry, device: DeviceId, target: &Target, now: Instant) {
        let Some(record) = registry.devices_mut().get_mut(device) else {
            return;
        };
        record.transmit_attempts = record.transmit_attempts.saturating_add(1);
        if record.transmit_attempts < self.settings.max_attempts {
            return;
        }

        if record.is_lost() {
            debug!(
                device = %target.device_name,
                address = target.slave,
                "Device is still lost"
            );
        } else {
            warn!(
                device = %target.device_name,
                address = target.slave,
                attempts = record.transmit_attempts,
                "Device is lost"
            );
        }
        registry.set_state(device, ConnectionState::Lost, now);
    }
}

fn target(registry: &Registry, device: DeviceId, register: RegisterId) -> Option<Target> {
    let device = registry.devices().get(device)?;
    let record = registry.registers().get(register)?;
    Some(Target {
        slave: device.address,
        device_name: device.name.clone(),
        key: record.key.clone(),
        kind: record.kind,
        address: record.address,
        shape: record.shape,
    })
}

/// Decode a reading into the register's actual value.
///
/// A value equal to the register's invalid sentinel empties it. A pending
/// write whose frame matches the reading is settled: the device already
/// holds it.
fn store_reading(
    registry: &mut Registry,
    register: RegisterId,
    wire: &WireValue,
) -> Result<Option<Value>, codec::DecodeError> {
    let Some(record) = registry.registers().get(register) else {
        return Ok(None);
    };
    let value = codec::decode(record.data_type, record.format.as_ref(), wire)?;
    let applied = record.expected_value.as_ref().is_some_and(|expected| {
        codec::encode(record.data_type, record.format.as_ref(), expected)
            .is_ok_and(|written| written.same_payload(wire))
    });
    let actual = (record.invalid.as_ref() != Some(&value)).then_some(value);

    registry.set_actual(register, actual.clone(), actual.is_some());
    if applied {
        registry.set_expected(register, None);
    }
    Ok(actual)
}

/// Check that `value` can be written to `record` and build its frame.
pub(crate) fn encode_for(
    record: &RegisterRecord,
    value: &Value,
) -> Result<(WireValue, WriteRequest), UnsupportedOperation> {
    if !record.kind.is_writable() {
        return Err(UnsupportedOperation::ReadOnly { kind: record.kind });
    }
    let wire = codec::encode(record.data_type, record.format.as_ref(), value)?;

    let request = if record.kind.is_bit() {
        match wire.as_bit() {
            Some(bit) => WriteRequest::Coil(bit),
            None => {
                return Err(UnsupportedOperation::Encode(
                    codec::EncodeError::TypeMismatch {
                        data_type: record.data_type,
                        value: value.type_name(),
                    },
                ));
            }
        }
    } else {
        let words = wire.to_words();
        match words.as_slice() {
            [word] => WriteRequest::Register(*word),
            _ => WriteRequest::Registers(words),
        }
    };
    Ok((wire, request))
}
