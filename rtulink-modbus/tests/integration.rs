//! Integration tests for the polling engine.
//!
//! These drive a [`Connector`] against a simulated RTU bus and a manual
//! clock, covering polling, write verification and connection tracking.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rtulink_common::{ConnectionState, ReportKind, Value};
use rtulink_modbus::{
    Connector, ConnectorConfig, DeviceConfig, DeviceId, EngineSettings, ManualClock, RegistryError,
    RejectReason, SerialEngine, TickOutcome, Transport, TransportError, TransportResult,
    UnsupportedOperation, Verify,
};
use rtulink_modbus::types::RegisterKind;

/// How a simulated slave misbehaves.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
enum Fault {
    #[default]
    None,
    /// Never answers.
    Offline,
    /// Answers with an exception.
    Garbled,
    /// Acknowledges writes without applying them.
    Stuck,
}

#[derive(Debug, Default)]
struct SimSlave {
    bits: HashMap<(RegisterKind, u16), bool>,
    words: HashMap<(RegisterKind, u16), u16>,
    fault: Fault,
}

#[derive(Debug, Default)]
struct SimState {
    slaves: HashMap<u8, SimSlave>,
    /// Slave address of every request, in order.
    requests: Vec<u8>,
    writes: usize,
}

/// In-memory RTU line. Clones share the same state.
#[derive(Debug, Clone, Default)]
struct SimBus {
    state: Arc<Mutex<SimState>>,
}

impl SimBus {
    fn set_word(&self, slave: u8, kind: RegisterKind, address: u16, value: u16) {
        let mut state = self.state.lock();
        state
            .slaves
            .entry(slave)
            .or_default()
            .words
            .insert((kind, address), value);
    }

    fn set_bit(&self, slave: u8, kind: RegisterKind, address: u16, value: bool) {
        let mut state = self.state.lock();
        state
            .slaves
            .entry(slave)
            .or_default()
            .bits
            .insert((kind, address), value);
    }

    fn word(&self, slave: u8, kind: RegisterKind, address: u16) -> Option<u16> {
        let state = self.state.lock();
        state.slaves.get(&slave)?.words.get(&(kind, address)).copied()
    }

    fn bit(&self, slave: u8, kind: RegisterKind, address: u16) -> Option<bool> {
        let state = self.state.lock();
        state.slaves.get(&slave)?.bits.get(&(kind, address)).copied()
    }

    fn set_fault(&self, slave: u8, fault: Fault) {
        self.state.lock().slaves.entry(slave).or_default().fault = fault;
    }

    fn requests(&self) -> Vec<u8> {
        self.state.lock().requests.clone()
    }

    fn writes(&self) -> usize {
        self.state.lock().writes
    }

    /// Log the request and return the slave, or the error its fault causes.
    fn begin(&self, slave: u8) -> TransportResult<parking_lot::MappedMutexGuard<'_, SimSlave>> {
        let mut state = self.state.lock();
        state.requests.push(slave);
        let guard = parking_lot::MutexGuard::map(state, |state| {
            state.slaves.entry(slave).or_default()
        });
        match guard.fault {
            Fault::Offline => Err(TransportError::NoResponse),
            Fault::Garbled => Err(TransportError::Protocol(
                "exception IllegalDataAddress".to_string(),
            )),
            Fault::None | Fault::Stuck => Ok(guard),
        }
    }
}

impl Transport for SimBus {
    async fn read_bits(
        &mut self,
        slave: u8,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> TransportResult<Vec<bool>> {
        let device = self.begin(slave)?;
        Ok((address..address + count)
            .map(|a| device.bits.get(&(kind, a)).copied().unwrap_or(false))
            .collect())
    }

    async fn read_words(
        &mut self,
        slave: u8,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> TransportResult<Vec<u16>> {
        let device = self.begin(slave)?;
        Ok((address..address + count)
            .map(|a| device.words.get(&(kind, a)).copied().unwrap_or(0))
            .collect())
    }

    async fn write_coil(&mut self, slave: u8, address: u16, value: bool) -> TransportResult<()> {
        self.write(slave, |device| {
            device.bits.insert((RegisterKind::Coil, address), value);
        })
    }

    async fn write_register(&mut self, slave: u8, address: u16, value: u16) -> TransportResult<()> {
        self.write(slave, |device| {
            device.words.insert((RegisterKind::Holding, address), value);
        })
    }

    async fn write_registers(
        &mut self,
        slave: u8,
        address: u16,
        values: &[u16],
    ) -> TransportResult<()> {
        self.write(slave, |device| {
            for (offset, value) in values.iter().enumerate() {
                device
                    .words
                    .insert((RegisterKind::Holding, address + offset as u16), *value);
            }
        })
    }
}

impl SimBus {
    fn write(&self, slave: u8, apply: impl FnOnce(&mut SimSlave)) -> TransportResult<()> {
        let mut device = self.begin(slave)?;
        if device.fault != Fault::Stuck {
            apply(&mut device);
        }
        drop(device);
        self.state.lock().writes += 1;
        Ok(())
    }
}

/// Default timings without the read-back pause.
fn settings() -> EngineSettings {
    EngineSettings {
        verify_delay: Duration::ZERO,
        ..EngineSettings::default()
    }
}

fn connector(bus: &SimBus, clock: &ManualClock) -> Connector<SimBus, ManualClock> {
    Connector::new(SerialEngine::with_clock(bus.clone(), clock.clone(), settings()))
}

fn device_config(json: &str) -> DeviceConfig {
    json5::from_str(json).unwrap()
}

/// A holding and an input register, re-read on every sweep.
fn boiler(address: u8) -> DeviceConfig {
    device_config(&format!(
        r#"{{
            name: "boiler-{address}",
            address: {address},
            sampling_interval_ms: 0,
            registers: [
                {{ identifier: "setpoint_40001", type: "holding", data_type: "int16" }},
                {{ identifier: "flow_30001", type: "input", data_type: "uint16" }}
            ]
        }}"#
    ))
}

fn register(connector: &Connector<SimBus, ManualClock>, device: DeviceId, key: &str) -> rtulink_modbus::RegisterId {
    connector.find_register(device, key).unwrap()
}

#[tokio::test]
async fn test_read_cycle_updates_values() {
    let bus = SimBus::default();
    let clock = ManualClock::new();
    bus.set_word(1, RegisterKind::Holding, 40001, 0xFFF6);
    bus.set_word(1, RegisterKind::Input, 30001, 120);

    let mut connector = connector(&bus, &clock);
    let device = connector.initialize_device(&boiler(1)).unwrap();
    let setpoint = register(&connector, device, "setpoint_40001");
    let flow = register(&connector, device, "flow_30001");
    connector.start();

    // Holding registers are read before input registers
    assert_eq!(
        connector.tick().await,
        TickOutcome::Read { device, register: setpoint }
    );
    assert_eq!(
        connector.tick().await,
        TickOutcome::Read { device, register: flow }
    );

    assert_eq!(connector.get_actual(setpoint), Some(Value::Integer(-10)));
    assert_eq!(connector.get_actual(flow), Some(Value::Integer(120)));
    assert_eq!(connector.device_state(device), ConnectionState::Connected);
}

#[tokio::test]
async fn test_sampling_time_throttles_device() {
    let bus = SimBus::default();
    let clock = ManualClock::new();
    let mut connector = connector(&bus, &clock);

    let mut config = boiler(1);
    config.sampling_interval_ms = 1000;
    connector.initialize_device(&config).unwrap();
    connector.start();

    assert!(!connector.tick().await.is_idle());
    assert!(!connector.tick().await.is_idle());
    // Sweep complete, next one is not due yet
    assert!(connector.tick().await.is_idle());

    clock.advance(Duration::from_millis(999));
    assert!(connector.tick().await.is_idle());

    clock.advance(Duration::from_millis(1));
    assert!(!connector.tick().await.is_idle());
}

#[tokio::test]
async fn test_device_lost_after_max_attempts() {
    let bus = SimBus::default();
    let clock = ManualClock::new();
    bus.set_fault(1, Fault::Offline);

    let mut connector = connector(&bus, &clock);
    let device = connector.initialize_device(&boiler(1)).unwrap();
    connector.start();

    for _ in 0..4 {
        assert!(matches!(
            connector.tick().await,
            TickOutcome::ReadFailed { error: TransportError::NoResponse, .. }
        ));
        assert_eq!(connector.device_state(device), ConnectionState::Unknown);
    }

    connector.tick().await;
    assert_eq!(connector.device_state(device), ConnectionState::Lost);
    assert_eq!(bus.requests().len(), 5);

    // Left alone until the lost delay has passed
    assert!(connector.tick().await.is_idle());
    clock.advance(Duration::from_secs(4));
    assert!(connector.tick().await.is_idle());
    assert_eq!(bus.requests().len(), 5);

    // A failed probe keeps it lost and restarts the delay
    clock.advance(Duration::from_secs(1));
    assert!(matches!(connector.tick().await, TickOutcome::ReadFailed { .. }));
    assert_eq!(connector.device_state(device), ConnectionState::Lost);
    assert!(connector.tick().await.is_idle());

    // Recovery
    bus.set_fault(1, Fault::None);
    clock.advance(Duration::from_secs(5));
    assert!(matches!(connector.tick().await, TickOutcome::Read { .. }));
    assert_eq!(connector.device_state(device), ConnectionState::Connected);
    let record = connector.registry().devices().get(device).unwrap();
    assert_eq!(record.transmit_attempts, 0);
    assert!(record.lost_at.is_none());
}

#[tokio::test]
async fn test_silence_keeps_value_but_garbage_invalidates() {
    let bus = SimBus::default();
    let clock = ManualClock::new();
    bus.set_word(1, RegisterKind::Holding, 40001, 5);

    let mut connector = connector(&bus, &clock);
    let device = connector.initialize_device(&boiler(1)).unwrap();
    let setpoint = register(&connector, device, "setpoint_40001");
    connector.start();
    connector.tick().await;
    connector.tick().await;

    bus.set_fault(1, Fault::Offline);
    connector.tick().await;
    let record = connector.registry().registers().get(setpoint).unwrap();
    assert_eq!(record.actual_value, Some(Value::Integer(5)));
    assert!(record.valid);

    bus.set_fault(1, Fault::Garbled);
    connector.tick().await;
    connector.tick().await;
    let record = connector.registry().registers().get(setpoint).unwrap();
    assert_eq!(record.actual_value, Some(Value::Integer(5)));
    assert!(!record.valid);
}

#[tokio::test]
async fn test_invalid_sentinel_clears_value() {
    let bus = SimBus::default();
    let clock = ManualClock::new();
    bus.set_word(1, RegisterKind::Input, 30001, 0xFFFF);

    let mut connector = connector(&bus, &clock);
    let device = connector
        .initialize_device(&device_config(
            r#"{
                name: "meter",
                address: 1,
                registers: [
                    { identifier: "flow_30001", type: "input", data_type: "uint16", invalid: 65535 }
                ]
            }"#,
        ))
        .unwrap();
    let flow = register(&connector, device, "flow_30001");
    connector.start();
    connector.tick().await;

    let record = connector.registry().registers().get(flow).unwrap();
    assert_eq!(record.actual_value, None);
    assert!(!record.valid);
    assert_eq!(connector.device_state(device), ConnectionState::Connected);
}

#[tokio::test]
async fn test_write_is_verified_by_read_back() {
    let bus = SimBus::default();
    let clock = ManualClock::new();
    bus.set_word(1, RegisterKind::Holding, 40001, 10);

    let mut connector = connector(&bus, &clock);
    let device = connector.initialize_device(&boiler(1)).unwrap();
    let setpoint = register(&connector, device, "setpoint_40001");
    connector.start();

    connector.write_property(setpoint, Value::Integer(21)).unwrap();
    assert_eq!(
        connector.tick().await,
        TickOutcome::Wrote { device, register: setpoint, verify: Verify::Matched }
    );

    assert_eq!(bus.word(1, RegisterKind::Holding, 40001), Some(21));
    let record = connector.registry().registers().get(setpoint).unwrap();
    assert_eq!(record.actual_value, Some(Value::Integer(21)));
    assert!(record.valid);
    assert_eq!(record.expected_value, None);
    assert!(record.expected_pending_at.is_none());

    // Polling resumes
    assert!(matches!(connector.tick().await, TickOutcome::Read { .. }));
    assert_eq!(bus.writes(), 1);
}

#[tokio::test]
async fn test_stuck_device_retries_after_write_delay() {
    let bus = SimBus::default();
    let clock = ManualClock::new();
    bus.set_word(1, RegisterKind::Holding, 40001, 10);
    bus.set_fault(1, Fault::Stuck);

    let mut connector = connector(&bus, &clock);
    let device = connector.initialize_device(&boiler(1)).unwrap();
    let setpoint = register(&connector, device, "setpoint_40001");
    connector.start();

    connector.write_property(setpoint, Value::Integer(21)).unwrap();
    assert_eq!(
        connector.tick().await,
        TickOutcome::Wrote { device, register: setpoint, verify: Verify::Mismatched }
    );
    let record = connector.registry().registers().get(setpoint).unwrap();
    assert_eq!(record.expected_value, Some(Value::Integer(21)));
    assert_eq!(record.actual_value, Some(Value::Integer(10)));
    assert!(!record.valid);

    // Not due yet: the device is polled instead
    assert!(matches!(connector.tick().await, TickOutcome::Read { .. }));
    clock.advance(Duration::from_millis(1999));
    assert!(matches!(connector.tick().await, TickOutcome::Read { .. }));
    assert_eq!(bus.writes(), 1);

    // Device recovers before the retry
    bus.set_fault(1, Fault::None);
    clock.advance(Duration::from_millis(1));
    assert_eq!(
        connector.tick().await,
        TickOutcome::Wrote { device, register: setpoint, verify: Verify::Matched }
    );
    assert_eq!(bus.writes(), 2);
    assert_eq!(connector.get_actual(setpoint), Some(Value::Integer(21)));
}

#[tokio::test]
async fn test_late_apply_settles_pending_write() {
    let bus = SimBus::default();
    let clock = ManualClock::new();
    bus.set_word(1, RegisterKind::Holding, 40001, 10);
    bus.set_fault(1, Fault::Stuck);

    let mut connector = connector(&bus, &clock);
    let device = connector.initialize_device(&boiler(1)).unwrap();
    let setpoint = register(&connector, device, "setpoint_40001");
    connector.start();

    connector.write_property(setpoint, Value::Integer(21)).unwrap();
    assert!(matches!(
        connector.tick().await,
        TickOutcome::Wrote { verify: Verify::Mismatched, .. }
    ));

    // The device applies the value on its own after the read-back
    bus.set_word(1, RegisterKind::Holding, 40001, 21);
    bus.set_fault(1, Fault::None);
    assert_eq!(
        connector.tick().await,
        TickOutcome::Read { device, register: setpoint }
    );
    let record = connector.registry().registers().get(setpoint).unwrap();
    assert_eq!(record.actual_value, Some(Value::Integer(21)));
    assert!(record.valid);
    assert_eq!(record.expected_value, None);
    assert!(record.expected_pending_at.is_none());

    // Nothing is sent again once the write delay has passed
    clock.advance(Duration::from_secs(2));
    assert!(matches!(connector.tick().await, TickOutcome::Read { .. }));
    assert_eq!(bus.writes(), 1);
}

#[tokio::test]
async fn test_coil_read_back_mismatch_keeps_pending() {
    let bus = SimBus::default();
    let clock = ManualClock::new();
    bus.set_bit(3, RegisterKind::Coil, 1, false);
    bus.set_fault(3, Fault::Stuck);

    let mut connector = connector(&bus, &clock);
    let device = connector
        .initialize_device(&device_config(
            r#"{
                name: "relays",
                address: 3,
                registers: [{ identifier: "pump_1", type: "coil", data_type: "bool" }]
            }"#,
        ))
        .unwrap();
    let pump = register(&connector, device, "pump_1");
    connector.start();

    // Relay bounces back to open
    connector.write_property(pump, Value::Boolean(true)).unwrap();
    assert_eq!(
        connector.tick().await,
        TickOutcome::Wrote { device, register: pump, verify: Verify::Mismatched }
    );

    let record = connector.registry().registers().get(pump).unwrap();
    assert!(!record.valid);
    assert_eq!(record.actual_value, Some(Value::Boolean(false)));
    assert_eq!(record.expected_value, Some(Value::Boolean(true)));
    assert!(record.expected_pending_at.is_some());
    assert_eq!(bus.bit(3, RegisterKind::Coil, 1), Some(false));
}

#[tokio::test]
async fn test_verified_write_stores_decoded_reading() {
    let bus = SimBus::default();
    let clock = ManualClock::new();
    let mut connector = connector(&bus, &clock);
    let device = connector
        .initialize_device(&device_config(
            r#"{
                name: "mixer",
                address: 4,
                registers: [{
                    identifier: "speed_40001",
                    type: "holding",
                    data_type: "int16",
                    format: { type: "numeric", scale: 0.5 }
                }]
            }"#,
        ))
        .unwrap();
    let speed = register(&connector, device, "speed_40001");
    connector.start();

    connector.write_property(speed, Value::Integer(50)).unwrap();
    assert!(matches!(
        connector.tick().await,
        TickOutcome::Wrote { verify: Verify::Matched, .. }
    ));
    assert_eq!(bus.word(4, RegisterKind::Holding, 40001), Some(100));
    assert_eq!(connector.get_actual(speed), Some(Value::Float(50.0)));

    // Polling the same value again is not a change
    let mut reports = connector.subscribe();
    assert!(matches!(connector.tick().await, TickOutcome::Read { .. }));
    assert!(reports.try_recv().is_err());
    assert_eq!(connector.get_actual(speed), Some(Value::Float(50.0)));
}

#[tokio::test]
async fn test_newer_write_replaces_pending_one() {
    let bus = SimBus::default();
    let clock = ManualClock::new();
    bus.set_fault(1, Fault::Stuck);

    let mut connector = connector(&bus, &clock);
    let device = connector.initialize_device(&boiler(1)).unwrap();
    let setpoint = register(&connector, device, "setpoint_40001");
    connector.start();

    connector.write_property(setpoint, Value::Integer(21)).unwrap();
    connector.tick().await;
    bus.set_fault(1, Fault::None);

    // A new target goes out at once, without waiting for the write delay
    connector.write_property(setpoint, Value::Integer(30)).unwrap();
    assert!(matches!(
        connector.tick().await,
        TickOutcome::Wrote { verify: Verify::Matched, .. }
    ));
    assert_eq!(bus.word(1, RegisterKind::Holding, 40001), Some(30));
}

#[tokio::test]
async fn test_coil_write() {
    let bus = SimBus::default();
    let clock = ManualClock::new();
    let mut connector = connector(&bus, &clock);
    let device = connector
        .initialize_device(&device_config(
            r#"{
                name: "relays",
                address: 3,
                registers: [
                    { identifier: "pump_1", type: "coil", data_type: "bool" },
                    { identifier: "alarm_1", type: "discrete", data_type: "bool" }
                ]
            }"#,
        ))
        .unwrap();
    let pump = register(&connector, device, "pump_1");
    let alarm = register(&connector, device, "alarm_1");
    connector.start();

    assert_eq!(
        connector.write_property(alarm, Value::Boolean(true)),
        Err(RejectReason::Unsupported(UnsupportedOperation::ReadOnly {
            kind: RegisterKind::Discrete
        }))
    );

    connector.write_property(pump, Value::Boolean(true)).unwrap();
    assert!(matches!(
        connector.tick().await,
        TickOutcome::Wrote { verify: Verify::Matched, .. }
    ));
    assert_eq!(bus.bit(3, RegisterKind::Coil, 1), Some(true));
    assert_eq!(connector.get_actual(pump), Some(Value::Boolean(true)));

    // Coils are swept before discrete inputs
    bus.set_bit(3, RegisterKind::Discrete, 1, true);
    connector.tick().await;
    connector.tick().await;
    assert_eq!(connector.get_actual(alarm), Some(Value::Boolean(true)));
}

#[tokio::test]
async fn test_scaled_float_register() {
    let bus = SimBus::default();
    let clock = ManualClock::new();
    let raw = 2500.0f32.to_bits();
    bus.set_word(1, RegisterKind::Holding, 40010, (raw >> 16) as u16);
    bus.set_word(1, RegisterKind::Holding, 40011, raw as u16);

    let mut connector = connector(&bus, &clock);
    let device = connector
        .initialize_device(&device_config(
            r#"{
                name: "oven",
                address: 1,
                registers: [{
                    identifier: "temperature_40010",
                    type: "holding",
                    data_type: "float32",
                    format: { type: "numeric", scale: 0.01 }
                }]
            }"#,
        ))
        .unwrap();
    let temperature = register(&connector, device, "temperature_40010");
    connector.start();

    connector.tick().await;
    let Some(Value::Float(celsius)) = connector.get_actual(temperature) else {
        panic!("expected a float reading");
    };
    assert!((celsius - 25.0).abs() < 1e-6);

    connector.write_property(temperature, Value::Float(30.0)).unwrap();
    assert!(matches!(
        connector.tick().await,
        TickOutcome::Wrote { verify: Verify::Matched, .. }
    ));
    let high = bus.word(1, RegisterKind::Holding, 40010).unwrap();
    let low = bus.word(1, RegisterKind::Holding, 40011).unwrap();
    let written = f32::from_bits((u32::from(high) << 16) | u32::from(low));
    assert!((written - 3000.0).abs() < 1e-3);
}

#[tokio::test]
async fn test_round_robin_between_devices() {
    let bus = SimBus::default();
    let clock = ManualClock::new();
    let mut connector = connector(&bus, &clock);
    let first = connector.initialize_device(&boiler(1)).unwrap();
    let second = connector.initialize_device(&boiler(2)).unwrap();
    connector.start();

    let mut served = Vec::new();
    for _ in 0..6 {
        served.push(connector.tick().await.device());
    }
    assert_eq!(
        served,
        [first, second, first, second, first, second].map(Some)
    );
    assert_eq!(bus.requests(), vec![1, 2, 1, 2, 1, 2]);
}

#[tokio::test]
async fn test_lost_device_does_not_starve_others() {
    let bus = SimBus::default();
    let clock = ManualClock::new();
    bus.set_fault(1, Fault::Offline);

    let mut connector = connector(&bus, &clock);
    let dead = connector.initialize_device(&boiler(1)).unwrap();
    let alive = connector.initialize_device(&boiler(2)).unwrap();
    connector.start();

    for _ in 0..10 {
        connector.tick().await;
    }
    assert_eq!(connector.device_state(dead), ConnectionState::Lost);
    assert_eq!(connector.device_state(alive), ConnectionState::Connected);

    for _ in 0..4 {
        assert_eq!(connector.tick().await.device(), Some(alive));
    }
}

#[tokio::test]
async fn test_disabled_device_is_skipped() {
    let bus = SimBus::default();
    let clock = ManualClock::new();
    let mut connector = connector(&bus, &clock);
    let first = connector.initialize_device(&boiler(1)).unwrap();
    let second = connector.initialize_device(&boiler(2)).unwrap();
    connector.start();

    connector.disable_device(first);
    for _ in 0..3 {
        assert_eq!(connector.tick().await.device(), Some(second));
    }

    connector.disable_device(second);
    assert!(connector.tick().await.is_idle());
    assert!(bus.requests().iter().all(|slave| *slave == 2));
}

#[test]
fn test_duplicate_bus_address_is_rejected() {
    let bus = SimBus::default();
    let clock = ManualClock::new();
    let mut connector = connector(&bus, &clock);
    connector.initialize_device(&boiler(1)).unwrap();

    let mut clash = boiler(1);
    clash.name = "other".to_string();
    assert_eq!(
        connector.initialize_device(&clash),
        Err(RegistryError::DuplicateDevice(1))
    );
    assert_eq!(connector.registry().devices().len(), 1);
    assert_eq!(connector.registry().registers().len(), 2);
    assert!(connector.find_device("other").is_none());
}

#[tokio::test]
async fn test_reports_follow_changes() {
    let bus = SimBus::default();
    let clock = ManualClock::new();
    bus.set_word(1, RegisterKind::Holding, 40001, 42);

    let mut connector = connector(&bus, &clock);
    connector.initialize_device(&boiler(1)).unwrap();
    let mut reports = connector.subscribe();
    connector.start();
    connector.tick().await;

    let mut received = Vec::new();
    while let Ok(report) = reports.try_recv() {
        received.push(report);
    }

    let state = received
        .iter()
        .rev()
        .find(|report| report.kind == ReportKind::Property && report.key == "state")
        .unwrap();
    assert_eq!(state.device, "boiler-1");
    assert_eq!(state.value, Some(Value::from("connected")));

    let setpoint = received
        .iter()
        .find(|report| report.kind == ReportKind::Register)
        .unwrap();
    assert_eq!(setpoint.key, "setpoint_40001");
    assert_eq!(setpoint.value, Some(Value::Integer(42)));
    assert!(setpoint.valid);
}

#[tokio::test]
async fn test_config_file_to_running_connector() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            serial: {{ port: "/dev/ttyUSB0", baud_rate: 19200 }},
            engine: {{ verify_delay_ms: 0 }},
            devices: [
                {{
                    name: "boiler",
                    address: 1,
                    properties: {{ location: "basement" }},
                    registers: [
                        {{ identifier: "setpoint_40001", type: "holding", data_type: "int16" }}
                    ]
                }}
            ]
        }}"#
    )
    .unwrap();

    let config = ConnectorConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.serial.baud_rate, 19200);

    let bus = SimBus::default();
    let clock = ManualClock::new();
    bus.set_word(1, RegisterKind::Holding, 40001, 7);
    let engine = SerialEngine::with_clock(bus, clock, config.engine.settings());
    let mut connector = Connector::new(engine);
    for device in &config.devices {
        connector.initialize_device(device).unwrap();
    }
    connector.start();
    connector.tick().await;

    let device = connector.find_device("boiler").unwrap();
    let setpoint = connector.find_register(device, "setpoint_40001").unwrap();
    assert_eq!(connector.get_actual(setpoint), Some(Value::Integer(7)));
}
