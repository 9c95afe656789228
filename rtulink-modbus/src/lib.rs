//! Modbus RTU polling engine.
//!
//! One [`connector::Connector`] owns a serial line shared by several slave
//! devices. It keeps a registry of devices, registers and device properties,
//! polls registers round-robin, writes host-requested values and verifies
//! them by reading back, and tracks each device's connection state.
//!
//! # Layout
//!
//! - [`types`], [`identifier`] - identifiers, register kinds, data types
//! - [`codec`] - conversion between wire words and typed values
//! - [`registry`] - in-memory stores with change reports
//! - [`transport`] - request/response access to the bus
//! - [`engine`] - the one-transaction-per-tick state machine
//! - [`connector`], [`scheduler`] - host interface and poll loop
//!
//! # Register identifiers
//!
//! ```text
//! <name>_<address>      e.g. setpoint_40001
//! ```

pub mod clock;
pub mod codec;
pub mod config;
pub mod connector;
pub mod engine;
pub mod error;
pub mod identifier;
pub mod registry;
pub mod scheduler;
pub mod transport;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ConnectorConfig, DeviceConfig, RegisterConfig};
pub use connector::Connector;
pub use engine::{EngineSettings, SerialEngine, TickOutcome, Verify};
pub use error::{RegistryError, RejectReason, UnsupportedOperation};
pub use registry::Registry;
pub use scheduler::PollScheduler;
pub use transport::{RtuTransport, Transport, TransportError, TransportResult};
pub use types::{DataType, DeviceId, DeviceProperty, RegisterId, RegisterKind, ValueFormat};
