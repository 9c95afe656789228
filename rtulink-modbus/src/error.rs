//! Errors surfaced by the registries and the connector interface.
//!
//! Transport faults are not here: they never leave `tick()` and are recorded
//! as device and register state instead.

use thiserror::Error;

use crate::codec::{EncodeError, LayoutError};
use crate::types::{DeviceId, RegisterId, RegisterKind};

/// Configuration errors, raised at registration time.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("{kind} register {address} already exists on {device}")]
    DuplicateAddress {
        device: DeviceId,
        kind: RegisterKind,
        address: u16,
    },

    #[error("Bus address {0} is already used by another device")]
    DuplicateDevice(u8),

    #[error("Device name '{0}' is already registered")]
    DuplicateName(String),

    #[error("Property '{property}' already exists on {device}")]
    DuplicateProperty { device: DeviceId, property: String },

    #[error("Unknown device {0}")]
    UnknownDevice(DeviceId),

    #[error("Bus address {0} is outside 1-247")]
    InvalidBusAddress(u8),

    #[error("Malformed register identifier '{identifier}': {reason}")]
    MalformedIdentifier { identifier: String, reason: String },

    #[error("Unsupported register layout: {0}")]
    UnsupportedLayout(#[from] LayoutError),
}

/// A pending write that can never succeed. Reported once, then discarded.
#[derive(Debug, Error, PartialEq)]
pub enum UnsupportedOperation {
    #[error("{kind} registers are read-only")]
    ReadOnly { kind: RegisterKind },

    #[error("Cannot encode value: {0}")]
    Encode(#[from] EncodeError),
}

/// Why `write_property` refused a value.
#[derive(Debug, Error, PartialEq)]
pub enum RejectReason {
    #[error("Unknown register {0}")]
    UnknownRegister(RegisterId),

    #[error("Connector is stopped")]
    Stopped,

    #[error(transparent)]
    Unsupported(#[from] UnsupportedOperation),
}
