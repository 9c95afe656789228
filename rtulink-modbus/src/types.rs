//! Identifiers and register declarations shared by the registries, the codec
//! and the engine.

use serde::{Deserialize, Serialize};

/// Stable handle of a device record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

/// Stable handle of a register record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegisterId(pub u32);

/// Stable handle of a device property record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyId(pub u32);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

impl std::fmt::Display for RegisterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "register#{}", self.0)
    }
}

impl std::fmt::Display for PropertyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "property#{}", self.0)
    }
}

/// Modbus register kinds. Each kind has its own address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    /// Discrete output coils (read/write, 1-bit)
    Coil,
    /// Discrete input contacts (read-only, 1-bit)
    Discrete,
    /// Input registers (read-only, 16-bit words)
    Input,
    /// Holding registers (read/write, 16-bit words)
    Holding,
}

impl RegisterKind {
    /// Order in which a device's kinds are swept by the read cycle.
    pub const READ_ORDER: [RegisterKind; 4] = [
        RegisterKind::Coil,
        RegisterKind::Discrete,
        RegisterKind::Holding,
        RegisterKind::Input,
    ];

    /// Kinds that can carry a pending write.
    pub const WRITABLE: [RegisterKind; 2] = [RegisterKind::Coil, RegisterKind::Holding];

    /// Return the string name for this register kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterKind::Coil => "coil",
            RegisterKind::Discrete => "discrete",
            RegisterKind::Input => "input",
            RegisterKind::Holding => "holding",
        }
    }

    /// Whether the kind accepts writes.
    pub fn is_writable(&self) -> bool {
        matches!(self, RegisterKind::Coil | RegisterKind::Holding)
    }

    /// Whether the kind is bit-addressed rather than word-addressed.
    pub fn is_bit(&self) -> bool {
        matches!(self, RegisterKind::Coil | RegisterKind::Discrete)
    }

    /// Function code used to read this kind.
    pub fn read_function(&self) -> FunctionCode {
        match self {
            RegisterKind::Coil => FunctionCode::ReadCoils,
            RegisterKind::Discrete => FunctionCode::ReadDiscreteInputs,
            RegisterKind::Holding => FunctionCode::ReadHoldingRegisters,
            RegisterKind::Input => FunctionCode::ReadInputRegisters,
        }
    }
}

impl std::fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Modbus function codes issued by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    /// Numeric code as it appears in the frame.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Declared value type of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    UInt8,
    UInt16,
    UInt32,
    Float32,
    Enum,
    String,
}

impl DataType {
    /// Return the string name for this data type.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::Float32 => "float32",
            DataType::Enum => "enum",
            DataType::String => "string",
        }
    }

    /// Whether the type is a (possibly scaled) number.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::Float32
        )
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One member of an enumeration register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumMember {
    /// Member name exposed to the host.
    pub name: String,
    /// Raw word the device uses for this member.
    pub value: u16,
}

impl EnumMember {
    pub fn new(name: impl Into<String>, value: u16) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Declared value format of a register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ValueFormat {
    /// Linear transform between raw wire numbers and real-world units:
    /// `real = raw * scale + offset`, with optional bounds on `real`.
    Numeric {
        #[serde(default = "default_scale")]
        scale: f64,
        #[serde(default)]
        offset: f64,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// Named members of an enumeration.
    Enum { members: Vec<EnumMember> },
    /// Fixed-length text, `length` registers of two bytes each.
    Text { length: u16 },
}

fn default_scale() -> f64 {
    1.0
}

impl ValueFormat {
    /// A pure scale, no offset or bounds.
    pub fn scaled(scale: f64) -> Self {
        ValueFormat::Numeric {
            scale,
            offset: 0.0,
            min: None,
            max: None,
        }
    }

    /// Enumeration built from `(name, raw)` pairs.
    pub fn members<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = (S, u16)>,
        S: Into<String>,
    {
        ValueFormat::Enum {
            members: members
                .into_iter()
                .map(|(name, value)| EnumMember::new(name, value))
                .collect(),
        }
    }

    /// Short name of the format, used in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueFormat::Numeric { .. } => "numeric",
            ValueFormat::Enum { .. } => "enum",
            ValueFormat::Text { .. } => "text",
        }
    }
}

/// Scalar device properties kept outside the register space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceProperty {
    /// Connection state flag, maintained by the engine.
    State,
    /// Static property supplied by configuration (model, serial number...).
    Custom(String),
}

impl DeviceProperty {
    /// Property name as it appears in reports.
    pub fn as_str(&self) -> &str {
        match self {
            DeviceProperty::State => "state",
            DeviceProperty::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for DeviceProperty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
