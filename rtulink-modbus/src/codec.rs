//! Conversion between register words and typed values.
//!
//! Every function here is pure. The (kind, data type, format) combination is
//! checked once by [`layout`] when a register is registered, so the polling
//! loop only ever decodes shapes that are known to fit.
//!
//! 32-bit integers and floats occupy two registers, high word first. Strings
//! pack two bytes per register, high byte first, padded with NUL.

use rtulink_common::Value;
use thiserror::Error;

use crate::types::{DataType, RegisterKind, ValueFormat};

/// Longest string that fits a single read request (125 words minus framing).
pub const MAX_TEXT_REGISTERS: u16 = 123;

/// Wire shape a register occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireShape {
    /// Single coil or discrete input.
    Bit,
    /// One 16-bit register.
    Word { signed: bool },
    /// Two registers holding a 32-bit integer.
    DoubleWord { signed: bool },
    /// Two registers holding an IEEE-754 single.
    Float,
    /// Fixed-length byte string spanning this many registers.
    Bytes(u16),
}

impl WireShape {
    /// Number of bits or registers read for this shape.
    pub fn register_count(&self) -> u16 {
        match self {
            WireShape::Bit | WireShape::Word { .. } => 1,
            WireShape::DoubleWord { .. } | WireShape::Float => 2,
            WireShape::Bytes(count) => *count,
        }
    }
}

/// A value as it travels on the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Bit(bool),
    Word(u16),
    SignedWord(i16),
    DoubleWord(u32),
    SignedDoubleWord(i32),
    Float(f32),
    Bytes(Vec<u8>),
}

impl WireValue {
    /// Register words for this value, high word first.
    pub fn to_words(&self) -> Vec<u16> {
        match self {
            WireValue::Bit(bit) => vec![u16::from(*bit)],
            WireValue::Word(v) => vec![*v],
            WireValue::SignedWord(v) => vec![*v as u16],
            WireValue::DoubleWord(v) => split(*v).to_vec(),
            WireValue::SignedDoubleWord(v) => split(*v as u32).to_vec(),
            WireValue::Float(v) => split(v.to_bits()).to_vec(),
            WireValue::Bytes(bytes) => bytes
                .chunks(2)
                .map(|pair| {
                    let high = u16::from(pair[0]) << 8;
                    let low = pair.get(1).copied().map(u16::from).unwrap_or(0);
                    high | low
                })
                .collect(),
        }
    }

    /// Bit value, if this is a bit or a 0/1 word.
    pub fn as_bit(&self) -> Option<bool> {
        match self {
            WireValue::Bit(bit) => Some(*bit),
            WireValue::Word(0) => Some(false),
            WireValue::Word(1) => Some(true),
            _ => None,
        }
    }

    /// Whether two values put the same words on the bus.
    pub fn same_payload(&self, other: &WireValue) -> bool {
        self.to_words() == other.to_words()
    }

    fn name(&self) -> &'static str {
        match self {
            WireValue::Bit(_) => "bit",
            WireValue::Word(_) => "word",
            WireValue::SignedWord(_) => "signed word",
            WireValue::DoubleWord(_) => "double word",
            WireValue::SignedDoubleWord(_) => "signed double word",
            WireValue::Float(_) => "float",
            WireValue::Bytes(_) => "bytes",
        }
    }
}

fn split(v: u32) -> [u16; 2] {
    [(v >> 16) as u16, v as u16]
}

fn join(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

/// Register declarations that can never be decoded.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LayoutError {
    #[error("{kind} registers only carry bool, not {data_type}")]
    BitKind {
        kind: RegisterKind,
        data_type: DataType,
    },

    #[error("{format} format does not apply to {data_type}")]
    FormatMismatch {
        data_type: DataType,
        format: &'static str,
    },

    #[error("enum registers need a non-empty member list")]
    MissingMembers,

    #[error("string registers need a text format")]
    MissingLength,

    #[error("text length {0} is outside 1-{MAX_TEXT_REGISTERS} registers")]
    TextLength(u16),

    #[error("scale must be finite and non-zero, got {0}")]
    Scale(f64),
}

/// A typed value that does not fit its declared width or format.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EncodeError {
    #[error("cannot represent {value} as {data_type}")]
    TypeMismatch {
        data_type: DataType,
        value: &'static str,
    },

    #[error("{value} does not fit {data_type}")]
    OutOfRange { data_type: DataType, value: f64 },

    #[error("{value} is below the minimum {min}")]
    BelowMinimum { value: f64, min: f64 },

    #[error("{value} is above the maximum {max}")]
    AboveMaximum { value: f64, max: f64 },

    #[error("value is not a finite number")]
    NonFinite,

    #[error("'{0}' is not a member of the enumeration")]
    UnmappedMember(String),

    #[error("text of {length} bytes exceeds {capacity} bytes")]
    TextTooLong { length: usize, capacity: usize },
}

/// Words returned by a device that do not form a value of the declared type.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    #[error("expected {expected} registers, got {actual}")]
    WordCount { expected: usize, actual: usize },

    #[error("{wire} cannot be decoded as {data_type}")]
    ShapeMismatch {
        data_type: DataType,
        wire: &'static str,
    },

    #[error("raw value {raw} does not fit {data_type}")]
    OutOfRange { data_type: DataType, raw: i64 },

    #[error("raw value is not a finite number")]
    NonFinite,

    #[error("raw value {0} is not a member of the enumeration")]
    UnknownMember(u16),

    #[error("text is not valid UTF-8")]
    InvalidText,
}

/// Linear transform pulled out of an optional numeric format.
#[derive(Debug, Clone, Copy)]
struct Scaling {
    scale: f64,
    offset: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Scaling {
    fn of(format: Option<&ValueFormat>) -> Self {
        match format {
            Some(ValueFormat::Numeric {
                scale,
                offset,
                min,
                max,
            }) => Self {
                scale: *scale,
                offset: *offset,
                min: *min,
                max: *max,
            },
            _ => Self {
                scale: 1.0,
                offset: 0.0,
                min: None,
                max: None,
            },
        }
    }

    fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.offset == 0.0
    }

    fn check_bounds(&self, value: f64) -> Result<(), EncodeError> {
        if let Some(min) = self.min.filter(|min| value < *min) {
            return Err(EncodeError::BelowMinimum { value, min });
        }
        if let Some(max) = self.max.filter(|max| value > *max) {
            return Err(EncodeError::AboveMaximum { value, max });
        }
        Ok(())
    }
}

/// Resolve the wire shape for a register declaration, rejecting
/// combinations that can never be decoded.
pub fn layout(
    kind: RegisterKind,
    data_type: DataType,
    format: Option<&ValueFormat>,
) -> Result<WireShape, LayoutError> {
    if kind.is_bit() {
        if data_type != DataType::Bool {
            return Err(LayoutError::BitKind { kind, data_type });
        }
        if let Some(format) = format {
            return Err(LayoutError::FormatMismatch {
                data_type,
                format: format.as_str(),
            });
        }
        return Ok(WireShape::Bit);
    }

    match (data_type, format) {
        (DataType::Enum, Some(ValueFormat::Enum { members })) => {
            if members.is_empty() {
                Err(LayoutError::MissingMembers)
            } else {
                Ok(WireShape::Word { signed: false })
            }
        }
        (DataType::Enum, None) => Err(LayoutError::MissingMembers),
        (DataType::String, Some(ValueFormat::Text { length })) => {
            if *length == 0 || *length > MAX_TEXT_REGISTERS {
                Err(LayoutError::TextLength(*length))
            } else {
                Ok(WireShape::Bytes(*length))
            }
        }
        (DataType::String, None) => Err(LayoutError::MissingLength),
        (DataType::Bool, None) => Ok(WireShape::Word { signed: false }),
        (numeric, None | Some(ValueFormat::Numeric { .. })) if numeric.is_numeric() => {
            let scaling = Scaling::of(format);
            if !scaling.scale.is_finite() || scaling.scale == 0.0 || !scaling.offset.is_finite() {
                return Err(LayoutError::Scale(scaling.scale));
            }
            Ok(match numeric {
                DataType::Int8 | DataType::Int16 => WireShape::Word { signed: true },
                DataType::Int32 => WireShape::DoubleWord { signed: true },
                DataType::UInt32 => WireShape::DoubleWord { signed: false },
                DataType::Float32 => WireShape::Float,
                _ => WireShape::Word { signed: false },
            })
        }
        (data_type, format) => Err(LayoutError::FormatMismatch {
            data_type,
            format: format.map(ValueFormat::as_str).unwrap_or("empty"),
        }),
    }
}

/// Assemble a wire value from the registers a device returned.
pub fn from_words(shape: WireShape, words: &[u16]) -> Result<WireValue, DecodeError> {
    let expected = usize::from(shape.register_count());
    if words.len() != expected {
        return Err(DecodeError::WordCount {
            expected,
            actual: words.len(),
        });
    }

    Ok(match shape {
        WireShape::Bit => WireValue::Bit(words[0] != 0),
        WireShape::Word { signed: true } => WireValue::SignedWord(words[0] as i16),
        WireShape::Word { signed: false } => WireValue::Word(words[0]),
        WireShape::DoubleWord { signed: true } => {
            WireValue::SignedDoubleWord(join(words[0], words[1]) as i32)
        }
        WireShape::DoubleWord { signed: false } => WireValue::DoubleWord(join(words[0], words[1])),
        WireShape::Float => WireValue::Float(f32::from_bits(join(words[0], words[1]))),
        WireShape::Bytes(_) => WireValue::Bytes(
            words
                .iter()
                .flat_map(|word| word.to_be_bytes())
                .collect(),
        ),
    })
}

/// Decode a wire value into a typed value.
pub fn decode(
    data_type: DataType,
    format: Option<&ValueFormat>,
    wire: &WireValue,
) -> Result<Value, DecodeError> {
    let mismatch = || DecodeError::ShapeMismatch {
        data_type,
        wire: wire.name(),
    };
    let scaling = Scaling::of(format);

    let raw: i64 = match (data_type, wire) {
        (DataType::Bool, WireValue::Bit(bit)) => return Ok(Value::Boolean(*bit)),
        (DataType::Bool, WireValue::Word(word)) => {
            return match word {
                0 => Ok(Value::Boolean(false)),
                1 => Ok(Value::Boolean(true)),
                other => Err(DecodeError::OutOfRange {
                    data_type,
                    raw: i64::from(*other),
                }),
            };
        }
        (DataType::Int8, WireValue::SignedWord(v)) => {
            let raw = i64::from(*v);
            i8::try_from(*v).map_err(|_| DecodeError::OutOfRange { data_type, raw })?;
            raw
        }
        (DataType::UInt8, WireValue::Word(v)) => {
            let raw = i64::from(*v);
            u8::try_from(*v).map_err(|_| DecodeError::OutOfRange { data_type, raw })?;
            raw
        }
        (DataType::Int16, WireValue::SignedWord(v)) => i64::from(*v),
        (DataType::UInt16, WireValue::Word(v)) => i64::from(*v),
        (DataType::Int32, WireValue::SignedDoubleWord(v)) => i64::from(*v),
        (DataType::UInt32, WireValue::DoubleWord(v)) => i64::from(*v),
        (DataType::Float32, WireValue::Float(v)) => {
            if !v.is_finite() {
                return Err(DecodeError::NonFinite);
            }
            return Ok(Value::Float(f64::from(*v) * scaling.scale + scaling.offset));
        }
        (DataType::Enum, WireValue::Word(v)) => {
            let Some(ValueFormat::Enum { members }) = format else {
                return Err(DecodeError::UnknownMember(*v));
            };
            return members
                .iter()
                .find(|member| member.value == *v)
                .map(|member| Value::Enum(member.name.clone()))
                .ok_or(DecodeError::UnknownMember(*v));
        }
        (DataType::String, WireValue::Bytes(bytes)) => {
            let end = bytes
                .iter()
                .rposition(|byte| *byte != 0)
                .map(|idx| idx + 1)
                .unwrap_or(0);
            return std::str::from_utf8(&bytes[..end])
                .map(|text| Value::Text(text.to_string()))
                .map_err(|_| DecodeError::InvalidText);
        }
        _ => return Err(mismatch()),
    };

    if scaling.is_identity() {
        Ok(Value::Integer(raw))
    } else {
        Ok(Value::Float(raw as f64 * scaling.scale + scaling.offset))
    }
}

/// Encode a typed value into its wire representation.
///
/// Bool always encodes to [`WireValue::Bit`]; on word registers it goes out
/// as a 0/1 word.
pub fn encode(
    data_type: DataType,
    format: Option<&ValueFormat>,
    value: &Value,
) -> Result<WireValue, EncodeError> {
    let mismatch = || EncodeError::TypeMismatch {
        data_type,
        value: value.type_name(),
    };
    let scaling = Scaling::of(format);

    match data_type {
        DataType::Bool => match value {
            Value::Boolean(bit) => Ok(WireValue::Bit(*bit)),
            Value::Integer(0) => Ok(WireValue::Bit(false)),
            Value::Integer(1) => Ok(WireValue::Bit(true)),
            _ => Err(mismatch()),
        },
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => {
            let raw = match value {
                Value::Integer(v) if scaling.is_identity() => {
                    scaling.check_bounds(*v as f64)?;
                    *v
                }
                Value::Integer(_) | Value::Float(_) if !scaling.is_identity() => {
                    let real = value.as_f64().ok_or_else(mismatch)?;
                    if !real.is_finite() {
                        return Err(EncodeError::NonFinite);
                    }
                    scaling.check_bounds(real)?;
                    let raw = ((real - scaling.offset) / scaling.scale).round();
                    if raw < i64::MIN as f64 || raw > i64::MAX as f64 {
                        return Err(EncodeError::OutOfRange {
                            data_type,
                            value: real,
                        });
                    }
                    raw as i64
                }
                _ => return Err(mismatch()),
            };
            integer_wire(data_type, raw)
        }
        DataType::Float32 => {
            let real = value.as_f64().ok_or_else(mismatch)?;
            if !real.is_finite() {
                return Err(EncodeError::NonFinite);
            }
            scaling.check_bounds(real)?;
            let raw = ((real - scaling.offset) / scaling.scale) as f32;
            if !raw.is_finite() {
                return Err(EncodeError::OutOfRange {
                    data_type,
                    value: real,
                });
            }
            Ok(WireValue::Float(raw))
        }
        DataType::Enum => {
            let name = match value {
                Value::Enum(name) | Value::Text(name) => name,
                _ => return Err(mismatch()),
            };
            let Some(ValueFormat::Enum { members }) = format else {
                return Err(EncodeError::UnmappedMember(name.clone()));
            };
            members
                .iter()
                .find(|member| &member.name == name)
                .map(|member| WireValue::Word(member.value))
                .ok_or_else(|| EncodeError::UnmappedMember(name.clone()))
        }
        DataType::String => {
            let Value::Text(text) = value else {
                return Err(mismatch());
            };
            let capacity = match format {
                Some(ValueFormat::Text { length }) => usize::from(*length) * 2,
                _ => 0,
            };
            if text.len() > capacity {
                return Err(EncodeError::TextTooLong {
                    length: text.len(),
                    capacity,
                });
            }
            let mut bytes = text.as_bytes().to_vec();
            bytes.resize(capacity, 0);
            Ok(WireValue::Bytes(bytes))
        }
    }
}

fn integer_wire(data_type: DataType, raw: i64) -> Result<WireValue, EncodeError> {
    let out_of_range = || EncodeError::OutOfRange {
        data_type,
        value: raw as f64,
    };
    match data_type {
        DataType::Int8 => i8::try_from(raw)
            .map(|v| WireValue::SignedWord(i16::from(v)))
            .map_err(|_| out_of_range()),
        DataType::Int16 => i16::try_from(raw)
            .map(WireValue::SignedWord)
            .map_err(|_| out_of_range()),
        DataType::Int32 => i32::try_from(raw)
            .map(WireValue::SignedDoubleWord)
            .map_err(|_| out_of_range()),
        DataType::UInt8 => u8::try_from(raw)
            .map(|v| WireValue::Word(u16::from(v)))
            .map_err(|_| out_of_range()),
        DataType::UInt16 => u16::try_from(raw)
            .map(WireValue::Word)
            .map_err(|_| out_of_range()),
        DataType::UInt32 => u32::try_from(raw)
            .map(WireValue::DoubleWord)
            .map_err(|_| out_of_range()),
        _ => Err(out_of_range()),
    }
}
