use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Typed process value, as held by registers and device properties.
///
/// Deserialization is untagged, so configuration files can write plain
/// JSON scalars. Enumeration members arrive as [`Value::Text`] and are
/// resolved against the register's member list when encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    /// Single bit (coil, discrete input or 0/1 word).
    Boolean(bool),

    /// Signed or unsigned integer up to 32 bits on the wire.
    Integer(i64),

    /// Floating point or scaled value.
    Float(f64),

    /// Text value.
    Text(String),

    /// Name of an enumeration member.
    Enum(String),
}

impl Value {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Name of the value's variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Enum(_) => "enum",
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) | Value::Enum(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// What a [`ValueReport`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    /// A bus register.
    Register,
    /// A device property (e.g. connection state).
    Property,
}

/// Change notification for a register or device property.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValueReport {
    /// Unix epoch milliseconds when the change was recorded.
    pub timestamp: i64,

    /// Device name.
    pub device: String,

    /// What changed.
    pub kind: ReportKind,

    /// Register identifier (e.g. "temperature_40001") or property name.
    pub key: String,

    /// Current value, empty when never read or invalidated by a sentinel.
    pub value: Option<Value>,

    /// Whether the value reflects the last transaction.
    pub valid: bool,

    /// Pending write target, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
}

impl ValueReport {
    /// Create a register report with the current timestamp.
    pub fn register(
        device: impl Into<String>,
        key: impl Into<String>,
        value: Option<Value>,
        valid: bool,
    ) -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            device: device.into(),
            kind: ReportKind::Register,
            key: key.into(),
            value,
            valid,
            expected: None,
        }
    }

    /// Create a property report with the current timestamp.
    pub fn property(device: impl Into<String>, key: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            device: device.into(),
            kind: ReportKind::Property,
            key: key.into(),
            value,
            valid: true,
            expected: None,
        }
    }

    /// Attach the pending write target.
    pub fn with_expected(mut self, expected: Option<Value>) -> Self {
        self.expected = expected;
        self
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch (should never happen in practice).
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_report_creation() {
        let report = ValueReport::register(
            "boiler",
            "temperature_40001",
            Some(Value::Float(25.0)),
            true,
        )
        .with_expected(Some(Value::Float(30.0)));

        assert_eq!(report.device, "boiler");
        assert_eq!(report.kind, ReportKind::Register);
        assert_eq!(report.key, "temperature_40001");
        assert_eq!(report.value, Some(Value::Float(25.0)));
        assert_eq!(report.expected, Some(Value::Float(30.0)));
        assert!(report.timestamp > 0);
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(42i64), Value::Integer(42));
        assert_eq!(Value::from(2.5), Value::Float(2.5));
        assert_eq!(Value::from("on"), Value::Text("on".to_string()));
        assert_eq!(Value::from(true), Value::Boolean(true));
    }

    #[test]
    fn test_untagged_deserialization() {
        let values: Vec<Value> = serde_json::from_str(r#"[true, 7, -3, 2.5, "auto"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Boolean(true),
                Value::Integer(7),
                Value::Integer(-3),
                Value::Float(2.5),
                Value::Text("auto".to_string()),
            ]
        );
    }

    #[test]
    fn test_expected_skipped_when_empty() {
        let report = ValueReport::property("boiler", "state", Some(Value::from("connected")));
        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("expected"));
        assert!(json.contains("\"kind\":\"property\""));
    }
}
