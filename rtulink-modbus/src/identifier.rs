//! Register identifiers of the form `name_address` (e.g. `temperature_40001`).
//!
//! Only the configuration boundary parses these. Inside the registry a
//! register is addressed by `(device, kind, address)`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::RegistryError;

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>[A-Za-z][A-Za-z0-9_-]*)_(?P<address>[0-9]+)$")
        .expect("identifier regex is valid")
});

/// Parsed register identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterIdentifier {
    pub name: String,
    pub address: u16,
}

impl std::fmt::Display for RegisterIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.name, self.address)
    }
}

/// Split an identifier into its name and protocol address.
///
/// The numeric suffix is used verbatim as the protocol address.
pub fn parse_identifier(identifier: &str) -> Result<RegisterIdentifier, RegistryError> {
    let malformed = |reason: &str| RegistryError::MalformedIdentifier {
        identifier: identifier.to_string(),
        reason: reason.to_string(),
    };

    let caps = IDENTIFIER_RE
        .captures(identifier)
        .ok_or_else(|| malformed("expected <name>_<address>"))?;

    let name = caps
        .name("name")
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| malformed("missing name"))?;

    let address = caps
        .name("address")
        .ok_or_else(|| malformed("missing address"))?
        .as_str()
        .parse::<u16>()
        .map_err(|_| malformed("address does not fit 16 bits"))?;

    Ok(RegisterIdentifier { name, address })
}
