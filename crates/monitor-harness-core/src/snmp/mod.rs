//! SNMP v1/v2c wire support for the mock responder and the trap injector.
//!
//! Only the subset the harness needs is implemented: GetRequest decoding,
//! GetResponse encoding, and v1/v2c trap encoding (plus the matching decoders
//! used by tests and the fake agent fixture).

mod ber;
pub mod pdu;
pub mod trap;
mod value;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use pdu::{
    GetRequest, decode_get_request, decode_get_response, encode_get_request, encode_get_response,
};
pub use trap::{GenericTrap, TrapNotification, TrapSpec, decode_trap};
pub use value::{SnmpValue, VarBind};

/// SNMP codec errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnmpError {
    /// Datagram is truncated or structurally invalid.
    #[error("malformed SNMP datagram: {0}")]
    Malformed(String),

    /// A TLV carried a different tag than the grammar requires.
    #[error("expected tag 0x{expected:02x}, found 0x{found:02x}")]
    UnexpectedTag { expected: u8, found: u8 },

    /// Version field is neither v1 nor v2c.
    #[error("unsupported SNMP version {0}")]
    UnsupportedVersion(i64),

    /// PDU type the decoder was not asked to handle.
    #[error("unsupported PDU type 0x{0:02x}")]
    UnsupportedPdu(u8),

    /// Object identifier cannot be BER-encoded or parsed.
    #[error("invalid object identifier '{0}'")]
    InvalidOid(String),
}

/// Protocol version carried in the message envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnmpVersion {
    V1,
    #[default]
    V2c,
}

impl SnmpVersion {
    pub(crate) fn wire(self) -> i64 {
        match self {
            Self::V1 => 0,
            Self::V2c => 1,
        }
    }

    pub(crate) fn from_wire(value: i64) -> Result<Self, SnmpError> {
        match value {
            0 => Ok(Self::V1),
            1 => Ok(Self::V2c),
            other => Err(SnmpError::UnsupportedVersion(other)),
        }
    }
}

/// Object identifier as a list of arcs.
///
/// Serialized as a dotted string (`"1.3.6.1.2.1.1.3.0"`); a leading dot is
/// accepted when parsing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(arcs: impl Into<Vec<u32>>) -> Self {
        Self(arcs.into())
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &[u32]) -> bool {
        self.0.starts_with(prefix)
    }

    /// Return a new OID with `suffix` appended.
    pub fn child(&self, suffix: &[u32]) -> Self {
        let mut arcs = self.0.clone();
        arcs.extend_from_slice(suffix);
        Self(arcs)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arc in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{arc}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Oid {
    type Err = SnmpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('.');
        if trimmed.is_empty() {
            return Err(SnmpError::InvalidOid(s.to_string()));
        }
        trimmed
            .split('.')
            .map(|arc| arc.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
            .map_err(|_| SnmpError::InvalidOid(s.to_string()))
    }
}

impl TryFrom<String> for Oid {
    type Error = SnmpError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Oid> for String {
    fn from(oid: Oid) -> Self {
        oid.to_string()
    }
}
