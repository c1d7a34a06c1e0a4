//! Typed SNMP values and variable bindings.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use super::ber::{self, Reader};
use super::{Oid, SnmpError};

/// A value as it appears in a variable binding.
///
/// Fixture files spell values as `{"type": "octet-string", "value": "3"}`;
/// `{"type": "null"}` needs no value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum SnmpValue {
    Integer(i64),
    Integer32(i32),
    OctetString(String),
    Null,
    ObjectIdentifier(Oid),
    IpAddress(Ipv4Addr),
    Counter32(u32),
    Gauge32(u32),
    Unsigned32(u32),
    #[serde(rename = "timeticks")]
    TimeTicks(u32),
    Counter64(u64),
}

impl SnmpValue {
    pub(crate) fn encode(&self, out: &mut Vec<u8>) -> Result<(), SnmpError> {
        match self {
            Self::Integer(v) => ber::write_tlv(out, ber::INTEGER, &ber::integer_content(*v)),
            Self::Integer32(v) => {
                ber::write_tlv(out, ber::INTEGER, &ber::integer_content(i64::from(*v)))
            }
            Self::OctetString(s) => ber::write_tlv(out, ber::OCTET_STRING, s.as_bytes()),
            Self::Null => ber::write_tlv(out, ber::NULL, &[]),
            Self::ObjectIdentifier(oid) => {
                ber::write_tlv(out, ber::OBJECT_IDENTIFIER, &ber::oid_content(oid)?)
            }
            Self::IpAddress(addr) => ber::write_tlv(out, ber::IP_ADDRESS, &addr.octets()),
            Self::Counter32(v) => {
                ber::write_tlv(out, ber::COUNTER32, &ber::unsigned_content(u64::from(*v)))
            }
            Self::Gauge32(v) | Self::Unsigned32(v) => {
                ber::write_tlv(out, ber::GAUGE32, &ber::unsigned_content(u64::from(*v)))
            }
            Self::TimeTicks(v) => {
                ber::write_tlv(out, ber::TIMETICKS, &ber::unsigned_content(u64::from(*v)))
            }
            Self::Counter64(v) => ber::write_tlv(out, ber::COUNTER64, &ber::unsigned_content(*v)),
        }
        Ok(())
    }

    pub(crate) fn decode(tag: u8, content: &[u8]) -> Result<Self, SnmpError> {
        let narrow = |v: u64| {
            u32::try_from(v).map_err(|_| SnmpError::Malformed(format!("value {v} exceeds 32 bits")))
        };
        Ok(match tag {
            ber::INTEGER => Self::Integer(ber::decode_integer(content)?),
            ber::OCTET_STRING => Self::OctetString(String::from_utf8_lossy(content).into_owned()),
            ber::NULL => Self::Null,
            ber::OBJECT_IDENTIFIER => Self::ObjectIdentifier(ber::decode_oid(content)?),
            ber::IP_ADDRESS => {
                let octets: [u8; 4] = content
                    .try_into()
                    .map_err(|_| SnmpError::Malformed("IpAddress is not 4 octets".into()))?;
                Self::IpAddress(Ipv4Addr::from(octets))
            }
            ber::COUNTER32 => Self::Counter32(narrow(ber::decode_unsigned(content)?)?),
            ber::GAUGE32 => Self::Gauge32(narrow(ber::decode_unsigned(content)?)?),
            ber::TIMETICKS => Self::TimeTicks(narrow(ber::decode_unsigned(content)?)?),
            ber::COUNTER64 => Self::Counter64(ber::decode_unsigned(content)?),
            other => {
                return Err(SnmpError::Malformed(format!(
                    "unsupported value tag 0x{other:02x}"
                )));
            }
        })
    }

    /// Textual rendering, as an agent would read the value.
    pub fn render(&self) -> String {
        match self {
            Self::Integer(v) => v.to_string(),
            Self::Integer32(v) => v.to_string(),
            Self::OctetString(s) => s.clone(),
            Self::Null => String::new(),
            Self::ObjectIdentifier(oid) => oid.to_string(),
            Self::IpAddress(addr) => addr.to_string(),
            Self::Counter32(v) | Self::Gauge32(v) | Self::Unsigned32(v) | Self::TimeTicks(v) => {
                v.to_string()
            }
            Self::Counter64(v) => v.to_string(),
        }
    }
}

/// One `(OID, value)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarBind {
    pub oid: Oid,
    pub value: SnmpValue,
}

impl VarBind {
    pub fn new(oid: Oid, value: SnmpValue) -> Self {
        Self { oid, value }
    }
}

pub(crate) fn encode_var_binds(out: &mut Vec<u8>, binds: &[VarBind]) -> Result<(), SnmpError> {
    let mut list = Vec::new();
    for bind in binds {
        let mut pair = Vec::new();
        ber::write_tlv(&mut pair, ber::OBJECT_IDENTIFIER, &ber::oid_content(&bind.oid)?);
        bind.value.encode(&mut pair)?;
        ber::write_tlv(&mut list, ber::SEQUENCE, &pair);
    }
    ber::write_tlv(out, ber::SEQUENCE, &list);
    Ok(())
}

pub(crate) fn decode_var_binds(content: &[u8]) -> Result<Vec<VarBind>, SnmpError> {
    let mut list = Reader::new(content);
    let mut binds = Vec::new();
    while !list.is_empty() {
        let mut pair = Reader::new(list.expect(ber::SEQUENCE)?);
        let oid = ber::decode_oid(pair.expect(ber::OBJECT_IDENTIFIER)?)?;
        let (tag, value) = pair.read()?;
        binds.push(VarBind::new(oid, SnmpValue::decode(tag, value)?));
    }
    Ok(binds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_spelling_deserializes() {
        let v: SnmpValue =
            serde_json::from_str(r#"{"type": "octet-string", "value": "3"}"#).unwrap();
        assert_eq!(v, SnmpValue::OctetString("3".into()));
        let v: SnmpValue = serde_json::from_str(r#"{"type": "gauge32", "value": 7}"#).unwrap();
        assert_eq!(v, SnmpValue::Gauge32(7));
        let v: SnmpValue = serde_json::from_str(r#"{"type": "null"}"#).unwrap();
        assert_eq!(v, SnmpValue::Null);
    }

    #[test]
    fn var_binds_survive_the_wire() {
        let binds = vec![
            VarBind::new("1.3.6.1.2.1.1.3.0".parse().unwrap(), SnmpValue::TimeTicks(0)),
            VarBind::new(
                "1.3.6.1.2.1.2.2.1.2.1".parse().unwrap(),
                SnmpValue::OctetString("My interface".into()),
            ),
            VarBind::new("2.25.0.1".parse().unwrap(), SnmpValue::Counter64(u64::MAX)),
        ];
        let mut out = Vec::new();
        encode_var_binds(&mut out, &binds).unwrap();
        let mut reader = Reader::new(&out);
        let decoded = decode_var_binds(reader.expect(ber::SEQUENCE).unwrap()).unwrap();
        assert_eq!(decoded, binds);
    }

    #[test]
    fn unsigned32_shares_the_gauge_tag() {
        let mut out = Vec::new();
        SnmpValue::Unsigned32(4).encode(&mut out).unwrap();
        assert_eq!(out, vec![ber::GAUGE32, 0x01, 0x04]);
    }
}
