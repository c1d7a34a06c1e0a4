//! Trap construction and decoding.
//!
//! v1 traps use the dedicated Trap-PDU; v2c traps carry `sysUpTime.0` and
//! `snmpTrapOID.0` as their first two bindings. Either default binding can be
//! dropped to build the malformed traps the agent must reject.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use super::ber::{self, Reader};
use super::pdu::{decode_envelope, decode_pdu, encode_envelope};
use super::value::{decode_var_binds, encode_var_binds};
use super::{Oid, SnmpError, SnmpValue, SnmpVersion, VarBind};

const SYS_UPTIME_0: [u32; 9] = [1, 3, 6, 1, 2, 1, 1, 3, 0];
const SNMP_TRAP_OID_0: [u32; 11] = [1, 3, 6, 1, 6, 3, 1, 1, 4, 1, 0];
const SNMP_TRAPS: [u32; 9] = [1, 3, 6, 1, 6, 3, 1, 1, 5];
const DEFAULT_ENTERPRISE: [u32; 7] = [1, 3, 6, 1, 4, 1, 20408];

/// RFC 1157 generic trap codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GenericTrap {
    #[default]
    ColdStart,
    WarmStart,
    LinkDown,
    LinkUp,
    AuthenticationFailure,
    EgpNeighborLoss,
    EnterpriseSpecific,
}

impl GenericTrap {
    pub fn code(self) -> i64 {
        match self {
            Self::ColdStart => 0,
            Self::WarmStart => 1,
            Self::LinkDown => 2,
            Self::LinkUp => 3,
            Self::AuthenticationFailure => 4,
            Self::EgpNeighborLoss => 5,
            Self::EnterpriseSpecific => 6,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::ColdStart,
            1 => Self::WarmStart,
            2 => Self::LinkDown,
            3 => Self::LinkUp,
            4 => Self::AuthenticationFailure,
            5 => Self::EgpNeighborLoss,
            6 => Self::EnterpriseSpecific,
            _ => return None,
        })
    }

    /// `snmpTraps.N` OID for the well-known traps.
    pub fn notification_oid(self) -> Option<Oid> {
        match self {
            Self::EnterpriseSpecific => None,
            other => Some(Oid::new(SNMP_TRAPS.to_vec()).child(&[other.code() as u32 + 1])),
        }
    }

    /// Symbolic MIB name, as net-snmp renders it.
    pub fn mib_name(self) -> Option<&'static str> {
        match self {
            Self::ColdStart => Some("SNMPv2-MIB::coldStart"),
            Self::WarmStart => Some("SNMPv2-MIB::warmStart"),
            Self::LinkDown => Some("IF-MIB::linkDown"),
            Self::LinkUp => Some("IF-MIB::linkUp"),
            Self::AuthenticationFailure => Some("SNMPv2-MIB::authenticationFailure"),
            Self::EgpNeighborLoss => Some("RFC1213-MIB::egpNeighborLoss"),
            Self::EnterpriseSpecific => None,
        }
    }

    /// Inverse of [`Self::notification_oid`].
    pub fn from_notification_oid(oid: &Oid) -> Option<Self> {
        match oid.arcs() {
            [prefix @ .., last] if prefix == SNMP_TRAPS => Self::from_code(i64::from(*last) - 1)
                .filter(|generic| *generic != Self::EnterpriseSpecific),
            _ => None,
        }
    }
}

/// `enterprise.0.specific`, or `enterprise.specific` when the enterprise
/// already ends in `.0`.
fn enterprise_trap_oid(enterprise: &Oid, specific: i64) -> Result<Oid, SnmpError> {
    let specific = u32::try_from(specific).map_err(|_| {
        SnmpError::Malformed(format!("specific trap {specific} is not a valid OID arc"))
    })?;
    Ok(if enterprise.arcs().last() == Some(&0) {
        enterprise.child(&[specific])
    } else {
        enterprise.child(&[0, specific])
    })
}

fn default_community() -> String {
    "public".to_string()
}

fn default_true() -> bool {
    true
}

/// Description of one trap to inject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrapSpec {
    #[serde(default)]
    pub version: SnmpVersion,
    #[serde(default = "default_community")]
    pub community: String,
    #[serde(default)]
    pub generic: GenericTrap,
    /// Enterprise OID. For v1 defaults to the harness enterprise.
    #[serde(default)]
    pub enterprise: Option<Oid>,
    #[serde(default)]
    pub specific: i64,
    /// Bindings appended after the protocol's default ones.
    #[serde(default)]
    pub var_binds: Vec<VarBind>,
    /// v2c only: emit the `sysUpTime.0` binding.
    #[serde(default = "default_true")]
    pub include_uptime: bool,
    /// v2c only: emit the `snmpTrapOID.0` binding.
    #[serde(default = "default_true")]
    pub include_trap_oid: bool,
}

impl TrapSpec {
    pub fn v1(generic: GenericTrap) -> Self {
        Self::new(SnmpVersion::V1, generic)
    }

    pub fn v2c(generic: GenericTrap) -> Self {
        Self::new(SnmpVersion::V2c, generic)
    }

    fn new(version: SnmpVersion, generic: GenericTrap) -> Self {
        Self {
            version,
            community: default_community(),
            generic,
            enterprise: None,
            specific: 0,
            var_binds: Vec::new(),
            include_uptime: true,
            include_trap_oid: true,
        }
    }

    /// Make this an enterprise-specific trap under `enterprise`.
    pub fn with_enterprise(mut self, enterprise: Oid) -> Self {
        self.generic = GenericTrap::EnterpriseSpecific;
        self.enterprise = Some(enterprise);
        self
    }

    pub fn with_var_bind(mut self, oid: Oid, value: SnmpValue) -> Self {
        self.var_binds.push(VarBind::new(oid, value));
        self
    }

    pub fn without_uptime(mut self) -> Self {
        self.include_uptime = false;
        self
    }

    pub fn without_trap_oid(mut self) -> Self {
        self.include_trap_oid = false;
        self
    }

    fn enterprise_or_default(&self) -> Oid {
        self.enterprise
            .clone()
            .unwrap_or_else(|| Oid::new(DEFAULT_ENTERPRISE.to_vec()))
    }

    /// The notification OID a receiver derives for this trap.
    pub fn trap_oid(&self) -> Result<Oid, SnmpError> {
        match self.generic.notification_oid() {
            Some(oid) => Ok(oid),
            None => enterprise_trap_oid(&self.enterprise_or_default(), self.specific),
        }
    }

    /// Encode the trap as one datagram.
    pub fn encode(&self) -> Result<Vec<u8>, SnmpError> {
        match self.version {
            SnmpVersion::V1 => self.encode_v1(),
            SnmpVersion::V2c => self.encode_v2c(),
        }
    }

    fn encode_v1(&self) -> Result<Vec<u8>, SnmpError> {
        let mut pdu = Vec::new();
        ber::write_tlv(
            &mut pdu,
            ber::OBJECT_IDENTIFIER,
            &ber::oid_content(&self.enterprise_or_default())?,
        );
        SnmpValue::IpAddress(Ipv4Addr::UNSPECIFIED).encode(&mut pdu)?;
        ber::write_tlv(&mut pdu, ber::INTEGER, &ber::integer_content(self.generic.code()));
        ber::write_tlv(&mut pdu, ber::INTEGER, &ber::integer_content(self.specific));
        SnmpValue::TimeTicks(0).encode(&mut pdu)?;
        encode_var_binds(&mut pdu, &self.var_binds)?;
        Ok(encode_envelope(
            SnmpVersion::V1,
            &self.community,
            ber::TRAP_V1,
            &pdu,
        ))
    }

    fn encode_v2c(&self) -> Result<Vec<u8>, SnmpError> {
        let mut binds = Vec::with_capacity(self.var_binds.len() + 2);
        if self.include_uptime {
            binds.push(VarBind::new(
                Oid::new(SYS_UPTIME_0.to_vec()),
                SnmpValue::TimeTicks(0),
            ));
        }
        if self.include_trap_oid {
            binds.push(VarBind::new(
                Oid::new(SNMP_TRAP_OID_0.to_vec()),
                SnmpValue::ObjectIdentifier(self.trap_oid()?),
            ));
        }
        binds.extend(self.var_binds.iter().cloned());

        let mut pdu = Vec::new();
        ber::write_tlv(&mut pdu, ber::INTEGER, &ber::integer_content(1));
        ber::write_tlv(&mut pdu, ber::INTEGER, &ber::integer_content(0));
        ber::write_tlv(&mut pdu, ber::INTEGER, &ber::integer_content(0));
        encode_var_binds(&mut pdu, &binds)?;
        Ok(encode_envelope(
            SnmpVersion::V2c,
            &self.community,
            ber::TRAP_V2,
            &pdu,
        ))
    }
}

/// A received trap, normalized across protocol versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapNotification {
    pub version: SnmpVersion,
    pub community: String,
    /// `None` when a v2c trap lacks `snmpTrapOID.0`.
    pub trap_oid: Option<Oid>,
    /// Bindings other than `sysUpTime.0` and `snmpTrapOID.0`.
    pub var_binds: Vec<VarBind>,
}

/// Decode a v1 or v2c trap datagram.
pub fn decode_trap(datagram: &[u8]) -> Result<TrapNotification, SnmpError> {
    let envelope = decode_envelope(datagram)?;
    match envelope.pdu_tag {
        ber::TRAP_V1 => {
            let mut reader = Reader::new(envelope.pdu);
            let enterprise = ber::decode_oid(reader.expect(ber::OBJECT_IDENTIFIER)?)?;
            let _agent_addr = reader.expect(ber::IP_ADDRESS)?;
            let generic = reader.integer()?;
            let specific = reader.integer()?;
            let _timestamp = reader.expect(ber::TIMETICKS)?;
            let var_binds = decode_var_binds(reader.expect(ber::SEQUENCE)?)?;
            let trap_oid = match GenericTrap::from_code(generic) {
                Some(GenericTrap::EnterpriseSpecific) => enterprise_trap_oid(&enterprise, specific)?,
                Some(known) => known.notification_oid().ok_or_else(|| {
                    SnmpError::Malformed(format!("generic trap {generic} has no OID"))
                })?,
                None => {
                    return Err(SnmpError::Malformed(format!(
                        "unknown generic trap {generic}"
                    )));
                }
            };
            Ok(TrapNotification {
                version: envelope.version,
                community: envelope.community,
                trap_oid: Some(trap_oid),
                var_binds,
            })
        }
        ber::TRAP_V2 => {
            let pdu = decode_pdu(envelope.pdu)?;
            let mut trap_oid = None;
            let mut var_binds = Vec::with_capacity(pdu.var_binds.len());
            for bind in pdu.var_binds {
                if bind.oid.arcs() == SNMP_TRAP_OID_0 {
                    if let SnmpValue::ObjectIdentifier(oid) = &bind.value {
                        trap_oid = Some(oid.clone());
                        continue;
                    }
                } else if bind.oid.arcs() == SYS_UPTIME_0 {
                    continue;
                }
                var_binds.push(bind);
            }
            Ok(TrapNotification {
                version: envelope.version,
                community: envelope.community,
                trap_oid,
                var_binds,
            })
        }
        other => Err(SnmpError::UnsupportedPdu(other)),
    }
}
