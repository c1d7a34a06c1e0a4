//! Message envelope and request/response PDUs.

use super::ber::{self, Reader};
use super::value::{decode_var_binds, encode_var_binds};
use super::{Oid, SnmpError, SnmpValue, SnmpVersion, VarBind};

/// A decoded GetRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRequest {
    pub version: SnmpVersion,
    pub community: String,
    pub request_id: i64,
    pub oids: Vec<Oid>,
}

/// Envelope fields shared by every SNMP v1/v2c message.
pub(crate) struct Envelope<'a> {
    pub version: SnmpVersion,
    pub community: String,
    pub pdu_tag: u8,
    pub pdu: &'a [u8],
}

pub(crate) fn encode_envelope(
    version: SnmpVersion,
    community: &str,
    pdu_tag: u8,
    pdu: &[u8],
) -> Vec<u8> {
    let mut body = Vec::new();
    ber::write_tlv(&mut body, ber::INTEGER, &ber::integer_content(version.wire()));
    ber::write_tlv(&mut body, ber::OCTET_STRING, community.as_bytes());
    ber::write_tlv(&mut body, pdu_tag, pdu);
    let mut out = Vec::with_capacity(body.len() + 4);
    ber::write_tlv(&mut out, ber::SEQUENCE, &body);
    out
}

pub(crate) fn decode_envelope(datagram: &[u8]) -> Result<Envelope<'_>, SnmpError> {
    let mut outer = Reader::new(datagram);
    let mut message = Reader::new(outer.expect(ber::SEQUENCE)?);
    let version = SnmpVersion::from_wire(message.integer()?)?;
    let community = String::from_utf8_lossy(message.expect(ber::OCTET_STRING)?).into_owned();
    let (pdu_tag, pdu) = message.read()?;
    Ok(Envelope {
        version,
        community,
        pdu_tag,
        pdu,
    })
}

fn encode_pdu(
    request_id: i64,
    error_status: i64,
    error_index: i64,
    binds: &[VarBind],
) -> Result<Vec<u8>, SnmpError> {
    let mut pdu = Vec::new();
    ber::write_tlv(&mut pdu, ber::INTEGER, &ber::integer_content(request_id));
    ber::write_tlv(&mut pdu, ber::INTEGER, &ber::integer_content(error_status));
    ber::write_tlv(&mut pdu, ber::INTEGER, &ber::integer_content(error_index));
    encode_var_binds(&mut pdu, binds)?;
    Ok(pdu)
}

pub(crate) struct Pdu {
    pub request_id: i64,
    pub error_status: i64,
    pub var_binds: Vec<VarBind>,
}

pub(crate) fn decode_pdu(content: &[u8]) -> Result<Pdu, SnmpError> {
    let mut reader = Reader::new(content);
    let request_id = reader.integer()?;
    let error_status = reader.integer()?;
    let _error_index = reader.integer()?;
    let var_binds = decode_var_binds(reader.expect(ber::SEQUENCE)?)?;
    Ok(Pdu {
        request_id,
        error_status,
        var_binds,
    })
}

/// Decode a GetRequest datagram. Any other PDU type is rejected.
pub fn decode_get_request(datagram: &[u8]) -> Result<GetRequest, SnmpError> {
    let envelope = decode_envelope(datagram)?;
    if envelope.pdu_tag != ber::GET_REQUEST {
        return Err(SnmpError::UnsupportedPdu(envelope.pdu_tag));
    }
    let pdu = decode_pdu(envelope.pdu)?;
    Ok(GetRequest {
        version: envelope.version,
        community: envelope.community,
        request_id: pdu.request_id,
        oids: pdu.var_binds.into_iter().map(|bind| bind.oid).collect(),
    })
}

/// Encode a GetRequest for the given OIDs (used by tests and fixtures).
pub fn encode_get_request(
    version: SnmpVersion,
    community: &str,
    request_id: i64,
    oids: &[Oid],
) -> Result<Vec<u8>, SnmpError> {
    let binds: Vec<VarBind> = oids
        .iter()
        .map(|oid| VarBind::new(oid.clone(), SnmpValue::Null))
        .collect();
    let pdu = encode_pdu(request_id, 0, 0, &binds)?;
    Ok(encode_envelope(version, community, ber::GET_REQUEST, &pdu))
}

/// Encode a successful GetResponse answering `request`.
pub fn encode_get_response(request: &GetRequest, binds: &[VarBind]) -> Result<Vec<u8>, SnmpError> {
    let pdu = encode_pdu(request.request_id, 0, 0, binds)?;
    Ok(encode_envelope(
        request.version,
        &request.community,
        ber::GET_RESPONSE,
        &pdu,
    ))
}

/// Decode a GetResponse, returning its request id and bindings.
pub fn decode_get_response(datagram: &[u8]) -> Result<(i64, Vec<VarBind>), SnmpError> {
    let envelope = decode_envelope(datagram)?;
    if envelope.pdu_tag != ber::GET_RESPONSE {
        return Err(SnmpError::UnsupportedPdu(envelope.pdu_tag));
    }
    let pdu = decode_pdu(envelope.pdu)?;
    if pdu.error_status != 0 {
        return Err(SnmpError::Malformed(format!(
            "response carries error-status {}",
            pdu.error_status
        )));
    }
    Ok((pdu.request_id, pdu.var_binds))
}
