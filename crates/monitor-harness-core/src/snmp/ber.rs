//! Minimal BER primitives for the SNMP subset the harness speaks.

use super::{Oid, SnmpError};

pub(crate) const INTEGER: u8 = 0x02;
pub(crate) const OCTET_STRING: u8 = 0x04;
pub(crate) const NULL: u8 = 0x05;
pub(crate) const OBJECT_IDENTIFIER: u8 = 0x06;
pub(crate) const SEQUENCE: u8 = 0x30;
pub(crate) const IP_ADDRESS: u8 = 0x40;
pub(crate) const COUNTER32: u8 = 0x41;
pub(crate) const GAUGE32: u8 = 0x42;
pub(crate) const TIMETICKS: u8 = 0x43;
pub(crate) const COUNTER64: u8 = 0x46;

pub(crate) const GET_REQUEST: u8 = 0xA0;
pub(crate) const GET_RESPONSE: u8 = 0xA2;
pub(crate) const TRAP_V1: u8 = 0xA4;
pub(crate) const TRAP_V2: u8 = 0xA7;

/// Append a tag-length-value triple.
pub(crate) fn write_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    write_length(out, content.len());
    out.extend_from_slice(content);
}

fn write_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

/// Minimal two's-complement content octets of a signed integer.
pub(crate) fn integer_content(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant_zero = bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0;
        let redundant_ones = bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0;
        if !(redundant_zero || redundant_ones) {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

/// Content octets of an unsigned application integer (Counter, Gauge, ...).
pub(crate) fn unsigned_content(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes
        .iter()
        .take_while(|b| **b == 0)
        .count()
        .min(bytes.len() - 1);
    let mut content = Vec::with_capacity(bytes.len() - skip + 1);
    if bytes[skip] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(&bytes[skip..]);
    content
}

pub(crate) fn oid_content(oid: &Oid) -> Result<Vec<u8>, SnmpError> {
    let arcs = oid.arcs();
    if arcs.len() < 2 || arcs[0] > 2 || (arcs[0] < 2 && arcs[1] >= 40) {
        return Err(SnmpError::InvalidOid(oid.to_string()));
    }
    let mut content = Vec::new();
    write_base128(&mut content, u64::from(arcs[0]) * 40 + u64::from(arcs[1]));
    for arc in &arcs[2..] {
        write_base128(&mut content, u64::from(*arc));
    }
    Ok(content)
}

fn write_base128(out: &mut Vec<u8>, mut value: u64) {
    let mut groups = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        groups.push(((value & 0x7F) as u8) | 0x80);
        value >>= 7;
    }
    out.extend(groups.iter().rev());
}

pub(crate) fn decode_integer(content: &[u8]) -> Result<i64, SnmpError> {
    if content.is_empty() || content.len() > 8 {
        return Err(SnmpError::Malformed(format!(
            "integer of {} octets",
            content.len()
        )));
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for byte in content {
        value = (value << 8) | i64::from(*byte);
    }
    Ok(value)
}

pub(crate) fn decode_unsigned(content: &[u8]) -> Result<u64, SnmpError> {
    let content = match content {
        [0, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    };
    if content.is_empty() || content.len() > 8 {
        return Err(SnmpError::Malformed(format!(
            "unsigned of {} octets",
            content.len()
        )));
    }
    Ok(content
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)))
}

pub(crate) fn decode_oid(content: &[u8]) -> Result<Oid, SnmpError> {
    let mut values = Vec::new();
    let mut current: u64 = 0;
    for (i, byte) in content.iter().enumerate() {
        current = (current << 7) | u64::from(byte & 0x7F);
        if current > u64::from(u32::MAX) * 40 {
            return Err(SnmpError::Malformed("OID arc overflow".into()));
        }
        if byte & 0x80 == 0 {
            values.push(current);
            current = 0;
        } else if i == content.len() - 1 {
            return Err(SnmpError::Malformed("truncated OID arc".into()));
        }
    }
    let Some((&first, rest)) = values.split_first() else {
        return Err(SnmpError::Malformed("empty OID".into()));
    };
    let (a, b) = match first {
        0..=39 => (0, first),
        40..=79 => (1, first - 40),
        _ => (2, first - 80),
    };
    let mut arcs = Vec::with_capacity(values.len() + 1);
    arcs.push(a as u32);
    arcs.push(u32::try_from(b).map_err(|_| SnmpError::Malformed("OID arc overflow".into()))?);
    for value in rest {
        arcs.push(
            u32::try_from(*value).map_err(|_| SnmpError::Malformed("OID arc overflow".into()))?,
        );
    }
    Ok(Oid::new(arcs))
}

/// Cursor over a run of concatenated TLVs.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Read the next TLV, returning its tag and content.
    pub(crate) fn read(&mut self) -> Result<(u8, &'a [u8]), SnmpError> {
        let tag = self.byte()?;
        let first = self.byte()?;
        let len = if first & 0x80 == 0 {
            usize::from(first)
        } else {
            let count = usize::from(first & 0x7F);
            if count == 0 || count > std::mem::size_of::<usize>() {
                return Err(SnmpError::Malformed(format!(
                    "unsupported length form 0x{first:02x}"
                )));
            }
            let mut len = 0usize;
            for _ in 0..count {
                len = (len << 8) | usize::from(self.byte()?);
            }
            len
        };
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| SnmpError::Malformed(format!("TLV 0x{tag:02x} overruns buffer")))?;
        let content = &self.buf[self.pos..end];
        self.pos = end;
        Ok((tag, content))
    }

    /// Read the next TLV and require a specific tag.
    pub(crate) fn expect(&mut self, tag: u8) -> Result<&'a [u8], SnmpError> {
        let (found, content) = self.read()?;
        if found != tag {
            return Err(SnmpError::UnexpectedTag {
                expected: tag,
                found,
            });
        }
        Ok(content)
    }

    pub(crate) fn integer(&mut self) -> Result<i64, SnmpError> {
        decode_integer(self.expect(INTEGER)?)
    }

    fn byte(&mut self) -> Result<u8, SnmpError> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| SnmpError::Malformed("unexpected end of datagram".into()))?;
        self.pos += 1;
        Ok(byte)
    }
}
