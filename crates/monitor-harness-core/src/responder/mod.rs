//! Mock SNMP responder.
//!
//! The responder answers GetRequests for a fixed OID → value map under the
//! [`OID_PREFIX`] namespace. It runs as its own process (the
//! `mock-snmp-responder` binary) and is synchronized with the harness through
//! the rendezvous in [`barrier`]; [`MockResponder`] is the harness-side handle.

pub mod barrier;
mod process;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, error, warn};

use crate::snmp::{self, Oid, SnmpError, SnmpValue, VarBind};

pub use process::{MockResponder, ResponderState};

/// Namespace every mocked OID lives under (`2.25`).
pub const OID_PREFIX: [u32; 2] = [2, 25];

/// Prefix `arcs` with [`OID_PREFIX`] unless it already starts with it.
pub fn namespaced(arcs: &[u32]) -> Oid {
    if arcs.starts_with(&OID_PREFIX) {
        Oid::new(arcs.to_vec())
    } else {
        Oid::new(OID_PREFIX.to_vec()).child(arcs)
    }
}

/// Immutable OID → value table served by one responder.
///
/// Keys may be written relative to the namespace (`"1.0"`) or in full
/// (`"2.25.1.0"`); both name the same entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, SnmpValue>",
    into = "BTreeMap<String, SnmpValue>"
)]
pub struct ResponderMap(BTreeMap<Oid, SnmpValue>);

impl ResponderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; `relative` is namespaced as described above.
    pub fn with(mut self, relative: &[u32], value: SnmpValue) -> Self {
        self.0.insert(namespaced(relative), value);
        self
    }

    pub fn get(&self, oid: &Oid) -> Option<&SnmpValue> {
        self.0.get(oid)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<BTreeMap<String, SnmpValue>> for ResponderMap {
    type Error = SnmpError;

    fn try_from(raw: BTreeMap<String, SnmpValue>) -> Result<Self, Self::Error> {
        raw.into_iter()
            .map(|(key, value)| {
                let oid: Oid = key.parse()?;
                Ok((namespaced(oid.arcs()), value))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Self)
    }
}

impl From<ResponderMap> for BTreeMap<String, SnmpValue> {
    fn from(map: ResponderMap) -> Self {
        map.0
            .into_iter()
            .map(|(oid, value)| (oid.to_string(), value))
            .collect()
    }
}

/// Why a request went unanswered.
#[derive(Debug, Error)]
pub enum ResponderError {
    /// Not a GetRequest the codec understands; the datagram is dropped.
    #[error("undecodable request: {0}")]
    Decode(#[from] SnmpError),

    /// Requested OID is outside the mocked namespace.
    #[error("request for {0} is outside the mocked namespace")]
    OutOfNamespace(Oid),

    /// Requested OID has no mapped value: the fixture and the agent config disagree.
    #[error("no response mapped for {0}")]
    Unmapped(Oid),

    #[error("responder socket error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResponderError {
    /// Fatal errors stop the responder; the rest drop one datagram.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}

/// Request handler backed by a [`ResponderMap`].
#[derive(Debug, Clone)]
pub struct Responder {
    map: ResponderMap,
}

impl Responder {
    pub fn new(map: ResponderMap) -> Self {
        Self { map }
    }

    /// Answer one GetRequest datagram.
    pub fn answer(&self, datagram: &[u8]) -> Result<Vec<u8>, ResponderError> {
        let request = snmp::decode_get_request(datagram)?;
        let mut binds = Vec::with_capacity(request.oids.len());
        for oid in &request.oids {
            if !oid.starts_with(&OID_PREFIX) {
                return Err(ResponderError::OutOfNamespace(oid.clone()));
            }
            let value = self
                .map
                .get(oid)
                .ok_or_else(|| ResponderError::Unmapped(oid.clone()))?;
            binds.push(VarBind::new(oid.clone(), value.clone()));
        }
        Ok(snmp::encode_get_response(&request, &binds)?)
    }
}

/// Serve requests on `socket` until a fatal error.
pub async fn serve(socket: UdpSocket, responder: Responder) -> Result<(), ResponderError> {
    let mut buf = vec![0u8; 65_535];
    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        match responder.answer(&buf[..len]) {
            Ok(response) => {
                debug!(%peer, bytes = response.len(), "answering GetRequest");
                socket.send_to(&response, peer).await?;
            }
            Err(e) if e.is_fatal() => {
                error!(%peer, "stopping responder: {e}");
                return Err(e);
            }
            Err(e) => warn!(%peer, "dropping datagram: {e}"),
        }
    }
}
