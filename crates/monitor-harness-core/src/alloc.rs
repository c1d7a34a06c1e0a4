//! Collision-free ports and names for test isolation.
//!
//! Ports come from the OS ephemeral range: a socket is bound to port 0, the
//! assigned number is recorded, and the socket is dropped. Another process
//! can still grab the port before the real service binds it; that window is
//! accepted. Within this process every lease is also checked against a
//! process-wide table, so concurrently running tests never share a port or
//! topic.

use std::collections::HashSet;
use std::fmt;
use std::net::{Ipv4Addr, TcpListener, UdpSocket};
use std::sync::{Mutex, OnceLock};

use crate::error::{HarnessError, Result};

const MAX_ATTEMPTS: usize = 16;

/// Transport protocol of a port lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
        }
    }
}

#[derive(Default)]
struct LeaseTable {
    ports: HashSet<(Protocol, u16)>,
    names: HashSet<String>,
}

fn leases() -> &'static Mutex<LeaseTable> {
    static TABLE: OnceLock<Mutex<LeaseTable>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(LeaseTable::default()))
}

fn with_leases<T>(f: impl FnOnce(&mut LeaseTable) -> T) -> T {
    let mut table = leases()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut table)
}

/// A port leased for the lifetime of this value.
#[derive(Debug)]
pub struct PortLease {
    protocol: Protocol,
    port: u16,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        with_leases(|table| table.ports.remove(&(self.protocol, self.port)));
    }
}

/// A name leased for the lifetime of this value.
#[derive(Debug)]
pub struct NameLease {
    name: String,
}

impl NameLease {
    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for NameLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Drop for NameLease {
    fn drop(&mut self) {
        with_leases(|table| table.names.remove(&self.name));
    }
}

fn ephemeral_port(protocol: Protocol) -> std::io::Result<u16> {
    match protocol {
        Protocol::Tcp => TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))?
            .local_addr()
            .map(|addr| addr.port()),
        Protocol::Udp => UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?
            .local_addr()
            .map(|addr| addr.port()),
    }
}

/// Lease a currently free port of the given protocol.
pub fn allocate_port(protocol: Protocol) -> Result<PortLease> {
    for _ in 0..MAX_ATTEMPTS {
        let port = ephemeral_port(protocol).map_err(|e| HarnessError::ResourceAllocation {
            resource: format!("{protocol} port"),
            message: e.to_string(),
        })?;
        if with_leases(|table| table.ports.insert((protocol, port))) {
            return Ok(PortLease { protocol, port });
        }
    }
    Err(HarnessError::ResourceAllocation {
        resource: format!("{protocol} port"),
        message: format!("every candidate collided with a live lease after {MAX_ATTEMPTS} attempts"),
    })
}

/// Topic names must not contain `__` nor end with the `_` separator.
fn is_forbidden(name: &str) -> bool {
    name.contains("__") || name.ends_with('_')
}

/// Lease a name of the form `prefix_kind_<random>`.
///
/// A candidate with a forbidden separator sequence is regenerated like a
/// collision.
pub fn allocate_name(prefix: &str, kind: &str) -> Result<NameLease> {
    allocate_name_with(prefix, kind, || uuid::Uuid::new_v4().simple().to_string())
}

fn allocate_name_with(
    prefix: &str,
    kind: &str,
    mut suffix: impl FnMut() -> String,
) -> Result<NameLease> {
    let mut forbidden = 0;
    for _ in 0..MAX_ATTEMPTS {
        let name = format!("{prefix}_{kind}_{}", suffix());
        if is_forbidden(&name) {
            forbidden += 1;
            continue;
        }
        if with_leases(|table| table.names.insert(name.clone())) {
            return Ok(NameLease { name });
        }
    }
    Err(HarnessError::ResourceAllocation {
        resource: format!("{kind} name"),
        message: format!(
            "no usable candidate after {MAX_ATTEMPTS} attempts \
             ({forbidden} with a forbidden separator sequence, the rest collided)"
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_port_allocations_differ() {
        let a = allocate_port(Protocol::Udp).unwrap();
        let b = allocate_port(Protocol::Udp).unwrap();
        assert_ne!(a.port(), b.port());
        assert_ne!(a.port(), 0);
    }

    #[test]
    fn dropped_lease_is_released() {
        let lease = allocate_port(Protocol::Tcp).unwrap();
        let key = (Protocol::Tcp, lease.port());
        assert!(with_leases(|table| table.ports.contains(&key)));
        drop(lease);
        assert!(!with_leases(|table| table.ports.contains(&key)));
    }

    #[test]
    fn names_follow_the_pattern_and_are_unique() {
        let a = allocate_name("monitor", "topic").unwrap();
        let b = allocate_name("monitor", "topic").unwrap();
        assert!(a.as_str().starts_with("monitor_topic_"));
        assert!(!a.as_str().contains("__"));
        assert_ne!(a.as_str(), b.as_str());
    }

    #[test]
    fn forbidden_candidate_is_regenerated() {
        let mut suffixes = vec!["ok".to_string(), "bad_".to_string(), "_bad".to_string()];
        let lease =
            allocate_name_with("monitor", "regen", || suffixes.pop().unwrap()).unwrap();
        assert_eq!(lease.as_str(), "monitor_regen_ok");
        assert!(suffixes.is_empty());
    }

    #[test]
    fn forbidden_prefix_fails_after_retries() {
        let mut calls = 0;
        let err = allocate_name_with("monitor_", "topic", || {
            calls += 1;
            calls.to_string()
        })
        .unwrap_err();
        assert_eq!(err.kind(), "resource-allocation");
        assert_eq!(calls, MAX_ATTEMPTS);
        assert!(err.to_string().contains("forbidden"));
    }
}
