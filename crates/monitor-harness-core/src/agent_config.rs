//! Agent config materialization.
//!
//! A scenario's config fragment is merged over the baseline `conf` options,
//! then completed with everything that must be unique per run: the output
//! topic, sensor endpoints, the trap listener endpoint, and monitor OIDs
//! moved under the responder namespace. The result is written once to a
//! uniquely named file and never modified afterwards.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::alloc::{NameLease, PortLease, Protocol, allocate_name, allocate_port};
use crate::error::{HarnessError, Result};
use crate::responder::namespaced;
use crate::settings::{BaselineConfig, HarnessSettings};
use crate::snmp::Oid;

const TOPIC_PREFIX: &str = "monitor";
const SENSOR_HOST: &str = "localhost";
const TRAP_HOST: &str = "127.0.0.1";

/// Builds per-run agent config documents.
#[derive(Debug, Clone)]
pub struct ConfigMaterializer {
    baseline: BaselineConfig,
    dir: PathBuf,
}

/// A config document written for one run, with the leases it depends on.
#[derive(Debug)]
pub struct MaterializedConfig {
    path: Option<PathBuf>,
    document: Value,
    topic: NameLease,
    sensor_ports: Vec<u16>,
    trap_port: Option<u16>,
    _leases: Vec<PortLease>,
}

impl MaterializedConfig {
    /// Config file path; `None` for documents that were only built.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn topic(&self) -> &str {
        self.topic.as_str()
    }

    /// Endpoint port of every sensor, in document order.
    pub fn sensor_ports(&self) -> &[u16] {
        &self.sensor_ports
    }

    /// Port the mock responder must bind: the first sensor's.
    pub fn responder_port(&self) -> Option<u16> {
        self.sensor_ports.first().copied()
    }

    pub fn trap_port(&self) -> Option<u16> {
        self.trap_port
    }

    /// Delete the config file, if one was written.
    pub fn remove(&mut self) -> Result<()> {
        if let Some(path) = self.path.take() {
            std::fs::remove_file(&path).map_err(|e| {
                HarnessError::io(format!("removing config file {}", path.display()), e)
            })?;
        }
        Ok(())
    }
}

impl ConfigMaterializer {
    pub fn new(baseline: BaselineConfig, dir: impl Into<PathBuf>) -> Self {
        Self {
            baseline,
            dir: dir.into(),
        }
    }

    pub fn from_settings(settings: &HarnessSettings) -> Self {
        Self::new(settings.baseline.clone(), settings.config_dir())
    }

    /// Build the final document without writing it.
    pub fn build(&self, fragment: &Value) -> Result<MaterializedConfig> {
        let Value::Object(fragment) = fragment else {
            return Err(HarnessError::config("agent config must be a JSON object"));
        };
        let mut document = fragment.clone();
        let mut leases = Vec::new();

        let mut conf = self.baseline.to_conf();
        match document.remove("conf") {
            Some(Value::Object(overrides)) => conf.extend(overrides),
            Some(Value::Null) | None => {}
            Some(_) => return Err(HarnessError::config("'conf' must be a JSON object")),
        }

        let topic = allocate_name(TOPIC_PREFIX, "topic")?;
        conf.insert("kafka_topic".into(), Value::from(topic.as_str()));

        let trap_port = match conf.get_mut("snmp_traps") {
            Some(Value::Object(traps)) => Some(complete_trap_listener(traps, &mut leases)?),
            Some(_) => {
                return Err(HarnessError::config("'conf.snmp_traps' must be a JSON object"));
            }
            None => None,
        };
        document.insert("conf".into(), Value::Object(conf));

        let sensor_ports = match document.get_mut("sensors") {
            Some(Value::Array(sensors)) => sensors
                .iter_mut()
                .enumerate()
                .map(|(index, sensor)| complete_sensor(index, sensor, &mut leases))
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(HarnessError::config("'sensors' must be a JSON array")),
            None if trap_port.is_some() => Vec::new(),
            None => {
                return Err(HarnessError::config(
                    "config has no 'sensors' and no 'conf.snmp_traps' listener",
                ));
            }
        };

        Ok(MaterializedConfig {
            path: None,
            document: Value::Object(document),
            topic,
            sensor_ports,
            trap_port,
            _leases: leases,
        })
    }

    /// Build the final document and write it to a fresh file.
    pub fn materialize(&self, fragment: &Value) -> Result<MaterializedConfig> {
        let mut config = self.build(fragment)?;
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            HarnessError::io(format!("creating config dir {}", self.dir.display()), e)
        })?;

        let mut file = tempfile::Builder::new()
            .prefix("monitor_config_")
            .suffix(".json")
            .tempfile_in(&self.dir)
            .map_err(|e| HarnessError::io("creating config file", e))?;
        serde_json::to_writer(file.as_file_mut(), &config.document)
            .map_err(|e| HarnessError::json("writing config file", e))?;
        let (_, path) = file
            .keep()
            .map_err(|e| HarnessError::io("persisting config file", e.error))?;

        debug!(path = %path.display(), topic = config.topic(), "config materialized");
        config.path = Some(path);
        Ok(config)
    }
}

/// Split `host[:port]`. A trailing port must parse.
fn split_endpoint(endpoint: &str, what: &str) -> Result<(String, Option<u16>)> {
    match endpoint.rsplit_once(':') {
        None => Ok((endpoint.to_string(), None)),
        Some((host, port)) => port
            .parse::<u16>()
            .map(|port| (host.to_string(), Some(port)))
            .map_err(|_| HarnessError::config(format!("{what} '{endpoint}' has an invalid port"))),
    }
}

/// Fill in `host:port` for an endpoint field, allocating the port if needed.
fn complete_endpoint(
    object: &mut Map<String, Value>,
    key: &str,
    default_host: &str,
    what: &str,
    leases: &mut Vec<PortLease>,
) -> Result<u16> {
    let host = match object.get(key) {
        None => default_host.to_string(),
        Some(Value::String(endpoint)) => match split_endpoint(endpoint, what)? {
            (_, Some(port)) => return Ok(port),
            (host, None) => host,
        },
        Some(_) => return Err(HarnessError::config(format!("{what} must be a string"))),
    };
    let lease = allocate_port(Protocol::Udp)?;
    let port = lease.port();
    leases.push(lease);
    object.insert(key.to_string(), Value::from(format!("{host}:{port}")));
    Ok(port)
}

fn complete_trap_listener(
    traps: &mut Map<String, Value>,
    leases: &mut Vec<PortLease>,
) -> Result<u16> {
    complete_endpoint(
        traps,
        "server_name",
        TRAP_HOST,
        "conf.snmp_traps.server_name",
        leases,
    )
}

fn complete_sensor(index: usize, sensor: &mut Value, leases: &mut Vec<PortLease>) -> Result<u16> {
    let Value::Object(sensor) = sensor else {
        return Err(HarnessError::config(format!("sensor #{index} must be a JSON object")));
    };
    let what = format!("sensor #{index} sensor_ip");
    let port = complete_endpoint(sensor, "sensor_ip", SENSOR_HOST, &what, leases)?;

    let Some(Value::Array(monitors)) = sensor.get_mut("monitors") else {
        return Err(HarnessError::config(format!(
            "sensor #{index} has no 'monitors' array"
        )));
    };
    for (monitor_index, monitor) in monitors.iter_mut().enumerate() {
        if let Some(oid) = monitor.get_mut("oid") {
            let normalized = normalize_oid(oid).map_err(|reason| {
                HarnessError::config(format!(
                    "sensor #{index} monitor #{monitor_index}: {reason}"
                ))
            })?;
            *oid = Value::from(normalized.to_string());
        }
    }
    Ok(port)
}

/// Parse a monitor OID written as an arc array or a dotted string and move
/// it under the responder namespace.
fn normalize_oid(oid: &Value) -> std::result::Result<Oid, String> {
    let arcs: Vec<u32> = match oid {
        Value::Array(arcs) => arcs
            .iter()
            .map(|arc| {
                arc.as_u64()
                    .and_then(|arc| u32::try_from(arc).ok())
                    .ok_or_else(|| format!("invalid OID arc {arc}"))
            })
            .collect::<std::result::Result<_, _>>()?,
        Value::String(dotted) => dotted
            .parse::<Oid>()
            .map_err(|e| e.to_string())?
            .arcs()
            .to_vec(),
        other => return Err(format!("invalid OID {other}")),
    };
    if arcs.is_empty() {
        return Err("empty OID".to_string());
    }
    Ok(namespaced(&arcs))
}
