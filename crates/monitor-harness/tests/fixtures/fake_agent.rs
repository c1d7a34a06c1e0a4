//! fake-agent - stand-in monitoring agent for the integration tests
//!
//! Reads the agent config given with `-c`, polls every SNMP or system
//! monitor once, evaluates `op` monitors over the polled values, announces
//! its trap listener with the agent's log line and turns received traps into
//! records. Records are appended as JSON lines to
//! `<bus-dir>/<kafka_topic>.jsonl` instead of being produced to Kafka.

mod expr;

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use monitor_harness_core::snmp::{Oid, SnmpVersion, decode_get_response, decode_trap, encode_get_request};
use monitor_harness_core::snmp::{GenericTrap, TrapNotification};
use serde_json::{Map, Value, json};
use tokio::net::UdpSocket;

use crate::expr::Expr;

const POLL_TIMEOUT: Duration = Duration::from_secs(1);
const SNMPV2_SMI_DIRECTORY: [u32; 5] = [1, 3, 6, 1, 1];
const IF_INDEX: [u32; 10] = [1, 3, 6, 1, 2, 1, 2, 2, 1, 1];
const IF_DESCR: [u32; 10] = [1, 3, 6, 1, 2, 1, 2, 2, 1, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Behave like the real agent.
    Normal,
    /// Exit with status 3 before announcing the trap listener.
    ExitEarly,
    /// Keep running after SIGINT.
    IgnoreSigint,
    /// Announce a trap listener port other than the configured one.
    WrongPort,
    /// Publish one record nobody asked for after polling.
    Extra,
}

#[derive(Parser, Debug)]
#[command(name = "fake-agent")]
struct Args {
    #[arg(long, value_enum, default_value_t = Mode::Normal)]
    mode: Mode,

    /// Directory standing in for the message bus
    #[arg(long)]
    bus_dir: PathBuf,

    /// Agent config file
    #[arg(short = 'c')]
    config: PathBuf,
}

struct Spool {
    path: PathBuf,
}

impl Spool {
    fn new(dir: &Path, topic: &str) -> Self {
        Self {
            path: dir.join(format!("{topic}.jsonl")),
        }
    }

    fn publish(&self, record: &Value) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        writeln!(file, "{record}")?;
        Ok(())
    }
}

fn log(level: u8, location: &str, message: &str) {
    println!(
        "{}|{level}|{location}|{message}",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("fake-agent: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let contents = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading {}", args.config.display()))?;
    let config: Value = serde_json::from_str(&contents)?;
    let conf = config.get("conf").cloned().unwrap_or_default();
    let Some(topic) = conf.get("kafka_topic").and_then(Value::as_str) else {
        bail!("config has no conf.kafka_topic");
    };
    let spool = Spool::new(&args.bus_dir, topic);
    log(6, "main.c:120", "Starting fake agent");

    if args.mode == Mode::ExitEarly {
        log(3, "main.c:131", "Giving up");
        std::process::exit(3);
    }

    let trap_socket = match conf.pointer("/snmp_traps/server_name").and_then(Value::as_str) {
        Some(server_name) => {
            let port = endpoint_port(server_name)?;
            let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, port)).await?;
            let announced = match args.mode {
                Mode::WrongPort => format!("127.0.0.1:{}", port.wrapping_add(1)),
                _ => server_name.to_string(),
            };
            log(6, "traps.c:518", &format!("Listening for traps on {announced}"));
            Some(socket)
        }
        None => None,
    };

    if let Some(sensors) = config.get("sensors").and_then(Value::as_array) {
        for sensor in sensors {
            poll_sensor(sensor, &spool).await?;
        }
    }
    if args.mode == Mode::Extra {
        spool.publish(&json!({"type": "extra", "monitor": "unexpected", "value": "1.000000"}))?;
    }

    let traps = async {
        match &trap_socket {
            Some(socket) => receive_traps(socket, &spool).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        result = traps => result,
        _ = shutdown(args.mode) => {
            log(6, "main.c:200", "Shutting down");
            Ok(())
        }
    }
}

async fn shutdown(mode: Mode) {
    loop {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        if mode != Mode::IgnoreSigint {
            return;
        }
        log(4, "main.c:190", "Ignoring interrupt");
    }
}

fn endpoint_port(endpoint: &str) -> Result<u16> {
    let Some((_, port)) = endpoint.rsplit_once(':') else {
        bail!("endpoint '{endpoint}' has no port");
    };
    Ok(port.parse()?)
}

fn base_record(kind: &str, sensor: &Value, monitor: &Map<String, Value>) -> Map<String, Value> {
    let mut record = Map::new();
    record.insert("type".into(), json!(kind));
    for key in ["sensor_id", "sensor_name"] {
        if let Some(value) = sensor.get(key) {
            record.insert(key.into(), value.clone());
        }
    }
    record.insert(
        "monitor".into(),
        monitor.get("name").cloned().unwrap_or_default(),
    );
    if let Some(unit) = monitor.get("unit") {
        record.insert("unit".into(), unit.clone());
    }
    record
}

fn sends(monitor: &Map<String, Value>) -> bool {
    match monitor.get("send") {
        Some(Value::Bool(send)) => *send,
        Some(Value::Number(n)) => n.as_i64() != Some(0),
        _ => true,
    }
}

/// A polled or computed monitor value; split monitors keep one slot per
/// instance with `None` for holes.
#[derive(Debug, Clone)]
enum Reading {
    Scalar(f64),
    Instances(Vec<Option<f64>>),
}

fn format_value(value: f64) -> Value {
    json!(format!("{value:.6}"))
}

fn monitor_str<'a>(monitor: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    monitor.get(key).and_then(Value::as_str)
}

async fn poll_sensor(sensor: &Value, spool: &Spool) -> Result<()> {
    let community = sensor
        .get("community")
        .and_then(Value::as_str)
        .unwrap_or("public");
    let port = match sensor.get("sensor_ip").and_then(Value::as_str) {
        Some(endpoint) => endpoint_port(endpoint)?,
        None => bail!("sensor has no sensor_ip"),
    };
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    socket.connect((Ipv4Addr::LOCALHOST, port)).await?;

    let monitors = sensor
        .get("monitors")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut readings: HashMap<String, Reading> = HashMap::new();
    for (request_id, monitor) in monitors.iter().enumerate() {
        let Some(monitor) = monitor.as_object() else {
            continue;
        };
        let name = monitor_str(monitor, "name").unwrap_or_default().to_string();

        if let Some(expression) = monitor_str(monitor, "op") {
            let expr = match Expr::parse(expression) {
                Ok(expr) => expr,
                Err(e) => {
                    log(4, "op.c:57", &format!("Skipping op {name}: {e}"));
                    continue;
                }
            };
            let Some(reading) = evaluate(&expr, &readings) else {
                continue;
            };
            if sends(monitor) {
                publish_reading("op", sensor, monitor, &reading, spool)?;
            }
            readings.insert(name, reading);
            continue;
        }

        let (kind, raw) = if let Some(oid) = monitor_str(monitor, "oid") {
            ("snmp", get(&socket, community, request_id as i64, oid.parse()?).await)
        } else if let Some(command) = monitor_str(monitor, "system") {
            ("system", system(command).await)
        } else {
            continue;
        };
        let Some(raw) = raw else {
            continue;
        };
        let reading = match monitor_str(monitor, "split") {
            Some(separator) => Reading::Instances(
                raw.trim()
                    .split(separator)
                    .map(|v| v.trim().parse::<f64>().ok())
                    .collect(),
            ),
            None => match raw.trim().parse::<f64>() {
                Ok(value) => Reading::Scalar(value),
                Err(_) => continue,
            },
        };
        if sends(monitor) {
            publish_reading(kind, sensor, monitor, &reading, spool)?;
        }
        readings.insert(name, reading);
    }
    Ok(())
}

/// Evaluate an `op` over the readings so far.
///
/// Without split operands the result is a scalar, dropped when it is not
/// finite. With split operands the expression is applied per instance: an
/// instance where every split operand has a hole is skipped, otherwise a
/// hole counts as zero.
fn evaluate(expr: &Expr, readings: &HashMap<String, Reading>) -> Option<Reading> {
    let instances = expr
        .variables()
        .into_iter()
        .filter_map(|name| match readings.get(name) {
            Some(Reading::Instances(values)) => Some(values),
            _ => None,
        })
        .collect::<Vec<_>>();

    if instances.is_empty() {
        let value = expr.eval(&|name| match readings.get(name) {
            Some(Reading::Scalar(value)) => Some(*value),
            _ => None,
        })?;
        return value.is_finite().then_some(Reading::Scalar(value));
    }

    let len = instances.iter().map(|values| values.len()).max().unwrap_or_default();
    let values = (0..len)
        .map(|index| {
            let all_holes = instances
                .iter()
                .all(|values| values.get(index).copied().flatten().is_none());
            if all_holes {
                return None;
            }
            expr.eval(&|name| match readings.get(name)? {
                Reading::Scalar(value) => Some(*value),
                Reading::Instances(values) => Some(values.get(index).copied().flatten().unwrap_or(0.0)),
            })
            .filter(|value| value.is_finite())
        })
        .collect();
    Some(Reading::Instances(values))
}

/// `sum` or `mean` over the instances that hold a value.
fn aggregate(split_op: Option<&str>, values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        return None;
    }
    let sum: f64 = present.iter().sum();
    match split_op? {
        "sum" => Some(sum),
        "mean" => Some(sum / present.len() as f64),
        _ => None,
    }
}

/// Publish a reading; per-instance records come before the aggregate.
/// A zero `op` result is not published.
fn publish_reading(
    kind: &str,
    sensor: &Value,
    monitor: &Map<String, Value>,
    reading: &Reading,
    spool: &Spool,
) -> Result<()> {
    let publishable = |value: f64| kind != "op" || value != 0.0;
    let values = match reading {
        Reading::Scalar(value) => {
            if publishable(*value) {
                let mut record = base_record(kind, sensor, monitor);
                record.insert("value".into(), format_value(*value));
                spool.publish(&Value::Object(record))?;
            }
            return Ok(());
        }
        Reading::Instances(values) => values,
    };

    let name = monitor_str(monitor, "name").unwrap_or_default();
    let suffix = monitor_str(monitor, "name_split_suffix").unwrap_or_default();
    let prefix = monitor_str(monitor, "instance_prefix");
    for (index, value) in values.iter().enumerate() {
        let Some(value) = value.filter(|value| publishable(*value)) else {
            continue;
        };
        let mut record = base_record(kind, sensor, monitor);
        record.insert("monitor".into(), json!(format!("{name}{suffix}")));
        if let Some(prefix) = prefix {
            record.insert("instance".into(), json!(format!("{prefix}{index}")));
        }
        record.insert("value".into(), format_value(value));
        spool.publish(&Value::Object(record))?;
    }
    if let Some(total) = aggregate(monitor_str(monitor, "split_op"), values)
        && publishable(total)
    {
        let mut record = base_record(kind, sensor, monitor);
        record.insert("value".into(), format_value(total));
        spool.publish(&Value::Object(record))?;
    }
    Ok(())
}

async fn get(socket: &UdpSocket, community: &str, request_id: i64, oid: Oid) -> Option<String> {
    let request = encode_get_request(SnmpVersion::V2c, community, request_id, &[oid]).ok()?;
    socket.send(&request).await.ok()?;
    let mut buf = vec![0u8; 65_535];
    let len = tokio::time::timeout(POLL_TIMEOUT, socket.recv(&mut buf))
        .await
        .ok()?
        .ok()?;
    let (_, binds) = decode_get_response(&buf[..len]).ok()?;
    binds.first().map(|bind| bind.value.render())
}

async fn system(command: &str) -> Option<String> {
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .await
        .ok()?;
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn receive_traps(socket: &UdpSocket, spool: &Spool) -> Result<()> {
    let mut buf = vec![0u8; 65_535];
    loop {
        let (len, _) = socket.recv_from(&mut buf).await?;
        let Ok(trap) = decode_trap(&buf[..len]) else {
            log(4, "traps.c:301", "Dropping undecodable trap");
            continue;
        };
        match trap_record(&trap) {
            Some(record) => spool.publish(&record)?,
            None => log(4, "traps.c:340", "Dropping trap without snmpTrapOID"),
        }
    }
}

fn trap_record(trap: &TrapNotification) -> Option<Value> {
    let oid = trap.trap_oid.as_ref()?;
    let monitor = match GenericTrap::from_notification_oid(oid).and_then(GenericTrap::mib_name) {
        Some(name) => name.to_string(),
        None => match oid.arcs().strip_prefix(&SNMPV2_SMI_DIRECTORY[..]) {
            Some(rest) => format!(
                "SNMPv2-SMI::directory.{}",
                rest.iter().map(u32::to_string).collect::<Vec<_>>().join(".")
            ),
            None => oid.to_string(),
        },
    };

    let mut record = Map::new();
    record.insert("type".into(), json!("trap"));
    record.insert("monitor".into(), json!(monitor));
    record.insert("value".into(), json!("1.000000"));
    for bind in &trap.var_binds {
        if let Some([index]) = bind.oid.arcs().strip_prefix(&IF_INDEX[..]) {
            record.insert("if_index".into(), json!(index.to_string()));
        } else if let Some([index]) = bind.oid.arcs().strip_prefix(&IF_DESCR[..]) {
            record.insert(
                format!("IF-MIB::ifDescr.{index}"),
                json!(bind.value.render()),
            );
        } else {
            record.insert(bind.oid.to_string(), json!(bind.value.render()));
        }
    }
    Some(Value::Object(record))
}
