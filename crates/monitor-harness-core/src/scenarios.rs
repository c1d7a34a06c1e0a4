//! Built-in scenarios for the monitoring agent.
//!
//! Each builder returns every variant of its parameter matrix as a separate
//! scenario.

use serde_json::{Value, json};

use crate::responder::ResponderMap;
use crate::scenario::{Scenario, Step};
use crate::snmp::{GenericTrap, Oid, SnmpValue, TrapSpec};
use crate::verifier::ExpectedMessage;

/// Names accepted by [`builtin`].
pub const BUILTIN_NAMES: &[&str] = &[
    "basic",
    "math_ops",
    "split",
    "split_op_blanks",
    "traps",
    "malformed_v2_traps",
];

/// All variants of the named built-in scenario.
pub fn builtin(name: &str) -> Option<Vec<Scenario>> {
    Some(match name {
        "basic" => basic(),
        "math_ops" => math_ops(),
        "split" => split(),
        "split_op_blanks" => vec![split_op_blanks()],
        "traps" => traps(),
        "malformed_v2_traps" => vec![malformed_v2_traps()],
        _ => return None,
    })
}

const SENSOR_ID: i64 = 1;
const SENSOR_NAME: &str = "sensor-test-01";

fn value(v: f64) -> String {
    format!("{v:.6}")
}

fn sensor_message(kind: &str, monitor: &str) -> ExpectedMessage {
    ExpectedMessage::new()
        .field("type", kind)
        .field("sensor_id", SENSOR_ID)
        .field("sensor_name", SENSOR_NAME)
        .field("monitor", monitor)
}

/// Source of the basic scenario's monitor values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicSource {
    Snmp,
    System,
}

/// Monitors `monitor_0..monitor_6` returning their index, each encoded as a
/// different SNMP type; `monitor_5` has no unit and `monitor_6` returns an
/// empty value and must not be reported.
pub fn basic_scenario(source: BasicSource) -> Scenario {
    let snmp_values: [fn(usize) -> SnmpValue; 7] = [
        |i| SnmpValue::Integer(i as i64),
        |i| SnmpValue::Integer32(i as i32),
        |i| SnmpValue::OctetString(i.to_string()),
        |i| SnmpValue::Gauge32(i as u32),
        |i| SnmpValue::Unsigned32(i as u32),
        |i| SnmpValue::OctetString(i.to_string()),
        |_| SnmpValue::OctetString(String::new()),
    ];
    let n_monitors = snmp_values.len();
    let no_unit = n_monitors - 2;

    let monitors: Vec<Value> = (0..n_monitors)
        .map(|i| {
            let mut monitor = json!({"name": format!("monitor_{i}"), "integer": 1, "unit": "%"});
            match source {
                BasicSource::Snmp => monitor["oid"] = json!([0, i]),
                BasicSource::System => {
                    let arg = if i == n_monitors - 1 {
                        "-n".to_string()
                    } else {
                        i.to_string()
                    };
                    monitor["system"] = json!(format!("echo {arg}"));
                }
            }
            if i == no_unit
                && let Some(monitor) = monitor.as_object_mut()
            {
                monitor.remove("unit");
            }
            monitor
        })
        .collect();

    let (kind, name) = match source {
        BasicSource::Snmp => ("snmp", "basic/snmp"),
        BasicSource::System => ("system", "basic/system"),
    };
    let messages = (0..n_monitors - 1)
        .map(|i| {
            let message = sensor_message(kind, &format!("monitor_{i}")).field("value", value(i as f64));
            if i == no_unit {
                message.absent("unit")
            } else {
                message.field("unit", "%")
            }
        })
        .collect();

    let config = json!({"sensors": [{
        "sensor_id": SENSOR_ID,
        "timeout": 100_000_000,
        "sensor_name": SENSOR_NAME,
        "community": "public",
        "monitors": monitors,
    }]});
    let mut scenario = Scenario::new(name, config).with_step(Step::expect(messages));
    if source == BasicSource::Snmp {
        let responses = snmp_values
            .iter()
            .enumerate()
            .fold(ResponderMap::new(), |map, (i, make)| {
                map.with(&[0, i as u32], make(i))
            });
        scenario = scenario.with_responses(responses);
    }
    scenario
}

pub fn basic() -> Vec<Scenario> {
    vec![
        basic_scenario(BasicSource::Snmp),
        basic_scenario(BasicSource::System),
    ]
}

/// Arithmetic over `var_n0 = 3` and `var_n1 = 5`, polled over SNMP.
///
/// Invalid or zero-valued expressions produce no message.
pub fn math_ops_scenario(send_base_vars: bool) -> Scenario {
    let (n0, n1) = (3.0_f64, 5.0_f64);
    let valid: [(&str, f64); 7] = [
        ("var_n0+var_n1", n0 + n1),
        ("var_n0-var_n1", n0 - n1),
        ("var_n0*var_n1", n0 * n1),
        ("var_n0/var_n1", n0 / n1),
        ("var_n0^var_n1", n0.powf(n1)),
        ("100*var_n1", 100.0 * n1),
        ("-var_n1", -n1),
    ];
    let invalid = ["0*var_n1", "var_n1/0", "log(0)", "sqrt(-1)", "2*unknown_variable"];

    let mut monitors = vec![
        json!({"send": send_base_vars, "name": "var_n0", "oid": [1, 0]}),
        json!({"send": send_base_vars, "name": "var_n1", "oid": [1, 1]}),
    ];
    monitors.extend(
        valid
            .iter()
            .map(|(op, _)| *op)
            .chain(invalid)
            .map(|op| json!({"send": true, "name": format!("op_{op}"), "op": op})),
    );

    let mut messages = Vec::new();
    if send_base_vars {
        messages.push(sensor_message("snmp", "var_n0").field("value", value(n0)));
        messages.push(sensor_message("snmp", "var_n1").field("value", value(n1)));
    }
    messages.extend(
        valid
            .iter()
            .map(|(op, result)| sensor_message("op", &format!("op_{op}")).field("value", value(*result))),
    );

    let config = json!({"sensors": [{
        "sensor_id": SENSOR_ID,
        "sensor_name": SENSOR_NAME,
        "timeout": 100_000_000,
        "community": "public",
        "monitors": monitors,
    }]});
    Scenario::new(format!("math_ops/send_base_vars={send_base_vars}"), config)
        .with_responses(
            ResponderMap::new()
                .with(&[1, 0], SnmpValue::OctetString("3".into()))
                .with(&[1, 1], SnmpValue::OctetString("5".into())),
        )
        .with_step(Step::expect(messages))
}

pub fn math_ops() -> Vec<Scenario> {
    vec![math_ops_scenario(false), math_ops_scenario(true)]
}

/// Options of one split scenario variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitOptions<'a> {
    pub name_split_suffix: Option<&'a str>,
    pub instance_prefix: Option<&'a str>,
    pub split_op: Option<&'a str>,
}

/// Two `;`-separated arrays reported per instance, plus a `sum`/`mean`
/// aggregate when a valid split operation is configured.
pub fn split_scenario(options: SplitOptions<'_>) -> Scenario {
    let arrays: [[i64; 4]; 2] = [[3, 2, 1, 0], [4, 5, 6, 7]];

    let monitors: Vec<Value> = arrays
        .iter()
        .enumerate()
        .map(|(monitor_i, array)| {
            let joined = array.iter().map(i64::to_string).collect::<Vec<_>>().join(";");
            let mut monitor = json!({
                "name": format!("array_{monitor_i}"),
                "system": format!("echo -n '{joined}'"),
                "split": ";",
            });
            for (key, option) in [
                ("name_split_suffix", options.name_split_suffix),
                ("instance_prefix", options.instance_prefix),
                ("split_op", options.split_op),
            ] {
                if let Some(option) = option {
                    monitor[key] = json!(option);
                }
            }
            monitor
        })
        .collect();

    let mut messages = Vec::new();
    for (monitor_i, array) in arrays.iter().enumerate() {
        let per_instance = format!(
            "array_{monitor_i}{}",
            options.name_split_suffix.unwrap_or_default()
        );
        for (value_i, v) in array.iter().enumerate() {
            messages.push(
                sensor_message("system", &per_instance)
                    .field("value", value(*v as f64))
                    .field_opt(
                        "instance",
                        options.instance_prefix.map(|prefix| format!("{prefix}{value_i}")),
                    ),
            );
        }
        let sum: i64 = array.iter().sum();
        let aggregate = match options.split_op {
            Some("sum") => Some(sum as f64),
            Some("mean") => Some(sum as f64 / array.len() as f64),
            _ => None,
        };
        if let Some(aggregate) = aggregate {
            messages.push(
                sensor_message("system", &format!("array_{monitor_i}"))
                    .absent("instance")
                    .field("value", value(aggregate)),
            );
        }
    }

    let name = format!(
        "split/suffix={},prefix={},op={}",
        options.name_split_suffix.unwrap_or("none"),
        options.instance_prefix.unwrap_or("none"),
        options.split_op.unwrap_or("none"),
    );
    let config = json!({"sensors": [{
        "sensor_id": SENSOR_ID,
        "sensor_name": SENSOR_NAME,
        "timeout": 100_000_000,
        "community": "public",
        "monitors": monitors,
    }]});
    Scenario::new(name, config).with_step(Step::expect(messages))
}

pub fn split() -> Vec<Scenario> {
    let mut scenarios = Vec::new();
    for name_split_suffix in [None, Some("_per_instance")] {
        for instance_prefix in [None, Some("load-instance-")] {
            for split_op in [None, Some("invalid"), Some("sum"), Some("mean")] {
                scenarios.push(split_scenario(SplitOptions {
                    name_split_suffix,
                    instance_prefix,
                    split_op,
                }));
            }
        }
    }
    scenarios
}

/// Operations over split arrays with holes: holes are skipped both per
/// instance and in the aggregate.
pub fn split_op_blanks() -> Scenario {
    let sensor_name = "sensor-arriba";
    let source = |name: &str, echo: &str, op: &str| {
        json!({
            "name": name, "system": format!("echo '{echo}'"),
            "name_split_suffix": "_per_instance", "split": ";", "split_op": op,
            "instance_prefix": "load-", "send": 0, "unit": "%",
        })
    };
    let operation = |name: &str, op: &str| {
        json!({
            "name": name, "op": op,
            "name_split_suffix": "_per_instance", "split": ";", "split_op": "mean",
            "instance_prefix": "load-instance-", "unit": "%",
        })
    };
    let config = json!({"sensors": [{
        "sensor_id": SENSOR_ID,
        "timeout": 2,
        "sensor_name": sensor_name,
        "sensor_ip": "localhost",
        "community": "public",
        "monitors": [
            source("load_1", ";2;1;0", "sum"),
            source("load_5", ";6;8;10", "mean"),
            operation("load_1+5", "load_1+load_5"),
            source("v1", ";12;11;10", "sum"),
            source("v2", "14;16;;10", "mean"),
            operation("v1+v2", "v1+v2"),
        ],
    }]});

    let op_message = |monitor: &str, v: &str| {
        ExpectedMessage::new()
            .field("sensor_id", SENSOR_ID)
            .field("sensor_name", sensor_name)
            .field("monitor", monitor)
            .field("value", v)
            .field("type", "op")
            .field("unit", "%")
    };
    let mut messages = Vec::new();
    for (instance, v) in [(1, "8.000000"), (2, "9.000000"), (3, "10.000000")] {
        messages.push(
            op_message("load_1+5_per_instance", v).field("instance", format!("load-instance-{instance}")),
        );
    }
    messages.push(op_message("load_1+5", "9.000000"));
    for (instance, v) in [(0, "14.000000"), (1, "28.000000"), (2, "11.000000"), (3, "20.000000")] {
        messages.push(
            op_message("v1+v2_per_instance", v).field("instance", format!("load-instance-{instance}")),
        );
    }
    messages.push(op_message("v1+v2", "18.250000"));

    Scenario::new("split_op_blanks", config).with_step(Step::expect(messages))
}

const IF_INDEX_1: [u32; 11] = [1, 3, 6, 1, 2, 1, 2, 2, 1, 1, 1];
const IF_DESCR_1: [u32; 11] = [1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 1];

fn trap_config() -> Value {
    json!({"conf": {"snmp_traps": {}}})
}

/// Trap variants: v1 with no enterprise, v1 with two enterprise OIDs, and
/// v2c. Each sends coldStart, linkUp with `ifIndex.1`, and linkUp with
/// `ifIndex.1` plus `ifDescr.1`.
pub fn traps() -> Vec<Scenario> {
    let enterprises: [Option<&[u32]>; 3] = [
        None,
        Some(&[1, 3, 6, 1, 1, 2, 3, 4, 1]),
        Some(&[1, 3, 6, 1, 1, 2, 3, 4, 1, 0]),
    ];
    let mut scenarios: Vec<Scenario> = enterprises
        .iter()
        .map(|enterprise| {
            let enterprise = enterprise.map(|arcs| Oid::new(arcs.to_vec()));
            trap_scenario(TrapSpec::v1, enterprise)
        })
        .collect();
    scenarios.push(trap_scenario(TrapSpec::v2c, None));
    scenarios
}

fn trap_scenario(make: fn(GenericTrap) -> TrapSpec, enterprise: Option<Oid>) -> Scenario {
    let build = |generic: GenericTrap| {
        let spec = make(generic);
        match &enterprise {
            Some(oid) => spec.with_enterprise(oid.clone()),
            None => spec,
        }
    };
    let monitor = |generic: GenericTrap| match &enterprise {
        Some(_) => "SNMPv2-SMI::directory.2.3.4.1.0.0".to_string(),
        None => generic.mib_name().unwrap_or_default().to_string(),
    };
    let message = |generic: GenericTrap| {
        ExpectedMessage::new()
            .field("monitor", monitor(generic))
            .field("value", "1.000000")
    };

    let if_index = Oid::new(IF_INDEX_1.to_vec());
    let if_descr = Oid::new(IF_DESCR_1.to_vec());
    let steps = vec![
        Step::trap(build(GenericTrap::ColdStart), vec![message(GenericTrap::ColdStart)]),
        Step::trap(
            build(GenericTrap::LinkUp).with_var_bind(if_index.clone(), SnmpValue::Null),
            vec![message(GenericTrap::LinkUp).field("if_index", "1")],
        ),
        Step::trap(
            build(GenericTrap::LinkUp)
                .with_var_bind(if_index, SnmpValue::Null)
                .with_var_bind(if_descr, SnmpValue::OctetString("My interface".into())),
            vec![
                message(GenericTrap::LinkUp)
                    .field("if_index", "1")
                    .field("IF-MIB::ifDescr.1", "My interface"),
            ],
        ),
    ];

    let version = match make(GenericTrap::ColdStart).version {
        crate::snmp::SnmpVersion::V1 => "v1",
        crate::snmp::SnmpVersion::V2c => "v2c",
    };
    let name = match &enterprise {
        Some(oid) => format!("traps/{version}/enterprise={oid}"),
        None => format!("traps/{version}"),
    };
    let mut scenario = Scenario::new(name, trap_config());
    scenario.steps = steps;
    scenario
}

/// v2c traps missing `sysUpTime.0` and/or `snmpTrapOID.0`. Only the trap
/// that still carries its OID (the coldStart default) is reported.
pub fn malformed_v2_traps() -> Scenario {
    let cold_start = || {
        ExpectedMessage::new()
            .field("monitor", "SNMPv2-MIB::coldStart")
            .field("value", "1.000000")
    };
    let mut scenario = Scenario::new("malformed_v2_traps", trap_config());
    for (uptime, trap_oid) in [(true, false), (false, true), (false, false)] {
        let mut trap = TrapSpec::v2c(GenericTrap::ColdStart);
        trap.include_uptime = uptime;
        trap.include_trap_oid = trap_oid;
        let messages = if trap_oid { vec![cold_start()] } else { Vec::new() };
        scenario = scenario.with_step(Step::trap(trap, messages));
    }
    scenario
}
