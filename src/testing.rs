//! In-memory switch database used by unit tests
//!
//! Implements [`CommandRunner`] by interpreting the ovs-vsctl argument
//! vectors the adapters build, against a small in-process model of the
//! switch database. Error texts mirror the real tool's wording because the
//! introspection helpers pattern-match on them. Northbound/southbound
//! commands are recorded and acknowledged without interpretation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cmd::{CommandRunner, Invocation};
use crate::error::{Error, Result};

#[derive(Default)]
struct BridgeRecord {
    ports: Vec<String>,
    other_config: HashMap<String, String>,
    stp_enable: bool,
}

#[derive(Default)]
struct SwitchState {
    external_ids: HashMap<String, String>,
    other_config: HashMap<String, String>,
    bridges: BTreeMap<String, BridgeRecord>,
    ports: HashMap<String, HashMap<String, String>>,
    interfaces: HashMap<String, HashMap<String, String>>,
}

pub(crate) struct FakeSwitch {
    state: Mutex<SwitchState>,
    calls: Mutex<Vec<(String, Vec<String>, usize)>>,
}

impl FakeSwitch {
    pub(crate) fn new() -> FakeSwitch {
        FakeSwitch {
            state: Mutex::new(SwitchState::default()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn call(&self, index: usize) -> (String, Vec<String>) {
        let calls = self.calls.lock().unwrap();
        (calls[index].0.clone(), calls[index].1.clone())
    }

    pub(crate) fn staged_file_count(&self, index: usize) -> usize {
        self.calls.lock().unwrap()[index].2
    }

    pub(crate) fn set_root_external_id(&self, key: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .external_ids
            .insert(key.to_string(), value.to_string());
    }

    pub(crate) fn root_external_id(&self, key: &str) -> Option<String> {
        self.state.lock().unwrap().external_ids.get(key).cloned()
    }

    pub(crate) fn set_root_other_config(&self, key: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .other_config
            .insert(key.to_string(), value.to_string());
    }

    pub(crate) fn add_bridge(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.bridges.insert(name.to_string(), BridgeRecord::default());
        state.ports.insert(name.to_string(), HashMap::new());
    }

    pub(crate) fn bridge_other_config(&self, bridge: &str, key: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .bridges
            .get(bridge)
            .and_then(|record| record.other_config.get(key).cloned())
    }

    pub(crate) fn set_bridge_other_config(&self, bridge: &str, key: &str, value: &str) {
        if let Some(record) = self.state.lock().unwrap().bridges.get_mut(bridge) {
            record.other_config.insert(key.to_string(), value.to_string());
        }
    }

    pub(crate) fn set_bridge_stp_enable(&self, bridge: &str, enabled: bool) {
        if let Some(record) = self.state.lock().unwrap().bridges.get_mut(bridge) {
            record.stp_enable = enabled;
        }
    }

    pub(crate) fn interfaces_with_iface_id(&self, iface_id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state
            .interfaces
            .iter()
            .filter(|(_, ids)| ids.get("iface-id").map(String::as_str) == Some(iface_id))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn fail(message: String) -> Error {
        Error::Command {
            program: "ovs-vsctl".to_string(),
            stderr: format!("ovs-vsctl: {message}"),
        }
    }

    fn exec(&self, args: &[String]) -> Result<String> {
        // Connection prefix: --timeout=<n> --db <addr>
        let rest: Vec<&str> = args.iter().skip(3).map(String::as_str).collect();

        let mut output = String::new();
        for segment in rest.split(|arg| *arg == "--") {
            if segment.is_empty() {
                continue;
            }

            output.push_str(&self.exec_one(segment)?);
        }

        Ok(output)
    }

    fn exec_one(&self, args: &[&str]) -> Result<String> {
        let mut flags = Vec::new();
        let mut i = 0;
        while i < args.len() && args[i].starts_with("--") {
            flags.push(args[i]);
            i += 1;
        }

        let verb = args[i];
        let args = &args[i + 1..];
        let mut state = self.state.lock().unwrap();

        match verb {
            "add-br" => {
                let name = args[0];
                if state.bridges.contains_key(name) {
                    if flags.contains(&"--may-exist") {
                        return Ok(String::new());
                    }

                    return Err(Self::fail(format!(
                        "cannot create a bridge named {name} because a bridge named {name} already exists"
                    )));
                }

                state.bridges.insert(name.to_string(), BridgeRecord::default());
                state.ports.insert(name.to_string(), HashMap::new());
                Ok(String::new())
            }
            "del-br" => {
                let name = args[0];
                let record = state
                    .bridges
                    .remove(name)
                    .ok_or_else(|| Self::fail(format!("no bridge named {name}")))?;

                state.ports.remove(name);
                for port in record.ports {
                    state.ports.remove(&port);
                    state.interfaces.remove(&port);
                }

                Ok(String::new())
            }
            "add-port" => {
                let (bridge, port) = (args[0], args[1]);
                if !state.bridges.contains_key(bridge) {
                    return Err(Self::fail(format!("no bridge named {bridge}")));
                }

                let attached = state.bridges.values().any(|b| b.ports.iter().any(|p| p == port));
                if attached {
                    if flags.contains(&"--may-exist") {
                        return Ok(String::new());
                    }

                    return Err(Self::fail(format!(
                        "cannot create a port named {port} because a port named {port} already exists on bridge {bridge}"
                    )));
                }

                state
                    .bridges
                    .get_mut(bridge)
                    .unwrap()
                    .ports
                    .push(port.to_string());
                state.ports.insert(port.to_string(), HashMap::new());
                state.interfaces.insert(port.to_string(), HashMap::new());
                Ok(String::new())
            }
            "del-port" => {
                // Either "del-port <bridge> <port>" or "del-port <port>".
                let port = if args.len() > 1 { args[1] } else { args[0] };

                let owner = state
                    .bridges
                    .iter()
                    .find(|(_, b)| b.ports.iter().any(|p| p == port))
                    .map(|(name, _)| name.clone());

                match owner {
                    Some(bridge) => {
                        let record = state.bridges.get_mut(&bridge).unwrap();
                        record.ports.retain(|p| p != port);
                        state.ports.remove(port);
                        state.interfaces.remove(port);
                        Ok(String::new())
                    }
                    None if flags.contains(&"--if-exists") => Ok(String::new()),
                    None => Err(Self::fail(format!("no port named {port}"))),
                }
            }
            "list-ports" => {
                let bridge = args[0];
                let record = state
                    .bridges
                    .get(bridge)
                    .ok_or_else(|| Self::fail(format!("no bridge named {bridge}")))?;

                let mut output = record.ports.join("\n");
                if !output.is_empty() {
                    output.push('\n');
                }

                Ok(output)
            }
            "find" => {
                let table = args[0];
                let (lhs, value) = split_assignment(args[1]);
                let map_key = lhs
                    .split_once(':')
                    .filter(|(column, _)| normalize(column) == "external_ids")
                    .map(|(_, key)| key.to_string());

                let mut names: Vec<String> = match (table, lhs.as_str(), map_key) {
                    ("bridge", "name", None) => state
                        .bridges
                        .keys()
                        .filter(|name| **name == value)
                        .cloned()
                        .collect(),
                    ("interface", _, Some(key)) => state
                        .interfaces
                        .iter()
                        .filter(|(_, ids)| ids.get(&key) == Some(&value))
                        .map(|(name, _)| name.clone())
                        .collect(),
                    _ => Vec::new(),
                };
                names.sort();

                let mut output = names.join("\n");
                if !output.is_empty() {
                    output.push('\n');
                }

                Ok(output)
            }
            "get" => {
                let (table, record) = (args[0], args[1]);
                let mut output = String::new();

                for column in args[2..].iter().copied() {
                    output.push_str(&Self::get_column(&state, table, record, column)?);
                }

                Ok(output)
            }
            "set" => {
                let (table, record) = (args[0], args[1]);

                for assignment in args[2..].iter().copied() {
                    Self::set_column(&mut state, table, record, assignment)?;
                }

                Ok(String::new())
            }
            "remove" => {
                // remove open_vswitch . external-ids <key>
                let (table, column, key) = (args[0], args[2], args[3]);
                if table == "open_vswitch" && normalize(column) == "external_ids" {
                    state.external_ids.remove(key);
                }

                Ok(String::new())
            }
            other => Err(Self::fail(format!("unknown command '{other}'"))),
        }
    }

    fn get_column(state: &SwitchState, table: &str, record: &str, column: &str) -> Result<String> {
        let (column, key) = match column.split_once(':') {
            Some((column, key)) => (normalize(column), Some(key)),
            None => (normalize(column), None),
        };

        match table {
            "open_vswitch" => {
                let key = key.expect("map column requires a key");
                let map = match column.as_str() {
                    "external_ids" => &state.external_ids,
                    _ => &state.other_config,
                };

                match map.get(key) {
                    Some(value) => Ok(format!("\"{value}\"\n")),
                    None => Err(Self::fail(format!(
                        r#"no key "{key}" in Open_vSwitch record "." column {column}"#
                    ))),
                }
            }
            "bridge" => {
                let bridge = state
                    .bridges
                    .get(record)
                    .ok_or_else(|| Self::fail(format!(r#"no row "{record}" in table Bridge"#)))?;

                match (column.as_str(), key) {
                    ("stp_enable", None) => Ok(format!("{}\n", bridge.stp_enable)),
                    ("other_config", Some(key)) => match bridge.other_config.get(key) {
                        Some(value) => Ok(format!("\"{value}\"\n")),
                        None => Err(Self::fail(format!(
                            r#"no key "{key}" in Bridge record "{record}" column other_config"#
                        ))),
                    },
                    _ => Err(Self::fail(format!(
                        "Bridge does not contain a column whose name matches \"{column}\""
                    ))),
                }
            }
            "port" => {
                let port = state
                    .ports
                    .get(record)
                    .ok_or_else(|| Self::fail(format!(r#"no row "{record}" in table Port"#)))?;

                match port.get(column.as_str()) {
                    Some(value) => Ok(format!("{value}\n")),
                    None => Ok("[]\n".to_string()),
                }
            }
            other => Err(Self::fail(format!("unknown table '{other}'"))),
        }
    }

    fn set_column(state: &mut SwitchState, table: &str, record: &str, assignment: &str) -> Result<()> {
        let (column, value) = split_assignment(assignment);

        match table {
            "open_vswitch" => {
                let (column, key) = column
                    .split_once(':')
                    .map(|(c, k)| (normalize(c), k.to_string()))
                    .expect("map column requires a key");

                let map = match column.as_str() {
                    "external_ids" => &mut state.external_ids,
                    _ => &mut state.other_config,
                };

                map.insert(key, value);
                Ok(())
            }
            "bridge" => {
                let bridge = state
                    .bridges
                    .get_mut(record)
                    .ok_or_else(|| Self::fail(format!(r#"no row "{record}" in table Bridge"#)))?;

                match column.split_once(':') {
                    Some((map_column, key)) if normalize(map_column) == "other_config" => {
                        bridge.other_config.insert(key.to_string(), value);
                    }
                    None if column == "stp_enable" => {
                        bridge.stp_enable = value == "true";
                    }
                    _ => {}
                }

                Ok(())
            }
            "int" | "interface" => {
                let interface = state.interfaces.entry(record.to_string()).or_default();
                if let Some((map_column, key)) = column.split_once(':') {
                    if normalize(map_column) == "external_ids" {
                        interface.insert(key.to_string(), value);
                    }
                }

                Ok(())
            }
            "port" => {
                let port = state
                    .ports
                    .get_mut(record)
                    .ok_or_else(|| Self::fail(format!(r#"no row "{record}" in table Port"#)))?;

                port.insert(normalize(&column), value);
                Ok(())
            }
            other => Err(Self::fail(format!("unknown table '{other}'"))),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeSwitch {
    async fn run(&self, invocation: Invocation) -> Result<String> {
        self.calls.lock().unwrap().push((
            invocation.program.clone(),
            invocation.args.clone(),
            invocation.files.len(),
        ));

        if invocation.program != "ovs-vsctl" {
            return Ok(String::new());
        }

        self.exec(&invocation.args)
    }
}

/// Splits "column:key=value" / "column=value" at the first '=', stripping
/// one layer of quoting from the value.
fn split_assignment(assignment: &str) -> (String, String) {
    match assignment.split_once('=') {
        Some((lhs, rhs)) => {
            let value = rhs
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(rhs);
            (lhs.to_string(), value.to_string())
        }
        None => (assignment.to_string(), String::new()),
    }
}

fn normalize(column: &str) -> String {
    column.replace('-', "_")
}
