// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Administrative command dispatcher.
//!
//! Frames tagged administrative are read and answered by the port
//! itself rather than handed to the user. Commands are bottles whose
//! first element is a short vocab tag; replies are flat bottles, a
//! `(many, ...)` bottle rendered one element per line by text clients,
//! `(fail, message)` on errors, or `(ok)` for bare successes.
//!
//! The ROS 1 compatibility verbs (`publisherUpdate`, `requestTopic`,
//! `getPid`, `getBusInfo`) live behind the `ros` feature: they need an
//! xmlrpc-capable carrier for callbacks and a tcpros carrier for the
//! reverse subscriptions they create.

use super::core::{PortCore, PORT_IS_INPUT, PORT_IS_OUTPUT, PORT_IS_RPC};
use super::unit::{set_process_sched_params, set_thread_sched_params, thread_sched_params};
use crate::bottle::{vocab2, vocab3, vocab4, Bottle, Property, Value};
use crate::carrier::{dscp, CarrierRegistry, Frame};
use crate::name::Contact;
use crate::route::Route;
use std::io;
use std::sync::Arc;
use std::time::Duration;

const VOCAB_HELP: i32 = vocab4(b'h', b'e', b'l', b'p');
const VOCAB_VER: i32 = vocab3(b'v', b'e', b'r');
const VOCAB_ADD: i32 = vocab3(b'a', b'd', b'd');
const VOCAB_DEL: i32 = vocab3(b'd', b'e', b'l');
const VOCAB_LIST: i32 = vocab4(b'l', b'i', b's', b't');
const VOCAB_SET: i32 = vocab3(b's', b'e', b't');
const VOCAB_GET: i32 = vocab3(b'g', b'e', b't');
const VOCAB_PROP: i32 = vocab4(b'p', b'r', b'o', b'p');
const VOCAB_ATCH: i32 = vocab4(b'a', b't', b'c', b'h');
const VOCAB_DTCH: i32 = vocab4(b'd', b't', b'c', b'h');
const VOCAB_IN: i32 = vocab2(b'i', b'n');
const VOCAB_OUT: i32 = vocab3(b'o', b'u', b't');
const VOCAB_OK: i32 = vocab2(b'o', b'k');
const VOCAB_FAIL: i32 = vocab4(b'f', b'a', b'i', b'l');
const VOCAB_MANY: i32 = vocab4(b'm', b'a', b'n', b'y');

#[cfg(feature = "ros")]
const VOCAB_ROS_PUBLISHER_UPDATE: i32 = vocab4(b'r', b'p', b'u', b'p');
#[cfg(feature = "ros")]
const VOCAB_ROS_REQUEST_TOPIC: i32 = vocab4(b'r', b't', b'o', b'p');
#[cfg(feature = "ros")]
const VOCAB_ROS_PID: i32 = vocab3(b'p', b'i', b'd');
#[cfg(feature = "ros")]
const VOCAB_ROS_BUS: i32 = vocab3(b'b', b'u', b's');

/// Outcome of one dispatched command.
pub(crate) struct DispatchResult {
    pub reply: Bottle,
    /// The peer expects the connection to close after the reply (ROS
    /// convention).
    pub drop_connection: bool,
}

/// Execute one admin command against a port. `caller_index` is the
/// unit the command arrived on; wildcard removals spare it.
pub(crate) fn dispatch(port: &Arc<PortCore>, caller_index: i32, cmd: &Bottle) -> DispatchResult {
    let mut result = Bottle::new();
    let mut drop_connection = false;

    // ROS clients spell their verbs out as strings.
    #[cfg(feature = "ros")]
    let tag = match cmd.get(0).as_str() {
        "publisherUpdate" => VOCAB_ROS_PUBLISHER_UPDATE,
        "requestTopic" => VOCAB_ROS_REQUEST_TOPIC,
        "getPid" => VOCAB_ROS_PID,
        "getBusInfo" => VOCAB_ROS_BUS,
        _ => cmd.get(0).as_vocab(),
    };
    #[cfg(not(feature = "ros"))]
    let tag = cmd.get(0).as_vocab();

    match tag {
        VOCAB_HELP => help(&mut result),
        VOCAB_VER => {
            // Admin protocol version, distinct from the crate version.
            result.add_vocab(VOCAB_VER);
            result.add_int(1);
            result.add_int(2);
            result.add_int(3);
        }
        VOCAB_ADD => {
            let output = cmd.get(1).as_str().to_string();
            let carrier = cmd.get(2).as_str();
            let dest = if carrier.is_empty() {
                output
            } else {
                format!("{}:{}", carrier, output)
            };
            let mut cache = String::new();
            let ok = port.add_output_report(&dest, false, &mut cache);
            result.add_int(if ok { 0 } else { -1 });
            result.add_string(cache.trim_end());
        }
        VOCAB_DEL => {
            let target = cmd.get(1).as_str().to_string();
            let mut out_text = String::new();
            let out_found =
                port.remove_output_report(&target, &mut out_text, Some(caller_index));
            let mut in_text = String::new();
            let in_found =
                port.remove_input_report(&target, &mut in_text, Some(caller_index));
            result.add_int(if out_found || in_found { 0 } else { -1 });
            let message = if out_found && !in_found {
                out_text
            } else if in_found && !out_found {
                in_text
            } else {
                out_text + &in_text
            };
            result.add_string(message.trim_end());
        }
        VOCAB_LIST => list(port, cmd, &mut result),
        VOCAB_SET => set_params(port, cmd, &mut result),
        VOCAB_GET => get_params(port, cmd, &mut result),
        VOCAB_PROP => prop(port, cmd, &mut result),
        VOCAB_ATCH => attach(port, cmd, &mut result),
        VOCAB_DTCH => detach(port, cmd, &mut result),
        #[cfg(feature = "ros")]
        VOCAB_ROS_PUBLISHER_UPDATE => {
            ros::publisher_update(port, cmd, &mut result);
            drop_connection = true;
        }
        #[cfg(feature = "ros")]
        VOCAB_ROS_REQUEST_TOPIC => {
            ros::request_topic(port, &mut result);
            drop_connection = true;
        }
        #[cfg(feature = "ros")]
        VOCAB_ROS_PID => {
            result.add_int(1);
            result.add_string("");
            result.add_int(std::process::id() as i32);
            drop_connection = true;
        }
        #[cfg(feature = "ros")]
        VOCAB_ROS_BUS => {
            result.add_int(1);
            result.add_string("");
            result.add_list().add_list();
            drop_connection = true;
        }
        _ => match port.admin_fallback(cmd) {
            Some(reply) => result = reply,
            None => {
                result.add_vocab(VOCAB_FAIL);
                result.add_string("send [help] for list of valid commands");
            }
        },
    }

    DispatchResult {
        reply: result,
        drop_connection,
    }
}

fn help(result: &mut Bottle) {
    result.add_vocab(VOCAB_MANY);
    result.add_string("[help]                  # give this help");
    result.add_string("[ver]                   # report protocol version information");
    result.add_string("[add] $portname         # add an output connection");
    result.add_string("[add] $portname $car    # add an output with a given protocol");
    result.add_string("[del] $portname         # remove an input or output connection");
    result.add_string("[list] [in]             # list input connections");
    result.add_string("[list] [out]            # list output connections");
    result.add_string("[list] [in]  $portname  # give details for input");
    result.add_string("[list] [out] $portname  # give details for output");
    result.add_string("[prop] [get]            # get all user-defined port properties");
    result.add_string("[prop] [get] $prop      # get a user-defined port property (prop, val)");
    result.add_string("[prop] [set] $prop $val # set a user-defined port property (prop, val)");
    result.add_string("[prop] [get] $portname  # get Qos properties of a connection to/from a port");
    result.add_string("[prop] [set] $portname  # set Qos properties of a connection to/from a port");
    result.add_string("[prop] [get] $cur_port  # get information about current process (e.g., scheduling priority, pid)");
    result.add_string("[prop] [set] $cur_port  # set properties of the current process (e.g., scheduling priority, pid)");
    result.add_string("[atch] [out] $prop      # attach a portmonitor plug-in to the port's output");
    result.add_string("[atch] [in]  $prop      # attach a portmonitor plug-in to the port's input");
    result.add_string("[dtch] [out]            # detach portmonitor plug-in from the port's output");
    result.add_string("[dtch] [in]             # detach portmonitor plug-in from the port's input");
}

fn stanza(result: &mut Bottle, key: &str, value: &str) {
    let pair = result.add_list();
    pair.add_string(key);
    pair.add_string(value);
}

fn stanza_int(result: &mut Bottle, key: &str, value: i32) {
    let pair = result.add_list();
    pair.add_string(key);
    pair.add_int(value);
}

fn list(port: &Arc<PortCore>, cmd: &Bottle, result: &mut Bottle) {
    let want_input = cmd.get(1).as_vocab() == VOCAB_IN;
    let target = cmd.get(2).as_str().to_string();
    port.with_units(|units| {
        for unit in units.iter().flatten() {
            if unit.is_finished() || unit.is_input() != want_input {
                continue;
            }
            let route = unit.route();
            let peer = if want_input { &route.from } else { &route.to };
            if target.is_empty() {
                if !peer.is_empty() {
                    result.add_string(peer.clone());
                }
            } else if *peer == target {
                stanza(result, "from", &route.from);
                stanza(result, "to", &route.to);
                stanza(result, "carrier", &route.carrier);
                if let Some(carrier) = port.carriers().choose(&route.carrier) {
                    if carrier.is_connectionless() {
                        stanza_int(result, "connectionless", 1);
                    }
                    if !carrier.is_push() {
                        stanza_int(result, "push", 0);
                    }
                }
            }
        }
    });
}

fn set_params(port: &Arc<PortCore>, cmd: &Bottle, result: &mut Bottle) {
    let is_output = cmd.get(1).as_vocab() != VOCAB_IN;
    let target = cmd.get(2).as_str().to_string();
    if target.is_empty() {
        result.add_int(-1);
        result.add_string("target port is not specified.\r\n");
        return;
    }
    if target == port.name() {
        let params = Property::from_bottle(cmd);
        match port.modifier.set_params(is_output, &params) {
            Ok(()) => result.add_vocab(VOCAB_OK),
            Err(message) => {
                result.add_vocab(VOCAB_FAIL);
                result.add_string(message);
            }
        }
        return;
    }
    let params = Property::from_bottle(cmd);
    let configured = port.with_units(|units| {
        for unit in units.iter().flatten() {
            if unit.is_finished() || unit.is_input() == is_output {
                continue;
            }
            let route = unit.route();
            let peer = if is_output { &route.to } else { &route.from };
            if *peer == target {
                unit.control().set_params(&params);
                return true;
            }
        }
        false
    });
    if configured {
        result.add_int(0);
        if is_output {
            result.add_string(format!("Configured connection to {}\r\n", target));
        } else {
            result.add_string(format!("Configured connection from {}\r\n", target));
        }
    } else {
        result.add_int(-1);
        if is_output {
            result.add_string(format!(
                "Could not find an outgoing connection to {}\r\n",
                target
            ));
        } else {
            result.add_string(format!(
                "Could not find an incoming connection from {}\r\n",
                target
            ));
        }
    }
}

fn get_params(port: &Arc<PortCore>, cmd: &Bottle, result: &mut Bottle) {
    let is_output = cmd.get(1).as_vocab() != VOCAB_IN;
    let target = cmd.get(2).as_str().to_string();
    if target.is_empty() {
        result.add_int(-1);
        result.add_string("target port is not specified.\r\n");
        return;
    }
    if target == port.name() {
        match port.modifier.params(is_output) {
            Ok(params) => result.add(Value::List(params.to_bottle())),
            Err(message) => {
                result.add_vocab(VOCAB_FAIL);
                result.add_string(message);
            }
        }
        return;
    }
    let params = port.with_units(|units| {
        for unit in units.iter().flatten() {
            if unit.is_finished() || unit.is_input() == is_output {
                continue;
            }
            let route = unit.route();
            let peer = if is_output { &route.to } else { &route.from };
            if *peer == target {
                return Some(unit.control().params());
            }
        }
        None
    });
    match params {
        Some(params) => result.add(Value::List(params.to_bottle())),
        None => {
            result.add_int(-1);
            if is_output {
                result.add_string(format!(
                    "Could not find an outgoing connection to {}\r\n",
                    target
                ));
            } else {
                result.add_string(format!(
                    "Could not find an incoming connection from {}\r\n",
                    target
                ));
            }
        }
    }
}

fn prop(port: &Arc<PortCore>, cmd: &Bottle, result: &mut Bottle) {
    match cmd.get(1).as_vocab() {
        v if v == VOCAB_GET => prop_get(port, cmd, result),
        v if v == VOCAB_SET => prop_set(port, cmd, result),
        _ => {
            result.add_vocab(VOCAB_FAIL);
            result.add_string("property action not known");
        }
    }
}

fn prop_get(port: &Arc<PortCore>, cmd: &Bottle, result: &mut Bottle) {
    let key = cmd.get(2);
    if key.is_null() {
        *result = port.with_properties(|props| props.to_bottle());
        return;
    }
    let key = key.as_str().to_string();
    if !key.starts_with('/') {
        let value = port.with_properties(|props| props.find(&key).clone());
        result.add(value);
        return;
    }
    if key == port.name() {
        own_introspection(port, result);
        return;
    }
    // QoS properties of one connection to/from a named peer.
    let found = port.with_units(|units| {
        for unit in units.iter().flatten() {
            if unit.is_finished() {
                continue;
            }
            let route = unit.route();
            let peer = if unit.is_output() {
                &route.to
            } else {
                &route.from
            };
            if *peer == key {
                let (priority, policy) = thread_sched_params(unit.tid());
                result.clear();
                let sched = result.add_list();
                sched.add_string("sched");
                let mut sched_props = Property::new();
                sched_props.put_int("tid", unit.tid() as i32);
                sched_props.put_int("priority", priority);
                sched_props.put_int("policy", policy);
                sched.add(Value::List(sched_props.to_bottle()));

                let qos = result.add_list();
                qos.add_string("qos");
                let mut qos_props = Property::new();
                let tos = port
                    .type_of_service(unit)
                    .map(i32::from)
                    .unwrap_or(-1);
                qos_props.put_int("tos", tos);
                qos.add(Value::List(qos_props.to_bottle()));
                return true;
            }
        }
        false
    });
    if !found {
        result.clear();
        result.add_vocab(VOCAB_FAIL);
        result.add_string(format!("cannot find any connection to/from {}", key));
    }
}

/// The port's own introspection block: scheduler, process, platform,
/// and port stanzas.
fn own_introspection(port: &Arc<PortCore>, result: &mut Bottle) {
    result.clear();

    let tid = port.listener_tid();
    let (priority, policy) = thread_sched_params(tid);
    let sched = result.add_list();
    sched.add_string("sched");
    let mut sched_props = Property::new();
    sched_props.put_int("tid", tid as i32);
    sched_props.put_int("priority", priority);
    sched_props.put_int("policy", policy);
    sched.add(Value::List(sched_props.to_bottle()));

    let mut args = std::env::args();
    let process_name = args.next().unwrap_or_default();
    let arguments = args.collect::<Vec<_>>().join(" ");
    let process = result.add_list();
    process.add_string("process");
    let mut process_props = Property::new();
    process_props.put_int("pid", std::process::id() as i32);
    process_props.put_str("name", process_name);
    process_props.put_str("arguments", arguments);
    let (proc_priority, proc_policy) = thread_sched_params(super::unit::current_tid());
    process_props.put_int("priority", proc_priority);
    process_props.put_int("policy", proc_policy);
    process.add(Value::List(process_props.to_bottle()));

    let platform = result.add_list();
    platform.add_string("platform");
    let mut platform_props = Property::new();
    platform_props.put_str("os", std::env::consts::OS);
    platform_props.put_str("hostname", port.address().host);
    platform.add(Value::List(platform_props.to_bottle()));

    let flags = port.flags();
    let port_list = result.add_list();
    port_list.add_string("port");
    let mut port_props = Property::new();
    port_props.put_int("is_input", i32::from(flags & PORT_IS_INPUT != 0));
    port_props.put_int("is_output", i32::from(flags & PORT_IS_OUTPUT != 0));
    port_props.put_int("is_rpc", i32::from(flags & PORT_IS_RPC != 0));
    port_props.put_str("type", port.type_name().unwrap_or_default());
    port_list.add(Value::List(port_props.to_bottle()));
}

fn prop_set(port: &Arc<PortCore>, cmd: &Bottle, result: &mut Bottle) {
    let key = cmd.get(2).as_str().to_string();
    port.with_properties(|props| props.put(key.clone(), cmd.get(3).clone()));
    let mut ok = true;

    // prop set <self> (process ((priority P) (policy Q)))
    if let Some(group) = cmd.find_group("process") {
        if key.starts_with('/') && key == port.name() {
            ok = false;
            if let Some(params) = group.get(1).as_list() {
                let priority = sched_value(params, "priority");
                let policy = sched_value(params, "policy");
                ok = set_process_sched_params(priority, policy);
            }
        }
    }

    // prop set <peer> (sched ((priority P) (policy Q)))
    // Priority/policy values follow the OS scheduler: on Linux,
    // SCHED_OTHER policy=0 priority=0, SCHED_FIFO/RR policy=1/2
    // priority=1..99.
    if let Some(group) = cmd.find_group("sched") {
        if key.starts_with('/') {
            ok = false;
            port.with_units(|units| {
                for unit in units.iter().flatten() {
                    if unit.is_finished() {
                        continue;
                    }
                    let route = unit.route();
                    let peer = if unit.is_output() {
                        &route.to
                    } else {
                        &route.from
                    };
                    if *peer == key {
                        match group.get(1).as_list() {
                            Some(params) => {
                                let priority = sched_value(params, "priority");
                                let policy = sched_value(params, "policy");
                                ok = set_thread_sched_params(unit.tid(), priority, policy);
                            }
                            None => ok = false,
                        }
                        break;
                    }
                }
            });
        }
    }

    // prop set <peer> (qos ((priority HIGH))) | ((dscp AF12)) | ((tos 12))
    if let Some(group) = cmd.find_group("qos") {
        if key.starts_with('/') {
            ok = false;
            port.with_units(|units| {
                for unit in units.iter().flatten() {
                    if unit.is_finished() {
                        continue;
                    }
                    let route = unit.route();
                    let peer = if unit.is_output() {
                        &route.to
                    } else {
                        &route.from
                    };
                    if *peer == key {
                        match group.get(1).as_list() {
                            Some(params) => {
                                if params.check("priority") {
                                    let vocab = params.find("priority").as_vocab();
                                    if let Some(code) = dscp::priority_dscp(vocab) {
                                        ok = port.set_type_of_service(
                                            unit,
                                            dscp::dscp_to_tos(code),
                                        );
                                    }
                                } else if params.check("dscp") {
                                    let value = params.find("dscp");
                                    let code = match dscp::class_dscp(value.as_vocab()) {
                                        Some(class) => i32::from(class),
                                        None => value.as_int(),
                                    };
                                    if (0..64).contains(&code) {
                                        ok = port.set_type_of_service(
                                            unit,
                                            dscp::dscp_to_tos(code as u8),
                                        );
                                    }
                                } else if params.check("tos") {
                                    let tos = params.find("tos").as_int();
                                    if (0..256).contains(&tos) {
                                        ok = port.set_type_of_service(unit, tos as u8);
                                    }
                                }
                            }
                            None => ok = false,
                        }
                        break;
                    }
                }
            });
        }
    }

    result.add_vocab(if ok { VOCAB_OK } else { VOCAB_FAIL });
}

fn sched_value(params: &Bottle, key: &str) -> i32 {
    if params.check(key) {
        params.find(key).as_int()
    } else {
        -1
    }
}

fn attach(port: &Arc<PortCore>, cmd: &Bottle, result: &mut Bottle) {
    let side = cmd.get(1).as_vocab();
    if side != VOCAB_IN && side != VOCAB_OUT {
        result.add_vocab(VOCAB_FAIL);
        result.add_string("attach command must be followed by [out] or [in]");
        return;
    }
    let is_output = side == VOCAB_OUT;
    let config = Property::from_text(cmd.get(2).as_str());
    match attach_monitor(port, is_output, &config) {
        Ok(()) => result.add_vocab(VOCAB_OK),
        Err(message) => {
            result.add_vocab(VOCAB_FAIL);
            result.add_string(message);
        }
    }
}

fn attach_monitor(
    port: &Arc<PortCore>,
    is_output: bool,
    config: &Property,
) -> Result<(), String> {
    let factory = port
        .carriers()
        .choose_modifier("portmonitor")
        .ok_or_else(|| {
            "Portmonitor carrier modifier cannot be found or is not enabled".to_string()
        })?;
    let mut full = config.clone();
    if is_output {
        full.put_str("source", port.name());
        full.put_str("destination", "");
        full.put_int("sender_side", 1);
        full.put_int("receiver_side", 0);
    } else {
        full.put_str("source", "");
        full.put_str("destination", port.name());
        full.put_int("sender_side", 0);
        full.put_int("receiver_side", 1);
    }
    full.put_str("carrier", "");
    let modifier = factory
        .create(&full)
        .map_err(|e| format!("Failed to configure the portmonitor plug-in: {}", e))?;
    port.modifier.attach(is_output, modifier);
    Ok(())
}

fn detach(port: &Arc<PortCore>, cmd: &Bottle, result: &mut Bottle) {
    match cmd.get(1).as_vocab() {
        v if v == VOCAB_OUT => {
            port.modifier.detach(true);
            result.add_vocab(VOCAB_OK);
        }
        v if v == VOCAB_IN => {
            port.modifier.detach(false);
            result.add_vocab(VOCAB_OK);
        }
        _ => {
            result.add_vocab(VOCAB_FAIL);
            result.add_string("detach command must be followed by [out] or [in]");
        }
    }
}

/// Dial a port's admin surface and run one command. Connections made
/// this way carry "admin" as their source name, so they never count as
/// data inputs on the far side.
pub fn admin_request(
    carriers: &Arc<CarrierRegistry>,
    contact: &Contact,
    cmd: Bottle,
) -> io::Result<Bottle> {
    let mut target = contact.clone();
    if target.timeout.is_none() {
        target.timeout = Some(Duration::from_secs(5));
    }
    let carrier = if target.carrier.is_empty() {
        "tcp".to_string()
    } else {
        target.carrier.clone()
    };
    let mut conn = carriers.connect(&target)?;
    conn.set_timeout(target.timeout);
    conn.open(&Route::new("admin", target.name.clone(), carrier))?;
    conn.write_frame(&Frame::admin(cmd.encode()))?;
    let reply = conn.read_reply()?;
    Bottle::decode(&reply.payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

#[cfg(feature = "ros")]
mod ros {
    //! ROS 1 slave-API compatibility.
    //!
    //! `publisherUpdate` reconciles the current set of reverse
    //! ("pupped") subscriptions against the publisher list provided by
    //! the master: units whose tag is absent are doomed, and new
    //! publishers are contacted over xmlrpc for a TCPROS endpoint to
    //! dial.

    use super::*;
    use std::collections::HashSet;

    pub(super) fn publisher_update(port: &Arc<PortCore>, cmd: &Bottle, result: &mut Bottle) {
        let topic = cmd.get(2).as_str().to_string();
        log::debug!("[admin] publisherUpdate --> {}", cmd);
        if let Some(publishers) = cmd.get(3).as_list() {
            let listed: HashSet<String> = publishers
                .iter()
                .map(|v| v.as_str().to_string())
                .filter(|s| !s.is_empty())
                .collect();

            let mut present = HashSet::new();
            port.with_units(|units| {
                for unit in units.iter().flatten() {
                    if let Some(tag) = unit.pup_name() {
                        present.insert(tag.clone());
                        if !listed.contains(&tag) {
                            unit.set_doomed();
                        }
                    }
                }
            });

            for publisher in &listed {
                if present.contains(publisher) {
                    continue;
                }
                log::debug!("[admin] ROS ADD {}", publisher);
                match request_topic_from(port, publisher, &topic) {
                    Some((host, port_num)) => {
                        subscribe_tcpros(port, publisher, &topic, &host, port_num);
                    }
                    None => {
                        log::warn!("[admin] cannot reach ROS publisher {}", publisher);
                    }
                }
            }
        }
        result.add_int(1);
        result.add_string("ok");
    }

    pub(super) fn request_topic(port: &Arc<PortCore>, result: &mut Bottle) {
        let address = port.address();
        result.add_int(1);
        result.add_string(port.name());
        let endpoint = result.add_list();
        endpoint.add_string("TCPROS");
        endpoint.add_string(address.host);
        endpoint.add_int(i32::from(address.port));
    }

    /// Ask a publisher's xmlrpc endpoint for its TCPROS address.
    fn request_topic_from(
        port: &Arc<PortCore>,
        publisher: &str,
        topic: &str,
    ) -> Option<(String, u16)> {
        let contact = parse_publisher_uri(publisher)?;
        let mut req = Bottle::new();
        req.add_string("requestTopic");
        req.add_string(port.name());
        req.add_string(topic);
        let protocols = req.add_list();
        protocols.add_list().add_string("TCPROS");

        let reply = match admin_request(port.carriers(), &contact, req) {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("[admin] requestTopic to {} failed: {}", publisher, e);
                return None;
            }
        };
        if reply.get(0).as_int() != 1 {
            log::warn!("[admin] failure looking up topic {}: {}", topic, reply);
            return None;
        }
        let preferred = match reply.get(2).as_list() {
            Some(list) => list,
            None => {
                log::warn!(
                    "[admin] failure looking up topic {}: expected list of protocols",
                    topic
                );
                return None;
            }
        };
        if preferred.get(0).as_str() != "TCPROS" {
            log::warn!(
                "[admin] failure looking up topic {}: unsupported protocol {}",
                topic,
                preferred.get(0).as_str()
            );
            return None;
        }
        let host = preferred.get(1).as_str().to_string();
        let port_num = preferred.get(2).as_int();
        if port_num <= 0 || port_num > i32::from(u16::MAX) {
            return None;
        }
        Some((host, port_num as u16))
    }

    /// Dial a TCPROS endpoint and register the inverted connection as a
    /// pupped input unit.
    fn subscribe_tcpros(
        port: &Arc<PortCore>,
        publisher: &str,
        topic: &str,
        host: &str,
        port_num: u16,
    ) {
        let carrier = format!("tcpros+role.pub+topic.{}", topic);
        let contact = Contact::new(publisher, host, port_num, carrier.clone());
        let mut conn = match port.carriers().connect(&contact) {
            Ok(conn) => conn,
            Err(e) => {
                log::warn!("[admin] cannot dial TCPROS {}:{}: {}", host, port_num, e);
                return;
            }
        };
        let mut route = Route::new(port.name(), publisher, carrier);
        if let Err(e) = conn.open(&route) {
            log::warn!("[admin] TCPROS open failed: {}", e);
            return;
        }
        route.swap_names();
        conn.rename(route);
        match conn.into_inbound() {
            Ok(inbound) => {
                port.add_reverse_input(inbound, Some(publisher.to_string()));
                log::debug!(
                    "[admin] topic {} available at {}:{}",
                    topic,
                    host,
                    port_num
                );
            }
            Err(_) => log::warn!("[admin] TCPROS carrier did not invert direction"),
        }
    }

    /// Publisher URIs arrive as `http://host:port/`.
    fn parse_publisher_uri(uri: &str) -> Option<Contact> {
        let stripped = uri
            .strip_prefix("http://")
            .unwrap_or(uri)
            .trim_end_matches('/');
        let (host, port) = stripped.rsplit_once(':')?;
        let port = port.parse::<u16>().ok()?;
        Some(Contact::new(uri, host, port, "xmlrpc"))
    }

}
