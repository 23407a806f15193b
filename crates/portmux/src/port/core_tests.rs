// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end scenarios for the port engine: live TCP connections,
//! admin protocol exchanges, fan-out, QoS, and shutdown ordering.

use super::core::{PortCore, PORT_IS_INPUT, PORT_IS_OUTPUT, PORT_IS_RPC};
use super::traits::{ConnectionReader, PortInfo, PortReader, PortReport, PortWriter};
use crate::bottle::{vocab, Bottle, Property};
use crate::carrier::{CarrierRegistry, ModifierFactory, PortModifier};
use crate::name::{Contact, LocalNameService, NameService};
use crate::port::admin_request;
use crate::route::Route;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Stack {
    carriers: Arc<CarrierRegistry>,
    names: Arc<LocalNameService>,
}

fn stack() -> Stack {
    let _ = env_logger::builder().is_test(true).try_init();
    let carriers = Arc::new(CarrierRegistry::with_defaults());
    let names = Arc::new(LocalNameService::new(carriers.clone()));
    Stack { carriers, names }
}

impl Stack {
    fn port(&self) -> Arc<PortCore> {
        PortCore::new(self.carriers.clone(), self.names.clone())
    }

    fn running_port(&self, name: &str) -> Arc<PortCore> {
        let port = self.port();
        assert!(
            port.listen(&Contact::new(name, "127.0.0.1", 0, "tcp"), true),
            "listen failed for {}",
            name
        );
        assert!(port.start(), "start failed for {}", name);
        port
    }

    fn admin(&self, target: &str, cmd: Bottle) -> Bottle {
        let contact = self.names.query(target).expect("target not registered");
        admin_request(&self.carriers, &contact, cmd).expect("admin request failed")
    }
}

fn cmd1(tag: &str) -> Bottle {
    let mut cmd = Bottle::new();
    cmd.add_vocab(vocab(tag));
    cmd
}

fn cmd2(tag: &str, arg: &str) -> Bottle {
    let mut cmd = cmd1(tag);
    cmd.add_string(arg);
    cmd
}

fn wait_until(what: &str, mut pred: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if pred() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {}", what);
}

/// Reader collecting every payload it sees, optionally answering.
struct CollectingReader {
    seen: Arc<Mutex<Vec<(Vec<u8>, String)>>>,
    reply: Option<Vec<u8>>,
    synthetic_reads: Arc<AtomicUsize>,
}

impl CollectingReader {
    fn new() -> (Box<Self>, Arc<Mutex<Vec<(Vec<u8>, String)>>>, Arc<AtomicUsize>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let synthetic = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Self {
                seen: seen.clone(),
                reply: None,
                synthetic_reads: synthetic.clone(),
            }),
            seen,
            synthetic,
        )
    }

    fn replying(reply: &[u8]) -> (Box<Self>, Arc<Mutex<Vec<(Vec<u8>, String)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Box::new(Self {
                seen: seen.clone(),
                reply: Some(reply.to_vec()),
                synthetic_reads: Arc::new(AtomicUsize::new(0)),
            }),
            seen,
        )
    }
}

impl PortReader for CollectingReader {
    fn read(&mut self, reader: &mut dyn ConnectionReader) -> bool {
        if !reader.is_valid() {
            self.synthetic_reads.fetch_add(1, Ordering::SeqCst);
            return true;
        }
        self.seen
            .lock()
            .push((reader.payload().to_vec(), reader.envelope().to_string()));
        if let Some(reply) = &self.reply {
            reader.reply(reply);
        }
        true
    }
}

/// Reader capturing RPC replies on the sender side.
struct ReplyCollector {
    replies: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl PortReader for ReplyCollector {
    fn read(&mut self, reader: &mut dyn ConnectionReader) -> bool {
        self.replies.lock().push(reader.payload().to_vec());
        true
    }
}

// ============================================================================
// Admin protocol scenarios
// ============================================================================

#[test]
fn test_admin_help_lists_verbs() {
    let stack = stack();
    let port = stack.running_port("/help-a");

    let reply = stack.admin("/help-a", cmd1("help"));
    assert_eq!(reply.get(0).as_vocab(), vocab("many"));
    assert!(reply
        .iter()
        .any(|v| v.as_str() == "[help]                  # give this help"));

    port.close();
}

#[test]
fn test_admin_version() {
    let stack = stack();
    let port = stack.running_port("/ver-a");

    let reply = stack.admin("/ver-a", cmd1("ver"));
    assert_eq!(reply.get(0).as_vocab(), vocab("ver"));
    assert_eq!(reply.get(1).as_int(), 1);
    assert_eq!(reply.get(2).as_int(), 2);
    assert_eq!(reply.get(3).as_int(), 3);

    port.close();
}

#[test]
fn test_admin_connect_and_disconnect() {
    let stack = stack();
    let a = stack.running_port("/conn-a");
    let b = stack.running_port("/conn-b");

    let reply = stack.admin("/conn-a", cmd2("add", "/conn-b"));
    assert_eq!(reply.get(0).as_int(), 0);
    assert_eq!(
        reply.get(1).as_str(),
        "Added connection from /conn-a to /conn-b"
    );

    let listed = stack.admin("/conn-a", cmd2("list", "out"));
    let names: Vec<&str> = listed.iter().map(|v| v.as_str()).collect();
    assert_eq!(names, vec!["/conn-b"]);

    let reply = stack.admin("/conn-a", cmd2("del", "/conn-b"));
    assert_eq!(reply.get(0).as_int(), 0);
    assert!(
        reply
            .get(1)
            .as_str()
            .contains("Removed connection from /conn-a to /conn-b"),
        "unexpected message: {}",
        reply.get(1).as_str()
    );

    let listed = stack.admin("/conn-a", cmd2("list", "out"));
    assert!(listed.is_empty());
    assert_eq!(a.output_count(), 0);

    b.close();
    a.close();
}

#[test]
fn test_admin_list_details() {
    let stack = stack();
    let a = stack.running_port("/detail-a");
    let b = stack.running_port("/detail-b");

    assert!(a.add_output("/detail-b", false));
    let mut cmd = cmd2("list", "out");
    cmd.add_string("/detail-b");
    let reply = stack.admin("/detail-a", cmd);

    let found = Property::from_bottle(&reply);
    assert_eq!(found.find("from").as_str(), "/detail-a");
    assert_eq!(found.find("to").as_str(), "/detail-b");
    assert_eq!(found.find("carrier").as_str(), "tcp");
    // TCP is push and connection-oriented: neither flag appears.
    assert!(!found.check("connectionless"));
    assert!(!found.check("push"));

    b.close();
    a.close();
}

#[test]
fn test_rpc_output_exclusivity() {
    let stack = stack();
    let a = stack.port();
    a.set_flags(PORT_IS_INPUT | PORT_IS_OUTPUT | PORT_IS_RPC);
    assert!(a.listen(&Contact::new("/rpc-a", "127.0.0.1", 0, "tcp"), true));
    assert!(a.start());
    let b = stack.running_port("/rpc-b");
    let c = stack.running_port("/rpc-c");

    let reply = stack.admin("/rpc-a", cmd2("add", "/rpc-b"));
    assert_eq!(reply.get(0).as_int(), 0);

    let reply = stack.admin("/rpc-a", cmd2("add", "/rpc-c"));
    assert_eq!(reply.get(0).as_int(), -1);
    assert_eq!(reply.get(1).as_str(), "RPC output already connected");
    assert_eq!(a.output_count(), 1);

    c.close();
    b.close();
    a.close();
}

#[test]
fn test_input_only_port_refuses_outputs() {
    let stack = stack();
    let a = stack.port();
    a.set_flags(PORT_IS_INPUT);
    assert!(a.listen(&Contact::new("/in-only", "127.0.0.1", 0, "tcp"), true));
    assert!(a.start());
    let b = stack.running_port("/in-only-peer");

    let reply = stack.admin("/in-only", cmd2("add", "/in-only-peer"));
    assert_eq!(reply.get(0).as_int(), -1);
    assert_eq!(reply.get(1).as_str(), "Outputs not allowed");
    assert_eq!(a.output_count(), 0);

    b.close();
    a.close();
}

#[test]
fn test_qos_priority_sets_tos() {
    let stack = stack();
    let a = stack.running_port("/qos-a");
    let b = stack.running_port("/qos-b");
    assert!(a.add_output("/qos-b", false));

    // prop set /qos-b (qos ((priority HIGH))) -> TOS = 36 << 2 = 144.
    let mut cmd = cmd2("prop", "set");
    cmd.add_string("/qos-b");
    let group = cmd.add_list();
    group.add_string("qos");
    let inner = group.add_list();
    let pair = inner.add_list();
    pair.add_string("priority");
    pair.add_vocab(vocab("HIGH"));
    let reply = stack.admin("/qos-a", cmd);
    assert_eq!(reply.get(0).as_vocab(), vocab("ok"), "reply: {}", reply);

    let mut cmd = cmd2("prop", "get");
    cmd.add_string("/qos-b");
    let reply = stack.admin("/qos-a", cmd);
    let qos = reply
        .find_group("qos")
        .expect("qos stanza")
        .get(1)
        .as_list()
        .expect("qos props")
        .clone();
    let props = Property::from_bottle(&qos);
    assert_eq!(props.find("tos").as_int(), 144);

    b.close();
    a.close();
}

#[test]
fn test_wildcard_removal_under_load() {
    let stack = stack();
    let a = stack.running_port("/load-a");
    let b = stack.running_port("/load-b");
    let c = stack.running_port("/load-c");
    assert!(a.add_output("/load-b", false));
    assert!(a.add_output("/load-c", false));
    assert_eq!(a.output_count(), 2);

    let stop = Arc::new(AtomicBool::new(false));
    let sender = {
        let a = a.clone();
        let stop = stop.clone();
        std::thread::spawn(move || {
            let mut sent = 0u32;
            while !stop.load(Ordering::Acquire) {
                let payload: Arc<dyn PortWriter> = Arc::new(b"load".to_vec());
                // Either a full fan-out or a no-op against the empty
                // set; never a partial one.
                let _ = a.send(payload);
                sent += 1;
            }
            sent
        })
    };

    std::thread::sleep(Duration::from_millis(50));
    let reply = stack.admin("/load-a", cmd2("del", "*"));
    assert_eq!(reply.get(0).as_int(), 0);
    assert_eq!(a.output_count(), 0);

    stop.store(true, Ordering::Release);
    let sent = sender.join().expect("sender panicked");
    assert!(sent > 0);

    c.close();
    b.close();
    a.close();
}

#[test]
fn test_unknown_verb_fails_politely() {
    let stack = stack();
    let port = stack.running_port("/unknown-a");

    let reply = stack.admin("/unknown-a", cmd1("warp"));
    assert_eq!(reply.get(0).as_vocab(), vocab("fail"));
    assert_eq!(
        reply.get(1).as_str(),
        "send [help] for list of valid commands"
    );

    port.close();
}

#[test]
fn test_admin_reader_override_handles_unknown_verbs() {
    struct EchoAdmin;
    impl PortReader for EchoAdmin {
        fn read(&mut self, reader: &mut dyn ConnectionReader) -> bool {
            let cmd = Bottle::decode(reader.payload()).expect("admin bottle");
            let mut reply = Bottle::new();
            reply.add_string("custom");
            reply.add_string(cmd.get(0).as_str());
            reader.reply(&reply.encode())
        }
    }

    let stack = stack();
    let port = stack.port();
    port.set_admin_read_handler(Box::new(EchoAdmin));
    assert!(port.listen(&Contact::new("/override", "127.0.0.1", 0, "tcp"), true));
    assert!(port.start());

    let mut cmd = Bottle::new();
    cmd.add_string("mystery");
    let reply = stack.admin("/override", cmd);
    assert_eq!(reply.get(0).as_str(), "custom");
    assert_eq!(reply.get(1).as_str(), "mystery");

    port.close();
}

#[test]
fn test_user_properties_roundtrip() {
    let stack = stack();
    let port = stack.running_port("/props-a");

    let mut cmd = cmd2("prop", "set");
    cmd.add_string("answer");
    cmd.add_int(42);
    let reply = stack.admin("/props-a", cmd);
    assert_eq!(reply.get(0).as_vocab(), vocab("ok"));

    let mut cmd = cmd2("prop", "get");
    cmd.add_string("answer");
    let reply = stack.admin("/props-a", cmd);
    assert_eq!(reply.get(0).as_int(), 42);

    port.close();
}

#[test]
fn test_own_introspection_block() {
    let stack = stack();
    let port = stack.running_port("/intro-a");

    let mut cmd = cmd2("prop", "get");
    cmd.add_string("/intro-a");
    let reply = stack.admin("/intro-a", cmd);

    for stanza in ["sched", "process", "platform", "port"] {
        assert!(reply.find_group(stanza).is_some(), "missing {}", stanza);
    }
    let port_props = Property::from_bottle(
        reply
            .find_group("port")
            .unwrap()
            .get(1)
            .as_list()
            .expect("port props"),
    );
    assert_eq!(port_props.find("is_input").as_int(), 1);
    assert_eq!(port_props.find("is_output").as_int(), 1);
    assert_eq!(port_props.find("is_rpc").as_int(), 0);

    port.close();
}

// ============================================================================
// Data path
// ============================================================================

#[test]
fn test_publish_subscribe_with_envelope() {
    let stack = stack();
    let b = stack.port();
    let (reader, seen, _) = CollectingReader::new();
    b.set_read_handler(reader);
    assert!(b.listen(&Contact::new("/pub-b", "127.0.0.1", 0, "tcp"), true));
    assert!(b.start());

    let a = stack.running_port("/pub-a");
    assert!(a.add_output("/pub-b", false));
    a.set_envelope("stamp 7");

    let payload: Arc<dyn PortWriter> = Arc::new(b"reading".to_vec());
    assert!(a.send(payload));

    wait_until("message delivery", || !seen.lock().is_empty());
    let (payload, envelope) = seen.lock()[0].clone();
    assert_eq!(payload, b"reading");
    assert_eq!(envelope, "stamp 7");

    a.close();
    b.close();
}

#[test]
fn test_rpc_reply_round_trip() {
    let stack = stack();
    let b = stack.port();
    let (reader, seen) = CollectingReader::replying(b"pong");
    b.set_read_handler(reader);
    assert!(b.listen(&Contact::new("/rpc-srv", "127.0.0.1", 0, "tcp"), true));
    assert!(b.start());

    let a = stack.running_port("/rpc-cli");
    assert!(a.add_output("/rpc-srv", false));

    let replies = Arc::new(Mutex::new(Vec::new()));
    let mut collector = ReplyCollector {
        replies: replies.clone(),
    };
    let payload: Arc<dyn PortWriter> = Arc::new(b"ping".to_vec());
    assert!(a.send_full(payload, Some(&mut collector), None));

    assert_eq!(replies.lock().as_slice(), &[b"pong".to_vec()]);
    assert_eq!(seen.lock()[0].0, b"ping");

    a.close();
    b.close();
}

#[test]
fn test_add_remove_leaves_output_count_unchanged() {
    let stack = stack();
    let a = stack.running_port("/law-a");
    let b = stack.running_port("/law-b");

    let before = a.output_count();
    assert!(a.add_output("/law-b", false));
    assert!(a.remove_output("/law-b"));
    assert_eq!(a.output_count(), before);

    b.close();
    a.close();
}

#[test]
fn test_only_if_needed_reuses_connection() {
    let stack = stack();
    let a = stack.running_port("/reuse-a");
    let b = stack.running_port("/reuse-b");

    assert!(a.add_output("/reuse-b", false));
    assert_eq!(a.output_count(), 1);

    let mut report = String::new();
    assert!(a.add_output_report("/reuse-b", true, &mut report));
    assert!(
        report.contains("Desired connection already present"),
        "report: {}",
        report
    );
    assert_eq!(a.output_count(), 1);

    b.close();
    a.close();
}

#[test]
fn test_remove_all_wildcard_dooms_every_unit() {
    let stack = stack();
    let a = stack.running_port("/wild-a");
    let b = stack.running_port("/wild-b");
    let c = stack.running_port("/wild-c");
    assert!(a.add_output("/wild-b", false));
    assert!(a.add_output("/wild-c", false));

    assert!(a.remove_io(&Route::any(), true));
    assert_eq!(a.output_count(), 0);
    assert_eq!(a.input_count(), 0);

    c.close();
    b.close();
    a.close();
}

#[test]
fn test_interrupt_then_resume_leaves_reader_callable() {
    let stack = stack();
    let b = stack.port();
    let (reader, seen, synthetic) = CollectingReader::new();
    b.set_read_handler(reader);
    assert!(b.listen(&Contact::new("/int-b", "127.0.0.1", 0, "tcp"), true));
    assert!(b.start());

    b.interrupt();
    // The blocked-reader nudge arrives as one synthetic empty read.
    assert_eq!(synthetic.load(Ordering::SeqCst), 1);
    b.resume();

    let a = stack.running_port("/int-a");
    assert!(a.add_output("/int-b", false));
    let payload: Arc<dyn PortWriter> = Arc::new(b"after-resume".to_vec());
    assert!(a.send(payload));
    wait_until("delivery after resume", || !seen.lock().is_empty());

    a.close();
    b.close();
}

#[test]
fn test_close_delivers_end_of_port_read() {
    let stack = stack();
    let port = stack.port();
    let (reader, _seen, synthetic) = CollectingReader::new();
    port.set_read_handler(reader);
    assert!(port.listen(&Contact::new("/eof-a", "127.0.0.1", 0, "tcp"), true));
    assert!(port.start());

    port.close();
    assert_eq!(synthetic.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Logging and modifiers
// ============================================================================

#[test]
fn test_log_connection_receives_transcript() {
    let stack = stack();

    // The logger port collects raw transcripts.
    let logger = stack.port();
    let (log_reader, logged, _) = CollectingReader::new();
    logger.set_read_handler(log_reader);
    assert!(logger.listen(&Contact::new("/log-sink", "127.0.0.1", 0, "tcp"), true));
    assert!(logger.start());

    // The service port answers requests and forwards transcripts.
    let service = stack.port();
    let (reader, seen) = CollectingReader::replying(b"done");
    service.set_read_handler(reader);
    assert!(service.listen(&Contact::new("/log-svc", "127.0.0.1", 0, "tcp"), true));
    assert!(service.start());
    let mut report = String::new();
    assert!(service.add_output_report("tcp+log.in:/log-sink", false, &mut report));
    assert!(
        report.contains("will forward messages and replies"),
        "report: {}",
        report
    );

    // A client request triggers handler + transcript fan-out.
    let client = stack.running_port("/log-cli");
    assert!(client.add_output("/log-svc", false));
    let replies = Arc::new(Mutex::new(Vec::new()));
    let mut collector = ReplyCollector {
        replies: replies.clone(),
    };
    let payload: Arc<dyn PortWriter> = Arc::new(b"request".to_vec());
    assert!(client.send_full(payload, Some(&mut collector), None));
    assert_eq!(seen.lock()[0].0, b"request");

    wait_until("transcript delivery", || !logged.lock().is_empty());
    let transcript = Bottle::decode(&logged.lock()[0].0).expect("transcript bottle");
    assert_eq!(transcript.get(0).as_vocab(), vocab("rec"));
    assert_eq!(transcript.get(1).as_blob(), Some(b"request".as_slice()));
    let replies_list = transcript.get(3).as_list().expect("replies");
    assert_eq!(replies_list.get(0).as_blob(), Some(b"done".as_slice()));

    client.close();
    service.close();
    logger.close();
}

#[test]
fn test_rejected_log_mode() {
    let stack = stack();
    let a = stack.running_port("/badlog-a");
    let b = stack.running_port("/badlog-b");

    let mut report = String::new();
    assert!(!a.add_output_report("tcp+log.out:/badlog-b", false, &mut report));
    assert!(
        report.contains("only log.in is supported"),
        "report: {}",
        report
    );

    b.close();
    a.close();
}

struct UppercaseFactory;

impl ModifierFactory for UppercaseFactory {
    fn create(&self, config: &Property) -> Result<Box<dyn PortModifier>, String> {
        struct Uppercase;
        impl PortModifier for Uppercase {
            fn modify(&mut self, payload: &mut Vec<u8>) {
                payload.make_ascii_uppercase();
            }
        }
        if config.check("broken") {
            return Err("refusing broken config".to_string());
        }
        Ok(Box::new(Uppercase))
    }
}

#[test]
fn test_attach_detach_output_modifier() {
    let stack = stack();
    stack
        .carriers
        .register_modifier("portmonitor", Arc::new(UppercaseFactory));

    let b = stack.port();
    let (reader, seen, _) = CollectingReader::new();
    b.set_read_handler(reader);
    assert!(b.listen(&Contact::new("/mon-b", "127.0.0.1", 0, "tcp"), true));
    assert!(b.start());

    let a = stack.running_port("/mon-a");
    assert!(a.add_output("/mon-b", false));

    let mut cmd = cmd2("atch", "out");
    cmd.add_string("(kind filter)");
    let reply = stack.admin("/mon-a", cmd);
    assert_eq!(reply.get(0).as_vocab(), vocab("ok"), "reply: {}", reply);

    let payload: Arc<dyn PortWriter> = Arc::new(b"quiet".to_vec());
    assert!(a.send(payload));
    wait_until("modified delivery", || !seen.lock().is_empty());
    assert_eq!(seen.lock()[0].0, b"QUIET");

    let reply = stack.admin("/mon-a", cmd2("dtch", "out"));
    assert_eq!(reply.get(0).as_vocab(), vocab("ok"));

    let payload: Arc<dyn PortWriter> = Arc::new(b"loud".to_vec());
    assert!(a.send(payload));
    wait_until("unmodified delivery", || seen.lock().len() >= 2);
    assert_eq!(seen.lock()[1].0, b"loud");

    a.close();
    b.close();
}

// ============================================================================
// Describe and reporting
// ============================================================================

#[test]
fn test_describe_reports_connections() {
    let stack = stack();
    let a = stack.running_port("/desc-a");
    let b = stack.running_port("/desc-b");
    assert!(a.add_output("/desc-b", false));

    let mut report = String::new();
    a.describe(&mut report);
    assert!(report.contains("This is /desc-a at tcp://127.0.0.1:"));
    assert!(report
        .contains("There is an output connection from /desc-a to /desc-b using tcp"));
    assert!(report.contains("There are no incoming connections"));

    // The receiving side sees the mirror image.
    wait_until("input registration", || b.input_count() == 1);
    let mut report = String::new();
    b.describe(&mut report);
    assert!(report
        .contains("There is an input connection from /desc-a to /desc-b using tcp"));
    assert!(report.contains("There are no outgoing connections"));

    b.close();
    a.close();
}

#[test]
fn test_describe_skips_inputs_with_empty_carrier() {
    let stack = stack();
    let a = stack.running_port("/half-a");

    // A raw connection that never sends its header has no carrier yet;
    // describe treats it as noise.
    let address = a.address();
    let _raw = std::net::TcpStream::connect((address.host.as_str(), address.port))
        .expect("raw connect");
    wait_until("half-open unit registration", || a.event_count() >= 1);

    let mut report = String::new();
    a.describe(&mut report);
    assert!(report.contains("There are no incoming connections"));

    a.close();
}

#[test]
fn test_report_callback_sees_connection_events() {
    struct EventCollector {
        events: Arc<Mutex<Vec<PortInfo>>>,
    }
    impl PortReport for EventCollector {
        fn report(&mut self, info: &PortInfo) {
            self.events.lock().push(info.clone());
        }
    }

    let stack = stack();
    let a = stack.running_port("/ev-a");
    let b = stack.running_port("/ev-b");
    let events = Arc::new(Mutex::new(Vec::new()));
    a.set_report_callback(Box::new(EventCollector {
        events: events.clone(),
    }));

    assert!(a.add_output("/ev-b", false));
    wait_until("output event", || {
        events
            .lock()
            .iter()
            .any(|e| !e.incoming && e.created && e.target_name == "/ev-b")
    });

    b.close();
    a.close();
}

// ============================================================================
// Scheduling admin (Linux scheduler semantics)
// ============================================================================

#[cfg(target_os = "linux")]
#[test]
fn test_sched_prop_set_on_connection() {
    let stack = stack();
    let a = stack.running_port("/sched-a");
    let b = stack.running_port("/sched-b");
    assert!(a.add_output("/sched-b", false));

    // One send guarantees the output worker has started and recorded
    // its thread id.
    let payload: Arc<dyn PortWriter> = Arc::new(b"warmup".to_vec());
    assert!(a.send(payload));

    // SCHED_OTHER (policy 0) at priority 0 needs no privileges.
    let mut cmd = cmd2("prop", "set");
    cmd.add_string("/sched-b");
    let group = cmd.add_list();
    group.add_string("sched");
    let inner = group.add_list();
    let prio = inner.add_list();
    prio.add_string("priority");
    prio.add_int(0);
    let policy = inner.add_list();
    policy.add_string("policy");
    policy.add_int(0);
    let reply = stack.admin("/sched-a", cmd);
    assert_eq!(reply.get(0).as_vocab(), vocab("ok"), "reply: {}", reply);

    let mut cmd = cmd2("prop", "get");
    cmd.add_string("/sched-b");
    let reply = stack.admin("/sched-a", cmd);
    let sched = reply
        .find_group("sched")
        .expect("sched stanza")
        .get(1)
        .as_list()
        .expect("sched props")
        .clone();
    let props = Property::from_bottle(&sched);
    assert!(props.find("tid").as_int() > 0);
    assert_eq!(props.find("policy").as_int(), 0);

    b.close();
    a.close();
}

// ============================================================================
// Name service interplay
// ============================================================================

#[test]
fn test_close_negotiates_input_teardown() {
    let stack = stack();
    let a = stack.running_port("/bye-a");
    let b = stack.running_port("/bye-b");
    assert!(b.add_output("/bye-a", false));
    wait_until("input registration", || a.input_count() == 1);

    // Closing /bye-a asks /bye-b (via the name service) to drop its
    // output first.
    a.close();
    wait_until("peer output teardown", || b.output_count() == 0);
    assert!(stack.names.query("/bye-a").is_none());

    b.close();
}

#[test]
fn test_manual_port_sends_without_listening() {
    let stack = stack();
    let b = stack.port();
    let (reader, seen, _) = CollectingReader::new();
    b.set_read_handler(reader);
    assert!(b.listen(&Contact::new("/man-b", "127.0.0.1", 0, "tcp"), true));
    assert!(b.start());

    let a = stack.port();
    assert!(a.manual_start("/man-a"));
    assert!(a.add_output("/man-b", false));
    let payload: Arc<dyn PortWriter> = Arc::new(b"write-only".to_vec());
    assert!(a.send(payload));
    wait_until("manual delivery", || !seen.lock().is_empty());

    a.close();
    assert!(!a.is_manual());
    b.close();
}
