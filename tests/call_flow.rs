//! End-to-end call flows between engines wired through an in-memory network.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use iax2_protocol::engine::{Engine, EngineConfig};
use iax2_protocol::jitter::PassthroughJitterBuffer;
use iax2_protocol::prelude::{Event, EventKind};
use iax2_protocol::transport::Transport;
use iax2_protocol::wire::command::format;

/// Datagram queues keyed by destination address.
#[derive(Default)]
struct Network {
    queues: HashMap<SocketAddr, VecDeque<(Vec<u8>, SocketAddr)>>,
}

/// A transport endpoint on the shared in-memory network.
struct TestTransport {
    addr: SocketAddr,
    net: Rc<RefCell<Network>>,
}

impl Transport for TestTransport {
    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.net
            .borrow_mut()
            .queues
            .entry(addr)
            .or_default()
            .push_back((buf.to_vec(), self.addr));
        Ok(buf.len())
    }

    fn recv_from(
        &mut self,
        buf: &mut [u8],
        _timeout: Option<Duration>,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        match self
            .net
            .borrow_mut()
            .queues
            .entry(self.addr)
            .or_default()
            .pop_front()
        {
            Some((data, from)) => {
                buf[..data.len()].copy_from_slice(&data);
                Ok(Some((data.len(), from)))
            }
            None => Ok(None),
        }
    }
}

/// A transport endpoint that swallows everything it sends and never
/// receives, for driving frames into retry exhaustion.
struct BlackholeTransport;

impl Transport for BlackholeTransport {
    fn send_to(&mut self, buf: &[u8], _addr: SocketAddr) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn recv_from(
        &mut self,
        _buf: &mut [u8],
        _timeout: Option<Duration>,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        Ok(None)
    }
}

fn engine_with(
    net: &Rc<RefCell<Network>>,
    addr: &str,
    config: EngineConfig,
) -> Engine<TestTransport> {
    let _ = env_logger::builder().is_test(true).try_init();
    let transport = TestTransport {
        addr: addr.parse().unwrap(),
        net: Rc::clone(net),
    };
    Engine::new(
        transport,
        config,
        Box::new(|| Box::new(PassthroughJitterBuffer::new())),
    )
}

fn engine(net: &Rc<RefCell<Network>>, addr: &str) -> Engine<TestTransport> {
    engine_with(net, addr, EngineConfig::default())
}

/// A configuration whose reliable frames give up at their first retry
/// deadline, so exhaustion tests finish quickly.
fn no_retry_config() -> EngineConfig {
    EngineConfig {
        max_retries: 0,
        ..EngineConfig::default()
    }
}

/// Silently lose the next datagram queued toward `addr`.
fn drop_next(net: &Rc<RefCell<Network>>, addr: &str) {
    net.borrow_mut()
        .queues
        .get_mut(&addr.parse().unwrap())
        .and_then(|q| q.pop_front())
        .expect("a datagram to drop");
}

/// Number of datagrams queued toward `addr`.
fn queued(net: &Rc<RefCell<Network>>, addr: &str) -> usize {
    net.borrow()
        .queues
        .get(&addr.parse().unwrap())
        .map_or(0, |q| q.len())
}

/// Drive all engines until a full sweep produces no events and no datagram
/// is left in flight.
fn pump(
    net: &Rc<RefCell<Network>>,
    engines: &mut [(&str, &mut Engine<TestTransport>)],
) -> Vec<(String, Event)> {
    let mut events = Vec::new();
    for _ in 0..200 {
        let mut idle = true;
        for (name, engine) in engines.iter_mut() {
            if let Some(ev) = engine.get_event(false).unwrap() {
                events.push((name.to_string(), ev));
                idle = false;
            }
        }
        let in_flight = net.borrow().queues.values().any(|q| !q.is_empty());
        if idle && !in_flight {
            break;
        }
    }
    events
}

fn find<'a>(
    events: &'a [(String, Event)],
    who: &str,
    pred: impl Fn(&EventKind) -> bool,
) -> Option<&'a Event> {
    events
        .iter()
        .find(|(name, ev)| name == who && pred(&ev.kind))
        .map(|(_, ev)| ev)
}

#[test]
fn test_basic_call_flow() {
    let net = Rc::new(RefCell::new(Network::default()));
    let mut a = engine(&net, "127.0.0.1:4569");
    let mut b = engine(&net, "127.0.0.1:4570");

    let call_a = a
        .call(
            "127.0.0.1:4570/600",
            Some("500"),
            Some("alice"),
            format::ULAW,
            format::AUDIO_MASK,
        )
        .unwrap();

    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    let connect = find(&events, "b", |k| matches!(k, EventKind::Connect(_)))
        .expect("callee should see the call request");
    let call_b = connect.call;
    match &connect.kind {
        EventKind::Connect(req) => {
            assert_eq!(req.called_number.as_deref(), Some("600"));
            assert_eq!(req.calling_number.as_deref(), Some("500"));
            assert_eq!(req.calling_name.as_deref(), Some("alice"));
            assert_eq!(req.format, Some(format::ULAW));
            assert_eq!(req.capability, Some(format::AUDIO_MASK));
        }
        _ => unreachable!(),
    }

    b.accept(call_b, format::ULAW).unwrap();
    b.ring_announce(call_b).unwrap();
    b.answer(call_b).unwrap();

    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    match find(&events, "a", |k| matches!(k, EventKind::Accept { .. })) {
        Some(Event {
            kind: EventKind::Accept { format: f },
            ..
        }) => assert_eq!(*f, format::ULAW),
        _ => panic!("caller should see the accept"),
    }
    assert!(find(&events, "a", |k| matches!(k, EventKind::Ringing)).is_some());
    assert!(find(&events, "a", |k| matches!(k, EventKind::Answer)).is_some());

    // Media and messaging both directions.
    a.send_dtmf(call_a, '5').unwrap();
    a.send_voice(call_a, format::ULAW, &[0x7F; 160]).unwrap();
    a.send_voice(call_a, format::ULAW, &[0x7E; 160]).unwrap();
    b.send_text(call_b, "hello caller").unwrap();

    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    match find(&events, "b", |k| matches!(k, EventKind::Dtmf { .. })) {
        Some(Event {
            kind: EventKind::Dtmf { digit },
            ..
        }) => assert_eq!(*digit, b'5'),
        _ => panic!("callee should see the digit"),
    }
    let voice: Vec<_> = events
        .iter()
        .filter(|(name, ev)| name == "b" && matches!(ev.kind, EventKind::Voice { .. }))
        .collect();
    assert_eq!(voice.len(), 2, "both voice frames should arrive");
    match &voice[0].1.kind {
        EventKind::Voice {
            format: f,
            timestamp,
            data,
        } => {
            assert_eq!(*f, format::ULAW);
            assert!(*timestamp > 0);
            assert_eq!(data.len(), 160);
        }
        _ => unreachable!(),
    }
    match find(&events, "a", |k| matches!(k, EventKind::Text { .. })) {
        Some(Event {
            kind: EventKind::Text { text },
            ..
        }) => assert_eq!(text, "hello caller"),
        _ => panic!("caller should see the text"),
    }

    // Liveness probe is answered without the application's help.
    a.ping(call_a).unwrap();
    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    assert!(find(&events, "a", |k| matches!(k, EventKind::Pong { .. })).is_some());
    assert!(find(&events, "b", |k| matches!(k, EventKind::Ping { .. })).is_none());

    // Lag probe rides the callee's jitter buffer and comes back measured.
    a.lag_request(call_a).unwrap();
    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    assert!(find(&events, "a", |k| matches!(k, EventKind::LagReply { .. })).is_some());

    a.hangup(call_a, Some("Normal Clearing")).unwrap();
    assert_eq!(a.session_count(), 0, "hangup is final on the caller side");
    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    match find(&events, "b", |k| matches!(k, EventKind::Hangup { .. })) {
        Some(Event {
            kind: EventKind::Hangup { cause },
            ..
        }) => assert_eq!(cause.as_deref(), Some("Normal Clearing")),
        _ => panic!("callee should see the hangup"),
    }
    assert_eq!(b.session_count(), 0, "hangup destroys the callee session");
}

#[test]
fn test_reject_destroys_both_sides() {
    let net = Rc::new(RefCell::new(Network::default()));
    let mut a = engine(&net, "127.0.0.1:4569");
    let mut b = engine(&net, "127.0.0.1:4570");

    a.call("127.0.0.1:4570/999", None, None, format::GSM, format::GSM)
        .unwrap();
    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    let call_b = find(&events, "b", |k| matches!(k, EventKind::Connect(_)))
        .expect("callee should see the call request")
        .call;

    b.reject(call_b, Some("busy here")).unwrap();
    assert_eq!(b.session_count(), 0);
    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    match find(&events, "a", |k| matches!(k, EventKind::Reject { .. })) {
        Some(Event {
            kind: EventKind::Reject { cause },
            ..
        }) => assert_eq!(cause.as_deref(), Some("busy here")),
        _ => panic!("caller should see the reject"),
    }
    assert_eq!(a.session_count(), 0);
}

#[test]
fn test_quelch_stops_outbound_voice() {
    let net = Rc::new(RefCell::new(Network::default()));
    let mut a = engine(&net, "127.0.0.1:4569");
    let mut b = engine(&net, "127.0.0.1:4570");

    let call_a = a
        .call(
            "127.0.0.1:4570/1",
            None,
            None,
            format::ULAW,
            format::AUDIO_MASK,
        )
        .unwrap();
    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    let call_b = find(&events, "b", |k| matches!(k, EventKind::Connect(_)))
        .unwrap()
        .call;
    b.accept(call_b, format::ULAW).unwrap();
    b.answer(call_b).unwrap();
    pump(&net, &mut [("a", &mut a), ("b", &mut b)]);

    b.quelch(call_b, true).unwrap();
    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    match find(&events, "a", |k| matches!(k, EventKind::Quelch { .. })) {
        Some(Event {
            kind: EventKind::Quelch { musiconhold },
            ..
        }) => assert!(*musiconhold),
        _ => panic!("caller should see the quelch"),
    }

    // Voice is silently dropped while quelched.
    a.send_voice(call_a, format::ULAW, &[0; 160]).unwrap();
    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    assert!(find(&events, "b", |k| matches!(k, EventKind::Voice { .. })).is_none());

    b.unquelch(call_b).unwrap();
    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    assert!(find(&events, "a", |k| matches!(k, EventKind::Unquelch)).is_some());

    a.send_voice(call_a, format::ULAW, &[0; 160]).unwrap();
    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    assert!(find(&events, "b", |k| matches!(k, EventKind::Voice { .. })).is_some());
}

/// Full supervised transfer: A and B both talk to the supervisor S, the
/// paths are verified endpoint to endpoint, and the call is released so A
/// and B speak directly.
#[test]
fn test_supervised_transfer() {
    let net = Rc::new(RefCell::new(Network::default()));
    let mut a = engine(&net, "127.0.0.1:4569");
    let mut s = engine(&net, "127.0.0.1:4570");
    let mut b = engine(&net, "127.0.0.1:4571");

    // Leg one: A calls S.
    let call_a = a
        .call(
            "127.0.0.1:4570/100",
            None,
            None,
            format::ULAW,
            format::AUDIO_MASK,
        )
        .unwrap();
    let events = pump(&net, &mut [("a", &mut a), ("s", &mut s), ("b", &mut b)]);
    let s_call_a = find(&events, "s", |k| matches!(k, EventKind::Connect(_)))
        .unwrap()
        .call;
    s.accept(s_call_a, format::ULAW).unwrap();
    s.answer(s_call_a).unwrap();

    // Leg two: S calls B.
    let s_call_b = s
        .call(
            "127.0.0.1:4571/200",
            None,
            None,
            format::ULAW,
            format::AUDIO_MASK,
        )
        .unwrap();
    let events = pump(&net, &mut [("a", &mut a), ("s", &mut s), ("b", &mut b)]);
    let call_b = find(&events, "b", |k| matches!(k, EventKind::Connect(_)))
        .unwrap()
        .call;
    b.accept(call_b, format::ULAW).unwrap();
    b.answer(call_b).unwrap();
    pump(&net, &mut [("a", &mut a), ("s", &mut s), ("b", &mut b)]);

    // Hand the bridge over to the endpoints.
    s.setup_transfer(s_call_a, s_call_b).unwrap();
    let events = pump(&net, &mut [("a", &mut a), ("s", &mut s), ("b", &mut b)]);

    assert!(find(&events, "a", |k| matches!(k, EventKind::Transferred)).is_some());
    assert!(find(&events, "b", |k| matches!(k, EventKind::Transferred)).is_some());
    let ready: Vec<_> = events
        .iter()
        .filter(|(name, ev)| name == "s" && matches!(ev.kind, EventKind::TransferReady))
        .collect();
    assert_eq!(ready.len(), 2, "both supervisor legs report release");

    // The endpoints now point at each other.
    assert_eq!(
        a.peer_addr(call_a).unwrap(),
        "127.0.0.1:4571".parse::<SocketAddr>().unwrap()
    );
    assert_eq!(
        b.peer_addr(call_b).unwrap(),
        "127.0.0.1:4569".parse::<SocketAddr>().unwrap()
    );

    // The supervisor drops out entirely.
    s.destroy(s_call_a);
    s.destroy(s_call_b);
    assert_eq!(s.session_count(), 0);

    // Direct signaling and media work on the new path.
    a.send_dtmf(call_a, '#').unwrap();
    a.send_voice(call_a, format::ULAW, &[1; 160]).unwrap();
    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    match find(&events, "b", |k| matches!(k, EventKind::Dtmf { .. })) {
        Some(Event {
            kind: EventKind::Dtmf { digit },
            call,
        }) => {
            assert_eq!(*digit, b'#');
            assert_eq!(*call, call_b);
        }
        _ => panic!("digit should cross the direct path"),
    }
    assert!(find(&events, "b", |k| matches!(k, EventKind::Voice { .. })).is_some());

    // And the call can be torn down directly.
    b.hangup(call_b, None).unwrap();
    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    assert!(find(&events, "a", |k| matches!(k, EventKind::Hangup { .. })).is_some());
    assert_eq!(a.session_count(), 0);
    assert_eq!(b.session_count(), 0);
}

/// A single non-blocking poll must both read a datagram and surface the
/// event it carried, even when dispatch routes it through the jitter
/// buffer; a caller may treat `None` as idle.
#[test]
fn test_queued_event_delivered_by_receiving_poll() {
    let net = Rc::new(RefCell::new(Network::default()));
    let mut a = engine(&net, "127.0.0.1:4569");
    let mut b = engine(&net, "127.0.0.1:4570");

    a.call(
        "127.0.0.1:4570/1",
        None,
        None,
        format::ULAW,
        format::AUDIO_MASK,
    )
    .unwrap();
    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    let call_b = find(&events, "b", |k| matches!(k, EventKind::Connect(_)))
        .unwrap()
        .call;
    b.accept(call_b, format::ULAW).unwrap();
    pump(&net, &mut [("a", &mut a), ("b", &mut b)]);

    b.send_text(call_b, "now").unwrap();
    match a.get_event(false).unwrap() {
        Some(Event {
            kind: EventKind::Text { text },
            ..
        }) => assert_eq!(text, "now"),
        other => panic!("expected the text in the receiving poll, got {other:?}"),
    }
}

/// A lost frame opens a sequence gap: the receiver demands retransmission
/// exactly once, the sender answers with one ordered batch of everything
/// outstanding, and nothing is delivered twice or out of order.
#[test]
fn test_vnak_recovers_dropped_frames_in_order() {
    let net = Rc::new(RefCell::new(Network::default()));
    let mut a = engine(&net, "127.0.0.1:4569");
    let mut b = engine(&net, "127.0.0.1:4570");

    let call_a = a
        .call(
            "127.0.0.1:4570/1",
            None,
            None,
            format::ULAW,
            format::AUDIO_MASK,
        )
        .unwrap();
    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    let call_b = find(&events, "b", |k| matches!(k, EventKind::Connect(_)))
        .unwrap()
        .call;
    b.accept(call_b, format::ULAW).unwrap();
    b.answer(call_b).unwrap();
    pump(&net, &mut [("a", &mut a), ("b", &mut b)]);

    // Three digits; the first one is lost in flight.
    a.send_dtmf(call_a, '1').unwrap();
    a.send_dtmf(call_a, '2').unwrap();
    drop_next(&net, "127.0.0.1:4570");
    a.send_dtmf(call_a, '3').unwrap();

    // The gap produces one retransmission demand; the second frame past
    // the same gap is dropped silently instead of demanding again.
    assert!(b.get_event(false).unwrap().is_none());
    assert!(b.get_event(false).unwrap().is_none());
    assert_eq!(
        queued(&net, "127.0.0.1:4569"),
        1,
        "a repeated gap must not produce a second VNAK"
    );

    // The demand triggers one batch of everything outstanding, in order.
    assert!(a.get_event(false).unwrap().is_none());
    assert_eq!(queued(&net, "127.0.0.1:4570"), 3);

    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    let digits: Vec<u8> = events
        .iter()
        .filter_map(|(name, ev)| match (&ev.kind, name.as_str()) {
            (EventKind::Dtmf { digit }, "b") => Some(*digit),
            _ => None,
        })
        .collect();
    assert_eq!(digits, vec![b'1', b'2', b'3']);
}

/// An ordinary reliable frame that is never acknowledged surfaces a
/// timeout once its retries run out, and leaves teardown to the
/// application.
#[test]
fn test_timeout_after_retry_exhaustion() {
    let mut a = Engine::new(
        BlackholeTransport,
        no_retry_config(),
        Box::new(|| Box::new(PassthroughJitterBuffer::new())),
    );
    let call = a
        .call(
            "127.0.0.1:9/1",
            None,
            None,
            format::ULAW,
            format::AUDIO_MASK,
        )
        .unwrap();

    let mut timeout = None;
    for _ in 0..300 {
        if let Some(ev) = a.get_event(false).unwrap() {
            if matches!(ev.kind, EventKind::Timeout) {
                timeout = Some(ev);
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    let ev = timeout.expect("an unanswered frame must time out");
    assert_eq!(ev.call, call);
    assert_eq!(a.session_count(), 1, "timeout leaves the session standing");
}

/// Final frames are fire-and-forget: the session dies at send time and an
/// unanswered hangup never resurfaces as a timeout.
#[test]
fn test_unanswered_final_frame_stays_silent() {
    let mut a = Engine::new(
        BlackholeTransport,
        no_retry_config(),
        Box::new(|| Box::new(PassthroughJitterBuffer::new())),
    );
    let call = a
        .call(
            "127.0.0.1:9/1",
            None,
            None,
            format::ULAW,
            format::AUDIO_MASK,
        )
        .unwrap();
    a.hangup(call, None).unwrap();
    assert_eq!(a.session_count(), 0);

    std::thread::sleep(Duration::from_millis(250));
    for _ in 0..20 {
        assert!(
            a.get_event(false).unwrap().is_none(),
            "a dead session must not produce events"
        );
    }
}

/// When a transfer probe is never answered, the probing endpoint gives up,
/// tells the supervisor, and both report the transfer as rejected while
/// the original call paths stay up.
#[test]
fn test_transfer_probe_exhaustion_rejects() {
    let net = Rc::new(RefCell::new(Network::default()));
    let mut a = engine_with(&net, "127.0.0.1:4569", no_retry_config());
    let mut s = engine_with(&net, "127.0.0.1:4570", no_retry_config());
    let mut b = engine_with(&net, "127.0.0.1:4571", no_retry_config());

    a.call(
        "127.0.0.1:4570/100",
        None,
        None,
        format::ULAW,
        format::AUDIO_MASK,
    )
    .unwrap();
    let events = pump(&net, &mut [("a", &mut a), ("s", &mut s), ("b", &mut b)]);
    let s_call_a = find(&events, "s", |k| matches!(k, EventKind::Connect(_)))
        .unwrap()
        .call;
    s.accept(s_call_a, format::ULAW).unwrap();
    s.answer(s_call_a).unwrap();

    let s_call_b = s
        .call(
            "127.0.0.1:4571/200",
            None,
            None,
            format::ULAW,
            format::AUDIO_MASK,
        )
        .unwrap();
    let events = pump(&net, &mut [("a", &mut a), ("s", &mut s), ("b", &mut b)]);
    let call_b = find(&events, "b", |k| matches!(k, EventKind::Connect(_)))
        .unwrap()
        .call;
    b.accept(call_b, format::ULAW).unwrap();
    b.answer(call_b).unwrap();
    pump(&net, &mut [("a", &mut a), ("s", &mut s), ("b", &mut b)]);

    // From here on the third party never polls again, so the probe toward
    // it can only expire.
    s.setup_transfer(s_call_a, s_call_b).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    let mut a_rejected = false;
    let mut s_rejected = false;
    while std::time::Instant::now() < deadline && !(a_rejected && s_rejected) {
        for (who, engine) in [(&mut a_rejected, &mut a), (&mut s_rejected, &mut s)] {
            if let Some(ev) = engine.get_event(false).unwrap() {
                if matches!(ev.kind, EventKind::TransferRejected) {
                    *who = true;
                }
            }
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(a_rejected, "the probing endpoint must report the rejection");
    assert!(s_rejected, "the supervisor must learn of the rejection");
    assert_eq!(a.session_count(), 1, "the original leg survives the abort");
}

#[test]
fn test_mini_frames_after_format_lock() {
    let net = Rc::new(RefCell::new(Network::default()));
    let mut a = engine(&net, "127.0.0.1:4569");
    let mut b = engine(&net, "127.0.0.1:4570");

    let call_a = a
        .call(
            "127.0.0.1:4570/1",
            None,
            None,
            format::ULAW,
            format::AUDIO_MASK,
        )
        .unwrap();
    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    let call_b = find(&events, "b", |k| matches!(k, EventKind::Connect(_)))
        .unwrap()
        .call;
    b.accept(call_b, format::ULAW).unwrap();
    b.answer(call_b).unwrap();
    pump(&net, &mut [("a", &mut a), ("b", &mut b)]);

    // A burst of voice: the first frame negotiates the format, the rest
    // ride mini frames. All must arrive, in order, with rising timestamps.
    for i in 0..5u8 {
        a.send_voice(call_a, format::ULAW, &[i; 160]).unwrap();
    }
    let events = pump(&net, &mut [("a", &mut a), ("b", &mut b)]);
    let voice: Vec<_> = events
        .iter()
        .filter_map(|(name, ev)| match (&ev.kind, name.as_str()) {
            (EventKind::Voice { timestamp, data, .. }, "b") => Some((*timestamp, data.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(voice.len(), 5);
    for (i, (ts, data)) in voice.iter().enumerate() {
        assert_eq!(data, &vec![i as u8; 160]);
        if i > 0 {
            assert!(*ts > voice[i - 1].0, "timestamps must rise");
        }
    }
}
