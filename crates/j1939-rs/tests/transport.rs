//! End-to-end transport-protocol tests against in-memory CAN drivers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use j1939_rs::cm::{self, CmControl};
use j1939_rs::pgn::{self, BAM, TP_CM, TP_DT};
use j1939_rs::{
    AbortReason, CanDriver, CanFrame, Clock, Ecu, J1939Error, PRIORITY_DEFAULT, PRIORITY_LOW,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Virtual millisecond clock. Every wait-loop yield advances it by one
/// tick and gives other threads a chance to run, so protocol timeouts
/// fire deterministically without wall-clock delays.
struct TestClock {
    now: AtomicU32,
}

impl TestClock {
    fn new() -> Self {
        Self {
            now: AtomicU32::new(0),
        }
    }

    fn advance(&self, ms: u32) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }

    fn yield_now(&self) {
        self.now.fetch_add(1, Ordering::SeqCst);
        std::thread::yield_now();
    }
}

fn frame(id: u32, body: &[u8]) -> CanFrame {
    let mut data = [0u8; 8];
    data[..body.len()].copy_from_slice(body);
    CanFrame {
        id,
        data,
        len: body.len() as u8,
    }
}

/// Driver that records outgoing frames and answers them through a
/// scripted remote node.
struct ScriptDriver {
    sent: Mutex<Vec<(u32, Vec<u8>)>>,
    rx: Mutex<VecDeque<CanFrame>>,
    script: Box<dyn Fn(u32, &[u8]) -> Vec<CanFrame> + Send + Sync>,
}

impl ScriptDriver {
    fn new<F>(script: F) -> Self
    where
        F: Fn(u32, &[u8]) -> Vec<CanFrame> + Send + Sync + 'static,
    {
        Self {
            sent: Mutex::new(Vec::new()),
            rx: Mutex::new(VecDeque::new()),
            script: Box::new(script),
        }
    }

    fn silent() -> Self {
        Self::new(|_, _| Vec::new())
    }

    fn inject(&self, frame: CanFrame) {
        self.rx.lock().unwrap().push_back(frame);
    }

    fn sent(&self) -> Vec<(u32, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }
}

impl CanDriver for ScriptDriver {
    fn send(&self, id: u32, data: &[u8]) -> Result<(), J1939Error> {
        self.sent.lock().unwrap().push((id, data.to_vec()));
        let replies = (self.script)(id, data);
        self.rx.lock().unwrap().extend(replies);
        Ok(())
    }

    fn receive(&self) -> Result<Option<CanFrame>, J1939Error> {
        Ok(self.rx.lock().unwrap().pop_front())
    }
}

/// Runs `send` on the main thread while a background thread drives the
/// dispatch loop, the way a real host would.
fn with_poll_thread<D, R>(ecu: &Ecu<D, Arc<TestClock>>, send: impl FnOnce() -> R) -> R
where
    D: CanDriver + Sync,
{
    let done = AtomicBool::new(false);
    std::thread::scope(|s| {
        s.spawn(|| {
            while !done.load(Ordering::SeqCst) {
                ecu.poll_once().ok();
                std::thread::yield_now();
            }
        });
        let result = send();
        done.store(true, Ordering::SeqCst);
        result
    })
}

fn noop_callbacks<D: CanDriver, C: Clock>(ecu: &Ecu<D, C>) {
    ecu.setup(|_, _, _, _, _| Ok(()), |_, _, _, _| ()).unwrap();
}

/// Collects delivered chunks and reported errors from the user
/// callbacks.
#[derive(Default)]
struct Collector {
    chunks: Mutex<Vec<u8>>,
    pgns: Mutex<Vec<u32>>,
    errors: Mutex<Vec<(u32, AbortReason)>>,
}

fn install_collector<D: CanDriver, C: Clock>(collector: &Arc<Collector>, ecu: &Ecu<D, C>) {
    let rx = Arc::clone(collector);
    let err = Arc::clone(collector);
    ecu.setup(
        move |pgn, _priority, _src, _dst, chunk| {
            rx.chunks.lock().unwrap().extend_from_slice(chunk);
            rx.pgns.lock().unwrap().push(pgn);
            Ok(())
        },
        move |pgn, _src, _dst, reason| {
            err.errors.lock().unwrap().push((pgn, reason));
        },
    )
    .unwrap();
}

impl Collector {
    fn bytes(&self) -> Vec<u8> {
        self.chunks.lock().unwrap().clone()
    }

    fn reset(&self) {
        self.chunks.lock().unwrap().clear();
        self.pgns.lock().unwrap().clear();
    }
}

#[test]
fn single_frame_send_keeps_pdu2_group_extension() {
    init_logs();
    let ecu = Ecu::new(ScriptDriver::silent(), Arc::new(TestClock::new()));
    noop_callbacks(&ecu);

    let payload = [0xFF, 0xFF, 0x46, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
    ecu.tp_send(0xFEF6, PRIORITY_DEFAULT, 0x80, 0x20, &payload)
        .unwrap();

    // PGN 0xFEF6 is PDU2: the destination must not replace the group
    // extension byte.
    let sent = ecu.driver().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 0x18FEF680);
    assert_eq!(sent[0].1, payload);
    assert!(!ecu.session_active(0x80, 0x20));
}

#[test]
fn oversized_stream_is_rejected() {
    init_logs();
    let ecu = Ecu::new(ScriptDriver::silent(), Arc::new(TestClock::new()));
    noop_callbacks(&ecu);

    let data = vec![0u8; 1786];
    assert_eq!(
        ecu.tp_send(0xFEF6, PRIORITY_DEFAULT, 0x80, 0x20, &data),
        Err(J1939Error::WrongDataLen)
    );
    assert_eq!(
        ecu.bam_send(PRIORITY_DEFAULT, 0x80, &data),
        Err(J1939Error::Args)
    );
    assert_eq!(
        ecu.tp_send(0xFEF6, 8, 0x80, 0x20, &[0u8; 4]),
        Err(J1939Error::Args)
    );
    assert!(ecu.driver().sent().is_empty());
}

/// Scripted remote that grants one CTS window and acknowledges the end
/// of message.
fn accepting_remote(
    window: u8,
    ack_size: u16,
    ack_packets: u8,
) -> impl Fn(u32, &[u8]) -> Vec<CanFrame> + Send + Sync {
    let dt_count = Mutex::new(0u8);
    let cts_granted = Mutex::new(false);
    move |id, data| {
        let (pgn, _priority, src, dst) = pgn::decode_id(id);
        let reply_id = |p| pgn::encode_id(p, PRIORITY_LOW, dst, src);
        if pgn == TP_CM && data[0] == CmControl::Rts as u8 {
            let mut granted = cts_granted.lock().unwrap();
            if !*granted {
                *granted = true;
                return vec![frame(reply_id(TP_CM), &cm::cts(window, 1, cm::embedded_pgn(data.try_into().unwrap())))];
            }
        }
        if pgn == TP_DT {
            let mut count = dt_count.lock().unwrap();
            *count += 1;
            if *count == ack_packets {
                return vec![frame(
                    reply_id(TP_CM),
                    &cm::eom_ack(ack_size, ack_packets, 0xFEF6),
                )];
            }
        }
        Vec::new()
    }
}

#[test]
fn multi_packet_send_completes() {
    init_logs();
    let data: Vec<u8> = (0u8..32).collect();
    let clock = Arc::new(TestClock::new());
    let ecu = Ecu::new(ScriptDriver::new(accepting_remote(5, 32, 5)), clock);
    noop_callbacks(&ecu);

    let result =
        with_poll_thread(&ecu, || ecu.tp_send(0xFEF6, PRIORITY_DEFAULT, 0x80, 0x20, &data));
    assert_eq!(result, Ok(()));
    assert!(!ecu.session_active(0x80, 0x20));

    let sent = ecu.driver().sent();
    assert_eq!(sent.len(), 6);

    // Request to send announcing 32 bytes in 5 packets.
    assert_eq!(sent[0].0, 0x18EC2080);
    assert_eq!(sent[0].1, cm::rts(32, 5, 0xFEF6));

    // Five data frames, sequence numbers 1..=5, last one padded.
    for (i, (id, body)) in sent[1..].iter().enumerate() {
        assert_eq!(*id, 0x1CEB2080);
        assert_eq!(body[0], i as u8 + 1);
    }
    assert_eq!(sent[5].1, vec![5, 28, 29, 30, 31, 0xFF, 0xFF, 0xFF]);
}

#[test]
fn silent_remote_means_busy() {
    init_logs();
    let data: Vec<u8> = (0u8..32).collect();
    let ecu = Ecu::new(ScriptDriver::silent(), Arc::new(TestClock::new()));
    noop_callbacks(&ecu);

    // No dispatch thread needed: nothing will ever answer.
    assert_eq!(
        ecu.tp_send(0xFEF6, PRIORITY_DEFAULT, 0x80, 0x20, &data),
        Err(J1939Error::Busy)
    );
    assert!(!ecu.session_active(0x80, 0x20));

    // Only the RTS went out; no data frames, no abort.
    let sent = ecu.driver().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1[0], CmControl::Rts as u8);
}

#[test]
fn mid_transfer_silence_aborts_with_timeout() {
    init_logs();
    let data: Vec<u8> = (0u8..32).collect();
    let clock = Arc::new(TestClock::new());
    // The remote grants a 3-packet window, then goes silent.
    let ecu = Ecu::new(ScriptDriver::new(accepting_remote(3, 0, 0)), clock);
    noop_callbacks(&ecu);

    let result =
        with_poll_thread(&ecu, || ecu.tp_send(0xFEF6, PRIORITY_DEFAULT, 0x80, 0x20, &data));
    assert_eq!(result, Err(J1939Error::Timeout));
    assert!(!ecu.session_active(0x80, 0x20));

    let sent = ecu.driver().sent();
    // RTS, three data frames, abort.
    assert_eq!(sent.len(), 5);
    assert_eq!(sent[1].1[0], 1);
    assert_eq!(sent[3].1[0], 3);
    let (abort_id, abort_body) = &sent[4];
    assert_eq!(*abort_id, 0x1CEC2080);
    assert_eq!(abort_body[0], CmControl::Abort as u8);
    assert_eq!(abort_body[1], AbortReason::Timeout.to_wire());
}

#[test]
fn eom_mismatch_is_incomplete() {
    init_logs();
    let data: Vec<u8> = (0u8..32).collect();
    let clock = Arc::new(TestClock::new());
    // The remote acknowledges one byte short.
    let ecu = Ecu::new(ScriptDriver::new(accepting_remote(5, 31, 5)), clock);
    noop_callbacks(&ecu);

    let result =
        with_poll_thread(&ecu, || ecu.tp_send(0xFEF6, PRIORITY_DEFAULT, 0x80, 0x20, &data));
    assert_eq!(result, Err(J1939Error::Incomplete));
    assert!(!ecu.session_active(0x80, 0x20));
}

#[test]
fn bam_send_announces_then_paces_data() {
    init_logs();
    let ecu = Ecu::new(ScriptDriver::silent(), Arc::new(TestClock::new()));
    noop_callbacks(&ecu);

    ecu.bam_send(PRIORITY_DEFAULT, 0x80, &[0xAA; 18]).unwrap();

    let sent = ecu.driver().sent();
    assert_eq!(sent.len(), 4);
    assert_eq!(sent[0].0, 0x18ECFF80);
    assert_eq!(sent[0].1, cm::bam(18, 3, BAM));
    for (i, (id, body)) in sent[1..].iter().enumerate() {
        assert_eq!(*id, 0x18EBFF80);
        assert_eq!(body[0], i as u8 + 1);
    }
    // 18 bytes split 7 + 7 + 4; the tail is padding.
    assert_eq!(
        sent[3].1,
        vec![3, 0xAA, 0xAA, 0xAA, 0xAA, 0xFF, 0xFF, 0xFF]
    );
}

#[test]
fn responder_accepts_collects_and_acknowledges() {
    init_logs();
    let data: Vec<u8> = (0u8..32).collect();
    let ecu = Ecu::new(ScriptDriver::silent(), Arc::new(TestClock::new()));
    let collector = Arc::new(Collector::default());
    install_collector(&collector, &ecu);

    // Remote 0x30 announces 32 bytes of PGN 0xFEF6 for us (0x25).
    let cm_in = pgn::encode_id(TP_CM, PRIORITY_DEFAULT, 0x30, 0x25);
    let dt_in = pgn::encode_id(TP_DT, PRIORITY_LOW, 0x30, 0x25);
    ecu.driver().inject(frame(cm_in, &cm::rts(32, 5, 0xFEF6)));
    assert_eq!(ecu.poll_once(), Ok(8));
    assert!(ecu.session_active(0x30, 0x25));

    let sent = ecu.driver().sent();
    assert_eq!(sent[0].0, 0x1CEC3025);
    assert_eq!(sent[0].1, cm::cts(5, 1, 0xFEF6));

    for seqno in 1u8..=5 {
        let offset = (seqno as usize - 1) * 7;
        let mut body = vec![seqno];
        body.extend_from_slice(&data[offset..(offset + 7).min(32)]);
        body.resize(8, 0xFF);
        ecu.driver().inject(frame(dt_in, &body));
        assert_eq!(ecu.poll_once(), Ok(8));
    }

    assert_eq!(collector.bytes(), data);
    assert!(collector.pgns.lock().unwrap().iter().all(|&p| p == 0xFEF6));
    assert!(!ecu.session_active(0x30, 0x25));

    let sent = ecu.driver().sent();
    assert_eq!(sent.last().unwrap().0, 0x1CEC3025);
    assert_eq!(sent.last().unwrap().1, cm::eom_ack(32, 5, 0xFEF6));
}

#[test]
fn second_rts_for_same_peer_is_refused() {
    init_logs();
    let ecu = Ecu::new(ScriptDriver::silent(), Arc::new(TestClock::new()));
    let collector = Arc::new(Collector::default());
    install_collector(&collector, &ecu);

    let cm_in = pgn::encode_id(TP_CM, PRIORITY_DEFAULT, 0x30, 0x25);
    ecu.driver().inject(frame(cm_in, &cm::rts(32, 5, 0xFEF6)));
    ecu.driver().inject(frame(cm_in, &cm::rts(64, 10, 0xFEF6)));
    ecu.poll_once().unwrap();
    ecu.poll_once().unwrap();

    let sent = ecu.driver().sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].1[0], CmControl::Abort as u8);
    assert_eq!(sent[1].1[1], AbortReason::NoResource.to_wire());
}

#[test]
fn received_abort_reports_and_closes() {
    init_logs();
    let ecu = Ecu::new(ScriptDriver::silent(), Arc::new(TestClock::new()));
    let collector = Arc::new(Collector::default());
    install_collector(&collector, &ecu);

    let cm_in = pgn::encode_id(TP_CM, PRIORITY_DEFAULT, 0x30, 0x25);
    ecu.driver().inject(frame(cm_in, &cm::rts(32, 5, 0xFEF6)));
    ecu.poll_once().unwrap();
    assert!(ecu.session_active(0x30, 0x25));

    ecu.driver()
        .inject(frame(cm_in, &cm::abort(AbortReason::Busy.to_wire(), 0xFEF6)));
    ecu.poll_once().unwrap();

    assert!(!ecu.session_active(0x30, 0x25));
    let errors = collector.errors.lock().unwrap();
    assert_eq!(errors.as_slice(), &[(0xFEF6, AbortReason::Busy)]);
}

#[test]
fn bam_reception_reassembles_broadcast() {
    init_logs();
    let ecu = Ecu::new(ScriptDriver::silent(), Arc::new(TestClock::new()));
    let collector = Arc::new(Collector::default());
    install_collector(&collector, &ecu);

    let cm_in = pgn::encode_id(TP_CM, PRIORITY_DEFAULT, 0x44, 0xFF);
    let dt_in = pgn::encode_id(TP_DT, PRIORITY_DEFAULT, 0x44, 0xFF);
    ecu.driver().inject(frame(cm_in, &cm::bam(18, 3, BAM)));
    ecu.poll_once().unwrap();
    assert!(ecu.session_active(0x44, 0xFF));

    let payload = [0x5A; 18];
    for seqno in 1u8..=3 {
        let offset = (seqno as usize - 1) * 7;
        let mut body = vec![seqno];
        body.extend_from_slice(&payload[offset..(offset + 7).min(18)]);
        body.resize(8, 0xFF);
        ecu.driver().inject(frame(dt_in, &body));
        ecu.poll_once().unwrap();
    }

    assert_eq!(collector.bytes(), payload);
    assert!(collector.pgns.lock().unwrap().iter().all(|&p| p == BAM));
    assert!(!ecu.session_active(0x44, 0xFF));
    // Broadcasts are never acknowledged.
    assert!(ecu.driver().sent().is_empty());
}

#[test]
fn stalled_receive_session_is_reclaimed() {
    init_logs();
    let clock = Arc::new(TestClock::new());
    let ecu = Ecu::new(ScriptDriver::silent(), Arc::clone(&clock));
    let collector = Arc::new(Collector::default());
    install_collector(&collector, &ecu);

    let cm_in = pgn::encode_id(TP_CM, PRIORITY_DEFAULT, 0x30, 0x25);
    ecu.driver().inject(frame(cm_in, &cm::rts(32, 5, 0xFEF6)));
    ecu.poll_once().unwrap();
    assert!(ecu.session_active(0x30, 0x25));

    // Nothing arrives within T2.
    clock.advance(1300);
    ecu.poll_once().unwrap();

    assert!(!ecu.session_active(0x30, 0x25));
    let sent = ecu.driver().sent();
    assert_eq!(sent.last().unwrap().1[0], CmControl::Abort as u8);
    assert_eq!(sent.last().unwrap().1[1], AbortReason::Timeout.to_wire());
    let errors = collector.errors.lock().unwrap();
    assert_eq!(errors.as_slice(), &[(0xFEF6, AbortReason::Timeout)]);
}

#[test]
fn unmatched_frames_are_dropped_with_length() {
    init_logs();
    let ecu = Ecu::new(ScriptDriver::silent(), Arc::new(TestClock::new()));
    noop_callbacks(&ecu);

    let id = pgn::encode_id(0xFECA, PRIORITY_DEFAULT, 0x10, 0xFF);
    ecu.driver().inject(frame(id, &[1, 2, 3]));
    assert_eq!(ecu.poll_once(), Ok(3));
    assert_eq!(ecu.poll_once(), Ok(0));
}

#[test]
fn registered_pgn_callback_is_invoked() {
    init_logs();
    let ecu = Ecu::new(ScriptDriver::silent(), Arc::new(TestClock::new()));
    noop_callbacks(&ecu);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    ecu.register_pgn(0xFEEE, 0, move |pgn, _pri, src, _dst, payload| {
        sink.lock().unwrap().push((pgn, src, payload.to_vec()));
        Ok(())
    })
    .unwrap();

    let id = pgn::encode_id(0xFEEE, PRIORITY_DEFAULT, 0x10, 0xFF);
    ecu.driver().inject(frame(id, &[0xDE, 0xAD]));
    assert_eq!(ecu.poll_once(), Ok(2));
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[(0xFEEE, 0x10, vec![0xDE, 0xAD])]
    );

    ecu.deregister_pgn(0xFEEE, 0).unwrap();
    ecu.driver().inject(frame(id, &[0xDE, 0xAD]));
    assert_eq!(ecu.poll_once(), Ok(2));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn address_claim_sequence() {
    init_logs();
    let ecu = Ecu::new(ScriptDriver::silent(), Arc::new(TestClock::new()));
    let name = j1939_rs::EcuName {
        identity_number: 0x1234,
        manufacturer_code: 0x55,
        ..Default::default()
    };

    ecu.address_claim(0x42, name).unwrap();
    let sent = ecu.driver().sent();
    assert_eq!(sent.len(), 2);
    // Request for address claimed: the AC PGN, low byte first.
    assert_eq!(sent[0].0, 0x18EAFF42);
    assert_eq!(sent[0].1, vec![0x00, 0xEE, 0x00]);
    // The claim itself carries the NAME big-endian.
    assert_eq!(sent[1].0, 0x18EEFF42);
    assert_eq!(sent[1].1, name.to_wire().to_vec());
}

#[test]
fn random_identifiers_roundtrip() {
    init_logs();
    let mut rng = StdRng::seed_from_u64(0x1939);
    for _ in 0..1000 {
        let pgn_value = rng.random::<u32>() & pgn::PGN_MASK;
        let priority = rng.random_range(0..=7u8);
        let src = rng.random::<u8>();
        let dst = rng.random::<u8>();
        let id = pgn::encode_id(pgn_value, priority, src, dst);

        assert_eq!((id >> 26) & 0x7, priority as u32);
        assert_eq!(id & 0xFF, src as u32);

        let (rpgn, rpriority, rsrc, rdst) = pgn::decode_id(id);
        assert_eq!(rpriority, priority);
        assert_eq!(rsrc, src);
        if pgn::is_p2p(pgn_value) {
            assert_eq!(rpgn, pgn_value & !0xFF);
            assert_eq!(rdst, dst);
        } else {
            assert_eq!(rpgn, pgn_value);
            assert_eq!(rdst, j1939_rs::ADDRESS_NULL);
        }
    }
}

/// One direction of the in-memory bus.
#[derive(Default)]
struct Link {
    frames: Mutex<VecDeque<CanFrame>>,
}

/// A node's attachment to the two-node bus.
struct Endpoint {
    out: Arc<Link>,
    inbound: Arc<Link>,
}

impl CanDriver for Endpoint {
    fn send(&self, id: u32, data: &[u8]) -> Result<(), J1939Error> {
        self.out.lock_push(frame(id, data));
        Ok(())
    }

    fn receive(&self) -> Result<Option<CanFrame>, J1939Error> {
        Ok(self.inbound.frames.lock().unwrap().pop_front())
    }
}

impl Link {
    fn lock_push(&self, frame: CanFrame) {
        self.frames.lock().unwrap().push_back(frame);
    }
}

#[test]
fn loopback_transfers_random_payloads() {
    init_logs();
    let a_to_b = Arc::new(Link::default());
    let b_to_a = Arc::new(Link::default());
    let clock = Arc::new(TestClock::new());

    let node_a = Ecu::new(
        Endpoint {
            out: Arc::clone(&a_to_b),
            inbound: Arc::clone(&b_to_a),
        },
        Arc::clone(&clock),
    );
    let node_b = Ecu::new(
        Endpoint {
            out: Arc::clone(&b_to_a),
            inbound: Arc::clone(&a_to_b),
        },
        Arc::clone(&clock),
    );
    noop_callbacks(&node_a);
    let collector = Arc::new(Collector::default());
    install_collector(&collector, &node_b);

    let mut rng = StdRng::seed_from_u64(0xECF00D);
    let done = AtomicBool::new(false);
    let done = &done;
    std::thread::scope(|s| {
        for node in [&node_a, &node_b] {
            s.spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    if let Ok(0) = node.poll_once() {
                        std::thread::yield_now();
                    }
                }
            });
        }

        for len in [9usize, 64, 431, 1785] {
            let data: Vec<u8> = (0..len).map(|_| rng.random()).collect();
            collector.reset();
            node_a
                .tp_send(0xFEF6, PRIORITY_DEFAULT, 0x80, 0x20, &data)
                .unwrap();
            assert_eq!(collector.bytes(), data, "payload of {len} bytes");
            assert!(!node_a.session_active(0x80, 0x20));
            // The responder closes just after queueing its EOM
            // acknowledgement; give its dispatch thread a moment.
            for _ in 0..10_000 {
                if !node_b.session_active(0x80, 0x20) {
                    break;
                }
                std::thread::yield_now();
            }
            assert!(!node_b.session_active(0x80, 0x20));
        }
        done.store(true, Ordering::SeqCst);
    });
}
