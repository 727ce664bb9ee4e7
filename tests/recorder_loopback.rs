//! ---
//! uev_section: "15-testing-qa-runbook"
//! uev_subsection: "integration-tests"
//! uev_type: "source"
//! uev_scope: "code"
//! uev_description: "End-to-end session against a ZeroMQ reply socket and a UDP recorder."
//! uev_version: "v0.1.0"
//! uev_owner: "tbd"
//! ---
use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::Duration;

use uev_common::time::SessionClock;
use uev_msg::frame::{encode_ack, TTL_FRAME_LEN};
use uev_msg::{EventsError, LineNumber, LineState, RealChannel, SoftChannel, SyncCoordinator};

/// Serve `count` requests on a REP socket, replying "TTL received".
fn spawn_reply_peer(count: usize) -> (String, thread::JoinHandle<Vec<String>>) {
    let context = zmq::Context::new();
    let socket = context.socket(zmq::REP).expect("rep socket");
    socket.bind("tcp://127.0.0.1:*").expect("rep bind");
    let endpoint = socket
        .get_last_endpoint()
        .expect("endpoint")
        .expect("utf-8 endpoint");
    let handle = thread::spawn(move || {
        let _context = context;
        let mut seen = Vec::with_capacity(count);
        for _ in 0..count {
            let request = socket
                .recv_string(0)
                .expect("recv")
                .expect("utf-8 request");
            socket.send("TTL received", 0).expect("reply");
            seen.push(request);
        }
        seen
    });
    (endpoint, handle)
}

fn udp_recorder() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("recorder bind");
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("recorder timeout");
    let addr = socket.local_addr().expect("recorder addr");
    (socket, addr)
}

#[test]
fn sync_pair_over_zeromq_and_udp() {
    let (endpoint, peer) = spawn_reply_peer(1);
    let (recorder, recorder_addr) = udp_recorder();

    let mut real = RealChannel::open(&endpoint).expect("real channel");
    let mut soft =
        SoftChannel::open("127.0.0.1:0".parse().expect("addr"), recorder_addr).expect("soft");
    let mut coordinator = SyncCoordinator::new(&mut real, &mut soft, SessionClock::start());

    let pair = coordinator
        .emit_sync(LineNumber::new(3), LineState::High)
        .expect("sync pair");
    assert_eq!(pair.real_reply, "TTL received");

    let mut buf = [0u8; 64];
    let (len, from) = recorder.recv_from(&mut buf).expect("soft frame");
    assert_eq!(len, TTL_FRAME_LEN);
    assert_eq!(buf[0], 1);
    assert_eq!(buf[9], 3);
    assert_eq!(buf[10], 1);
    let stamped = f64::from_le_bytes(buf[1..9].try_into().expect("timestamp bytes"));
    assert_eq!(stamped, pair.soft_timestamp);

    recorder.send_to(&encode_ack(99.0), from).expect("ack");
    let ack = coordinator
        .drain_ack(Duration::from_secs(5))
        .expect("drain");
    assert_eq!(ack.value, 99.0);

    assert_eq!(
        peer.join().expect("peer thread"),
        vec!["TTL Line=4 State=1".to_owned()]
    );
}

#[test]
fn alternating_sync_states_keep_request_reply_in_lockstep() {
    let (endpoint, peer) = spawn_reply_peer(3);
    let (recorder, recorder_addr) = udp_recorder();
    let mut real = RealChannel::open(&endpoint).expect("real channel");
    let mut soft =
        SoftChannel::open("127.0.0.1:0".parse().expect("addr"), recorder_addr).expect("soft");
    let mut coordinator = SyncCoordinator::new(&mut real, &mut soft, SessionClock::start());

    let mut buf = [0u8; 64];
    for group in 0..3u32 {
        let state = LineState::from(group % 2 == 1);
        coordinator
            .emit_sync(LineNumber::new(0), state)
            .expect("sync");
        let (_, from) = recorder.recv_from(&mut buf).expect("frame");
        assert_eq!(buf[10], state.wire());
        recorder
            .send_to(&encode_ack(f64::from(group)), from)
            .expect("ack");
        coordinator
            .drain_ack(Duration::from_secs(5))
            .expect("ack");
    }

    assert_eq!(
        peer.join().expect("peer thread"),
        vec![
            "TTL Line=1 State=0".to_owned(),
            "TTL Line=1 State=1".to_owned(),
            "TTL Line=1 State=0".to_owned(),
        ]
    );
    assert_eq!(coordinator.counters().sync_pairs, 3);
}

#[test]
fn malformed_endpoint_fails_at_open() {
    assert!(matches!(
        RealChannel::open("not-a-transport://x"),
        Err(EventsError::Connect { .. })
    ));
}
