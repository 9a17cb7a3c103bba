//! End-to-end scenarios over real loopback `UdpSocket` pairs, driving two
//! full `SimpTcp` entities against each other through the blocking API.
//! Each entity is wrapped in an `Arc` purely so test threads can share the
//! handle; the entity itself already serializes access internally.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use simptcp::{Config, Descriptor, SimpTcp};

fn fast_config() -> Config {
    Config {
        retransmit_limit: 5,
        base_rto: Duration::from_millis(30),
        msl: Duration::from_millis(30),
        accept_backlog_default: 4,
        max_open_sock: 16,
    }
}

fn pair() -> (Arc<SimpTcp>, Arc<SimpTcp>) {
    let a = SimpTcp::with_config(fast_config(), "127.0.0.1:0".parse().unwrap()).unwrap();
    let b = SimpTcp::with_config(fast_config(), "127.0.0.1:0".parse().unwrap()).unwrap();
    (Arc::new(a), Arc::new(b))
}

/// Spawns a listener on `server`, connects `client` to it, and returns the
/// (client-side descriptor, server-side descriptor, server-observed remote).
fn handshake(
    client: &Arc<SimpTcp>,
    server: &Arc<SimpTcp>,
) -> (Descriptor, Descriptor, std::net::SocketAddr) {
    let server_addr = server.local_addr();

    let listener = server.create().unwrap();
    server.listen(listener, 4).unwrap();

    let accepted = {
        let server = Arc::clone(server);
        thread::spawn(move || server.accept(listener).unwrap())
    };

    let conn = client.create().unwrap();
    client.connect(conn, server_addr).unwrap();

    let (server_conn, remote) = accepted.join().unwrap();
    (conn, server_conn, remote)
}

/// S1 — happy-path handshake.
#[test]
fn s1_happy_path_handshake() {
    let (client, server) = pair();
    let (_conn, _server_conn, remote) = handshake(&client, &server);
    assert_eq!(remote, client.local_addr());
}

/// S4 — data exchange: A sends, B receives exactly once and echoes back.
#[test]
fn s4_data_exchange() {
    let (a, b) = pair();
    let (a_conn, b_conn, _remote) = handshake(&a, &b);

    let b_recv = {
        let b = Arc::clone(&b);
        thread::spawn(move || b.recv(b_conn, 1500).unwrap())
    };

    let n = a.send(a_conn, b"hello").unwrap();
    assert_eq!(n, 5);

    let payload = b_recv.join().unwrap();
    assert_eq!(payload, b"hello");
}

/// S5 (equivalent, over the real socket pair) — B calling recv twice after
/// only one message was sent must not return stale or duplicate data. The
/// codec-level duplicate-seq handling itself is exercised directly against
/// `state::process_pdu` in `tests/state_scenarios.rs`.
#[test]
fn s4b_second_recv_blocks_until_next_message() {
    let (a, b) = pair();
    let (a_conn, b_conn, _remote) = handshake(&a, &b);

    assert_eq!(a.send(a_conn, b"one").unwrap(), 3);
    assert_eq!(b.recv(b_conn, 1500).unwrap(), b"one");

    let b_recv = {
        let b = Arc::clone(&b);
        thread::spawn(move || b.recv(b_conn, 1500).unwrap())
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!b_recv.is_finished());

    assert_eq!(a.send(a_conn, b"two").unwrap(), 3);
    assert_eq!(b_recv.join().unwrap(), b"two");
}

/// S6 — graceful close initiated by A: A reaches TIMEWAIT then CLOSED, B
/// reaches LASTACK then CLOSED.
#[test]
fn s6_graceful_close() {
    let (a, b) = pair();
    let (a_conn, b_conn, _remote) = handshake(&a, &b);

    let b_shutdown = {
        let b = Arc::clone(&b);
        thread::spawn(move || {
            // B only learns of A's FIN through recv(); a FIN with no
            // payload still wakes recv() so it can observe ConnectionClosed.
            let err = b.recv(b_conn, 1500).unwrap_err();
            assert_eq!(err.to_string(), simptcp::SimpTcpError::ConnectionClosed.to_string());
            b.shutdown(b_conn).unwrap();
        })
    };

    a.shutdown(a_conn).unwrap();
    b_shutdown.join().unwrap();

    // give the TIMEWAIT/LASTACK tails time to settle on both sides.
    thread::sleep(Duration::from_millis(200));
}

/// S7 — simultaneous close: both sides call shutdown before seeing the
/// other's FIN, and both must still converge on CLOSED via CLOSING.
#[test]
fn s7_simultaneous_close() {
    let (a, b) = pair();
    let (a_conn, b_conn, _remote) = handshake(&a, &b);

    let a_thread = {
        let a = Arc::clone(&a);
        thread::spawn(move || a.shutdown(a_conn).unwrap())
    };
    let b_thread = {
        let b = Arc::clone(&b);
        thread::spawn(move || b.shutdown(b_conn).unwrap())
    };

    a_thread.join().unwrap();
    b_thread.join().unwrap();

    thread::sleep(Duration::from_millis(200));
}

/// Property 3 — an event illegal in the current state returns `WrongState`
/// and leaves the CCB untouched.
#[test]
fn illegal_transitions_return_wrong_state() {
    let (a, b) = pair();

    // send() before the handshake has even started.
    let conn = a.create().unwrap();
    let err = a.send(conn, b"too early").unwrap_err();
    assert!(matches!(err, simptcp::SimpTcpError::WrongState));

    // connect() again on an already-ESTABLISHED descriptor.
    let (a_conn, _b_conn, _remote) = handshake(&a, &b);
    let err = a.connect(a_conn, b.local_addr()).unwrap_err();
    assert!(matches!(err, simptcp::SimpTcpError::WrongState));

    // listen() on a descriptor that's already connected.
    let err = a.listen(a_conn, 4).unwrap_err();
    assert!(matches!(err, simptcp::SimpTcpError::WrongState));
}
