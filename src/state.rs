//! The (state, event) -> action/next-state table.
//!
//! Generalizes the teacher's `TCB::on_segment` (a single large match on
//! `self.state` that both mutates the TCB and performs the matching I/O
//! inline, see `examples/maminrayej-handshake/src/tcp/mod.rs`) into one
//! handler per event, still performing I/O inline the same way the teacher
//! does (a handler holds the UDP socket just long enough to send a reply).
//! Bookkeeping that spans more than one CCB (installing a newly-established
//! connection, waking a blocked caller) is reported back as an [`Action`]
//! for the dispatcher/socket-table layer to apply, mirroring the teacher's
//! own `Action` enum.

use std::net::UdpSocket;

use crate::ccb::{Ccb, Quad, State};
use crate::error::SimpTcpError;
use crate::pdu::{self, Pdu, PduFlags};

/// Bookkeeping the caller (dispatcher or socket-table API) must perform
/// after a handler runs, beyond the CCB mutation already applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing beyond what the handler already did to the CCB.
    Noop,
    /// A new half-open child was pushed onto a listener's accept queue;
    /// wake a caller blocked in `accept()`.
    ChildQueued,
    /// This CCB just reached ESTABLISHED; wake a caller blocked in
    /// `connect()` or `accept()`.
    Established,
    /// New in-order data is available; wake a caller blocked in `recv()`.
    WakeReader,
    /// The outstanding PDU was ACKed; wake a caller blocked in `send()`,
    /// `shutdown()`, or `connect()`.
    WakeWriter,
    /// The peer's FIN was accepted; wake a caller blocked in `recv()` so it
    /// can observe `ConnectionClosed` once the buffer drains.
    PeerClosed,
    /// The CCB reached CLOSED through the protocol (not `close()`); the
    /// socket table should drop its demultiplexing entry.
    Terminated,
    /// The retransmit limit was exceeded; wake every blocked caller with
    /// `ConnectionFailed`.
    Failed,
}

fn send_and_arm(ccb: &mut Ccb, flags: PduFlags, payload: &[u8], sock: &UdpSocket) {
    let local = ccb.local_addr.expect("local_addr set before sending");
    let remote = ccb.remote_addr.expect("remote_addr set before sending");

    let seq = ccb.next_seq;
    ccb.next_seq = ccb.next_seq.wrapping_add(1);

    let bytes = pdu::encode(local.port(), remote.port(), seq, ccb.next_ack, flags, payload);
    if let Err(err) = sock.send_to(&bytes, remote) {
        log::warn!("send to {remote} failed: {err}");
    }

    ccb.out_pdu = Some(bytes);
    ccb.arm_timer();
    ccb.stats.pdus_sent += 1;
    log::debug!(
        "{:?} -> {:?} sent seq={seq} ack={} flags={flags:?} len={}",
        local,
        remote,
        ccb.next_ack,
        payload.len()
    );
}

/// Sends a bare ACK reflecting the CCB's current send/receive state.
/// Does not consume a sequence number and is never retransmitted on its own.
fn send_ack(ccb: &Ccb, sock: &UdpSocket) {
    let Some(local) = ccb.local_addr else { return };
    let Some(remote) = ccb.remote_addr else { return };

    let bytes = pdu::encode(
        local.port(),
        remote.port(),
        ccb.next_seq,
        ccb.next_ack,
        PduFlags::ACK,
        &[],
    );
    if let Err(err) = sock.send_to(&bytes, remote) {
        log::warn!("ack to {remote} failed: {err}");
    }
}

/// `CLOSED -> SYNSENT`.
pub fn active_open(
    ccb: &mut Ccb,
    local: std::net::SocketAddr,
    remote: std::net::SocketAddr,
    sock: &UdpSocket,
) -> Result<(), SimpTcpError> {
    if ccb.state != State::Closed {
        return Err(SimpTcpError::WrongState);
    }

    ccb.role = crate::ccb::Role::Client;
    ccb.local_addr = Some(local);
    ccb.remote_addr = Some(remote);
    ccb.next_seq = rand::random();
    ccb.next_ack = 0;
    ccb.state = State::SynSent;

    log::debug!("{local} active_open -> {remote}, SYNSENT");
    send_and_arm(ccb, PduFlags::SYN, &[], sock);
    Ok(())
}

/// `CLOSED -> LISTEN`.
pub fn passive_open(
    ccb: &mut Ccb,
    local: std::net::SocketAddr,
    backlog: usize,
) -> Result<(), SimpTcpError> {
    if ccb.state != State::Closed {
        return Err(SimpTcpError::WrongState);
    }

    ccb.role = crate::ccb::Role::ListeningServer;
    ccb.local_addr = Some(local);
    ccb.accept_backlog = backlog;
    ccb.state = State::Listen;

    log::debug!("{local} passive_open backlog={backlog}, LISTEN");
    Ok(())
}

/// Handles an incoming PDU addressed to a LISTEN socket. Spawns and enqueues
/// a half-open child on a fresh SYN; never replies immediately (the reply is
/// deferred to [`begin_accept`], matching the canonical transition table).
pub fn process_listen(listener: &mut Ccb, quad: Quad, pdu: &Pdu) -> Action {
    if !pdu.syn() {
        return Action::Noop;
    }

    if listener
        .accept_queue
        .iter()
        .any(|child| child.quad() == Some(quad))
    {
        log::debug!("duplicate SYN from {:?} while still queued", quad.remote);
        return Action::Noop;
    }

    if listener.accept_queue.len() >= listener.accept_backlog {
        log::warn!(
            "accept queue full on {:?}, dropping SYN from {:?}",
            quad.local,
            quad.remote
        );
        return Action::Noop;
    }

    let mut child = listener.spawn_child();
    child.role = crate::ccb::Role::AcceptedServer;
    child.state = State::SynRcvd;
    child.local_addr = Some(quad.local);
    child.remote_addr = Some(quad.remote);
    child.next_ack = pdu.seq.wrapping_add(1);
    child.next_seq = rand::random();

    log::debug!("{:?} queued child for {:?}", quad.local, quad.remote);
    listener.accept_queue.push_back(child);
    Action::ChildQueued
}

/// `SYNRCVD` (awaiting the final ACK): sends the deferred SYN+ACK once
/// `accept()` has dequeued the child into its own socket-table slot.
pub fn begin_accept(child: &mut Ccb, sock: &UdpSocket) {
    debug_assert_eq!(child.state, State::SynRcvd);
    send_and_arm(child, PduFlags::SYN | PduFlags::ACK, &[], sock);
}

/// `ESTABLISHED -> ESTABLISHED`: arms the single outstanding data PDU.
pub fn send_data(ccb: &mut Ccb, payload: &[u8], sock: &UdpSocket) -> Result<(), SimpTcpError> {
    if ccb.state != State::Established {
        return Err(SimpTcpError::WrongState);
    }
    if ccb.is_outstanding() {
        return Err(SimpTcpError::WrongState);
    }

    send_and_arm(ccb, PduFlags::ACK, payload, sock);
    Ok(())
}

/// `ESTABLISHED -> FINWAIT1` or `CLOSEWAIT -> LASTACK`.
pub fn shutdown(ccb: &mut Ccb, sock: &UdpSocket) -> Result<(), SimpTcpError> {
    match ccb.state {
        State::Established if !ccb.is_outstanding() => {
            ccb.state = State::FinWait1;
            send_and_arm(ccb, PduFlags::FIN | PduFlags::ACK, &[], sock);
            Ok(())
        }
        State::CloseWait if !ccb.is_outstanding() => {
            ccb.state = State::LastAck;
            send_and_arm(ccb, PduFlags::FIN | PduFlags::ACK, &[], sock);
            Ok(())
        }
        _ => Err(SimpTcpError::WrongState),
    }
}

/// Dispatches an incoming PDU for a non-LISTEN CCB to its state's handler.
pub fn process_pdu(ccb: &mut Ccb, pdu: &Pdu, sock: &UdpSocket) -> Action {
    ccb.stats.pdus_received += 1;

    match ccb.state {
        State::Closed | State::Listen => Action::Noop,

        State::SynSent => {
            if pdu.syn() && pdu.ack_set() && pdu.ack == ccb.next_seq {
                ccb.next_ack = pdu.seq.wrapping_add(1);
                ccb.disarm_timer();
                ccb.state = State::Established;
                send_ack(ccb, sock);
                log::debug!("SYNSENT -> ESTABLISHED ({:?})", ccb.remote_addr);
                Action::Established
            } else {
                Action::Noop
            }
        }

        State::SynRcvd => {
            if pdu.ack_set() && !pdu.syn() && pdu.ack == ccb.next_seq {
                ccb.disarm_timer();
                ccb.state = State::Established;
                log::debug!("SYNRCVD -> ESTABLISHED ({:?})", ccb.remote_addr);
                Action::Established
            } else {
                Action::Noop
            }
        }

        State::Established => process_established(ccb, pdu, sock),

        State::FinWait1 => {
            if pdu.fin() && pdu.seq == ccb.next_ack {
                // simultaneous close: peer's FIN crossed ours, whose ACK
                // hasn't arrived yet. Leave the retransmission timer armed.
                ccb.next_ack = ccb.next_ack.wrapping_add(1);
                send_ack(ccb, sock);
                ccb.state = State::Closing;
                Action::WakeWriter
            } else if pdu.ack_set() && pdu.ack == ccb.next_seq {
                ccb.disarm_timer();
                ccb.state = State::FinWait2;
                Action::WakeWriter
            } else {
                Action::Noop
            }
        }

        State::FinWait2 => {
            if pdu.fin() && pdu.seq == ccb.next_ack {
                ccb.next_ack = ccb.next_ack.wrapping_add(1);
                send_ack(ccb, sock);
                ccb.state = State::TimeWait;
                ccb.arm_msl_timer();
                Action::PeerClosed
            } else {
                Action::Noop
            }
        }

        State::Closing => {
            if pdu.ack_set() && pdu.ack == ccb.next_seq {
                ccb.disarm_timer();
                ccb.state = State::TimeWait;
                ccb.arm_msl_timer();
                Action::WakeWriter
            } else {
                Action::Noop
            }
        }

        State::LastAck => {
            if pdu.ack_set() && pdu.ack == ccb.next_seq {
                ccb.disarm_timer();
                ccb.state = State::Closed;
                Action::Terminated
            } else {
                Action::Noop
            }
        }

        State::CloseWait | State::TimeWait => Action::Noop,
    }
}

fn process_established(ccb: &mut Ccb, pdu: &Pdu, sock: &UdpSocket) -> Action {
    let mut action = Action::Noop;

    if pdu.ack_set() && ccb.is_outstanding() && pdu.ack == ccb.next_seq {
        ccb.disarm_timer();
        action = Action::WakeWriter;
    }

    if !pdu.payload.is_empty() {
        if pdu.seq == ccb.next_ack {
            ccb.in_payload = Some(pdu.payload.clone());
            ccb.next_ack = ccb.next_ack.wrapping_add(1);
            send_ack(ccb, sock);
            action = Action::WakeReader;
        } else {
            // Out of order or a duplicate: the peer is missing our ACK.
            log::debug!(
                "dropping out-of-order data seq={} expected={}",
                pdu.seq,
                ccb.next_ack
            );
            send_ack(ccb, sock);
        }
    }

    if pdu.fin() && pdu.seq == ccb.next_ack {
        ccb.next_ack = ccb.next_ack.wrapping_add(1);
        send_ack(ccb, sock);
        ccb.state = State::CloseWait;
        ccb.peer_closed = true;
        action = Action::PeerClosed;
    }

    action
}

/// Fires when a CCB's retransmission timer (or TIMEWAIT sojourn) expires.
pub fn on_timeout(ccb: &mut Ccb, sock: &UdpSocket) -> Action {
    if ccb.state == State::TimeWait {
        ccb.state = State::Closed;
        ccb.disarm_timer();
        log::debug!("TIMEWAIT -> CLOSED ({:?})", ccb.remote_addr);
        return Action::Terminated;
    }

    if !ccb.is_outstanding() {
        return Action::Noop;
    }

    if ccb.retransmit_count >= ccb.retransmit_limit {
        ccb.failed = true;
        ccb.state = State::Closed;
        ccb.disarm_timer();
        log::error!(
            "{:?} connection failed after {} retransmissions",
            ccb.remote_addr,
            ccb.retransmit_count
        );
        return Action::Failed;
    }

    if let (Some(bytes), Some(remote)) = (ccb.out_pdu.clone(), ccb.remote_addr) {
        if let Err(err) = sock.send_to(&bytes, remote) {
            log::warn!("retransmit to {remote} failed: {err}");
        }
    }
    ccb.retransmit_count += 1;
    ccb.stats.retransmissions += 1;
    ccb.arm_timer();
    log::debug!(
        "{:?} retransmit #{} ({})",
        ccb.remote_addr,
        ccb.retransmit_count,
        ccb.state.name()
    );
    Action::Noop
}
