//! The Connection Control Block: the per-connection record a socket-table
//! slot owns. Generalizes the teacher's `TCB` (see `examples/maminrayej-handshake/src/tcp/tcb.rs`)
//! from a byte-stream sliding window to this protocol's single-PDU
//! stop-and-wait buffers.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar};
use std::time::{Duration, Instant};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unknown,
    Client,
    ListeningServer,
    AcceptedServer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynRcvd,
    Established,
    CloseWait,
    FinWait1,
    FinWait2,
    Closing,
    LastAck,
    TimeWait,
}

impl State {
    pub fn name(self) -> &'static str {
        match self {
            State::Closed => "CLOSED",
            State::Listen => "LISTEN",
            State::SynSent => "SYNSENT",
            State::SynRcvd => "SYNRCVD",
            State::Established => "ESTABLISHED",
            State::CloseWait => "CLOSEWAIT",
            State::FinWait1 => "FINWAIT1",
            State::FinWait2 => "FINWAIT2",
            State::Closing => "CLOSING",
            State::LastAck => "LASTACK",
            State::TimeWait => "TIMEWAIT",
        }
    }
}

/// A connection's endpoint pair, used as the demultiplexing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quad {
    pub local: SocketAddr,
    pub remote: SocketAddr,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub pdus_sent: u64,
    pub pdus_received: u64,
    pub input_errors: u64,
    pub retransmissions: u64,
}

#[derive(Debug)]
pub struct Ccb {
    pub role: Role,
    pub state: State,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,

    /// Next sequence number to stamp on an outgoing SYN/FIN/data PDU.
    pub next_seq: u16,
    /// Next sequence number expected from the peer.
    pub next_ack: u16,

    /// Last-sent PDU, kept verbatim for retransmission.
    pub out_pdu: Option<Vec<u8>>,
    /// Payload of the last in-order data PDU, awaiting `recv()`.
    pub in_payload: Option<Vec<u8>>,

    pub retransmit_count: u32,
    pub timer_deadline: Option<Instant>,
    pub retransmit_limit: u32,
    pub base_rto: Duration,
    pub msl: Duration,

    /// Half-open children a LISTEN socket holds between SYN arrival and
    /// `accept()`. Only populated when `role == ListeningServer`.
    pub accept_queue: VecDeque<Ccb>,
    pub accept_backlog: usize,

    pub stats: Stats,

    /// Set once the retransmit limit is exceeded; the connection is dead and
    /// every blocked caller should observe `ConnectionFailed`.
    pub failed: bool,
    /// Set once the peer's FIN has been accepted; `recv()` reports
    /// `ConnectionClosed` once `in_payload` is drained.
    pub peer_closed: bool,

    /// Signaled by the dispatcher whenever a field a blocked caller might be
    /// waiting on changes. One condvar per connection is enough: stop-and-wait
    /// keeps at most one blocking operation in flight per socket.
    pub cond: Arc<Condvar>,
}

impl Ccb {
    pub fn new(config: &Config) -> Self {
        Ccb {
            role: Role::Unknown,
            state: State::Closed,
            local_addr: None,
            remote_addr: None,
            next_seq: 0,
            next_ack: 0,
            out_pdu: None,
            in_payload: None,
            retransmit_count: 0,
            timer_deadline: None,
            retransmit_limit: config.retransmit_limit,
            base_rto: config.base_rto,
            msl: config.msl,
            accept_queue: VecDeque::new(),
            accept_backlog: config.accept_backlog_default,
            stats: Stats::default(),
            failed: false,
            peer_closed: false,
            cond: Arc::new(Condvar::new()),
        }
    }

    /// A fresh CCB inheriting this listener's policy constants, for a child
    /// spawned on SYN arrival.
    pub fn spawn_child(&self) -> Ccb {
        Ccb {
            role: Role::Unknown,
            state: State::Closed,
            local_addr: None,
            remote_addr: None,
            next_seq: 0,
            next_ack: 0,
            out_pdu: None,
            in_payload: None,
            retransmit_count: 0,
            timer_deadline: None,
            retransmit_limit: self.retransmit_limit,
            base_rto: self.base_rto,
            msl: self.msl,
            accept_queue: VecDeque::new(),
            accept_backlog: self.accept_backlog,
            stats: Stats::default(),
            failed: false,
            peer_closed: false,
            cond: Arc::new(Condvar::new()),
        }
    }

    pub fn quad(&self) -> Option<Quad> {
        Some(Quad {
            local: self.local_addr?,
            remote: self.remote_addr?,
        })
    }

    pub fn arm_timer(&mut self) {
        self.timer_deadline = Some(Instant::now() + self.base_rto);
    }

    pub fn arm_msl_timer(&mut self) {
        self.timer_deadline = Some(Instant::now() + self.msl);
    }

    pub fn disarm_timer(&mut self) {
        self.timer_deadline = None;
        self.retransmit_count = 0;
    }

    pub fn timer_expired(&self, now: Instant) -> bool {
        matches!(self.timer_deadline, Some(deadline) if now >= deadline)
    }

    pub fn is_outstanding(&self) -> bool {
        self.timer_deadline.is_some()
    }
}
