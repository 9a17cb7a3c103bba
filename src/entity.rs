//! The protocol entity: one shared `UdpSocket`, a fixed socket-descriptor
//! table behind a single `Mutex`, and a background dispatcher thread that
//! demultiplexes incoming datagrams and drives the timer scan. Generalizes
//! the teacher's `NetStack`/`segment_loop` (see
//! `examples/maminrayej-handshake/src/lib.rs`) from a tun-device packet loop
//! to a plain UDP recv loop.
//!
//! A single real local address is shared by every connection on an entity,
//! exactly like a normal listening TCP server: connections are told apart by
//! `remote_addr` alone, never by a private local port per descriptor. The
//! reference implementation this protocol is modeled on hands each socket
//! its own local port (`15000 + descriptor`) because it rides directly over
//! IP; layered on top of one shared UDP socket that scheme has nothing to
//! bind to, so `bind()` here only ever confirms the entity's one address.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::ccb::{Ccb, Quad, State};
use crate::config::Config;
use crate::error::SimpTcpError;
use crate::pdu;
use crate::state::{self, Action};

/// Socket-table slot index, handed back by [`SimpTcp::create`].
pub type Descriptor = usize;

pub(crate) struct Manager {
    pub(crate) config: Config,
    pub(crate) local_addr: SocketAddr,
    pub(crate) slots: Vec<Option<Ccb>>,
    pub(crate) by_quad: HashMap<Quad, Descriptor>,
    pub(crate) stray_datagrams: u64,
}

impl Manager {
    fn new(config: Config, local_addr: SocketAddr) -> Self {
        let mut slots = Vec::with_capacity(config.max_open_sock);
        slots.resize_with(config.max_open_sock, || None);
        Manager {
            config,
            local_addr,
            slots,
            by_quad: HashMap::new(),
            stray_datagrams: 0,
        }
    }

    pub(crate) fn free_slot(&self) -> Option<Descriptor> {
        self.slots.iter().position(Option::is_none)
    }
}

/// A bound protocol entity: owns the UDP socket, the socket table, and the
/// dispatcher thread that keeps both alive for as long as this handle lives.
pub struct SimpTcp {
    pub(crate) manager: Arc<Mutex<Manager>>,
    pub(crate) sock: Arc<UdpSocket>,
    dispatcher: Option<JoinHandle<()>>,
}

impl SimpTcp {
    /// Binds a new entity to `local_addr` with default policy constants.
    pub fn bind(local_addr: SocketAddr) -> Result<Self, SimpTcpError> {
        Self::with_config(Config::default(), local_addr)
    }

    /// Binds a new entity with caller-supplied policy constants. Useful for
    /// shrinking `base_rto`/`msl` in tests.
    pub fn with_config(config: Config, local_addr: SocketAddr) -> Result<Self, SimpTcpError> {
        let sock = UdpSocket::bind(local_addr)?;
        let local_addr = sock.local_addr()?;
        let poll_interval = std::cmp::min(config.base_rto, Duration::from_millis(100));
        sock.set_read_timeout(Some(poll_interval))?;

        let sock = Arc::new(sock);
        let manager = Arc::new(Mutex::new(Manager::new(config, local_addr)));

        let dispatcher = {
            let manager = Arc::clone(&manager);
            let sock = Arc::clone(&sock);
            thread::Builder::new()
                .name(format!("simptcp-dispatch-{local_addr}"))
                .spawn(move || dispatch_loop(manager, sock))
                .expect("spawning the dispatcher thread")
        };

        Ok(SimpTcp {
            manager,
            sock,
            dispatcher: Some(dispatcher),
        })
    }

    /// The entity's real, OS-assigned local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.manager.lock().unwrap().local_addr
    }
}

impl Drop for SimpTcp {
    fn drop(&mut self) {
        // The dispatcher loops on an Arc clone of the socket and manager, so
        // it would otherwise outlive this handle. There's no clean
        // wake-and-join primitive for a blocking recv_from, so we detach
        // rather than block the dropping thread; the OS reclaims the socket
        // once the process exits or the last Arc is dropped.
        if let Some(handle) = self.dispatcher.take() {
            drop(handle);
        }
    }
}

fn dispatch_loop(manager: Arc<Mutex<Manager>>, sock: Arc<UdpSocket>) {
    let mut buf = [0u8; 2048];
    loop {
        match sock.recv_from(&mut buf) {
            Ok((n, from)) => handle_datagram(&manager, &sock, &buf[..n], from),
            Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(err) => {
                log::error!("dispatcher socket error, shutting down: {err}");
                return;
            }
        }
        scan_timers(&manager, &sock);
    }
}

fn handle_datagram(manager: &Arc<Mutex<Manager>>, sock: &UdpSocket, bytes: &[u8], from: SocketAddr) {
    let pdu = match pdu::decode(bytes) {
        Ok(pdu) => pdu,
        Err(err) => {
            log::warn!("dropping malformed datagram from {from}: {err}");
            manager.lock().unwrap().stray_datagrams += 1;
            return;
        }
    };

    let mut mgr = manager.lock().unwrap();
    let local = mgr.local_addr;
    let quad = Quad { local, remote: from };

    if let Some(&idx) = mgr.by_quad.get(&quad) {
        let action = {
            let Some(ccb) = mgr.slots[idx].as_mut() else {
                return;
            };
            state::process_pdu(ccb, &pdu, sock)
        };
        apply_action(&mut mgr, idx, action);
        return;
    }

    let listen_idx = mgr.slots.iter().position(|slot| {
        matches!(slot, Some(ccb) if ccb.state == State::Listen && ccb.local_addr == Some(local))
    });

    match listen_idx {
        Some(idx) => {
            let action = {
                let listener = mgr.slots[idx].as_mut().unwrap();
                state::process_listen(listener, quad, &pdu)
            };
            apply_action(&mut mgr, idx, action);
        }
        None => {
            log::debug!("no listener or connection for {quad:?}, dropping");
            mgr.stray_datagrams += 1;
        }
    }
}

fn scan_timers(manager: &Arc<Mutex<Manager>>, sock: &UdpSocket) {
    let mut mgr = manager.lock().unwrap();
    let now = Instant::now();

    let expired: Vec<Descriptor> = mgr
        .slots
        .iter()
        .enumerate()
        .filter_map(|(idx, slot)| slot.as_ref().filter(|ccb| ccb.timer_expired(now)).map(|_| idx))
        .collect();

    for idx in expired {
        let action = {
            let Some(ccb) = mgr.slots[idx].as_mut() else {
                continue;
            };
            state::on_timeout(ccb, sock)
        };
        apply_action(&mut mgr, idx, action);
    }
}

fn apply_action(mgr: &mut Manager, idx: usize, action: Action) {
    match action {
        Action::Noop => {}
        Action::Terminated | Action::Failed => {
            if let Some(ccb) = &mgr.slots[idx] {
                if let Some(quad) = ccb.quad() {
                    mgr.by_quad.remove(&quad);
                }
                ccb.cond.notify_all();
            }
        }
        Action::ChildQueued | Action::Established | Action::WakeReader | Action::WakeWriter | Action::PeerClosed => {
            if let Some(ccb) = &mgr.slots[idx] {
                ccb.cond.notify_all();
            }
        }
    }
}
