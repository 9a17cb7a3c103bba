//! The blocking socket-table API: `create`/`bind`/`connect`/`listen`/
//! `accept`/`send`/`recv`/`shutdown`/`close`. Every blocking call parks on
//! the target CCB's condvar, exactly like the teacher's `TcpStream`/
//! `TcpListener` (see `examples/maminrayej-handshake/src/tcp/{stream,listen}.rs`);
//! the dispatcher thread (`entity.rs`) is the only writer that ever wakes one.

use std::net::SocketAddr;

use crate::ccb::{Ccb, State};
use crate::entity::{Descriptor, Manager, SimpTcp};
use crate::error::SimpTcpError;
use crate::state;

fn slot<'a>(mgr: &'a Manager, desc: Descriptor) -> Result<&'a Ccb, SimpTcpError> {
    mgr.slots.get(desc).and_then(Option::as_ref).ok_or(SimpTcpError::BadDescriptor)
}

fn slot_mut<'a>(mgr: &'a mut Manager, desc: Descriptor) -> Result<&'a mut Ccb, SimpTcpError> {
    mgr.slots.get_mut(desc).and_then(Option::as_mut).ok_or(SimpTcpError::BadDescriptor)
}

impl SimpTcp {
    /// Allocates a fresh, unbound descriptor in the `CLOSED` state.
    pub fn create(&self) -> Result<Descriptor, SimpTcpError> {
        let mut mgr = self.manager.lock().unwrap();
        let config = mgr.config;
        let idx = mgr.free_slot().ok_or(SimpTcpError::TooManyOpen)?;
        mgr.slots[idx] = Some(Ccb::new(&config));
        Ok(idx)
    }

    /// Confirms `local_addr` against the entity's one bound address. A
    /// descriptor's local endpoint is always the entity's own, since every
    /// connection shares the one real `UdpSocket`; this exists so the API
    /// surface matches an explicit `bind()` rather than an implicit one.
    pub fn bind(&self, desc: Descriptor, local_addr: SocketAddr) -> Result<(), SimpTcpError> {
        let mut mgr = self.manager.lock().unwrap();
        let entity_addr = mgr.local_addr;
        let ccb = slot_mut(&mut mgr, desc)?;
        if ccb.state != State::Closed {
            return Err(SimpTcpError::WrongState);
        }
        if local_addr != entity_addr {
            return Err(SimpTcpError::WrongState);
        }
        Ok(())
    }

    /// `CLOSED -> SYNSENT`, blocking until `ESTABLISHED` or the handshake
    /// exhausts its retransmit budget.
    pub fn connect(&self, desc: Descriptor, remote_addr: SocketAddr) -> Result<(), SimpTcpError> {
        let mut mgr = self.manager.lock().unwrap();
        let local = mgr.local_addr;

        {
            let ccb = slot_mut(&mut mgr, desc)?;
            state::active_open(ccb, local, remote_addr, &self.sock)?;
        }

        let quad = slot(&mgr, desc)?.quad().expect("active_open sets both addrs");
        mgr.by_quad.insert(quad, desc);

        let cond = slot(&mgr, desc)?.cond.clone();
        let mgr = cond
            .wait_while(mgr, |mgr| {
                mgr.slots[desc].as_ref().map(|c| c.state == State::SynSent).unwrap_or(false)
            })
            .unwrap();

        if slot(&mgr, desc)?.failed {
            Err(SimpTcpError::ConnectionFailed)
        } else {
            Ok(())
        }
    }

    /// `CLOSED -> LISTEN`. Never blocks; connections accumulate in the
    /// accept queue until `accept()` is called.
    pub fn listen(&self, desc: Descriptor, backlog: usize) -> Result<(), SimpTcpError> {
        let mut mgr = self.manager.lock().unwrap();
        let local = mgr.local_addr;
        let ccb = slot_mut(&mut mgr, desc)?;
        state::passive_open(ccb, local, backlog)
    }

    /// Blocks until a half-open child is queued, installs it in a fresh
    /// descriptor, sends the deferred SYN+ACK, and waits for the final ACK.
    pub fn accept(&self, desc: Descriptor) -> Result<(Descriptor, SocketAddr), SimpTcpError> {
        let mut mgr = self.manager.lock().unwrap();

        {
            let listener = slot(&mgr, desc)?;
            if listener.state != State::Listen {
                return Err(SimpTcpError::WrongState);
            }
        }

        let listener_cond = slot(&mgr, desc)?.cond.clone();
        mgr = listener_cond
            .wait_while(mgr, |mgr| {
                mgr.slots[desc]
                    .as_ref()
                    .map(|c| c.state == State::Listen && c.accept_queue.is_empty())
                    .unwrap_or(false)
            })
            .unwrap();

        let mut child = {
            let listener = slot_mut(&mut mgr, desc)?;
            if listener.state != State::Listen {
                return Err(SimpTcpError::WrongState);
            }
            listener
                .accept_queue
                .pop_front()
                .expect("accept woke with a non-empty accept queue")
        };

        let remote = child.remote_addr.expect("queued child always has a remote addr");
        let child_desc = mgr.free_slot().ok_or(SimpTcpError::TooManyOpen)?;

        state::begin_accept(&mut child, &self.sock);
        let quad = child.quad().expect("begin_accept requires both addrs");
        let cond = child.cond.clone();
        mgr.slots[child_desc] = Some(child);
        mgr.by_quad.insert(quad, child_desc);

        let mgr = cond
            .wait_while(mgr, |mgr| {
                mgr.slots[child_desc].as_ref().map(|c| c.state == State::SynRcvd).unwrap_or(false)
            })
            .unwrap();

        let failed = slot(&mgr, child_desc)?.failed;
        drop(mgr);

        if failed {
            let mut mgr = self.manager.lock().unwrap();
            mgr.slots[child_desc] = None;
            Err(SimpTcpError::ConnectionFailed)
        } else {
            Ok((child_desc, remote))
        }
    }

    /// Arms the single outstanding data PDU and blocks until it is ACKed.
    /// Only one `send()` may be outstanding at a time: stop-and-wait carries
    /// no pipelining.
    pub fn send(&self, desc: Descriptor, buf: &[u8]) -> Result<usize, SimpTcpError> {
        let mut mgr = self.manager.lock().unwrap();

        {
            let ccb = slot_mut(&mut mgr, desc)?;
            state::send_data(ccb, buf, &self.sock)?;
        }

        let cond = slot(&mgr, desc)?.cond.clone();
        let mgr = cond
            .wait_while(mgr, |mgr| {
                mgr.slots[desc]
                    .as_ref()
                    .map(|c| c.state == State::Established && c.is_outstanding())
                    .unwrap_or(false)
            })
            .unwrap();

        if slot(&mgr, desc)?.failed {
            Err(SimpTcpError::ConnectionFailed)
        } else {
            Ok(buf.len())
        }
    }

    /// Blocks until in-order data arrives or the peer's FIN drains the
    /// buffer. Truncates to `max` and discards the remainder, same as a
    /// datagram socket would.
    pub fn recv(&self, desc: Descriptor, max: usize) -> Result<Vec<u8>, SimpTcpError> {
        let mut mgr = self.manager.lock().unwrap();

        {
            let ccb = slot(&mgr, desc)?;
            if ccb.state == State::Closed {
                return Err(SimpTcpError::WrongState);
            }
        }

        let cond = slot(&mgr, desc)?.cond.clone();
        mgr = cond
            .wait_while(mgr, |mgr| {
                mgr.slots[desc]
                    .as_ref()
                    .map(|c| c.in_payload.is_none() && !c.peer_closed)
                    .unwrap_or(false)
            })
            .unwrap();

        let ccb = slot_mut(&mut mgr, desc)?;
        match ccb.in_payload.take() {
            Some(payload) => {
                let n = std::cmp::min(max, payload.len());
                Ok(payload[..n].to_vec())
            }
            None => Err(SimpTcpError::ConnectionClosed),
        }
    }

    /// `ESTABLISHED -> FINWAIT1` or `CLOSEWAIT -> LASTACK`, blocking until
    /// the local half-close is acknowledged.
    pub fn shutdown(&self, desc: Descriptor) -> Result<(), SimpTcpError> {
        let mut mgr = self.manager.lock().unwrap();

        {
            let ccb = slot_mut(&mut mgr, desc)?;
            state::shutdown(ccb, &self.sock)?;
        }

        let cond = slot(&mgr, desc)?.cond.clone();
        let mgr = cond
            .wait_while(mgr, |mgr| {
                mgr.slots[desc]
                    .as_ref()
                    .map(|c| matches!(c.state, State::FinWait1 | State::LastAck) && !c.failed)
                    .unwrap_or(false)
            })
            .unwrap();

        if slot(&mgr, desc)?.failed {
            Err(SimpTcpError::ConnectionFailed)
        } else {
            Ok(())
        }
    }

    /// Drops the descriptor immediately, regardless of protocol state.
    /// Never blocks and never fails: a half-torn-down connection is simply
    /// abandoned, same as the reference implementation's `close()`.
    pub fn close(&self, desc: Descriptor) -> Result<(), SimpTcpError> {
        let mut mgr = self.manager.lock().unwrap();
        let Some(ccb) = mgr.slots.get(desc).and_then(Option::as_ref) else {
            return Ok(());
        };
        if ccb.state != State::Closed {
            log::warn!("close() on {desc} while still in state {}", ccb.state.name());
        }
        if let Some(quad) = ccb.quad() {
            mgr.by_quad.remove(&quad);
        }
        mgr.slots[desc] = None;
        Ok(())
    }
}
