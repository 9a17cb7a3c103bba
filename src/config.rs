use std::time::Duration;

/// Policy constants for a [`crate::SimpTcp`] entity.
///
/// The reference implementation this protocol is modeled on hardcodes these
/// as literals inside its socket-init routine; here they are a constructible
/// struct so a test harness can shrink `base_rto`/`msl` without touching the
/// state machine.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Maximum number of retransmissions attempted for a single outstanding
    /// PDU before the connection is declared failed.
    pub retransmit_limit: u32,
    /// Base retransmission timeout: how long the dispatcher waits for an ACK
    /// before retransmitting.
    pub base_rto: Duration,
    /// Maximum Segment Lifetime: how long a closed connection lingers in
    /// TIMEWAIT/CLOSING before being reclaimed.
    pub msl: Duration,
    /// Default backlog for `listen()` when the caller doesn't specify one.
    pub accept_backlog_default: usize,
    /// Size of the fixed socket-descriptor table.
    pub max_open_sock: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            retransmit_limit: 5,
            base_rto: Duration::from_millis(1000),
            msl: Duration::from_millis(1000),
            accept_backlog_default: 8,
            max_open_sock: 64,
        }
    }
}
