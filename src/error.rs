use std::io;

/// Errors surfaced at the socket API boundary.
///
/// Codec-level failures (`BadChecksum`, `Truncated`, `BadHeader`) never reach
/// here: they are counted in a CCB's `input_errors` statistic and the
/// offending datagram is dropped by the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum SimpTcpError {
    #[error("operation is illegal in the socket's current state")]
    WrongState,

    #[error("socket table is full, no free descriptor available")]
    TooManyOpen,

    #[error("connection failed after exhausting the retransmission limit")]
    ConnectionFailed,

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("invalid socket descriptor")]
    BadDescriptor,

    #[error("datagram channel error: {0}")]
    Io(#[from] io::Error),
}

/// Codec-internal validation failures. Never surfaced to an
/// application; the dispatcher counts them and drops the datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PduError {
    #[error("datagram shorter than the PDU's declared total length")]
    Truncated,

    #[error("header_len or total_len field is inconsistent")]
    BadHeader,

    #[error("checksum does not match the PDU contents")]
    BadChecksum,
}
