#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("segment is malformed: {0}")]
    Malformed(&'static str),

    #[error("peer registry is full")]
    CapacityExceeded,

    #[error("timed out waiting for a segment")]
    Timeout,

    #[error("handshake with peer failed after exhausting retries")]
    HandshakeFailed,

    #[error("transfer failed after exhausting retransmissions")]
    TransferFailed,

    #[error("substrate I/O error: {0}")]
    Substrate(#[from] std::io::Error),
}
