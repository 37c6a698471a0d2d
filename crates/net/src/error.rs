use cobalt_crypto::CryptoError;

/// Wire-level decode failures. A frame failing any of these checks is
/// dropped without touching session state; on a byte stream the connection
/// additionally has no resynchronization point and is closed.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("bad frame magic {0:#06x}")]
    BadMagic(u16),
    #[error("unknown frame mode {0}")]
    UnknownMode(u8),
    #[error("frame truncated")]
    Truncated,
    #[error("frame length mismatch: header says {header}, body is {body}")]
    LengthMismatch { header: usize, body: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Tun(#[from] cobalt_tun::TunError),
    #[error("peer is not authenticated")]
    NotAuthenticated,
    #[error("malformed ephemeral key payload")]
    MalformedEphemeral,
    #[error("cannot resolve host {0}")]
    Resolve(String),
}
