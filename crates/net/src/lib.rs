//! Framed transport, session protocol and event dispatch for the tunnel.
//!
//! The server terminates many encrypted sessions and bridges plaintext IP
//! datagrams between each of them and one virtual interface; the client
//! drives a single session. Both run as one cooperative event loop.

pub mod client;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod pool;
pub mod server;
pub mod session;
mod signal;

pub use error::{FrameError, NetError};
pub use frame::{FRAME_MAGIC, Frame, HEADER_SIZE, Message, Mode};
pub use handshake::Keyring;
pub use session::{HB_TIMEOUT, INIT_COUNTER};

/// Read buffer for the virtual interface.
pub(crate) const INTERFACE_BUFFER: usize = 2048;
/// Staging buffer for inbound datagrams.
pub(crate) const DATAGRAM_BUFFER: usize = 65_535;
