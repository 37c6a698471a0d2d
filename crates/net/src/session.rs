//! Per-peer session state.

use std::net::SocketAddr;
use std::sync::Arc;

use cobalt_crypto::{PublicKey, SecretKey, SessionCipher};
use futures::SinkExt;
use futures::stream::SplitSink;
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::codec::Framed;
use tracing::trace;

use crate::codec::FrameCodec;
use crate::error::NetError;
use crate::frame::{Frame, Message};

/// Initial per-session send counter; the peer observing it reach 1 triggers
/// a key rotation.
pub const INIT_COUNTER: u32 = 2048;
/// Heartbeat budget: decremented each tick, reset by any inbound frame,
/// eviction at zero.
pub const HB_TIMEOUT: u8 = 2;

/// Session lifecycle. Any mode is accepted in any state; state only moves
/// along these transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Authenticated,
    Keyed,
    Active,
    Closed,
}

/// Where frames for this peer go: an owned write half of a framed stream,
/// or the shared datagram socket plus the peer's address.
pub enum Endpoint {
    Stream(SplitSink<Framed<TcpStream, FrameCodec>, Frame>),
    Datagram {
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
    },
}

pub struct Session {
    pub index: u32,
    pub state: SessionState,
    endpoint: Endpoint,
    pub peer_addr: SocketAddr,
    /// Peer long-term box key, learned from the verified hello.
    pub peer_static: Option<PublicKey>,
    /// Local ephemeral secret, rotated on every key exchange.
    pub ephemeral: Option<SecretKey>,
    /// Precomputed cipher once the ephemeral exchange completed.
    pub cipher: Option<SessionCipher>,
    packet_cnt: u32,
    pub hb_cnt: u8,
    /// Tunnel address assigned to this peer, in host routing terms.
    pub tunnel_addr: Option<std::net::Ipv4Addr>,
}

impl Session {
    pub fn stream(
        index: u32,
        sink: SplitSink<Framed<TcpStream, FrameCodec>, Frame>,
        peer_addr: SocketAddr,
    ) -> Self {
        Self::new(index, Endpoint::Stream(sink), peer_addr)
    }

    pub fn datagram(index: u32, socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self::new(index, Endpoint::Datagram { socket, peer }, peer)
    }

    fn new(index: u32, endpoint: Endpoint, peer_addr: SocketAddr) -> Self {
        Self {
            index,
            state: SessionState::New,
            endpoint,
            peer_addr,
            peer_static: None,
            ephemeral: None,
            cipher: None,
            packet_cnt: INIT_COUNTER,
            hb_cnt: HB_TIMEOUT,
            tunnel_addr: None,
        }
    }

    /// Any inbound frame proves liveness.
    pub fn touch(&mut self) {
        self.hb_cnt = HB_TIMEOUT;
    }

    /// Both directions reseed the counter when an ephemeral exchange starts
    /// or is answered.
    pub fn reset_counter(&mut self) {
        self.packet_cnt = INIT_COUNTER;
    }

    pub fn remaining_counter(&self) -> u32 {
        self.packet_cnt
    }

    /// Frame and send one message. The wire carries the counter value after
    /// the decrement, so the peer sees what remains.
    pub async fn send(&mut self, message: Message) -> Result<(), NetError> {
        self.packet_cnt = self.packet_cnt.saturating_sub(1);
        let frame = Frame {
            counter: self.packet_cnt,
            message,
        };
        trace!(client = self.index, message = %frame.message, counter = frame.counter, "Sending frame");
        match &mut self.endpoint {
            Endpoint::Stream(sink) => sink.send(frame).await?,
            Endpoint::Datagram { socket, peer } => {
                let bytes = frame.to_bytes();
                socket.send_to(&bytes, *peer).await?;
            }
        }
        Ok(())
    }

    /// Tear the session down: erase key material, close the transport.
    ///
    /// The ephemeral secret and the precomputed cipher both erase their key
    /// bytes when dropped; dropping them here guarantees that happens before
    /// the record itself is released.
    pub async fn close(&mut self) {
        self.ephemeral = None;
        self.cipher = None;
        self.peer_static = None;
        self.state = SessionState::Closed;
        if let Endpoint::Stream(sink) = &mut self.endpoint {
            let _ = sink.close().await;
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("index", &self.index)
            .field("state", &self.state)
            .field("peer_addr", &self.peer_addr)
            .field("keyed", &self.cipher.is_some())
            .field("packet_cnt", &self.packet_cnt)
            .field("hb_cnt", &self.hb_cnt)
            .field("tunnel_addr", &self.tunnel_addr)
            .finish()
    }
}
