//! Server event dispatch: one cooperative loop multiplexing the virtual
//! interface, the transport endpoint(s), the heartbeat tick and the
//! shutdown signals.

use std::net::Ipv4Addr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use cobalt_tun::Layer;
use futures::stream::{self, SelectAll, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::MissedTickBehavior;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use crate::codec::FrameCodec;
use crate::dispatch::{offset_address, source_address};
use crate::error::{FrameError, NetError};
use crate::frame::{Frame, Message, ServerHello, StreamPayload};
use crate::handshake::{Keyring, answer_key, offer_key, verify_peer};
use crate::pool::SessionPool;
use crate::session::{Session, SessionState};
use crate::signal::ShutdownSignals;
use crate::{DATAGRAM_BUFFER, INTERFACE_BUFFER};

pub struct ServerOptions {
    pub keyring: Keyring,
    /// Base tunnel address; clients receive `router + index`.
    pub router: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub max_clients: usize,
    /// Tick interval in seconds; zero disables the heartbeat.
    pub heartbeat_secs: u64,
    pub layer: Layer,
    pub packet_info: bool,
}

/// What to do with a session after one of its frames was handled.
enum FrameOutcome {
    Keep,
    Drop,
}

/// Serve over the shared datagram socket, demultiplexing peers by their
/// transport address.
pub async fn run_udp<D>(
    mut device: D,
    socket: UdpSocket,
    opts: ServerOptions,
) -> Result<(), NetError>
where
    D: AsyncRead + AsyncWrite + Unpin,
{
    info!(addr = %socket.local_addr()?, "Using stateless connections");
    let socket = Arc::new(socket);
    let mut pool = SessionPool::new();
    let mut signals = ShutdownSignals::new()?;
    let mut heartbeat = make_heartbeat(opts.heartbeat_secs);

    let mut tun_buf = vec![0u8; INTERFACE_BUFFER];
    let mut datagram_buf = vec![0u8; DATAGRAM_BUFFER];

    loop {
        tokio::select! {
            read = device.read(&mut tun_buf) => match read {
                Ok(0) => {
                    warn!("Virtual interface closed");
                    break;
                }
                Ok(n) => dispatch_outbound(&mut pool, &tun_buf[..n], &opts).await,
                Err(err) => warn!(%err, "Cannot read device"),
            },
            received = socket.recv_from(&mut datagram_buf) => match received {
                Ok((n, from)) => {
                    let bytes = &datagram_buf[..n];
                    let frame = match Frame::decode(bytes) {
                        Ok(frame) => frame,
                        Err(err) => {
                            debug!(%from, %err, "Invalid packet, dropped");
                            continue;
                        }
                    };
                    if pool.by_peer_mut(from).is_none() && !admit_datagram(&mut pool, &socket, &opts, from) {
                        continue;
                    }
                    let session = pool.by_peer_mut(from).expect("present or just admitted");
                    let index = session.index;
                    let outcome = handle_frame(session, &mut device, &opts, frame).await;
                    if matches!(outcome, FrameOutcome::Drop) {
                        close_session(&mut pool, index).await;
                    }
                }
                Err(err) => warn!(%err, "Socket receive failed"),
            },
            _ = async { heartbeat.as_mut().expect("guarded").tick().await }, if heartbeat.is_some() => {
                heartbeat_tick(&mut pool, opts.max_clients).await;
            }
            _ = signals.recv() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    shutdown(&mut pool).await;
    Ok(())
}

/// Serve over a listening stream socket, one framed connection per client.
pub async fn run_tcp<D>(
    mut device: D,
    listener: TcpListener,
    opts: ServerOptions,
) -> Result<(), NetError>
where
    D: AsyncRead + AsyncWrite + Unpin,
{
    info!(addr = %listener.local_addr()?, "Using stateful connections");
    let mut pool = SessionPool::new();
    let mut signals = ShutdownSignals::new()?;
    let mut heartbeat = make_heartbeat(opts.heartbeat_secs);
    let mut readers: SelectAll<TaggedFrames> = SelectAll::new();

    let mut tun_buf = vec![0u8; INTERFACE_BUFFER];

    loop {
        tokio::select! {
            read = device.read(&mut tun_buf) => match read {
                Ok(0) => {
                    warn!("Virtual interface closed");
                    break;
                }
                Ok(n) => dispatch_outbound(&mut pool, &tun_buf[..n], &opts).await,
                Err(err) => warn!(%err, "Cannot read device"),
            },
            accepted = listener.accept() => match accepted {
                Ok((tcp, peer)) => {
                    if pool.live() == opts.max_clients {
                        warn!(%peer, "Client rejected");
                        debug!("Maximum number of clients reached");
                        continue;
                    }
                    let (sink, frames) = Framed::new(tcp, FrameCodec).split();
                    let index = pool.next_index();
                    pool.append(Session::stream(index, sink, peer));
                    info!(client = index, %peer, "Connected with client");
                    info!(connected = pool.live(), "Clients connected");
                    readers.push(Box::pin(
                        frames
                            .map(move |result| StreamEvent::Frame(index, result))
                            .chain(stream::once(async move { StreamEvent::Closed(index) })),
                    ));
                }
                Err(err) => warn!(%err, "Accept failed"),
            },
            event = readers.next(), if !readers.is_empty() => match event {
                Some(StreamEvent::Frame(index, Ok(frame))) => {
                    if let Some(session) = pool.by_index_mut(index) {
                        let outcome = handle_frame(session, &mut device, &opts, frame).await;
                        if matches!(outcome, FrameOutcome::Drop) {
                            close_session(&mut pool, index).await;
                        }
                    }
                }
                Some(StreamEvent::Frame(index, Err(err))) => {
                    // A desynchronized stream has no recovery point.
                    debug!(client = index, %err, "Framing error, closing session");
                    close_session(&mut pool, index).await;
                }
                Some(StreamEvent::Closed(index)) => {
                    if pool.by_index_mut(index).is_some() {
                        info!(client = index, "Disconnected");
                        close_session(&mut pool, index).await;
                    }
                }
                None => {}
            },
            _ = async { heartbeat.as_mut().expect("guarded").tick().await }, if heartbeat.is_some() => {
                heartbeat_tick(&mut pool, opts.max_clients).await;
            }
            _ = signals.recv() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    shutdown(&mut pool).await;
    Ok(())
}

enum StreamEvent {
    Frame(u32, Result<Frame, FrameError>),
    Closed(u32),
}

type TaggedFrames = Pin<Box<dyn stream::Stream<Item = StreamEvent> + Send>>;

fn make_heartbeat(secs: u64) -> Option<tokio::time::Interval> {
    (secs > 0).then(|| {
        let mut interval = tokio::time::interval(Duration::from_secs(secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    })
}

/// Admit a datagram from an unknown source, or reject it at the ceiling.
fn admit_datagram(
    pool: &mut SessionPool,
    socket: &Arc<UdpSocket>,
    opts: &ServerOptions,
    from: std::net::SocketAddr,
) -> bool {
    if pool.live() == opts.max_clients {
        warn!(%from, "Client rejected");
        debug!("Maximum number of clients reached");
        return false;
    }
    let index = pool.next_index();
    pool.append(Session::datagram(index, socket.clone(), from));
    info!(client = index, %from, "Connected with client");
    info!(connected = pool.live(), "Clients connected");
    true
}

/// Advance one session by one inbound frame.
async fn handle_frame<D: AsyncWrite + Unpin>(
    session: &mut Session,
    device: &mut D,
    opts: &ServerOptions,
    frame: Frame,
) -> FrameOutcome {
    session.touch();
    let counter = frame.counter;
    trace!(client = session.index, message = %frame.message, counter, "Frame received");

    match frame.message {
        Message::ClientHello(envelope) => match verify_peer(&opts.keyring, &envelope) {
            Ok(peer) => {
                session.peer_static = Some(peer);
                session.state = SessionState::Authenticated;
                info!(client = session.index, "Authentication verified");

                let address = offset_address(opts.router, session.index);
                session.tunnel_addr = Some(address);
                let reply = Message::ServerHello(ServerHello {
                    identity: opts.keyring.identity.clone(),
                    address,
                    netmask: opts.netmask,
                });
                if let Err(err) = session.send(reply).await {
                    warn!(client = session.index, %err, "Cannot send server hello");
                }
                info!(client = session.index, %address, "Assigned tunnel address");
            }
            Err(err) => {
                error!(client = session.index, %err, "Authentication mismatch");
                return FrameOutcome::Drop;
            }
        },
        Message::KeyOffer(offer) => match answer_key(session, &opts.keyring.secret, &offer) {
            Ok(reply) => {
                info!(client = session.index, "Ephemeral key exchanged");
                if let Err(err) = session.send(reply).await {
                    warn!(client = session.index, %err, "Cannot send key answer");
                }
            }
            Err(err) => debug!(client = session.index, %err, "Ephemeral key exchange failed"),
        },
        Message::KeyAnswer(answer) => {
            match crate::handshake::absorb_answer(session, &opts.keyring.secret, &answer) {
                Ok(()) => info!(client = session.index, "Ephemeral key exchanged"),
                Err(err) => debug!(client = session.index, %err, "Ephemeral key exchange failed"),
            }
        }
        Message::Stream(payload) => {
            stream_to_device(session, device, &payload).await;
        }
        Message::Ping => {
            if let Err(err) = session.send(Message::PingBack).await {
                warn!(client = session.index, %err, "Cannot send ping reply");
            }
        }
        Message::PingBack => {
            debug!(client = session.index, "Pingback heartbeat alive");
        }
        Message::ServerHello(_) => {
            debug!(client = session.index, "Request unknown, packet dropped");
        }
    }

    // The peer's counter ran out; rotate the ephemeral keys in the same
    // callback.
    if counter == 1 {
        info!(client = session.index, "Ephemeral keypair expired");
        match offer_key(session, &opts.keyring.secret) {
            Ok(offer) => {
                if let Err(err) = session.send(offer).await {
                    warn!(client = session.index, %err, "Cannot send key offer");
                }
            }
            Err(err) => debug!(client = session.index, %err, "Cannot rotate keys"),
        }
    }

    FrameOutcome::Keep
}

/// Open a sealed tunnel payload and write it to the virtual interface.
/// Decrypt failures and unkeyed sessions drop the frame silently.
async fn stream_to_device<D: AsyncWrite + Unpin>(
    session: &mut Session,
    device: &mut D,
    payload: &StreamPayload,
) {
    let Some(cipher) = session.cipher.as_ref() else {
        debug!(client = session.index, "Unable to decrypt packet");
        return;
    };
    match cipher.open(&payload.nonce, &payload.ciphertext) {
        Ok(plaintext) => {
            if let Err(err) = device.write_all(&plaintext).await {
                warn!(client = session.index, %err, "Cannot write device");
                return;
            }
            session.state = SessionState::Active;
            trace!(client = session.index, bytes = plaintext.len(), "Wrote to interface");
        }
        Err(_) => debug!(client = session.index, "Unable to decrypt packet"),
    }
}

/// Forward one interface read to every matching session.
///
/// Layer-3 interfaces dispatch on the packet's IPv4 source address; a
/// layer-2 interface fans the frame out to every keyed session. The buffer
/// is sealed exactly as read.
async fn dispatch_outbound(pool: &mut SessionPool, buffer: &[u8], opts: &ServerOptions) {
    let source = match opts.layer {
        Layer::L2 => None,
        Layer::L3 => match source_address(buffer, opts.packet_info) {
            Some(source) => Some(source),
            None => {
                debug!("Short interface read, dropped");
                return;
            }
        },
    };

    for session in pool.iter_mut() {
        if let Some(source) = source {
            if session.tunnel_addr != Some(source) {
                continue;
            }
        }
        let Some(cipher) = session.cipher.as_ref() else {
            continue;
        };
        match cipher.seal(buffer) {
            Ok((nonce, ciphertext)) => {
                let message = Message::Stream(StreamPayload { nonce, ciphertext });
                if let Err(err) = session.send(message).await {
                    warn!(client = session.index, %err, "Cannot write to socket");
                }
            }
            Err(err) => warn!(client = session.index, %err, "Cannot seal packet"),
        }
    }
}

/// One heartbeat pass: compact the pool when due, evict expired sessions,
/// ping the rest.
async fn heartbeat_tick(pool: &mut SessionPool, max_clients: usize) {
    if pool.should_rebuild(max_clients) {
        pool.rebuild(max_clients);
        debug!("Rebuilt client pool");
    }

    let mut expired = Vec::new();
    for session in pool.iter_mut() {
        if session.hb_cnt == 0 {
            expired.push(session.index);
            continue;
        }
        session.hb_cnt -= 1;
        debug!(client = session.index, remaining = session.hb_cnt, "Sending ping heartbeat");
        if let Err(err) = session.send(Message::Ping).await {
            warn!(client = session.index, %err, "Pingback failed");
        }
    }

    for index in expired {
        info!(client = index, "Dequeued due to timeout");
        close_session(pool, index).await;
    }
}

async fn close_session(pool: &mut SessionPool, index: u32) {
    if let Some(mut session) = pool.take_by_index(index) {
        session.close().await;
        info!(connected = pool.live(), "Clients connected");
    }
}

/// Graceful shutdown: close every session, erasing key material.
async fn shutdown(pool: &mut SessionPool) {
    info!("Shutting down");
    let indices: Vec<u32> = pool.iter().map(|session| session.index).collect();
    for index in indices {
        if let Some(mut session) = pool.take_by_index(index) {
            session.close().await;
        }
    }
}
