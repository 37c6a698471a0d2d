//! Client event dispatch: a single session against the server, the virtual
//! interface configured from the server's hello.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use cobalt_tun::{AsyncDevice, DeviceConfig, Layer};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use crate::codec::FrameCodec;
use crate::error::NetError;
use crate::frame::{Frame, Message, StreamPayload};
use crate::handshake::{Keyring, answer_key, offer_key, verify_peer};
use crate::session::{Session, SessionState};
use crate::signal::ShutdownSignals;
use crate::{DATAGRAM_BUFFER, INTERFACE_BUFFER};

pub struct ClientOptions {
    pub keyring: Keyring,
    pub interface: String,
    pub layer: Layer,
    pub packet_info: bool,
    pub mtu: Option<u16>,
}

/// Resolve the server host to an IPv4 transport address.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, NetError> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| NetError::Resolve(host.to_string()))?;
    addrs
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| NetError::Resolve(host.to_string()))
}

/// Connect over the stateless transport.
pub async fn run_udp(remote: SocketAddr, opts: ClientOptions) -> Result<(), NetError> {
    let socket = Arc::new(UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?);
    let mut session = Session::datagram(0, socket.clone(), remote);
    info!(%remote, "Using stateless connection");
    hello(&mut session, &opts).await?;

    let mut device: Option<AsyncDevice> = None;
    let mut signals = ShutdownSignals::new()?;
    let mut tun_buf = vec![0u8; INTERFACE_BUFFER];
    let mut datagram_buf = vec![0u8; DATAGRAM_BUFFER];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut datagram_buf) => match received {
                Ok((n, from)) => {
                    if from != remote {
                        debug!(%from, "Datagram from unknown source, dropped");
                        continue;
                    }
                    match Frame::decode(&datagram_buf[..n]) {
                        Ok(frame) => handle_frame(&mut session, &mut device, &opts, frame).await?,
                        Err(err) => debug!(%err, "Invalid packet, dropped"),
                    }
                }
                Err(err) => warn!(%err, "Socket receive failed"),
            },
            read = async { device.as_mut().expect("guarded").read(&mut tun_buf).await }, if device.is_some() => match read {
                Ok(0) => {
                    warn!("Virtual interface closed");
                    break;
                }
                Ok(n) => forward_to_server(&mut session, &tun_buf[..n]).await,
                Err(err) => warn!(%err, "Cannot read device"),
            },
            _ = signals.recv() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    session.close().await;
    Ok(())
}

/// Connect over the stream transport. The loop ends when the server closes
/// the connection.
pub async fn run_tcp(remote: SocketAddr, opts: ClientOptions) -> Result<(), NetError> {
    let tcp = TcpStream::connect(remote).await?;
    info!(%remote, "Connected to server");
    let (sink, mut frames) = Framed::new(tcp, FrameCodec).split();
    let mut session = Session::stream(0, sink, remote);
    hello(&mut session, &opts).await?;

    let mut device: Option<AsyncDevice> = None;
    let mut signals = ShutdownSignals::new()?;
    let mut tun_buf = vec![0u8; INTERFACE_BUFFER];

    loop {
        tokio::select! {
            next = frames.next() => match next {
                Some(Ok(frame)) => handle_frame(&mut session, &mut device, &opts, frame).await?,
                Some(Err(err)) => {
                    warn!(%err, "Framing error, disconnecting");
                    break;
                }
                None => {
                    info!("Server disconnected");
                    break;
                }
            },
            read = async { device.as_mut().expect("guarded").read(&mut tun_buf).await }, if device.is_some() => match read {
                Ok(0) => {
                    warn!("Virtual interface closed");
                    break;
                }
                Ok(n) => forward_to_server(&mut session, &tun_buf[..n]).await,
                Err(err) => warn!(%err, "Cannot read device"),
            },
            _ = signals.recv() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    session.close().await;
    Ok(())
}

/// Introduce ourselves: a liveness ping followed by the identity envelope.
async fn hello(session: &mut Session, opts: &ClientOptions) -> Result<(), NetError> {
    session.send(Message::Ping).await?;
    session
        .send(Message::ClientHello(opts.keyring.identity.clone()))
        .await?;
    Ok(())
}

/// Advance the client session by one inbound frame.
///
/// Only a failure to create the virtual interface is fatal; everything else
/// is logged and the loop keeps running.
async fn handle_frame(
    session: &mut Session,
    device: &mut Option<AsyncDevice>,
    opts: &ClientOptions,
    frame: Frame,
) -> Result<(), NetError> {
    session.touch();
    trace!(message = %frame.message, counter = frame.counter, "Frame received");

    match frame.message {
        Message::ServerHello(hello) => match verify_peer(&opts.keyring, &hello.identity) {
            Ok(peer) => {
                session.peer_static = Some(peer);
                session.state = SessionState::Authenticated;
                info!("Server authentication verified");

                let mut config = DeviceConfig::new(&opts.interface, opts.layer);
                config.address = Some(hello.address);
                config.netmask = Some(hello.netmask);
                config.mtu = opts.mtu;
                config.packet_info = opts.packet_info;
                *device = Some(cobalt_tun::create(&config)?);
                session.tunnel_addr = Some(hello.address);
                info!(address = %hello.address, netmask = %hello.netmask, "Assigned tunnel address");

                match offer_key(session, &opts.keyring.secret) {
                    Ok(offer) => send_or_warn(session, offer).await,
                    Err(err) => warn!(%err, "Cannot start key exchange"),
                }
            }
            Err(err) => error!(%err, "Server authentication mismatch"),
        },
        Message::KeyOffer(offer) => match answer_key(session, &opts.keyring.secret, &offer) {
            Ok(reply) => {
                info!("Ephemeral key exchanged");
                send_or_warn(session, reply).await;
            }
            Err(err) => debug!(%err, "Ephemeral key exchange failed"),
        },
        Message::KeyAnswer(answer) => {
            match crate::handshake::absorb_answer(session, &opts.keyring.secret, &answer) {
                Ok(()) => info!("Ephemeral key exchanged"),
                Err(err) => debug!(%err, "Ephemeral key exchange failed"),
            }
        }
        Message::Stream(payload) => {
            let Some(cipher) = session.cipher.as_ref() else {
                debug!("Unable to decrypt packet");
                return Ok(());
            };
            match cipher.open(&payload.nonce, &payload.ciphertext) {
                Ok(plaintext) => match device {
                    Some(device) => {
                        if let Err(err) = device.write_all(&plaintext).await {
                            warn!(%err, "Cannot write device");
                        } else {
                            session.state = SessionState::Active;
                            trace!(bytes = plaintext.len(), "Wrote to interface");
                        }
                    }
                    None => debug!("No interface yet, packet dropped"),
                },
                Err(_) => debug!("Unable to decrypt packet"),
            }
        }
        Message::Ping => send_or_warn(session, Message::PingBack).await,
        Message::PingBack => debug!("Pingback heartbeat alive"),
        Message::ClientHello(_) => debug!("Request unknown, packet dropped"),
    }

    Ok(())
}

async fn send_or_warn(session: &mut Session, message: Message) {
    if let Err(err) = session.send(message).await {
        warn!(%err, "Cannot write to socket");
    }
}

/// Seal one interface read and send it up the tunnel.
async fn forward_to_server(session: &mut Session, buffer: &[u8]) {
    let Some(cipher) = session.cipher.as_ref() else {
        return;
    };
    match cipher.seal(buffer) {
        Ok((nonce, ciphertext)) => {
            let message = Message::Stream(StreamPayload { nonce, ciphertext });
            send_or_warn(session, message).await;
        }
        Err(err) => warn!(%err, "Cannot seal packet"),
    }
}
