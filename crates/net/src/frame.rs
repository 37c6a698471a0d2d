//! Tunnel frame layout.
//!
//! Every frame starts with a fixed 33-byte big-endian header:
//!
//! ```text
//! +--------+----------------+----------+------+------------------------+
//! | magic  |  packet count  | data len | mode |      nonce (24)        |
//! |  (2)   |      (4)       |   (2)    | (1)  |                        |
//! +--------+----------------+----------+------+------------------------+
//! ```
//!
//! The nonce field is meaningful for the modes that carry a sealed body and
//! zero otherwise. On datagram transports one datagram carries the header
//! and body concatenated; on byte streams the body follows as exactly
//! `data len` bytes.

use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};
use cobalt_crypto::{IDENTITY_SIZE, IdentityEnvelope, NONCE_SIZE, Nonce, SEALED_KEY_SIZE};

use crate::error::FrameError;

/// Constant identifying tunnel frames; anything else is dropped.
pub const FRAME_MAGIC: u16 = 0xE460;
/// Fixed header size.
pub const HEADER_SIZE: usize = 2 + 4 + 2 + 1 + NONCE_SIZE;

/// `ServerHello` body: the server identity plus the assigned address and
/// netmask as raw IPv4 octets.
const SERVER_HELLO_SIZE: usize = IDENTITY_SIZE + 8;

/// Frame mode codes. The numeric values are normative for interoperability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    ClientHello = 1,
    ServerHello = 2,
    KeyOffer = 3,
    KeyAnswer = 4,
    Stream = 5,
    Ping = 6,
    PingBack = 7,
}

impl TryFrom<u8> for Mode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, FrameError> {
        match value {
            1 => Ok(Mode::ClientHello),
            2 => Ok(Mode::ServerHello),
            3 => Ok(Mode::KeyOffer),
            4 => Ok(Mode::KeyAnswer),
            5 => Ok(Mode::Stream),
            6 => Ok(Mode::Ping),
            7 => Ok(Mode::PingBack),
            other => Err(FrameError::UnknownMode(other)),
        }
    }
}

/// Server reply to a verified hello: the server's own identity and the
/// tunnel address assigned to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub identity: IdentityEnvelope,
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// A fresh ephemeral public key sealed under the peer's long-term key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedKey {
    pub nonce: Nonce,
    pub sealed: [u8; SEALED_KEY_SIZE],
}

/// One sealed tunnel payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPayload {
    pub nonce: Nonce,
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ClientHello(IdentityEnvelope),
    ServerHello(ServerHello),
    KeyOffer(SealedKey),
    KeyAnswer(SealedKey),
    Stream(StreamPayload),
    Ping,
    PingBack,
}

impl Message {
    pub const fn mode(&self) -> Mode {
        match self {
            Message::ClientHello(_) => Mode::ClientHello,
            Message::ServerHello(_) => Mode::ServerHello,
            Message::KeyOffer(_) => Mode::KeyOffer,
            Message::KeyAnswer(_) => Mode::KeyAnswer,
            Message::Stream(_) => Mode::Stream,
            Message::Ping => Mode::Ping,
            Message::PingBack => Mode::PingBack,
        }
    }

    fn nonce(&self) -> Option<&Nonce> {
        match self {
            Message::KeyOffer(sealed) | Message::KeyAnswer(sealed) => Some(&sealed.nonce),
            Message::Stream(payload) => Some(&payload.nonce),
            _ => None,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Message::ClientHello(_) => IDENTITY_SIZE,
            Message::ServerHello(_) => SERVER_HELLO_SIZE,
            Message::KeyOffer(_) | Message::KeyAnswer(_) => SEALED_KEY_SIZE,
            Message::Stream(payload) => payload.ciphertext.len(),
            Message::Ping | Message::PingBack => 0,
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::ClientHello(_) => "ClientHello".fmt(f),
            Message::ServerHello(_) => "ServerHello".fmt(f),
            Message::KeyOffer(_) => "KeyOffer".fmt(f),
            Message::KeyAnswer(_) => "KeyAnswer".fmt(f),
            Message::Stream(_) => "Stream".fmt(f),
            Message::Ping => "Ping".fmt(f),
            Message::PingBack => "PingBack".fmt(f),
        }
    }
}

/// A full frame: the advertised packet counter plus the typed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub counter: u32,
    pub message: Message,
}

impl Frame {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_SIZE + self.message.payload_len());
        buf.put_u16(FRAME_MAGIC);
        buf.put_u32(self.counter);
        buf.put_u16(self.message.payload_len() as u16);
        buf.put_u8(self.message.mode() as u8);
        match self.message.nonce() {
            Some(nonce) => buf.put_slice(nonce),
            None => buf.put_bytes(0, NONCE_SIZE),
        }
        match &self.message {
            Message::ClientHello(identity) => buf.put_slice(identity.as_bytes()),
            Message::ServerHello(hello) => {
                buf.put_slice(hello.identity.as_bytes());
                buf.put_slice(&hello.address.octets());
                buf.put_slice(&hello.netmask.octets());
            }
            Message::KeyOffer(sealed) | Message::KeyAnswer(sealed) => {
                buf.put_slice(&sealed.sealed);
            }
            Message::Stream(payload) => buf.put_slice(&payload.ciphertext),
            Message::Ping | Message::PingBack => {}
        }
    }

    /// Encode into a fresh buffer, one datagram's worth.
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.message.payload_len());
        self.encode(&mut buf);
        buf
    }

    /// Decode a complete frame (header plus body).
    pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Truncated);
        }
        let magic = u16::from_be_bytes([bytes[0], bytes[1]]);
        if magic != FRAME_MAGIC {
            return Err(FrameError::BadMagic(magic));
        }
        let counter = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let header_len = u16::from_be_bytes([bytes[6], bytes[7]]) as usize;
        let mode = Mode::try_from(bytes[8])?;
        let nonce: Nonce = bytes[9..HEADER_SIZE].try_into().expect("nonce field");
        let payload = &bytes[HEADER_SIZE..];
        if payload.len() != header_len {
            return Err(FrameError::LengthMismatch {
                header: header_len,
                body: payload.len(),
            });
        }

        let message = match mode {
            Mode::ClientHello => Message::ClientHello(decode_identity(payload)?),
            Mode::ServerHello => {
                if payload.len() != SERVER_HELLO_SIZE {
                    return Err(FrameError::LengthMismatch {
                        header: SERVER_HELLO_SIZE,
                        body: payload.len(),
                    });
                }
                let identity = decode_identity(&payload[..IDENTITY_SIZE])?;
                let address = ipv4(&payload[IDENTITY_SIZE..IDENTITY_SIZE + 4]);
                let netmask = ipv4(&payload[IDENTITY_SIZE + 4..]);
                Message::ServerHello(ServerHello {
                    identity,
                    address,
                    netmask,
                })
            }
            Mode::KeyOffer | Mode::KeyAnswer => {
                let sealed: [u8; SEALED_KEY_SIZE] =
                    payload.try_into().map_err(|_| FrameError::LengthMismatch {
                        header: SEALED_KEY_SIZE,
                        body: payload.len(),
                    })?;
                let sealed = SealedKey { nonce, sealed };
                if mode == Mode::KeyOffer {
                    Message::KeyOffer(sealed)
                } else {
                    Message::KeyAnswer(sealed)
                }
            }
            Mode::Stream => Message::Stream(StreamPayload {
                nonce,
                ciphertext: payload.to_vec(),
            }),
            Mode::Ping => {
                expect_empty(payload)?;
                Message::Ping
            }
            Mode::PingBack => {
                expect_empty(payload)?;
                Message::PingBack
            }
        };

        Ok(Frame { counter, message })
    }
}

fn decode_identity(payload: &[u8]) -> Result<IdentityEnvelope, FrameError> {
    IdentityEnvelope::from_bytes(payload).map_err(|_| FrameError::LengthMismatch {
        header: IDENTITY_SIZE,
        body: payload.len(),
    })
}

fn ipv4(octets: &[u8]) -> Ipv4Addr {
    let raw: [u8; 4] = octets.try_into().expect("IPv4 octets");
    Ipv4Addr::from(raw)
}

fn expect_empty(payload: &[u8]) -> Result<(), FrameError> {
    if payload.is_empty() {
        Ok(())
    } else {
        Err(FrameError::LengthMismatch {
            header: 0,
            body: payload.len(),
        })
    }
}
