//! Identity verification and the ephemeral key exchange.
//!
//! Both exchange payloads are a fresh ephemeral box public key sealed under
//! the pair of long-term keys. The initiator offers, the responder answers
//! with its own sealed ephemeral, and each side precomputes the session
//! cipher from (peer ephemeral public, own ephemeral secret) — yielding the
//! same shared state on both ends.

use cobalt_crypto::{
    CaCertificate, CryptoError, IdentityEnvelope, PUBLIC_KEY_SIZE, PublicKey, SecretKey,
    SessionCipher, VerifyingKey, generate_keypair, open_from, seal_to, verify_identity,
};

use crate::error::NetError;
use crate::frame::{Message, SealedKey};
use crate::session::{Session, SessionState};

/// The long-term material a peer carries: its own identity and secret plus
/// the CA anchors used to validate the other side.
#[derive(Clone)]
pub struct Keyring {
    pub identity: IdentityEnvelope,
    pub secret: SecretKey,
    pub ca_public: VerifyingKey,
    pub ca_certificate: CaCertificate,
}

/// Validate a peer's identity envelope against the configured CA.
pub fn verify_peer(keyring: &Keyring, envelope: &IdentityEnvelope) -> Result<PublicKey, CryptoError> {
    verify_identity(envelope, &keyring.ca_public, &keyring.ca_certificate)
}

/// Initiate a key exchange: generate a fresh ephemeral, seal it to the peer
/// and reseed the send counter. Used by the client after the server hello
/// and by the server when the peer's counter runs out.
pub fn offer_key(session: &mut Session, secret: &SecretKey) -> Result<Message, NetError> {
    let peer = session.peer_static.clone().ok_or(NetError::NotAuthenticated)?;

    let (ephemeral, ephemeral_public) = generate_keypair();
    let (nonce, sealed) = seal_to(&peer, secret, ephemeral_public.as_bytes())?;
    let sealed = sealed.try_into().expect("sealed ephemeral length");

    session.ephemeral = Some(ephemeral);
    session.reset_counter();
    Ok(Message::KeyOffer(SealedKey { nonce, sealed }))
}

/// Respond to a key offer: open the peer's ephemeral, derive the session
/// cipher from a fresh ephemeral of our own, and seal that one back.
pub fn answer_key(
    session: &mut Session,
    secret: &SecretKey,
    offer: &SealedKey,
) -> Result<Message, NetError> {
    let peer = session.peer_static.clone().ok_or(NetError::NotAuthenticated)?;

    let opened = open_from(&peer, secret, &offer.nonce, &offer.sealed)?;
    let peer_ephemeral = decode_public(&opened)?;

    let (ephemeral, ephemeral_public) = generate_keypair();
    session.cipher = Some(SessionCipher::new(&peer_ephemeral, &ephemeral));
    session.ephemeral = Some(ephemeral);
    session.state = SessionState::Keyed;
    session.reset_counter();

    let (nonce, sealed) = seal_to(&peer, secret, ephemeral_public.as_bytes())?;
    let sealed = sealed.try_into().expect("sealed ephemeral length");
    Ok(Message::KeyAnswer(SealedKey { nonce, sealed }))
}

/// Complete an exchange we initiated: open the answer and derive the cipher
/// from the ephemeral kept since the offer.
pub fn absorb_answer(
    session: &mut Session,
    secret: &SecretKey,
    answer: &SealedKey,
) -> Result<(), NetError> {
    let peer = session.peer_static.clone().ok_or(NetError::NotAuthenticated)?;
    let ephemeral = session.ephemeral.as_ref().ok_or(NetError::NotAuthenticated)?;

    let opened = open_from(&peer, secret, &answer.nonce, &answer.sealed)?;
    let peer_ephemeral = decode_public(&opened)?;

    session.cipher = Some(SessionCipher::new(&peer_ephemeral, ephemeral));
    session.state = SessionState::Keyed;
    Ok(())
}

fn decode_public(bytes: &[u8]) -> Result<PublicKey, NetError> {
    let raw: [u8; PUBLIC_KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| NetError::MalformedEphemeral)?;
    Ok(PublicKey::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Message;
    use crate::session::{INIT_COUNTER, Session};
    use std::sync::Arc;
    use tokio::net::UdpSocket;

    async fn test_session() -> Session {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let peer = socket.local_addr().unwrap();
        Session::datagram(1, socket, peer)
    }

    struct Side {
        session: Session,
        secret: SecretKey,
    }

    async fn paired_sides() -> (Side, Side) {
        let (client_secret, client_public) = generate_keypair();
        let (server_secret, server_public) = generate_keypair();

        let mut client = test_session().await;
        client.peer_static = Some(server_public);
        let mut server = test_session().await;
        server.peer_static = Some(client_public);

        (
            Side {
                session: client,
                secret: client_secret,
            },
            Side {
                session: server,
                secret: server_secret,
            },
        )
    }

    #[tokio::test]
    async fn full_exchange_derives_interoperable_ciphers() {
        let (mut client, mut server) = paired_sides().await;

        let offer = match offer_key(&mut client.session, &client.secret).unwrap() {
            Message::KeyOffer(sealed) => sealed,
            other => panic!("expected key offer, got {other}"),
        };
        let answer = match answer_key(&mut server.session, &server.secret, &offer).unwrap() {
            Message::KeyAnswer(sealed) => sealed,
            other => panic!("expected key answer, got {other}"),
        };
        absorb_answer(&mut client.session, &client.secret, &answer).unwrap();

        assert_eq!(client.session.state, SessionState::Keyed);
        assert_eq!(server.session.state, SessionState::Keyed);
        assert_eq!(client.session.remaining_counter(), INIT_COUNTER);
        assert_eq!(server.session.remaining_counter(), INIT_COUNTER);

        // Both sides hold the same shared key: payloads sealed by one open
        // under the other, in both directions.
        let client_cipher = client.session.cipher.as_ref().unwrap();
        let server_cipher = server.session.cipher.as_ref().unwrap();
        let (nonce, ciphertext) = client_cipher.seal(b"up the tunnel").unwrap();
        assert_eq!(server_cipher.open(&nonce, &ciphertext).unwrap(), b"up the tunnel");
        let (nonce, ciphertext) = server_cipher.seal(b"down the tunnel").unwrap();
        assert_eq!(client_cipher.open(&nonce, &ciphertext).unwrap(), b"down the tunnel");
    }

    #[tokio::test]
    async fn rekey_replaces_the_cipher() {
        let (mut client, mut server) = paired_sides().await;

        let offer = match offer_key(&mut client.session, &client.secret).unwrap() {
            Message::KeyOffer(sealed) => sealed,
            other => panic!("unexpected {other}"),
        };
        let answer = match answer_key(&mut server.session, &server.secret, &offer).unwrap() {
            Message::KeyAnswer(sealed) => sealed,
            other => panic!("unexpected {other}"),
        };
        absorb_answer(&mut client.session, &client.secret, &answer).unwrap();

        let (old_nonce, old_ciphertext) = client
            .session
            .cipher
            .as_ref()
            .unwrap()
            .seal(b"first key")
            .unwrap();

        // Server-initiated rotation.
        let offer = match offer_key(&mut server.session, &server.secret).unwrap() {
            Message::KeyOffer(sealed) => sealed,
            other => panic!("unexpected {other}"),
        };
        let answer = match answer_key(&mut client.session, &client.secret, &offer).unwrap() {
            Message::KeyAnswer(sealed) => sealed,
            other => panic!("unexpected {other}"),
        };
        absorb_answer(&mut server.session, &server.secret, &answer).unwrap();

        // The fresh ciphers interoperate; the old ciphertext no longer opens.
        let (nonce, ciphertext) = client.session.cipher.as_ref().unwrap().seal(b"second key").unwrap();
        assert_eq!(
            server
                .session
                .cipher
                .as_ref()
                .unwrap()
                .open(&nonce, &ciphertext)
                .unwrap(),
            b"second key"
        );
        assert!(
            server
                .session
                .cipher
                .as_ref()
                .unwrap()
                .open(&old_nonce, &old_ciphertext)
                .is_err()
        );
    }

    #[tokio::test]
    async fn tampered_offer_leaves_state_unchanged() {
        let (mut client, mut server) = paired_sides().await;

        let mut offer = match offer_key(&mut client.session, &client.secret).unwrap() {
            Message::KeyOffer(sealed) => sealed,
            other => panic!("unexpected {other}"),
        };
        offer.sealed[0] ^= 0xff;

        assert!(answer_key(&mut server.session, &server.secret, &offer).is_err());
        assert!(server.session.cipher.is_none());
        assert!(server.session.ephemeral.is_none());
        assert_eq!(server.session.state, SessionState::New);
    }

    #[tokio::test]
    async fn offer_requires_an_authenticated_peer() {
        let mut session = test_session().await;
        let (secret, _) = generate_keypair();
        assert!(matches!(
            offer_key(&mut session, &secret),
            Err(NetError::NotAuthenticated)
        ));
    }
}
