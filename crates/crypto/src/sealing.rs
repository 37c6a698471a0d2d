use crypto_box::aead::{Aead, AeadCore};
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use rand::rngs::OsRng;

use crate::{CryptoError, Nonce};

/// Fresh Curve25519 box keypair.
pub fn generate_keypair() -> (SecretKey, PublicKey) {
    let secret = SecretKey::generate(&mut OsRng);
    let public = secret.public_key();
    (secret, public)
}

/// Seal `plaintext` to `peer` under a fresh random nonce.
///
/// Used for the ephemeral key exchange, where payloads are sealed under the
/// long-term box keys of both parties.
pub fn seal_to(
    peer: &PublicKey,
    local: &SecretKey,
    plaintext: &[u8],
) -> Result<(Nonce, Vec<u8>), CryptoError> {
    let cipher = SalsaBox::new(peer, local);
    let nonce = SalsaBox::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::SealFailed)?;
    Ok((nonce.into(), ciphertext))
}

/// Open a payload sealed by `peer` for us.
pub fn open_from(
    peer: &PublicKey,
    local: &SecretKey,
    nonce: &Nonce,
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = SalsaBox::new(peer, local);
    cipher
        .decrypt(&crypto_box::Nonce::from(*nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)
}

/// Precomputed per-session cipher over the exchanged ephemeral keys.
///
/// Equivalent shared state is derived on both sides:
/// `SessionCipher::new(their_ephemeral_pk, my_ephemeral_sk)` seals and opens
/// interchangeably with the peer's counterpart. The inner key schedule is
/// erased when the cipher is dropped.
pub struct SessionCipher {
    inner: SalsaBox,
}

impl SessionCipher {
    pub fn new(peer_ephemeral: &PublicKey, local_ephemeral: &SecretKey) -> Self {
        Self {
            inner: SalsaBox::new(peer_ephemeral, local_ephemeral),
        }
    }

    /// Seal one tunnel payload under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<(Nonce, Vec<u8>), CryptoError> {
        let nonce = SalsaBox::generate_nonce(&mut OsRng);
        let ciphertext = self
            .inner
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::SealFailed)?;
        Ok((nonce.into(), ciphertext))
    }

    /// Open one tunnel payload. MAC mismatch means the frame is dropped.
    pub fn open(&self, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.inner
            .decrypt(&crypto_box::Nonce::from(*nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionCipher")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAC_SIZE;
    use hex_literal::hex;

    #[test]
    fn sealed_box_round_trip() {
        let (alice_sk, alice_pk) = generate_keypair();
        let (bob_sk, bob_pk) = generate_keypair();

        let (nonce, ciphertext) = seal_to(&bob_pk, &alice_sk, b"ephemeral key bytes").unwrap();
        assert_eq!(ciphertext.len(), b"ephemeral key bytes".len() + MAC_SIZE);

        let opened = open_from(&alice_pk, &bob_sk, &nonce, &ciphertext).unwrap();
        assert_eq!(opened, b"ephemeral key bytes");
    }

    #[test]
    fn sealed_box_rejects_wrong_recipient() {
        let (alice_sk, alice_pk) = generate_keypair();
        let (_, bob_pk) = generate_keypair();
        let (eve_sk, _) = generate_keypair();

        let (nonce, ciphertext) = seal_to(&bob_pk, &alice_sk, b"secret").unwrap();
        assert!(matches!(
            open_from(&alice_pk, &eve_sk, &nonce, &ciphertext),
            Err(CryptoError::DecryptFailed)
        ));
    }

    #[test]
    fn session_ciphers_interoperate() {
        // Fixed secrets, as both sides of an ephemeral exchange would hold.
        let client_sk = SecretKey::from(hex!(
            "77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a"
        ));
        let server_sk = SecretKey::from(hex!(
            "5dab087e624a8a4b79e17f8b83800ee66f3bb1292618b6fd1c2f8b27ff88e0eb"
        ));

        let client = SessionCipher::new(&server_sk.public_key(), &client_sk);
        let server = SessionCipher::new(&client_sk.public_key(), &server_sk);

        let datagram = [0x45u8; 100];
        let (nonce, ciphertext) = client.seal(&datagram).unwrap();
        assert_eq!(ciphertext.len(), datagram.len() + MAC_SIZE);
        assert_eq!(server.open(&nonce, &ciphertext).unwrap(), datagram);

        let (nonce, ciphertext) = server.seal(b"reply").unwrap();
        assert_eq!(client.open(&nonce, &ciphertext).unwrap(), b"reply");
    }

    #[test]
    fn tampered_ciphertext_fails_open() {
        let (client_sk, client_pk) = generate_keypair();
        let (server_sk, server_pk) = generate_keypair();

        let client = SessionCipher::new(&server_pk, &client_sk);
        let server = SessionCipher::new(&client_pk, &server_sk);

        let (nonce, mut ciphertext) = client.seal(b"payload").unwrap();
        ciphertext[0] ^= 0xff;
        assert!(matches!(
            server.open(&nonce, &ciphertext),
            Err(CryptoError::DecryptFailed)
        ));
    }
}
