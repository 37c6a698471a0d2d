//! Cryptographic envelope for the tunnel protocol: CA-rooted identities and
//! per-session authenticated encryption.
//!
//! Identities are Curve25519 box public keys bound to the certificate
//! authority by an Ed25519 signature over the key plus the CA fingerprint
//! (a keyed BLAKE2b digest of the CA certificate). Session traffic is sealed
//! with a precomputed X25519 + XSalsa20-Poly1305 cipher derived from the
//! ephemeral exchange.

mod identity;
mod sealing;

pub use identity::{CaCertificate, IdentityEnvelope, generate_ca, issue_identity, verify_identity};
pub use sealing::{SessionCipher, generate_keypair, open_from, seal_to};

pub use crypto_box::{PublicKey, SecretKey};
pub use ed25519_dalek::{SigningKey, VerifyingKey};

/// Detached Ed25519 signature length.
pub const SIGNATURE_SIZE: usize = ed25519_dalek::SIGNATURE_LENGTH;
/// Curve25519 public key length (box and signing keys alike).
pub const PUBLIC_KEY_SIZE: usize = 32;
/// Curve25519 secret key length.
pub const SECRET_KEY_SIZE: usize = 32;
/// Keyed-hash fingerprint length.
pub const FINGERPRINT_SIZE: usize = 32;
/// Poly1305 authentication tag length.
pub const MAC_SIZE: usize = 16;
/// XSalsa20 nonce length.
pub const NONCE_SIZE: usize = 24;
/// Random seed carried inside a CA certificate.
pub const CERT_SEED_SIZE: usize = 32;
/// Signed CA certificate blob: signature prefix plus seed.
pub const CERTIFICATE_SIZE: usize = SIGNATURE_SIZE + CERT_SEED_SIZE;
/// Signed identity envelope: signature, box public key, CA fingerprint.
pub const IDENTITY_SIZE: usize = SIGNATURE_SIZE + PUBLIC_KEY_SIZE + FINGERPRINT_SIZE;
/// A box public key sealed to a peer: key plus tag.
pub const SEALED_KEY_SIZE: usize = PUBLIC_KEY_SIZE + MAC_SIZE;

/// Wire representation of an XSalsa20 nonce.
pub type Nonce = [u8; NONCE_SIZE];

/// Keyed-hash fingerprint of a CA certificate.
pub type Fingerprint = [u8; FINGERPRINT_SIZE];

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The outer signature did not open under the CA key, or the embedded
    /// fingerprint does not match the locally computed one.
    #[error("identity rejected by certificate authority")]
    IdentityMismatch,
    /// Authenticated decryption failed; the frame must be dropped.
    #[error("authenticated decryption failed")]
    DecryptFailed,
    #[error("failed to seal payload")]
    SealFailed,
    #[error("malformed key material: {0}")]
    MalformedKey(&'static str),
}
