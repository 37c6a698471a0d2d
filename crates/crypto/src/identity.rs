use blake2::Blake2bMac;
use blake2::digest::Mac;
use blake2::digest::consts::U32;
use crypto_box::PublicKey;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::{
    CERT_SEED_SIZE, CERTIFICATE_SIZE, CryptoError, FINGERPRINT_SIZE, Fingerprint, IDENTITY_SIZE,
    PUBLIC_KEY_SIZE, SIGNATURE_SIZE,
};

type Blake2b256Mac = Blake2bMac<U32>;

/// A CA certificate: a random seed signed by the CA signing key, stored as
/// the combined blob (signature prefix followed by the seed).
///
/// The certificate itself carries no structure; its role is to anchor the
/// CA fingerprint that every issued identity embeds.
#[derive(Clone, PartialEq, Eq)]
pub struct CaCertificate([u8; CERTIFICATE_SIZE]);

impl CaCertificate {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let blob: [u8; CERTIFICATE_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::MalformedKey("CA certificate length"))?;
        Ok(Self(blob))
    }

    pub fn as_bytes(&self) -> &[u8; CERTIFICATE_SIZE] {
        &self.0
    }

    /// Keyed BLAKE2b-256 digest of the certificate blob, keyed with the CA
    /// public signing key. Every identity issued by this CA embeds this
    /// value.
    pub fn fingerprint(&self, ca_public: &VerifyingKey) -> Fingerprint {
        let mut mac = Blake2b256Mac::new_from_slice(ca_public.as_bytes())
            .expect("public key is a valid BLAKE2b key length");
        mac.update(&self.0);
        mac.finalize().into_bytes().into()
    }
}

impl std::fmt::Debug for CaCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CaCertificate({})", hex::encode(&self.0[..8]))
    }
}

/// Mint a fresh certificate authority: a random seed signed by a new
/// Ed25519 keypair.
pub fn generate_ca() -> (CaCertificate, SigningKey) {
    let signing = SigningKey::generate(&mut OsRng);

    let mut seed = Zeroizing::new([0u8; CERT_SEED_SIZE]);
    OsRng.fill_bytes(seed.as_mut());

    let signature = signing.sign(seed.as_ref());

    let mut blob = [0u8; CERTIFICATE_SIZE];
    blob[..SIGNATURE_SIZE].copy_from_slice(&signature.to_bytes());
    blob[SIGNATURE_SIZE..].copy_from_slice(seed.as_ref());

    (CaCertificate(blob), signing)
}

/// A signed identity: `sign(box_pk ‖ ca_fingerprint)` under the CA signing
/// key, stored as the combined blob.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityEnvelope([u8; IDENTITY_SIZE]);

impl IdentityEnvelope {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let blob: [u8; IDENTITY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::MalformedKey("identity envelope length"))?;
        Ok(Self(blob))
    }

    pub fn as_bytes(&self) -> &[u8; IDENTITY_SIZE] {
        &self.0
    }

    /// The box public key carried in the envelope. Only meaningful once the
    /// envelope has been verified.
    pub fn public_key(&self) -> PublicKey {
        let mut pk = [0u8; PUBLIC_KEY_SIZE];
        pk.copy_from_slice(&self.0[SIGNATURE_SIZE..SIGNATURE_SIZE + PUBLIC_KEY_SIZE]);
        PublicKey::from(pk)
    }
}

impl std::fmt::Debug for IdentityEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IdentityEnvelope({})", hex::encode(&self.0[..8]))
    }
}

/// Bind a box public key to the CA: the envelope body is the key followed by
/// the CA fingerprint, signed by the CA signing key.
pub fn issue_identity(
    box_public: &PublicKey,
    ca_signing: &SigningKey,
    cert: &CaCertificate,
) -> IdentityEnvelope {
    let fingerprint = cert.fingerprint(&ca_signing.verifying_key());

    let mut body = [0u8; PUBLIC_KEY_SIZE + FINGERPRINT_SIZE];
    body[..PUBLIC_KEY_SIZE].copy_from_slice(box_public.as_bytes());
    body[PUBLIC_KEY_SIZE..].copy_from_slice(&fingerprint);

    let signature = ca_signing.sign(&body);

    let mut blob = [0u8; IDENTITY_SIZE];
    blob[..SIGNATURE_SIZE].copy_from_slice(&signature.to_bytes());
    blob[SIGNATURE_SIZE..].copy_from_slice(&body);

    IdentityEnvelope(blob)
}

/// Validate an identity envelope against the configured CA.
///
/// The outer signature must open under `ca_public` and the embedded
/// fingerprint must equal the locally computed fingerprint of `cert`.
/// Either failure rejects the identity.
pub fn verify_identity(
    envelope: &IdentityEnvelope,
    ca_public: &VerifyingKey,
    cert: &CaCertificate,
) -> Result<PublicKey, CryptoError> {
    let signature = Signature::from_bytes(
        envelope.0[..SIGNATURE_SIZE]
            .try_into()
            .expect("envelope signature prefix"),
    );
    let body = &envelope.0[SIGNATURE_SIZE..];

    ca_public
        .verify(body, &signature)
        .map_err(|_| CryptoError::IdentityMismatch)?;

    let embedded: Fingerprint = body[PUBLIC_KEY_SIZE..]
        .try_into()
        .expect("envelope fingerprint suffix");
    if embedded != cert.fingerprint(ca_public) {
        return Err(CryptoError::IdentityMismatch);
    }

    Ok(envelope.public_key())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_keypair;

    #[test]
    fn issued_identity_verifies() {
        let (cert, ca_signing) = generate_ca();
        let (_, box_public) = generate_keypair();

        let envelope = issue_identity(&box_public, &ca_signing, &cert);
        let recovered =
            verify_identity(&envelope, &ca_signing.verifying_key(), &cert).expect("valid identity");

        assert_eq!(recovered, box_public);
    }

    #[test]
    fn wrong_fingerprint_is_rejected_even_with_valid_signature() {
        let (cert, ca_signing) = generate_ca();
        let (_, box_public) = generate_keypair();

        // Properly CA-signed envelope whose embedded fingerprint is off by
        // one byte: the signature opens, the fingerprint check must fail.
        let mut fingerprint = cert.fingerprint(&ca_signing.verifying_key());
        fingerprint[0] ^= 0x01;

        let mut body = [0u8; PUBLIC_KEY_SIZE + FINGERPRINT_SIZE];
        body[..PUBLIC_KEY_SIZE].copy_from_slice(box_public.as_bytes());
        body[PUBLIC_KEY_SIZE..].copy_from_slice(&fingerprint);
        let signature = ca_signing.sign(&body);

        let mut blob = [0u8; IDENTITY_SIZE];
        blob[..SIGNATURE_SIZE].copy_from_slice(&signature.to_bytes());
        blob[SIGNATURE_SIZE..].copy_from_slice(&body);
        let forged = IdentityEnvelope::from_bytes(&blob).unwrap();

        assert!(matches!(
            verify_identity(&forged, &ca_signing.verifying_key(), &cert),
            Err(CryptoError::IdentityMismatch)
        ));
    }

    #[test]
    fn corrupted_signature_is_rejected() {
        let (cert, ca_signing) = generate_ca();
        let (_, box_public) = generate_keypair();

        let envelope = issue_identity(&box_public, &ca_signing, &cert);
        let mut forged = *envelope.as_bytes();
        forged[0] ^= 0x01;
        let forged = IdentityEnvelope::from_bytes(&forged).unwrap();

        assert!(matches!(
            verify_identity(&forged, &ca_signing.verifying_key(), &cert),
            Err(CryptoError::IdentityMismatch)
        ));
    }

    #[test]
    fn foreign_ca_is_rejected() {
        let (cert, ca_signing) = generate_ca();
        let (other_cert, other_signing) = generate_ca();
        let (_, box_public) = generate_keypair();

        let envelope = issue_identity(&box_public, &other_signing, &other_cert);

        assert!(matches!(
            verify_identity(&envelope, &ca_signing.verifying_key(), &cert),
            Err(CryptoError::IdentityMismatch)
        ));
    }

    #[test]
    fn fingerprint_depends_on_key_and_blob() {
        let (cert, ca_signing) = generate_ca();
        let (other_cert, other_signing) = generate_ca();

        let ca_public = ca_signing.verifying_key();
        assert_ne!(cert.fingerprint(&ca_public), other_cert.fingerprint(&ca_public));
        assert_ne!(
            cert.fingerprint(&ca_public),
            cert.fingerprint(&other_signing.verifying_key())
        );
    }
}
