//! secp256k1 key handling for Nostr identities.
//!
//! Public keys are 32-byte x-only keys (BIP-340). Secret keys can be given
//! as 64-char hex or as NIP-19 `nsec1...` strings; public keys as hex or
//! `npub1...`.

use bech32::{Bech32, Hrp};
use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use signature::hazmat::{PrehashSigner, PrehashVerifier};

use crate::error::{NostrError, Result};

const NSEC: Hrp = Hrp::parse_unchecked("nsec");
const NPUB: Hrp = Hrp::parse_unchecked("npub");

/// An x-only secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse hex or `npub1...`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.starts_with("npub1") {
            let bytes = decode_bech32(s, NPUB)?;
            return Ok(Self(bytes));
        }
        Ok(Self(decode_hex32(s)?))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn npub(&self) -> String {
        // Encoding 32 bytes under a fixed, valid HRP cannot fail.
        bech32::encode::<Bech32>(NPUB, &self.0).unwrap_or_default()
    }

    /// Verify a BIP-340 signature over a 32-byte digest.
    pub fn verify(&self, digest: &[u8; 32], sig: &[u8]) -> Result<()> {
        let vk = VerifyingKey::from_bytes(&self.0)
            .map_err(|e| NostrError::InvalidKey(e.to_string()))?;
        let sig = Signature::try_from(sig).map_err(|_| NostrError::InvalidSignature)?;
        vk.verify_prehash(digest, &sig)
            .map_err(|_| NostrError::InvalidSignature)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A Nostr keypair.
#[derive(Clone)]
pub struct Keys {
    secret: k256::SecretKey,
    signing: SigningKey,
    public: PublicKey,
}

impl Keys {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        loop {
            let secret = k256::SecretKey::random(&mut rand::rngs::OsRng);
            if let Ok(keys) = Self::from_secret(secret) {
                return keys;
            }
        }
    }

    /// Parse a secret key given as `nsec1...` or 64-char hex.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.starts_with("nsec1") {
            Self::from_nsec(s)
        } else {
            Self::from_hex(s)
        }
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        Self::from_bytes(&decode_hex32(s)?)
    }

    pub fn from_nsec(s: &str) -> Result<Self> {
        Self::from_bytes(&decode_bech32(s, NSEC)?)
    }

    fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let secret = k256::SecretKey::from_slice(bytes)
            .map_err(|_| NostrError::InvalidKey("secret key out of range".to_string()))?;
        Self::from_secret(secret)
    }

    fn from_secret(secret: k256::SecretKey) -> Result<Self> {
        let signing = SigningKey::from_bytes(&secret.to_bytes())
            .map_err(|e| NostrError::InvalidKey(e.to_string()))?;
        let mut pk = [0u8; 32];
        pk.copy_from_slice(&signing.verifying_key().to_bytes());
        Ok(Self {
            secret,
            signing,
            public: PublicKey(pk),
        })
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// Hex-encoded x-only public key.
    pub fn public_key_hex(&self) -> String {
        self.public.to_hex()
    }

    pub fn npub(&self) -> String {
        self.public.npub()
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }

    pub fn nsec(&self) -> String {
        bech32::encode::<Bech32>(NSEC, &self.secret.to_bytes()).unwrap_or_default()
    }

    pub(crate) fn secret_key(&self) -> &k256::SecretKey {
        &self.secret
    }

    /// BIP-340 signature over a 32-byte digest (an event id).
    pub fn sign(&self, digest: &[u8; 32]) -> Result<[u8; 64]> {
        let sig: Signature = self
            .signing
            .sign_prehash(digest)
            .map_err(|_| NostrError::InvalidSignature)?;
        Ok(sig.to_bytes())
    }
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

fn decode_hex32(s: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(s).map_err(|e| NostrError::InvalidKey(format!("bad hex: {e}")))?;
    to_array(bytes)
}

fn decode_bech32(s: &str, expected: Hrp) -> Result<[u8; 32]> {
    let (hrp, data) =
        bech32::decode(s).map_err(|e| NostrError::InvalidKey(format!("bad bech32: {e}")))?;
    if hrp != expected {
        return Err(NostrError::InvalidKey(format!(
            "expected {expected} prefix, got {hrp}"
        )));
    }
    to_array(data)
}

fn to_array(bytes: Vec<u8>) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| NostrError::InvalidKey(format!("expected 32 bytes, got {}", b.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    // BIP-340 test vector 0: secret key 3 has public key F9308A01...
    const SK3: &str = "0000000000000000000000000000000000000000000000000000000000000003";
    const PK3: &str = "f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9";

    #[test]
    fn derives_bip340_public_key() {
        let keys = Keys::from_hex(SK3).unwrap();
        assert_eq!(keys.public_key_hex(), PK3);
        assert_eq!(keys.secret_hex(), SK3);
    }

    #[test]
    fn nsec_and_npub_round_trip() {
        let keys = Keys::generate();
        let nsec = keys.nsec();
        assert!(nsec.starts_with("nsec1"));
        let again = Keys::parse(&nsec).unwrap();
        assert_eq!(again.public_key(), keys.public_key());

        let npub = keys.npub();
        assert!(npub.starts_with("npub1"));
        assert_eq!(PublicKey::parse(&npub).unwrap(), keys.public_key());
    }

    #[test]
    fn rejects_wrong_prefix_and_length() {
        let keys = Keys::generate();
        assert!(matches!(Keys::from_nsec(&keys.npub()), Err(NostrError::InvalidKey(_))));
        assert!(matches!(Keys::from_hex("abcd"), Err(NostrError::InvalidKey(_))));
        assert!(matches!(Keys::from_hex(&"00".repeat(32)), Err(NostrError::InvalidKey(_))));
        assert!(matches!(PublicKey::parse("zz"), Err(NostrError::InvalidKey(_))));
    }

    #[test]
    fn signature_verifies_only_for_signed_digest() {
        let keys = Keys::generate();
        let digest = [7u8; 32];
        let sig = keys.sign(&digest).unwrap();
        assert!(keys.public_key().verify(&digest, &sig).is_ok());
        assert!(keys.public_key().verify(&[8u8; 32], &sig).is_err());
        let other = Keys::generate();
        assert!(other.public_key().verify(&digest, &sig).is_err());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let keys = Keys::from_hex(SK3).unwrap();
        let dbg = format!("{keys:?}");
        assert!(!dbg.contains(SK3));
        assert!(dbg.contains(PK3));
    }
}
