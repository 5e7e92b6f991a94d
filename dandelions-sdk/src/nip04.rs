//! NIP-04 encrypted direct messages.
//!
//! Payload: `base64(ciphertext) + "?iv=" + base64(iv)`, AES-256-CBC with
//! PKCS#7 padding, keyed with the x-coordinate of the ECDH shared point.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use rand::RngCore;

use crate::error::{NostrError, Result};
use crate::keys::{Keys, PublicKey};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

fn shared_secret(keys: &Keys, their_pk: &PublicKey) -> Result<[u8; 32]> {
    // Lift the x-only key with even Y.
    let mut sec1 = [0u8; 33];
    sec1[0] = 0x02;
    sec1[1..].copy_from_slice(their_pk.as_bytes());
    let public = k256::PublicKey::from_sec1_bytes(&sec1)
        .map_err(|_| NostrError::InvalidKey(format!("{their_pk} is not on the curve")))?;
    let shared =
        k256::ecdh::diffie_hellman(keys.secret_key().to_nonzero_scalar(), public.as_affine());
    let mut out = [0u8; 32];
    out.copy_from_slice(shared.raw_secret_bytes());
    Ok(out)
}

/// Encrypt `plaintext` from `keys` to `recipient`.
pub fn encrypt(keys: &Keys, recipient: &PublicKey, plaintext: &str) -> Result<String> {
    let key = shared_secret(keys, recipient)?;
    let mut iv = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(&key, &iv)
        .map_err(|e| NostrError::Decryption(e.to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    Ok(format!("{}?iv={}", B64.encode(ciphertext), B64.encode(iv)))
}

/// Decrypt a payload sent to `keys` by `sender`.
pub fn decrypt(keys: &Keys, sender: &PublicKey, payload: &str) -> Result<String> {
    let (ct_b64, iv_b64) = payload
        .split_once("?iv=")
        .ok_or_else(|| NostrError::Decryption("missing ?iv= separator".to_string()))?;
    let ciphertext = B64
        .decode(ct_b64.trim())
        .map_err(|e| NostrError::Decryption(format!("ciphertext: {e}")))?;
    let iv = B64
        .decode(iv_b64.trim())
        .map_err(|e| NostrError::Decryption(format!("iv: {e}")))?;
    if iv.len() != 16 {
        return Err(NostrError::Decryption(format!("iv must be 16 bytes, got {}", iv.len())));
    }

    let key = shared_secret(keys, sender)?;
    let cipher = Aes256CbcDec::new_from_slices(&key, &iv)
        .map_err(|e| NostrError::Decryption(e.to_string()))?;
    let plain = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| NostrError::Decryption("bad padding (wrong key?)".to_string()))?;
    String::from_utf8(plain).map_err(|_| NostrError::Decryption("plaintext is not UTF-8".to_string()))
}
