//! Keyed MAC-based remote-id derivation.

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use aes::Aes128;
use hm_relay_error::{HmError, HmResult};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;

/// Map a device MAC to its cloud identifier under a broker-wide AES-128 key.
///
/// CBC with an all-zero IV and PKCS#7 padding; the 12-byte MAC encrypts to
/// one block, 32 hex characters. The zero IV is acceptable only because
/// each device's plaintext (its MAC) is unique under a given key - the key
/// must not be reused for general encryption.
pub fn derive_keyed_id(key_hex: &str, mac: &str) -> HmResult<String> {
    let key = hex::decode(key_hex)
        .map_err(|e| HmError::Config(format!("topic_encryption_key is not valid hex: {e}")))?;
    if key.len() != 16 {
        return Err(HmError::Config(format!(
            "topic_encryption_key must be 16 bytes, got {}",
            key.len()
        )));
    }

    let iv = [0u8; 16];
    let ciphertext = Aes128CbcEnc::new_from_slices(&key, &iv)
        .map_err(|e| HmError::Config(format!("AES key setup failed: {e}")))?
        .encrypt_padded_vec_mut::<Pkcs7>(mac.as_bytes());
    Ok(hex::encode(ciphertext))
}
