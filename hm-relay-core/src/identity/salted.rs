//! Salted remote-id derivation.
//!
//! This is a bit-for-bit port of the vendor mobile application's algorithm.
//! It mixes the API-provided salt with the device MAC and type through a
//! key-driven permutation and an LCG keystream, hashes the result, and
//! re-encodes the digest over a 62-character alphabet. The quirks (hex text
//! permuted as ASCII bytes, asymmetric scramble/unscramble counts, only the
//! first half of the encoded digest surviving) are load-bearing: the cloud
//! broker addresses devices by exactly this string.

use sha2::{Digest, Sha256};
use tracing::warn;

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Derive the cloud-side identifier for a device.
///
/// Deterministic in `(salt, mac, device_type)`; at most 24 characters.
/// Returns an empty string when the inputs cannot feed the algorithm.
pub fn derive_salted_id(salt: &str, mac: &str, device_type: &str) -> String {
    if mac.len() < 4 {
        warn!(mac_len = mac.len(), "mac too short for salted id derivation");
        return String::new();
    }
    if salt.is_empty() {
        warn!("empty salt, skipping salted id derivation");
        return String::new();
    }

    let var1 = format!("{device_type}_{}", &mac[..mac.len() - 4]);
    let var2 = format!("{}_{device_type}", &mac[1..mac.len() - 2]);

    let h1 = permuted_hex_text(salt, &var1);
    let h2 = keystream_hex(&format!("{device_type}{mac}"), &var2);

    let digest = Sha256::digest(format!("{h1}{h2}").as_bytes());
    encode_digest(&digest)
}

/// Permute the hex spelling of the salt under a key-derived permutation.
///
/// The round count is taken from the last hex pair of the spelling; the
/// permutation is applied `2N` times forward and `max(1, N)` times in
/// reverse, so the net effect is `max(1, N)` net forward rounds - or one
/// reverse round when `N` is zero.
fn permuted_hex_text(salt: &str, key: &str) -> String {
    let hex_content = hex::encode(salt.as_bytes());
    let rounds =
        usize::from(u8::from_str_radix(&hex_content[hex_content.len() - 2..], 16).unwrap_or(0) % 5);

    let perm = key_permutation(hex_content.len(), key.as_bytes());
    let mut data = hex_content.into_bytes();
    for _ in 0..rounds * 2 {
        data = scramble(&data, &perm);
    }
    for _ in 0..rounds.max(1) {
        data = unscramble(&data, &perm);
    }
    hex::encode(data)
}

/// RC4-style key scheduling: a permutation of `0..n` driven by the key.
fn key_permutation(n: usize, key: &[u8]) -> Vec<usize> {
    let mut p: Vec<usize> = (0..n).collect();
    let mut j = 0usize;
    for i in 0..n {
        j = (j + p[i] + key[i % key.len()] as usize) % n;
        p.swap(i, j);
    }
    p
}

fn scramble(data: &[u8], perm: &[usize]) -> Vec<u8> {
    let mut out = vec![0u8; data.len()];
    for (i, &p) in perm.iter().enumerate() {
        out[i] = data[p];
    }
    out
}

fn unscramble(data: &[u8], perm: &[usize]) -> Vec<u8> {
    let mut out = vec![0u8; data.len()];
    for (i, &p) in perm.iter().enumerate() {
        out[p] = data[i];
    }
    out
}

/// XOR `input` against an LCG keystream seeded from `seed_src`, hex-encoded.
///
/// The keystream length is the character count of `input`, which equals its
/// byte count only for ASCII; callers feed ASCII ids and MACs.
fn keystream_hex(input: &str, seed_src: &str) -> String {
    let mut seed: u64 = 0;
    for b in seed_src.bytes() {
        seed = (seed * 31 + u64::from(b)) % 2_147_483_647;
    }

    let mut state = seed;
    let mut out = Vec::with_capacity(input.len());
    for b in input.bytes() {
        state = (state * 1_664_525 + 1_013_904_223) & 0xFFFF_FFFF;
        let key = ((state ^ (state >> 16)) & 0xFF) as u8;
        out.push(b ^ key);
    }
    hex::encode(out)
}

/// Rearrange the digest words into 24 bytes and spell each as a pair over
/// the 62-character alphabet, keeping the first 24 characters.
fn encode_digest(digest: &[u8]) -> String {
    let words: Vec<u32> = digest
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let mut encoded = String::with_capacity(48);
    for i in 0..24 {
        let byte = ((words[i % 8] >> ((i / 8) * 8)) & 0xFF) as usize;
        encoded.push(ALPHABET[byte % 62] as char);
        encoded.push(ALPHABET[(byte * 31) % 62] as char);
    }
    encoded.truncate(24);
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(
            derive_salted_id("abc123def456789a", "112233445566", "HMG-50"),
            "LV9VDVC0S03VDVlVTVTVK0q0"
        );
        assert_eq!(
            derive_salted_id("fedcba9876543210", "aabbccddeeff", "HMG-50"),
            "HVe0ZVW0Y0jVBVRVC0DVC0pV"
        );
        assert_eq!(
            derive_salted_id("1234567890abcdef", "001122334455", "HMG-50"),
            "C0q0a0w03VdVZVhVc0lVlVE0"
        );
        assert_eq!(
            derive_salted_id("sample123456782d", "aabbccdd1234", "HMG-50"),
            "I0a0i03VRVO0w09Vk0BV80g0"
        );
    }

    #[test]
    fn short_mac_yields_empty() {
        assert_eq!(derive_salted_id("abc", "abc", "X"), "");
    }

    #[test]
    fn empty_salt_yields_empty() {
        assert_eq!(derive_salted_id("", "aabbccddeeff", "HMG-50"), "");
    }

    #[test]
    fn deterministic_and_bounded() {
        let a = derive_salted_id("abc123def456789a", "112233445566", "HMG-50");
        let b = derive_salted_id("abc123def456789a", "112233445566", "HMG-50");
        assert_eq!(a, b);
        assert!(a.len() <= 24);
    }

    #[test]
    fn scramble_and_unscramble_are_inverses() {
        let data = b"0123456789abcdef".to_vec();
        let perm = key_permutation(data.len(), b"some-key");
        let forward = scramble(&data, &perm);
        assert_eq!(unscramble(&forward, &perm), data);
    }
}
