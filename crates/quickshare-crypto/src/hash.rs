//! BLAKE3 hashing and key derivation.
//!
//! Provides:
//! - Plain and keyed BLAKE3 hashing
//! - HKDF-style extract/expand built on keyed BLAKE3

/// BLAKE3 hash output (32 bytes).
pub type HashOutput = [u8; 32];

/// Compute BLAKE3 hash of input data.
#[must_use]
pub fn hash(data: &[u8]) -> HashOutput {
    *blake3::hash(data).as_bytes()
}

/// Keyed BLAKE3 over the concatenation of `parts`.
#[must_use]
pub fn keyed_hash(key: &[u8; 32], parts: &[&[u8]]) -> HashOutput {
    let mut hasher = blake3::Hasher::new_keyed(key);
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// HKDF-Extract over BLAKE3 (RFC 5869 shape).
#[must_use]
pub fn hkdf_extract(salt: &[u8], ikm: &[u8]) -> [u8; 32] {
    if salt.is_empty() {
        hash(ikm)
    } else {
        let salt_hash = hash(salt);
        keyed_hash(&salt_hash, &[ikm])
    }
}

/// HKDF-Expand over BLAKE3: fill `output` from `prk` and `info`.
pub fn hkdf_expand(prk: &[u8; 32], info: &[u8], output: &mut [u8]) {
    let mut hasher = blake3::Hasher::new_keyed(prk);
    hasher.update(info);
    let mut reader = hasher.finalize_xof();
    reader.fill(output);
}

/// Expand `prk` into a single 32-byte key labelled by `info`.
#[must_use]
pub fn hkdf_expand_key(prk: &[u8; 32], info: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    hkdf_expand(prk, info, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_empty_string() {
        let expected = [
            0xaf, 0x13, 0x49, 0xb9, 0xf5, 0xf9, 0xa1, 0xa6, 0xa0, 0x40, 0x4d, 0xea, 0x36, 0xdc,
            0xc9, 0x49, 0x9b, 0xcb, 0x25, 0xc9, 0xad, 0xc1, 0x12, 0xb7, 0xcc, 0x9a, 0x93, 0xca,
            0xe4, 0x1f, 0x32, 0x62,
        ];
        assert_eq!(hash(b""), expected);
    }

    #[test]
    fn test_keyed_hash_parts_concatenate() {
        let key = [5u8; 32];
        assert_eq!(
            keyed_hash(&key, &[b"hello ", b"world"]),
            keyed_hash(&key, &[b"hello world"])
        );
        assert_ne!(keyed_hash(&key, &[b"a"]), keyed_hash(&[6u8; 32], &[b"a"]));
    }

    #[test]
    fn test_hkdf_labels_separate_keys() {
        let prk = hkdf_extract(b"salt", b"ikm");
        let k1 = hkdf_expand_key(&prk, b"one");
        let k2 = hkdf_expand_key(&prk, b"two");
        assert_ne!(k1, k2);
        assert_eq!(k1, hkdf_expand_key(&prk, b"one"));
    }

    #[test]
    fn test_hkdf_salt_matters() {
        assert_ne!(hkdf_extract(b"a", b"ikm"), hkdf_extract(b"b", b"ikm"));
        assert_ne!(hkdf_extract(b"", b"ikm"), [0u8; 32]);
    }
}
