//! Transparent compression and encryption of package content
//!
//! Content is compressed with gzip, then optionally sealed with AES-256-GCM.
//! Both layers carry a magic prefix so decoding can tell whether a layer is
//! present. Packages written before a flag was toggled stay readable.

use std::io::{Read, Write};

use aes_gcm::{Aes256Gcm, KeyInit, aead::Aead};
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{RegistryError, Result};

/// gzip member header
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
/// Sealed-content header, followed by a 12-byte nonce
const SEALED_MAGIC: &[u8; 4] = b"KSE1";
const NONCE_LEN: usize = 12;

/// 256-bit content encryption key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    /// Derive a key from arbitrary key material using HKDF-SHA256
    pub fn derive(material: &[u8]) -> Result<Self> {
        let hk = Hkdf::<Sha256>::new(None, material);
        let mut okm = [0u8; 32];
        hk.expand(b"keepsake-content-key", &mut okm)
            .map_err(|e| RegistryError::Codec(format!("Key derivation failed: {}", e)))?;
        Ok(ContentKey(okm))
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentKey([REDACTED])")
    }
}

/// Whether a byte slice starts with a gzip header
pub fn is_compressed(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

/// Whether a byte slice starts with the sealed-content header
pub fn is_sealed(data: &[u8]) -> bool {
    data.len() >= SEALED_MAGIC.len() + NONCE_LEN && data.starts_with(SEALED_MAGIC)
}

/// gzip-compress a buffer
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| RegistryError::Codec(format!("Compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| RegistryError::Codec(format!("Compression failed: {}", e)))
}

/// Decompress a gzip buffer; input without a gzip header is returned unchanged
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    if !is_compressed(data) {
        return Ok(data.to_vec());
    }
    let mut out = Vec::with_capacity(data.len() * 2);
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| RegistryError::Codec(format!("Decompression failed: {}", e)))?;
    Ok(out)
}

fn seal(data: &[u8], key: &ContentKey) -> Result<Vec<u8>> {
    use rand::RngCore;

    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| RegistryError::Codec(format!("Encryption failed: {}", e)))?;
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(aes_gcm::Nonce::from_slice(&nonce), data)
        .map_err(|e| RegistryError::Codec(format!("Encryption failed: {}", e)))?;

    let mut out = Vec::with_capacity(SEALED_MAGIC.len() + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(SEALED_MAGIC);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open(data: &[u8], key: &ContentKey) -> Result<Vec<u8>> {
    let body = &data[SEALED_MAGIC.len()..];
    let (nonce, ciphertext) = body.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| RegistryError::Codec(format!("Decryption failed: {}", e)))?;
    cipher
        .decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| RegistryError::Codec("Decryption failed: wrong key or tampered content".to_string()))
}

/// Layers applied to a stored payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Encoding {
    pub compressed: bool,
    pub encrypted: bool,
}

/// Content codec configured from the registry settings
#[derive(Debug, Clone, Default)]
pub struct Codec {
    compression: bool,
    key: Option<ContentKey>,
}

impl Codec {
    pub fn new(compression: bool, key: Option<ContentKey>) -> Self {
        Self { compression, key }
    }

    /// Codec that stores content as-is
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Apply the enabled layers; returns the stored bytes and which layers were applied
    pub fn encode(&self, content: &[u8]) -> Result<(Vec<u8>, Encoding)> {
        let mut encoding = Encoding::default();
        let mut data = if self.compression {
            encoding.compressed = true;
            compress(content)?
        } else {
            content.to_vec()
        };

        if let Some(key) = &self.key {
            data = seal(&data, key)?;
            encoding.encrypted = true;
        }

        Ok((data, encoding))
    }

    /// Undo the layers recorded for a stored payload.
    ///
    /// Layers are still sniffed, so a flag that claims a layer the bytes do not
    /// carry is a pass-through rather than an error.
    pub fn decode(&self, stored: &[u8], encoding: Encoding) -> Result<Vec<u8>> {
        let opened;
        let data = if encoding.encrypted && is_sealed(stored) {
            let key = self.key.as_ref().ok_or_else(|| {
                RegistryError::Codec("Content is encrypted but no encryption key is configured".to_string())
            })?;
            opened = open(stored, key)?;
            opened.as_slice()
        } else {
            stored
        };

        if encoding.compressed {
            decompress(data)
        } else {
            Ok(data.to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_roundtrip() {
        let data = b"hello hello hello hello hello hello".repeat(20);
        let packed = compress(&data).unwrap();
        assert!(is_compressed(&packed));
        assert!(packed.len() < data.len());
        assert_eq!(decompress(&packed).unwrap(), data);
    }

    #[test]
    fn test_decompress_passes_through_plain_data() {
        assert_eq!(decompress(b"plain text").unwrap(), b"plain text");
        assert_eq!(decompress(b"").unwrap(), b"");
    }

    #[test]
    fn test_decompress_rejects_truncated_gzip() {
        let packed = compress(b"some content that will be truncated").unwrap();
        assert!(decompress(&packed[..6]).is_err());
    }

    #[test]
    fn test_codec_toggle_keeps_old_data_readable() {
        let compressing = Codec::new(true, None);
        let plain = Codec::passthrough();

        let (stored, encoding) = compressing.encode(b"widget").unwrap();
        assert!(encoding.compressed);

        // Compression switched off later: the record still decodes
        assert_eq!(plain.decode(&stored, encoding).unwrap(), b"widget");

        // And data written uncompressed reads back under a compressing codec
        let (stored, encoding) = plain.encode(b"widget").unwrap();
        assert_eq!(stored, b"widget");
        assert_eq!(compressing.decode(&stored, encoding).unwrap(), b"widget");
    }

    #[test]
    fn test_uncompressed_gzip_payload_is_not_unpacked() {
        let inner = compress(b"already gzipped").unwrap();
        let plain = Codec::passthrough();
        let (stored, encoding) = plain.encode(&inner).unwrap();
        assert_eq!(plain.decode(&stored, encoding).unwrap(), inner);
    }

    #[test]
    fn test_encryption_roundtrip() {
        let codec = Codec::new(true, Some(ContentKey::derive(b"correct horse").unwrap()));
        let (stored, encoding) = codec.encode(b"top secret content").unwrap();
        assert!(encoding.encrypted && encoding.compressed);
        assert!(is_sealed(&stored));
        assert_eq!(codec.decode(&stored, encoding).unwrap(), b"top secret content");
    }

    #[test]
    fn test_decrypt_with_wrong_or_missing_key_fails() {
        let codec = Codec::new(false, Some(ContentKey::derive(b"key-a").unwrap()));
        let (stored, encoding) = codec.encode(b"payload").unwrap();

        let other = Codec::new(false, Some(ContentKey::derive(b"key-b").unwrap()));
        assert!(matches!(other.decode(&stored, encoding), Err(RegistryError::Codec(_))));

        let keyless = Codec::passthrough();
        assert!(matches!(keyless.decode(&stored, encoding), Err(RegistryError::Codec(_))));
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let codec = Codec::new(false, Some(ContentKey::derive(b"shared").unwrap()));
        let (stored, encoding) = codec.encode(b"payload").unwrap();

        let again = Codec::new(false, Some(ContentKey::derive(b"shared").unwrap()));
        assert_eq!(again.decode(&stored, encoding).unwrap(), b"payload");
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = ContentKey::derive(b"material").unwrap();
        assert_eq!(format!("{:?}", key), "ContentKey([REDACTED])");
    }
}
