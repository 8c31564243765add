//! CB58 text form: Base58 over the raw bytes followed by the last four bytes
//! of their SHA-256 digest.

use sha2::{Digest, Sha256};
use thiserror::Error;

const CHECKSUM_LEN: usize = 4;

/// Errors from reading CB58 text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Cb58Error {
    #[error("not base58: {0}")]
    NotBase58(String),

    #[error("{0} decoded bytes cannot carry a checksum")]
    TooShort(usize),

    #[error("checksum mismatch")]
    ChecksumMismatch,
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(payload);
    let mut tail = [0u8; CHECKSUM_LEN];
    tail.copy_from_slice(&digest[digest.len() - CHECKSUM_LEN..]);
    tail
}

pub(crate) fn encode_cb58(payload: &[u8]) -> String {
    let mut checked = Vec::with_capacity(payload.len() + CHECKSUM_LEN);
    checked.extend_from_slice(payload);
    checked.extend_from_slice(&checksum(payload));
    bs58::encode(checked).into_string()
}

pub(crate) fn decode_cb58(text: &str) -> Result<Vec<u8>, Cb58Error> {
    let mut bytes = bs58::decode(text)
        .into_vec()
        .map_err(|err| Cb58Error::NotBase58(err.to_string()))?;
    let payload_len = bytes
        .len()
        .checked_sub(CHECKSUM_LEN)
        .ok_or(Cb58Error::TooShort(bytes.len()))?;
    if bytes[payload_len..] != checksum(&bytes[..payload_len]) {
        return Err(Cb58Error::ChecksumMismatch);
    }
    bytes.truncate(payload_len);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_payload() {
        // Only the checksum of the empty input is encoded.
        let text = encode_cb58(&[]);
        assert_eq!(decode_cb58(&text), Ok(Vec::new()));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(decode_cb58("0OIl"), Err(Cb58Error::NotBase58(_))));
        assert_eq!(
            decode_cb58(&bs58::encode([1u8, 2, 3]).into_string()),
            Err(Cb58Error::TooShort(3))
        );
    }

    #[test]
    fn test_detects_corrupted_checksum() {
        let mut raw = bs58::decode(encode_cb58(b"choice")).into_vec().unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        assert_eq!(
            decode_cb58(&bs58::encode(raw).into_string()),
            Err(Cb58Error::ChecksumMismatch)
        );
    }
}
