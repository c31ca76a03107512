//! Binary embedding blob: `b"RCE2"` followed by the bincode encoding of the
//! [`Embedding`] (standard config, little-endian varints).
//!
//! The model version tag travels with the values, so a blob read back later can
//! be checked for compatibility before it is compared.

use crate::StoreError;
use bincode::config::{self, Configuration, Limit, LittleEndian, Varint};
use rollcall_core::Embedding;

const MAGIC: &[u8; 4] = b"RCE2";

/// Upper bound on a decoded blob. Far above a 49 152-value pixel embedding.
const MAX_BLOB_BYTES: usize = 4 * 1024 * 1024;

fn bincode_config() -> Configuration<LittleEndian, Varint, Limit<MAX_BLOB_BYTES>> {
    config::standard().with_limit::<MAX_BLOB_BYTES>()
}

pub fn encode(embedding: &Embedding) -> Result<Vec<u8>, StoreError> {
    let body = bincode::serde::encode_to_vec(embedding, bincode_config())?;
    let mut out = Vec::with_capacity(MAGIC.len() + body.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&body);
    Ok(out)
}

pub fn decode(blob: &[u8]) -> Result<Embedding, StoreError> {
    let body = blob
        .strip_prefix(MAGIC.as_slice())
        .ok_or_else(|| StoreError::Corrupt("bad magic".into()))?;

    let (embedding, read): (Embedding, usize) =
        bincode::serde::decode_from_slice(body, bincode_config())
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    if read != body.len() {
        return Err(StoreError::Corrupt(format!(
            "{} trailing bytes",
            body.len() - read
        )));
    }
    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_is_bit_exact() {
        let values = vec![0.1f32, -3.75, f32::MIN_POSITIVE, 1.0e-30, 12345.678, -0.0];
        let original = Embedding::new(values, "w600k_r50");
        let decoded = decode(&encode(&original).unwrap()).unwrap();

        assert_eq!(decoded.model_version.as_deref(), Some("w600k_r50"));
        let bits = |e: &Embedding| e.values.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&decoded), bits(&original));
    }

    #[test]
    fn test_untagged_roundtrip() {
        let original = Embedding::untagged(vec![1.0, 2.0]);
        let decoded = decode(&encode(&original).unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_long_multibyte_tag_roundtrips() {
        let tag = "é".repeat(40_000);
        let original = Embedding::new(vec![0.5], tag.clone());
        let decoded = decode(&encode(&original).unwrap()).unwrap();
        assert_eq!(decoded.model_version.as_deref(), Some(tag.as_str()));
    }

    #[test]
    fn test_blob_starts_with_magic() {
        let blob = encode(&Embedding::new(vec![1.0], "ab")).unwrap();
        assert_eq!(&blob[..4], b"RCE2");
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut blob = encode(&Embedding::untagged(vec![1.0])).unwrap();
        blob[0] = b'X';
        assert!(matches!(decode(&blob), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_rejects_truncated_and_trailing() {
        let blob = encode(&Embedding::new(vec![1.0, 2.0, 3.0], "pixel-128x128")).unwrap();
        assert!(matches!(decode(&blob[..blob.len() - 1]), Err(StoreError::Corrupt(_))));
        assert!(matches!(decode(&blob[..3]), Err(StoreError::Corrupt(_))));

        let mut long = blob.clone();
        long.push(0);
        assert!(matches!(decode(&long), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_rejects_absurd_dimension() {
        let mut blob = Vec::from(*MAGIC);
        // Varint u64 marker (253) followed by a huge length for the values vec.
        blob.push(253);
        blob.extend_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(decode(&blob), Err(StoreError::Corrupt(_))));
    }
}
