use serde::{Deserialize, Serialize};

use crate::crypto::{hash_blake3, Hash};
use crate::error::CoreError;

/// Serialize to deterministic bincode bytes
pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    bincode::serialize(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Deserialize from bincode bytes
pub fn from_bytes<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, CoreError> {
    bincode::deserialize(bytes).map_err(|e| CoreError::Deserialization(e.to_string()))
}

/// Digest of the canonical (bincode) encoding of a value
pub fn digest<T: Serialize>(value: &T) -> Result<Hash, CoreError> {
    Ok(hash_blake3(&to_bytes(value)?))
}

/// Serialize to pretty JSON string
pub fn to_json_pretty<T: Serialize>(value: &T) -> Result<String, CoreError> {
    serde_json::to_string_pretty(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Deserialize from JSON string
pub fn from_json<'a, T: Deserialize<'a>>(json: &'a str) -> Result<T, CoreError> {
    serde_json::from_str(json).map_err(|e| CoreError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Entry {
        balance: BigUint,
        label: String,
    }

    #[test]
    fn test_bigint_survives_bincode() {
        let original = Entry {
            balance: BigUint::from(10u32).pow(40),
            label: "mint".to_string(),
        };

        let bytes = to_bytes(&original).unwrap();
        let recovered: Entry = from_bytes(&bytes).unwrap();
        assert_eq!(original, recovered);
    }

    #[test]
    fn test_digest_deterministic() {
        let value = Entry {
            balance: BigUint::from(100u32),
            label: "test".to_string(),
        };

        assert_eq!(digest(&value).unwrap(), digest(&value.clone()).unwrap());
    }

    #[test]
    fn test_digest_depends_on_content() {
        let a = Entry {
            balance: BigUint::from(1u32),
            label: "a".to_string(),
        };
        let b = Entry {
            balance: BigUint::from(2u32),
            label: "a".to_string(),
        };

        assert_ne!(digest(&a).unwrap(), digest(&b).unwrap());
    }

    #[test]
    fn test_truncated_bytes_rejected() {
        let bytes = to_bytes(&Entry {
            balance: BigUint::from(7u32),
            label: "x".to_string(),
        })
        .unwrap();

        let result: Result<Entry, _> = from_bytes(&bytes[..bytes.len() - 1]);
        assert!(matches!(result, Err(CoreError::Deserialization(_))));
    }
}
