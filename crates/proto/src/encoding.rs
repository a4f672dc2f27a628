//! Canonical encoding helpers untuk gateway payloads.
//!
//! Semua digest di gateway dihitung dari canonical JSON: key object
//! diurutkan secara leksikografis dan tanpa whitespace. Dua node yang
//! melaporkan nilai yang sama HARUS menghasilkan digest yang identik,
//! tidak bergantung pada urutan field di wire.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::ProtoError;

/// Encode value ke canonical JSON bytes.
///
/// Value dikonversi dulu ke `serde_json::Value`, yang menyimpan object
/// sebagai `BTreeMap`, sehingga urutan key selalu terurut.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtoError> {
    let tree = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&tree)?)
}

/// Lowercase hex SHA-256 dari bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 dari canonical JSON sebuah value.
pub fn canonical_digest<T: Serialize>(value: &T) -> Result<String, ProtoError> {
    Ok(sha256_hex(&canonical_json(value)?))
}

/// Serde adapter: `Vec<u8>` sebagai standard base64 string.
///
/// `null` atau field yang hilang dibaca sebagai body kosong.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(Vec::new()),
            Some(s) => STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom),
        }
    }
}

/// Serde adapter: `Duration` sebagai integer nanoseconds.
pub mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}
