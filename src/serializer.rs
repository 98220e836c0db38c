//! Pluggable payload serialization

use serde::{de::DeserializeOwned, Serialize};

use crate::CacheError;

/// Serializes cache payloads to and from text.
///
/// Implementations must round-trip any plain serde data type used with the
/// Redis-backed cache.
pub trait Serializer: Send + Sync {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<String, CacheError>;

    fn deserialize<T: DeserializeOwned>(&self, payload: &str) -> Result<T, CacheError>;
}

/// serde_json-backed serializer producing compact output
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<String, CacheError> {
        Ok(serde_json::to_string(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, payload: &str) -> Result<T, CacheError> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: u32,
        name: String,
    }

    #[test]
    fn round_trips_plain_data() {
        let serializer = JsonSerializer;
        let profile = Profile {
            id: 7,
            name: "ada".to_owned(),
        };

        let payload = serializer.serialize(&profile).unwrap();
        let back: Profile = serializer.deserialize(&payload).unwrap();

        assert_eq!(back, profile);
    }

    #[test]
    fn rejects_malformed_payloads() {
        let serializer = JsonSerializer;
        let result = serializer.deserialize::<Profile>("not json");
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }
}
