// Codec: JSON / bincode помощники для ключей, записей и конвертов
//
// Весь wire-уровень ядра ходит через эти функции, чтобы ошибки
// (де)сериализации маппились в единый тип.

use crate::utils::error::{MeridianError, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Сериализовать значение в JSON-байты (wire-формат конвертов и bundle)
pub fn to_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| MeridianError::SerializationError(format!("JSON encode failed: {}", e)))
}

/// Десериализовать значение из JSON-байтов
pub fn from_json_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| MeridianError::SerializationError(format!("JSON decode failed: {}", e)))
}

/// Сериализовать значение в bincode (формат хранилища)
pub fn to_bincode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| MeridianError::SerializationError(format!("bincode encode failed: {}", e)))
}

/// Десериализовать значение из bincode
pub fn from_bincode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| MeridianError::SerializationError(format!("bincode decode failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: String,
        counter: u32,
    }

    #[test]
    fn test_json_roundtrip() {
        let value = Sample {
            id: "abc".to_string(),
            counter: 7,
        };
        let bytes = to_json_bytes(&value).unwrap();
        let back: Sample = from_json_bytes(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_bincode_roundtrip() {
        let value = Sample {
            id: "abc".to_string(),
            counter: 7,
        };
        let bytes = to_bincode(&value).unwrap();
        let back: Sample = from_bincode(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_json_decode_error() {
        let result: Result<Sample> = from_json_bytes(b"{broken");
        assert!(result.is_err());
    }
}
