// Safety number (fingerprint) публичного ключа
//
// Детерминированный digest для сверки ключей вне канала (защита от подмены
// ключа активным MITM). Обе стороны читают друг другу строку вслух или
// сверяют QR-кодом.

use crate::config::Config;
use sha2::{Digest, Sha256};

/// Посчитать fingerprint публичного ключа: SHA-256 от канонических байтов
/// ключа, lowercase hex, блоками по 8 символов через пробел.
pub fn fingerprint(public_key_bytes: &[u8]) -> String {
    let digest = Sha256::digest(public_key_bytes);
    let hex_digest = hex::encode(digest);

    let group = Config::global().fingerprint_group_size;
    let mut display = String::with_capacity(hex_digest.len() + hex_digest.len() / group);
    for (i, ch) in hex_digest.chars().enumerate() {
        if i > 0 && i % group == 0 {
            display.push(' ');
        }
        display.push(ch);
    }
    display
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        let key = [42u8; 32];
        assert_eq!(fingerprint(&key), fingerprint(&key));
    }

    #[test]
    fn test_fingerprint_differs_for_distinct_keys() {
        let key1 = [1u8; 32];
        let key2 = [2u8; 32];
        assert_ne!(fingerprint(&key1), fingerprint(&key2));
    }

    #[test]
    fn test_fingerprint_format() {
        let fp = fingerprint(&[0u8; 32]);

        // SHA-256 -> 64 hex символа -> 8 блоков по 8 + 7 пробелов
        assert_eq!(fp.len(), 64 + 7);
        for block in fp.split(' ') {
            assert_eq!(block.len(), 8);
            assert!(block.chars().all(|c| c.is_ascii_hexdigit()));
            assert_eq!(block.to_lowercase(), block);
        }
    }
}
