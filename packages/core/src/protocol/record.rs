// Запись шифротекста, пересекающая границу с транспортом
//
// Схема, которой зашифровано сообщение, выражена тегированным enum и
// матчится исчерпывающе — никакого прощупывания опциональных полей.

use crate::crypto::messaging::{PreKeyHint, RatchetWireMessage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Версии конверта. Строго возрастающая способность:
/// 3 ⇒ ratchet, 2 ⇒ ephemeral ECDH, 1 ⇒ baseline direct wrap.
pub const VERSION_DIRECT_WRAP: u8 = 1;
pub const VERSION_ECDH_WRAP: u8 = 2;
pub const VERSION_RATCHET: u8 = 3;

/// Первое сообщение новой сессии: ratchet-сообщение плюс метаданные,
/// по которым получатель выполняет responder-сторону X3DH
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyRatchetMessage {
    /// Registration id отправителя
    pub registration_id: u16,
    /// X25519 identity (exchange) public key отправителя
    #[serde(with = "serde_bytes")]
    pub identity_exchange_key: Vec<u8>,
    /// Ed25519 verifying key отправителя
    #[serde(with = "serde_bytes")]
    pub identity_verifying_key: Vec<u8>,
    /// Id signed prekey получателя, использованного в handshake
    pub signed_prekey_id: u32,
    /// Id one-time prekey получателя, если был использован
    pub one_time_prekey_id: Option<u32>,
    pub message: RatchetWireMessage,
}

impl PreKeyRatchetMessage {
    pub fn from_hint(hint: &PreKeyHint, message: RatchetWireMessage) -> Self {
        Self {
            registration_id: hint.registration_id,
            identity_exchange_key: hint.identity_exchange_key.clone(),
            identity_verifying_key: hint.identity_verifying_key.clone(),
            signed_prekey_id: hint.signed_prekey_id,
            one_time_prekey_id: hint.one_time_prekey_id,
            message,
        }
    }
}

/// Ratchet-сообщение на проводе: либо bootstrap новой сессии (pre-key),
/// либо обычное сообщение установившейся сессии
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RatchetEnvelope {
    PreKey(PreKeyRatchetMessage),
    Normal(RatchetWireMessage),
}

impl RatchetEnvelope {
    pub fn is_prekey(&self) -> bool {
        matches!(self, RatchetEnvelope::PreKey(_))
    }
}

/// Запись шифротекста: по одному варианту на схему шифрования
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "camelCase")]
pub enum CiphertextRecord {
    /// v1: ключ сообщения завернут RSA-OAEP долгосрочным ключом получателя
    #[serde(rename_all = "camelCase")]
    DirectWrap {
        #[serde(with = "serde_bytes")]
        iv: Vec<u8>,
        #[serde(with = "serde_bytes")]
        ciphertext: Vec<u8>,
        wrapped_keys: BTreeMap<String, serde_bytes::ByteBuf>,
    },

    /// v2: ключ сообщения завернут через ephemeral ECDH + HKDF
    #[serde(rename_all = "camelCase")]
    EphemeralEcdhWrap {
        #[serde(with = "serde_bytes")]
        iv: Vec<u8>,
        #[serde(with = "serde_bytes")]
        ciphertext: Vec<u8>,
        ephemeral_public_key: [u8; 32],
        wrapped_keys: BTreeMap<String, serde_bytes::ByteBuf>,
    },

    /// v3: ratchet-сессия, ключи не путешествуют вообще
    #[serde(rename_all = "camelCase")]
    Ratchet { message: RatchetEnvelope },
}

impl CiphertextRecord {
    /// Номер версии конверта {1, 2, 3}
    pub fn version(&self) -> u8 {
        match self {
            CiphertextRecord::DirectWrap { .. } => VERSION_DIRECT_WRAP,
            CiphertextRecord::EphemeralEcdhWrap { .. } => VERSION_ECDH_WRAP,
            CiphertextRecord::Ratchet { .. } => VERSION_RATCHET,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_message() -> RatchetWireMessage {
        RatchetWireMessage {
            dh_public_key: [7u8; 32],
            message_number: 3,
            ciphertext: vec![1, 2, 3],
            nonce: vec![0u8; 12],
            previous_chain_length: 0,
            suite_id: 1,
        }
    }

    #[test]
    fn test_record_versions() {
        let v1 = CiphertextRecord::DirectWrap {
            iv: vec![0; 12],
            ciphertext: vec![1],
            wrapped_keys: BTreeMap::new(),
        };
        let v2 = CiphertextRecord::EphemeralEcdhWrap {
            iv: vec![0; 12],
            ciphertext: vec![1],
            ephemeral_public_key: [0u8; 32],
            wrapped_keys: BTreeMap::new(),
        };
        let v3 = CiphertextRecord::Ratchet {
            message: RatchetEnvelope::Normal(wire_message()),
        };

        assert_eq!(v1.version(), 1);
        assert_eq!(v2.version(), 2);
        assert_eq!(v3.version(), 3);
    }

    #[test]
    fn test_record_serde_roundtrip() {
        let record = CiphertextRecord::Ratchet {
            message: RatchetEnvelope::Normal(wire_message()),
        };

        let bytes = serde_json::to_vec(&record).unwrap();
        let parsed: CiphertextRecord = serde_json::from_slice(&bytes).unwrap();

        match parsed {
            CiphertextRecord::Ratchet {
                message: RatchetEnvelope::Normal(msg),
            } => {
                assert_eq!(msg.message_number, 3);
                assert_eq!(msg.dh_public_key, [7u8; 32]);
            }
            other => panic!("Unexpected record: {:?}", other),
        }
    }

    #[test]
    fn test_prekey_envelope_tagging() {
        let prekey = RatchetEnvelope::PreKey(PreKeyRatchetMessage {
            registration_id: 99,
            identity_exchange_key: vec![0u8; 32],
            identity_verifying_key: vec![0u8; 32],
            signed_prekey_id: 1,
            one_time_prekey_id: Some(5),
            message: wire_message(),
        });
        let normal = RatchetEnvelope::Normal(wire_message());

        assert!(prekey.is_prekey());
        assert!(!normal.is_prekey());
    }
}
