// Prekey bundle: публикуемый snapshot ключей пользователя
//
// Все вложенные структуры типизированы и валидируются при разборе: никакой
// duck-typed вложенной JSON-строки внутри строки.

use crate::config::Config;
use crate::utils::error::{MeridianError, Result};
use crate::utils::serialization;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

/// Текущая версия формата bundle
pub const PREKEY_BUNDLE_VERSION: u8 = 1;

/// Публичная identity: подписывающий ключ + exchange ключ с подписью
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityKeyPublic {
    /// Ed25519 verifying key
    #[serde(with = "serde_bytes")]
    pub verifying_key: Vec<u8>,
    /// X25519 exchange public key
    #[serde(with = "serde_bytes")]
    pub exchange_key: Vec<u8>,
    /// Ed25519 подпись над exchange_key
    #[serde(with = "serde_bytes")]
    pub exchange_key_signature: Vec<u8>,
    /// Unix timestamp создания identity
    pub created_at: i64,
}

/// Публичная часть signed prekey
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPreKeyPublic {
    pub id: u32,
    #[serde(with = "serde_bytes")]
    pub public_key: Vec<u8>,
}

/// Публичная часть one-time prekey
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimePreKeyPublic {
    pub id: u32,
    #[serde(with = "serde_bytes")]
    pub public_key: Vec<u8>,
}

/// Публикуемый prekey bundle
///
/// Неизменяемый snapshot: one-time prekey концептуально расходуется одним
/// handshake, но single-use на стороне сервера здесь не форсируется.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyBundle {
    pub version: u8,
    /// 14-битный registration id владельца
    pub registration_id: u16,
    pub identity: IdentityKeyPublic,
    pub signed_prekey: SignedPreKeyPublic,
    #[serde(with = "serde_bytes")]
    pub signed_prekey_signature: Vec<u8>,
    pub one_time_prekeys: Vec<OneTimePreKeyPublic>,
    /// RSA public key (SPKI DER) для v1 direct wrap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_rsa_public_der: Option<serde_bytes::ByteBuf>,
}

impl PreKeyBundle {
    /// Сериализовать в JSON-байты (wire-формат)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serialization::to_json_bytes(self)
    }

    /// Разобрать из JSON-байтов с валидацией
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let bundle: PreKeyBundle = serialization::from_json_bytes(bytes)?;
        bundle.validate()?;
        Ok(bundle)
    }

    /// Структурная валидация: версия, длины ключей, наличие подписей
    pub fn validate(&self) -> Result<()> {
        let cfg = Config::global();

        if self.version != PREKEY_BUNDLE_VERSION {
            return Err(MeridianError::ValidationError(format!(
                "Unsupported bundle version: {}",
                self.version
            )));
        }

        if self.registration_id == 0 || self.registration_id > cfg.registration_id_mask {
            return Err(MeridianError::ValidationError(format!(
                "Registration id out of range: {}",
                self.registration_id
            )));
        }

        for (name, key) in [
            ("verifyingKey", &self.identity.verifying_key),
            ("exchangeKey", &self.identity.exchange_key),
            ("signedPrekey", &self.signed_prekey.public_key),
        ] {
            if key.len() != cfg.public_key_size {
                return Err(MeridianError::ValidationError(format!(
                    "{} must be {} bytes, got {}",
                    name,
                    cfg.public_key_size,
                    key.len()
                )));
            }
        }

        for (name, sig) in [
            ("exchangeKeySignature", &self.identity.exchange_key_signature),
            ("signedPrekeySignature", &self.signed_prekey_signature),
        ] {
            if sig.len() != cfg.signature_size {
                return Err(MeridianError::ValidationError(format!(
                    "{} must be {} bytes, got {}",
                    name,
                    cfg.signature_size,
                    sig.len()
                )));
            }
        }

        for otk in &self.one_time_prekeys {
            if otk.public_key.len() != cfg.public_key_size {
                return Err(MeridianError::ValidationError(format!(
                    "One-time prekey {} has invalid key length {}",
                    otk.id,
                    otk.public_key.len()
                )));
            }
        }

        Ok(())
    }

    /// Достаточно ли полей для X3DH: identity key, signed prekey и подпись.
    /// Если нет — вызывающий код откатывается на legacy wrap.
    pub fn is_complete_for_handshake(&self) -> bool {
        !self.identity.exchange_key.is_empty()
            && !self.signed_prekey.public_key.is_empty()
            && !self.signed_prekey_signature.is_empty()
    }

    /// Проверить обе подписи bundle долгосрочным verifying key владельца
    pub fn verify_signatures(&self) -> Result<()> {
        let vk_bytes: &[u8; 32] = self
            .identity
            .verifying_key
            .as_slice()
            .try_into()
            .map_err(|_| MeridianError::ValidationError("Invalid verifying key length".into()))?;
        let verifying_key = VerifyingKey::from_bytes(vk_bytes)
            .map_err(|e| MeridianError::SignatureInvalid(format!("Bad verifying key: {}", e)))?;

        for (name, message, signature) in [
            (
                "exchange key",
                self.identity.exchange_key.as_slice(),
                self.identity.exchange_key_signature.as_slice(),
            ),
            (
                "signed prekey",
                self.signed_prekey.public_key.as_slice(),
                self.signed_prekey_signature.as_slice(),
            ),
        ] {
            let sig_bytes: &[u8; 64] = signature.try_into().map_err(|_| {
                MeridianError::SignatureInvalid(format!("Invalid {} signature length", name))
            })?;
            verifying_key
                .verify(message, &Signature::from_bytes(sig_bytes))
                .map_err(|e| {
                    MeridianError::SignatureInvalid(format!(
                        "{} signature does not verify: {}",
                        name, e
                    ))
                })?;
        }

        Ok(())
    }

    /// Первый доступный one-time prekey (инициатор расходует его в handshake)
    pub fn take_one_time_prekey(&self) -> Option<&OneTimePreKeyPublic> {
        self.one_time_prekeys.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::identity::IdentityStore;
    use crate::storage::MemoryStorage;

    fn make_bundle() -> PreKeyBundle {
        let mut storage = MemoryStorage::new();
        let identity = IdentityStore::ensure(&mut storage, "bob").unwrap();
        identity.export_bundle().unwrap()
    }

    #[test]
    fn test_bundle_json_roundtrip_with_validation() {
        let bundle = make_bundle();

        let bytes = bundle.to_bytes().unwrap();
        let parsed = PreKeyBundle::parse(&bytes).unwrap();

        assert_eq!(parsed.registration_id, bundle.registration_id);
        assert_eq!(parsed.signed_prekey.id, bundle.signed_prekey.id);
        assert_eq!(parsed.one_time_prekeys.len(), bundle.one_time_prekeys.len());
        assert!(parsed.is_complete_for_handshake());
    }

    #[test]
    fn test_bundle_signatures_verify() {
        let bundle = make_bundle();
        assert!(bundle.verify_signatures().is_ok());
    }

    #[test]
    fn test_tampered_signed_prekey_fails_verification() {
        let mut bundle = make_bundle();
        bundle.signed_prekey.public_key[0] ^= 0xFF;

        assert!(matches!(
            bundle.verify_signatures(),
            Err(MeridianError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_key_length() {
        let mut bundle = make_bundle();
        bundle.identity.exchange_key.truncate(16);

        let bytes = serde_json::to_vec(&bundle).unwrap();
        assert!(PreKeyBundle::parse(&bytes).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_version() {
        let mut bundle = make_bundle();
        bundle.version = 9;

        let bytes = serde_json::to_vec(&bundle).unwrap();
        assert!(PreKeyBundle::parse(&bytes).is_err());
    }
}
