// Legacy key wrapping: доставка симметричного ключа сообщения получателям,
// у которых ещё нет ratchet-сессии.
//
// Две взаимодополняющие схемы, по опубликованному материалу получателя:
// - v1 direct wrap: AES-ключ сообщения заворачивается напрямую RSA-OAEP
//   долгосрочным ключом получателя. Forward secrecy нет: компрометация
//   долгосрочного приватного ключа ретроактивно раскрывает все такие
//   сообщения.
// - v2 ephemeral-ECDH wrap: одна ephemeral X25519 пара на сообщение,
//   HKDF(shared, salt = conversation id) → ключ обёртки → AES-GCM wrap.
//   Ephemeral private не переживает вызов.
//
// Payload всегда шифруется AES-256-GCM с AAD = conversation id. При
// расшифровке AAD-вариант пробуется первым; путь без AAD — переходный
// shim для сообщений, созданных до включения привязки, и срабатывает
// только после ошибки аутентификации.

use crate::config::Config;
use crate::error::CryptoError;
use aes_gcm::{
    aead::{Aead, Payload},
    Aes256Gcm, KeyInit, Nonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand_core::RngCore;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::collections::BTreeMap;
use tracing::{debug, trace};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Метка HKDF для ключа обёртки v2
const WRAP_KEY_INFO: &[u8] = b"Meridian Legacy Key Wrap";

/// Получатель v1 direct wrap
pub struct DirectWrapRecipient {
    pub id: String,
    /// RSA public key (SPKI DER)
    pub rsa_public_der: Vec<u8>,
}

/// Получатель v2 ephemeral-ECDH wrap
pub struct EcdhWrapRecipient {
    pub id: String,
    /// X25519 exchange public key (32 байта)
    pub exchange_public: [u8; 32],
}

/// Результат шифрования legacy-схемой
pub struct WrappedPayload {
    /// Nonce AES-GCM для payload
    pub iv: Vec<u8>,
    /// Payload ciphertext (с tag)
    pub ciphertext: Vec<u8>,
    /// Обёрнутый ключ сообщения по id получателя
    pub wrapped_keys: BTreeMap<String, Vec<u8>>,
    /// Ephemeral public key (только v2)
    pub ephemeral_public: Option<[u8; 32]>,
}

// ============================================================================
// v1: direct RSA-OAEP wrap
// ============================================================================

/// Зашифровать payload и завернуть ключ сообщения RSA-OAEP ключами
/// получателей (v1)
pub fn encrypt_direct_wrap(
    conversation_id: &str,
    plaintext: &[u8],
    recipients: &[DirectWrapRecipient],
) -> Result<WrappedPayload, CryptoError> {
    debug!(
        target: "crypto::wrap",
        conversation_id = %conversation_id,
        recipients = %recipients.len(),
        "Encrypting with direct wrap (v1)"
    );

    let message_key = generate_message_key();
    let (iv, ciphertext) = encrypt_payload(&message_key, conversation_id, plaintext)?;

    let mut wrapped_keys = BTreeMap::new();

    for recipient in recipients {
        let rsa_public = RsaPublicKey::from_public_key_der(&recipient.rsa_public_der)
            .map_err(|e| CryptoError::InvalidInputError(format!("Invalid RSA SPKI: {}", e)))?;
        let wrapped = rsa_public
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), message_key.as_ref())
            .map_err(|e| CryptoError::KeyWrapError(e.to_string()))?;
        wrapped_keys.insert(recipient.id.clone(), wrapped);
    }

    Ok(WrappedPayload {
        iv,
        ciphertext,
        wrapped_keys,
        ephemeral_public: None,
    })
}

/// Расшифровать v1: развернуть ключ сообщения RSA-OAEP и расшифровать payload
pub fn decrypt_direct_wrap(
    conversation_id: &str,
    user_id: &str,
    iv: &[u8],
    ciphertext: &[u8],
    wrapped_keys: &BTreeMap<String, Vec<u8>>,
    rsa_private: &RsaPrivateKey,
) -> Result<Vec<u8>, CryptoError> {
    let wrapped = wrapped_keys.get(user_id).ok_or_else(|| {
        CryptoError::KeyUnwrapError(format!("No wrapped key for recipient {}", user_id))
    })?;

    let padding = Oaep::new::<Sha256>();
    let message_key = Zeroizing::new(
        rsa_private
            .decrypt(padding, wrapped)
            .map_err(|e| CryptoError::KeyUnwrapError(e.to_string()))?,
    );

    decrypt_payload(&message_key, conversation_id, iv, ciphertext)
}

// ============================================================================
// v2: ephemeral-ECDH wrap
// ============================================================================

/// Зашифровать payload и завернуть ключ сообщения через ephemeral ECDH (v2)
///
/// Одна ephemeral пара на сообщение, общая для всех получателей. Приватная
/// половина не покидает функцию.
pub fn encrypt_ecdh_wrap(
    conversation_id: &str,
    plaintext: &[u8],
    recipients: &[EcdhWrapRecipient],
) -> Result<WrappedPayload, CryptoError> {
    debug!(
        target: "crypto::wrap",
        conversation_id = %conversation_id,
        recipients = %recipients.len(),
        "Encrypting with ephemeral-ECDH wrap (v2)"
    );

    let message_key = generate_message_key();
    let (iv, ciphertext) = encrypt_payload(&message_key, conversation_id, plaintext)?;

    let ephemeral_secret = StaticSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral_secret);

    let mut wrapped_keys = BTreeMap::new();

    for recipient in recipients {
        let shared = ephemeral_secret.diffie_hellman(&PublicKey::from(recipient.exchange_public));
        let wrap_key = derive_wrap_key(shared.as_bytes(), conversation_id)?;
        let wrapped = wrap_message_key(&wrap_key, &message_key)?;
        wrapped_keys.insert(recipient.id.clone(), wrapped);
    }

    Ok(WrappedPayload {
        iv,
        ciphertext,
        wrapped_keys,
        ephemeral_public: Some(ephemeral_public.to_bytes()),
    })
}

/// Расшифровать v2: восстановить ключ обёртки через ECDH с ephemeral public
/// key из записи
pub fn decrypt_ecdh_wrap(
    conversation_id: &str,
    user_id: &str,
    iv: &[u8],
    ciphertext: &[u8],
    ephemeral_public: &[u8; 32],
    wrapped_keys: &BTreeMap<String, Vec<u8>>,
    local_exchange_secret: &StaticSecret,
) -> Result<Vec<u8>, CryptoError> {
    let wrapped = wrapped_keys.get(user_id).ok_or_else(|| {
        CryptoError::KeyUnwrapError(format!("No wrapped key for recipient {}", user_id))
    })?;

    let shared = local_exchange_secret.diffie_hellman(&PublicKey::from(*ephemeral_public));
    let wrap_key = derive_wrap_key(shared.as_bytes(), conversation_id)?;
    let message_key = Zeroizing::new(unwrap_message_key(&wrap_key, wrapped)?);

    decrypt_payload(&message_key, conversation_id, iv, ciphertext)
}

// ============================================================================
// Общие примитивы
// ============================================================================

/// Случайный AES-256 ключ сообщения
fn generate_message_key() -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; Config::global().key_length]);
    OsRng.fill_bytes(key.as_mut_slice());
    key
}

/// HKDF-SHA256(salt = conversation id) → ключ обёртки
fn derive_wrap_key(shared_secret: &[u8], conversation_id: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(Some(conversation_id.as_bytes()), shared_secret);
    let mut wrap_key = Zeroizing::new(vec![0u8; Config::global().key_length]);
    hkdf.expand(WRAP_KEY_INFO, &mut wrap_key)
        .map_err(|e| CryptoError::KeyDerivationError(e.to_string()))?;
    Ok(wrap_key)
}

/// Аутентифицированная обёртка ключа: AES-GCM, формат nonce || ciphertext
fn wrap_message_key(wrap_key: &[u8], message_key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce_length = Config::global().nonce_length;
    let cipher = Aes256Gcm::new_from_slice(wrap_key)
        .map_err(|e| CryptoError::KeyWrapError(e.to_string()))?;

    let mut nonce_bytes = vec![0u8; nonce_length];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let wrapped = cipher
        .encrypt(nonce, message_key)
        .map_err(|e| CryptoError::KeyWrapError(e.to_string()))?;

    let mut result = Vec::with_capacity(nonce_length + wrapped.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&wrapped);
    Ok(result)
}

fn unwrap_message_key(wrap_key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce_length = Config::global().nonce_length;
    if data.len() < nonce_length {
        return Err(CryptoError::KeyUnwrapError(
            "Wrapped key too short".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new_from_slice(wrap_key)
        .map_err(|e| CryptoError::KeyUnwrapError(e.to_string()))?;

    let (nonce_bytes, wrapped) = data.split_at(nonce_length);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, wrapped)
        .map_err(|e| CryptoError::KeyUnwrapError(e.to_string()))
}

/// Зашифровать payload AES-256-GCM с AAD = conversation id
fn encrypt_payload(
    message_key: &[u8],
    conversation_id: &str,
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(message_key)
        .map_err(|e| CryptoError::AeadEncryptionError(e.to_string()))?;

    let mut nonce_bytes = vec![0u8; Config::global().nonce_length];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: conversation_id.as_bytes(),
            },
        )
        .map_err(|e| CryptoError::AeadEncryptionError(e.to_string()))?;

    Ok((nonce_bytes, ciphertext))
}

/// Расшифровать payload: сначала с AAD = conversation id, затем (только
/// при ошибке аутентификации и включённом fallback) без AAD.
///
/// Порядок фиксирован: попытка без AAD первой ослабила бы привязку для
/// новых сообщений.
fn decrypt_payload(
    message_key: &[u8],
    conversation_id: &str,
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(message_key)
        .map_err(|e| CryptoError::AeadDecryptionError(e.to_string()))?;
    let nonce = Nonce::from_slice(iv);

    let bound = cipher.decrypt(
        nonce,
        Payload {
            msg: ciphertext,
            aad: conversation_id.as_bytes(),
        },
    );

    match bound {
        Ok(plaintext) => Ok(plaintext),
        Err(_) if Config::global().allow_no_aad_fallback => {
            trace!(
                target: "crypto::wrap",
                conversation_id = %conversation_id,
                "AAD-bound decryption failed, trying legacy no-AAD path"
            );
            cipher
                .decrypt(nonce, ciphertext)
                .map_err(|e| CryptoError::AeadDecryptionError(e.to_string()))
        }
        Err(e) => Err(CryptoError::AeadDecryptionError(e.to_string())),
    }
}

/// Закодировать RSA public key в SPKI DER (для публикации)
pub fn rsa_public_to_der(rsa_public: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    rsa_public
        .to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| CryptoError::SerializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rsa_keypair() -> (RsaPrivateKey, Vec<u8>) {
        let private = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let public_der = rsa_public_to_der(&RsaPublicKey::from(&private)).unwrap();
        (private, public_der)
    }

    #[test]
    fn test_direct_wrap_roundtrip() {
        let (bob_private, bob_public_der) = rsa_keypair();

        let payload = encrypt_direct_wrap(
            "conv-1",
            b"legacy hello",
            &[DirectWrapRecipient {
                id: "bob".to_string(),
                rsa_public_der: bob_public_der,
            }],
        )
        .unwrap();

        assert!(payload.ephemeral_public.is_none());

        let plaintext = decrypt_direct_wrap(
            "conv-1",
            "bob",
            &payload.iv,
            &payload.ciphertext,
            &payload.wrapped_keys,
            &bob_private,
        )
        .unwrap();

        assert_eq!(plaintext, b"legacy hello");
    }

    #[test]
    fn test_direct_wrap_wrong_key_fails() {
        let (_, bob_public_der) = rsa_keypair();
        let (mallory_private, _) = rsa_keypair();

        let payload = encrypt_direct_wrap(
            "conv-1",
            b"legacy hello",
            &[DirectWrapRecipient {
                id: "bob".to_string(),
                rsa_public_der: bob_public_der,
            }],
        )
        .unwrap();

        let result = decrypt_direct_wrap(
            "conv-1",
            "bob",
            &payload.iv,
            &payload.ciphertext,
            &payload.wrapped_keys,
            &mallory_private,
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_ecdh_wrap_roundtrip_multiple_recipients() {
        let bob_secret = StaticSecret::random_from_rng(OsRng);
        let carol_secret = StaticSecret::random_from_rng(OsRng);

        let payload = encrypt_ecdh_wrap(
            "conv-2",
            b"hello both",
            &[
                EcdhWrapRecipient {
                    id: "bob".to_string(),
                    exchange_public: PublicKey::from(&bob_secret).to_bytes(),
                },
                EcdhWrapRecipient {
                    id: "carol".to_string(),
                    exchange_public: PublicKey::from(&carol_secret).to_bytes(),
                },
            ],
        )
        .unwrap();

        let ephemeral = payload.ephemeral_public.unwrap();
        assert_eq!(payload.wrapped_keys.len(), 2);

        for (user, secret) in [("bob", &bob_secret), ("carol", &carol_secret)] {
            let plaintext = decrypt_ecdh_wrap(
                "conv-2",
                user,
                &payload.iv,
                &payload.ciphertext,
                &ephemeral,
                &payload.wrapped_keys,
                secret,
            )
            .unwrap();
            assert_eq!(plaintext, b"hello both");
        }
    }

    #[test]
    fn test_ecdh_wrap_wrong_conversation_fails() {
        let bob_secret = StaticSecret::random_from_rng(OsRng);

        let payload = encrypt_ecdh_wrap(
            "conv-a",
            b"bound to conv-a",
            &[EcdhWrapRecipient {
                id: "bob".to_string(),
                exchange_public: PublicKey::from(&bob_secret).to_bytes(),
            }],
        )
        .unwrap();

        // Не та беседа: и HKDF salt, и AAD не совпадают
        let result = decrypt_ecdh_wrap(
            "conv-b",
            "bob",
            &payload.iv,
            &payload.ciphertext,
            &payload.ephemeral_public.unwrap(),
            &payload.wrapped_keys,
            &bob_secret,
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_aad_binding_with_no_aad_fallback() {
        // Сообщение, созданное до включения AAD: шифруем без AAD вручную
        let message_key = generate_message_key();
        let cipher = Aes256Gcm::new_from_slice(&message_key).unwrap();
        let mut nonce_bytes = vec![0u8; Config::global().nonce_length];
        OsRng.fill_bytes(&mut nonce_bytes);
        let legacy_ct = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), b"pre-aad message".as_ref())
            .unwrap();

        // AAD-путь падает, legacy-путь спасает
        let plaintext =
            decrypt_payload(&message_key, "conv-any", &nonce_bytes, &legacy_ct).unwrap();
        assert_eq!(plaintext, b"pre-aad message");

        // Новое сообщение с AAD расшифровывается только под своей беседой
        let (iv, ct) = encrypt_payload(&message_key, "conv-a", b"bound").unwrap();
        assert_eq!(
            decrypt_payload(&message_key, "conv-a", &iv, &ct).unwrap(),
            b"bound"
        );
        assert!(decrypt_payload(&message_key, "conv-b", &iv, &ct).is_err());
    }

    #[test]
    fn test_missing_recipient_key() {
        let bob_secret = StaticSecret::random_from_rng(OsRng);

        let payload = encrypt_ecdh_wrap(
            "conv-2",
            b"hello",
            &[EcdhWrapRecipient {
                id: "bob".to_string(),
                exchange_public: PublicKey::from(&bob_secret).to_bytes(),
            }],
        )
        .unwrap();

        let result = decrypt_ecdh_wrap(
            "conv-2",
            "mallory",
            &payload.iv,
            &payload.ciphertext,
            &payload.ephemeral_public.unwrap(),
            &payload.wrapped_keys,
            &bob_secret,
        );

        assert!(result.is_err());
    }
}
