// Управление долгосрочными ключами пользователя
//
// Identity создаётся один раз на user_id и дальше только дополняется
// (one-time prekeys). Удаление — только явный wipe.

use crate::config::Config;
use crate::protocol::bundle::{
    IdentityKeyPublic, OneTimePreKeyPublic, PreKeyBundle, SignedPreKeyPublic, PREKEY_BUNDLE_VERSION,
};
use crate::storage::models::{StoredIdentity, StoredOneTimePreKey, StoredSignedPreKey};
use crate::storage::{identity_key, KeyStore};
use crate::utils::error::{MeridianError, Result};
use crate::utils::{serialization, time};
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use rand_core::RngCore;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::{debug, info};
use x25519_dalek::{PublicKey, StaticSecret};

/// Signed prekey с метаданными
#[derive(Clone)]
pub struct SignedPreKey {
    pub id: u32,
    pub secret: StaticSecret,
    /// Ed25519 подпись над публичной частью
    pub signature: Vec<u8>,
    pub created_at: i64,
}

impl SignedPreKey {
    pub fn public(&self) -> PublicKey {
        PublicKey::from(&self.secret)
    }
}

/// One-time prekey: адресуется целочисленным id, концептуально одноразовый
#[derive(Clone)]
pub struct OneTimePreKey {
    pub id: u32,
    pub secret: StaticSecret,
}

impl OneTimePreKey {
    pub fn public(&self) -> PublicKey {
        PublicKey::from(&self.secret)
    }
}

/// Долгосрочная identity пользователя
///
/// ## Ключи
///
/// - `signing_key`: Ed25519, подписывает prekeys и exchange key
/// - `exchange_secret`: X25519, участвует в X3DH и в v2 wrap
/// - `rsa_private`: RSA-2048 только для legacy direct wrap (v1)
pub struct Identity {
    pub user_id: String,
    pub signing_key: SigningKey,
    pub exchange_secret: StaticSecret,
    pub rsa_private: RsaPrivateKey,
    /// 14-битный registration id
    pub registration_id: u16,
    pub signed_prekey: SignedPreKey,
    pub one_time_prekeys: Vec<OneTimePreKey>,
    /// Монотонный счётчик id. Никогда не откатывается, индексы не
    /// переиспользуются.
    next_prekey_id: u32,
    pub created_at: i64,
}

impl Identity {
    pub fn exchange_public(&self) -> PublicKey {
        PublicKey::from(&self.exchange_secret)
    }

    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// RSA публичный ключ в SPKI DER (для публикации в bundle)
    pub fn rsa_public_der(&self) -> Result<Vec<u8>> {
        RsaPublicKey::from(&self.rsa_private)
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| MeridianError::SerializationError(format!("RSA SPKI encode failed: {}", e)))
    }

    /// Найти one-time prekey по id
    pub fn one_time_prekey(&self, id: u32) -> Option<&OneTimePreKey> {
        self.one_time_prekeys.iter().find(|otk| otk.id == id)
    }

    /// Публикуемый snapshot ключей
    ///
    /// Подписи над signed prekey и exchange key создаются заново при каждом
    /// экспорте долгосрочным signing key.
    pub fn export_bundle(&self) -> Result<PreKeyBundle> {
        let spk_public = self.signed_prekey.public();
        let spk_signature = self.signing_key.sign(spk_public.as_bytes());

        let exchange_public = self.exchange_public();
        let exchange_signature = self.signing_key.sign(exchange_public.as_bytes());

        debug!(
            target: "crypto::identity",
            user_id = %self.user_id,
            otk_count = %self.one_time_prekeys.len(),
            "Exporting prekey bundle"
        );

        Ok(PreKeyBundle {
            version: PREKEY_BUNDLE_VERSION,
            registration_id: self.registration_id,
            identity: IdentityKeyPublic {
                verifying_key: self.verifying_key_bytes().to_vec(),
                exchange_key: exchange_public.as_bytes().to_vec(),
                exchange_key_signature: exchange_signature.to_bytes().to_vec(),
                created_at: self.created_at,
            },
            signed_prekey: SignedPreKeyPublic {
                id: self.signed_prekey.id,
                public_key: spk_public.as_bytes().to_vec(),
            },
            signed_prekey_signature: spk_signature.to_bytes().to_vec(),
            one_time_prekeys: self
                .one_time_prekeys
                .iter()
                .map(|otk| OneTimePreKeyPublic {
                    id: otk.id,
                    public_key: otk.public().as_bytes().to_vec(),
                })
                .collect(),
            legacy_rsa_public_der: Some(serde_bytes::ByteBuf::from(self.rsa_public_der()?)),
        })
    }

    fn to_stored(&self) -> Result<StoredIdentity> {
        let rsa_private_der = self
            .rsa_private
            .to_pkcs8_der()
            .map_err(|e| MeridianError::SerializationError(format!("RSA PKCS#8 encode failed: {}", e)))?
            .as_bytes()
            .to_vec();

        Ok(StoredIdentity {
            user_id: self.user_id.clone(),
            signing_secret: self.signing_key.to_bytes().to_vec(),
            exchange_secret: self.exchange_secret.to_bytes().to_vec(),
            rsa_private_der,
            registration_id: self.registration_id,
            signed_prekey: StoredSignedPreKey {
                id: self.signed_prekey.id,
                secret: self.signed_prekey.secret.to_bytes().to_vec(),
                signature: self.signed_prekey.signature.clone(),
                created_at: self.signed_prekey.created_at,
            },
            one_time_prekeys: self
                .one_time_prekeys
                .iter()
                .map(|otk| StoredOneTimePreKey {
                    id: otk.id,
                    secret: otk.secret.to_bytes().to_vec(),
                })
                .collect(),
            next_prekey_id: self.next_prekey_id,
            created_at: self.created_at,
        })
    }

    fn from_stored(stored: StoredIdentity) -> Result<Self> {
        let signing_key = SigningKey::from_bytes(&to_array_32(&stored.signing_secret)?);
        let exchange_secret = StaticSecret::from(to_array_32(&stored.exchange_secret)?);
        let rsa_private = RsaPrivateKey::from_pkcs8_der(&stored.rsa_private_der)
            .map_err(|e| MeridianError::KeyUnavailable(format!("RSA key decode failed: {}", e)))?;

        Ok(Self {
            user_id: stored.user_id,
            signing_key,
            exchange_secret,
            rsa_private,
            registration_id: stored.registration_id,
            signed_prekey: SignedPreKey {
                id: stored.signed_prekey.id,
                secret: StaticSecret::from(to_array_32(&stored.signed_prekey.secret)?),
                signature: stored.signed_prekey.signature,
                created_at: stored.signed_prekey.created_at,
            },
            one_time_prekeys: stored
                .one_time_prekeys
                .into_iter()
                .map(|otk| {
                    Ok(OneTimePreKey {
                        id: otk.id,
                        secret: StaticSecret::from(to_array_32(&otk.secret)?),
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            next_prekey_id: stored.next_prekey_id,
            created_at: stored.created_at,
        })
    }
}

/// Хранилище identity поверх KeyStore
pub struct IdentityStore;

impl IdentityStore {
    /// Вернуть существующую identity или создать новую. Идемпотентно по
    /// user_id.
    ///
    /// Создание генерирует signing/exchange/RSA ключи, registration id,
    /// signed prekey и стартовый пул one-time prekeys, после чего identity
    /// сразу персистится.
    pub fn ensure<S: KeyStore>(storage: &mut S, user_id: &str) -> Result<Identity> {
        if let Some(existing) = Self::load(storage, user_id)? {
            debug!(target: "crypto::identity", user_id = %user_id, "Identity already exists");
            return Ok(existing);
        }

        info!(target: "crypto::identity", user_id = %user_id, "Generating new identity");

        let identity = Self::generate(user_id)?;
        Self::persist(storage, &identity)?;

        Ok(identity)
    }

    /// Загрузить identity из хранилища
    pub fn load<S: KeyStore>(storage: &S, user_id: &str) -> Result<Option<Identity>> {
        match storage.get(&identity_key(user_id))? {
            Some(bytes) => {
                let stored: StoredIdentity = serialization::from_bincode(&bytes)?;
                Ok(Some(Identity::from_stored(stored)?))
            }
            None => Ok(None),
        }
    }

    /// Персистировать identity
    pub fn persist<S: KeyStore>(storage: &mut S, identity: &Identity) -> Result<()> {
        let stored = identity.to_stored()?;
        let bytes = serialization::to_bincode(&stored)?;
        storage.set(&identity_key(&identity.user_id), bytes)
    }

    /// Пополнить пул one-time prekeys
    ///
    /// Генерирует `count` свежих ключей с id, продолжающими счётчик,
    /// персистит identity и возвращает только публичные половины для
    /// публикации.
    pub fn top_up<S: KeyStore>(
        storage: &mut S,
        identity: &mut Identity,
        count: usize,
    ) -> Result<Vec<OneTimePreKeyPublic>> {
        let mut published = Vec::with_capacity(count);

        for _ in 0..count {
            let otk = OneTimePreKey {
                id: identity.next_prekey_id,
                secret: StaticSecret::random_from_rng(OsRng),
            };
            identity.next_prekey_id += 1;

            published.push(OneTimePreKeyPublic {
                id: otk.id,
                public_key: otk.public().as_bytes().to_vec(),
            });
            identity.one_time_prekeys.push(otk);
        }

        Self::persist(storage, identity)?;

        info!(
            target: "crypto::identity",
            user_id = %identity.user_id,
            added = %count,
            pool = %identity.one_time_prekeys.len(),
            "One-time prekeys topped up"
        );

        Ok(published)
    }

    /// Явный key wipe: удаляет identity из хранилища
    pub fn wipe<S: KeyStore>(storage: &mut S, user_id: &str) -> Result<()> {
        info!(target: "crypto::identity", user_id = %user_id, "Wiping identity");
        storage.delete(&identity_key(user_id))
    }

    fn generate(user_id: &str) -> Result<Identity> {
        let cfg = Config::global();

        let signing_key = SigningKey::generate(&mut OsRng);
        let exchange_secret = StaticSecret::random_from_rng(OsRng);

        // RSA нужен только для v1 direct wrap, но генерируется сразу:
        // собеседники без ratchet-совместимого клиента шифруют именно им
        let rsa_private = RsaPrivateKey::new(&mut OsRng, cfg.rsa_modulus_bits)
            .map_err(|e| MeridianError::CryptoError(format!("RSA key generation failed: {}", e)))?;

        let registration_id = generate_registration_id(cfg.registration_id_mask);
        let now = time::current_timestamp();

        let spk_secret = StaticSecret::random_from_rng(OsRng);
        let spk_public = PublicKey::from(&spk_secret);
        let spk_signature = signing_key.sign(spk_public.as_bytes()).to_bytes().to_vec();

        let signed_prekey = SignedPreKey {
            id: 1,
            secret: spk_secret,
            signature: spk_signature,
            created_at: now,
        };

        let mut identity = Identity {
            user_id: user_id.to_string(),
            signing_key,
            exchange_secret,
            rsa_private,
            registration_id,
            signed_prekey,
            one_time_prekeys: Vec::new(),
            next_prekey_id: 2,
            created_at: now,
        };

        // Стартовый пул one-time prekeys
        for _ in 0..cfg.otk_pool_size {
            let otk = OneTimePreKey {
                id: identity.next_prekey_id,
                secret: StaticSecret::random_from_rng(OsRng),
            };
            identity.next_prekey_id += 1;
            identity.one_time_prekeys.push(otk);
        }

        Ok(identity)
    }
}

/// Случайный ненулевой registration id в пределах маски (14 бит)
fn generate_registration_id(mask: u16) -> u16 {
    loop {
        let candidate = (OsRng.next_u32() as u16) & mask;
        if candidate != 0 {
            return candidate;
        }
    }
}

/// Конвертировать срез в [u8; 32]
fn to_array_32(bytes: &[u8]) -> Result<[u8; 32]> {
    bytes.try_into().map_err(|_| {
        MeridianError::KeyUnavailable(format!(
            "Invalid key length: expected 32, got {}",
            bytes.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_ensure_identity_is_idempotent() {
        let mut storage = MemoryStorage::new();

        let first = IdentityStore::ensure(&mut storage, "alice").unwrap();
        let second = IdentityStore::ensure(&mut storage, "alice").unwrap();

        assert_eq!(first.registration_id, second.registration_id);
        assert_eq!(
            first.exchange_public().as_bytes(),
            second.exchange_public().as_bytes()
        );
        assert_eq!(first.one_time_prekeys.len(), second.one_time_prekeys.len());
    }

    #[test]
    fn test_identity_creation_defaults() {
        let mut storage = MemoryStorage::new();
        let identity = IdentityStore::ensure(&mut storage, "alice").unwrap();

        assert!(identity.registration_id > 0);
        assert!(identity.registration_id <= Config::global().registration_id_mask);
        assert_eq!(
            identity.one_time_prekeys.len(),
            Config::global().otk_pool_size
        );
    }

    #[test]
    fn test_top_up_indices_are_monotonic() {
        let mut storage = MemoryStorage::new();
        let mut identity = IdentityStore::ensure(&mut storage, "alice").unwrap();

        let batch1 = IdentityStore::top_up(&mut storage, &mut identity, 5).unwrap();
        let batch2 = IdentityStore::top_up(&mut storage, &mut identity, 5).unwrap();

        let mut seen: Vec<u32> = identity.one_time_prekeys.iter().map(|k| k.id).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), identity.one_time_prekeys.len());

        let max1 = batch1.iter().map(|k| k.id).max().unwrap();
        let min2 = batch2.iter().map(|k| k.id).min().unwrap();
        assert!(min2 > max1);
    }

    #[test]
    fn test_identity_survives_reload() {
        let mut storage = MemoryStorage::new();
        let identity = IdentityStore::ensure(&mut storage, "alice").unwrap();

        let reloaded = IdentityStore::load(&storage, "alice").unwrap().unwrap();

        assert_eq!(reloaded.user_id, identity.user_id);
        assert_eq!(reloaded.registration_id, identity.registration_id);
        assert_eq!(
            reloaded.signed_prekey.public().as_bytes(),
            identity.signed_prekey.public().as_bytes()
        );
    }

    #[test]
    fn test_wipe_removes_identity() {
        let mut storage = MemoryStorage::new();
        IdentityStore::ensure(&mut storage, "alice").unwrap();

        IdentityStore::wipe(&mut storage, "alice").unwrap();

        assert!(IdentityStore::load(&storage, "alice").unwrap().is_none());
    }

    #[test]
    fn test_exported_bundle_signatures_verify() {
        let mut storage = MemoryStorage::new();
        let identity = IdentityStore::ensure(&mut storage, "alice").unwrap();

        let bundle = identity.export_bundle().unwrap();
        assert!(bundle.verify_signatures().is_ok());
    }
}
