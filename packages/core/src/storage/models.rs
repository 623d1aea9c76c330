// Модели данных для хранилища
//
// Приватный материал хранится сырыми байтами; шифрование at-rest — забота
// платформенного key-value backend.

use serde::{Deserialize, Serialize};

/// Signed prekey в хранилище
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSignedPreKey {
    pub id: u32,
    /// X25519 секрет (32 байта)
    #[serde(with = "serde_bytes")]
    pub secret: Vec<u8>,
    /// Ed25519 подпись над публичной частью
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    pub created_at: i64,
}

/// One-time prekey в хранилище
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredOneTimePreKey {
    pub id: u32,
    /// X25519 секрет (32 байта)
    #[serde(with = "serde_bytes")]
    pub secret: Vec<u8>,
}

/// Identity пользователя в хранилище
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredIdentity {
    pub user_id: String,
    /// Ed25519 signing key (32 байта)
    #[serde(with = "serde_bytes")]
    pub signing_secret: Vec<u8>,
    /// X25519 exchange secret (32 байта)
    #[serde(with = "serde_bytes")]
    pub exchange_secret: Vec<u8>,
    /// RSA private key (PKCS#8 DER) — только для legacy direct wrap (v1)
    #[serde(with = "serde_bytes")]
    pub rsa_private_der: Vec<u8>,
    /// 14-битный registration id
    pub registration_id: u16,
    pub signed_prekey: StoredSignedPreKey,
    pub one_time_prekeys: Vec<StoredOneTimePreKey>,
    /// Счётчик id следующего prekey. Монотонный: индексы никогда не
    /// переиспользуются, даже после удаления ключей из пула.
    pub next_prekey_id: u32,
    pub created_at: i64,
}

/// Сессия Double Ratchet в хранилище (сериализованная)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub session_id: String,
    pub conversation_id: String,
    /// Bincode сериализация SerializableSession
    #[serde(with = "serde_bytes")]
    pub session_data: Vec<u8>,
    pub last_used: i64,
    pub created_at: i64,
}
