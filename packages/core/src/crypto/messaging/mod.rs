//! Secure Messaging Protocols
//!
//! Этот модуль содержит протоколы защищённого обмена сообщениями.
//!
//! Цель: Обеспечить конфиденциальность, аутентичность и forward secrecy
//! при обмене сообщениями внутри одной беседы (conversation).
//!
//! ## Dataflow
//! ```text
//! После успешного KeyAgreement:
//!
//! Alice (инициатор)                          Bob (получатель)
//! ==================                         =================
//!
//! 1. Создаёт session:
//!    SecureMessaging::new_initiator_session(
//!      root_key,           ← от KeyAgreement
//!      initiator_state,    ← содержит ephemeral_private
//!      bob_identity_pub,
//!      conversation_id,
//!      pre-key hint        ← метаданные для первого сообщения
//!    )
//!
//! 2. Шифрует первое сообщение:
//!    msg = session.encrypt(plaintext)
//!    → msg.dh_public_key = ephemeral_public
//!    → пока Bob не ответил, каждое исходящее сообщение несёт
//!      pre-key метаданные (session.pending_prekey())
//!
//!                                            1. Создаёт session из первого сообщения:
//!                                               SecureMessaging::new_responder_session(...)
//!                                            2. Расшифровывает его тем же вызовом
//!
//! 3. Bidirectional обмен с DH ratcheting:
//!    Bob → Alice: ответ (DH ratchet step!)
//!    → Alice видит входящее сообщение, pre-key фаза закончена
//! ```
//!
//! ## Security Properties
//!
//! ### Forward Secrecy
//! Компрометация текущих ключей НЕ раскрывает прошлые сообщения.
//!
//! ### Break-in Recovery (Backward Secrecy)
//! После компрометации новый DH ratchet step восстанавливает безопасность.
//!
//! ### Out-of-Order Messages
//! Ограниченная поддержка через skipped message keys (быстрый путь —
//! доставка в порядке отправки).

use crate::crypto::handshake::InitiatorState;
use crate::crypto::provider::CryptoProvider;
use serde::{Deserialize, Serialize};

/// Метаданные pre-key сообщения
///
/// Несутся в каждом исходящем сообщении, пока собеседник не подтвердил
/// сессию первым входящим сообщением. По ним получатель выполняет
/// responder-сторону X3DH.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKeyHint {
    /// Registration id отправителя (14 бит)
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
}

/// Протокол защищённого обмена сообщениями
///
/// ## Ответственность
/// - Шифрование и расшифровка сообщений
/// - DH ratcheting для forward secrecy
/// - Symmetric key ratcheting (chain keys)
/// - Управление skipped message keys
/// - Отслеживание pre-key фазы сессии
///
/// ## Не отвечает за:
/// - Key agreement / handshake (это делает KeyAgreement)
/// - Персистентность и управление сессиями (это делает CryptoEngine)
pub trait SecureMessaging<P: CryptoProvider>: Sized {
    /// Зашифрованное сообщение в wire format
    type EncryptedMessage: Clone + Serialize + for<'de> Deserialize<'de>;

    /// Создать сессию как инициатор (Alice)
    ///
    /// Ephemeral key НЕ генерируется заново — он приходит из
    /// InitiatorState и становится первым DH ratchet key. Благодаря этому
    /// Bob извлекает ephemeral_public из первого сообщения и выполняет
    /// responder-сторону X3DH.
    fn new_initiator_session(
        root_key: &[u8],
        initiator_state: InitiatorState<P>,
        remote_identity: &P::KemPublicKey,
        conversation_id: String,
        pending_prekey: PreKeyHint,
    ) -> Result<Self, String>;

    /// Создать сессию как получатель (Bob)
    ///
    /// Первое сообщение расшифровывается ВНУТРИ этого метода —
    /// вызывающий код не должен вызывать decrypt() для него повторно.
    fn new_responder_session(
        root_key: &[u8],
        local_identity: &P::KemPrivateKey,
        first_message: &Self::EncryptedMessage,
        conversation_id: String,
    ) -> Result<(Self, Vec<u8>), String>;

    /// Зашифровать сообщение
    ///
    /// # Side Effects
    /// - Обновляет sending_chain_key
    /// - Увеличивает sending_chain_length
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Self::EncryptedMessage, String>;

    /// Расшифровать сообщение
    ///
    /// # Side Effects
    /// - Обновляет receiving_chain_key
    /// - Может выполнить DH ratchet step
    /// - Может сохранить skipped message keys
    /// - Успешная расшифровка завершает pre-key фазу сессии
    fn decrypt(&mut self, message: &Self::EncryptedMessage) -> Result<Vec<u8>, String>;

    /// Получить session ID
    fn session_id(&self) -> &str;

    /// Получить conversation ID
    fn conversation_id(&self) -> &str;

    /// Метаданные pre-key фазы: Some, пока собеседник не подтвердил сессию
    fn pending_prekey(&self) -> Option<&PreKeyHint>;

    /// Cleanup старых skipped message keys (DoS защита)
    fn cleanup_old_skipped_keys(&mut self, max_age_seconds: i64);
}

// Re-exports
pub mod double_ratchet;

pub use double_ratchet::{DoubleRatchetSession, RatchetWireMessage, SerializableSession};
