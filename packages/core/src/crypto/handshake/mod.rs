//! Key Agreement Protocols
//!
//! Этот модуль содержит протоколы установки ключей (key agreement).
//!
//! Цель: Установить общий секретный ключ между двумя сторонами без
//! предварительного обмена секретами.
//!
//! ## Dataflow
//! ```text
//! Alice (инициатор)                          Bob (получатель)
//! ==================                         =================
//!
//! 1. Генерирует ephemeral key
//! 2. Получает Bob's bundle (identity, signed prekey,
//!    подпись, опционально one-time prekey)
//! 3. Выполняет KeyAgreement::perform_as_initiator()
//!    → возвращает (shared_secret, InitiatorState)
//! 4. InitiatorState содержит ephemeral_private
//!    (который станет первым DH ratchet key)
//!
//!                                            1. Получает первое сообщение от Alice
//!                                            2. Извлекает Alice's ephemeral_public
//!                                            3. Находит свои signed/one-time prekey по id
//!                                            4. Выполняет KeyAgreement::perform_as_responder()
//!                                               → возвращает shared_secret (тот же!)
//! ```

use crate::crypto::provider::CryptoProvider;

/// Состояние инициатора после key agreement
///
/// Содержит ephemeral private key, который будет использован
/// как первый DH ratchet key в Double Ratchet протоколе.
///
/// Ephemeral key используется дважды:
/// 1. В X3DH для DH2, DH3 и (опционально) DH4
/// 2. Как первый DH key в Double Ratchet
#[derive(Debug, Clone)]
pub struct InitiatorState<P: CryptoProvider> {
    /// Ephemeral private key, сгенерированный в perform_as_initiator()
    pub ephemeral_private: P::KemPrivateKey,
}

/// Протокол установки ключей (Key Agreement)
///
/// ## Ответственность
/// - Установка общего секретного ключа (root key) через криптографический
///   handshake
/// - Проверка подлинности ключей через подписи
///
/// ## Не отвечает за:
/// - Шифрование сообщений (это делает SecureMessaging)
/// - Управление сессиями (это делает CryptoEngine)
/// - Хранение ключей (это делает IdentityStore)
pub trait KeyAgreement<P: CryptoProvider> {
    /// Публичные ключи собеседника, необходимые для handshake
    type PublicKeyBundle;

    /// Общий секретный ключ (root key)
    type SharedSecret;

    /// Выполнить handshake как инициатор (Alice)
    ///
    /// Проверяет подпись signed prekey собеседника ДО любых DH-операций:
    /// невалидная подпись прерывает установку сессии.
    ///
    /// # Параметры
    /// - `local_identity`: Alice's identity private key (IK_A)
    /// - `remote_bundle`: публичные ключи Bob
    /// - `remote_one_time`: опциональный one-time prekey Bob (OTK_B)
    ///
    /// # Возвращает
    /// - `SharedSecret`: root key для Double Ratchet
    /// - `InitiatorState`: содержит ephemeral_private
    fn perform_as_initiator(
        local_identity: &P::KemPrivateKey,
        remote_bundle: &Self::PublicKeyBundle,
        remote_one_time: Option<&P::KemPublicKey>,
    ) -> Result<(Self::SharedSecret, InitiatorState<P>), String>;

    /// Выполнить handshake как получатель (Bob)
    ///
    /// # Параметры
    /// - `local_identity`: Bob's identity private key (IK_B)
    /// - `local_signed_prekey`: Bob's signed prekey private key (SPK_B)
    /// - `local_one_time`: приватная половина one-time prekey, если Alice
    ///   его использовала (OTK_B)
    /// - `remote_identity`: Alice's identity public key (IK_A_pub)
    /// - `remote_ephemeral`: Alice's ephemeral public key (EK_A_pub,
    ///   из первого сообщения)
    ///
    /// # Возвращает
    /// - `SharedSecret`: root key, идентичный тому, что вычислила Alice
    fn perform_as_responder(
        local_identity: &P::KemPrivateKey,
        local_signed_prekey: &P::KemPrivateKey,
        local_one_time: Option<&P::KemPrivateKey>,
        remote_identity: &P::KemPublicKey,
        remote_ephemeral: &P::KemPublicKey,
    ) -> Result<Self::SharedSecret, String>;
}

// Re-exports
pub mod x3dh;

pub use x3dh::{X3DHProtocol, X3DHPublicKeyBundle};
