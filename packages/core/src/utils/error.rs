// Типы ошибок уровня ядра
//
// Таксономия повторяет границу обработки сообщений: все по-сообщенческие
// ошибки ловятся на границе и превращаются в "undecryptable", а ошибки
// identity/storage поднимаются как жёсткие.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeridianError {
    /// Локальный приватный ключ отсутствует в хранилище (например, другое
    /// устройство). Невосстановимо локально.
    #[error("Key unavailable: {0}")]
    KeyUnavailable(String),

    /// В опубликованном bundle собеседника не хватает полей для X3DH.
    /// Вызывающий код откатывается на legacy wrap.
    #[error("Handshake incomplete: {0}")]
    HandshakeIncomplete(String),

    /// AEAD tag не сошёлся: подмена, не тот ключ или не та версия.
    /// Сообщение помечается как undecryptable, соседние не затрагиваются.
    #[error("Authentication failure: {0}")]
    AuthenticationFailure(String),

    /// Ratchet-сообщение без pre-key тега пришло, а сессии нет.
    /// Фатально только для этого сообщения.
    #[error("Session missing for conversation {0}")]
    SessionMissing(String),

    /// Подпись signed prekey собеседника не прошла проверку.
    /// Установка сессии с этим собеседником прерывается.
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Cryptography error: {0}")]
    CryptoError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<crate::error::CryptoError> for MeridianError {
    fn from(err: crate::error::CryptoError) -> Self {
        MeridianError::CryptoError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MeridianError>;
