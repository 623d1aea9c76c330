//! Криптографический модуль
//!
//! # Архитектура
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Application                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 CryptoEngine (High-Level API)               │
//! │  - Identity + prekeys + множественные сессии                │
//! │  - Выбор схемы конверта (ratchet / legacy wrap)             │
//! │  - Sealed sender                                            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                ┌─────────────┼──────────────┐
//!                ▼             ▼              ▼
//! ┌──────────────────┐ ┌───────────────┐ ┌───────────────────┐
//! │ KeyAgreement     │ │ SecureMessag. │ │ Legacy Wrap       │
//! │ (X3DH + OTK)     │ │ (Double       │ │ (RSA-OAEP v1,     │
//! │                  │ │  Ratchet)     │ │  ECDH+HKDF v2)    │
//! └──────────────────┘ └───────────────┘ └───────────────────┘
//!                │             │
//!                └──────┬──────┘
//!                       ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              CryptoProvider (Crypto-Agility)                │
//! │  - KEM (X25519)                                             │
//! │  - Signatures (Ed25519)                                     │
//! │  - AEAD (ChaCha20-Poly1305)                                 │
//! │  - KDF (HKDF-SHA256)                                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Модули
//!
//! ### Core Traits
//! - [`provider`]: CryptoProvider trait для crypto-agility
//! - [`handshake`]: KeyAgreement trait для протоколов установки ключей
//! - [`messaging`]: SecureMessaging trait для протоколов обмена сообщениями
//!
//! ### Implementations
//! - [`suites`]: Реализации CryptoProvider (Classic)
//! - [`handshake::x3dh`]: X3DH протокол c опциональным one-time prekey
//! - [`messaging::double_ratchet`]: Double Ratchet протокол
//! - [`wrap`]: Legacy key wrapping до установки ratchet-сессии
//!
//! ### Utilities
//! - [`identity`]: IdentityStore для долгосрочных ключей и prekey-пула
//! - [`fingerprint`]: safety number для сверки ключей вне канала

// ============================================================================
// Core Traits
// ============================================================================

/// CryptoProvider trait для crypto-agility
pub mod provider;

/// Key Agreement protocols (X3DH)
pub mod handshake;

/// Secure Messaging protocols (Double Ratchet)
pub mod messaging;

// ============================================================================
// Implementations
// ============================================================================

/// Криптографические наборы (Classic)
pub mod suites;

/// Legacy key wrapping (до ratchet-сессии)
pub mod wrap;

// ============================================================================
// Utilities
// ============================================================================

pub mod fingerprint;
pub mod identity;

// ============================================================================
// Re-exports для удобства
// ============================================================================

pub use provider::CryptoProvider;

pub type SuiteID = u16;
