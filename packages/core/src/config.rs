//! Централизованная конфигурация для Meridian Messenger Core
//!
//! Все константы и настройки криптографического ядра должны быть определены
//! здесь, чтобы избежать хардкода по всему проекту.

use std::sync::OnceLock;

/// Глобальная конфигурация приложения (синглтон)
static GLOBAL_CONFIG: OnceLock<Config> = OnceLock::new();

/// Основная структура конфигурации
#[derive(Debug, Clone)]
pub struct Config {
    // ============================================
    // КРИПТОГРАФИЧЕСКИЕ ПАРАМЕТРЫ
    // ============================================

    /// Длина симметричного ключа AES-256 / ChaCha20 (в байтах)
    pub key_length: usize,

    /// Длина nonce для AES-GCM (в байтах, 96 бит)
    pub nonce_length: usize,

    /// Длина nonce для ChaCha20Poly1305 (в байтах)
    pub chacha_nonce_length: usize,

    /// Размер GCM authentication tag (в байтах)
    pub gcm_tag_length: usize,

    /// Размер публичного ключа X25519 (в байтах)
    pub public_key_size: usize,

    /// Размер Ed25519 подписи (в байтах)
    pub signature_size: usize,

    /// Размер модуля RSA для legacy direct wrap (в битах)
    pub rsa_modulus_bits: usize,

    /// ID классического криптографического набора (Classic Suite)
    pub classic_suite_id: u16,

    /// Маска registration id (14 бит)
    pub registration_id_mask: u16,

    // ============================================
    // DOUBLE RATCHET ПАРАМЕТРЫ
    // ============================================

    /// Максимальное количество пропущенных сообщений (DoS защита)
    pub max_skipped_messages: u32,

    /// Максимальный возраст пропущенных ключей сообщений (в секундах)
    /// По умолчанию: 7 дней
    pub max_skipped_message_age_seconds: i64,

    // ============================================
    // PREKEY ПАРАМЕТРЫ
    // ============================================

    /// Размер пула one-time prekeys при создании identity и при пополнении
    pub otk_pool_size: usize,

    /// Нижняя граница опубликованного пула, после которой вызывающий код
    /// должен пополнить one-time prekeys
    pub otk_low_water: usize,

    // ============================================
    // ENVELOPE / СОВМЕСТИМОСТЬ
    // ============================================

    /// Разрешить legacy-расшифровку без AAD для сообщений, созданных до
    /// включения привязки к conversation id. Порядок попыток фиксирован:
    /// сначала с AAD, затем (только при ошибке аутентификации) без AAD.
    pub allow_no_aad_fallback: bool,

    // ============================================
    // FINGERPRINT
    // ============================================

    /// Размер блока hex-символов при отображении fingerprint
    pub fingerprint_group_size: usize,
}

impl Config {
    /// Создать конфигурацию с дефолтными значениями
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self {
            // Криптография
            key_length: 32,
            nonce_length: 12,
            chacha_nonce_length: 12,
            gcm_tag_length: 16,
            public_key_size: 32,
            signature_size: 64,
            rsa_modulus_bits: 2048,
            classic_suite_id: 1,
            registration_id_mask: 0x3FFF,

            // Double Ratchet
            max_skipped_messages: 1000,
            max_skipped_message_age_seconds: 7 * 24 * 60 * 60, // 7 days

            // Prekeys
            otk_pool_size: 20,
            otk_low_water: 10,

            // Envelope
            allow_no_aad_fallback: true,

            // Fingerprint
            fingerprint_group_size: 8,
        }
    }

    /// Создать конфигурацию из переменных окружения
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Переопределяем значения из env, если они заданы
        if let Ok(val) = std::env::var("MAX_SKIPPED_MESSAGES") {
            if let Ok(parsed) = val.parse() {
                config.max_skipped_messages = parsed;
            }
        }

        if let Ok(val) = std::env::var("MAX_SKIPPED_MESSAGE_AGE_SECONDS") {
            if let Ok(parsed) = val.parse() {
                config.max_skipped_message_age_seconds = parsed;
            }
        }

        if let Ok(val) = std::env::var("OTK_POOL_SIZE") {
            if let Ok(parsed) = val.parse() {
                config.otk_pool_size = parsed;
            }
        }

        if let Ok(val) = std::env::var("ALLOW_NO_AAD_FALLBACK") {
            if let Ok(parsed) = val.parse() {
                config.allow_no_aad_fallback = parsed;
            }
        }

        config
    }

    /// Получить глобальный экземпляр конфигурации
    ///
    /// Автоматически инициализирует конфигурацию со значениями по умолчанию
    /// при первом вызове
    pub fn global() -> &'static Config {
        GLOBAL_CONFIG.get_or_init(Config::default)
    }

    /// Инициализировать глобальную конфигурацию со значениями по умолчанию
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init() -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(Self::default())
            .map_err(|_| "Config already initialized")
    }

    /// Инициализировать глобальную конфигурацию из переменных окружения
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init_from_env() -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(Self::from_env())
            .map_err(|_| "Config already initialized")
    }

    /// Инициализировать глобальную конфигурацию с кастомным экземпляром
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init_with(config: Config) -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(config)
            .map_err(|_| "Config already initialized")
    }

    /// Проверить, инициализирована ли глобальная конфигурация
    pub fn is_initialized() -> bool {
        GLOBAL_CONFIG.get().is_some()
    }
}
