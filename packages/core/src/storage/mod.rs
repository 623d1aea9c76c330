// Модуль хранилища
//
// Ядро видит хранилище как opaque key-value store: долговечность и
// конкретный backend (sled, IndexedDB, файлы) — забота платформенного слоя.
// Ratchet-состояние одноразовое, поэтому backend не имеет права терять
// записи молча: потерянный set после decrypt ломает расшифровку всех
// последующих сообщений в цепочке.

pub mod memory;
pub mod models;

use crate::utils::error::Result;

/// Долговечное key-value хранилище для identity и ratchet-сессий
pub trait KeyStore {
    /// Прочитать значение по ключу
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Записать значение (перезаписывает существующее)
    fn set(&mut self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Удалить значение
    fn delete(&mut self, key: &str) -> Result<()>;
}

/// Ключ записи identity в хранилище
pub fn identity_key(user_id: &str) -> String {
    format!("identity:{}", user_id)
}

/// Ключ записи ratchet-сессии в хранилище
pub fn session_key(conversation_id: &str) -> String {
    format!("session:{}", conversation_id)
}

pub use memory::MemoryStorage;
