// In-memory хранилище для тестов и как референсная реализация KeyStore

use crate::storage::KeyStore;
use crate::utils::error::Result;
use std::collections::HashMap;

/// In-memory хранилище
#[derive(Default)]
pub struct MemoryStorage {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Количество записей (для тестов и диагностики)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Очистить всё хранилище
    pub fn clear_all(&mut self) {
        self.entries.clear();
    }
}

impl KeyStore for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_roundtrip() {
        let mut storage = MemoryStorage::new();

        storage.set("identity:user1", vec![1, 2, 3]).unwrap();
        let loaded = storage.get("identity:user1").unwrap();

        assert_eq!(loaded, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_memory_storage_overwrite() {
        let mut storage = MemoryStorage::new();

        storage.set("session:conv1", vec![1]).unwrap();
        storage.set("session:conv1", vec![2]).unwrap();

        assert_eq!(storage.get("session:conv1").unwrap(), Some(vec![2]));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_memory_storage_delete() {
        let mut storage = MemoryStorage::new();

        storage.set("session:conv1", vec![1]).unwrap();
        storage.delete("session:conv1").unwrap();

        assert_eq!(storage.get("session:conv1").unwrap(), None);
    }

    #[test]
    fn test_memory_storage_missing_key() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("identity:nobody").unwrap(), None);
    }
}
