// Вспомогательные утилиты

pub mod b64;
pub mod error;
pub mod serialization;
pub mod time;
