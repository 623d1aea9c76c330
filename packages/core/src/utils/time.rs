// Работа со временем

use std::time::{SystemTime, UNIX_EPOCH};

/// Текущий unix timestamp в секундах
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
