// Sealed sender: настоящий автор сообщения живёт ВНУТРИ шифруемого
// plaintext, а не в обрамлении записи. Транспорт и наблюдатель метаданных
// не узнают автора из framing.
//
// Внутренний конверт — JSON {"v": <версия>, "s": <sender id>, "c": <payload>}.
// Payload — либо простой текст, либо маленькая тегированная структура
// вложения (voice/file). Сообщения, созданные до sealed sender, конверта
// не имеют: тогда весь plaintext трактуется как текст, а отправитель
// берётся из (незапечатанного) поля транспорта.

use crate::utils::b64;
use crate::utils::error::Result;
use crate::utils::serialization;
use serde::{Deserialize, Serialize};

/// Вложение внутри запечатанного payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AttachmentPayload {
    #[serde(rename = "voice", rename_all = "camelCase")]
    Voice {
        mime_type: String,
        data_base64: String,
        duration_ms: u64,
    },
    #[serde(rename = "file", rename_all = "camelCase")]
    File {
        name: String,
        mime_type: String,
        data_base64: String,
        size_bytes: u64,
    },
}

/// Полезная нагрузка сообщения
///
/// Отсутствие распознанного тега `type` означает простой текст.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagePayload {
    Attachment(AttachmentPayload),
    Text(String),
}

impl AttachmentPayload {
    /// Голосовое сообщение из сырых байтов
    pub fn voice(mime_type: impl Into<String>, data: &[u8], duration_ms: u64) -> Self {
        AttachmentPayload::Voice {
            mime_type: mime_type.into(),
            data_base64: b64::encode(data),
            duration_ms,
        }
    }

    /// Файл из сырых байтов
    pub fn file(name: impl Into<String>, mime_type: impl Into<String>, data: &[u8]) -> Self {
        AttachmentPayload::File {
            name: name.into(),
            mime_type: mime_type.into(),
            data_base64: b64::encode(data),
            size_bytes: data.len() as u64,
        }
    }

    /// Раскодировать содержимое вложения
    pub fn data_bytes(&self) -> Result<Vec<u8>> {
        let encoded = match self {
            AttachmentPayload::Voice { data_base64, .. } => data_base64,
            AttachmentPayload::File { data_base64, .. } => data_base64,
        };
        b64::decode(encoded).map_err(crate::utils::error::MeridianError::InvalidInput)
    }
}

impl MessagePayload {
    pub fn text(value: impl Into<String>) -> Self {
        MessagePayload::Text(value.into())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, MessagePayload::Text(_))
    }
}

/// Внутренний конверт sealed sender
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedEnvelope {
    /// Версия конверта (2 или 3)
    pub v: u8,
    /// Настоящий sender id
    pub s: String,
    /// Полезная нагрузка
    pub c: MessagePayload,
}

/// Результат вскрытия конверта
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedMessage {
    pub sender_id: String,
    pub payload: MessagePayload,
}

/// Запечатать payload с sender id (v2/v3)
pub fn seal(version: u8, sender_id: &str, payload: &MessagePayload) -> Result<Vec<u8>> {
    serialization::to_json_bytes(&SealedEnvelope {
        v: version,
        s: sender_id.to_string(),
        c: payload.clone(),
    })
}

/// Plaintext без конверта (v1, до sealed sender): текст уходит сырыми
/// байтами, вложения — JSON тегированной структуры
pub fn plaintext_bytes(payload: &MessagePayload) -> Result<Vec<u8>> {
    match payload {
        MessagePayload::Text(text) => Ok(text.as_bytes().to_vec()),
        attachment => serialization::to_json_bytes(attachment),
    }
}

/// Вскрыть расшифрованный plaintext
///
/// Порядок разбора:
/// 1. Запечатанный конверт {v, s, c} → настоящий sender изнутри
/// 2. Тегированное вложение без конверта (v1)
/// 3. Иначе весь plaintext — текст от `fallback_sender` (сообщения до
///    sealed sender)
pub fn open(plaintext: &[u8], fallback_sender: &str) -> OpenedMessage {
    if let Ok(sealed) = serialization::from_json_bytes::<SealedEnvelope>(plaintext) {
        return OpenedMessage {
            sender_id: sealed.s,
            payload: sealed.c,
        };
    }

    if let Ok(attachment) = serialization::from_json_bytes::<AttachmentPayload>(plaintext) {
        return OpenedMessage {
            sender_id: fallback_sender.to_string(),
            payload: MessagePayload::Attachment(attachment),
        };
    }

    OpenedMessage {
        sender_id: fallback_sender.to_string(),
        payload: MessagePayload::Text(String::from_utf8_lossy(plaintext).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip_text() {
        let payload = MessagePayload::text("hello");
        let sealed = seal(3, "alice", &payload).unwrap();

        let opened = open(&sealed, "transport-sender");

        assert_eq!(opened.sender_id, "alice");
        assert_eq!(opened.payload, payload);
    }

    #[test]
    fn test_seal_open_roundtrip_voice_attachment() {
        let attachment = AttachmentPayload::voice("audio/ogg", b"oggdata", 2500);
        let payload = MessagePayload::Attachment(attachment.clone());
        let sealed = seal(2, "alice", &payload).unwrap();

        let opened = open(&sealed, "transport-sender");

        assert_eq!(opened.sender_id, "alice");
        assert_eq!(opened.payload, payload);
        assert_eq!(attachment.data_bytes().unwrap(), b"oggdata");
    }

    #[test]
    fn test_open_pre_sealed_sender_fallback() {
        // Сообщение до sealed sender: сырой текст без конверта
        let opened = open(b"plain old message", "bob");

        assert_eq!(opened.sender_id, "bob");
        assert_eq!(opened.payload, MessagePayload::text("plain old message"));
    }

    #[test]
    fn test_open_v1_attachment_without_envelope() {
        let payload = MessagePayload::Attachment(AttachmentPayload::File {
            name: "notes.txt".to_string(),
            mime_type: "text/plain".to_string(),
            data_base64: "aGk=".to_string(),
            size_bytes: 2,
        });
        let bytes = plaintext_bytes(&payload).unwrap();

        let opened = open(&bytes, "bob");

        assert_eq!(opened.sender_id, "bob");
        assert_eq!(opened.payload, payload);
    }

    #[test]
    fn test_plaintext_bytes_for_text_is_raw() {
        let bytes = plaintext_bytes(&MessagePayload::text("raw")).unwrap();
        assert_eq!(bytes, b"raw");
    }

    #[test]
    fn test_sealed_bytes_do_not_leak_outside() {
        // Сериализованный конверт содержит sender id — но только внутри
        // plaintext, который будет зашифрован целиком
        let sealed = seal(3, "alice", &MessagePayload::text("hi")).unwrap();
        let text = String::from_utf8(sealed).unwrap();
        assert!(text.contains("\"s\":\"alice\""));
    }
}
