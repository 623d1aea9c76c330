// Wire-уровень протокола: prekey bundle, конверты, записи шифротекста

pub mod bundle;
pub mod envelope;
pub mod record;

pub use bundle::PreKeyBundle;
pub use envelope::{MessagePayload, SealedEnvelope};
pub use record::{CiphertextRecord, PreKeyRatchetMessage, RatchetEnvelope};
