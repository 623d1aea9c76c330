//! CryptoEngine - High-level interface for the encrypted messaging core
//!
//! Явный context object: конструируется один раз при старте и передаётся
//! дальше, никакого process-wide неявного состояния.
//!
//! ## Архитектура
//!
//! ```text
//! CryptoEngine
//!   ├── KeyStore            - identity + сериализованные ratchet-сессии
//!   ├── BundleDirectory     - prekey bundle собеседников (сеть)
//!   └── sessions            - кэш живых Double Ratchet сессий
//! ```
//!
//! ## Выбор схемы конверта
//!
//! ```text
//! seal_and_encrypt:
//!   1:1 и ratchet-сессия есть (или устанавливается по bundle)  → v3 Ratchet
//!   иначе, есть получатель с exchange key                      → v2 EphemeralEcdhWrap
//!   иначе                                                      → v1 DirectWrap
//! ```
//!
//! ## Конкурентность
//!
//! Все операции принимают `&mut self`: read-modify-persist каждой беседы
//! атомарен относительно других вызовов. Состояние сессии персистится
//! только после полного успеха операции; упавший decrypt сбрасывает кэш
//! сессии к последнему персистентному состоянию.

use crate::crypto::handshake::{KeyAgreement, X3DHProtocol, X3DHPublicKeyBundle};
use crate::crypto::identity::{Identity, IdentityStore};
use crate::crypto::messaging::{DoubleRatchetSession, PreKeyHint, SecureMessaging};
use crate::crypto::suites::ClassicSuiteProvider;
use crate::crypto::wrap::{self, DirectWrapRecipient, EcdhWrapRecipient};
use crate::crypto::CryptoProvider;
use crate::protocol::bundle::{OneTimePreKeyPublic, PreKeyBundle};
use crate::protocol::envelope::{self, MessagePayload, OpenedMessage};
use crate::protocol::record::{
    CiphertextRecord, PreKeyRatchetMessage, RatchetEnvelope, VERSION_ECDH_WRAP, VERSION_RATCHET,
};
use crate::storage::models::StoredSession;
use crate::storage::{session_key, KeyStore};
use crate::utils::error::{MeridianError, Result};
use crate::utils::{serialization, time};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

type Suite = ClassicSuiteProvider;
type Session = DoubleRatchetSession<Suite>;

/// Каталог prekey bundle собеседников (сетевой collaborator)
///
/// Может падать: неуспешный fetch означает лишь «ratchet недоступен для
/// этой отправки», частичного состояния сессии после него не остаётся.
pub trait BundleDirectory {
    fn fetch_bundle(&self, peer_id: &str) -> std::result::Result<PreKeyBundle, String>;
}

/// Каталог из готовых bundle (тесты, офлайн-доставка)
impl BundleDirectory for HashMap<String, PreKeyBundle> {
    fn fetch_bundle(&self, peer_id: &str) -> std::result::Result<PreKeyBundle, String> {
        self.get(peer_id)
            .cloned()
            .ok_or_else(|| format!("No bundle published for {}", peer_id))
    }
}

/// Получатель сообщения с его опубликованным legacy-материалом
#[derive(Debug, Clone)]
pub struct Recipient {
    pub id: String,
    /// X25519 exchange public key (для v2 wrap)
    pub exchange_public_key: Option<[u8; 32]>,
    /// RSA public key, SPKI DER (для v1 wrap)
    pub legacy_rsa_public_der: Option<Vec<u8>>,
}

/// High-level crypto engine
pub struct CryptoEngine<S: KeyStore, D: BundleDirectory> {
    storage: S,
    directory: D,

    /// Кэш identity по user_id
    identities: HashMap<String, Identity>,

    /// Кэш живых сессий по conversation_id. Не больше одной на беседу:
    /// новая исходящая установка замещает старую.
    sessions: HashMap<String, Session>,
}

impl<S: KeyStore, D: BundleDirectory> CryptoEngine<S, D> {
    pub fn new(storage: S, directory: D) -> Self {
        Self {
            storage,
            directory,
            identities: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    /// Вернуть хранилище (shutdown / пересоздание движка)
    pub fn into_storage(self) -> S {
        self.storage
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Вернуть существующую identity или создать новую (идемпотентно)
    pub fn ensure_identity(&mut self, user_id: &str) -> Result<&Identity> {
        if !self.identities.contains_key(user_id) {
            let identity = IdentityStore::ensure(&mut self.storage, user_id)?;
            self.identities.insert(user_id.to_string(), identity);
        }
        self.identities
            .get(user_id)
            .ok_or_else(|| MeridianError::KeyUnavailable(format!("No identity for {}", user_id)))
    }

    /// Публикуемый prekey bundle пользователя
    pub fn export_bundle(&mut self, user_id: &str) -> Result<PreKeyBundle> {
        self.identity(user_id)?.export_bundle()
    }

    /// Пополнить пул one-time prekeys; возвращает публичные половины для
    /// публикации
    pub fn top_up(&mut self, user_id: &str, count: usize) -> Result<Vec<OneTimePreKeyPublic>> {
        self.identity(user_id)?;
        let identity = self
            .identities
            .get_mut(user_id)
            .ok_or_else(|| MeridianError::KeyUnavailable(format!("No identity for {}", user_id)))?;
        IdentityStore::top_up(&mut self.storage, identity, count)
    }

    /// Явный key wipe
    pub fn wipe_identity(&mut self, user_id: &str) -> Result<()> {
        self.identities.remove(user_id);
        IdentityStore::wipe(&mut self.storage, user_id)
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Есть ли живая ratchet-сессия для беседы
    pub fn has_session(&mut self, conversation_id: &str) -> bool {
        if self.sessions.contains_key(conversation_id) {
            return true;
        }
        self.load_session(conversation_id).unwrap_or(false)
    }

    /// Явный teardown сессии
    pub fn end_session(&mut self, conversation_id: &str) -> Result<()> {
        info!(
            target: "crypto::engine",
            conversation_id = %conversation_id,
            "Ending session"
        );
        self.sessions.remove(conversation_id);
        self.storage.delete(&session_key(conversation_id))
    }

    /// Снимок identity собеседника по сессии (для safety number)
    pub fn peer_identity_key(&mut self, conversation_id: &str) -> Result<Option<Vec<u8>>> {
        if !self.has_session(conversation_id) {
            return Ok(None);
        }
        Ok(self
            .sessions
            .get(conversation_id)
            .and_then(|s| s.remote_identity_key().map(|k| k.to_vec())))
    }

    /// Установить исходящую ratchet-сессию по prekey bundle собеседника
    ///
    /// Проверки до каких-либо side effects: полнота bundle
    /// (HandshakeIncomplete) и подписи (SignatureInvalid). Существующая
    /// сессия беседы замещается только после полного успеха — неуспешная
    /// установка не оставляет частичного состояния.
    pub fn create_outbound_session(
        &mut self,
        local_user_id: &str,
        conversation_id: &str,
        peer_bundle: &PreKeyBundle,
    ) -> Result<()> {
        if !peer_bundle.is_complete_for_handshake() {
            return Err(MeridianError::HandshakeIncomplete(
                "Peer bundle lacks identity key, signed prekey or signature".to_string(),
            ));
        }
        peer_bundle.validate()?;
        peer_bundle.verify_signatures()?;

        let identity = self.identity(local_user_id)?;
        let local_exchange_secret = identity.exchange_secret.to_bytes().to_vec();
        let hint = PreKeyHint {
            registration_id: identity.registration_id,
            identity_exchange_key: identity.exchange_public().as_bytes().to_vec(),
            identity_verifying_key: identity.verifying_key_bytes().to_vec(),
            signed_prekey_id: peer_bundle.signed_prekey.id,
            one_time_prekey_id: peer_bundle.take_one_time_prekey().map(|otk| otk.id),
        };

        let x3dh_bundle = X3DHPublicKeyBundle {
            identity_public: peer_bundle.identity.exchange_key.clone(),
            signed_prekey_public: peer_bundle.signed_prekey.public_key.clone(),
            signature: peer_bundle.signed_prekey_signature.clone(),
            verifying_key: peer_bundle.identity.verifying_key.clone(),
            suite_id: Suite::suite_id(),
        };
        let one_time_public = peer_bundle
            .take_one_time_prekey()
            .map(|otk| otk.public_key.clone());

        let (root_key, initiator_state) = X3DHProtocol::<Suite>::perform_as_initiator(
            &local_exchange_secret,
            &x3dh_bundle,
            one_time_public.as_ref(),
        )
        .map_err(MeridianError::CryptoError)?;

        let session = Session::new_initiator_session(
            &root_key,
            initiator_state,
            &x3dh_bundle.identity_public,
            conversation_id.to_string(),
            hint,
        )
        .map_err(MeridianError::CryptoError)?;

        Self::persist_session(&mut self.storage, &session)?;
        self.sessions.insert(conversation_id.to_string(), session);

        info!(
            target: "crypto::engine",
            conversation_id = %conversation_id,
            "Outbound ratchet session established"
        );

        Ok(())
    }

    // ========================================================================
    // Seal / Encrypt
    // ========================================================================

    /// Запечатать payload и зашифровать для получателей
    ///
    /// Выбор версии: v3 при живой (или устанавливаемой) ratchet-сессии
    /// 1:1 беседы; иначе v2, если хоть один получатель опубликовал
    /// exchange key; иначе v1.
    pub fn seal_and_encrypt(
        &mut self,
        conversation_id: &str,
        sender_id: &str,
        payload: &MessagePayload,
        recipients: &[Recipient],
    ) -> Result<CiphertextRecord> {
        let mut use_ratchet = self.has_session(conversation_id);

        // Direct (1:1) беседа без сессии: пробуем установить по bundle.
        // Любой сбой здесь не фатален — откатываемся на legacy wrap.
        if !use_ratchet && recipients.len() == 1 {
            match self.directory.fetch_bundle(&recipients[0].id) {
                Ok(bundle) => {
                    match self.create_outbound_session(sender_id, conversation_id, &bundle) {
                        Ok(()) => use_ratchet = true,
                        Err(e) => {
                            debug!(
                                target: "crypto::engine",
                                conversation_id = %conversation_id,
                                error = %e,
                                "Ratchet unavailable for this send, falling back to legacy wrap"
                            );
                        }
                    }
                }
                Err(e) => {
                    debug!(
                        target: "crypto::engine",
                        peer = %recipients[0].id,
                        error = %e,
                        "Bundle fetch failed, falling back to legacy wrap"
                    );
                }
            }
        }

        if use_ratchet {
            return self.encrypt_ratchet(conversation_id, sender_id, payload);
        }

        // v2: все получатели с опубликованным exchange key
        let ecdh_recipients: Vec<EcdhWrapRecipient> = recipients
            .iter()
            .filter_map(|r| {
                r.exchange_public_key.map(|key| EcdhWrapRecipient {
                    id: r.id.clone(),
                    exchange_public: key,
                })
            })
            .collect();

        if !ecdh_recipients.is_empty() {
            let inner = envelope::seal(VERSION_ECDH_WRAP, sender_id, payload)?;
            let wrapped = wrap::encrypt_ecdh_wrap(conversation_id, &inner, &ecdh_recipients)?;
            let ephemeral_public_key = wrapped.ephemeral_public.ok_or_else(|| {
                MeridianError::CryptoError("ECDH wrap produced no ephemeral key".to_string())
            })?;
            return Ok(CiphertextRecord::EphemeralEcdhWrap {
                iv: wrapped.iv,
                ciphertext: wrapped.ciphertext,
                ephemeral_public_key,
                wrapped_keys: to_wire_keys(wrapped.wrapped_keys),
            });
        }

        // v1: baseline direct wrap
        let direct_recipients: Vec<DirectWrapRecipient> = recipients
            .iter()
            .filter_map(|r| {
                r.legacy_rsa_public_der
                    .as_ref()
                    .map(|der| DirectWrapRecipient {
                        id: r.id.clone(),
                        rsa_public_der: der.clone(),
                    })
            })
            .collect();

        if direct_recipients.is_empty() {
            return Err(MeridianError::InvalidInput(
                "No recipient published usable key material".to_string(),
            ));
        }

        // v1 существовал до sealed sender: конверта нет
        let inner = envelope::plaintext_bytes(payload)?;
        let wrapped = wrap::encrypt_direct_wrap(conversation_id, &inner, &direct_recipients)?;
        Ok(CiphertextRecord::DirectWrap {
            iv: wrapped.iv,
            ciphertext: wrapped.ciphertext,
            wrapped_keys: to_wire_keys(wrapped.wrapped_keys),
        })
    }

    fn encrypt_ratchet(
        &mut self,
        conversation_id: &str,
        sender_id: &str,
        payload: &MessagePayload,
    ) -> Result<CiphertextRecord> {
        let inner = envelope::seal(VERSION_RATCHET, sender_id, payload)?;

        let session = self
            .sessions
            .get_mut(conversation_id)
            .ok_or_else(|| MeridianError::SessionMissing(conversation_id.to_string()))?;

        let hint = session.pending_prekey().cloned();
        let wire = session
            .encrypt(&inner)
            .map_err(MeridianError::CryptoError)?;

        let message = match hint {
            // Собеседник ещё не подтвердил сессию: сообщение несёт pre-key
            // метаданные для responder-стороны handshake
            Some(hint) => RatchetEnvelope::PreKey(PreKeyRatchetMessage::from_hint(&hint, wire)),
            None => RatchetEnvelope::Normal(wire),
        };

        // Состояние цепочки одноразовое: персистим сразу после encrypt
        Self::persist_session(&mut self.storage, session)?;

        Ok(CiphertextRecord::Ratchet { message })
    }

    // ========================================================================
    // Open / Decrypt
    // ========================================================================

    /// Расшифровать запись и вскрыть sealed sender
    ///
    /// `transport_sender` — незапечатанный отправитель из метаданных
    /// транспорта; используется только для сообщений до sealed sender.
    pub fn open_and_unseal(
        &mut self,
        user_id: &str,
        conversation_id: &str,
        transport_sender: &str,
        record: &CiphertextRecord,
    ) -> Result<OpenedMessage> {
        let plaintext = match record {
            CiphertextRecord::Ratchet { message } => {
                self.decrypt_ratchet(user_id, conversation_id, message)?
            }

            CiphertextRecord::EphemeralEcdhWrap {
                iv,
                ciphertext,
                ephemeral_public_key,
                wrapped_keys,
            } => {
                let identity = self.identity(user_id)?;
                let exchange_secret = identity.exchange_secret.clone();
                wrap::decrypt_ecdh_wrap(
                    conversation_id,
                    user_id,
                    iv,
                    ciphertext,
                    ephemeral_public_key,
                    &from_wire_keys(wrapped_keys),
                    &exchange_secret,
                )
                .map_err(|e| MeridianError::AuthenticationFailure(e.to_string()))?
            }

            CiphertextRecord::DirectWrap {
                iv,
                ciphertext,
                wrapped_keys,
            } => {
                let identity = self.identity(user_id)?;
                let rsa_private = identity.rsa_private.clone();
                wrap::decrypt_direct_wrap(
                    conversation_id,
                    user_id,
                    iv,
                    ciphertext,
                    &from_wire_keys(wrapped_keys),
                    &rsa_private,
                )
                .map_err(|e| MeridianError::AuthenticationFailure(e.to_string()))?
            }
        };

        Ok(envelope::open(&plaintext, transport_sender))
    }

    /// Ratchet-расшифровка с явным переходом состояния
    /// `NoSession --PreKey--> Established`
    fn decrypt_ratchet(
        &mut self,
        user_id: &str,
        conversation_id: &str,
        message: &RatchetEnvelope,
    ) -> Result<Vec<u8>> {
        match message {
            RatchetEnvelope::PreKey(prekey) => {
                if self.has_session(conversation_id) {
                    // Сессия уже есть: pre-key метаданные игнорируем
                    // (повторная доставка первого сообщения)
                    debug!(
                        target: "crypto::engine",
                        conversation_id = %conversation_id,
                        "PreKey message for existing session, decrypting as normal"
                    );
                    self.decrypt_with_session(conversation_id, &prekey.message)
                } else {
                    self.establish_inbound_session(user_id, conversation_id, prekey)
                }
            }

            RatchetEnvelope::Normal(wire) => {
                if !self.has_session(conversation_id) {
                    return Err(MeridianError::SessionMissing(conversation_id.to_string()));
                }
                self.decrypt_with_session(conversation_id, wire)
            }
        }
    }

    /// Responder-сторона handshake по pre-key сообщению
    fn establish_inbound_session(
        &mut self,
        user_id: &str,
        conversation_id: &str,
        prekey: &PreKeyRatchetMessage,
    ) -> Result<Vec<u8>> {
        info!(
            target: "crypto::engine",
            conversation_id = %conversation_id,
            registration_id = %prekey.registration_id,
            "PreKey message received with no session, establishing"
        );

        let identity = self.identity(user_id)?;

        if prekey.signed_prekey_id != identity.signed_prekey.id {
            return Err(MeridianError::KeyUnavailable(format!(
                "Unknown signed prekey id {}",
                prekey.signed_prekey_id
            )));
        }

        let local_exchange_secret = identity.exchange_secret.to_bytes().to_vec();
        let local_signed_prekey = identity.signed_prekey.secret.to_bytes().to_vec();
        let local_one_time = match prekey.one_time_prekey_id {
            Some(otk_id) => Some(
                identity
                    .one_time_prekey(otk_id)
                    .map(|otk| otk.secret.to_bytes().to_vec())
                    .ok_or_else(|| {
                        MeridianError::KeyUnavailable(format!(
                            "Unknown one-time prekey id {}",
                            otk_id
                        ))
                    })?,
            ),
            None => None,
        };

        let remote_ephemeral = prekey.message.dh_public_key.to_vec();

        let root_key = X3DHProtocol::<Suite>::perform_as_responder(
            &local_exchange_secret,
            &local_signed_prekey,
            local_one_time.as_ref(),
            &prekey.identity_exchange_key,
            &remote_ephemeral,
        )
        .map_err(MeridianError::CryptoError)?;

        let (mut session, plaintext) = Session::new_responder_session(
            &root_key,
            &local_exchange_secret,
            &prekey.message,
            conversation_id.to_string(),
        )
        .map_err(MeridianError::AuthenticationFailure)?;

        session.set_remote_identity_key(prekey.identity_exchange_key.clone());

        Self::persist_session(&mut self.storage, &session)?;
        self.sessions.insert(conversation_id.to_string(), session);

        Ok(plaintext)
    }

    fn decrypt_with_session(
        &mut self,
        conversation_id: &str,
        wire: &crate::crypto::messaging::RatchetWireMessage,
    ) -> Result<Vec<u8>> {
        let session = self
            .sessions
            .get_mut(conversation_id)
            .ok_or_else(|| MeridianError::SessionMissing(conversation_id.to_string()))?;

        match session.decrypt(wire) {
            Ok(plaintext) => {
                // Цепочка продвинулась: немедленно персистим, иначе
                // повторный запуск не расшифрует следующие сообщения
                Self::persist_session(&mut self.storage, session)?;
                Ok(plaintext)
            }
            Err(e) => {
                // Откат к последнему персистентному состоянию: неудачная
                // расшифровка не должна рассинхронизировать сессию для
                // остальных сообщений
                warn!(
                    target: "crypto::engine",
                    conversation_id = %conversation_id,
                    error = %e,
                    "Ratchet decrypt failed, resetting session cache"
                );
                self.sessions.remove(conversation_id);
                Err(MeridianError::AuthenticationFailure(e))
            }
        }
    }

    // ========================================================================
    // Внутреннее
    // ========================================================================

    fn identity(&mut self, user_id: &str) -> Result<&Identity> {
        if !self.identities.contains_key(user_id) {
            let identity = IdentityStore::load(&self.storage, user_id)?.ok_or_else(|| {
                MeridianError::KeyUnavailable(format!("No identity for {}", user_id))
            })?;
            self.identities.insert(user_id.to_string(), identity);
        }
        self.identities
            .get(user_id)
            .ok_or_else(|| MeridianError::KeyUnavailable(format!("No identity for {}", user_id)))
    }

    /// Поднять сессию из хранилища в кэш. Возвращает, существует ли она.
    fn load_session(&mut self, conversation_id: &str) -> Result<bool> {
        match self.storage.get(&session_key(conversation_id))? {
            Some(bytes) => {
                let stored: StoredSession = serialization::from_bincode(&bytes)?;
                let data = serialization::from_bincode(&stored.session_data)?;
                let session =
                    Session::from_serializable(data).map_err(MeridianError::SessionError)?;
                self.sessions.insert(conversation_id.to_string(), session);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn persist_session(storage: &mut S, session: &Session) -> Result<()> {
        let data = serialization::to_bincode(&session.to_serializable())?;
        let now = time::current_timestamp();
        let stored = StoredSession {
            session_id: session.session_id().to_string(),
            conversation_id: session.conversation_id().to_string(),
            session_data: data,
            last_used: now,
            created_at: now,
        };
        storage.set(
            &session_key(session.conversation_id()),
            serialization::to_bincode(&stored)?,
        )
    }
}

fn to_wire_keys(keys: BTreeMap<String, Vec<u8>>) -> BTreeMap<String, serde_bytes::ByteBuf> {
    keys.into_iter()
        .map(|(id, key)| (id, serde_bytes::ByteBuf::from(key)))
        .collect()
}

fn from_wire_keys(keys: &BTreeMap<String, serde_bytes::ByteBuf>) -> BTreeMap<String, Vec<u8>> {
    keys.iter()
        .map(|(id, key)| (id.clone(), key.to_vec()))
        .collect()
}
