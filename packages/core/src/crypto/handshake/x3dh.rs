//! X3DH (Extended Triple Diffie-Hellman) Protocol
//!
//! Реализация протокола установки ключей из Signal Protocol.
//!
//! ## Обзор
//!
//! X3DH обеспечивает:
//! - **Forward Secrecy**: Ephemeral keys для каждой сессии
//! - **Asynchronous**: Bob может быть offline
//! - **Доп. forward secrecy**: опциональный one-time prekey, расходуемый
//!   одним handshake
//!
//! ## Протокол
//!
//! ```text
//! Alice                                                Bob
//! =====                                                ===
//!
//! 1. Генерирует EK_A
//! 2. Получает (IK_B_pub, SPK_B_pub, Sig, [OTK_B_pub]) из bundle
//! 3. Проверяет Sig(SPK_B_pub)
//! 4. Вычисляет:
//!    DH1 = DH(IK_A, SPK_B)
//!    DH2 = DH(EK_A, IK_B)
//!    DH3 = DH(EK_A, SPK_B)
//!    DH4 = DH(EK_A, OTK_B)        (если OTK есть)
//!    SK = KDF(DH1 || DH2 || DH3 [|| DH4])
//!
//! 5. Отправляет первое сообщение с EK_A_pub →
//!
//!                                                      1. Извлекает EK_A_pub из сообщения
//!                                                      2. Находит SPK/OTK по id из сообщения
//!                                                      3. Вычисляет (те же DH, но reverse):
//!                                                         DH1 = DH(SPK_B, IK_A)
//!                                                         DH2 = DH(IK_B, EK_A)
//!                                                         DH3 = DH(SPK_B, EK_A)
//!                                                         DH4 = DH(OTK_B, EK_A)
//!                                                         SK = KDF(DH1 || DH2 || DH3 [|| DH4])
//!
//! SK_Alice = SK_Bob (одинаковые!)
//! ```

use crate::crypto::handshake::{InitiatorState, KeyAgreement};
use crate::crypto::provider::CryptoProvider;
use crate::crypto::SuiteID;
use std::marker::PhantomData;

/// Публичные ключи для инициации сессии
///
/// Alice собирает этот набор из prekey bundle Bob перед началом handshake.
#[derive(Debug, Clone)]
pub struct X3DHPublicKeyBundle {
    /// Bob's Identity (exchange) Public Key (IK_B_pub)
    pub identity_public: Vec<u8>,

    /// Bob's Signed Prekey Public Key (SPK_B_pub)
    pub signed_prekey_public: Vec<u8>,

    /// Signature over signed_prekey_public (Sig(SPK_B))
    pub signature: Vec<u8>,

    /// Bob's Verifying Key для проверки подписи
    pub verifying_key: Vec<u8>,

    /// Crypto suite ID
    pub suite_id: SuiteID,
}

/// X3DH Protocol Implementation
///
/// Stateless struct - все данные передаются через параметры методов.
pub struct X3DHProtocol<P: CryptoProvider> {
    _phantom: PhantomData<P>,
}

impl<P: CryptoProvider> KeyAgreement<P> for X3DHProtocol<P> {
    type PublicKeyBundle = X3DHPublicKeyBundle;
    type SharedSecret = Vec<u8>; // 32 bytes root key

    fn perform_as_initiator(
        local_identity: &P::KemPrivateKey,
        remote_bundle: &Self::PublicKeyBundle,
        remote_one_time: Option<&P::KemPublicKey>,
    ) -> Result<(Self::SharedSecret, InitiatorState<P>), String> {
        use tracing::{debug, trace};

        debug!(target: "crypto::x3dh", "Starting X3DH as initiator (Alice)");
        trace!(suite_id = %remote_bundle.suite_id);

        // Ephemeral key живёт только в рамках этой сессии (Forward Secrecy)
        debug!(target: "crypto::x3dh", "Generating ephemeral key for this session");
        let (ephemeral_private, ephemeral_public) = P::generate_kem_keys()
            .map_err(|e| format!("Failed to generate ephemeral key: {}", e))?;

        trace!(
            ephemeral_public_len = %ephemeral_public.as_ref().len(),
            "Ephemeral key generated"
        );

        let remote_verifying_key =
            P::signature_public_key_from_bytes(remote_bundle.verifying_key.clone());

        // 1. Verify signature on signed prekey — до любых DH-операций
        debug!(target: "crypto::x3dh", "Step 1: Verifying signed prekey signature");
        P::verify(
            &remote_verifying_key,
            &remote_bundle.signed_prekey_public,
            &remote_bundle.signature,
        )
        .map_err(|e| {
            debug!(target: "crypto::x3dh", error = %e, "Signature verification failed");
            format!("Signature verification failed: {}", e)
        })?;
        debug!(target: "crypto::x3dh", "Signature verified successfully");

        // 2. Perform DH operations (Full X3DH)
        debug!(target: "crypto::x3dh", "Step 2: Performing DH operations");

        // DH1 = DH(IK_A, SPK_B)
        trace!(target: "crypto::x3dh", "Computing DH1 = DH(IK_A, SPK_B)");
        let dh1 = P::diffie_hellman(local_identity, &remote_bundle.signed_prekey_public)
            .map_err(|e| format!("DH1 failed: {}", e))?;

        // DH2 = DH(EK_A, IK_B)
        trace!(target: "crypto::x3dh", "Computing DH2 = DH(EK_A, IK_B)");
        let dh2 = P::diffie_hellman(&ephemeral_private, &remote_bundle.identity_public)
            .map_err(|e| format!("DH2 failed: {}", e))?;

        // DH3 = DH(EK_A, SPK_B)
        trace!(target: "crypto::x3dh", "Computing DH3 = DH(EK_A, SPK_B)");
        let dh3 = P::diffie_hellman(&ephemeral_private, &remote_bundle.signed_prekey_public)
            .map_err(|e| format!("DH3 failed: {}", e))?;

        // DH4 = DH(EK_A, OTK_B) — только если bundle содержит one-time prekey
        let dh4 = match remote_one_time {
            Some(otk_public) => {
                trace!(target: "crypto::x3dh", "Computing DH4 = DH(EK_A, OTK_B)");
                Some(
                    P::diffie_hellman(&ephemeral_private, otk_public.as_ref())
                        .map_err(|e| format!("DH4 failed: {}", e))?,
                )
            }
            None => None,
        };

        debug!(
            target: "crypto::x3dh",
            dh1_len = %dh1.len(),
            dh2_len = %dh2.len(),
            dh3_len = %dh3.len(),
            has_otk = %dh4.is_some(),
            "DH operations completed"
        );

        let root_key = derive_root_key::<P>(&dh1, &dh2, &dh3, dh4.as_deref())?;

        debug!(
            target: "crypto::x3dh",
            root_key_len = %root_key.len(),
            "X3DH completed successfully as initiator"
        );

        // ephemeral_private уходит в InitiatorState: он станет первым
        // DH ratchet key в Double Ratchet
        let initiator_state = InitiatorState { ephemeral_private };

        Ok((root_key, initiator_state))
    }

    fn perform_as_responder(
        local_identity: &P::KemPrivateKey,
        local_signed_prekey: &P::KemPrivateKey,
        local_one_time: Option<&P::KemPrivateKey>,
        remote_identity: &P::KemPublicKey,
        remote_ephemeral: &P::KemPublicKey,
    ) -> Result<Self::SharedSecret, String> {
        use tracing::{debug, trace};

        debug!(target: "crypto::x3dh", "Starting X3DH as responder (Bob)");

        // Bob вычисляет те же DH секреты, но с другой стороны

        // DH1 = DH(SPK_B, IK_A)
        trace!(target: "crypto::x3dh", "Computing DH1 = DH(SPK_B, IK_A)");
        let dh1 = P::diffie_hellman(local_signed_prekey, remote_identity.as_ref())
            .map_err(|e| format!("DH1 failed: {}", e))?;

        // DH2 = DH(IK_B, EK_A)
        trace!(target: "crypto::x3dh", "Computing DH2 = DH(IK_B, EK_A)");
        let dh2 = P::diffie_hellman(local_identity, remote_ephemeral.as_ref())
            .map_err(|e| format!("DH2 failed: {}", e))?;

        // DH3 = DH(SPK_B, EK_A)
        trace!(target: "crypto::x3dh", "Computing DH3 = DH(SPK_B, EK_A)");
        let dh3 = P::diffie_hellman(local_signed_prekey, remote_ephemeral.as_ref())
            .map_err(|e| format!("DH3 failed: {}", e))?;

        // DH4 = DH(OTK_B, EK_A)
        let dh4 = match local_one_time {
            Some(otk_private) => {
                trace!(target: "crypto::x3dh", "Computing DH4 = DH(OTK_B, EK_A)");
                Some(
                    P::diffie_hellman(otk_private, remote_ephemeral.as_ref())
                        .map_err(|e| format!("DH4 failed: {}", e))?,
                )
            }
            None => None,
        };

        debug!(
            target: "crypto::x3dh",
            dh1_len = %dh1.len(),
            dh2_len = %dh2.len(),
            dh3_len = %dh3.len(),
            has_otk = %dh4.is_some(),
            "DH operations completed (responder)"
        );

        let root_key = derive_root_key::<P>(&dh1, &dh2, &dh3, dh4.as_deref())?;

        debug!(
            target: "crypto::x3dh",
            root_key_len = %root_key.len(),
            "X3DH completed successfully (responder)"
        );

        Ok(root_key)
    }
}

/// Свернуть DH-выходы в root key: HKDF(DH1 || DH2 || DH3 [|| DH4])
fn derive_root_key<P: CryptoProvider>(
    dh1: &[u8],
    dh2: &[u8],
    dh3: &[u8],
    dh4: Option<&[u8]>,
) -> Result<Vec<u8>, String> {
    let mut combined_dh =
        Vec::with_capacity(dh1.len() + dh2.len() + dh3.len() + dh4.map_or(0, |d| d.len()));
    combined_dh.extend_from_slice(dh1);
    combined_dh.extend_from_slice(dh2);
    combined_dh.extend_from_slice(dh3);
    if let Some(dh4) = dh4 {
        combined_dh.extend_from_slice(dh4);
    }

    P::hkdf_derive_key(
        b"", // no salt
        &combined_dh,
        b"X3DH Root Key",
        32, // 32 bytes root key
    )
    .map_err(|e| format!("HKDF derivation failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::suites::classic::ClassicSuiteProvider;

    fn make_bob_bundle() -> (Vec<u8>, Vec<u8>, Vec<u8>, X3DHPublicKeyBundle) {
        let (bob_identity_priv, bob_identity_pub) =
            ClassicSuiteProvider::generate_kem_keys().unwrap();
        let (bob_signed_prekey_priv, bob_signed_prekey_pub) =
            ClassicSuiteProvider::generate_kem_keys().unwrap();
        let (bob_signing_key, bob_verifying_key) =
            ClassicSuiteProvider::generate_signature_keys().unwrap();

        let bob_signature =
            ClassicSuiteProvider::sign(&bob_signing_key, bob_signed_prekey_pub.as_ref()).unwrap();

        let bundle = X3DHPublicKeyBundle {
            identity_public: bob_identity_pub.clone(),
            signed_prekey_public: bob_signed_prekey_pub,
            signature: bob_signature,
            verifying_key: bob_verifying_key,
            suite_id: ClassicSuiteProvider::suite_id(),
        };

        (bob_identity_priv, bob_identity_pub, bob_signed_prekey_priv, bundle)
    }

    #[test]
    fn test_x3dh_alice_bob_get_same_root_key() {
        let (alice_identity_priv, alice_identity_pub) =
            ClassicSuiteProvider::generate_kem_keys().unwrap();
        let (bob_identity_priv, _, bob_signed_prekey_priv, bob_bundle) = make_bob_bundle();

        // Alice выполняет X3DH как initiator
        let (alice_root_key, alice_state) =
            X3DHProtocol::<ClassicSuiteProvider>::perform_as_initiator(
                &alice_identity_priv,
                &bob_bundle,
                None,
            )
            .unwrap();

        // Bob получает Alice's ephemeral public key из первого сообщения
        let alice_ephemeral_pub =
            ClassicSuiteProvider::from_private_key_to_public_key(&alice_state.ephemeral_private)
                .unwrap();

        // Bob выполняет X3DH как responder
        let bob_root_key = X3DHProtocol::<ClassicSuiteProvider>::perform_as_responder(
            &bob_identity_priv,
            &bob_signed_prekey_priv,
            None,
            &alice_identity_pub,
            &alice_ephemeral_pub,
        )
        .unwrap();

        assert_eq!(
            alice_root_key, bob_root_key,
            "X3DH must produce same root key for Alice and Bob"
        );
        assert_eq!(alice_root_key.len(), 32, "Root key must be 32 bytes");
    }

    #[test]
    fn test_x3dh_with_one_time_prekey() {
        let (alice_identity_priv, alice_identity_pub) =
            ClassicSuiteProvider::generate_kem_keys().unwrap();
        let (bob_identity_priv, _, bob_signed_prekey_priv, bob_bundle) = make_bob_bundle();

        let (bob_otk_priv, bob_otk_pub) = ClassicSuiteProvider::generate_kem_keys().unwrap();

        let (alice_root_key, alice_state) =
            X3DHProtocol::<ClassicSuiteProvider>::perform_as_initiator(
                &alice_identity_priv,
                &bob_bundle,
                Some(&bob_otk_pub),
            )
            .unwrap();

        let alice_ephemeral_pub =
            ClassicSuiteProvider::from_private_key_to_public_key(&alice_state.ephemeral_private)
                .unwrap();

        let bob_root_key = X3DHProtocol::<ClassicSuiteProvider>::perform_as_responder(
            &bob_identity_priv,
            &bob_signed_prekey_priv,
            Some(&bob_otk_priv),
            &alice_identity_pub,
            &alice_ephemeral_pub,
        )
        .unwrap();

        assert_eq!(alice_root_key, bob_root_key);

        // Без OTK responder получает ДРУГОЙ root key
        let bob_root_key_without_otk =
            X3DHProtocol::<ClassicSuiteProvider>::perform_as_responder(
                &bob_identity_priv,
                &bob_signed_prekey_priv,
                None,
                &alice_identity_pub,
                &alice_ephemeral_pub,
            )
            .unwrap();

        assert_ne!(alice_root_key, bob_root_key_without_otk);
    }

    #[test]
    fn test_x3dh_rejects_invalid_signature() {
        let (alice_identity_priv, _) = ClassicSuiteProvider::generate_kem_keys().unwrap();

        // Bob's bundle с невалидной подписью
        let (_, bob_identity_pub) = ClassicSuiteProvider::generate_kem_keys().unwrap();
        let (_, bob_signed_prekey_pub) = ClassicSuiteProvider::generate_kem_keys().unwrap();
        let (_, bob_verifying_key) = ClassicSuiteProvider::generate_signature_keys().unwrap();

        let malicious_bundle = X3DHPublicKeyBundle {
            identity_public: bob_identity_pub,
            signed_prekey_public: bob_signed_prekey_pub,
            signature: vec![0xFF; 64], // Невалидная подпись
            verifying_key: bob_verifying_key,
            suite_id: ClassicSuiteProvider::suite_id(),
        };

        // Alice должна отклонить невалидную подпись
        let result = X3DHProtocol::<ClassicSuiteProvider>::perform_as_initiator(
            &alice_identity_priv,
            &malicious_bundle,
            None,
        );

        assert!(result.is_err(), "X3DH must reject invalid signature");

        match result {
            Err(e) => assert!(
                e.contains("Signature verification failed"),
                "Error message: {}",
                e
            ),
            Ok(_) => panic!("Expected error but got Ok"),
        }
    }
}
