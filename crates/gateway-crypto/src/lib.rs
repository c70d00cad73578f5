//! Envelope encryption: AES-256-GCM with a two-level session/master key
//! hierarchy, plus at-rest `EncryptionKey` lifecycle management.
//!
//! Ported from `crypto_service.py` / `encryption_key_service.py`: every
//! payload is encrypted under a freshly generated random session key, and
//! that session key is itself wrapped under the currently active master
//! key (or a base key derived from startup configuration if no
//! `EncryptionKey` has been activated). Decryption reverses both steps.

use std::collections::HashMap;
use std::sync::RwLock;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use gateway_protocol::{EncryptionKey, GatewayValue};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const ALGORITHM: &str = "AES-256-GCM";
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("malformed encrypted envelope: {0}")]
    Malformed(String),
    #[error("key '{0}' not found")]
    KeyNotFound(String),
    #[error("key '{0}' is active and cannot be deleted")]
    DeleteActiveKey(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The wire shape of an encrypted payload (§6 of the spec): all byte
/// fields are base64, alongside an `algorithm` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub ciphertext: String,
    pub nonce: String,
    pub encrypted_key: String,
    pub key_nonce: String,
    pub algorithm: String,
}

/// AES-256-GCM envelope encryption with a mutable active master key.
pub struct CryptoService {
    /// Fallback key derived from startup configuration, used whenever no
    /// `EncryptionKey` is active.
    base_key: [u8; 32],
    active_key: RwLock<Option<[u8; 32]>>,
    keys: RwLock<HashMap<String, EncryptionKey>>,
}

impl CryptoService {
    /// Build a service from master key material. Material shorter or
    /// longer than 32 bytes (e.g. a passphrase) is normalized via SHA-256,
    /// matching the Python service's `_derive_key` fallback.
    pub fn new(master_key_material: &[u8]) -> Self {
        CryptoService {
            base_key: normalize_key(master_key_material),
            active_key: RwLock::new(None),
            keys: RwLock::new(HashMap::new()),
        }
    }

    fn current_master_key(&self) -> [u8; 32] {
        self.active_key.read().expect("active key lock poisoned").unwrap_or(self.base_key)
    }

    /// Atomically replace the active key material (`None` falls back to
    /// the base key). Does not touch the `EncryptionKey` registry.
    pub fn update_active_key(&self, key: Option<[u8; 32]>) {
        *self.active_key.write().expect("active key lock poisoned") = key;
    }

    // -- EncryptionKey lifecycle -------------------------------------------------

    /// Register (or replace) a key record. Does not change which key is active.
    pub fn register_key(&self, key: EncryptionKey) {
        self.keys.write().expect("keys lock poisoned").insert(key.id.clone(), key);
    }

    /// Activate `id`, deactivating every other key and refreshing the
    /// service's active key material. At most one key is active afterward.
    pub fn activate(&self, id: &str) -> Result<(), CryptoError> {
        let mut keys = self.keys.write().expect("keys lock poisoned");
        if !keys.contains_key(id) {
            return Err(CryptoError::KeyNotFound(id.to_string()));
        }
        for (key_id, key) in keys.iter_mut() {
            key.is_active = key_id == id;
        }
        let material = keys.get(id).expect("checked above").key;
        drop(keys);
        self.update_active_key(Some(material));
        Ok(())
    }

    /// Deactivate `id` and fall back to the base key.
    pub fn deactivate(&self, id: &str) -> Result<(), CryptoError> {
        let mut keys = self.keys.write().expect("keys lock poisoned");
        let key = keys.get_mut(id).ok_or_else(|| CryptoError::KeyNotFound(id.to_string()))?;
        key.is_active = false;
        drop(keys);
        self.update_active_key(None);
        Ok(())
    }

    /// Delete a key record. Forbidden while the key is active.
    pub fn delete_key(&self, id: &str) -> Result<(), CryptoError> {
        let mut keys = self.keys.write().expect("keys lock poisoned");
        match keys.get(id) {
            None => Err(CryptoError::KeyNotFound(id.to_string())),
            Some(key) if key.is_active => Err(CryptoError::DeleteActiveKey(id.to_string())),
            Some(_) => {
                keys.remove(id);
                Ok(())
            }
        }
    }

    // -- encrypt/decrypt -----------------------------------------------------

    /// Two-level envelope-encrypt `plaintext`: a random session key
    /// encrypts the payload, and the active master key (or base key)
    /// encrypts the session key.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedPayload, CryptoError> {
        let mut session_key = [0u8; 32];
        OsRng.fill_bytes(&mut session_key);

        let (ciphertext, nonce) = aes_gcm_encrypt(&session_key, plaintext)?;
        let (encrypted_key, key_nonce) = aes_gcm_encrypt(&self.current_master_key(), &session_key)?;

        let b64 = base64::engine::general_purpose::STANDARD;
        Ok(EncryptedPayload {
            ciphertext: b64.encode(ciphertext),
            nonce: b64.encode(nonce),
            encrypted_key: b64.encode(encrypted_key),
            key_nonce: b64.encode(key_nonce),
            algorithm: ALGORITHM.to_string(),
        })
    }

    /// Reverse [`CryptoService::encrypt`]: unwrap the session key with the
    /// active master key, then decrypt the payload.
    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<Vec<u8>, CryptoError> {
        let b64 = base64::engine::general_purpose::STANDARD;
        let encrypted_key = b64.decode(&payload.encrypted_key).map_err(|e| CryptoError::Malformed(e.to_string()))?;
        let key_nonce = b64.decode(&payload.key_nonce).map_err(|e| CryptoError::Malformed(e.to_string()))?;
        let ciphertext = b64.decode(&payload.ciphertext).map_err(|e| CryptoError::Malformed(e.to_string()))?;
        let nonce = b64.decode(&payload.nonce).map_err(|e| CryptoError::Malformed(e.to_string()))?;

        let session_key_bytes = aes_gcm_decrypt(&self.current_master_key(), &key_nonce, &encrypted_key)?;
        let session_key: [u8; 32] =
            session_key_bytes.try_into().map_err(|_| CryptoError::Malformed("unwrapped session key is not 32 bytes".to_string()))?;

        aes_gcm_decrypt(&session_key, &nonce, &ciphertext)
    }

    /// Canonicalize `value` to JSON, then [`CryptoService::encrypt`] it.
    pub fn wrap_payload(&self, value: &GatewayValue) -> Result<EncryptedPayload, CryptoError> {
        let json = serde_json::to_vec(&value.to_json())?;
        self.encrypt(&json)
    }

    /// Reverse [`CryptoService::wrap_payload`].
    pub fn unwrap_payload(&self, payload: &EncryptedPayload) -> Result<GatewayValue, CryptoError> {
        let plaintext = self.decrypt(payload)?;
        let json: serde_json::Value = serde_json::from_slice(&plaintext)?;
        Ok(GatewayValue::from_json(&json))
    }
}

fn normalize_key(material: &[u8]) -> [u8; 32] {
    if material.len() == 32 {
        let mut key = [0u8; 32];
        key.copy_from_slice(material);
        key
    } else {
        Sha256::digest(material).into()
    }
}

fn aes_gcm_encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_LEN]), CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher.encrypt(nonce, plaintext).map_err(|e| CryptoError::Encrypt(e.to_string()))?;
    Ok((ciphertext, nonce_bytes))
}

fn aes_gcm_decrypt(key: &[u8; 32], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::Malformed(format!("nonce must be {NONCE_LEN} bytes, got {}", nonce.len())));
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher.decrypt(Nonce::from_slice(nonce), ciphertext).map_err(|e| CryptoError::Decrypt(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_protocol::value::GatewayMap;
    use chrono::Utc;

    fn service() -> CryptoService {
        CryptoService::new(b"a test master key passphrase")
    }

    fn key_record(id: &str, material: [u8; 32]) -> EncryptionKey {
        EncryptionKey {
            id: id.to_string(),
            name: id.to_string(),
            key: material,
            is_active: false,
            created_at: Utc::now(),
            expires_at: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn roundtrip_with_base_key() {
        let svc = service();
        let mut m = GatewayMap::new();
        m.insert("target_id", GatewayValue::String("t1".to_string()));
        m.insert("reading", GatewayValue::Float(25.5));
        let value = GatewayValue::Map(m);

        let wrapped = svc.wrap_payload(&value).unwrap();
        assert_eq!(wrapped.algorithm, ALGORITHM);
        let unwrapped = svc.unwrap_payload(&wrapped).unwrap();
        assert_eq!(unwrapped, value);
    }

    #[test]
    fn activating_a_key_changes_ciphertext_but_not_plaintext() {
        let svc = service();
        svc.register_key(key_record("k1", [7u8; 32]));
        svc.activate("k1").unwrap();

        let value = GatewayValue::String("hello".to_string());
        let wrapped = svc.wrap_payload(&value).unwrap();
        let unwrapped = svc.unwrap_payload(&wrapped).unwrap();
        assert_eq!(unwrapped, value);
    }

    #[test]
    fn deactivating_falls_back_to_base_key() {
        let svc = service();
        svc.register_key(key_record("k1", [7u8; 32]));
        svc.activate("k1").unwrap();
        svc.deactivate("k1").unwrap();

        let value = GatewayValue::Int(42);
        let wrapped = svc.wrap_payload(&value).unwrap();
        assert_eq!(svc.unwrap_payload(&wrapped).unwrap(), value);
    }

    #[test]
    fn deleting_active_key_is_forbidden() {
        let svc = service();
        svc.register_key(key_record("k1", [1u8; 32]));
        svc.activate("k1").unwrap();
        assert!(matches!(svc.delete_key("k1"), Err(CryptoError::DeleteActiveKey(_))));
    }

    #[test]
    fn activating_second_key_deactivates_the_first() {
        let svc = service();
        svc.register_key(key_record("k1", [1u8; 32]));
        svc.register_key(key_record("k2", [2u8; 32]));
        svc.activate("k1").unwrap();
        svc.activate("k2").unwrap();
        assert!(!svc.keys.read().unwrap().get("k1").unwrap().is_active);
        assert!(svc.keys.read().unwrap().get("k2").unwrap().is_active);
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let svc = service();
        let mut wrapped = svc.wrap_payload(&GatewayValue::Bool(true)).unwrap();
        wrapped.ciphertext = base64::engine::general_purpose::STANDARD.encode(b"not the real ciphertext!!");
        assert!(svc.unwrap_payload(&wrapped).is_err());
    }
}
