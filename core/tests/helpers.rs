#![allow(unused)]

use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

use openkey_core::card::{CardEngine, CardProfile};
use openkey_core::store::{
    KeyMetadata, KeyRole, KeyStore, PinRef, Plaintext, PublicKey, Signature, StoreError,
    KEY_HANDLE_LEN,
};

pub const UNIQUE_ID: [u8; 8] = [0x1B, 0x36, 0x6E, 0x12, 0xC4, 0x57, 0xA9, 0x05];

pub const USER_PIN: &[u8] = b"123456";
pub const RESET_CODE: &[u8] = b"00004321";
pub const ADMIN_PIN: &[u8] = b"12345678";

pub const ATTESTATION_CERT: &[u8] = &[0x30, 0x82, 0x01, 0x00, 0xDE, 0xAD, 0xBE, 0xEF];

pub const PROFILE: CardProfile<'static> = CardProfile {
    name: b"Doe<<Jane",
    language: b"en",
    sex: 0x39,
    url: b"https://example.com/key.asc",
    login: b"jdoe",
};

pub fn init_logger() {
    let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, Default::default());
}

fn role_seed(role: KeyRole) -> [u8; 32] {
    let d = Sha256::new()
        .chain_update(b"openkey-test-seed")
        .chain_update(role.to_string().as_bytes())
        .finalize();
    d.into()
}

/// Deterministic stand-in signature, recomputable by assertions
pub fn fake_sign(role: KeyRole, digest: &[u8]) -> Vec<u8> {
    Sha256::new()
        .chain_update(b"sig")
        .chain_update(role_seed(role))
        .chain_update(digest)
        .finalize()
        .to_vec()
}

/// Deterministic stand-in public key; U2F keys take the uncompressed
/// P-256 point shape
pub fn fake_public_key(role: KeyRole) -> Vec<u8> {
    let seed = role_seed(role);
    let x = Sha256::new().chain_update(seed).chain_update(b"x").finalize();
    let y = Sha256::new().chain_update(seed).chain_update(b"y").finalize();

    let mut pk = Vec::new();
    if role == KeyRole::U2f {
        pk.push(0x04);
    }
    pk.extend_from_slice(&x);
    pk.extend_from_slice(&y);
    pk
}

/// Deterministic stand-in plaintext
pub fn fake_decrypt(role: KeyRole, ciphertext: &[u8]) -> Vec<u8> {
    Sha256::new()
        .chain_update(b"pt")
        .chain_update(role_seed(role))
        .chain_update(ciphertext)
        .finalize()
        .to_vec()
}

/// Deterministic stand-in key handle derivation
pub fn fake_key_handle(application: &[u8; 32]) -> [u8; KEY_HANDLE_LEN] {
    Sha256::new()
        .chain_update(b"kh")
        .chain_update(role_seed(KeyRole::U2f))
        .chain_update(application)
        .finalize()
        .into()
}

/// In-memory key store with deterministic outputs.
///
/// The counter cell is shared so a second store over the same cell
/// simulates a restart with persisted state.
pub struct MemoryStore {
    pins: [Vec<u8>; 3],
    counter: Arc<Mutex<u32>>,
    provisioned: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_counter(Arc::new(Mutex::new(0)))
    }

    pub fn with_counter(counter: Arc<Mutex<u32>>) -> Self {
        Self {
            pins: [USER_PIN.to_vec(), RESET_CODE.to_vec(), ADMIN_PIN.to_vec()],
            counter,
            provisioned: true,
        }
    }

    pub fn unprovisioned() -> Self {
        Self {
            pins: [vec![], vec![], vec![]],
            counter: Arc::new(Mutex::new(0)),
            provisioned: false,
        }
    }

    pub fn counter_cell(&self) -> Arc<Mutex<u32>> {
        self.counter.clone()
    }

    fn pin_index(reference: PinRef) -> usize {
        match reference {
            PinRef::User => 0,
            PinRef::ResetCode => 1,
            PinRef::Admin => 2,
        }
    }
}

impl KeyStore for MemoryStore {
    fn public_key(&self, role: KeyRole) -> Result<PublicKey, StoreError> {
        if !self.provisioned {
            return Err(StoreError::KeyUnavailable);
        }
        PublicKey::from_slice(&fake_public_key(role)).map_err(|_| StoreError::CryptoFailed)
    }

    fn sign(&mut self, role: KeyRole, digest: &[u8]) -> Result<Signature, StoreError> {
        if !self.provisioned {
            return Err(StoreError::KeyUnavailable);
        }
        Signature::from_slice(&fake_sign(role, digest)).map_err(|_| StoreError::CryptoFailed)
    }

    fn decrypt(&mut self, role: KeyRole, ciphertext: &[u8]) -> Result<Plaintext, StoreError> {
        if !self.provisioned {
            return Err(StoreError::KeyUnavailable);
        }
        Plaintext::from_slice(&fake_decrypt(role, ciphertext))
            .map_err(|_| StoreError::CryptoFailed)
    }

    fn verify_pin(&self, reference: PinRef, value: &[u8]) -> bool {
        let stored = &self.pins[Self::pin_index(reference)];
        !stored.is_empty() && stored.as_slice() == value
    }

    fn set_pin(&mut self, reference: PinRef, value: &[u8]) -> Result<(), StoreError> {
        self.pins[Self::pin_index(reference)] = value.to_vec();
        Ok(())
    }

    fn pin_length(&self, reference: PinRef) -> Result<usize, StoreError> {
        Ok(self.pins[Self::pin_index(reference)].len())
    }

    fn key_metadata(&self, role: KeyRole) -> Result<KeyMetadata, StoreError> {
        if !self.provisioned {
            return Err(StoreError::KeyUnavailable);
        }

        let mut fingerprint = [0u8; 20];
        fingerprint.copy_from_slice(&fake_sign(role, b"fingerprint")[..20]);

        Ok(KeyMetadata {
            fingerprint,
            created_at: 0x5F00_0000,
        })
    }

    fn key_handle(&self, application: &[u8; 32]) -> Result<[u8; KEY_HANDLE_LEN], StoreError> {
        if !self.provisioned {
            return Err(StoreError::KeyUnavailable);
        }
        Ok(fake_key_handle(application))
    }

    fn attestation_certificate(&self) -> Result<&[u8], StoreError> {
        if !self.provisioned {
            return Err(StoreError::KeyUnavailable);
        }
        Ok(ATTESTATION_CERT)
    }

    fn persist_counter(&mut self, value: u32) -> Result<(), StoreError> {
        *self.counter.lock().unwrap() = value;
        Ok(())
    }

    fn load_counter(&self) -> Result<u32, StoreError> {
        if !self.provisioned {
            return Err(StoreError::PersistFailed);
        }
        Ok(*self.counter.lock().unwrap())
    }
}

/// Provisioned card engine, application not yet selected
pub fn card_engine() -> CardEngine<MemoryStore> {
    CardEngine::new(MemoryStore::new(), UNIQUE_ID, Some(&PROFILE))
}

/// Raw U2F message in the extended APDU form the protocol mandates
pub fn u2f_message(ins: u8, p1: u8, data: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x00, ins, p1, 0x00, 0x00];
    frame.push((data.len() >> 8) as u8);
    frame.push(data.len() as u8);
    frame.extend_from_slice(data);
    frame.extend_from_slice(&[0x00, 0x00]);
    frame
}
