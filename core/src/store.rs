//! [`KeyStore`] capability trait, the boundary between the protocol
//! engines and provisioned secrets.
//!
//! The engines never hold raw private key bytes; signing, decryption, PIN
//! comparison and counter persistence are all delegated through this trait.
//! Hardware builds implement it over SNVS-wrapped key material, tests use
//! an in-memory store with deterministic outputs.

use heapless::Vec;
use strum::Display;

/// OpenPGP key fingerprint length
pub const FINGERPRINT_LEN: usize = 20;

/// U2F key handle length
pub const KEY_HANDLE_LEN: usize = 32;

/// Maximum public key / signature / plaintext size crossing the store
/// boundary (fits an RSA-2048 modulus with headroom)
pub const MAX_KEY_LEN: usize = 512;

/// Public key bytes as provisioned (raw point or modulus, no TLV wrapping)
pub type PublicKey = Vec<u8, MAX_KEY_LEN>;

/// Raw signature bytes
pub type Signature = Vec<u8, MAX_KEY_LEN>;

/// Decrypted plaintext
pub type Plaintext = Vec<u8, MAX_KEY_LEN>;

/// Key roles addressable through the store
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum KeyRole {
    /// OpenPGP signature key (PSO:CDS)
    Sign,
    /// OpenPGP decryption key (PSO:DECIPHER)
    Decrypt,
    /// OpenPGP authentication key (INTERNAL AUTHENTICATE)
    Auth,
    /// U2F per-token key
    U2f,
    /// U2F attestation key
    Attestation,
}

/// PIN references backed by the store.
///
/// The reset code is its own counted reference, used only by
/// RESET RETRY COUNTER.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum PinRef {
    /// PW1, cardholder PIN
    User,
    /// Reset code for unblocking PW1
    ResetCode,
    /// PW3, admin PIN
    Admin,
}

/// Fingerprint and creation timestamp for a provisioned key
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KeyMetadata {
    /// OpenPGP v4 fingerprint
    pub fingerprint: [u8; FINGERPRINT_LEN],
    /// Key generation time, seconds since the epoch
    pub created_at: u32,
}

/// [`KeyStore`] errors
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "thiserror", derive(thiserror::Error))]
pub enum StoreError {
    /// No key provisioned for the requested role
    #[cfg_attr(feature = "thiserror", error("key unavailable for role"))]
    KeyUnavailable,

    /// Cryptographic operation failed
    #[cfg_attr(feature = "thiserror", error("cryptographic operation failed"))]
    CryptoFailed,

    /// Counter or PIN persistence failed
    #[cfg_attr(feature = "thiserror", error("persistence failed"))]
    PersistFailed,
}

/// Capability trait supplying provisioned secrets to the engines.
///
/// All failures are explicit; implementations must never return
/// zeroed-out key material in place of an error.
pub trait KeyStore {
    /// Fetch the public key for a role
    fn public_key(&self, role: KeyRole) -> Result<PublicKey, StoreError>;

    /// Sign a digest with the key for a role
    fn sign(&mut self, role: KeyRole, digest: &[u8]) -> Result<Signature, StoreError>;

    /// Decrypt a ciphertext with the key for a role
    fn decrypt(&mut self, role: KeyRole, ciphertext: &[u8]) -> Result<Plaintext, StoreError>;

    /// Compare a submitted PIN against the stored reference.
    ///
    /// Comparison only; try counters are the card engine's responsibility.
    fn verify_pin(&self, reference: PinRef, value: &[u8]) -> bool;

    /// Replace the stored PIN for a reference
    fn set_pin(&mut self, reference: PinRef, value: &[u8]) -> Result<(), StoreError>;

    /// Length of the stored PIN for a reference, used to split
    /// old-then-new PIN payloads
    fn pin_length(&self, reference: PinRef) -> Result<usize, StoreError>;

    /// Fingerprint and creation time for a provisioned key
    fn key_metadata(&self, role: KeyRole) -> Result<KeyMetadata, StoreError>;

    /// Derive the key handle bound to a U2F application parameter
    fn key_handle(
        &self,
        application: &[u8; 32],
    ) -> Result<[u8; KEY_HANDLE_LEN], StoreError>;

    /// DER-encoded U2F attestation certificate
    fn attestation_certificate(&self) -> Result<&[u8], StoreError>;

    /// Durably persist the U2F counter
    fn persist_counter(&mut self, value: u32) -> Result<(), StoreError>;

    /// Load the persisted U2F counter
    fn load_counter(&self) -> Result<u32, StoreError>;
}

impl<T: KeyStore> KeyStore for &mut T {
    fn public_key(&self, role: KeyRole) -> Result<PublicKey, StoreError> {
        T::public_key(self, role)
    }

    fn sign(&mut self, role: KeyRole, digest: &[u8]) -> Result<Signature, StoreError> {
        T::sign(self, role, digest)
    }

    fn decrypt(&mut self, role: KeyRole, ciphertext: &[u8]) -> Result<Plaintext, StoreError> {
        T::decrypt(self, role, ciphertext)
    }

    fn verify_pin(&self, reference: PinRef, value: &[u8]) -> bool {
        T::verify_pin(self, reference, value)
    }

    fn set_pin(&mut self, reference: PinRef, value: &[u8]) -> Result<(), StoreError> {
        T::set_pin(self, reference, value)
    }

    fn pin_length(&self, reference: PinRef) -> Result<usize, StoreError> {
        T::pin_length(self, reference)
    }

    fn key_metadata(&self, role: KeyRole) -> Result<KeyMetadata, StoreError> {
        T::key_metadata(self, role)
    }

    fn key_handle(
        &self,
        application: &[u8; 32],
    ) -> Result<[u8; KEY_HANDLE_LEN], StoreError> {
        T::key_handle(self, application)
    }

    fn attestation_certificate(&self) -> Result<&[u8], StoreError> {
        T::attestation_certificate(self)
    }

    fn persist_counter(&mut self, value: u32) -> Result<(), StoreError> {
        T::persist_counter(self, value)
    }

    fn load_counter(&self) -> Result<u32, StoreError> {
        T::load_counter(self)
    }
}
