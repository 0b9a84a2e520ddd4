//! U2F (CTAP1) authenticator engine.
//!
//! Stateless per request apart from the signing counter, which is cached
//! here and persisted through the [`KeyStore`] before any signature over
//! it is produced. The token sits inline on the USB bus and asserts user
//! presence for every signing request.

use byteorder::{BigEndian, ByteOrder};
use heapless::Vec;
use sha2::{Digest, Sha256};

use openkey_proto::apdu::{Response, StatusWord, RESPONSE_LEN};
use openkey_proto::u2f::{
    Control, Request, AUTH_FLAG_UP, PUBLIC_KEY_LEN, REGISTER_ID, REGISTER_SIGN_RFU,
    VERSION_STRING,
};

use crate::store::{KeyRole, KeyStore};

/// U2F authenticator over a [`KeyStore`]
pub struct U2fToken<S: KeyStore> {
    store: S,
    counter: u32,
    initialized: bool,
}

impl<S: KeyStore> U2fToken<S> {
    /// Create a token, loading the persisted counter.
    ///
    /// A store without a counter or U2F key leaves the token
    /// unprovisioned; every request then fails with SW 0x6985.
    pub fn new(store: S) -> Self {
        let (counter, initialized) = match store.load_counter() {
            Ok(c) => (c, store.public_key(KeyRole::U2f).is_ok()),
            Err(_e) => {
                #[cfg(feature = "log")]
                log::warn!("no persisted counter, u2f disabled: {:?}", _e);
                (0, false)
            }
        };

        #[cfg(feature = "log")]
        if !initialized {
            log::warn!("u2f token unprovisioned, requests disabled");
        }

        Self {
            store,
            counter,
            initialized,
        }
    }

    /// Current cached counter value
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Process one raw U2F message, writing the response (always carrying
    /// a trailing status word) to `out` and returning its length
    pub fn handle(&mut self, msg: &[u8], out: &mut [u8]) -> usize {
        let response = self.request(msg);

        match response.encode(out) {
            Ok(n) => n,
            Err(_e) => {
                #[cfg(feature = "log")]
                log::warn!("u2f response encoding failed: {:?}", _e);
                0
            }
        }
    }

    fn request(&mut self, msg: &[u8]) -> Response {
        let req = match Request::parse(msg) {
            Ok(r) => r,
            Err(sw) => return Response::status(sw),
        };

        #[cfg(feature = "log")]
        log::debug!("u2f request: {:?}", req);

        if !self.initialized {
            return Response::status(StatusWord::ConditionsNotSatisfied);
        }

        let r = match req {
            Request::Version => self.version(),
            Request::Register {
                challenge,
                application,
            } => self.register(challenge, application),
            Request::Authenticate {
                control,
                challenge,
                application,
                key_handle,
            } => self.authenticate(control, challenge, application, key_handle),
        };

        match r {
            Ok(rsp) => rsp,
            Err(sw) => Response::status(sw),
        }
    }

    fn version(&self) -> Result<Response, StatusWord> {
        let data =
            Vec::from_slice(VERSION_STRING).map_err(|_| StatusWord::WrongLength)?;
        Ok(Response::success(data))
    }

    /// Registration: 0x05 | pubkey | kh-len | key handle | cert | signature
    fn register(
        &mut self,
        challenge: &[u8; 32],
        application: &[u8; 32],
    ) -> Result<Response, StatusWord> {
        let key_handle = self.store.key_handle(application).map_err(store_sw)?;
        let public_key = self.store.public_key(KeyRole::U2f).map_err(store_sw)?;
        if public_key.len() != PUBLIC_KEY_LEN {
            return Err(store_sw(crate::store::StoreError::CryptoFailed));
        }

        let mut out = Vec::<u8, RESPONSE_LEN>::new();

        out.push(REGISTER_ID)
            .map_err(|_| StatusWord::WrongLength)?;
        out.extend_from_slice(&public_key)
            .map_err(|_| StatusWord::WrongLength)?;
        out.push(key_handle.len() as u8)
            .map_err(|_| StatusWord::WrongLength)?;
        out.extend_from_slice(&key_handle)
            .map_err(|_| StatusWord::WrongLength)?;
        out.extend_from_slice(self.store.attestation_certificate().map_err(store_sw)?)
            .map_err(|_| StatusWord::WrongLength)?;

        // attestation signature over RFU | application | challenge |
        // key handle | public key
        let digest = Sha256::new()
            .chain_update([REGISTER_SIGN_RFU])
            .chain_update(application)
            .chain_update(challenge)
            .chain_update(key_handle)
            .chain_update(&public_key)
            .finalize();

        let sig = self
            .store
            .sign(KeyRole::Attestation, &digest)
            .map_err(store_sw)?;
        out.extend_from_slice(&sig)
            .map_err(|_| StatusWord::WrongLength)?;

        Ok(Response::success(out))
    }

    /// Authentication: 0x01 | counter BE | signature
    fn authenticate(
        &mut self,
        control: Control,
        challenge: &[u8; 32],
        application: &[u8; 32],
        key_handle: &[u8],
    ) -> Result<Response, StatusWord> {
        let expected = self.store.key_handle(application).map_err(store_sw)?;
        if key_handle != &expected[..] {
            return Err(StatusWord::WrongData);
        }

        // valid handle, no signature, no counter movement; the host
        // retries with a signing control byte
        if control == Control::CheckOnly {
            return Err(StatusWord::ConditionsNotSatisfied);
        }

        // the counter must be durably persisted before a signature over
        // it exists, else replay opens up across power loss
        let next = self
            .counter
            .checked_add(1)
            .ok_or(StatusWord::ConditionsNotSatisfied)?;
        self.store.persist_counter(next).map_err(store_sw)?;
        self.counter = next;

        let mut counter_be = [0u8; 4];
        BigEndian::write_u32(&mut counter_be, next);

        let digest = Sha256::new()
            .chain_update(application)
            .chain_update([AUTH_FLAG_UP])
            .chain_update(counter_be)
            .chain_update(challenge)
            .finalize();

        let sig = self.store.sign(KeyRole::U2f, &digest).map_err(store_sw)?;

        let mut out = Vec::<u8, RESPONSE_LEN>::new();

        out.push(AUTH_FLAG_UP)
            .map_err(|_| StatusWord::WrongLength)?;
        out.extend_from_slice(&counter_be)
            .map_err(|_| StatusWord::WrongLength)?;
        out.extend_from_slice(&sig)
            .map_err(|_| StatusWord::WrongLength)?;

        Ok(Response::success(out))
    }
}

/// Store failures surface in-band; U2F has no richer status vocabulary
fn store_sw(_e: crate::store::StoreError) -> StatusWord {
    #[cfg(feature = "log")]
    log::warn!("key store error: {:?}", _e);

    StatusWord::ConditionsNotSatisfied
}
