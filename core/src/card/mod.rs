//! OpenPGP card application engine.
//!
//! [`CardEngine`] owns the card security state (selected application,
//! satisfied access conditions, PIN try counters, data objects) and
//! executes parsed command APDUs against it. Key operations and PIN
//! comparison are delegated to the [`KeyStore`]; no private key bytes
//! enter this module.

use heapless::Vec;
use rand_core::{CryptoRngCore, OsRng};
use strum::Display;

use openkey_proto::apdu::{Command, Instruction, Response, StatusWord, RESPONSE_LEN};

use crate::store::{KeyRole, KeyStore, PinRef, StoreError};

pub mod data;
pub mod pins;

pub use data::{CardProfile, DataObjects};
pub use pins::{SecurityStatus, TryCounters, MAX_PIN_TRIES};

use data::{push_tlv, tag, PutError};
use pins::{MAX_PIN_LEN, MIN_ADMIN_PIN_LEN, MIN_USER_PIN_LEN};

/// OpenPGP card application identifier prefix (RID + application)
pub const AID_PREFIX: [u8; 6] = [0xD2, 0x76, 0x00, 0x01, 0x24, 0x01];

/// OpenPGP card specification version reported in the AID
const AID_VERSION: [u8; 2] = [0x03, 0x04];

/// Manufacturer id reported in the AID (test / unregistered range)
const AID_MANUFACTURER: [u8; 2] = [0xFF, 0xFE];

/// Card serial number length
pub const SERIAL_LEN: usize = 4;

/// Maximum GET CHALLENGE response
const MAX_CHALLENGE_LEN: usize = 256;

/// CRT tags addressing key roles in GENERATE ASYMMETRIC KEY PAIR
const CRT_SIGN: u8 = 0xB6;
const CRT_DECRYPT: u8 = 0xB8;
const CRT_AUTH: u8 = 0xA4;

/// A parsed card command.
///
/// Exhaustive over the instruction set; dispatch matches on this enum so
/// an unhandled command cannot be silently ignored.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum CardCommand<'a> {
    /// SELECT the application by AID
    Select { aid: &'a [u8] },

    /// VERIFY a PIN, or query its state with empty data
    Verify { reference: u8, pin: &'a [u8] },

    /// CHANGE REFERENCE DATA: old PIN then new PIN, concatenated
    ChangeReferenceData { reference: u8, data: &'a [u8] },

    /// RESET RETRY COUNTER: unblock PW1 via reset code (mode 0x00) or
    /// admin verification (mode 0x02)
    ResetRetryCounter { mode: u8, data: &'a [u8] },

    /// GET DATA by tag
    GetData { tag: u16 },

    /// PUT DATA by tag
    PutData { tag: u16, data: &'a [u8] },

    /// GENERATE ASYMMETRIC KEY PAIR, read variant returns the public key
    /// for the CRT-addressed role
    GenerateKeyPair { read_only: bool, crt: &'a [u8] },

    /// PSO: COMPUTE DIGITAL SIGNATURE over a host-supplied digest
    ComputeSignature { digest: &'a [u8] },

    /// PSO: DECIPHER (first data byte is the padding indicator)
    Decipher { data: &'a [u8] },

    /// INTERNAL AUTHENTICATE over a host-supplied challenge
    InternalAuthenticate { challenge: &'a [u8] },

    /// GET CHALLENGE, random bytes of the requested length
    GetChallenge { len: usize },
}

impl<'a> CardCommand<'a> {
    /// Map a command APDU onto the card instruction set.
    ///
    /// The error is the status word to return.
    pub fn parse(apdu: &Command<'a>) -> Result<Self, StatusWord> {
        if apdu.cla != 0x00 {
            return Err(StatusWord::ClaNotSupported);
        }

        let ins =
            Instruction::try_from(apdu.ins).map_err(|_| StatusWord::InsNotSupported)?;

        let cmd = match ins {
            Instruction::Select => {
                // select by DF name only
                if apdu.p1 != 0x04 {
                    return Err(StatusWord::IncorrectP1P2);
                }
                CardCommand::Select { aid: apdu.data }
            }
            Instruction::Verify => {
                if apdu.p1 != 0x00 {
                    return Err(StatusWord::IncorrectP1P2);
                }
                CardCommand::Verify {
                    reference: apdu.p2,
                    pin: apdu.data,
                }
            }
            Instruction::ChangeReferenceData => {
                if apdu.p1 != 0x00 {
                    return Err(StatusWord::IncorrectP1P2);
                }
                CardCommand::ChangeReferenceData {
                    reference: apdu.p2,
                    data: apdu.data,
                }
            }
            Instruction::ResetRetryCounter => {
                if apdu.p2 != 0x81 {
                    return Err(StatusWord::IncorrectP1P2);
                }
                CardCommand::ResetRetryCounter {
                    mode: apdu.p1,
                    data: apdu.data,
                }
            }
            Instruction::GetData => CardCommand::GetData { tag: apdu.p1p2() },
            Instruction::PutData => CardCommand::PutData {
                tag: apdu.p1p2(),
                data: apdu.data,
            },
            Instruction::GenerateAsymmetricKeyPair => {
                let read_only = match apdu.p1 {
                    0x80 => false,
                    0x81 => true,
                    _ => return Err(StatusWord::IncorrectP1P2),
                };
                CardCommand::GenerateKeyPair {
                    read_only,
                    crt: apdu.data,
                }
            }
            Instruction::PerformSecurityOperation => match apdu.p1p2() {
                0x9E9A => CardCommand::ComputeSignature { digest: apdu.data },
                0x8086 => CardCommand::Decipher { data: apdu.data },
                _ => return Err(StatusWord::IncorrectP1P2),
            },
            Instruction::InternalAuthenticate => CardCommand::InternalAuthenticate {
                challenge: apdu.data,
            },
            Instruction::GetChallenge => {
                let le = apdu.le.ok_or(StatusWord::WrongLength)?;
                CardCommand::GetChallenge {
                    len: (le as usize).min(MAX_CHALLENGE_LEN),
                }
            }
        };

        Ok(cmd)
    }
}

/// OpenPGP card engine over a [`KeyStore`].
///
/// State is owned exclusively here and mutated only through
/// [`CardEngine::handle`] and [`CardEngine::reset`].
pub struct CardEngine<S: KeyStore, RNG: CryptoRngCore = OsRng> {
    store: S,
    rng: RNG,

    initialized: bool,
    selected: bool,

    security: SecurityStatus,
    tries: TryCounters,
    data: DataObjects,

    serial: [u8; SERIAL_LEN],
}

impl<S: KeyStore> CardEngine<S> {
    /// Create a card engine with the default [OsRng].
    ///
    /// The serial is derived from the second half of the hardware unique
    /// id. A missing profile leaves the engine unprovisioned; every
    /// command then fails with conditions-not-satisfied.
    pub fn new(store: S, unique_id: [u8; 8], profile: Option<&CardProfile>) -> Self {
        Self::new_with_rng(store, unique_id, profile, OsRng {})
    }
}

impl<S: KeyStore, RNG: CryptoRngCore> CardEngine<S, RNG> {
    /// Create a card engine with the provided RNG
    pub fn new_with_rng(
        store: S,
        unique_id: [u8; 8],
        profile: Option<&CardProfile>,
        rng: RNG,
    ) -> Self {
        let mut serial = [0u8; SERIAL_LEN];
        serial.copy_from_slice(&unique_id[4..8]);

        let (data, initialized) = match profile.map(DataObjects::new) {
            Some(Ok(d)) => (d, true),
            Some(Err(_e)) => {
                #[cfg(feature = "log")]
                log::warn!("card profile invalid, card disabled: {:?}", _e);
                (DataObjects::default(), false)
            }
            None => {
                #[cfg(feature = "log")]
                log::warn!("no card profile provisioned, card disabled");
                (DataObjects::default(), false)
            }
        };

        Self {
            store,
            rng,
            initialized,
            selected: false,
            security: SecurityStatus::empty(),
            tries: TryCounters::new(),
            data,
            serial,
        }
    }

    /// Card serial number
    pub fn serial(&self) -> [u8; SERIAL_LEN] {
        self.serial
    }

    /// Clear volatile security state (card reset / power cycle).
    ///
    /// Try counters and stored data objects survive.
    pub fn reset(&mut self) {
        self.security = SecurityStatus::empty();
        self.selected = false;
    }

    /// Execute one command APDU
    pub fn handle(&mut self, apdu: &Command) -> Response {
        if !self.initialized {
            return Response::status(StatusWord::ConditionsNotSatisfied);
        }

        let cmd = match CardCommand::parse(apdu) {
            Ok(c) => c,
            Err(sw) => {
                #[cfg(feature = "log")]
                log::warn!("rejected apdu ins 0x{:02x}: {:?}", apdu.ins, sw);
                return Response::status(sw);
            }
        };

        #[cfg(feature = "log")]
        log::debug!("card command: {}", cmd);

        // only SELECT is valid before the application is selected
        if !self.selected && !matches!(cmd, CardCommand::Select { .. }) {
            return Response::status(StatusWord::ConditionsNotSatisfied);
        }

        match cmd {
            CardCommand::Select { aid } => self.select(aid),
            CardCommand::Verify { reference, pin } => self.verify(reference, pin),
            CardCommand::ChangeReferenceData { reference, data } => {
                self.change_reference_data(reference, data)
            }
            CardCommand::ResetRetryCounter { mode, data } => {
                self.reset_retry_counter(mode, data)
            }
            CardCommand::GetData { tag } => self.get_data(tag),
            CardCommand::PutData { tag, data } => self.put_data(tag, data),
            CardCommand::GenerateKeyPair { read_only, crt } => {
                self.generate_key_pair(read_only, crt)
            }
            CardCommand::ComputeSignature { digest } => self.compute_signature(digest),
            CardCommand::Decipher { data } => self.decipher(data),
            CardCommand::InternalAuthenticate { challenge } => {
                self.internal_authenticate(challenge)
            }
            CardCommand::GetChallenge { len } => self.get_challenge(len),
        }
    }

    /// Full 16-byte AID: prefix, version, manufacturer, serial, RFU
    fn full_aid(&self) -> [u8; 16] {
        let mut aid = [0u8; 16];
        aid[..6].copy_from_slice(&AID_PREFIX);
        aid[6..8].copy_from_slice(&AID_VERSION);
        aid[8..10].copy_from_slice(&AID_MANUFACTURER);
        aid[10..14].copy_from_slice(&self.serial);
        aid
    }

    fn select(&mut self, aid: &[u8]) -> Response {
        // the host selects by the 6-byte prefix or the full AID
        if aid != AID_PREFIX && aid != self.full_aid() {
            return Response::status(StatusWord::FileNotFound);
        }

        // security status is not affected by re-selection
        self.selected = true;

        Response::ok()
    }

    /// Reference byte to (stored PIN, security bits granted)
    fn pin_target(reference: u8) -> Option<(PinRef, SecurityStatus)> {
        match reference {
            0x81 => Some((PinRef::User, SecurityStatus::SIGN)),
            0x82 => Some((PinRef::User, SecurityStatus::USER)),
            0x83 => Some((PinRef::Admin, SecurityStatus::ADMIN)),
            _ => None,
        }
    }

    fn verify(&mut self, reference: u8, pin: &[u8]) -> Response {
        let (pin_ref, bit) = match Self::pin_target(reference) {
            Some(t) => t,
            None => return Response::status(StatusWord::IncorrectP1P2),
        };

        // empty data queries the verification state
        if pin.is_empty() {
            let sw = if self.tries.blocked(pin_ref) {
                StatusWord::AuthenticationBlocked
            } else if self.security.contains(bit) {
                StatusWord::Success
            } else {
                StatusWord::RemainingTries(self.tries.remaining(pin_ref))
            };
            return Response::status(sw);
        }

        // a blocked reference fails regardless of the submitted PIN
        if self.tries.blocked(pin_ref) {
            return Response::status(StatusWord::AuthenticationBlocked);
        }

        if self.store.verify_pin(pin_ref, pin) {
            self.tries.reset(pin_ref);
            self.security.insert(bit);
            Response::ok()
        } else {
            self.security.remove(bit);
            let left = self.tries.decrement(pin_ref);

            #[cfg(feature = "log")]
            log::warn!("{} verification failed, {} tries left", pin_ref, left);

            Response::status(StatusWord::RemainingTries(left))
        }
    }

    fn change_reference_data(&mut self, reference: u8, data: &[u8]) -> Response {
        let (pin_ref, min_len, bits) = match reference {
            0x81 => (
                PinRef::User,
                MIN_USER_PIN_LEN,
                SecurityStatus::SIGN | SecurityStatus::USER,
            ),
            0x83 => (PinRef::Admin, MIN_ADMIN_PIN_LEN, SecurityStatus::ADMIN),
            _ => return Response::status(StatusWord::IncorrectP1P2),
        };

        if self.tries.blocked(pin_ref) {
            return Response::status(StatusWord::AuthenticationBlocked);
        }

        // old and new PIN are concatenated; the stored length splits them
        let old_len = match self.store.pin_length(pin_ref) {
            Ok(l) => l,
            Err(e) => return Response::status(store_error_sw(e)),
        };
        if data.len() <= old_len {
            return Response::status(StatusWord::WrongLength);
        }

        let (old, new) = data.split_at(old_len);
        if new.len() < min_len || new.len() > MAX_PIN_LEN {
            return Response::status(StatusWord::WrongLength);
        }

        if !self.store.verify_pin(pin_ref, old) {
            self.security.remove(bits);
            let left = self.tries.decrement(pin_ref);
            return Response::status(StatusWord::RemainingTries(left));
        }

        if let Err(e) = self.store.set_pin(pin_ref, new) {
            return Response::status(store_error_sw(e));
        }

        // a changed PIN must be re-verified
        self.tries.reset(pin_ref);
        self.security.remove(bits);

        Response::ok()
    }

    fn reset_retry_counter(&mut self, mode: u8, data: &[u8]) -> Response {
        let new = match mode {
            // reset code then new PW1
            0x00 => {
                if self.tries.blocked(PinRef::ResetCode) {
                    return Response::status(StatusWord::AuthenticationBlocked);
                }

                let rc_len = match self.store.pin_length(PinRef::ResetCode) {
                    Ok(l) => l,
                    Err(e) => return Response::status(store_error_sw(e)),
                };
                if data.len() <= rc_len {
                    return Response::status(StatusWord::WrongLength);
                }

                let (code, new) = data.split_at(rc_len);
                if !self.store.verify_pin(PinRef::ResetCode, code) {
                    let left = self.tries.decrement(PinRef::ResetCode);
                    return Response::status(StatusWord::RemainingTries(left));
                }
                self.tries.reset(PinRef::ResetCode);

                new
            }
            // new PW1 after admin verification
            0x02 => {
                if !self.security.contains(SecurityStatus::ADMIN) {
                    return Response::status(StatusWord::SecurityStatusNotSatisfied);
                }
                data
            }
            _ => return Response::status(StatusWord::IncorrectP1P2),
        };

        if new.len() < MIN_USER_PIN_LEN || new.len() > MAX_PIN_LEN {
            return Response::status(StatusWord::WrongLength);
        }

        if let Err(e) = self.store.set_pin(PinRef::User, new) {
            return Response::status(store_error_sw(e));
        }

        self.tries.reset(PinRef::User);
        self.security
            .remove(SecurityStatus::SIGN | SecurityStatus::USER);

        Response::ok()
    }

    /// PW status bytes (DO 0xC4): PW1 validity, max lengths, try counters
    fn pw_status(&self) -> [u8; 7] {
        [
            // PW1 remains valid for several PSO:CDS commands
            0x01,
            MAX_PIN_LEN as u8,
            MAX_PIN_LEN as u8,
            MAX_PIN_LEN as u8,
            self.tries.remaining(PinRef::User),
            self.tries.remaining(PinRef::ResetCode),
            self.tries.remaining(PinRef::Admin),
        ]
    }

    /// Fingerprints DO (0xC5): 20 bytes per slot, zeros when absent
    fn fingerprints(&self) -> [u8; 60] {
        let mut out = [0u8; 60];
        for (i, role) in [KeyRole::Sign, KeyRole::Decrypt, KeyRole::Auth]
            .iter()
            .enumerate()
        {
            if let Ok(meta) = self.store.key_metadata(*role) {
                out[i * 20..(i + 1) * 20].copy_from_slice(&meta.fingerprint);
            }
        }
        out
    }

    /// Generation times DO (0xCD): big-endian u32 per slot, zeros when absent
    fn generation_times(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        for (i, role) in [KeyRole::Sign, KeyRole::Decrypt, KeyRole::Auth]
            .iter()
            .enumerate()
        {
            if let Ok(meta) = self.store.key_metadata(*role) {
                out[i * 4..(i + 1) * 4].copy_from_slice(&meta.created_at.to_be_bytes());
            }
        }
        out
    }

    fn get_data(&mut self, t: u16) -> Response {
        let mut out = Vec::<u8, RESPONSE_LEN>::new();

        let r = match t {
            tag::AID => out.extend_from_slice(&self.full_aid()).map_err(|_| ()),
            tag::PW_STATUS => out.extend_from_slice(&self.pw_status()).map_err(|_| ()),
            tag::FINGERPRINTS => out.extend_from_slice(&self.fingerprints()).map_err(|_| ()),
            tag::GENERATION_TIMES => {
                out.extend_from_slice(&self.generation_times()).map_err(|_| ())
            }
            tag::CARDHOLDER => self.cardholder_data(&mut out),
            tag::APPLICATION => self.application_data(&mut out),
            _ => match self.data.get(t) {
                Some(v) => out.extend_from_slice(v).map_err(|_| ()),
                None => return Response::status(StatusWord::ReferencedDataNotFound),
            },
        };

        match r {
            Ok(()) => Response::success(out),
            Err(()) => Response::status(StatusWord::WrongLength),
        }
    }

    /// Cardholder related data (DO 0x65): name, language, sex
    fn cardholder_data(&self, out: &mut Vec<u8, RESPONSE_LEN>) -> Result<(), ()> {
        for t in [tag::NAME, tag::LANGUAGE, tag::SEX] {
            if let Some(v) = self.data.get(t) {
                push_tlv(out, t, v)?;
            }
        }
        Ok(())
    }

    /// Application related data (DO 0x6E): AID, PW status, key metadata
    fn application_data(&self, out: &mut Vec<u8, RESPONSE_LEN>) -> Result<(), ()> {
        push_tlv(out, tag::AID, &self.full_aid())?;
        push_tlv(out, tag::PW_STATUS, &self.pw_status())?;
        push_tlv(out, tag::FINGERPRINTS, &self.fingerprints())?;
        push_tlv(out, tag::GENERATION_TIMES, &self.generation_times())
    }

    fn put_data(&mut self, tag: u16, data: &[u8]) -> Response {
        if !self.security.contains(SecurityStatus::ADMIN) {
            return Response::status(StatusWord::SecurityStatusNotSatisfied);
        }

        match self.data.put(tag, data) {
            Ok(()) => Response::ok(),
            Err(PutError::UnknownTag) => {
                Response::status(StatusWord::ReferencedDataNotFound)
            }
            Err(PutError::InvalidLength) => Response::status(StatusWord::WrongLength),
        }
    }

    fn generate_key_pair(&mut self, read_only: bool, crt: &[u8]) -> Response {
        // keys are provisioned at build time, on-card generation is not
        // offered
        if !read_only {
            return Response::status(StatusWord::ConditionsNotSatisfied);
        }

        let role = match crt.first() {
            Some(&CRT_SIGN) => KeyRole::Sign,
            Some(&CRT_DECRYPT) => KeyRole::Decrypt,
            Some(&CRT_AUTH) => KeyRole::Auth,
            _ => return Response::status(StatusWord::WrongData),
        };

        let pk = match self.store.public_key(role) {
            Ok(pk) => pk,
            Err(e) => return Response::status(store_error_sw(e)),
        };

        // public key wrapped in a 0x7F49 template, external point in 0x86
        let mut inner = Vec::<u8, RESPONSE_LEN>::new();
        let mut out = Vec::<u8, RESPONSE_LEN>::new();
        let r = push_tlv(&mut inner, 0x86, &pk)
            .and_then(|_| push_tlv(&mut out, tag::PUBLIC_KEY, &inner));

        match r {
            Ok(()) => Response::success(out),
            Err(()) => Response::status(StatusWord::WrongLength),
        }
    }

    fn compute_signature(&mut self, digest: &[u8]) -> Response {
        if !self.security.contains(SecurityStatus::SIGN) {
            return Response::status(StatusWord::SecurityStatusNotSatisfied);
        }
        if digest.is_empty() {
            return Response::status(StatusWord::WrongLength);
        }

        // PW1 stays valid for further signatures per PW status byte 1
        match self.store.sign(KeyRole::Sign, digest) {
            Ok(sig) => match Vec::from_slice(&sig) {
                Ok(v) => Response::success(v),
                Err(()) => Response::status(StatusWord::WrongLength),
            },
            Err(e) => Response::status(store_error_sw(e)),
        }
    }

    fn decipher(&mut self, data: &[u8]) -> Response {
        if !self.security.contains(SecurityStatus::USER) {
            return Response::status(StatusWord::SecurityStatusNotSatisfied);
        }
        // padding indicator byte, then ciphertext
        if data.len() < 2 {
            return Response::status(StatusWord::WrongLength);
        }

        match self.store.decrypt(KeyRole::Decrypt, &data[1..]) {
            Ok(pt) => match Vec::from_slice(&pt) {
                Ok(v) => Response::success(v),
                Err(()) => Response::status(StatusWord::WrongLength),
            },
            Err(e) => Response::status(store_error_sw(e)),
        }
    }

    fn internal_authenticate(&mut self, challenge: &[u8]) -> Response {
        if !self.security.contains(SecurityStatus::USER) {
            return Response::status(StatusWord::SecurityStatusNotSatisfied);
        }
        if challenge.is_empty() {
            return Response::status(StatusWord::WrongLength);
        }

        match self.store.sign(KeyRole::Auth, challenge) {
            Ok(sig) => match Vec::from_slice(&sig) {
                Ok(v) => Response::success(v),
                Err(()) => Response::status(StatusWord::WrongLength),
            },
            Err(e) => Response::status(store_error_sw(e)),
        }
    }

    fn get_challenge(&mut self, len: usize) -> Response {
        let mut out = Vec::<u8, RESPONSE_LEN>::new();
        if out.resize_default(len).is_err() {
            return Response::status(StatusWord::WrongLength);
        }

        self.rng.fill_bytes(&mut out);

        Response::success(out)
    }
}

/// Key store failures surface as referenced-data-not-found, never a crash
fn store_error_sw(_e: StoreError) -> StatusWord {
    #[cfg(feature = "log")]
    log::warn!("key store error: {:?}", _e);

    StatusWord::ReferencedDataNotFound
}
