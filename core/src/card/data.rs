//! OpenPGP card data objects (DOs).
//!
//! Simple DOs are stored here with fixed-capacity buffers sized per the
//! OpenPGP card specification; constructed DOs (cardholder data,
//! application data, PW status) are assembled by the card engine from
//! these values and live state.

use heapless::Vec;
use static_assertions::const_assert;

use openkey_proto::apdu::RESPONSE_LEN;

use crate::store::StoreError;

/// DO tags served by GET DATA / accepted by PUT DATA
pub mod tag {
    /// Full application identifier
    pub const AID: u16 = 0x004F;
    /// Cardholder name
    pub const NAME: u16 = 0x005B;
    /// Login data
    pub const LOGIN: u16 = 0x005E;
    /// Cardholder related data (constructed)
    pub const CARDHOLDER: u16 = 0x0065;
    /// Application related data (constructed)
    pub const APPLICATION: u16 = 0x006E;
    /// Language preference
    pub const LANGUAGE: u16 = 0x5F2D;
    /// Sex (ISO 5218)
    pub const SEX: u16 = 0x5F35;
    /// Public key URL
    pub const URL: u16 = 0x5F50;
    /// Cardholder certificate
    pub const CERTIFICATE: u16 = 0x7F21;
    /// Public key template (GENERATE ASYMMETRIC KEY PAIR response)
    pub const PUBLIC_KEY: u16 = 0x7F49;
    /// PW status bytes (constructed)
    pub const PW_STATUS: u16 = 0x00C4;
    /// Key fingerprints, 20 bytes per slot
    pub const FINGERPRINTS: u16 = 0x00C5;
    /// Key generation timestamps, 4 bytes per slot
    pub const GENERATION_TIMES: u16 = 0x00CD;
}

pub const MAX_NAME_LEN: usize = 39;
pub const MAX_LANGUAGE_LEN: usize = 8;
pub const MAX_URL_LEN: usize = 254;
pub const MAX_LOGIN_LEN: usize = 254;
pub const MAX_CERT_LEN: usize = 1024;

// the largest DO must fit a single response APDU
const_assert!(MAX_CERT_LEN + 4 <= RESPONSE_LEN);

/// PUT DATA failures, mapped to status words by the engine
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PutError {
    /// Tag not stored on this card
    UnknownTag,
    /// Value exceeds the DO's capacity
    InvalidLength,
}

/// Identity fields seeded into the DO store at initialization
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct CardProfile<'a> {
    /// Cardholder name, `surname<<given` form
    pub name: &'a [u8],
    /// ISO 639 language codes
    pub language: &'a [u8],
    /// ISO 5218 sex byte
    pub sex: u8,
    /// Public key URL
    pub url: &'a [u8],
    /// Login data
    pub login: &'a [u8],
}

/// Mutable simple-DO store
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct DataObjects {
    name: Vec<u8, MAX_NAME_LEN>,
    language: Vec<u8, MAX_LANGUAGE_LEN>,
    sex: u8,
    url: Vec<u8, MAX_URL_LEN>,
    login: Vec<u8, MAX_LOGIN_LEN>,
    certificate: Vec<u8, MAX_CERT_LEN>,
}

impl DataObjects {
    /// Seed the store from a profile, truncating nothing: oversized
    /// profile fields are a provisioning error
    pub fn new(profile: &CardProfile) -> Result<Self, StoreError> {
        let mut d = Self {
            sex: profile.sex,
            ..Default::default()
        };

        for (tag, value) in [
            (tag::NAME, profile.name),
            (tag::LANGUAGE, profile.language),
            (tag::URL, profile.url),
            (tag::LOGIN, profile.login),
        ] {
            if !value.is_empty() {
                d.put(tag, value).map_err(|_| StoreError::PersistFailed)?;
            }
        }

        Ok(d)
    }

    /// Read a simple DO, `None` for tags not stored here
    pub fn get(&self, tag: u16) -> Option<&[u8]> {
        let v: &[u8] = match tag {
            tag::NAME => &self.name,
            tag::LANGUAGE => &self.language,
            tag::SEX => core::slice::from_ref(&self.sex),
            tag::URL => &self.url,
            tag::LOGIN => &self.login,
            tag::CERTIFICATE => &self.certificate,
            _ => return None,
        };
        Some(v)
    }

    /// Replace a simple DO.
    ///
    /// Access control is the engine's responsibility; on any error the
    /// stored value is unchanged.
    pub fn put(&mut self, tag: u16, value: &[u8]) -> Result<(), PutError> {
        match tag {
            tag::NAME => replace(&mut self.name, value),
            tag::LANGUAGE => replace(&mut self.language, value),
            tag::SEX => {
                if value.len() != 1 {
                    return Err(PutError::InvalidLength);
                }
                self.sex = value[0];
                Ok(())
            }
            tag::URL => replace(&mut self.url, value),
            tag::LOGIN => replace(&mut self.login, value),
            tag::CERTIFICATE => replace(&mut self.certificate, value),
            _ => Err(PutError::UnknownTag),
        }
    }
}

fn replace<const N: usize>(buff: &mut Vec<u8, N>, value: &[u8]) -> Result<(), PutError> {
    if value.len() > N {
        return Err(PutError::InvalidLength);
    }

    buff.clear();
    // length checked above
    let _ = buff.extend_from_slice(value);

    Ok(())
}

/// Append a BER-TLV entry: one or two tag bytes, definite length
/// (0x81 / 0x82 long forms), then the value
pub(crate) fn push_tlv<const N: usize>(
    buff: &mut Vec<u8, N>,
    tag: u16,
    value: &[u8],
) -> Result<(), ()> {
    if tag > 0xFF {
        buff.push((tag >> 8) as u8).map_err(|_| ())?;
    }
    buff.push(tag as u8).map_err(|_| ())?;

    match value.len() {
        l if l < 0x80 => buff.push(l as u8).map_err(|_| ())?,
        l if l <= 0xFF => {
            buff.push(0x81).map_err(|_| ())?;
            buff.push(l as u8).map_err(|_| ())?;
        }
        l => {
            buff.push(0x82).map_err(|_| ())?;
            buff.push((l >> 8) as u8).map_err(|_| ())?;
            buff.push(l as u8).map_err(|_| ())?;
        }
    }

    buff.extend_from_slice(value).map_err(|_| ())
}
