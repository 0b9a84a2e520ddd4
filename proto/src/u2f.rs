//! U2F (CTAP1) raw message formats.
//!
//! U2F requests arrive as ISO 7816-4 extended APDUs; this module parses
//! them into typed requests and defines the response layout constants.
//! Parse failures map directly to the status word the token must return.

use num_enum::TryFromPrimitive;
use strum::Display;

use crate::apdu::{Command, StatusWord};

/// U2F_REGISTER instruction byte
pub const INS_REGISTER: u8 = 0x01;

/// U2F_AUTHENTICATE instruction byte
pub const INS_AUTHENTICATE: u8 = 0x02;

/// U2F_VERSION instruction byte
pub const INS_VERSION: u8 = 0x03;

/// Version string returned by U2F_VERSION
pub const VERSION_STRING: &[u8] = b"U2F_V2";

/// Challenge and application parameter length
pub const PARAM_LEN: usize = 32;

/// Reserved first byte of a registration response
pub const REGISTER_ID: u8 = 0x05;

/// Reserved first byte of the registration signature base
pub const REGISTER_SIGN_RFU: u8 = 0x00;

/// User presence bit in the authentication response flags byte
pub const AUTH_FLAG_UP: u8 = 0x01;

/// Uncompressed P-256 public key length (0x04 prefix plus X and Y)
pub const PUBLIC_KEY_LEN: usize = 65;

/// U2F_AUTHENTICATE control byte (P1)
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, TryFromPrimitive)]
#[repr(u8)]
pub enum Control {
    /// Check whether the key handle was created by this token, never sign
    CheckOnly = 0x07,

    /// Require user presence and sign
    EnforceUpAndSign = 0x03,

    /// Sign without requiring user presence
    DontEnforceUpAndSign = 0x08,
}

/// A parsed U2F request
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Request<'a> {
    /// U2F_REGISTER: enroll the token against an application
    Register {
        /// Client data hash
        challenge: &'a [u8; PARAM_LEN],
        /// Application parameter (origin hash)
        application: &'a [u8; PARAM_LEN],
    },

    /// U2F_AUTHENTICATE: prove possession of a registered key handle
    Authenticate {
        /// Requested mode
        control: Control,
        /// Client data hash
        challenge: &'a [u8; PARAM_LEN],
        /// Application parameter (origin hash)
        application: &'a [u8; PARAM_LEN],
        /// Opaque key handle issued at registration
        key_handle: &'a [u8],
    },

    /// U2F_VERSION: report the protocol version string
    Version,
}

impl<'a> Request<'a> {
    /// Parse a raw U2F message.
    ///
    /// The error is the status word to return to the host.
    pub fn parse(frame: &'a [u8]) -> Result<Self, StatusWord> {
        let apdu = Command::parse(frame).map_err(|_| StatusWord::WrongLength)?;

        if apdu.cla != 0x00 {
            return Err(StatusWord::ClaNotSupported);
        }

        match apdu.ins {
            INS_REGISTER => {
                if apdu.data.len() != 2 * PARAM_LEN {
                    return Err(StatusWord::WrongLength);
                }

                Ok(Request::Register {
                    challenge: param(&apdu.data[..PARAM_LEN])?,
                    application: param(&apdu.data[PARAM_LEN..])?,
                })
            }
            INS_AUTHENTICATE => {
                let control =
                    Control::try_from(apdu.p1).map_err(|_| StatusWord::IncorrectP1P2)?;

                if apdu.data.len() < 2 * PARAM_LEN + 1 {
                    return Err(StatusWord::WrongLength);
                }

                let kh_len = apdu.data[2 * PARAM_LEN] as usize;
                if apdu.data.len() != 2 * PARAM_LEN + 1 + kh_len {
                    return Err(StatusWord::WrongLength);
                }

                Ok(Request::Authenticate {
                    control,
                    challenge: param(&apdu.data[..PARAM_LEN])?,
                    application: param(&apdu.data[PARAM_LEN..2 * PARAM_LEN])?,
                    key_handle: &apdu.data[2 * PARAM_LEN + 1..],
                })
            }
            INS_VERSION => {
                if !apdu.data.is_empty() {
                    return Err(StatusWord::WrongLength);
                }

                Ok(Request::Version)
            }
            _ => Err(StatusWord::InsNotSupported),
        }
    }
}

/// Reborrow a length-checked 32-byte slice as an array reference
fn param(s: &[u8]) -> Result<&[u8; PARAM_LEN], StatusWord> {
    s.try_into().map_err(|_| StatusWord::WrongLength)
}
