//! Wire formats for the openkey USB token.
//!
//! This crate carries no protocol state, only encode/decode for the three
//! wire surfaces the token speaks:
//!
//! - [apdu]: ISO 7816-4 command / response APDUs (short and extended
//!   length forms) and the OpenPGP card status word catalog
//! - [ccid]: USB CCID bulk message framing for a single-slot reader
//! - [u2f]: U2F (CTAP1) raw message formats
//!
//! Commands borrow their payloads from the inbound frame; responses use
//! fixed-capacity [heapless] buffers so the crate stays `no_std` / no-alloc.

#![no_std]

pub mod apdu;
pub mod ccid;
pub mod u2f;

mod helpers;

/// Wire encode / decode errors.
///
/// Protocol-visible failures (wrong length fields, unknown instructions)
/// are reported to the host through status words or CCID error codes by the
/// engines; this type covers buffer-level failures only.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Error {
    /// Buffer too short for the encoding, or length fields inconsistent
    /// with the actual payload size
    InvalidLength,

    /// Field value outside the encodable range
    InvalidEncoding,
}

impl From<encdec::Error> for Error {
    fn from(e: encdec::Error) -> Self {
        match e {
            encdec::Error::Length => Error::InvalidLength,
            _ => Error::InvalidEncoding,
        }
    }
}
