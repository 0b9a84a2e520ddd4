//! ISO 7816-4 APDU command / response codec.
//!
//! Commands borrow their data field from the inbound frame. Both short and
//! extended Lc/Le encodings are supported and round-trip through
//! [`Command::encode`] / [`Command::parse`].

use byteorder::{BigEndian, ByteOrder};
use heapless::Vec;
use num_enum::TryFromPrimitive;
use zeroize::Zeroize;

use crate::Error;

/// APDU header length (CLA INS P1 P2)
pub const HEADER_LEN: usize = 4;

/// Maximum response payload carried by a single APDU exchange.
///
/// Sized for the largest stored data object (cardholder certificate) plus
/// template overhead.
pub const RESPONSE_LEN: usize = 1280;

/// ISO 7816-4 / OpenPGP card instruction bytes handled by the card engine
#[derive(Copy, Clone, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Instruction {
    /// VERIFY a PIN reference
    Verify = 0x20,

    /// CHANGE REFERENCE DATA (replace a PIN)
    ChangeReferenceData = 0x24,

    /// PERFORM SECURITY OPERATION (CDS / DECIPHER by P1-P2)
    PerformSecurityOperation = 0x2A,

    /// RESET RETRY COUNTER (unblock PW1)
    ResetRetryCounter = 0x2C,

    /// GENERATE ASYMMETRIC KEY PAIR / read public key
    GenerateAsymmetricKeyPair = 0x47,

    /// GET CHALLENGE (random bytes)
    GetChallenge = 0x84,

    /// INTERNAL AUTHENTICATE
    InternalAuthenticate = 0x88,

    /// SELECT application by AID
    Select = 0xA4,

    /// GET DATA by tag
    GetData = 0xCA,

    /// PUT DATA by tag
    PutData = 0xDA,
}

/// Status words returned by the card and U2F engines.
///
/// Handlers select from this fixed catalog; no other SW values are ever
/// put on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StatusWord {
    /// Command completed (0x9000)
    Success,

    /// Verification failed, N attempts remaining (0x63CN)
    RemainingTries(u8),

    /// Length fields inconsistent with payload (0x6700)
    WrongLength,

    /// Required PIN not verified (0x6982)
    SecurityStatusNotSatisfied,

    /// PIN reference blocked by exhausted try counter (0x6983)
    AuthenticationBlocked,

    /// Conditions of use not satisfied (0x6985)
    ConditionsNotSatisfied,

    /// Parameters in the data field incorrect (0x6A80)
    WrongData,

    /// Application / file not found (0x6A82)
    FileNotFound,

    /// Incorrect P1-P2 parameters (0x6A86)
    IncorrectP1P2,

    /// Referenced data (key, data object) not found (0x6A88)
    ReferencedDataNotFound,

    /// Instruction not supported (0x6D00)
    InsNotSupported,

    /// Class not supported (0x6E00)
    ClaNotSupported,
}

impl StatusWord {
    /// Encode to the two-byte SW1-SW2 value
    pub const fn to_u16(self) -> u16 {
        match self {
            StatusWord::Success => 0x9000,
            StatusWord::RemainingTries(n) => 0x63C0 | (n & 0x0F) as u16,
            StatusWord::WrongLength => 0x6700,
            StatusWord::SecurityStatusNotSatisfied => 0x6982,
            StatusWord::AuthenticationBlocked => 0x6983,
            StatusWord::ConditionsNotSatisfied => 0x6985,
            StatusWord::WrongData => 0x6A80,
            StatusWord::FileNotFound => 0x6A82,
            StatusWord::IncorrectP1P2 => 0x6A86,
            StatusWord::ReferencedDataNotFound => 0x6A88,
            StatusWord::InsNotSupported => 0x6D00,
            StatusWord::ClaNotSupported => 0x6E00,
        }
    }

    /// Decode from a two-byte SW1-SW2 value, `None` for values outside the
    /// catalog
    pub fn from_u16(sw: u16) -> Option<Self> {
        let s = match sw {
            0x9000 => StatusWord::Success,
            0x63C0..=0x63CF => StatusWord::RemainingTries((sw & 0x0F) as u8),
            0x6700 => StatusWord::WrongLength,
            0x6982 => StatusWord::SecurityStatusNotSatisfied,
            0x6983 => StatusWord::AuthenticationBlocked,
            0x6985 => StatusWord::ConditionsNotSatisfied,
            0x6A80 => StatusWord::WrongData,
            0x6A82 => StatusWord::FileNotFound,
            0x6A86 => StatusWord::IncorrectP1P2,
            0x6A88 => StatusWord::ReferencedDataNotFound,
            0x6D00 => StatusWord::InsNotSupported,
            0x6E00 => StatusWord::ClaNotSupported,
            _ => return None,
        };
        Some(s)
    }
}

impl From<StatusWord> for u16 {
    fn from(sw: StatusWord) -> u16 {
        sw.to_u16()
    }
}

/// A parsed command APDU.
///
/// The data field borrows from the inbound frame; `le` is `None` when the
/// command carries no expected-length field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Command<'a> {
    /// Class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data, bounded by Lc
    pub data: &'a [u8],
    /// Expected response length (0x00 short form = 256, 0x0000 extended = 65536)
    pub le: Option<u32>,
}

impl<'a> Command<'a> {
    /// Create a header-only command (case 1)
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: &[],
            le: None,
        }
    }

    /// P1-P2 combined, used for PSO and GET/PUT DATA tag addressing
    pub fn p1p2(&self) -> u16 {
        ((self.p1 as u16) << 8) | self.p2 as u16
    }

    /// Parse a raw command APDU.
    ///
    /// Fails with [`Error::InvalidLength`] when the Lc/Le fields are
    /// inconsistent with the actual frame size; the card engine maps this
    /// to SW 0x6700.
    pub fn parse(frame: &'a [u8]) -> Result<Self, Error> {
        if frame.len() < HEADER_LEN {
            return Err(Error::InvalidLength);
        }

        let (cla, ins, p1, p2) = (frame[0], frame[1], frame[2], frame[3]);
        let body = &frame[HEADER_LEN..];

        // Case 1: header only
        if body.is_empty() {
            return Ok(Command::new(cla, ins, p1, p2));
        }

        let b0 = body[0];

        // Case 2 short: single Le byte, 0x00 encodes 256
        if body.len() == 1 {
            let le = if b0 == 0 { 0x100 } else { b0 as u32 };
            return Ok(Command {
                cla,
                ins,
                p1,
                p2,
                data: &[],
                le: Some(le),
            });
        }

        if b0 != 0 {
            let lc = b0 as usize;

            // Case 3 short: Lc covers the rest of the body
            if body.len() == 1 + lc {
                return Ok(Command {
                    cla,
                    ins,
                    p1,
                    p2,
                    data: &body[1..],
                    le: None,
                });
            }

            // Case 4 short: one trailing Le byte
            if body.len() == 2 + lc {
                let last = body[body.len() - 1];
                let le = if last == 0 { 0x100 } else { last as u32 };
                return Ok(Command {
                    cla,
                    ins,
                    p1,
                    p2,
                    data: &body[1..body.len() - 1],
                    le: Some(le),
                });
            }

            return Err(Error::InvalidLength);
        }

        // Extended form, marked by a leading zero byte
        if body.len() < 3 {
            return Err(Error::InvalidLength);
        }

        // Case 2 extended: no data, two-byte Le (0x0000 encodes 65536)
        if body.len() == 3 {
            let w = BigEndian::read_u16(&body[1..3]) as u32;
            let le = if w == 0 { 0x10000 } else { w };
            return Ok(Command {
                cla,
                ins,
                p1,
                p2,
                data: &[],
                le: Some(le),
            });
        }

        let lc = BigEndian::read_u16(&body[1..3]) as usize;

        // Case 3 extended: Lc + data
        if body.len() == 3 + lc {
            return Ok(Command {
                cla,
                ins,
                p1,
                p2,
                data: &body[3..],
                le: None,
            });
        }

        // Case 4 extended: Lc + data + two-byte Le
        if body.len() == 3 + lc + 2 {
            let w = BigEndian::read_u16(&body[body.len() - 2..]) as u32;
            let le = if w == 0 { 0x10000 } else { w };
            return Ok(Command {
                cla,
                ins,
                p1,
                p2,
                data: &body[3..body.len() - 2],
                le: Some(le),
            });
        }

        Err(Error::InvalidLength)
    }

    /// Encode a command APDU, selecting the short form when Lc and Le both
    /// fit and the extended form otherwise
    pub fn encode(&self, buff: &mut [u8]) -> Result<usize, Error> {
        if self.data.len() > 0xFFFF {
            return Err(Error::InvalidEncoding);
        }
        if let Some(le) = self.le {
            if le == 0 || le > 0x10000 {
                return Err(Error::InvalidEncoding);
            }
        }

        let short = self.data.len() <= 0xFF && self.le.map_or(true, |le| le <= 0x100);

        let mut n = HEADER_LEN;
        if buff.len() < n {
            return Err(Error::InvalidLength);
        }
        buff[0] = self.cla;
        buff[1] = self.ins;
        buff[2] = self.p1;
        buff[3] = self.p2;

        if short {
            if !self.data.is_empty() {
                if buff.len() < n + 1 + self.data.len() {
                    return Err(Error::InvalidLength);
                }
                buff[n] = self.data.len() as u8;
                buff[n + 1..n + 1 + self.data.len()].copy_from_slice(self.data);
                n += 1 + self.data.len();
            }
            if let Some(le) = self.le {
                if buff.len() < n + 1 {
                    return Err(Error::InvalidLength);
                }
                buff[n] = if le == 0x100 { 0 } else { le as u8 };
                n += 1;
            }
        } else {
            if buff.len() < n + 1 {
                return Err(Error::InvalidLength);
            }
            buff[n] = 0x00;
            n += 1;

            if !self.data.is_empty() {
                if buff.len() < n + 2 + self.data.len() {
                    return Err(Error::InvalidLength);
                }
                BigEndian::write_u16(&mut buff[n..n + 2], self.data.len() as u16);
                buff[n + 2..n + 2 + self.data.len()].copy_from_slice(self.data);
                n += 2 + self.data.len();
            }
            if let Some(le) = self.le {
                if buff.len() < n + 2 {
                    return Err(Error::InvalidLength);
                }
                let w = if le == 0x10000 { 0 } else { le as u16 };
                BigEndian::write_u16(&mut buff[n..n + 2], w);
                n += 2;
            }
        }

        Ok(n)
    }
}

/// A response APDU: payload plus status word
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// Response payload, possibly empty
    pub data: Vec<u8, RESPONSE_LEN>,
    /// Trailing status word
    pub sw: StatusWord,
}

impl Response {
    /// Status-only response with empty payload
    pub fn status(sw: StatusWord) -> Self {
        Self {
            data: Vec::new(),
            sw,
        }
    }

    /// Success with empty payload
    pub fn ok() -> Self {
        Self::status(StatusWord::Success)
    }

    /// Success carrying a payload
    pub fn success(data: Vec<u8, RESPONSE_LEN>) -> Self {
        Self {
            data,
            sw: StatusWord::Success,
        }
    }

    /// Encode payload followed by SW1-SW2
    pub fn encode(&self, buff: &mut [u8]) -> Result<usize, Error> {
        let n = self.data.len() + 2;
        if buff.len() < n {
            return Err(Error::InvalidLength);
        }

        buff[..self.data.len()].copy_from_slice(&self.data);
        BigEndian::write_u16(&mut buff[self.data.len()..n], self.sw.to_u16());

        Ok(n)
    }

    /// Parse a response APDU (host / test side)
    pub fn parse(frame: &[u8]) -> Result<Self, Error> {
        if frame.len() < 2 {
            return Err(Error::InvalidLength);
        }

        let sw = BigEndian::read_u16(&frame[frame.len() - 2..]);
        let sw = StatusWord::from_u16(sw).ok_or(Error::InvalidEncoding)?;
        let data =
            Vec::from_slice(&frame[..frame.len() - 2]).map_err(|_| Error::InvalidLength)?;

        Ok(Self { data, sw })
    }
}

impl Zeroize for Response {
    fn zeroize(&mut self) {
        self.data[..].zeroize();
        self.data.clear();
    }
}
