//! USB CCID bulk-out / bulk-in message framing.
//!
//! Single-slot reader subset: power on/off, slot status and APDU transfer.
//! All CCID multi-byte fields are little-endian. Command frames echo the
//! host's slot and sequence numbers back in the response header.

use encdec::{Decode, Encode};
use num_enum::TryFromPrimitive;
use strum::Display;

use crate::helpers::arr;
use crate::Error;

/// CCID bulk message header length
pub const HEADER_LEN: usize = 10;

/// Maximum bulk frame: header plus the largest response APDU
pub const FRAME_LEN: usize = HEADER_LEN + crate::apdu::RESPONSE_LEN + 2;

/// Answer To Reset returned on IccPowerOn. Minimal T=1 ATR: TS direct
/// convention, TD1 present, protocol T=1, TCK checksum.
pub const ATR: [u8; 4] = [0x3B, 0x80, 0x01, 0x81];

/// bmICCStatus / bmCommandStatus values for the slot status param byte
pub mod status {
    /// ICC present and active, command succeeded
    pub const ICC_PRESENT_ACTIVE: u8 = 0x00;

    /// Command failed, error code in bError
    pub const CMD_FAILED: u8 = 0x40;
}

/// bError codes reported with [`status::CMD_FAILED`]
pub mod error {
    /// Command not supported by this reader
    pub const CMD_NOT_SUPPORTED: u8 = 0x00;

    /// Addressed slot does not exist
    pub const SLOT_NOT_EXIST: u8 = 0x05;

    /// Card did not answer
    pub const ICC_MUTE: u8 = 0xFE;
}

/// CCID bulk message types handled by the reader
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, TryFromPrimitive)]
#[repr(u8)]
pub enum MessageType {
    /// Host requests card power on, reader answers with a DataBlock
    /// carrying the ATR
    IccPowerOn = 0x62,

    /// Host requests card power off, reader answers with a SlotStatus
    IccPowerOff = 0x63,

    /// Host polls slot status
    GetSlotStatus = 0x65,

    /// Host transfers a command APDU, reader answers with a DataBlock
    /// carrying the response APDU
    XfrBlock = 0x6F,

    /// Reader to host data block
    DataBlock = 0x80,

    /// Reader to host slot status
    SlotStatus = 0x81,
}

/// Ten-byte CCID bulk message header.
///
/// The three trailing param bytes are message-specific; for reader to host
/// messages they carry bmICCStatus/bmCommandStatus, bError and a level
/// parameter.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Encode, Decode)]
#[encdec(error = "Error")]
pub struct Header {
    /// bMessageType
    pub message_type: u8,

    /// dwLength, payload bytes following the header
    pub length: u32,

    /// bSlot
    pub slot: u8,

    /// bSeq, echoed in the response
    pub seq: u8,

    /// Message-specific parameter bytes
    #[encdec(with = "arr")]
    pub params: [u8; 3],
}

impl Header {
    /// Header for a reader to host message answering `cmd`, echoing its
    /// slot and sequence
    pub fn reply(
        message_type: MessageType,
        cmd: &Header,
        length: u32,
        status: u8,
        err: u8,
    ) -> Self {
        Self {
            message_type: message_type as u8,
            length,
            slot: cmd.slot,
            seq: cmd.seq,
            params: [status, err, 0x00],
        }
    }
}

/// A host to reader bulk frame: header plus `dwLength` payload bytes
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CommandFrame<'a> {
    /// Decoded message header
    pub header: Header,

    /// Message payload (the command APDU for XfrBlock)
    pub data: &'a [u8],
}

impl<'a> CommandFrame<'a> {
    /// Parse a bulk-out frame, checking dwLength against the actual
    /// payload size
    pub fn parse(frame: &'a [u8]) -> Result<Self, Error> {
        let (header, n) = Header::decode(frame)?;

        let data = &frame[n..];
        if data.len() != header.length as usize {
            return Err(Error::InvalidLength);
        }

        Ok(Self { header, data })
    }
}
