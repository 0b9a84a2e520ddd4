//! CCID transport: frames APDUs between the USB bulk endpoints and the
//! card engine.
//!
//! Implements the message set of a single-slot reader (slot 0). Every
//! reply echoes the slot and sequence number of its command; unsupported
//! message types answer with a failed SlotStatus instead of being dropped.

use encdec::Encode;
use zeroize::Zeroize;

use openkey_proto::apdu::{Command, Response, StatusWord};
use openkey_proto::ccid::{
    error, status, CommandFrame, Header, MessageType, ATR, HEADER_LEN,
};

use crate::card::CardEngine;
use crate::store::KeyStore;

/// CCID reader wrapping the OpenPGP [CardEngine]
pub struct CcidReader<S: KeyStore> {
    card: CardEngine<S>,
}

impl<S: KeyStore> CcidReader<S> {
    /// Create a reader around a card engine
    pub fn new(card: CardEngine<S>) -> Self {
        Self { card }
    }

    /// Access the wrapped card engine
    pub fn card(&mut self) -> &mut CardEngine<S> {
        &mut self.card
    }

    /// Process one bulk-out frame, writing the bulk-in reply to `out` and
    /// returning its length.
    ///
    /// A frame whose header cannot be decoded carries no sequence number
    /// to echo and is dropped (returns zero).
    pub fn handle(&mut self, frame: &[u8], out: &mut [u8]) -> usize {
        let cmd = match CommandFrame::parse(frame) {
            Ok(c) => c,
            Err(_e) => {
                #[cfg(feature = "log")]
                log::warn!("dropping undecodable ccid frame: {:?}", _e);
                return 0;
            }
        };

        // single slot reader
        if cmd.header.slot != 0 {
            return self.slot_status(
                &cmd.header,
                status::CMD_FAILED,
                error::SLOT_NOT_EXIST,
                out,
            );
        }

        let message_type = match MessageType::try_from(cmd.header.message_type) {
            Ok(t) => t,
            Err(_) => {
                #[cfg(feature = "log")]
                log::warn!(
                    "unsupported ccid message type 0x{:02x}",
                    cmd.header.message_type
                );
                return self.slot_status(
                    &cmd.header,
                    status::CMD_FAILED,
                    error::CMD_NOT_SUPPORTED,
                    out,
                );
            }
        };

        #[cfg(feature = "log")]
        log::debug!("ccid message: {} seq {}", message_type, cmd.header.seq);

        match message_type {
            MessageType::IccPowerOn => {
                self.card.reset();
                self.data_block(&cmd.header, &ATR, out)
            }
            MessageType::IccPowerOff => {
                self.card.reset();
                self.slot_status(&cmd.header, status::ICC_PRESENT_ACTIVE, 0x00, out)
            }
            MessageType::GetSlotStatus => {
                self.slot_status(&cmd.header, status::ICC_PRESENT_ACTIVE, 0x00, out)
            }
            MessageType::XfrBlock => self.xfr_block(&cmd, out),
            // reader-to-host types are never valid on bulk-out
            MessageType::DataBlock | MessageType::SlotStatus => self.slot_status(
                &cmd.header,
                status::CMD_FAILED,
                error::CMD_NOT_SUPPORTED,
                out,
            ),
        }
    }

    /// Run one APDU through the card engine and wrap the response.
    ///
    /// A malformed APDU still yields a DataBlock, carrying SW 0x6700.
    fn xfr_block(&mut self, cmd: &CommandFrame, out: &mut [u8]) -> usize {
        let mut response = match Command::parse(cmd.data) {
            Ok(apdu) => self.card.handle(&apdu),
            Err(_) => Response::status(StatusWord::WrongLength),
        };

        if out.len() < HEADER_LEN {
            return 0;
        }

        let n = match response.encode(&mut out[HEADER_LEN..]) {
            Ok(n) => n,
            Err(_e) => {
                #[cfg(feature = "log")]
                log::warn!("response encoding failed: {:?}", _e);
                response.zeroize();
                return self.slot_status(&cmd.header, status::CMD_FAILED, error::ICC_MUTE, out);
            }
        };

        // response may carry deciphered plaintext
        response.zeroize();

        self.reply(
            MessageType::DataBlock,
            &cmd.header,
            n as u32,
            status::ICC_PRESENT_ACTIVE,
            0x00,
            out,
        )
    }

    /// DataBlock reply with a copied payload (ATR delivery)
    fn data_block(&mut self, cmd: &Header, payload: &[u8], out: &mut [u8]) -> usize {
        if out.len() < HEADER_LEN + payload.len() {
            return 0;
        }

        out[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);

        self.reply(
            MessageType::DataBlock,
            cmd,
            payload.len() as u32,
            status::ICC_PRESENT_ACTIVE,
            0x00,
            out,
        )
    }

    /// SlotStatus reply (no payload)
    fn slot_status(&mut self, cmd: &Header, status: u8, err: u8, out: &mut [u8]) -> usize {
        self.reply(MessageType::SlotStatus, cmd, 0, status, err, out)
    }

    /// Write the reply header ahead of `length` already-placed payload bytes
    fn reply(
        &mut self,
        message_type: MessageType,
        cmd: &Header,
        length: u32,
        status: u8,
        err: u8,
        out: &mut [u8],
    ) -> usize {
        let header = Header::reply(message_type, cmd, length, status, err);

        match header.encode(out) {
            Ok(n) => n + length as usize,
            Err(_e) => {
                #[cfg(feature = "log")]
                log::warn!("ccid header encoding failed: {:?}", _e);
                0
            }
        }
    }
}
