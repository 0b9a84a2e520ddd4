//! Protocol engines for the openkey USB security token.
//!
//! The token exposes two independent host-facing functions, each driven by
//! a byte-buffer entry point fed from the USB transport:
//!
//! - [ccid::CcidReader]: a single-slot CCID smart card reader wrapping the
//!   [card::CardEngine] OpenPGP card application
//! - [u2f::U2fToken]: a U2F (CTAP1) second-factor authenticator
//!
//! Key material, PIN references and the U2F counter live behind the
//! [store::KeyStore] capability trait, so engines hold no raw private key
//! bytes and can be driven by an in-memory store in tests.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod card;
pub mod ccid;
pub mod store;
pub mod u2f;
