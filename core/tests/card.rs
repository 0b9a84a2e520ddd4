//! OpenPGP card engine tests: selection, PIN state machine, data objects
//! and key operations against the in-memory store.

use openkey_core::card::{CardEngine, AID_PREFIX};
use openkey_core::store::KeyRole;
use openkey_proto::apdu::{Command, Response, StatusWord};

mod helpers;
use helpers::*;

fn apdu<'a>(ins: u8, p1: u8, p2: u8, data: &'a [u8]) -> Command<'a> {
    Command {
        cla: 0x00,
        ins,
        p1,
        p2,
        data,
        le: None,
    }
}

fn select(card: &mut CardEngine<MemoryStore>) {
    let r = card.handle(&apdu(0xA4, 0x04, 0x00, &AID_PREFIX));
    assert_eq!(r.sw, StatusWord::Success);
}

fn verify(card: &mut CardEngine<MemoryStore>, reference: u8, pin: &[u8]) -> Response {
    card.handle(&apdu(0x20, 0x00, reference, pin))
}

#[test]
fn select_application() {
    init_logger();
    let mut card = card_engine();

    // commands before selection are refused
    let r = card.handle(&apdu(0xCA, 0x00, 0x4F, &[]));
    assert_eq!(r.sw, StatusWord::ConditionsNotSatisfied);

    // unrelated AID
    let r = card.handle(&apdu(0xA4, 0x04, 0x00, &[0xA0, 0x00, 0x00, 0x03, 0x97]));
    assert_eq!(r.sw, StatusWord::FileNotFound);

    select(&mut card);
}

#[test]
fn serial_derived_from_unique_id() {
    init_logger();
    let mut card = card_engine();
    select(&mut card);

    let r = card.handle(&apdu(0xCA, 0x00, 0x4F, &[]));
    assert_eq!(r.sw, StatusWord::Success);
    assert_eq!(r.data.len(), 16);
    assert_eq!(&r.data[..6], &AID_PREFIX);
    assert_eq!(&r.data[10..14], &UNIQUE_ID[4..8]);
}

#[test]
fn verify_sets_security_and_resets_counter() {
    init_logger();
    let mut card = card_engine();
    select(&mut card);

    // query before verification reports remaining tries
    let r = verify(&mut card, 0x81, &[]);
    assert_eq!(r.sw, StatusWord::RemainingTries(3));

    // one failure, then success restores the counter
    let r = verify(&mut card, 0x81, b"000000");
    assert_eq!(r.sw, StatusWord::RemainingTries(2));

    let r = verify(&mut card, 0x81, USER_PIN);
    assert_eq!(r.sw, StatusWord::Success);

    let r = verify(&mut card, 0x81, &[]);
    assert_eq!(r.sw, StatusWord::Success);

    // counter back at maximum
    let r = verify(&mut card, 0x81, b"000000");
    assert_eq!(r.sw, StatusWord::RemainingTries(2));
}

#[test]
fn verify_lockout_is_permanent() {
    init_logger();
    let mut card = card_engine();
    select(&mut card);

    for left in [2, 1, 0] {
        let r = verify(&mut card, 0x81, b"000000");
        assert_eq!(r.sw, StatusWord::RemainingTries(left));
    }

    // correct PIN no longer accepted
    let r = verify(&mut card, 0x81, USER_PIN);
    assert_eq!(r.sw, StatusWord::AuthenticationBlocked);

    let r = verify(&mut card, 0x81, &[]);
    assert_eq!(r.sw, StatusWord::AuthenticationBlocked);

    // admin reference counts independently
    let r = verify(&mut card, 0x83, ADMIN_PIN);
    assert_eq!(r.sw, StatusWord::Success);
}

#[test]
fn put_data_requires_admin() {
    init_logger();
    let mut card = card_engine();
    select(&mut card);

    let r = card.handle(&apdu(0xDA, 0x00, 0x5B, b"Roe<<Richard"));
    assert_eq!(r.sw, StatusWord::SecurityStatusNotSatisfied);

    // stored value untouched
    let r = card.handle(&apdu(0xCA, 0x00, 0x5B, &[]));
    assert_eq!(r.data.as_slice(), b"Doe<<Jane");

    let r = verify(&mut card, 0x83, ADMIN_PIN);
    assert_eq!(r.sw, StatusWord::Success);

    let r = card.handle(&apdu(0xDA, 0x00, 0x5B, b"Roe<<Richard"));
    assert_eq!(r.sw, StatusWord::Success);

    let r = card.handle(&apdu(0xCA, 0x00, 0x5B, &[]));
    assert_eq!(r.data.as_slice(), b"Roe<<Richard");
}

#[test]
fn get_data_unknown_tag() {
    init_logger();
    let mut card = card_engine();
    select(&mut card);

    let r = card.handle(&apdu(0xCA, 0x01, 0x01, &[]));
    assert_eq!(r.sw, StatusWord::ReferencedDataNotFound);
}

#[test]
fn pw_status_tracks_counters() {
    init_logger();
    let mut card = card_engine();
    select(&mut card);

    let _ = verify(&mut card, 0x81, b"000000");

    let r = card.handle(&apdu(0xCA, 0x00, 0xC4, &[]));
    assert_eq!(r.sw, StatusWord::Success);
    assert_eq!(r.data.len(), 7);
    assert_eq!(r.data[0], 0x01);
    assert_eq!(&r.data[4..7], &[2, 3, 3]);
}

#[test]
fn compute_signature_requires_sign_pin() {
    init_logger();
    let mut card = card_engine();
    select(&mut card);

    let digest = [0xD1u8; 32];

    let r = card.handle(&apdu(0x2A, 0x9E, 0x9A, &digest));
    assert_eq!(r.sw, StatusWord::SecurityStatusNotSatisfied);

    let r = verify(&mut card, 0x81, USER_PIN);
    assert_eq!(r.sw, StatusWord::Success);

    let r = card.handle(&apdu(0x2A, 0x9E, 0x9A, &digest));
    assert_eq!(r.sw, StatusWord::Success);
    assert_eq!(r.data.as_slice(), fake_sign(KeyRole::Sign, &digest).as_slice());

    // PW1 stays valid for further signatures
    let r = card.handle(&apdu(0x2A, 0x9E, 0x9A, &digest));
    assert_eq!(r.sw, StatusWord::Success);
}

#[test]
fn decipher_requires_user_pin() {
    init_logger();
    let mut card = card_engine();
    select(&mut card);

    // padding indicator then ciphertext
    let mut data = vec![0x00];
    data.extend_from_slice(&[0xC7; 64]);

    let r = card.handle(&apdu(0x2A, 0x80, 0x86, &data));
    assert_eq!(r.sw, StatusWord::SecurityStatusNotSatisfied);

    // reference 0x81 is not sufficient for decipher
    let r = verify(&mut card, 0x81, USER_PIN);
    assert_eq!(r.sw, StatusWord::Success);
    let r = card.handle(&apdu(0x2A, 0x80, 0x86, &data));
    assert_eq!(r.sw, StatusWord::SecurityStatusNotSatisfied);

    let r = verify(&mut card, 0x82, USER_PIN);
    assert_eq!(r.sw, StatusWord::Success);

    let r = card.handle(&apdu(0x2A, 0x80, 0x86, &data));
    assert_eq!(r.sw, StatusWord::Success);
    assert_eq!(
        r.data.as_slice(),
        fake_decrypt(KeyRole::Decrypt, &data[1..]).as_slice()
    );
}

#[test]
fn internal_authenticate() {
    init_logger();
    let mut card = card_engine();
    select(&mut card);

    let challenge = [0x5Au8; 32];

    let r = card.handle(&apdu(0x88, 0x00, 0x00, &challenge));
    assert_eq!(r.sw, StatusWord::SecurityStatusNotSatisfied);

    let r = verify(&mut card, 0x82, USER_PIN);
    assert_eq!(r.sw, StatusWord::Success);

    let r = card.handle(&apdu(0x88, 0x00, 0x00, &challenge));
    assert_eq!(r.sw, StatusWord::Success);
    assert_eq!(
        r.data.as_slice(),
        fake_sign(KeyRole::Auth, &challenge).as_slice()
    );
}

#[test]
fn generate_read_returns_public_key_template() {
    init_logger();
    let mut card = card_engine();
    select(&mut card);

    let r = card.handle(&apdu(0x47, 0x81, 0x00, &[0xB6, 0x00]));
    assert_eq!(r.sw, StatusWord::Success);

    // 7F49 template wrapping an 0x86 external point
    assert_eq!(&r.data[..2], &[0x7F, 0x49]);
    let pk = fake_public_key(KeyRole::Sign);
    assert!(r
        .data
        .windows(pk.len())
        .any(|w| w == pk.as_slice()));

    // on-card generation is not offered
    let r = card.handle(&apdu(0x47, 0x80, 0x00, &[0xB6, 0x00]));
    assert_eq!(r.sw, StatusWord::ConditionsNotSatisfied);

    // unknown CRT
    let r = card.handle(&apdu(0x47, 0x81, 0x00, &[0xF0, 0x00]));
    assert_eq!(r.sw, StatusWord::WrongData);
}

#[test]
fn get_challenge_returns_requested_length() {
    init_logger();
    let mut card = card_engine();
    select(&mut card);

    let cmd = Command {
        cla: 0x00,
        ins: 0x84,
        p1: 0x00,
        p2: 0x00,
        data: &[],
        le: Some(16),
    };

    let r = card.handle(&cmd);
    assert_eq!(r.sw, StatusWord::Success);
    assert_eq!(r.data.len(), 16);

    // no expected length to satisfy
    let r = card.handle(&apdu(0x84, 0x00, 0x00, &[]));
    assert_eq!(r.sw, StatusWord::WrongLength);
}

#[test]
fn change_reference_data_replaces_pin() {
    init_logger();
    let mut card = card_engine();
    select(&mut card);

    let mut data = USER_PIN.to_vec();
    data.extend_from_slice(b"654321");

    let r = card.handle(&apdu(0x24, 0x00, 0x81, &data));
    assert_eq!(r.sw, StatusWord::Success);

    // verification state was cleared by the change
    let r = card.handle(&apdu(0x2A, 0x9E, 0x9A, &[0xD1; 32]));
    assert_eq!(r.sw, StatusWord::SecurityStatusNotSatisfied);

    let r = verify(&mut card, 0x81, USER_PIN);
    assert_eq!(r.sw, StatusWord::RemainingTries(2));

    let r = verify(&mut card, 0x81, b"654321");
    assert_eq!(r.sw, StatusWord::Success);
}

#[test]
fn change_reference_data_rejects_short_pin() {
    init_logger();
    let mut card = card_engine();
    select(&mut card);

    let mut data = USER_PIN.to_vec();
    data.extend_from_slice(b"123");

    let r = card.handle(&apdu(0x24, 0x00, 0x81, &data));
    assert_eq!(r.sw, StatusWord::WrongLength);

    let r = verify(&mut card, 0x81, USER_PIN);
    assert_eq!(r.sw, StatusWord::Success);
}

#[test]
fn reset_retry_counter_with_reset_code() {
    init_logger();
    let mut card = card_engine();
    select(&mut card);

    for _ in 0..3 {
        let _ = verify(&mut card, 0x81, b"000000");
    }
    let r = verify(&mut card, 0x81, USER_PIN);
    assert_eq!(r.sw, StatusWord::AuthenticationBlocked);

    let mut data = RESET_CODE.to_vec();
    data.extend_from_slice(b"765432");

    let r = card.handle(&apdu(0x2C, 0x00, 0x81, &data));
    assert_eq!(r.sw, StatusWord::Success);

    let r = verify(&mut card, 0x81, b"765432");
    assert_eq!(r.sw, StatusWord::Success);
}

#[test]
fn reset_retry_counter_with_admin() {
    init_logger();
    let mut card = card_engine();
    select(&mut card);

    // without admin verification
    let r = card.handle(&apdu(0x2C, 0x02, 0x81, b"765432"));
    assert_eq!(r.sw, StatusWord::SecurityStatusNotSatisfied);

    let r = verify(&mut card, 0x83, ADMIN_PIN);
    assert_eq!(r.sw, StatusWord::Success);

    let r = card.handle(&apdu(0x2C, 0x02, 0x81, b"765432"));
    assert_eq!(r.sw, StatusWord::Success);

    let r = verify(&mut card, 0x81, b"765432");
    assert_eq!(r.sw, StatusWord::Success);
}

#[test]
fn wrong_reset_code_counts_down_its_own_reference() {
    init_logger();
    let mut card = card_engine();
    select(&mut card);

    let mut data = vec![0u8; RESET_CODE.len()];
    data.extend_from_slice(b"765432");

    for left in [2, 1, 0] {
        let r = card.handle(&apdu(0x2C, 0x00, 0x81, &data));
        assert_eq!(r.sw, StatusWord::RemainingTries(left));
    }

    let r = card.handle(&apdu(0x2C, 0x00, 0x81, &data));
    assert_eq!(r.sw, StatusWord::AuthenticationBlocked);

    // user PIN unaffected
    let r = verify(&mut card, 0x81, USER_PIN);
    assert_eq!(r.sw, StatusWord::Success);
}

#[test]
fn reset_clears_security_status_only() {
    init_logger();
    let mut card = card_engine();
    select(&mut card);

    let _ = verify(&mut card, 0x81, b"000000");
    let r = verify(&mut card, 0x81, USER_PIN);
    assert_eq!(r.sw, StatusWord::Success);

    card.reset();
    select(&mut card);

    // verification is gone
    let r = card.handle(&apdu(0x2A, 0x9E, 0x9A, &[0xD1; 32]));
    assert_eq!(r.sw, StatusWord::SecurityStatusNotSatisfied);
}

#[test]
fn rejected_instruction_classes() {
    init_logger();
    let mut card = card_engine();
    select(&mut card);

    // unknown instruction
    let r = card.handle(&apdu(0x55, 0x00, 0x00, &[]));
    assert_eq!(r.sw, StatusWord::InsNotSupported);

    // unknown class
    let r = card.handle(&Command {
        cla: 0x80,
        ins: 0xCA,
        p1: 0x00,
        p2: 0x4F,
        data: &[],
        le: None,
    });
    assert_eq!(r.sw, StatusWord::ClaNotSupported);

    // unsupported PSO variant
    let r = card.handle(&apdu(0x2A, 0x00, 0x00, &[]));
    assert_eq!(r.sw, StatusWord::IncorrectP1P2);

    // VERIFY with an unknown reference
    let r = verify(&mut card, 0x85, USER_PIN);
    assert_eq!(r.sw, StatusWord::IncorrectP1P2);
}

#[test]
fn unprovisioned_card_refuses_everything() {
    init_logger();
    let mut card = CardEngine::new(MemoryStore::unprovisioned(), UNIQUE_ID, None);

    let r = card.handle(&apdu(0xA4, 0x04, 0x00, &AID_PREFIX));
    assert_eq!(r.sw, StatusWord::ConditionsNotSatisfied);

    let r = verify(&mut card, 0x81, USER_PIN);
    assert_eq!(r.sw, StatusWord::ConditionsNotSatisfied);
}
