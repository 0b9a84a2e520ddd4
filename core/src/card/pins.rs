//! Card security status and PIN try counters.

use bitflags::bitflags;

use crate::store::PinRef;

/// Maximum attempts per PIN reference
pub const MAX_PIN_TRIES: u8 = 3;

/// Minimum PW1 length
pub const MIN_USER_PIN_LEN: usize = 6;

/// Minimum PW3 / reset code length
pub const MIN_ADMIN_PIN_LEN: usize = 8;

/// Maximum PIN length (single-byte PW status field)
pub const MAX_PIN_LEN: usize = 127;

bitflags! {
    /// Access conditions satisfied since the last card reset
    pub struct SecurityStatus: u8 {
        /// PW1 verified for signing (VERIFY reference 0x81)
        const SIGN  = 0b0000_0001;
        /// PW1 verified for decrypt / authenticate (VERIFY reference 0x82)
        const USER  = 0b0000_0010;
        /// PW3 verified (VERIFY reference 0x83)
        const ADMIN = 0b0000_0100;
    }
}

/// Remaining-attempt counters for the three PIN references.
///
/// A counter at zero blocks its reference until an explicit unblock flow
/// resets it; counters survive card resets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TryCounters {
    counters: [u8; 3],
}

impl TryCounters {
    /// All references at maximum attempts
    pub const fn new() -> Self {
        Self {
            counters: [MAX_PIN_TRIES; 3],
        }
    }

    fn index(reference: PinRef) -> usize {
        match reference {
            PinRef::User => 0,
            PinRef::ResetCode => 1,
            PinRef::Admin => 2,
        }
    }

    /// Remaining attempts for a reference
    pub fn remaining(&self, reference: PinRef) -> u8 {
        self.counters[Self::index(reference)]
    }

    /// Whether a reference is blocked
    pub fn blocked(&self, reference: PinRef) -> bool {
        self.remaining(reference) == 0
    }

    /// Restore a reference to maximum attempts
    pub fn reset(&mut self, reference: PinRef) {
        self.counters[Self::index(reference)] = MAX_PIN_TRIES;
    }

    /// Consume one attempt, returning the new remaining count
    pub fn decrement(&mut self, reference: PinRef) -> u8 {
        let c = &mut self.counters[Self::index(reference)];
        *c = c.saturating_sub(1);
        *c
    }
}

impl Default for TryCounters {
    fn default() -> Self {
        Self::new()
    }
}
