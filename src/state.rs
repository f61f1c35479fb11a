//! Anti-forgery state for the OAuth redirect
//!
//! A state value binds the authorization redirect to the callback that comes
//! back from the identity backend. This module only mints and compares
//! values; keeping the expected value between the two requests belongs to the
//! session layer.
//!
//! [`PendingState`] is the owned form: [`PendingState::verify`] consumes it,
//! so a value that was checked once cannot be checked again.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Random bytes per state value (256 bits).
const STATE_BYTES: usize = 32;

/// Generate a random state parameter
pub fn mint_state() -> String {
    let state_bytes: [u8; STATE_BYTES] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}

/// Compare the expected state with the one received on the callback.
///
/// Constant-time over the bytes. Empty values never match.
pub fn verify_state(expected: &str, received: &str) -> bool {
    if expected.is_empty() || received.is_empty() {
        return false;
    }
    expected.as_bytes().ct_eq(received.as_bytes()).into()
}

/// A minted state value awaiting its callback.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingState(String);

impl PendingState {
    /// Mint a fresh state
    pub fn mint() -> Self {
        Self(mint_state())
    }

    /// The value to embed in the authorization URL
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify the callback's state, consuming this value.
    pub fn verify(self, received: &str) -> bool {
        verify_state(&self.0, received)
    }
}

impl fmt::Debug for PendingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PendingState(..)")
    }
}
