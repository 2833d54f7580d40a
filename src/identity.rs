//! Request-scoped identity.
//!
//! Each [`Request`](crate::Request) owns exactly one [`Identity`] slot. The
//! auth stage fills it once, right after the bearer token verifies; handlers
//! read it as often as they like. Nothing here is shared between requests;
//! the slot lives and dies with the request value that owns it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric identifier of an authenticated user (the token's `sub` claim).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Write-once holder for the verified subject of the current request.
#[derive(Debug, Default)]
pub struct Identity {
    subject: Option<UserId>,
}

impl Identity {
    /// Records the verified subject.
    ///
    /// # Panics
    ///
    /// Panics if a subject was already recorded for this request. Only the
    /// auth stage calls this, once per request.
    pub(crate) fn set(&mut self, subject: UserId) {
        assert!(
            self.subject.is_none(),
            "identity already set for this request",
        );
        self.subject = Some(subject);
    }

    /// The verified subject, or `None` if the request never authenticated.
    pub fn get(&self) -> Option<UserId> {
        self.subject
    }
}
