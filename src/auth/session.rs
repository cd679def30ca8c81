use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use secrecy::{ExposeSecret, SecretString};

use crate::bridge::SessionTokens;

/// Token lifetime assumed when the host does not report one. Salesforce
/// session timeouts default to 2 hours.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 7200;

/// Refresh this long before actual expiry so in-flight requests never race
/// the deadline.
pub const EXPIRY_BUFFER_SECS: u64 = 300;

/// Current Unix time in seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// An authenticated Salesforce session.
///
/// Tokens are held as `SecretString` so accidental `Debug`/log output shows
/// `[REDACTED]` instead of credentials.
pub struct AuthSession {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub instance_url: String,
    /// Unix timestamp (seconds) when the tokens were issued.
    pub issued_at: u64,
    /// Lifetime in seconds, if the host reported one.
    pub expires_in: Option<u64>,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("instance_url", &self.instance_url)
            .field("issued_at", &self.issued_at)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl Clone for AuthSession {
    fn clone(&self) -> Self {
        Self {
            access_token: SecretString::from(self.access_token.expose_secret().to_owned()),
            refresh_token: SecretString::from(self.refresh_token.expose_secret().to_owned()),
            instance_url: self.instance_url.clone(),
            issued_at: self.issued_at,
            expires_in: self.expires_in,
        }
    }
}

impl From<SessionTokens> for AuthSession {
    fn from(t: SessionTokens) -> Self {
        Self {
            access_token: SecretString::from(t.access_token),
            refresh_token: SecretString::from(t.refresh_token),
            instance_url: t.instance_url,
            issued_at: t.issued_at,
            expires_in: t.expires_in,
        }
    }
}

impl AuthSession {
    /// Structural validity: every required field present and non-empty.
    /// Says nothing about expiry.
    pub fn is_valid(&self) -> bool {
        !self.access_token.expose_secret().is_empty()
            && !self.refresh_token.expose_secret().is_empty()
            && !self.instance_url.is_empty()
            && self.issued_at > 0
    }

    /// Whether the session is expired at `now`, applying the safety buffer.
    pub fn is_expired_at(&self, now: u64) -> bool {
        let lifetime = self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        // saturating: a lifetime shorter than the buffer means always-expired,
        // not a wraparound into the far future.
        let deadline = (self.issued_at + lifetime).saturating_sub(EXPIRY_BUFFER_SECS);
        now >= deadline
    }

    /// Whether the session is expired right now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_now())
    }

    /// Converts back to the plain-string wire form for host persistence.
    pub fn to_tokens(&self) -> SessionTokens {
        SessionTokens {
            access_token: self.access_token.expose_secret().to_owned(),
            refresh_token: self.refresh_token.expose_secret().to_owned(),
            instance_url: self.instance_url.clone(),
            issued_at: self.issued_at,
            expires_in: self.expires_in,
        }
    }
}
