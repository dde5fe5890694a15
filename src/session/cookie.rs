//! Cookie-carried session state and cookie header helpers.
//!
//! A [`CookieSessionStore`] lives for one request: it is built from the
//! incoming `Cookie` header, the engine reads and writes it through the
//! [`SessionStore`] trait, and the HTTP layer turns the pending write into
//! a `Set-Cookie` header. State is base64url-encoded JSON.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tracing::warn;

use super::{SessionError, SessionState, SessionStore};

/// Cookie holding the encoded session state.
pub const DRAFT_COOKIE: &str = "intake_draft";

/// Cookie holding the opaque session id for server-side backends.
pub const SID_COOKIE: &str = "intake_sid";

/// Largest encoded value written to a cookie (browsers cap at ~4 KiB).
pub const MAX_COOKIE_BYTES: usize = 3800;

// ---------------------------------------------------------------------------
// Header helpers
// ---------------------------------------------------------------------------

/// Find the value of cookie `name` in a `Cookie` request header.
pub fn read_cookie(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key.trim() == name).then(|| value.trim().to_owned())
    })
}

/// Build a `Set-Cookie` value that stores `value` for `max_age`.
pub fn set_cookie(name: &str, value: &str, max_age: Duration) -> String {
    format!(
        "{name}={value}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
        max_age.as_secs()
    )
}

/// Build a `Set-Cookie` value that deletes cookie `name`.
pub fn expire_cookie(name: &str) -> String {
    format!("{name}=; Max-Age=0; Path=/; HttpOnly; SameSite=Lax")
}

/// Encode state as base64url JSON.
///
/// # Errors
///
/// Returns [`SessionError::Encoding`] if serialization fails.
pub fn encode_state(state: &SessionState) -> Result<String, SessionError> {
    let json = serde_json::to_vec(state)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Decode state written by [`encode_state`].
///
/// # Errors
///
/// Returns [`SessionError::Encoding`] on bad base64 or JSON.
pub fn decode_state(value: &str) -> Result<SessionState, SessionError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| SessionError::Encoding(e.to_string()))?;
    Ok(serde_json::from_slice(&bytes)?)
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingWrite {
    Set { value: String, max_age: Duration },
    Clear,
}

/// Request-scoped store backed by the `intake_draft` cookie.
pub struct CookieSessionStore {
    name: String,
    incoming: Option<String>,
    pending: Mutex<Option<PendingWrite>>,
}

impl CookieSessionStore {
    /// Build from the raw value of the state cookie, if the request had one.
    pub fn new(name: impl Into<String>, incoming: Option<String>) -> Self {
        Self {
            name: name.into(),
            incoming,
            pending: Mutex::new(None),
        }
    }

    /// Build from a whole `Cookie` request header.
    pub fn from_header(name: &str, header: Option<&str>) -> Self {
        let incoming = header.and_then(|h| read_cookie(h, name));
        Self::new(name, incoming)
    }

    /// The `Set-Cookie` header value for this request's write, if any.
    pub fn set_cookie_header(&self) -> Option<String> {
        let pending = self.pending.lock().ok()?.clone()?;
        Some(match pending {
            PendingWrite::Set { value, max_age } => set_cookie(&self.name, &value, max_age),
            PendingWrite::Clear => expire_cookie(&self.name),
        })
    }

    fn write(&self, next: PendingWrite) -> Result<(), SessionError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| SessionError::Storage("cookie store lock poisoned".to_owned()))?;
        *pending = Some(next);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for CookieSessionStore {
    async fn get(&self, _id: &str) -> Result<Option<SessionState>, SessionError> {
        let pending = self
            .pending
            .lock()
            .map_err(|_| SessionError::Storage("cookie store lock poisoned".to_owned()))?
            .clone();
        let raw = match pending {
            Some(PendingWrite::Clear) => return Ok(None),
            Some(PendingWrite::Set { value, .. }) => Some(value),
            None => self.incoming.clone(),
        };
        let Some(raw) = raw.filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        match decode_state(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(error = %e, "discarding undecodable session cookie");
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        _id: &str,
        state: &SessionState,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        let mut stored = state.clone();
        stored.version = state.next_version();

        let mut value = encode_state(&stored)?;
        if value.len() > MAX_COOKIE_BYTES && !stored.candidates.is_empty() {
            warn!(bytes = value.len(), "session cookie too large, dropping candidates");
            stored.candidates.clear();
            value = encode_state(&stored)?;
        }
        if value.len() > MAX_COOKIE_BYTES {
            return Err(SessionError::TooLarge { bytes: value.len() });
        }

        self.write(PendingWrite::Set {
            value,
            max_age: ttl,
        })
    }

    async fn clear(&self, _id: &str) -> Result<(), SessionError> {
        self.write(PendingWrite::Clear)
    }
}
