//! Inbound HTTP surface.
//!
//! Routes are nested under `/api/`:
//! - `POST /api/intake`: one conversational turn
//! - `POST /api/patients`: create a record from a finished draft
//! - `GET /api/health`: liveness
//!
//! Session state is resolved per request. The cookie backend builds a
//! request-scoped store from the `Cookie` header; server-side backends share
//! one store and key it by `sessionId` (body), else the `intake_sid` cookie,
//! else a fresh UUID.

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::engine::IntakeEngine;
use crate::session::cookie::{read_cookie, set_cookie, CookieSessionStore, SID_COOKIE};
use crate::session::SessionStore;
use crate::store::CallerId;

pub mod error;
pub mod handlers;

pub use error::ApiError;

/// How sessions are stored.
#[derive(Clone)]
pub enum SessionMode {
    /// State travels in a cookie with this name.
    Cookie {
        /// Cookie name.
        name: String,
    },
    /// State lives in a shared server-side store.
    Server(Arc<dyn SessionStore>),
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// The intake engine.
    pub engine: Arc<IntakeEngine>,
    /// Session backend.
    pub sessions: SessionMode,
    /// Header carrying the authenticated caller id.
    pub auth_header: HeaderName,
    /// Lifetime of issued session cookies.
    pub session_ttl: Duration,
}

/// Build the API router.
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/api/intake", post(handlers::intake))
        .route("/api/patients", post(handlers::create_patient))
        .route("/api/health", get(handlers::health))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Per-request session resolution
// ---------------------------------------------------------------------------

/// The session store and key for one request.
pub(crate) enum RequestSession {
    Cookie(CookieSessionStore),
    Server {
        store: Arc<dyn SessionStore>,
        id: String,
        issue_cookie: bool,
    },
}

impl RequestSession {
    pub(crate) fn resolve(
        state: &AppState,
        headers: &HeaderMap,
        body_session_id: Option<&str>,
    ) -> Self {
        let cookie_header = headers.get(COOKIE).and_then(|v| v.to_str().ok());
        match &state.sessions {
            SessionMode::Cookie { name } => {
                Self::Cookie(CookieSessionStore::from_header(name, cookie_header))
            }
            SessionMode::Server(store) => {
                let from_body = body_session_id
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_owned);
                let (id, issue_cookie) = match from_body {
                    Some(id) => (id, false),
                    None => {
                        let id = cookie_header
                            .and_then(|h| read_cookie(h, SID_COOKIE))
                            .filter(|id| !id.is_empty())
                            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                        (id, true)
                    }
                };
                Self::Server {
                    store: Arc::clone(store),
                    id,
                    issue_cookie,
                }
            }
        }
    }

    pub(crate) fn id(&self) -> &str {
        match self {
            Self::Cookie(_) => "",
            Self::Server { id, .. } => id,
        }
    }

    pub(crate) fn store(&self) -> &dyn SessionStore {
        match self {
            Self::Cookie(store) => store,
            Self::Server { store, .. } => store.as_ref(),
        }
    }

    /// Attach the `Set-Cookie` header this request needs, if any.
    pub(crate) fn finish(&self, ttl: Duration, response: &mut Response) {
        let cookie = match self {
            Self::Cookie(store) => store.set_cookie_header(),
            Self::Server {
                id, issue_cookie, ..
            } => issue_cookie.then(|| set_cookie(SID_COOKIE, id, ttl)),
        };
        if let Some(value) = cookie.and_then(|c| HeaderValue::from_str(&c).ok()) {
            response.headers_mut().append(SET_COOKIE, value);
        }
    }
}

/// The authenticated caller, from the trusted identity header.
pub(crate) fn caller(state: &AppState, headers: &HeaderMap) -> Option<CallerId> {
    headers
        .get(&state.auth_header)
        .and_then(|v| v.to_str().ok())
        .and_then(CallerId::new)
}
