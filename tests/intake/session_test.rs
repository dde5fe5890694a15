//! Session backends: cookie, memory, and SQLite.

use std::time::Duration;

use serde_json::json;

use clinic_intake::db;
use clinic_intake::draft::EntityDraft;
use clinic_intake::schema::FieldSchema;
use clinic_intake::session::cookie::{
    decode_state, read_cookie, CookieSessionStore, DRAFT_COOKIE, MAX_COOKIE_BYTES,
};
use clinic_intake::session::memory::MemorySessionStore;
use clinic_intake::session::sqlite::SqliteSessionStore;
use clinic_intake::session::{
    SearchCandidate, SessionError, SessionState, SessionStore, DEFAULT_SESSION_TTL,
};

fn state_with_name(nombre: &str) -> SessionState {
    let schema = FieldSchema::patient();
    let values = json!({ "nombre": nombre });
    SessionState::with_draft(EntityDraft::from_values(
        &schema,
        values.as_object().expect("object"),
    ))
}

/// `name=value` from a `Set-Cookie` header value.
fn cookie_pair(set_cookie: &str) -> String {
    set_cookie
        .split(';')
        .next()
        .map(str::to_owned)
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Cookie
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cookie_store_round_trips_through_header() {
    let store = CookieSessionStore::from_header(DRAFT_COOKIE, None);
    assert!(store.get("").await.expect("get").is_none());
    assert!(store.set_cookie_header().is_none());

    let state = state_with_name("Ana López");
    store.set("", &state, DEFAULT_SESSION_TTL).await.expect("set");

    let header = store.set_cookie_header().expect("pending write");
    assert!(header.starts_with("intake_draft="));
    assert!(header.ends_with("; Max-Age=43200; Path=/; HttpOnly; SameSite=Lax"));

    let next_request = CookieSessionStore::from_header(DRAFT_COOKIE, Some(&cookie_pair(&header)));
    let loaded = next_request.get("").await.expect("get").expect("state");
    assert_eq!(loaded.draft.get("nombre"), "Ana López");
    assert_eq!(loaded.version, 1);
}

#[tokio::test]
async fn cookie_clear_expires_the_cookie() {
    let store = CookieSessionStore::from_header(DRAFT_COOKIE, Some("intake_draft=abc; other=1"));
    store.clear("").await.expect("clear");
    assert!(store.get("").await.expect("get").is_none());
    assert_eq!(
        store.set_cookie_header().as_deref(),
        Some("intake_draft=; Max-Age=0; Path=/; HttpOnly; SameSite=Lax")
    );
}

#[tokio::test]
async fn undecodable_cookie_is_treated_as_absent() {
    let store = CookieSessionStore::from_header(DRAFT_COOKIE, Some("intake_draft=%%%not-base64"));
    assert!(store.get("").await.expect("get").is_none());
}

#[tokio::test]
async fn oversized_cookie_drops_candidates_first() {
    let mut state = state_with_name("Ana");
    state.candidates = (0..120)
        .map(|n| SearchCandidate {
            id: format!("00000000-0000-0000-0000-{n:012}"),
            nombre: format!("Paciente con nombre largo número {n}"),
        })
        .collect();

    let store = CookieSessionStore::from_header(DRAFT_COOKIE, None);
    store.set("", &state, DEFAULT_SESSION_TTL).await.expect("set");

    let header = store.set_cookie_header().expect("pending write");
    let value = read_cookie(&cookie_pair(&header), DRAFT_COOKIE).expect("value");
    assert!(value.len() <= MAX_COOKIE_BYTES);
    let stored = decode_state(&value).expect("decode");
    assert!(stored.candidates.is_empty());
    assert_eq!(stored.draft.get("nombre"), "Ana");
}

#[tokio::test]
async fn oversized_draft_is_refused() {
    let state = state_with_name(&"x".repeat(MAX_COOKIE_BYTES));
    let store = CookieSessionStore::from_header(DRAFT_COOKIE, None);
    let result = store.set("", &state, DEFAULT_SESSION_TTL).await;
    assert!(matches!(result, Err(SessionError::TooLarge { .. })));
    assert!(store.set_cookie_header().is_none());
}

#[test]
fn read_cookie_finds_named_pair() {
    let header = "a=1; intake_draft=xyz ; b=2";
    assert_eq!(read_cookie(header, DRAFT_COOKIE).as_deref(), Some("xyz"));
    assert_eq!(read_cookie(header, "missing"), None);
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

#[tokio::test]
async fn memory_store_versions_and_detects_conflicts() {
    let store = MemorySessionStore::new();
    let state = state_with_name("Ana");
    store.set("s1", &state, DEFAULT_SESSION_TTL).await.expect("first write");

    let loaded = store.get("s1").await.expect("get").expect("state");
    assert_eq!(loaded.version, 1);

    // A second writer that loaded before the first write.
    let stale = store.set("s1", &state, DEFAULT_SESSION_TTL).await;
    assert!(matches!(stale, Err(SessionError::Conflict { expected: 0, .. })));

    store.set("s1", &loaded, DEFAULT_SESSION_TTL).await.expect("fresh write");
    assert_eq!(store.get("s1").await.expect("get").expect("state").version, 2);
}

#[tokio::test]
async fn memory_store_keys_are_independent() {
    let store = MemorySessionStore::new();
    store
        .set("a", &state_with_name("Ana"), DEFAULT_SESSION_TTL)
        .await
        .expect("set a");
    assert!(store.get("b").await.expect("get").is_none());
    store.clear("a").await.expect("clear");
    store.clear("a").await.expect("clearing twice is fine");
    assert!(store.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn memory_store_expires_entries() {
    let store = MemorySessionStore::new();
    store
        .set("s1", &state_with_name("Ana"), Duration::from_secs(10))
        .await
        .expect("set");
    tokio::time::advance(Duration::from_secs(11)).await;
    assert!(store.get("s1").await.expect("get").is_none());

    // An expired entry never blocks a new writer.
    store
        .set("s1", &state_with_name("Beto"), Duration::from_secs(10))
        .await
        .expect("overwrite expired");
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sqlite_store_versions_and_detects_conflicts() {
    let pool = db::connect_in_memory().await.expect("pool");
    let store = SqliteSessionStore::new(pool);
    let state = state_with_name("Ana");

    assert!(store.get("s1").await.expect("get").is_none());
    store.set("s1", &state, DEFAULT_SESSION_TTL).await.expect("first write");

    let loaded = store.get("s1").await.expect("get").expect("state");
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.draft.get("nombre"), "Ana");

    let stale = store.set("s1", &state, DEFAULT_SESSION_TTL).await;
    assert!(matches!(stale, Err(SessionError::Conflict { .. })));

    store.clear("s1").await.expect("clear");
    assert!(store.get("s1").await.expect("get").is_none());
}

#[tokio::test]
async fn sqlite_store_hides_and_purges_expired_rows() {
    let pool = db::connect_in_memory().await.expect("pool");
    let store = SqliteSessionStore::new(pool);

    store
        .set("s1", &state_with_name("Ana"), Duration::ZERO)
        .await
        .expect("set");
    assert!(store.get("s1").await.expect("get").is_none());

    store
        .set("s2", &state_with_name("Beto"), Duration::ZERO)
        .await
        .expect("set");
    assert_eq!(store.purge_expired().await.expect("purge"), 2);
}
