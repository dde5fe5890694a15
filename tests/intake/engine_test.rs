//! Action routing across turns, with a scripted completion service.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use clinic_intake::engine::{IntakeEngine, SubmitError, Turn, TurnError};
use clinic_intake::providers::CompletionError;
use clinic_intake::response::{NextStep, TurnReply, NOT_UNDERSTOOD};
use clinic_intake::routes::NEW_PATIENT_PATH;
use clinic_intake::session::memory::MemorySessionStore;
use clinic_intake::session::SessionStore;
use clinic_intake::store::PatientSummary;

use crate::common::{caller, engine, many_rows, summary, FakeStore, ScriptedClient};

const SID: &str = "s1";

fn turn(message: &str) -> Turn {
    Turn {
        message: message.to_owned(),
        prefill: Map::new(),
        reset: false,
        session_id: SID.to_owned(),
        caller: caller(),
    }
}

fn create(data: Value) -> String {
    json!({"action": "create", "type": "paciente", "data": data}).to_string()
}

fn search(term: &str) -> String {
    json!({"action": "search", "type": "paciente", "query": term}).to_string()
}

fn ask_fields(reply: &TurnReply) -> Vec<String> {
    match &reply.next {
        Some(NextStep::Ask { missing_fields, .. }) => missing_fields.clone(),
        other => panic!("expected ask, got {other:?}"),
    }
}

fn navigate_url(reply: &TurnReply) -> String {
    match &reply.next {
        Some(NextStep::Navigate { url, .. }) => url.clone(),
        other => panic!("expected navigate, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_name_asks_only_for_name() {
    let client = Arc::new(ScriptedClient::replying(&[&create(
        json!({"telefono": "555-123-4567"}),
    )]));
    let engine = engine(client, Arc::new(FakeStore::default()));
    let sessions = MemorySessionStore::new();

    let reply = engine
        .handle_turn(turn("su teléfono es 555-123-4567"), &sessions)
        .await
        .expect("turn");
    assert_eq!(ask_fields(&reply), vec!["nombre".to_owned()]);
    assert!(reply.response.contains("nombre completo"));

    let stored = sessions.get(SID).await.expect("get").expect("saved");
    assert_eq!(stored.draft.get("telefono"), "5551234567");
}

#[tokio::test]
async fn draft_accumulates_across_turns() {
    let client = Arc::new(ScriptedClient::replying(&[
        &create(json!({"telefono": "5551234567", "edad": 34, "sexo": "mujer"})),
        &create(json!({"nombre": "Ana López", "motivo_consulta": "migraña"})),
    ]));
    let engine = engine(client, Arc::new(FakeStore::default()));
    let sessions = MemorySessionStore::new();

    let first = engine
        .handle_turn(turn("mujer de 34, tel 5551234567"), &sessions)
        .await
        .expect("turn 1");
    assert_eq!(ask_fields(&first), vec!["nombre".to_owned()]);

    let second = engine
        .handle_turn(turn("se llama Ana López, viene por migraña"), &sessions)
        .await
        .expect("turn 2");
    assert_eq!(navigate_url(&second), NEW_PATIENT_PATH);
    match second.next {
        Some(NextStep::Navigate {
            prefill: Some(prefill),
            ..
        }) => {
            assert_eq!(prefill["nombre"], "Ana López");
            assert_eq!(prefill["telefono"], "5551234567");
            assert_eq!(prefill["sexo"], "F");
        }
        other => panic!("expected navigate with prefill, got {other:?}"),
    }

    // Kept so the creation form can still read it.
    assert!(sessions.get(SID).await.expect("get").is_some());
}

#[tokio::test]
async fn caller_prefill_is_merged_below_parsed_values() {
    let client = Arc::new(ScriptedClient::replying(&[&create(json!({
        "nombre": "Ana", "telefono": "5550000000", "edad": "30", "sexo": "F", "motivo_consulta": "control"
    }))]));
    let engine = engine(client, Arc::new(FakeStore::default()));
    let sessions = MemorySessionStore::new();

    let mut t = turn("Ana, 30 años");
    t.prefill = json!({"telefono": "5551111111", "alergias": "polen"})
        .as_object()
        .cloned()
        .expect("object");
    let reply = engine.handle_turn(t, &sessions).await.expect("turn");
    match reply.next {
        Some(NextStep::Navigate {
            prefill: Some(prefill),
            ..
        }) => {
            assert_eq!(prefill["telefono"], "5550000000");
            assert_eq!(prefill["alergias"], "polen");
        }
        other => panic!("expected navigate, got {other:?}"),
    }
}

#[tokio::test]
async fn tier_two_asks_then_proceed_phrase_unblocks() {
    let client = Arc::new(ScriptedClient::replying(&[
        &create(json!({
            "nombre": "Ana López",
            "telefono": "5551234567",
            "motivo_consulta": "dolor de cabeza",
            "alergias": "penicilina"
        })),
        &create(json!({})),
    ]));
    let engine = engine(client, Arc::new(FakeStore::default()));
    let sessions = MemorySessionStore::new();

    let first = engine
        .handle_turn(turn("registra a Ana López"), &sessions)
        .await
        .expect("turn 1");
    assert_eq!(
        ask_fields(&first),
        vec!["edad", "sexo", "fecha_consulta", "antecedentes", "embarazo"]
    );
    assert!(first.response.contains("Tengo: nombre completo: Ana López"));
    assert!(first.response.contains("crear con lo disponible"));

    let second = engine
        .handle_turn(turn("crear con lo disponible"), &sessions)
        .await
        .expect("turn 2");
    assert_eq!(navigate_url(&second), NEW_PATIENT_PATH);
}

#[tokio::test]
async fn invalid_phone_is_reported_and_cleared() {
    let client = Arc::new(ScriptedClient::replying(&[&create(
        json!({"nombre": "Ana", "telefono": "12345"}),
    )]));
    let engine = engine(client, Arc::new(FakeStore::default()));
    let sessions = MemorySessionStore::new();

    let reply = engine
        .handle_turn(turn("Ana, tel 12345"), &sessions)
        .await
        .expect("turn");
    assert_eq!(reply.response, "El teléfono debe tener 10 dígitos (se recibieron 5).");
    assert_eq!(ask_fields(&reply), vec!["telefono".to_owned()]);

    let stored = sessions.get(SID).await.expect("get").expect("saved");
    assert_eq!(stored.draft.get("telefono"), "");
    assert_eq!(stored.draft.get("nombre"), "Ana");
}

// ---------------------------------------------------------------------------
// Search and disambiguation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn search_with_no_rows_says_not_found() {
    let client = Arc::new(ScriptedClient::replying(&[&search("Zoe")]));
    let engine = engine(client, Arc::new(FakeStore::default()));
    let reply = engine
        .handle_turn(turn("busca a Zoe"), &MemorySessionStore::new())
        .await
        .expect("turn");
    assert!(reply.response.contains("No encontré"));
    assert!(reply.next.is_none());
}

#[tokio::test]
async fn search_with_one_row_navigates() {
    let client = Arc::new(ScriptedClient::replying(&[&search("Ana")]));
    let engine = engine(client, Arc::new(FakeStore::with_rows(many_rows(1))));
    let reply = engine
        .handle_turn(turn("abre a Ana"), &MemorySessionStore::new())
        .await
        .expect("turn");
    assert_eq!(navigate_url(&reply), "/pacientes/id-1");
}

#[tokio::test]
async fn search_with_three_rows_lists_all() {
    let client = Arc::new(ScriptedClient::replying(&[&search("Ana")]));
    let engine = engine(client, Arc::new(FakeStore::with_rows(many_rows(3))));
    let reply = engine
        .handle_turn(turn("busca a Ana"), &MemorySessionStore::new())
        .await
        .expect("turn");
    assert!(reply.response.contains("1. Ana 1"));
    assert!(reply.response.contains("3. Ana 3"));
    assert!(!reply.response.contains("más."));
    match reply.next {
        Some(NextStep::Ask { candidates, .. }) => assert_eq!(candidates.len(), 3),
        other => panic!("expected ask, got {other:?}"),
    }
}

#[tokio::test]
async fn search_with_ten_rows_caps_at_eight() {
    let client = Arc::new(ScriptedClient::replying(&[&search("Ana")]));
    let engine = engine(client, Arc::new(FakeStore::with_rows(many_rows(10))));
    let reply = engine
        .handle_turn(turn("busca a Ana"), &MemorySessionStore::new())
        .await
        .expect("turn");
    assert!(reply.response.contains("8. Ana 8"));
    assert!(!reply.response.contains("9. Ana 9"));
    assert!(reply.response.contains("+2 más."));
}

#[tokio::test]
async fn search_without_term_asks_for_name() {
    let client = Arc::new(ScriptedClient::replying(&[&search("")]));
    let engine = engine(client, Arc::new(FakeStore::with_rows(many_rows(3))));
    let reply = engine
        .handle_turn(turn("busca un paciente"), &MemorySessionStore::new())
        .await
        .expect("turn");
    assert_eq!(ask_fields(&reply), vec!["nombre".to_owned()]);
}

#[tokio::test]
async fn candidate_index_skips_completion() {
    let client = Arc::new(ScriptedClient::replying(&[&search("Ana")]));
    let engine = engine(Arc::clone(&client), Arc::new(FakeStore::with_rows(many_rows(10))));
    let sessions = MemorySessionStore::new();

    engine
        .handle_turn(turn("busca a Ana"), &sessions)
        .await
        .expect("search");
    let reply = engine
        .handle_turn(turn("el 2"), &sessions)
        .await
        .expect("pick");
    assert_eq!(navigate_url(&reply), "/pacientes/id-2");
    assert_eq!(client.calls(), 1);

    let stored = sessions.get(SID).await.expect("get").expect("state");
    assert!(stored.candidates.is_empty());
}

#[tokio::test]
async fn candidate_name_match_ignores_case_and_accents() {
    let client = Arc::new(ScriptedClient::replying(&[&search("Ana")]));
    let engine = engine(Arc::clone(&client), Arc::new(FakeStore::with_rows(many_rows(3))));
    let sessions = MemorySessionStore::new();

    engine
        .handle_turn(turn("busca a Ana"), &sessions)
        .await
        .expect("search");
    let reply = engine
        .handle_turn(turn("ÁNA 3"), &sessions)
        .await
        .expect("pick");
    assert_eq!(navigate_url(&reply), "/pacientes/id-3");
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn search_requires_authentication() {
    let client = Arc::new(ScriptedClient::replying(&[&search("Ana")]));
    let engine = engine(client, Arc::new(FakeStore::with_rows(many_rows(3))));
    let mut t = turn("busca a Ana");
    t.caller = None;
    let reply = engine
        .handle_turn(t, &MemorySessionStore::new())
        .await
        .expect("turn");
    assert!(reply.response.contains("iniciar sesión"));
}

#[tokio::test]
async fn datastore_failure_is_user_safe() {
    let client = Arc::new(ScriptedClient::replying(&[&search("Ana")]));
    let engine = engine(client, Arc::new(FakeStore::failing()));
    let reply = engine
        .handle_turn(turn("busca a Ana"), &MemorySessionStore::new())
        .await
        .expect("soft failure");
    assert!(reply.response.starts_with("No pude consultar los registros"));
    assert!(reply.next.is_none());
}

#[tokio::test]
async fn capped_search_reports_a_lower_bound() {
    let client = Arc::new(ScriptedClient::replying(&[&search("Ana")]));
    let engine = engine(client, Arc::new(FakeStore::with_rows(many_rows(250))));
    let reply = engine
        .handle_turn(turn("busca a Ana"), &MemorySessionStore::new())
        .await
        .expect("turn");
    assert!(reply.response.starts_with("Encontré al menos 200 pacientes"));
    assert!(reply.response.contains("+192 o más."));
}

// ---------------------------------------------------------------------------
// Candidate lifetime
// ---------------------------------------------------------------------------

/// Lists three candidates for "Ana", then sends `message`.
///
/// `replies` script the completions after the listing; the first one answers
/// `message` and its search, if any, returns `second_search`.
async fn after_listing(
    replies: &[String],
    second_search: Vec<PatientSummary>,
    message: &str,
) -> (Arc<ScriptedClient>, IntakeEngine, MemorySessionStore) {
    let mut script = vec![search("Ana")];
    script.extend_from_slice(replies);
    let client = Arc::new(ScriptedClient::replying(script.as_slice()));
    let store = FakeStore::with_searches(vec![many_rows(3), second_search]);
    let engine = engine(Arc::clone(&client), Arc::new(store));
    let sessions = MemorySessionStore::new();

    engine
        .handle_turn(turn("busca a Ana"), &sessions)
        .await
        .expect("listing");
    let listed = sessions.get(SID).await.expect("get").expect("state");
    assert_eq!(listed.candidates.len(), 3);

    engine
        .handle_turn(turn(message), &sessions)
        .await
        .expect("second turn");
    (client, engine, sessions)
}

async fn stored_candidates(sessions: &MemorySessionStore) -> usize {
    sessions
        .get(SID)
        .await
        .expect("get")
        .map_or(0, |state| state.candidates.len())
}

#[tokio::test]
async fn single_match_search_drops_earlier_candidates() {
    let replies = [
        search("Beto"),
        r#"{"action":"respond","type":"texto","message":"¿Dos qué?"}"#.to_owned(),
    ];
    let (client, engine, sessions) =
        after_listing(&replies, vec![summary("solo-1", "Beto")], "busca a Beto").await;
    assert_eq!(stored_candidates(&sessions).await, 0);

    let reply = engine
        .handle_turn(turn("2"), &sessions)
        .await
        .expect("third turn");
    assert_eq!(client.calls(), 3);
    assert_eq!(reply.response, "¿Dos qué?");
    assert!(reply.next.is_none());
}

#[tokio::test]
async fn empty_search_drops_earlier_candidates() {
    let (_, _, sessions) = after_listing(&[search("Zoe")], Vec::new(), "busca a Zoe").await;
    assert_eq!(stored_candidates(&sessions).await, 0);
}

#[tokio::test]
async fn navigation_drops_earlier_candidates() {
    let replies = [r#"{"action":"navigate","type":"ruta","target":"agenda"}"#.to_owned()];
    let (_, _, sessions) = after_listing(&replies, Vec::new(), "abre la agenda").await;
    assert_eq!(stored_candidates(&sessions).await, 0);
}

#[tokio::test]
async fn create_drops_earlier_candidates() {
    let (_, _, sessions) = after_listing(
        &[create(json!({"telefono": "5551234567"}))],
        Vec::new(),
        "registra un paciente con teléfono 5551234567",
    )
    .await;
    let stored = sessions.get(SID).await.expect("get").expect("draft kept");
    assert!(stored.candidates.is_empty());
    assert_eq!(stored.draft.get("telefono"), "5551234567");
}

// ---------------------------------------------------------------------------
// Query, navigate, respond
// ---------------------------------------------------------------------------

#[tokio::test]
async fn query_without_caller_asks_to_sign_in() {
    let client = Arc::new(ScriptedClient::replying(&[
        r#"{"action":"query","type":"paciente","filters":{"kind":"resumen"}}"#,
    ]));
    let engine = engine(client, Arc::new(FakeStore::with_rows(many_rows(3))));
    let mut t = turn("¿cuántos pacientes tengo?");
    t.caller = None;
    let reply = engine
        .handle_turn(t, &MemorySessionStore::new())
        .await
        .expect("turn");
    assert_eq!(
        reply.response,
        "Necesitas iniciar sesión para consultar tus pacientes."
    );
}

#[tokio::test]
async fn summary_and_recent_queries() {
    let client = Arc::new(ScriptedClient::replying(&[
        r#"{"action":"query","type":"paciente","filters":{"kind":"resumen"}}"#,
        r#"{"action":"query","type":"paciente","filters":{"kind":"recientes","limit":2}}"#,
        r#"{"action":"query","type":"paciente","filters":{"kind":"facturacion"}}"#,
    ]));
    let engine = engine(client, Arc::new(FakeStore::with_rows(many_rows(3))));
    let sessions = MemorySessionStore::new();

    let summary = engine
        .handle_turn(turn("resumen"), &sessions)
        .await
        .expect("summary");
    assert_eq!(summary.response, "Tienes 3 pacientes registrados (activo: 3).");

    let recent = engine
        .handle_turn(turn("últimos 2"), &sessions)
        .await
        .expect("recent");
    assert_eq!(
        recent.response,
        "Tus 2 pacientes más recientes:\n1. Ana 1\n2. Ana 2"
    );

    let other = engine
        .handle_turn(turn("facturación"), &sessions)
        .await
        .expect("unsupported");
    assert!(other.response.starts_with("Puedo darte un resumen"));
}

#[tokio::test]
async fn navigate_resolves_aliases() {
    let client = Arc::new(ScriptedClient::replying(&[
        r#"{"action":"navigate","type":"ruta","target":"calendario"}"#,
        r#"{"action":"navigate","type":"ruta","target":"facturas"}"#,
    ]));
    let engine = engine(client, Arc::new(FakeStore::default()));
    let sessions = MemorySessionStore::new();

    let reply = engine
        .handle_turn(turn("abre el calendario"), &sessions)
        .await
        .expect("turn");
    assert_eq!(navigate_url(&reply), "/agenda");

    let reply = engine
        .handle_turn(turn("ve a facturas"), &sessions)
        .await
        .expect("turn");
    assert!(reply.response.contains("No reconozco"));
    assert!(reply.next.is_none());
}

#[tokio::test]
async fn respond_passes_through() {
    let client = Arc::new(ScriptedClient::replying(&[
        r#"{"action":"respond","type":"texto","message":"La clínica abre a las 9."}"#,
    ]));
    let engine = engine(client, Arc::new(FakeStore::default()));
    let reply = engine
        .handle_turn(turn("¿a qué hora abren?"), &MemorySessionStore::new())
        .await
        .expect("turn");
    assert_eq!(reply.response, "La clínica abre a las 9.");
    assert!(reply.next.is_none());
}

// ---------------------------------------------------------------------------
// Failure and reset
// ---------------------------------------------------------------------------

#[tokio::test]
async fn garbage_output_gets_graceful_reply() {
    let client = Arc::new(ScriptedClient::replying(&[
        "Lo siento, no entiendo.",
        r#"{"action":"delete","type":"paciente"}"#,
    ]));
    let engine = engine(client, Arc::new(FakeStore::default()));
    let sessions = MemorySessionStore::new();

    for message in ["asdf", "elimina al paciente"] {
        let reply = engine
            .handle_turn(turn(message), &sessions)
            .await
            .expect("never an error");
        assert_eq!(reply.response, NOT_UNDERSTOOD);
    }
}

#[tokio::test]
async fn transport_failure_surfaces_as_upstream_error() {
    let client = Arc::new(ScriptedClient::new(vec![Err(CompletionError::HttpStatus {
        status: 500,
        body: "boom".to_owned(),
    })]));
    let engine = engine(client, Arc::new(FakeStore::default()));
    let result = engine
        .handle_turn(turn("hola"), &MemorySessionStore::new())
        .await;
    assert!(matches!(
        result,
        Err(TurnError::Upstream(CompletionError::HttpStatus { status: 500, .. }))
    ));
}

#[tokio::test]
async fn reset_phrase_clears_without_completion() {
    let client = Arc::new(ScriptedClient::replying(&[&create(
        json!({"telefono": "5551234567"}),
    )]));
    let engine = engine(Arc::clone(&client), Arc::new(FakeStore::default()));
    let sessions = MemorySessionStore::new();

    engine
        .handle_turn(turn("tel 5551234567"), &sessions)
        .await
        .expect("turn");
    assert!(sessions.get(SID).await.expect("get").is_some());

    engine
        .handle_turn(turn("Cancelar"), &sessions)
        .await
        .expect("reset");
    assert!(sessions.get(SID).await.expect("get").is_none());
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn reset_flag_clears_without_completion() {
    let client = Arc::new(ScriptedClient::new(Vec::new()));
    let engine = engine(Arc::clone(&client), Arc::new(FakeStore::default()));
    let mut t = turn("empezar de nuevo");
    t.reset = true;
    engine
        .handle_turn(t, &MemorySessionStore::new())
        .await
        .expect("reset");
    assert_eq!(client.calls(), 0);
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_requires_caller_and_valid_fields() {
    let store = Arc::new(FakeStore::default());
    let engine = engine(Arc::new(ScriptedClient::new(Vec::new())), Arc::clone(&store));
    let sessions = MemorySessionStore::new();

    let values = json!({"nombre": "Ana"}).as_object().cloned().expect("object");
    let unauth = engine.submit(&values, None, SID, &sessions).await;
    assert!(matches!(unauth, Err(SubmitError::Unauthenticated)));

    let bad = json!({"telefono": "12345"}).as_object().cloned().expect("object");
    match engine.submit(&bad, caller().as_ref(), SID, &sessions).await {
        Err(SubmitError::Invalid(problems)) => {
            let fields: Vec<&str> = problems.iter().map(|p| p.field.as_str()).collect();
            assert_eq!(fields, vec!["nombre", "telefono"]);
        }
        other => panic!("expected validation failure, got {other:?}"),
    }
    assert!(store.inserted.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn submit_inserts_and_clears_session() {
    let client = Arc::new(ScriptedClient::replying(&[&create(
        json!({"nombre": "Ana", "telefono": "5551234567"}),
    )]));
    let store = Arc::new(FakeStore::default());
    let engine = engine(client, Arc::clone(&store));
    let sessions = MemorySessionStore::new();

    engine
        .handle_turn(turn("Ana, tel 5551234567"), &sessions)
        .await
        .expect("turn");
    assert!(sessions.get(SID).await.expect("get").is_some());

    let values = json!({"nombre": "Ana", "telefono": "555 123 4567"})
        .as_object()
        .cloned()
        .expect("object");
    let created = engine
        .submit(&values, caller().as_ref(), SID, &sessions)
        .await
        .expect("created");
    assert_eq!(created.id, "p-1");
    assert_eq!(created.url, "/pacientes/p-1");
    assert!(sessions.get(SID).await.expect("get").is_none());

    let inserted = store.inserted.lock().expect("lock");
    assert_eq!(inserted.len(), 1);
    assert_eq!(inserted[0].0, "doctor-1");
    assert_eq!(inserted[0].1.get("telefono"), "5551234567");
}
