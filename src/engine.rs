//! The intake state machine.
//!
//! One call to [`IntakeEngine::handle_turn`] processes one user message:
//! load session → (reset | disambiguate | complete → parse) → dispatch on
//! [`Action`] → build [`Outcome`] → apply the session mutation.
//!
//! Everything that goes wrong below this layer becomes a textual reply,
//! except a completion-service failure, which surfaces as
//! [`TurnError::Upstream`] so the HTTP layer can answer 502.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::draft::{merge, EntityDraft};
use crate::intent::{self, Action, QueryFilters};
use crate::normalize::{fold, validate_draft, ValidationError};
use crate::prompt::PromptComposer;
use crate::providers::{CompletionClient, CompletionError};
use crate::query::{QueryError, QueryExecutor, DEFAULT_RECENT_LIMIT, MAX_SEARCH_ROWS};
use crate::resolver::{resolve, Decision, PhraseProceedDetector, ProceedDetector, ResolverPolicy};
use crate::response::{
    ask_more_text, ask_required_text, candidate_list_text, recent_text, stats_text, Outcome,
    SessionMutation, TurnReply, NOT_UNDERSTOOD,
};
use crate::routes::{RouteTable, NEW_PATIENT_PATH};
use crate::schema::FieldSchema;
use crate::session::{SearchCandidate, SessionError, SessionState, SessionStore, DEFAULT_SESSION_TTL};
use crate::store::{CallerId, PatientStore, StoreError};

const RESET_PATTERN: &str = r"\b(limpiar|reiniciar|borrar|cancelar)\b";
const PICK_PATTERN: &str = r"^(?:#|el |la |numero |opcion )?\s*(\d{1,3})\.?$";

/// Most candidates remembered for disambiguation.
const MAX_STORED_CANDIDATES: usize = 50;

/// Largest listing a query may ask for.
const MAX_RECENT_LIMIT: usize = 50;

// ---------------------------------------------------------------------------
// Inputs, settings, errors
// ---------------------------------------------------------------------------

/// One inbound user turn.
#[derive(Debug, Clone, Default)]
pub struct Turn {
    /// Raw user text.
    pub message: String,
    /// Caller-supplied field values.
    pub prefill: Map<String, Value>,
    /// Explicit reset flag.
    pub reset: bool,
    /// Session key (ignored by the cookie backend).
    pub session_id: String,
    /// Authenticated identity, when the caller has one.
    pub caller: Option<CallerId>,
}

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Missing-field thresholds.
    pub policy: ResolverPolicy,
    /// Required phone length after normalization.
    pub phone_digits: usize,
    /// Session lifetime.
    pub session_ttl: Duration,
    /// Longest user message embedded in a prompt.
    pub max_message_chars: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            policy: ResolverPolicy::default(),
            phone_digits: 10,
            session_ttl: DEFAULT_SESSION_TTL,
            max_message_chars: 4000,
        }
    }
}

/// Turn failures that escape as HTTP errors.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    /// The completion service failed.
    #[error(transparent)]
    Upstream(#[from] CompletionError),
}

/// Failures of the record-creation endpoint.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// No authenticated caller.
    #[error("authentication required")]
    Unauthenticated,
    /// One or more fields failed validation.
    #[error("draft failed validation")]
    Invalid(Vec<ValidationError>),
    /// Datastore failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A record created from a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// New record id.
    pub id: String,
    /// Path of the new record.
    pub url: String,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Intent dispatch and multi-turn state accumulation.
pub struct IntakeEngine {
    schema: Arc<FieldSchema>,
    routes: Arc<RouteTable>,
    composer: PromptComposer,
    completion: Arc<dyn CompletionClient>,
    store: Arc<dyn PatientStore>,
    queries: QueryExecutor,
    proceed: Arc<dyn ProceedDetector>,
    settings: EngineSettings,
    reset_pattern: Regex,
    pick_pattern: Regex,
}

impl IntakeEngine {
    /// Wire the engine. The prompt composer is derived from `schema` and `routes`.
    ///
    /// # Errors
    ///
    /// Returns a regex error only if a built-in pattern is invalid.
    pub fn new(
        schema: Arc<FieldSchema>,
        routes: Arc<RouteTable>,
        completion: Arc<dyn CompletionClient>,
        store: Arc<dyn PatientStore>,
        settings: EngineSettings,
    ) -> Result<Self, regex::Error> {
        let composer = PromptComposer::new(&schema, routes.keys(), settings.max_message_chars);
        Ok(Self {
            queries: QueryExecutor::new(Arc::clone(&store)),
            schema,
            routes,
            composer,
            completion,
            store,
            proceed: Arc::new(PhraseProceedDetector::new()?),
            settings,
            reset_pattern: Regex::new(RESET_PATTERN)?,
            pick_pattern: Regex::new(PICK_PATTERN)?,
        })
    }

    /// Replace the proceed-anyway predicate.
    pub fn with_proceed_detector(mut self, detector: Arc<dyn ProceedDetector>) -> Self {
        self.proceed = detector;
        self
    }

    /// Replace the prompt composer.
    pub fn with_composer(mut self, composer: PromptComposer) -> Self {
        self.composer = composer;
        self
    }

    /// The schema drafts are built against.
    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    /// Process one turn and persist the resulting session state.
    ///
    /// # Errors
    ///
    /// Returns [`TurnError::Upstream`] when the completion service fails.
    pub async fn handle_turn(
        &self,
        turn: Turn,
        sessions: &dyn SessionStore,
    ) -> Result<TurnReply, TurnError> {
        let outcome = self.route(&turn, sessions).await?;
        self.apply(&turn.session_id, outcome.mutation, sessions).await;
        Ok(outcome.reply)
    }

    async fn route(&self, turn: &Turn, sessions: &dyn SessionStore) -> Result<Outcome, TurnError> {
        let folded = fold(&turn.message);
        if turn.reset || self.reset_pattern.is_match(&folded) {
            info!(session_id = %turn.session_id, "session reset");
            return Ok(Outcome::respond(
                "Listo, borré los datos capturados. ¿Con qué empezamos?",
                SessionMutation::Clear,
            ));
        }

        let mut state = self.load(&turn.session_id, sessions).await;

        if let Some(picked) = self.pick_candidate(&folded, &state.candidates) {
            debug!(session_id = %turn.session_id, "candidate picked without completion");
            let url = patient_url(&picked.id);
            let mut next = state.clone();
            next.candidates.clear();
            return Ok(Outcome::navigate(
                format!("Abriendo el expediente de {}.", picked.nombre),
                url,
                None,
                SessionMutation::Save(next),
            ));
        }

        let prompt = self.composer.compose(&turn.message);
        let raw = match self.completion.complete(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    model = self.completion.model_id(),
                    error = %e,
                    "completion service failed"
                );
                return Err(e.into());
            }
        };

        // Candidates answer only the turn right after the search that listed them.
        let had_candidates = !std::mem::take(&mut state.candidates).is_empty();

        let action = match intent::parse(&raw) {
            Ok(action) => action,
            Err(e) => {
                info!(error = %e, "completion output not parseable");
                return Ok(forget_candidates(
                    Outcome::respond(NOT_UNDERSTOOD, persist(state)),
                    had_candidates,
                ));
            }
        };
        info!(session_id = %turn.session_id, action = action.label(), "intent parsed");

        let outcome = match action {
            Action::Create { data, .. } => self.on_create(turn, state, &data),
            Action::Navigate { destination } => self.on_navigate(&destination, state),
            Action::Search { term, .. } => self.on_search(turn, state, &term).await,
            Action::Query { filters, .. } => self.on_query(turn, state, &filters).await,
            Action::Respond { message } if !message.trim().is_empty() => {
                Outcome::respond(message, persist(state))
            }
            Action::Respond { .. } | Action::Unknown { .. } => {
                Outcome::respond(NOT_UNDERSTOOD, persist(state))
            }
        };
        Ok(forget_candidates(outcome, had_candidates))
    }

    // -- branches ----------------------------------------------------------

    fn on_create(&self, turn: &Turn, state: SessionState, data: &Map<String, Value>) -> Outcome {
        let parsed = EntityDraft::from_values(&self.schema, data);
        let prefill = EntityDraft::from_values(&self.schema, &turn.prefill);
        let mut draft = merge(&self.schema, &state.draft, &prefill, &parsed);

        let invalid = validate_draft(&self.schema, &draft, self.settings.phone_digits);
        let mut next = SessionState {
            draft: draft.clone(),
            candidates: Vec::new(),
            version: state.version,
        };

        if !invalid.is_empty() {
            for err in &invalid {
                draft.set(&err.field, String::new());
            }
            next.draft = draft.clone();
            let fields = invalid.iter().map(|e| e.field.clone()).collect();
            let text = invalid
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            return Outcome::ask(text, fields, &draft, Vec::new(), SessionMutation::Save(next));
        }

        let proceed = self.proceed.looks_like_proceed_intent(&turn.message);
        let resolution = resolve(&draft, &self.schema, &self.settings.policy, proceed);
        debug!(
            missing_required = resolution.missing_required.len(),
            missing_important = resolution.missing_important.len(),
            missing_total = resolution.total_missing(),
            proceed,
            "missing fields resolved"
        );

        match resolution.decision {
            Decision::AskRequired => Outcome::ask(
                ask_required_text(&self.schema, &resolution.missing_required),
                resolution.missing_required.clone(),
                &draft,
                Vec::new(),
                SessionMutation::Save(next),
            ),
            Decision::AskMore => Outcome::ask(
                ask_more_text(&self.schema, &draft, &resolution),
                resolution.all_missing(),
                &draft,
                Vec::new(),
                SessionMutation::Save(next),
            ),
            Decision::Proceed => Outcome::navigate(
                "Listo, abro el formulario de registro con los datos capturados.",
                NEW_PATIENT_PATH,
                Some(&draft),
                SessionMutation::Save(next),
            ),
        }
    }

    fn on_navigate(&self, destination: &str, state: SessionState) -> Outcome {
        match self.routes.resolve(destination) {
            Some(route) => Outcome::navigate(
                format!("Te llevo a {}.", route.key),
                route.path.clone(),
                None,
                persist(state),
            ),
            None => {
                let known = self.routes.keys().collect::<Vec<_>>().join(", ");
                Outcome::respond(
                    format!("No reconozco la sección \"{destination}\". Puedo llevarte a: {known}."),
                    persist(state),
                )
            }
        }
    }

    async fn on_search(&self, turn: &Turn, state: SessionState, term: &str) -> Outcome {
        let term = term.trim();
        if term.is_empty() {
            let draft = state.draft.clone();
            return Outcome::ask(
                "¿Qué nombre quieres buscar?",
                vec!["nombre".to_owned()],
                &draft,
                Vec::new(),
                persist(state),
            );
        }

        let rows = match self.queries.search_by_name(turn.caller.as_ref(), term).await {
            Ok(rows) => rows,
            Err(e) => return Outcome::respond(e.user_message(), persist(state)),
        };

        match rows.as_slice() {
            [] => Outcome::respond(
                format!("No encontré pacientes que coincidan con \"{term}\"."),
                persist(state),
            ),
            [only] => Outcome::navigate(
                format!("Abriendo el expediente de {}.", only.nombre),
                patient_url(&only.id),
                None,
                persist(state),
            ),
            many => {
                let candidates: Vec<SearchCandidate> = many
                    .iter()
                    .take(MAX_STORED_CANDIDATES)
                    .map(|r| SearchCandidate {
                        id: r.id.clone(),
                        nombre: r.nombre.clone(),
                    })
                    .collect();
                let mut next = state;
                next.candidates = candidates.clone();
                let draft = next.draft.clone();
                Outcome::ask(
                    candidate_list_text(term, many, many.len() >= MAX_SEARCH_ROWS),
                    Vec::new(),
                    &draft,
                    candidates,
                    SessionMutation::Save(next),
                )
            }
        }
    }

    async fn on_query(&self, turn: &Turn, state: SessionState, filters: &QueryFilters) -> Outcome {
        let caller = turn.caller.as_ref();
        if caller.is_none() {
            return Outcome::respond(QueryError::Unauthenticated.user_message(), persist(state));
        }

        let text = match fold(&filters.kind).as_str() {
            "resumen" | "summary" | "stats" | "estadisticas" | "conteo" | "total" => {
                self.queries.summary_stats(caller).await.map(|s| stats_text(&s))
            }
            "recientes" | "recent" | "ultimos" | "listado" | "lista" => {
                let limit = filters
                    .limit
                    .unwrap_or(DEFAULT_RECENT_LIMIT)
                    .clamp(1, MAX_RECENT_LIMIT);
                self.queries
                    .recent_listing(caller, limit)
                    .await
                    .map(|rows| recent_text(&rows))
            }
            _ => Ok(
                "Puedo darte un resumen de tus pacientes o listar los más recientes.".to_owned(),
            ),
        };

        Outcome::respond(text.unwrap_or_else(|e| e.user_message()), persist(state))
    }

    // -- record creation surface -----------------------------------------

    /// Validate and store a draft submitted by the creation form, then clear
    /// the caller's session.
    ///
    /// The required fields are a hard floor here regardless of policy.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError`] on missing auth, invalid fields, or datastore failure.
    pub async fn submit(
        &self,
        values: &Map<String, Value>,
        caller: Option<&CallerId>,
        session_id: &str,
        sessions: &dyn SessionStore,
    ) -> Result<Submission, SubmitError> {
        let owner = caller.ok_or(SubmitError::Unauthenticated)?;
        let draft = EntityDraft::from_values(&self.schema, values);

        let mut problems: Vec<ValidationError> = self
            .schema
            .fields()
            .iter()
            .filter(|f| f.required && !draft.is_present(&f.name))
            .map(|f| ValidationError {
                field: f.name.clone(),
                message: format!("El campo {} es obligatorio.", f.label),
            })
            .collect();
        problems.extend(validate_draft(&self.schema, &draft, self.settings.phone_digits));
        if !problems.is_empty() {
            return Err(SubmitError::Invalid(problems));
        }

        let id = self.store.insert(owner, &draft).await?;
        info!(patient_id = %id, "patient created from draft");
        self.apply(session_id, SessionMutation::Clear, sessions).await;
        Ok(Submission {
            url: patient_url(&id),
            id,
        })
    }

    // -- session helpers ---------------------------------------------------

    async fn load(&self, session_id: &str, sessions: &dyn SessionStore) -> SessionState {
        let mut state = match sessions.get(session_id).await {
            Ok(Some(state)) => state,
            Ok(None) => SessionState::default(),
            Err(e) => {
                warn!(session_id, error = %e, "session load failed, starting fresh");
                SessionState::default()
            }
        };
        state.draft = state.draft.conform(&self.schema);
        state
    }

    async fn apply(&self, session_id: &str, mutation: SessionMutation, sessions: &dyn SessionStore) {
        let result = match &mutation {
            SessionMutation::Keep => Ok(()),
            SessionMutation::Save(state) => {
                sessions
                    .set(session_id, state, self.settings.session_ttl)
                    .await
            }
            SessionMutation::Clear => sessions.clear(session_id).await,
        };
        match result {
            Ok(()) => {}
            Err(SessionError::Conflict { expected, .. }) => {
                warn!(session_id, expected, "concurrent session update, keeping newer state");
            }
            Err(e) => warn!(session_id, error = %e, "session write failed"),
        }
    }

    fn pick_candidate<'a>(
        &self,
        folded: &str,
        candidates: &'a [SearchCandidate],
    ) -> Option<&'a SearchCandidate> {
        if candidates.is_empty() {
            return None;
        }
        if let Some(caps) = self.pick_pattern.captures(folded) {
            let index = caps.get(1)?.as_str().parse::<usize>().ok()?;
            return candidates.get(index.checked_sub(1)?);
        }
        candidates.iter().find(|c| fold(&c.nombre) == folded)
    }
}

/// Path of a stored patient record.
pub fn patient_url(id: &str) -> String {
    format!("/pacientes/{id}")
}

/// Rewrite non-empty state (refreshing its TTL); leave empty state alone.
fn persist(state: SessionState) -> SessionMutation {
    if state.draft.is_blank() && state.candidates.is_empty() {
        SessionMutation::Keep
    } else {
        SessionMutation::Save(state)
    }
}

/// A turn that did not use the stored candidates must not leave them behind.
///
/// Branches see state with candidates already taken; when that leaves nothing
/// worth saving, the stale record is deleted instead of kept.
fn forget_candidates(mut outcome: Outcome, had_candidates: bool) -> Outcome {
    if had_candidates && outcome.mutation == SessionMutation::Keep {
        outcome.mutation = SessionMutation::Clear;
    }
    outcome
}
