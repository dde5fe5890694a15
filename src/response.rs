//! Reply shapes and user-facing text.
//!
//! Every turn ends in an [`Outcome`]: the JSON body for the caller plus the
//! [`SessionMutation`] the engine applies before returning.

use serde::Serialize;
use serde_json::Value;

use crate::draft::EntityDraft;
use crate::resolver::Resolution;
use crate::schema::FieldSchema;
use crate::session::{SearchCandidate, SessionState};
use crate::store::{PatientSummary, SummaryStats};

/// Candidates shown before the remainder note.
pub const CANDIDATE_DISPLAY_CAP: usize = 8;

/// Reply for a message that could not be interpreted.
pub const NOT_UNDERSTOOD: &str =
    "No pude interpretar tu mensaje. ¿Puedes reformularlo? Por ejemplo: \"registrar a Ana López, 34 años\".";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Machine-readable next step for the caller's UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum NextStep {
    /// The caller should collect more input.
    Ask {
        /// Fields being asked for.
        #[serde(skip_serializing_if = "Vec::is_empty")]
        missing_fields: Vec<String>,
        /// Current draft.
        prefill: Value,
        /// Search candidates to disambiguate against.
        #[serde(skip_serializing_if = "Vec::is_empty")]
        candidates: Vec<SearchCandidate>,
    },
    /// The caller should navigate.
    Navigate {
        /// Target path.
        url: String,
        /// Draft to prefill the target form with.
        #[serde(skip_serializing_if = "Option::is_none")]
        prefill: Option<Value>,
    },
}

/// Response body of the intake endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnReply {
    /// Text for the user.
    pub response: String,
    /// Optional directive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<NextStep>,
}

/// What to do with the session after the turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMutation {
    /// Leave stored state untouched.
    Keep,
    /// Overwrite stored state.
    Save(SessionState),
    /// Delete stored state.
    Clear,
}

/// Result of one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Body returned to the caller.
    pub reply: TurnReply,
    /// Session write applied by the engine.
    pub mutation: SessionMutation,
}

impl Outcome {
    /// Plain text, no directive.
    pub fn respond(text: impl Into<String>, mutation: SessionMutation) -> Self {
        Self {
            reply: TurnReply {
                response: text.into(),
                next: None,
            },
            mutation,
        }
    }

    /// Text plus an `ask` directive.
    pub fn ask(
        text: impl Into<String>,
        missing_fields: Vec<String>,
        draft: &EntityDraft,
        candidates: Vec<SearchCandidate>,
        mutation: SessionMutation,
    ) -> Self {
        Self {
            reply: TurnReply {
                response: text.into(),
                next: Some(NextStep::Ask {
                    missing_fields,
                    prefill: draft.to_json(),
                    candidates,
                }),
            },
            mutation,
        }
    }

    /// Text plus a `navigate` directive.
    pub fn navigate(
        text: impl Into<String>,
        url: impl Into<String>,
        prefill: Option<&EntityDraft>,
        mutation: SessionMutation,
    ) -> Self {
        Self {
            reply: TurnReply {
                response: text.into(),
                next: Some(NextStep::Navigate {
                    url: url.into(),
                    prefill: prefill.map(EntityDraft::to_json),
                }),
            },
            mutation,
        }
    }
}

// ---------------------------------------------------------------------------
// Text rendering
// ---------------------------------------------------------------------------

fn labels(schema: &FieldSchema, names: &[String]) -> String {
    names
        .iter()
        .map(|n| schema.get(n).map_or(n.as_str(), |f| f.label.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Question naming only the missing required field(s).
pub fn ask_required_text(schema: &FieldSchema, missing: &[String]) -> String {
    format!(
        "Para registrar al paciente necesito: {}. ¿Me lo indicas?",
        labels(schema, missing)
    )
}

/// Consolidated question: what is present, what is important, what else.
pub fn ask_more_text(schema: &FieldSchema, draft: &EntityDraft, resolution: &Resolution) -> String {
    let present = schema
        .fields()
        .iter()
        .filter(|f| draft.is_present(&f.name))
        .map(|f| format!("{}: {}", f.label, draft.get(&f.name)))
        .collect::<Vec<_>>();

    let mut parts = Vec::new();
    if present.is_empty() {
        parts.push("Aún no tengo datos del paciente.".to_owned());
    } else {
        parts.push(format!("Tengo: {}.", present.join("; ")));
    }
    if !resolution.missing_important.is_empty() {
        parts.push(format!(
            "Faltan datos importantes: {}.",
            labels(schema, &resolution.missing_important)
        ));
    }
    let remaining: Vec<String> = resolution
        .missing_required
        .iter()
        .chain(&resolution.missing_other)
        .cloned()
        .collect();
    if !remaining.is_empty() {
        parts.push(format!("También faltan: {}.", labels(schema, &remaining)));
    }
    parts.push(
        "Puedes enviarlos o decir \"crear con lo disponible\" para continuar.".to_owned(),
    );
    parts.join(" ")
}

/// Enumerated candidate list, capped at [`CANDIDATE_DISPLAY_CAP`].
///
/// `truncated` means the search hit its row limit, so `rows.len()` is a
/// lower bound rather than the real match count.
pub fn candidate_list_text(term: &str, rows: &[PatientSummary], truncated: bool) -> String {
    let qualifier = if truncated { "al menos " } else { "" };
    let mut lines = vec![format!(
        "Encontré {qualifier}{} pacientes que coinciden con \"{term}\":",
        rows.len()
    )];
    for (pos, row) in rows.iter().take(CANDIDATE_DISPLAY_CAP).enumerate() {
        lines.push(format!("{}. {}", pos.saturating_add(1), describe(row)));
    }
    let remainder = rows.len().saturating_sub(CANDIDATE_DISPLAY_CAP);
    if remainder > 0 {
        let suffix = if truncated { " o más" } else { " más" };
        lines.push(format!("+{remainder}{suffix}."));
    }
    lines.push("Responde con el número o el nombre completo.".to_owned());
    lines.join("\n")
}

/// Aggregate counts as a sentence.
pub fn stats_text(stats: &SummaryStats) -> String {
    if stats.total == 0 {
        return "Todavía no tienes pacientes registrados.".to_owned();
    }
    let breakdown = stats
        .per_status
        .iter()
        .map(|(status, count)| format!("{status}: {count}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Tienes {} pacientes registrados ({breakdown}).",
        stats.total
    )
}

/// Recent records as an enumerated list.
pub fn recent_text(rows: &[PatientSummary]) -> String {
    if rows.is_empty() {
        return "Todavía no tienes pacientes registrados.".to_owned();
    }
    let mut lines = vec![format!("Tus {} pacientes más recientes:", rows.len())];
    for (pos, row) in rows.iter().enumerate() {
        lines.push(format!("{}. {}", pos.saturating_add(1), describe(row)));
    }
    lines.join("\n")
}

fn describe(row: &PatientSummary) -> String {
    let mut extras = Vec::new();
    if !row.edad.is_empty() {
        extras.push(format!("{} años", row.edad));
    }
    if !row.telefono.is_empty() {
        extras.push(format!("tel. {}", row.telefono));
    }
    if extras.is_empty() {
        row.nombre.clone()
    } else {
        format!("{} ({})", row.nombre, extras.join(", "))
    }
}
