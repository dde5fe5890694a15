//! Completion output → [`Action`].
//!
//! Decoding is strict JSON. The only leniency is removing one surrounding
//! Markdown code fence, which generators add often enough to matter.
//! Valid JSON with an unmapped `(action, type)` pair becomes
//! [`Action::Unknown`], never an error.

use serde_json::{Map, Value};

/// Entity types the intake flow understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    /// A patient record.
    Patient,
}

impl EntityType {
    /// Parse a lowercase `type` discriminator.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "paciente" | "pacientes" | "patient" | "patients" => Some(Self::Patient),
            _ => None,
        }
    }

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "paciente",
        }
    }
}

/// Sub-type and bounds of a read-only query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryFilters {
    /// Requested sub-type, lowercased (e.g. `resumen`, `recientes`).
    pub kind: String,
    /// Optional row limit.
    pub limit: Option<usize>,
}

/// One interpreted user turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Start or continue building an entity.
    Create {
        /// Entity being created.
        entity: EntityType,
        /// Raw field values, not yet normalized.
        data: Map<String, Value>,
    },
    /// Go to a logical destination.
    Navigate {
        /// Requested destination key or alias.
        destination: String,
    },
    /// Find existing records by name.
    Search {
        /// Entity searched.
        entity: EntityType,
        /// Search term, possibly empty.
        term: String,
    },
    /// Listing or aggregate query.
    Query {
        /// Entity queried.
        entity: EntityType,
        /// Sub-type and bounds.
        filters: QueryFilters,
    },
    /// Plain textual answer.
    Respond {
        /// Text to return.
        message: String,
    },
    /// Valid JSON that matches no known action shape.
    Unknown {
        /// The decoded payload.
        raw: Value,
    },
}

impl Action {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Navigate { .. } => "navigate",
            Self::Search { .. } => "search",
            Self::Query { .. } => "query",
            Self::Respond { .. } => "respond",
            Self::Unknown { .. } => "unknown",
        }
    }
}

/// Completion output that is not a JSON object.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Output was not valid JSON.
    #[error("completion output is not valid JSON: {0}")]
    NotJson(String),
    /// Output was JSON but not an object.
    #[error("completion output is not a JSON object")]
    NotObject,
}

/// Decode completion output into an [`Action`].
///
/// # Errors
///
/// Returns [`ParseError`] when the text is not a single JSON object.
pub fn parse(raw: &str) -> Result<Action, ParseError> {
    let body = strip_code_fence(raw);
    let value: Value =
        serde_json::from_str(body).map_err(|e| ParseError::NotJson(e.to_string()))?;
    let Value::Object(obj) = &value else {
        return Err(ParseError::NotObject);
    };

    let action = discriminator(obj, "action");
    let kind = discriminator(obj, "type");

    let parsed = match (action.as_str(), kind.as_str()) {
        ("create", t) => EntityType::parse(t).map(|entity| Action::Create {
            entity,
            data: create_data(obj),
        }),
        ("navigate", "" | "ruta" | "route" | "pagina" | "page") => {
            first_str(obj, &["target", "destination", "route"]).map(|destination| {
                Action::Navigate { destination }
            })
        }
        ("search", t) => EntityType::parse(t).map(|entity| Action::Search {
            entity,
            term: first_str(obj, &["query", "term", "nombre"]).unwrap_or_default(),
        }),
        ("query", t) => EntityType::parse(t).map(|entity| Action::Query {
            entity,
            filters: query_filters(obj),
        }),
        ("respond", "" | "texto" | "text" | "mensaje" | "message") => {
            first_str(obj, &["message", "response", "text"]).map(|message| Action::Respond {
                message,
            })
        }
        _ => None,
    };

    Ok(parsed.unwrap_or_else(|| Action::Unknown { raw: value.clone() }))
}

/// Remove one surrounding ```` ``` ```` / ```` ```json ```` fence, if present.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    match inner.split_once('\n') {
        Some((info, body)) if !info.trim_start().starts_with('{') => body.trim(),
        _ => inner.trim(),
    }
}

fn discriminator(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default()
}

fn first_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(|s| s.trim().to_owned())
}

fn create_data(obj: &Map<String, Value>) -> Map<String, Value> {
    match obj.get("data").or_else(|| obj.get("fields")) {
        Some(Value::Object(data)) => data.clone(),
        _ => Map::new(),
    }
}

fn query_filters(obj: &Map<String, Value>) -> QueryFilters {
    let source = match obj.get("filters") {
        Some(Value::Object(filters)) => filters,
        _ => obj,
    };
    let kind = first_str(source, &["kind", "filter", "subtype"])
        .map(|s| s.to_lowercase())
        .unwrap_or_default();
    let limit = source
        .get("limit")
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok());
    QueryFilters { kind, limit }
}
