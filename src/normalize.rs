//! Total normalization of raw field values.
//!
//! Every function here returns a canonical `String` and never fails; the
//! worst case is an empty string, which the rest of the crate treats as
//! "absent". All rules are idempotent: `normalize(normalize(x)) == normalize(x)`.

use serde_json::Value;

use crate::draft::EntityDraft;
use crate::schema::{FieldKind, FieldSchema};

/// Tokens accepted as boolean `true` (compared after accent folding).
const TRUTHY: &[&str] = &["true", "1", "si", "yes", "verdadero"];

/// Literal meaning "today" that date fields keep unresolved.
pub const TODAY_LITERAL: &str = "hoy";

/// Canonical separator for list-like text fields.
pub const LIST_SEPARATOR: &str = ", ";

/// Normalize a structured JSON value according to `kind`.
pub fn normalize_value(kind: FieldKind, raw: &Value) -> String {
    match raw {
        Value::Null => String::new(),
        Value::String(s) => normalize_str(kind, s),
        Value::Bool(b) => match kind {
            FieldKind::Boolean => b.to_string(),
            _ => normalize_str(kind, &b.to_string()),
        },
        Value::Number(n) => {
            let text = match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => i.to_string(),
                (None, Some(f)) if f.is_finite() && kind == FieldKind::Integer => {
                    format!("{}", f.trunc())
                }
                _ => n.to_string(),
            };
            normalize_str(kind, &text)
        }
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(scalar_text)
                .collect::<Vec<_>>()
                .join(",");
            normalize_str(kind, &joined)
        }
        Value::Object(_) => normalize_str(kind, &raw.to_string()),
    }
}

/// Normalize a plain string according to `kind`.
pub fn normalize_str(kind: FieldKind, raw: &str) -> String {
    match kind {
        FieldKind::Text => normalize_text(raw),
        FieldKind::Integer => normalize_integer(raw),
        FieldKind::Phone => normalize_phone(raw),
        FieldKind::Boolean => normalize_bool(raw),
        FieldKind::EnumText => normalize_enum(raw),
        FieldKind::List => normalize_list(raw),
        FieldKind::Date => normalize_date(raw),
    }
}

/// Trim surrounding whitespace.
pub fn normalize_text(raw: &str) -> String {
    raw.trim().to_owned()
}

/// Keep digits and minus signs, then parse as `i64`.
///
/// A decimal part (`"34.5"`, `"34,5"`) is dropped before stripping so it
/// does not get glued onto the integer part.
pub fn normalize_integer(raw: &str) -> String {
    let integral = raw
        .trim()
        .split(['.', ','])
        .next()
        .unwrap_or_default();
    let kept: String = integral
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    kept.parse::<i64>()
        .map(|n| n.to_string())
        .unwrap_or_default()
}

/// Keep ASCII digits only. Length is checked separately by [`validate_phone`].
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Map truthy tokens to `"true"`, anything else non-empty to `"false"`.
///
/// An empty input stays empty so an unanswered boolean is still "absent".
pub fn normalize_bool(raw: &str) -> String {
    let folded = fold(raw);
    if folded.is_empty() {
        return String::new();
    }
    if TRUTHY.contains(&folded.as_str()) {
        "true".to_owned()
    } else {
        "false".to_owned()
    }
}

/// Canonicalize the patient sex field to `M`, `F` or `Otro`.
pub fn normalize_enum(raw: &str) -> String {
    let folded = fold(raw);
    match folded.as_str() {
        "" => String::new(),
        "m" | "masculino" | "hombre" | "h" | "male" => "M".to_owned(),
        "f" | "femenino" | "mujer" | "female" => "F".to_owned(),
        _ => "Otro".to_owned(),
    }
}

/// Split on commas, trim each item, drop empties, join with [`LIST_SEPARATOR`].
pub fn normalize_list(raw: &str) -> String {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}

/// Trim; the literal `hoy` is kept (lowercased) instead of being resolved.
pub fn normalize_date(raw: &str) -> String {
    let trimmed = raw.trim();
    if fold(trimmed) == TODAY_LITERAL {
        return TODAY_LITERAL.to_owned();
    }
    trimmed.to_owned()
}

/// Lowercase, trim, and strip Spanish diacritics.
pub fn fold(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A field-scoped domain rule violation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    /// Offending field name.
    pub field: String,
    /// User-facing message.
    pub message: String,
}

/// Check that a normalized phone has exactly `expected` digits.
///
/// # Errors
///
/// Returns a [`ValidationError`] naming the digit count actually received.
pub fn validate_phone(field: &str, normalized: &str, expected: usize) -> Result<(), ValidationError> {
    let count = normalized.chars().count();
    if count == expected {
        return Ok(());
    }
    Err(ValidationError {
        field: field.to_owned(),
        message: format!("El teléfono debe tener {expected} dígitos (se recibieron {count})."),
    })
}

/// Check that a normalized age lies in `0..=130`.
///
/// # Errors
///
/// Returns a [`ValidationError`] when the value is out of range.
pub fn validate_age(field: &str, normalized: &str) -> Result<(), ValidationError> {
    match normalized.parse::<i64>() {
        Ok(age) if (0..=130).contains(&age) => Ok(()),
        _ => Err(ValidationError {
            field: field.to_owned(),
            message: format!("La edad '{normalized}' no es válida."),
        }),
    }
}

/// Run every domain rule on the present fields of `draft`.
///
/// Absent fields are not checked here; that is the resolver's job.
pub fn validate_draft(
    schema: &FieldSchema,
    draft: &EntityDraft,
    phone_digits: usize,
) -> Vec<ValidationError> {
    schema
        .fields()
        .iter()
        .filter(|f| draft.is_present(&f.name))
        .filter_map(|f| {
            let value = draft.get(&f.name);
            match f.kind {
                FieldKind::Phone => validate_phone(&f.name, value, phone_digits).err(),
                FieldKind::Integer if f.name == "edad" => validate_age(&f.name, value).err(),
                _ => None,
            }
        })
        .collect()
}
