//! Static table of known entity fields.
//!
//! The [`FieldSchema`] is immutable data injected at startup. It drives
//! normalization (one rule per [`FieldKind`]), the missing-field policy
//! (required vs important), and the action grammar embedded in prompts.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Descriptor types
// ---------------------------------------------------------------------------

/// Normalization rule applied to a field's raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Free text, trimmed.
    Text,
    /// Signed integer, non-digits stripped.
    Integer,
    /// Phone number, digits only.
    Phone,
    /// `true` / `false`.
    Boolean,
    /// One of a closed set of values (see [`crate::normalize::normalize_enum`]).
    EnumText,
    /// Multi-valued text, canonicalized as a comma-joined string.
    List,
    /// Date-like text; the literal `hoy` is preserved verbatim.
    Date,
}

impl FieldKind {
    /// Lowercase name used in prompts and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Phone => "phone",
            Self::Boolean => "boolean",
            Self::EnumText => "enum_text",
            Self::List => "list",
            Self::Date => "date",
        }
    }
}

/// Immutable description of one entity field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field key as it appears in drafts and in the action grammar.
    pub name: String,
    /// Normalization rule.
    pub kind: FieldKind,
    /// Blocks creation entirely when absent.
    pub required: bool,
    /// Should be asked for, but the user may skip it.
    pub important: bool,
    /// Short human label used in follow-up questions.
    pub label: String,
}

impl FieldDescriptor {
    /// An optional, unimportant field.
    pub fn new(name: &str, label: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            required: false,
            important: false,
            label: label.to_owned(),
        }
    }

    /// Mark as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as important.
    pub fn important(mut self) -> Self {
        self.important = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Ordered, read-only set of field descriptors for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    fields: Vec<FieldDescriptor>,
}

impl FieldSchema {
    /// Build a schema from an explicit descriptor list (order is preserved).
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        Self { fields }
    }

    /// The default patient schema.
    pub fn patient() -> Self {
        Self::new(vec![
            FieldDescriptor::new("nombre", "nombre completo", FieldKind::Text).required(),
            FieldDescriptor::new("edad", "edad", FieldKind::Integer).important(),
            FieldDescriptor::new("sexo", "sexo", FieldKind::EnumText).important(),
            FieldDescriptor::new("telefono", "teléfono", FieldKind::Phone).important(),
            FieldDescriptor::new("motivo_consulta", "motivo de consulta", FieldKind::Text)
                .important(),
            FieldDescriptor::new("fecha_consulta", "fecha de consulta", FieldKind::Date),
            FieldDescriptor::new("alergias", "alergias", FieldKind::List),
            FieldDescriptor::new("antecedentes", "antecedentes", FieldKind::List),
            FieldDescriptor::new("embarazo", "embarazo", FieldKind::Boolean),
        ])
    }

    /// All descriptors in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Look up a descriptor by name.
    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether `name` is a member of this schema.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Field names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self::patient()
    }
}
