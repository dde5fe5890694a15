//! Instruction text sent to the completion service.
//!
//! The [`PromptComposer`] is built once at startup from the field schema and
//! route table. Its action grammar section is generated from that data and
//! included in every prompt; the intent parser relies on it.

use std::fmt::Write as _;

use crate::schema::{FieldKind, FieldSchema};

const PREAMBLE: &str = "Eres el asistente de captura de una clínica. \
Convierte el mensaje del usuario en UNA sola acción JSON. \
Responde únicamente con el objeto JSON, sin texto adicional.";

const DEFAULT_DOMAIN_NOTES: &str = "\
- Un \"paciente\" es la persona atendida; \"registrar\", \"dar de alta\" o \"nuevo paciente\" implican action=create.
- \"Buscar\", \"encontrar\" o \"abrir el expediente de\" implican action=search.
- Preguntas sobre cuántos pacientes hay o cuáles son los más recientes implican action=query.
- Pedir ir a una sección (agenda, inventario, QR, inicio) implica action=navigate.
- Cualquier otra pregunta general se contesta con action=respond.";

/// Builds the single instruction string for one user turn.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    grammar: String,
    rules: String,
    domain_notes: String,
    max_message_chars: usize,
}

impl PromptComposer {
    /// Compose from the schema and the list of navigable destinations.
    pub fn new<'a>(
        schema: &FieldSchema,
        destinations: impl IntoIterator<Item = &'a str>,
        max_message_chars: usize,
    ) -> Self {
        Self {
            grammar: action_grammar(schema, destinations),
            rules: normalization_rules(schema),
            domain_notes: DEFAULT_DOMAIN_NOTES.to_owned(),
            max_message_chars,
        }
    }

    /// Replace the domain knowledge section.
    pub fn with_domain_notes(mut self, notes: impl Into<String>) -> Self {
        self.domain_notes = notes.into();
        self
    }

    /// The generated action grammar section.
    pub fn grammar(&self) -> &str {
        &self.grammar
    }

    /// Full prompt for `message`. Messages longer than the configured cap
    /// are cut at a character boundary.
    pub fn compose(&self, message: &str) -> String {
        let message: String = message.trim().chars().take(self.max_message_chars).collect();
        format!(
            "{PREAMBLE}\n\n\
             ## Acciones válidas\n{grammar}\n\
             ## Reglas de normalización\n{rules}\n\
             ## Conocimiento del dominio\n{notes}\n\n\
             ## Mensaje del usuario\n\"\"\"\n{message}\n\"\"\"\n",
            grammar = self.grammar,
            rules = self.rules,
            notes = self.domain_notes,
        )
    }
}

fn action_grammar<'a>(schema: &FieldSchema, destinations: impl IntoIterator<Item = &'a str>) -> String {
    let fields = schema
        .fields()
        .iter()
        .map(|f| format!("\"{}\": <{}>", f.name, f.kind.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    let destinations = destinations.into_iter().collect::<Vec<_>>().join(" | ");

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{{\"action\":\"create\",\"type\":\"paciente\",\"data\":{{{fields}}}}}"
    );
    let _ = writeln!(
        out,
        "{{\"action\":\"navigate\",\"type\":\"ruta\",\"target\":\"{destinations}\"}}"
    );
    let _ = writeln!(
        out,
        "{{\"action\":\"search\",\"type\":\"paciente\",\"query\":\"<nombre a buscar>\"}}"
    );
    let _ = writeln!(
        out,
        "{{\"action\":\"query\",\"type\":\"paciente\",\"filters\":{{\"kind\":\"resumen | recientes\",\"limit\":10}}}}"
    );
    let _ = writeln!(
        out,
        "{{\"action\":\"respond\",\"type\":\"texto\",\"message\":\"<respuesta>\"}}"
    );
    out
}

fn normalization_rules(schema: &FieldSchema) -> String {
    let names_of = |kind: FieldKind| {
        schema
            .fields()
            .iter()
            .filter(|f| f.kind == kind)
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut out = String::new();
    let _ = writeln!(out, "- Omite los campos que el usuario no mencione; no inventes datos.");
    let booleans = names_of(FieldKind::Boolean);
    if !booleans.is_empty() {
        let _ = writeln!(out, "- Booleanos ({booleans}) como true o false.");
    }
    let lists = names_of(FieldKind::List);
    if !lists.is_empty() {
        let _ = writeln!(out, "- Listas ({lists}) como texto separado por comas.");
    }
    let integers = names_of(FieldKind::Integer);
    if !integers.is_empty() {
        let _ = writeln!(out, "- Números ({integers}) solo con dígitos.");
    }
    let phones = names_of(FieldKind::Phone);
    if !phones.is_empty() {
        let _ = writeln!(out, "- Teléfonos ({phones}) solo dígitos.");
    }
    let enums = names_of(FieldKind::EnumText);
    if !enums.is_empty() {
        let _ = writeln!(out, "- {enums} como M, F u Otro.");
    }
    let dates = names_of(FieldKind::Date);
    if !dates.is_empty() {
        let _ = writeln!(
            out,
            "- Fechas ({dates}): si el usuario dice \"hoy\", escribe literalmente \"hoy\"."
        );
    }
    out
}
