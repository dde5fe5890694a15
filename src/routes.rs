//! Logical destination → navigation path lookup.
//!
//! Lookup order is direct key first, then alias. Unregistered destinations
//! resolve to `None`; there is no fallback route.

use std::collections::HashMap;

use serde::Deserialize;

use crate::normalize::fold;

/// Path of the patient-creation form.
pub const NEW_PATIENT_PATH: &str = "/pacientes/nuevo";

/// A registered navigation target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteEntry {
    /// Canonical logical key (e.g. `agenda`).
    pub key: String,
    /// Concrete path returned to the caller.
    pub path: String,
    /// Synonyms that resolve to this entry.
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Static route table. Read-only once built.
#[derive(Debug, Clone)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    index: HashMap<String, usize>,
    aliases: HashMap<String, usize>,
}

impl RouteTable {
    /// Build a table from entries. Later entries win on duplicate keys.
    pub fn new(entries: Vec<RouteEntry>) -> Self {
        let mut index = HashMap::new();
        let mut aliases = HashMap::new();
        for (pos, entry) in entries.iter().enumerate() {
            index.insert(route_key(&entry.key), pos);
            for alias in &entry.aliases {
                aliases.insert(route_key(alias), pos);
            }
        }
        Self {
            entries,
            index,
            aliases,
        }
    }

    /// The built-in destinations.
    pub fn default_routes() -> Vec<RouteEntry> {
        let entry = |key: &str, path: &str, aliases: &[&str]| RouteEntry {
            key: key.to_owned(),
            path: path.to_owned(),
            aliases: aliases.iter().map(|a| (*a).to_owned()).collect(),
        };
        vec![
            entry("dashboard", "/dashboard", &["inicio", "home", "panel", "tablero"]),
            entry("pacientes", "/pacientes", &["patients", "lista_pacientes", "expedientes"]),
            entry(
                "nuevo_paciente",
                NEW_PATIENT_PATH,
                &["crear_paciente", "registro", "alta_paciente"],
            ),
            entry("agenda", "/agenda", &["calendario", "citas", "calendar"]),
            entry("inventario", "/inventario", &["inventory", "almacen", "stock"]),
            entry("qr", "/qr", &["escanear", "qr_intake", "codigo_qr"]),
        ]
    }

    /// Resolve a destination by direct key, then alias.
    pub fn resolve(&self, destination: &str) -> Option<&RouteEntry> {
        let key = route_key(destination);
        self.index
            .get(&key)
            .or_else(|| self.aliases.get(&key))
            .and_then(|pos| self.entries.get(*pos))
    }

    /// Registered canonical keys in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(Self::default_routes())
    }
}

/// Fold accents and case, and map spaces and hyphens to underscores.
fn route_key(raw: &str) -> String {
    fold(raw)
        .trim_start_matches('/')
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}
