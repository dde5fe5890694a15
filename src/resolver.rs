//! Missing-field policy: ask for more input, or let the caller proceed.
//!
//! Three tiers, evaluated in order:
//! 1. A required field is absent → ask for exactly that field.
//! 2. Too many important or total fields are absent → ask one consolidated
//!    question.
//! 3. Otherwise proceed; the creation form can collect the rest.
//!
//! A "proceed anyway" utterance skips tiers 1 and 2, unless the policy makes
//! required fields a hard floor.

use regex::Regex;
use serde::Deserialize;

use crate::draft::EntityDraft;
use crate::normalize::fold;
use crate::schema::FieldSchema;

// ---------------------------------------------------------------------------
// Proceed-anyway detection
// ---------------------------------------------------------------------------

/// Predicate deciding whether a message means "continue regardless".
pub trait ProceedDetector: Send + Sync {
    /// Whether `text` asks to proceed despite missing fields.
    fn looks_like_proceed_intent(&self, text: &str) -> bool;
}

/// Fixed Spanish phrase set, matched accent- and case-insensitively.
pub struct PhraseProceedDetector {
    pattern: Regex,
}

const PROCEED_PATTERN: &str = r"\b(crea(r)? con lo (disponible|que (hay|tengo))|con lo disponible|con lo que (hay|tengo)|continu(a|ar|e)|proced(e|er)|asi esta bien|de todos modos|de todas formas|de cualquier forma|sin mas datos|no importa|(guardar|crear|registrar)(lo)? (asi|ya)|omit(e|ir)|salta(r)?)\b";

impl PhraseProceedDetector {
    /// Build the detector with the default phrase set.
    ///
    /// # Errors
    ///
    /// Returns a regex error only if the built-in pattern is invalid.
    pub fn new() -> Result<Self, regex::Error> {
        Self::with_pattern(PROCEED_PATTERN)
    }

    /// Build the detector with a custom pattern (matched against folded text).
    ///
    /// # Errors
    ///
    /// Returns a regex error if `pattern` does not compile.
    pub fn with_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }
}

impl ProceedDetector for PhraseProceedDetector {
    fn looks_like_proceed_intent(&self, text: &str) -> bool {
        self.pattern.is_match(&fold(text))
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Tunable thresholds of the missing-field policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResolverPolicy {
    /// Ask when at least this many important fields are missing.
    pub important_threshold: usize,
    /// Ask when at least this many fields in total are missing.
    pub total_threshold: usize,
    /// When set, "proceed anyway" never bypasses a missing required field.
    pub required_is_hard_floor: bool,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self {
            important_threshold: 2,
            total_threshold: 5,
            required_is_hard_floor: false,
        }
    }
}

/// What the caller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Enough data; go ahead.
    Proceed,
    /// Ask for the missing required field(s) only.
    AskRequired,
    /// Ask one consolidated question.
    AskMore,
}

/// Resolver output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Absent required fields, schema order.
    pub missing_required: Vec<String>,
    /// Absent important fields, schema order.
    pub missing_important: Vec<String>,
    /// Absent fields that are neither required nor important.
    pub missing_other: Vec<String>,
    /// Whether creation may go ahead.
    pub can_proceed: bool,
    /// Which tier decided.
    pub decision: Decision,
}

impl Resolution {
    /// Count of all absent fields.
    pub fn total_missing(&self) -> usize {
        self.missing_required
            .len()
            .saturating_add(self.missing_important.len())
            .saturating_add(self.missing_other.len())
    }

    /// Every missing field name: required, then important, then the rest.
    pub fn all_missing(&self) -> Vec<String> {
        self.missing_required
            .iter()
            .chain(&self.missing_important)
            .chain(&self.missing_other)
            .cloned()
            .collect()
    }
}

/// Apply the three-tier policy to a normalized draft.
pub fn resolve(
    draft: &EntityDraft,
    schema: &FieldSchema,
    policy: &ResolverPolicy,
    proceed_anyway: bool,
) -> Resolution {
    let mut missing_required = Vec::new();
    let mut missing_important = Vec::new();
    let mut missing_other = Vec::new();

    for field in schema.fields() {
        if draft.is_present(&field.name) {
            continue;
        }
        let bucket = if field.required {
            &mut missing_required
        } else if field.important {
            &mut missing_important
        } else {
            &mut missing_other
        };
        bucket.push(field.name.clone());
    }

    let mut resolution = Resolution {
        missing_required,
        missing_important,
        missing_other,
        can_proceed: true,
        decision: Decision::Proceed,
    };

    let required_blocks = !resolution.missing_required.is_empty()
        && (!proceed_anyway || policy.required_is_hard_floor);
    let tier_two = resolution.missing_important.len() >= policy.important_threshold
        || resolution.total_missing() >= policy.total_threshold;

    if required_blocks {
        resolution.can_proceed = false;
        resolution.decision = Decision::AskRequired;
    } else if tier_two && !proceed_anyway {
        resolution.can_proceed = false;
        resolution.decision = Decision::AskMore;
    }
    resolution
}
