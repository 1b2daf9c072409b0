//! Fast-path signature detection for PromptGate
//!
//! This crate provides the edge pattern tier: an immutable, ordered
//! [`SignatureSet`] of detection rules and a stateless [`PatternEngine`]
//! that evaluates free text against it. Evaluation is pure CPU — no
//! network calls, no suspension points.

use promptgate_core::{GatewayError, Result, Severity};
use regex::Regex;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Signature types
// ---------------------------------------------------------------------------

/// A single detection rule: a compiled pattern with its threat category
/// and severity.
pub struct Signature {
    /// Human-readable identifier for this rule.
    pub name: &'static str,
    /// Compiled regex.
    pub regex: Regex,
    /// Threat category (e.g. `prompt_injection`, `jailbreak`).
    pub category: &'static str,
    /// Severity when matched.
    pub severity: Severity,
}

/// An immutable, ordered list of detection rules.
///
/// Declaration order is significant: the engine returns on the first
/// matching signature. The set is loaded once at process start and never
/// mutated at request time; hot-reloading would replace the whole set
/// atomically rather than mutate entries in place.
pub struct SignatureSet {
    signatures: Vec<Signature>,
}

/// Compile an iterator of `(name, pattern, category, severity)` tuples
/// into a `Vec<Signature>`.
fn compile_signatures(
    defs: impl IntoIterator<Item = (&'static str, &'static str, &'static str, Severity)>,
) -> Result<Vec<Signature>> {
    defs.into_iter()
        .map(|(name, pattern, category, severity)| {
            let regex = Regex::new(pattern).map_err(|e| {
                GatewayError::Config(format!("Failed to compile signature '{}': {}", name, e))
            })?;
            Ok(Signature {
                name,
                regex,
                category,
                severity,
            })
        })
        .collect()
}

impl SignatureSet {
    /// Build the built-in production rule set.
    ///
    /// # Errors
    ///
    /// Returns an error if any pattern fails to compile.
    pub fn builtin() -> Result<Self> {
        Self::from_rules(BUILTIN_RULES)
    }

    /// Build a set from explicit rule definitions, preserving order.
    ///
    /// # Errors
    ///
    /// Returns an error if any pattern fails to compile.
    pub fn from_rules(
        defs: impl IntoIterator<Item = (&'static str, &'static str, &'static str, Severity)>,
    ) -> Result<Self> {
        Ok(Self {
            signatures: compile_signatures(defs)?,
        })
    }

    /// Number of rules in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// `true` if the set contains no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Iterate the rules in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Signature> {
        self.signatures.iter()
    }
}

impl Default for SignatureSet {
    fn default() -> Self {
        Self::builtin().expect("built-in signature set must compile")
    }
}

/// The built-in detection rules, in evaluation order.
///
/// All patterns are case-insensitive. `stan_persona` carries word
/// boundaries so that ordinary words containing the token (such as
/// "understand") do not match.
const BUILTIN_RULES: [(&str, &str, &str, Severity); 24] = [
    (
        "ignore_previous_instructions",
        r"(?i)ignore previous instructions",
        "prompt_injection",
        Severity::High,
    ),
    (
        "ignore_all_previous",
        r"(?i)ignore all previous",
        "prompt_injection",
        Severity::High,
    ),
    (
        "ignore_the_previous",
        r"(?i)ignore the previous",
        "prompt_injection",
        Severity::High,
    ),
    (
        "new_instructions",
        r"(?i)new instructions:",
        "prompt_injection",
        Severity::High,
    ),
    (
        "system_prompt_override",
        r"(?i)system prompt:",
        "prompt_injection",
        Severity::High,
    ),
    (
        "you_are_now",
        r"(?i)you are now",
        "prompt_injection",
        Severity::Medium,
    ),
    (
        "roleplay_as",
        r"(?i)roleplay as",
        "prompt_injection",
        Severity::Medium,
    ),
    (
        "pretend_to_be",
        r"(?i)pretend to be",
        "prompt_injection",
        Severity::Medium,
    ),
    ("dan_mode", r"(?i)DAN mode", "jailbreak", Severity::Critical),
    (
        "do_anything_now",
        r"(?i)do anything now",
        "jailbreak",
        Severity::High,
    ),
    (
        "developer_mode",
        r"(?i)developer mode",
        "jailbreak",
        Severity::High,
    ),
    ("stan_persona", r"(?i)\bSTAN\b", "jailbreak", Severity::High),
    ("jailbreak", r"(?i)jailbreak", "jailbreak", Severity::Medium),
    (
        "no_restrictions",
        r"(?i)no restrictions",
        "jailbreak",
        Severity::High,
    ),
    ("no_limits", r"(?i)no limits", "jailbreak", Severity::Medium),
    (
        "bypass_safety",
        r"(?i)bypass safety",
        "jailbreak",
        Severity::Critical,
    ),
    (
        "ignore_safety",
        r"(?i)ignore safety",
        "jailbreak",
        Severity::Critical,
    ),
    (
        "ignore_ethics",
        r"(?i)ignore ethics",
        "jailbreak",
        Severity::High,
    ),
    (
        "system_prompt_probe",
        r"(?i)system prompt",
        "data_exfiltration",
        Severity::High,
    ),
    (
        "training_data",
        r"(?i)training data",
        "data_exfiltration",
        Severity::High,
    ),
    (
        "internal_knowledge",
        r"(?i)internal knowledge",
        "data_exfiltration",
        Severity::Medium,
    ),
    (
        "repeat_after_me",
        r"(?i)repeat after me",
        "data_exfiltration",
        Severity::Medium,
    ),
    (
        "output_your",
        r"(?i)output your",
        "data_exfiltration",
        Severity::Medium,
    ),
    (
        "show_me_your",
        r"(?i)show me your",
        "data_exfiltration",
        Severity::Low,
    ),
];

// ---------------------------------------------------------------------------
// PatternEngine
// ---------------------------------------------------------------------------

/// Verdict produced by one pattern evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct PatternVerdict {
    /// Whether any signature matched.
    pub matched: bool,
    /// Name of the matching rule.
    pub name: Option<&'static str>,
    /// Threat category of the matching rule.
    pub category: Option<&'static str>,
    /// Severity of the matching rule.
    pub severity: Option<Severity>,
    /// Confidence derived from severity (0.0 when nothing matched).
    pub confidence: f64,
    /// Whether the match blocks the request (critical/high only).
    pub blocked: bool,
}

impl PatternVerdict {
    /// Verdict for text that matched no signature.
    #[must_use]
    pub fn no_match() -> Self {
        Self {
            matched: false,
            name: None,
            category: None,
            severity: None,
            confidence: 0.0,
            blocked: false,
        }
    }

    fn from_signature(sig: &Signature) -> Self {
        Self {
            matched: true,
            name: Some(sig.name),
            category: Some(sig.category),
            severity: Some(sig.severity),
            confidence: sig.severity.confidence(),
            blocked: sig.severity.is_blocking(),
        }
    }
}

/// Evaluates text against a [`SignatureSet`], first match wins.
///
/// Evaluation is a pure function of `(text, signature set)`:
/// [`Regex::is_match`] holds no cursor state between calls, so repeated
/// evaluation of identical input always yields identical verdicts.
pub struct PatternEngine {
    set: SignatureSet,
}

impl PatternEngine {
    /// Create an engine over the given signature set.
    #[must_use]
    pub fn new(set: SignatureSet) -> Self {
        Self { set }
    }

    /// Create an engine over the built-in rule set.
    ///
    /// # Errors
    ///
    /// Returns an error if any built-in pattern fails to compile.
    pub fn with_builtin_rules() -> Result<Self> {
        Ok(Self::new(SignatureSet::builtin()?))
    }

    /// Evaluate text against the set in declaration order, returning on
    /// the first match. No aggregation happens across multiple matching
    /// signatures. Empty or whitespace-only text short-circuits to
    /// [`PatternVerdict::no_match`] without consulting the set.
    #[must_use]
    pub fn evaluate(&self, text: &str) -> PatternVerdict {
        if text.trim().is_empty() {
            return PatternVerdict::no_match();
        }
        for sig in self.set.iter() {
            if sig.regex.is_match(text) {
                return PatternVerdict::from_signature(sig);
            }
        }
        PatternVerdict::no_match()
    }

    /// The signature set this engine evaluates against.
    #[must_use]
    pub fn signatures(&self) -> &SignatureSet {
        &self.set
    }
}

// ===========================================================================
// Tests
// ===========================================================================
