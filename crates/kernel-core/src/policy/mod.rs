//! Declarative arbitration policy.
//!
//! A ruleset is a YAML document keyed by intention kind. Each kind may
//! carry `require` constraints (fields that must be present, reference
//! cardinality and kind restrictions) and `forbid` expressions compiled by
//! [`expr`]. Malformed documents are fatal at load time; evaluation of a
//! loaded ruleset never fails, it only approves or suppresses.

pub mod expr;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use contracts::{Decision, Intention, Scope, Violation, ViolationKind};

use crate::actor::Actor;
use crate::ledger::EventLedger;
use expr::{EvalContext, Expr, ExprError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum PolicyError {
    Io(io::Error),
    Document(serde_yaml::Error),
    MissingDocument(PathBuf),
    BadExpression {
        kind: String,
        expression: String,
        source: ExprError,
    },
    BadFieldPath {
        kind: String,
        path: String,
    },
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read policy document: {err}"),
            Self::Document(err) => write!(f, "malformed policy document: {err}"),
            Self::MissingDocument(path) => {
                write!(f, "policy document not found at {}", path.display())
            }
            Self::BadExpression {
                kind,
                expression,
                source,
            } => write!(
                f,
                "invalid forbid expression for kind '{kind}': '{expression}': {source}"
            ),
            Self::BadFieldPath { kind, path } => {
                write!(f, "invalid required field path for kind '{kind}': '{path}'")
            }
        }
    }
}

impl std::error::Error for PolicyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Document(err) => Some(err),
            Self::BadExpression { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for PolicyError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_yaml::Error> for PolicyError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Document(err)
    }
}

// ---------------------------------------------------------------------------
// Document shape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PolicyDocument {
    #[serde(default)]
    kinds: BTreeMap<String, KindRulesDoc>,
}

#[derive(Debug, Deserialize)]
struct KindRulesDoc {
    #[serde(default)]
    require: Option<RequireBlock>,
    #[serde(default)]
    forbid: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RequireBlock {
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default)]
    references: Option<ReferenceRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceRule {
    /// Minimum number of references the intention must carry.
    #[serde(default = "default_min_references")]
    pub min: usize,
    /// When non-empty, at least one reference must resolve to an event of
    /// one of these kinds.
    #[serde(default)]
    pub event_kinds: Vec<String>,
}

fn default_min_references() -> usize {
    1
}

// ---------------------------------------------------------------------------
// Compiled ruleset
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CompiledKind {
    required_fields: Vec<Vec<String>>,
    references: Option<ReferenceRule>,
    forbid: Vec<(String, Expr)>,
}

#[derive(Debug, Default)]
pub struct RuleSet {
    kinds: BTreeMap<String, CompiledKind>,
}

impl RuleSet {
    pub fn from_yaml_str(document: &str) -> Result<Self, PolicyError> {
        let parsed: PolicyDocument = serde_yaml::from_str(document)?;
        let mut kinds = BTreeMap::new();
        for (kind, rules) in parsed.kinds {
            let mut required_fields = Vec::new();
            let mut references = None;
            if let Some(require) = rules.require {
                for path in require.fields {
                    let segments = path
                        .split('.')
                        .map(str::to_string)
                        .collect::<Vec<_>>();
                    let well_formed = !segments.is_empty()
                        && segments.iter().all(|s| {
                            !s.is_empty()
                                && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                        });
                    if !well_formed {
                        return Err(PolicyError::BadFieldPath { kind, path });
                    }
                    required_fields.push(segments);
                }
                references = require.references;
            }
            let mut forbid = Vec::new();
            for source in rules.forbid {
                let compiled =
                    expr::parse_expr(&source).map_err(|err| PolicyError::BadExpression {
                        kind: kind.clone(),
                        expression: source.clone(),
                        source: err,
                    })?;
                forbid.push((source, compiled));
            }
            kinds.insert(
                kind,
                CompiledKind {
                    required_fields,
                    references,
                    forbid,
                },
            );
        }
        Ok(Self { kinds })
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Evaluates intentions against a compiled ruleset.
///
/// An engine without rules is a deliberate operating mode: every intention
/// is approved and the mode is logged once at construction. It is never
/// the silent result of a failed load.
#[derive(Debug)]
pub struct PolicyEngine {
    rules: RuleSet,
}

impl PolicyEngine {
    pub fn new(rules: RuleSet) -> Self {
        if rules.is_empty() {
            info!("policy engine running with no rules; all intentions approved");
        }
        Self { rules }
    }

    /// Explicit empty-policy mode.
    pub fn approve_all() -> Self {
        Self::new(RuleSet::default())
    }

    /// Load a ruleset from disk. A missing file is only acceptable when
    /// `allow_empty` is set; it then selects the approve-all mode.
    pub fn load(path: &Path, allow_empty: bool) -> Result<Self, PolicyError> {
        if !path.exists() {
            if allow_empty {
                info!(path = %path.display(), "no policy document; running approve-all");
                return Ok(Self::approve_all());
            }
            return Err(PolicyError::MissingDocument(path.to_path_buf()));
        }
        let document = fs::read_to_string(path)?;
        Ok(Self::new(RuleSet::from_yaml_str(&document)?))
    }

    /// Decide one intention. All violated constraints are reported
    /// together, not just the first.
    pub fn evaluate(
        &self,
        intention: &Intention,
        proposer: Option<&Actor>,
        ledger: &EventLedger,
    ) -> Decision {
        if self.rules.is_empty() {
            return Decision::approved();
        }

        let mut violations = Vec::new();

        // References must resolve against the ledger regardless of which
        // kind-specific rules apply.
        for reference in &intention.references {
            if !ledger.contains(reference.event_id) {
                violations.push(Violation::new(
                    ViolationKind::Reference,
                    "references.resolve",
                    format!("reference to unknown event {}", reference.event_id),
                ));
            }
        }

        let Some(rules) = self.rules.kinds.get(&intention.kind) else {
            // A kind the document does not mention passes through; the
            // document restricts the kinds it names, nothing more.
            debug!(kind = %intention.kind, "no rules for intention kind");
            return if violations.is_empty() {
                Decision::approved()
            } else {
                Decision::suppressed(violations)
            };
        };

        let intention_view = scoped_view(
            serde_json::to_value(intention).unwrap_or(Value::Null),
            &intention.scope,
        );

        for path in &rules.required_fields {
            if !field_present(&intention_view, path) {
                violations.push(Violation::new(
                    ViolationKind::Require,
                    "require.fields",
                    format!("missing field {}", path.join(".")),
                ));
            }
        }

        if let Some(rule) = &rules.references {
            if intention.references.len() < rule.min {
                violations.push(Violation::new(
                    ViolationKind::Reference,
                    "require.references.min",
                    format!(
                        "expected at least {} reference(s), found {}",
                        rule.min,
                        intention.references.len()
                    ),
                ));
            }
            if !rule.event_kinds.is_empty() {
                let satisfied = intention.references.iter().any(|reference| {
                    ledger
                        .get(reference.event_id)
                        .is_some_and(|event| rule.event_kinds.contains(&event.kind))
                });
                if !satisfied {
                    violations.push(Violation::new(
                        ViolationKind::Reference,
                        "require.references.event_kinds",
                        format!(
                            "no reference resolves to an event of kind [{}]",
                            rule.event_kinds.join(", ")
                        ),
                    ));
                }
            }
        }

        if !rules.forbid.is_empty() {
            let proposer_view = proposer
                .map(|actor| {
                    scoped_view(
                        serde_json::to_value(actor).unwrap_or(Value::Null),
                        &actor.scope,
                    )
                })
                .unwrap_or(Value::Null);
            let referenced_view = intention
                .references
                .first()
                .and_then(|reference| ledger.get(reference.event_id))
                .map(|event| {
                    scoped_view(
                        serde_json::to_value(event).unwrap_or(Value::Null),
                        &event.scope,
                    )
                })
                .unwrap_or(Value::Null);
            let ctx = EvalContext {
                intention: &intention_view,
                proposer: &proposer_view,
                referenced_event: &referenced_view,
            };
            for (source, compiled) in &rules.forbid {
                if expr::eval(compiled, &ctx) {
                    violations.push(Violation::new(
                        ViolationKind::Forbid,
                        "forbid",
                        format!("forbidden: {source}"),
                    ));
                }
            }
        }

        if violations.is_empty() {
            Decision::approved()
        } else {
            Decision::suppressed(violations)
        }
    }
}

/// Expressions compare scopes by their display form (`public`, `{a,b}`),
/// not the serde tag encoding, so the views carry the flattened string.
fn scoped_view(mut view: Value, scope: &Scope) -> Value {
    if let Value::Object(map) = &mut view {
        map.insert("scope".to_string(), Value::String(scope.to_string()));
    }
    view
}

fn field_present(view: &Value, path: &[String]) -> bool {
    let mut current = view;
    for segment in path {
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(next) => current = next,
                None => return false,
            },
            _ => return false,
        }
    }
    !current.is_null()
}
