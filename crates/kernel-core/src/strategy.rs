//! Proposal strategies.
//!
//! A strategy turns an observed trigger event into zero or more intention
//! seeds. Seeds carry everything but identity; the agent controller stamps
//! proposer, intention id, and tick before the seed enters the scheduler.
//! Strategies are fallible and may time out; a failed or timed-out
//! strategy always degrades to the rule-based one rather than silencing
//! the actor.

use std::fmt;

use serde_json::json;
use tracing::warn;

use contracts::{Event, Reference, Scope};

use crate::actor::Actor;

/// A proposed action before it becomes an [`contracts::Intention`].
#[derive(Debug, Clone)]
pub struct IntentionSeed {
    pub kind: String,
    pub payload: serde_json::Value,
    pub scope: Scope,
    pub references: Vec<Reference>,
    pub tags: Vec<String>,
    pub urgency: Option<f64>,
}

impl IntentionSeed {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value, scope: Scope) -> Self {
        Self {
            kind: kind.into(),
            payload,
            scope,
            references: Vec::new(),
            tags: Vec::new(),
            urgency: None,
        }
    }

    pub fn with_references(mut self, references: Vec<Reference>) -> Self {
        self.references = references;
        self
    }

    pub fn with_urgency(mut self, urgency: f64) -> Self {
        self.urgency = Some(urgency);
        self
    }
}

/// What a strategy is allowed to see: the reacting actor, the trigger
/// event, and a bounded window of ledger history visible to that actor.
pub struct ProposalContext<'a> {
    pub actor: &'a Actor,
    pub trigger: &'a Event,
    pub recent: Vec<&'a Event>,
    /// Events the trigger references, already resolved.
    pub referenced: Vec<&'a Event>,
}

#[derive(Debug)]
pub enum StrategyError {
    /// The strategy exceeded its deliberation budget.
    Timeout { budget_ms: u64 },
    Failed(String),
}

impl fmt::Display for StrategyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { budget_ms } => {
                write!(f, "strategy exceeded its {budget_ms}ms budget")
            }
            Self::Failed(detail) => write!(f, "strategy failed: {detail}"),
        }
    }
}

impl std::error::Error for StrategyError {}

pub trait ProposalStrategy {
    fn name(&self) -> &str;

    fn propose(&mut self, ctx: &ProposalContext<'_>) -> Result<Vec<IntentionSeed>, StrategyError>;
}

// ---------------------------------------------------------------------------
// Rule-based strategy
// ---------------------------------------------------------------------------

/// Deterministic request-answering strategy. It reacts to the request
/// kinds only: `request_anyone` and `request_all` invite any actor other
/// than the sender, `request_specific` only the named target.
#[derive(Debug, Default)]
pub struct RuleBasedStrategy;

impl RuleBasedStrategy {
    pub fn new() -> Self {
        Self
    }

    fn is_addressed(&self, actor: &Actor, trigger: &Event) -> bool {
        if trigger.sender == actor.id {
            return false;
        }
        match trigger.kind.as_str() {
            "request_anyone" | "request_all" => true,
            "request_specific" => trigger
                .content
                .get("target")
                .and_then(|v| v.as_str())
                .is_some_and(|target| target == actor.id),
            _ => false,
        }
    }
}

impl ProposalStrategy for RuleBasedStrategy {
    fn name(&self) -> &str {
        "rule_based"
    }

    fn propose(&mut self, ctx: &ProposalContext<'_>) -> Result<Vec<IntentionSeed>, StrategyError> {
        if !self.is_addressed(ctx.actor, ctx.trigger) {
            return Ok(Vec::new());
        }
        let topic = ctx
            .trigger
            .content
            .get("topic")
            .and_then(|v| v.as_str())
            .unwrap_or("the request");
        let seed = IntentionSeed::new(
            "speak",
            json!({
                "text": format!("{} responds to {} regarding {topic}", ctx.actor.name, ctx.trigger.sender_name),
                "topic": topic,
            }),
            ctx.trigger.scope.clone(),
        )
        .with_references(vec![Reference::bare(ctx.trigger.event_id)]);
        Ok(vec![seed])
    }
}

// ---------------------------------------------------------------------------
// Fallback wrapper
// ---------------------------------------------------------------------------

/// Runs a primary strategy and degrades to [`RuleBasedStrategy`] when the
/// primary errors out. Every kernel build carries this wrapper; there is
/// no configuration without a working fallback.
pub struct FallbackStrategy {
    primary: Box<dyn ProposalStrategy>,
    fallback: RuleBasedStrategy,
}

impl FallbackStrategy {
    pub fn new(primary: Box<dyn ProposalStrategy>) -> Self {
        Self {
            primary,
            fallback: RuleBasedStrategy::new(),
        }
    }
}

impl ProposalStrategy for FallbackStrategy {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn propose(&mut self, ctx: &ProposalContext<'_>) -> Result<Vec<IntentionSeed>, StrategyError> {
        match self.primary.propose(ctx) {
            Ok(seeds) => Ok(seeds),
            Err(error) => {
                warn!(
                    strategy = self.primary.name(),
                    actor = %ctx.actor.id,
                    %error,
                    "strategy failed; using rule-based fallback"
                );
                self.fallback.propose(ctx)
            }
        }
    }
}

impl fmt::Debug for FallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackStrategy")
            .field("primary", &self.primary.name())
            .finish()
    }
}
