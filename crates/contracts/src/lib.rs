//! v1 cross-boundary contracts for the arbitration kernel and session store.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SCHEMA_VERSION_V1: &str = "1.0";

/// Stable actor identity. Actors may be rebuilt or migrated; the id is not
/// tied to any storage order.
pub type ActorId = String;

/// Logical simulation tick.
pub type Tick = u64;

/// Ledger-assigned event id. Strictly increasing in commit order within a
/// session and never reused, including across a session resume.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl EventId {
    pub fn value(self) -> u64 {
        self.0
    }

    pub fn next(self) -> EventId {
        EventId(self.0 + 1)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Visibility set for an event or an observer filter.
///
/// A `Public` event is visible to every observer; a `Public` filter sees
/// every event; two group sets match when they intersect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "visibility", content = "groups", rename_all = "snake_case")]
pub enum Scope {
    Public,
    Groups(BTreeSet<String>),
}

impl Scope {
    pub fn group(name: impl Into<String>) -> Self {
        let mut groups = BTreeSet::new();
        groups.insert(name.into());
        Self::Groups(groups)
    }

    pub fn groups<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Groups(names.into_iter().map(Into::into).collect())
    }

    pub fn is_public(&self) -> bool {
        matches!(self, Self::Public)
    }

    /// Whether an event with this scope is visible through the given filter.
    pub fn visible_to(&self, filter: &Scope) -> bool {
        match (self, filter) {
            (Self::Public, _) => true,
            (_, Self::Public) => true,
            (Self::Groups(own), Self::Groups(theirs)) => {
                own.iter().any(|group| theirs.contains(group))
            }
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::Public
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Groups(groups) => {
                let joined = groups.iter().cloned().collect::<Vec<_>>().join(",");
                write!(f, "{{{joined}}}")
            }
        }
    }
}

/// Weighted citation dimensions. All components default to neutral zero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RefWeight {
    /// [-1, 1] endorsement or opposition.
    #[serde(default)]
    pub stance: f64,
    /// [0, 1] how much the cited event inspired this one.
    #[serde(default)]
    pub inspiration: f64,
    /// [0, 1] data or knowledge dependency on the cited event.
    #[serde(default)]
    pub dependency: f64,
}

impl RefWeight {
    pub fn neutral() -> Self {
        Self {
            stance: 0.0,
            inspiration: 0.0,
            dependency: 0.0,
        }
    }

    /// Component-wise maximum, used when duplicate references are merged.
    pub fn component_max(self, other: RefWeight) -> RefWeight {
        RefWeight {
            stance: self.stance.max(other.stance),
            inspiration: self.inspiration.max(other.inspiration),
            dependency: self.dependency.max(other.dependency),
        }
    }
}

impl Default for RefWeight {
    fn default() -> Self {
        Self::neutral()
    }
}

/// A weighted citation from one event to another.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reference {
    pub event_id: EventId,
    #[serde(default)]
    pub weight: RefWeight,
}

impl Reference {
    pub fn bare(event_id: EventId) -> Self {
        Self {
            event_id,
            weight: RefWeight::neutral(),
        }
    }
}

/// Lifecycle of an intention. The transition out of `Pending` happens
/// exactly once and is performed by the router alone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentionStatus {
    Pending,
    Approved,
    Suppressed,
}

/// A proposed, not-yet-committed action awaiting arbitration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Intention {
    pub schema_version: String,
    pub intention_id: String,
    pub proposer: ActorId,
    pub kind: String,
    pub payload: Value,
    pub scope: Scope,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub motivation: f64,
    /// Optional scheduling priority. Present beats absent; larger beats
    /// smaller; arrival order breaks remaining ties.
    #[serde(default)]
    pub urgency: Option<f64>,
    pub status: IntentionStatus,
    pub created_at_tick: Tick,
}

impl Intention {
    pub fn new(
        intention_id: impl Into<String>,
        proposer: impl Into<ActorId>,
        kind: impl Into<String>,
        payload: Value,
        scope: Scope,
        created_at_tick: Tick,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            intention_id: intention_id.into(),
            proposer: proposer.into(),
            kind: kind.into(),
            payload,
            scope,
            references: Vec::new(),
            tags: Vec::new(),
            confidence: 0.0,
            motivation: 0.0,
            urgency: None,
            status: IntentionStatus::Pending,
            created_at_tick,
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

/// An immutable committed fact. Only `completed` may change after commit,
/// and only through the request-completion collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub schema_version: String,
    pub event_id: EventId,
    pub kind: String,
    pub sender: ActorId,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_role: String,
    pub scope: Scope,
    pub content: Value,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Actor ids whose scope intersected the event's scope at commit time.
    #[serde(default)]
    pub recipients: Vec<ActorId>,
    #[serde(default)]
    pub completed: bool,
    pub tick: Tick,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Approved,
    Suppressed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Require,
    Reference,
    Forbid,
    Throttle,
}

/// One failed rule, named so callers get a complete diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    pub rule: String,
    pub detail: String,
}

impl Violation {
    pub fn new(kind: ViolationKind, rule: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            rule: rule.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {} ({})", self.kind, self.rule, self.detail)
    }
}

/// The policy engine's verdict on one intention.
///
/// Invariant: `violations` is non-empty iff the status is `Suppressed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub status: DecisionStatus,
    #[serde(default)]
    pub violations: Vec<Violation>,
}

impl Decision {
    pub fn approved() -> Self {
        Self {
            status: DecisionStatus::Approved,
            violations: Vec::new(),
        }
    }

    pub fn suppressed(violations: Vec<Violation>) -> Self {
        debug_assert!(
            !violations.is_empty(),
            "suppressed decision without violations"
        );
        Self {
            status: DecisionStatus::Suppressed,
            violations,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == DecisionStatus::Approved
    }
}

/// Session-wide configuration for the kernel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub schema_version: String,
    pub session_id: String,
    pub max_ticks: Tick,
    /// Minimum ticks between two emissions from the same actor.
    pub actor_cooldown_ticks: u64,
    /// Per-kind overrides of the actor cooldown interval.
    #[serde(default)]
    pub kind_cooldown_ticks: BTreeMap<String, u64>,
    /// Minimum ticks between any two committed events, sender-independent.
    pub global_gap_ticks: u64,
    /// Consecutive idle ticks after which the loop stops early.
    pub idle_stop_ticks: u64,
    /// Explicit opt-in for running without a rule document. Never a silent
    /// default: a missing document without this flag is a fatal error.
    #[serde(default)]
    pub allow_empty_policy: bool,
    /// On resume, forget persisted cooldown state and treat every actor as
    /// immediately eligible.
    #[serde(default)]
    pub reset_cooldowns_on_resume: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            session_id: "session_local_001".to_string(),
            max_ticks: 50,
            actor_cooldown_ticks: 2,
            kind_cooldown_ticks: BTreeMap::new(),
            global_gap_ticks: 0,
            idle_stop_ticks: 3,
            allow_empty_policy: false,
            reset_cooldowns_on_resume: false,
        }
    }
}

/// Synthetic timestamp derived from the logical tick, stable across runs.
pub fn tick_stamp(tick: Tick) -> String {
    format!("tick-{tick:06}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn public_scope_is_visible_to_everyone() {
        let event_scope = Scope::Public;
        assert!(event_scope.visible_to(&Scope::Public));
        assert!(event_scope.visible_to(&Scope::group("backstage")));
    }

    #[test]
    fn public_filter_sees_everything() {
        let event_scope = Scope::group("backstage");
        assert!(event_scope.visible_to(&Scope::Public));
    }

    #[test]
    fn disjoint_groups_are_invisible() {
        let event_scope = Scope::group("group_x");
        assert!(!event_scope.visible_to(&Scope::group("group_y")));
        assert!(event_scope.visible_to(&Scope::groups(["group_x", "group_y"])));
    }

    #[test]
    fn reference_weight_defaults_to_neutral_on_deserialize() {
        let reference: Reference = serde_json::from_value(json!({ "event_id": 7 })).unwrap();
        assert_eq!(reference.event_id, EventId(7));
        assert_eq!(reference.weight, RefWeight::neutral());
    }

    #[test]
    fn intention_round_trips_through_serde() {
        let intention = Intention::new(
            "int_000001_0001",
            "actor_1",
            "speak",
            json!({ "text": "hello" }),
            Scope::Public,
            3,
        )
        .with_urgency(0.8);

        let raw = serde_json::to_string(&intention).unwrap();
        let decoded: Intention = serde_json::from_str(&raw).unwrap();
        assert_eq!(intention, decoded);
    }

    #[test]
    fn component_max_merges_weights() {
        let a = RefWeight {
            stance: -0.5,
            inspiration: 0.9,
            dependency: 0.1,
        };
        let b = RefWeight {
            stance: 0.2,
            inspiration: 0.3,
            dependency: 0.4,
        };
        let merged = a.component_max(b);
        assert_eq!(merged.stance, 0.2);
        assert_eq!(merged.inspiration, 0.9);
        assert_eq!(merged.dependency, 0.4);
    }
}
