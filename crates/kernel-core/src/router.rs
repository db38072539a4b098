//! The single path from intention to committed event.
//!
//! Every intention, whatever proposed it, goes through [`Router::submit`]:
//! cooldown first, policy second, and only then the deterministic mapping
//! into an event, the ledger commit, and the broadcast. The router is also
//! the only code that moves an intention out of `Pending`.

use contracts::{
    tick_stamp, Decision, Event, EventId, Intention, IntentionStatus, Tick, Violation,
    ViolationKind, SCHEMA_VERSION_V1,
};
use tracing::{debug, info};

use crate::actor::ActorDirectory;
use crate::broadcast::ObserverHub;
use crate::cooldown::CooldownGuard;
use crate::ledger::{EventLedger, LedgerError};
use crate::policy::PolicyEngine;
use crate::reference::normalize_references;

/// What became of one submitted intention.
#[derive(Debug)]
pub struct SubmitOutcome {
    pub decision: Decision,
    /// Set only when the intention was approved and committed.
    pub event_id: Option<EventId>,
}

/// One decided intention, kept for the session audit trail.
#[derive(Debug)]
pub struct AuditRecord {
    pub intention: Intention,
    pub decision: Decision,
    pub event_id: Option<EventId>,
    pub tick: Tick,
}

#[derive(Debug)]
pub struct Router {
    policy: PolicyEngine,
    audit: Vec<AuditRecord>,
}

impl Router {
    pub fn new(policy: PolicyEngine) -> Self {
        Self {
            policy,
            audit: Vec::new(),
        }
    }

    pub fn audit_trail(&self) -> &[AuditRecord] {
        &self.audit
    }

    /// Arbitrate one intention at tick `now`.
    ///
    /// Cooldown suppression happens before policy evaluation; a throttled
    /// intention is decided without its rules ever running. An approved
    /// intention is mapped, committed, recorded against the cooldown
    /// guard, and broadcast, in that order. Errors out of the ledger are
    /// fatal to the caller; the intention is not decided in that case.
    pub fn submit(
        &mut self,
        mut intention: Intention,
        now: Tick,
        ledger: &mut EventLedger,
        guard: &mut CooldownGuard,
        directory: &ActorDirectory,
        hub: &mut ObserverHub,
    ) -> Result<SubmitOutcome, LedgerError> {
        if !guard.is_eligible(&intention.proposer, &intention.kind, now) {
            let eligible_at = guard.eligible_at(&intention.proposer, &intention.kind);
            let decision = Decision::suppressed(vec![Violation::new(
                ViolationKind::Throttle,
                "cooldown",
                format!(
                    "proposer {} throttled until tick {eligible_at}",
                    intention.proposer
                ),
            )]);
            debug!(
                intention_id = %intention.intention_id,
                proposer = %intention.proposer,
                eligible_at,
                "intention throttled"
            );
            return Ok(self.record(intention, decision, None, now));
        }

        let proposer = directory.get(&intention.proposer);
        let decision = self.policy.evaluate(&intention, proposer, ledger);
        if !decision.is_approved() {
            debug!(
                intention_id = %intention.intention_id,
                violations = decision.violations.len(),
                "intention suppressed"
            );
            return Ok(self.record(intention, decision, None, now));
        }

        intention.references = normalize_references(&intention.references);
        let event = self.map_to_event(&intention, proposer, directory, now);
        let event_id = ledger.commit(event)?;
        guard.record_emission(&intention.proposer, &intention.kind, now);
        if let Some(committed) = ledger.get(event_id) {
            hub.publish(committed);
        }
        info!(
            intention_id = %intention.intention_id,
            %event_id,
            kind = %intention.kind,
            tick = now,
            "intention committed"
        );
        Ok(self.record(intention, decision, Some(event_id), now))
    }

    /// The deterministic intention-to-event mapping. No clock, no
    /// randomness: identical inputs at the same tick produce identical
    /// events up to the assigned id.
    fn map_to_event(
        &self,
        intention: &Intention,
        proposer: Option<&crate::actor::Actor>,
        directory: &ActorDirectory,
        now: Tick,
    ) -> Event {
        Event {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            event_id: EventId::default(),
            kind: intention.kind.clone(),
            sender: intention.proposer.clone(),
            sender_name: proposer.map(|a| a.name.clone()).unwrap_or_default(),
            sender_role: proposer.map(|a| a.role.clone()).unwrap_or_default(),
            scope: intention.scope.clone(),
            content: intention.payload.clone(),
            references: intention.references.clone(),
            tags: intention.tags.clone(),
            recipients: directory.resolve_recipients(&intention.scope),
            completed: false,
            tick: now,
            created_at: tick_stamp(now),
        }
    }

    fn record(
        &mut self,
        mut intention: Intention,
        decision: Decision,
        event_id: Option<EventId>,
        tick: Tick,
    ) -> SubmitOutcome {
        intention.status = if decision.is_approved() {
            IntentionStatus::Approved
        } else {
            IntentionStatus::Suppressed
        };
        let outcome = SubmitOutcome {
            decision: decision.clone(),
            event_id,
        };
        self.audit.push(AuditRecord {
            intention,
            decision,
            event_id,
            tick,
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Actor;
    use crate::policy::RuleSet;
    use contracts::{Scope, SessionConfig};
    use serde_json::json;

    const DOC: &str = "kinds:\n  speak:\n    require:\n      fields: [payload.text]\n";

    struct Fixture {
        router: Router,
        ledger: EventLedger,
        guard: CooldownGuard,
        directory: ActorDirectory,
        hub: ObserverHub,
    }

    fn fixture() -> Fixture {
        let mut directory = ActorDirectory::new();
        directory.insert(Actor::new("actor_1", "Mira", "host", Scope::Public));
        directory.insert(Actor::new("actor_2", "Sable", "analyst", Scope::Public));
        Fixture {
            router: Router::new(PolicyEngine::new(
                RuleSet::from_yaml_str(DOC).expect("document compiles"),
            )),
            ledger: EventLedger::new(),
            guard: CooldownGuard::from_config(&SessionConfig {
                actor_cooldown_ticks: 3,
                global_gap_ticks: 0,
                ..SessionConfig::default()
            }),
            directory,
            hub: ObserverHub::new(),
        }
    }

    fn speak(id: &str, proposer: &str, tick: Tick) -> Intention {
        Intention::new(
            id,
            proposer,
            "speak",
            json!({ "text": "hello" }),
            Scope::Public,
            tick,
        )
    }

    #[test]
    fn approved_intention_commits_and_records_emission() {
        let mut fx = fixture();
        let outcome = fx
            .router
            .submit(
                speak("int_a", "actor_1", 1),
                1,
                &mut fx.ledger,
                &mut fx.guard,
                &fx.directory,
                &mut fx.hub,
            )
            .expect("submit");

        assert!(outcome.decision.is_approved());
        assert_eq!(outcome.event_id, Some(EventId(1)));
        let event = fx.ledger.get(EventId(1)).expect("committed event");
        assert_eq!(event.sender, "actor_1");
        assert_eq!(event.sender_name, "Mira");
        assert_eq!(event.content, json!({ "text": "hello" }));
        assert_eq!(event.recipients, vec!["actor_1", "actor_2"]);
        assert_eq!(event.created_at, "tick-000001");
        assert!(!fx.guard.is_eligible("actor_1", "speak", 2));
    }

    #[test]
    fn suppressed_intention_leaves_no_ledger_entry() {
        let mut fx = fixture();
        let outcome = fx
            .router
            .submit(
                Intention::new("int_bad", "actor_1", "speak", json!({}), Scope::Public, 1),
                1,
                &mut fx.ledger,
                &mut fx.guard,
                &fx.directory,
                &mut fx.hub,
            )
            .expect("submit");

        assert!(!outcome.decision.is_approved());
        assert_eq!(outcome.event_id, None);
        assert!(fx.ledger.is_empty());
        // A suppressed intention must not start a cooldown window.
        assert!(fx.guard.is_eligible("actor_1", "speak", 1));
    }

    #[test]
    fn throttled_intention_is_decided_without_policy() {
        let mut fx = fixture();
        fx.router
            .submit(
                speak("int_a", "actor_1", 1),
                1,
                &mut fx.ledger,
                &mut fx.guard,
                &fx.directory,
                &mut fx.hub,
            )
            .expect("submit");

        // Missing text would also violate policy, but the throttle check
        // comes first and is the only violation reported.
        let outcome = fx
            .router
            .submit(
                Intention::new("int_b", "actor_1", "speak", json!({}), Scope::Public, 2),
                2,
                &mut fx.ledger,
                &mut fx.guard,
                &fx.directory,
                &mut fx.hub,
            )
            .expect("submit");

        assert_eq!(outcome.decision.violations.len(), 1);
        assert_eq!(outcome.decision.violations[0].kind, ViolationKind::Throttle);
    }

    #[test]
    fn audit_trail_covers_every_decided_intention() {
        let mut fx = fixture();
        fx.router
            .submit(
                speak("int_a", "actor_1", 1),
                1,
                &mut fx.ledger,
                &mut fx.guard,
                &fx.directory,
                &mut fx.hub,
            )
            .expect("submit");
        fx.router
            .submit(
                Intention::new("int_bad", "actor_2", "speak", json!({}), Scope::Public, 2),
                2,
                &mut fx.ledger,
                &mut fx.guard,
                &fx.directory,
                &mut fx.hub,
            )
            .expect("submit");

        let audit = fx.router.audit_trail();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].intention.status, IntentionStatus::Approved);
        assert_eq!(audit[0].event_id, Some(EventId(1)));
        assert_eq!(audit[1].intention.status, IntentionStatus::Suppressed);
        assert_eq!(audit[1].event_id, None);
    }

    #[test]
    fn duplicate_references_are_normalized_into_the_event() {
        let mut fx = fixture();
        fx.router
            .submit(
                speak("int_a", "actor_1", 1),
                1,
                &mut fx.ledger,
                &mut fx.guard,
                &fx.directory,
                &mut fx.hub,
            )
            .expect("submit");

        let mut weighted = contracts::Reference::bare(EventId(1));
        weighted.weight.stance = 0.8;
        let doubled = speak("int_b", "actor_2", 2)
            .with_references(vec![contracts::Reference::bare(EventId(1)), weighted]);
        let outcome = fx
            .router
            .submit(
                doubled,
                2,
                &mut fx.ledger,
                &mut fx.guard,
                &fx.directory,
                &mut fx.hub,
            )
            .expect("submit");

        let event = fx.ledger.get(outcome.event_id.expect("committed")).unwrap();
        assert_eq!(event.references.len(), 1);
        assert_eq!(event.references[0].weight.stance, 0.8);
    }
}
