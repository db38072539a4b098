//! Agent controller: turns committed events into new proposals.
//!
//! After each commit the controller delivers the event into the memory of
//! every actor whose scope admits it, then asks the proposal strategy, on
//! behalf of each non-sender among them, whether to react. Stamped
//! intentions come back to the caller for scheduling; the controller never
//! touches the ledger or the router.

use contracts::{Event, Intention, Tick};
use tracing::debug;

use crate::actor::ActorDirectory;
use crate::ledger::EventLedger;
use crate::strategy::{FallbackStrategy, ProposalContext, ProposalStrategy};

/// How much visible history a strategy gets to look at.
const RECENT_WINDOW: usize = 10;

pub struct AgentController {
    strategy: FallbackStrategy,
    seq: u32,
}

impl AgentController {
    /// The given strategy is always wrapped with the rule-based fallback.
    pub fn new(strategy: Box<dyn ProposalStrategy>) -> Self {
        Self {
            strategy: FallbackStrategy::new(strategy),
            seq: 0,
        }
    }

    /// Deliver `event` and collect the reactions it provokes.
    pub fn react(
        &mut self,
        event: &Event,
        directory: &mut ActorDirectory,
        ledger: &EventLedger,
        now: Tick,
    ) -> Vec<Intention> {
        for actor in directory.iter_mut() {
            if actor.can_see(&event.scope) {
                actor.observe(event);
            }
        }

        let referenced = event
            .references
            .iter()
            .filter_map(|reference| ledger.get(reference.event_id))
            .collect::<Vec<_>>();

        let mut intentions = Vec::new();
        for actor in directory.iter() {
            if actor.id == event.sender || !actor.can_see(&event.scope) {
                continue;
            }
            let ctx = ProposalContext {
                actor,
                trigger: event,
                recent: ledger.recent_visible(&actor.scope, RECENT_WINDOW),
                referenced: referenced.clone(),
            };
            let seeds = match self.strategy.propose(&ctx) {
                Ok(seeds) => seeds,
                // FallbackStrategy already degraded; a residual error
                // means even the fallback declined, which it never does.
                Err(_) => Vec::new(),
            };
            for seed in seeds {
                self.seq += 1;
                let mut intention = Intention::new(
                    format!("int_{now:06}_{:04}", self.seq),
                    actor.id.clone(),
                    seed.kind,
                    seed.payload,
                    seed.scope,
                    now,
                )
                .with_references(seed.references);
                intention.tags = seed.tags;
                intention.urgency = seed.urgency;
                debug!(
                    intention_id = %intention.intention_id,
                    proposer = %intention.proposer,
                    trigger = %event.event_id,
                    "reaction proposed"
                );
                intentions.push(intention);
            }
        }
        intentions
    }
}

impl std::fmt::Debug for AgentController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentController")
            .field("strategy", &self.strategy)
            .field("seq", &self.seq)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Actor;
    use crate::strategy::RuleBasedStrategy;
    use contracts::{tick_stamp, EventId, Scope, SCHEMA_VERSION_V1};
    use serde_json::json;

    fn committed(ledger: &mut EventLedger, kind: &str, scope: Scope, tick: Tick) -> Event {
        let event = Event {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            event_id: EventId::default(),
            kind: kind.to_string(),
            sender: "actor_1".to_string(),
            sender_name: "Mira".to_string(),
            sender_role: "host".to_string(),
            scope,
            content: json!({ "topic": "tariffs" }),
            references: Vec::new(),
            tags: Vec::new(),
            recipients: Vec::new(),
            completed: false,
            tick,
            created_at: tick_stamp(tick),
        };
        let id = ledger.commit(event).expect("commit");
        ledger.get(id).expect("just committed").clone()
    }

    fn directory() -> ActorDirectory {
        let mut directory = ActorDirectory::new();
        directory.insert(Actor::new("actor_1", "Mira", "host", Scope::Public));
        directory.insert(Actor::new(
            "actor_2",
            "Sable",
            "analyst",
            Scope::group("research"),
        ));
        directory.insert(Actor::new(
            "actor_3",
            "Orin",
            "scribe",
            Scope::group("ops"),
        ));
        directory
    }

    #[test]
    fn every_admitted_actor_remembers_the_event() {
        let mut ledger = EventLedger::new();
        let mut directory = directory();
        let mut controller = AgentController::new(Box::new(RuleBasedStrategy::new()));

        let event = committed(&mut ledger, "speak", Scope::Public, 1);
        controller.react(&event, &mut directory, &ledger, 1);

        for actor in directory.iter() {
            assert_eq!(actor.memory, vec![event.event_id], "{}", actor.id);
        }
    }

    #[test]
    fn group_events_skip_outsider_memory_and_reactions() {
        let mut ledger = EventLedger::new();
        let mut directory = directory();
        let mut controller = AgentController::new(Box::new(RuleBasedStrategy::new()));

        let event = committed(&mut ledger, "request_anyone", Scope::group("ops"), 1);
        let intentions = controller.react(&event, &mut directory, &ledger, 1);

        assert!(directory.get("actor_2").unwrap().memory.is_empty());
        // actor_1 observes through its public filter but is the sender;
        // actor_3 shares the group and answers.
        assert_eq!(intentions.len(), 1);
        assert_eq!(intentions[0].proposer, "actor_3");
    }

    #[test]
    fn intention_ids_are_unique_and_tick_stamped() {
        let mut ledger = EventLedger::new();
        let mut directory = directory();
        let mut controller = AgentController::new(Box::new(RuleBasedStrategy::new()));

        let event = committed(&mut ledger, "request_anyone", Scope::Public, 4);
        let intentions = controller.react(&event, &mut directory, &ledger, 4);

        assert_eq!(intentions.len(), 2);
        assert_eq!(intentions[0].intention_id, "int_000004_0001");
        assert_eq!(intentions[1].intention_id, "int_000004_0002");
        assert_eq!(intentions[0].references[0].event_id, event.event_id);
    }
}
