//! Pending intention queue.
//!
//! Selection order: among intentions whose proposer is eligible under the
//! cooldown guard, an intention with urgency set beats one without; higher
//! urgency beats lower; arrival order breaks the remaining ties. An
//! ineligible intention is skipped, not dropped, and stays queued for a
//! later tick. Popped intentions never re-enter the queue.

use std::collections::VecDeque;

use contracts::Intention;

use crate::cooldown::CooldownGuard;

#[derive(Debug)]
struct QueuedIntention {
    seq: u64,
    intention: Intention,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    queue: VecDeque<QueuedIntention>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, intention: Intention) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push_back(QueuedIntention { seq, intention });
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drain the queue without selection, oldest first. Used when a
    /// session stops and undecided intentions must be reported.
    pub fn drain_pending(&mut self) -> Vec<Intention> {
        self.queue.drain(..).map(|item| item.intention).collect()
    }

    /// Pop the next intention to arbitrate at `now`, or `None` when no
    /// queued proposer is currently eligible.
    pub fn next(&mut self, guard: &CooldownGuard, now: contracts::Tick) -> Option<Intention> {
        let mut best: Option<(usize, &QueuedIntention)> = None;
        for (index, item) in self.queue.iter().enumerate() {
            if !guard.is_eligible(&item.intention.proposer, &item.intention.kind, now) {
                continue;
            }
            best = match best {
                None => Some((index, item)),
                Some((_, current)) if prefers(item, current) => Some((index, item)),
                keep => keep,
            };
        }
        let index = best.map(|(index, _)| index)?;
        self.queue.remove(index).map(|item| item.intention)
    }
}

/// Whether `candidate` should be arbitrated before `incumbent`.
fn prefers(candidate: &QueuedIntention, incumbent: &QueuedIntention) -> bool {
    match (candidate.intention.urgency, incumbent.intention.urgency) {
        (Some(_), None) => true,
        (None, Some(_)) => false,
        (Some(a), Some(b)) => match a.total_cmp(&b) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => candidate.seq < incumbent.seq,
        },
        (None, None) => candidate.seq < incumbent.seq,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Scope, SessionConfig};
    use serde_json::json;

    fn guard() -> CooldownGuard {
        CooldownGuard::from_config(&SessionConfig {
            actor_cooldown_ticks: 5,
            global_gap_ticks: 0,
            ..SessionConfig::default()
        })
    }

    fn intention(id: &str, proposer: &str) -> Intention {
        Intention::new(id, proposer, "speak", json!({ "text": id }), Scope::Public, 0)
    }

    #[test]
    fn fifo_without_urgency() {
        let mut scheduler = Scheduler::new();
        scheduler.enqueue(intention("int_a", "actor_1"));
        scheduler.enqueue(intention("int_b", "actor_2"));
        let guard = guard();
        assert_eq!(scheduler.next(&guard, 0).unwrap().intention_id, "int_a");
        assert_eq!(scheduler.next(&guard, 0).unwrap().intention_id, "int_b");
        assert!(scheduler.next(&guard, 0).is_none());
    }

    #[test]
    fn urgency_present_beats_absent_and_higher_beats_lower() {
        let mut scheduler = Scheduler::new();
        scheduler.enqueue(intention("int_plain", "actor_1"));
        scheduler.enqueue(intention("int_low", "actor_2").with_urgency(0.2));
        scheduler.enqueue(intention("int_high", "actor_3").with_urgency(0.9));
        let guard = guard();
        assert_eq!(scheduler.next(&guard, 0).unwrap().intention_id, "int_high");
        assert_eq!(scheduler.next(&guard, 0).unwrap().intention_id, "int_low");
        assert_eq!(scheduler.next(&guard, 0).unwrap().intention_id, "int_plain");
    }

    #[test]
    fn equal_urgency_falls_back_to_arrival_order() {
        let mut scheduler = Scheduler::new();
        scheduler.enqueue(intention("int_first", "actor_1").with_urgency(0.5));
        scheduler.enqueue(intention("int_second", "actor_2").with_urgency(0.5));
        let guard = guard();
        assert_eq!(scheduler.next(&guard, 0).unwrap().intention_id, "int_first");
    }

    #[test]
    fn ineligible_proposer_is_skipped_not_dropped() {
        let mut guard = guard();
        guard.record_emission("actor_1", "speak", 0);

        let mut scheduler = Scheduler::new();
        scheduler.enqueue(intention("int_cooling", "actor_1").with_urgency(1.0));
        scheduler.enqueue(intention("int_ready", "actor_2"));

        // actor_1 emitted at tick 0 with interval 5, so its urgent
        // intention waits while actor_2 goes first.
        assert_eq!(scheduler.next(&guard, 2).unwrap().intention_id, "int_ready");
        assert!(scheduler.next(&guard, 2).is_none());
        assert_eq!(scheduler.len(), 1);
        assert_eq!(
            scheduler.next(&guard, 5).unwrap().intention_id,
            "int_cooling"
        );
    }

    #[test]
    fn drain_returns_remaining_in_arrival_order() {
        let mut scheduler = Scheduler::new();
        scheduler.enqueue(intention("int_a", "actor_1").with_urgency(0.9));
        scheduler.enqueue(intention("int_b", "actor_2"));
        let drained = scheduler.drain_pending();
        assert_eq!(drained[0].intention_id, "int_a");
        assert_eq!(drained[1].intention_id, "int_b");
        assert!(scheduler.is_empty());
    }
}
