//! Append-only event ledger: the timeline of committed facts plus an id
//! index for reference resolution.
//!
//! The ledger has a single writer (the router). Integrity violations mean
//! that invariant was broken and are fatal, not recoverable.

use std::collections::BTreeMap;
use std::fmt;

use contracts::{Event, EventId, Scope, Tick};

#[derive(Debug)]
pub enum LedgerError {
    /// A commit would reuse or skip backwards over an existing id.
    Integrity { event_id: EventId, detail: String },
    /// `mark_completed` targeted an id that never resolved.
    UnknownEvent(EventId),
    /// Resume data was handed to a ledger that already holds events.
    ResumeIntoNonEmpty,
    /// Persisted events were not strictly increasing by id.
    CorruptSession { detail: String },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integrity { event_id, detail } => {
                write!(f, "ledger integrity violation at event {event_id}: {detail}")
            }
            Self::UnknownEvent(event_id) => write!(f, "unknown event id {event_id}"),
            Self::ResumeIntoNonEmpty => write!(f, "cannot resume into a non-empty ledger"),
            Self::CorruptSession { detail } => write!(f, "corrupt session data: {detail}"),
        }
    }
}

impl std::error::Error for LedgerError {}

/// Ordered, append-only sequence of committed events with an id index.
#[derive(Debug, Default)]
pub struct EventLedger {
    events: Vec<Event>,
    index_by_id: BTreeMap<EventId, usize>,
    next_id: EventId,
}

impl EventLedger {
    /// Fresh ledger for a new session; the first committed event gets id 1.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            index_by_id: BTreeMap::new(),
            next_id: EventId(1),
        }
    }

    /// Rebuild a ledger from persisted session events. Ids must be strictly
    /// increasing; numbering continues after the last persisted id.
    pub fn resume(events: Vec<Event>) -> Result<Self, LedgerError> {
        let mut ledger = Self::new();
        let mut last_seen: Option<EventId> = None;
        for event in events {
            if let Some(last) = last_seen {
                if event.event_id <= last {
                    return Err(LedgerError::CorruptSession {
                        detail: format!(
                            "event id {} does not increase past {}",
                            event.event_id, last
                        ),
                    });
                }
            }
            last_seen = Some(event.event_id);
            ledger
                .index_by_id
                .insert(event.event_id, ledger.events.len());
            ledger.events.push(event);
        }
        ledger.next_id = last_seen.map(EventId::next).unwrap_or(EventId(1));
        Ok(ledger)
    }

    /// Continue numbering after an externally known last id without
    /// reloading the timeline (empty ledgers only).
    pub fn resume_after(&mut self, last_id: EventId) -> Result<(), LedgerError> {
        if !self.events.is_empty() {
            return Err(LedgerError::ResumeIntoNonEmpty);
        }
        if last_id.next() > self.next_id {
            self.next_id = last_id.next();
        }
        Ok(())
    }

    /// Append a committed event, assigning the next strictly-increasing id.
    pub fn commit(&mut self, mut event: Event) -> Result<EventId, LedgerError> {
        let event_id = self.next_id;
        if self.index_by_id.contains_key(&event_id) {
            return Err(LedgerError::Integrity {
                event_id,
                detail: "duplicate event id".to_string(),
            });
        }
        if let Some(last) = self.last_id() {
            if event_id <= last {
                return Err(LedgerError::Integrity {
                    event_id,
                    detail: format!("id not increasing past {last}"),
                });
            }
        }
        event.event_id = event_id;
        self.index_by_id.insert(event_id, self.events.len());
        self.events.push(event);
        self.next_id = event_id.next();
        Ok(event_id)
    }

    pub fn get(&self, event_id: EventId) -> Option<&Event> {
        self.index_by_id
            .get(&event_id)
            .and_then(|position| self.events.get(*position))
    }

    pub fn contains(&self, event_id: EventId) -> bool {
        self.index_by_id.contains_key(&event_id)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last_id(&self) -> Option<EventId> {
        self.events.last().map(|event| event.event_id)
    }

    /// The most recent `n` events visible through `filter`, newest last.
    pub fn recent_visible(&self, filter: &Scope, n: usize) -> Vec<&Event> {
        let mut visible = self
            .events
            .iter()
            .rev()
            .filter(|event| event.scope.visible_to(filter))
            .take(n)
            .collect::<Vec<_>>();
        visible.reverse();
        visible
    }

    /// Events newer than the given tick, oldest first.
    pub fn since_tick(&self, tick: Tick) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(move |event| event.tick > tick)
    }

    /// Flip the completion flag on a committed request event. Reserved to
    /// the request-completion collaborator; the core never calls this.
    pub fn mark_completed(&mut self, event_id: EventId) -> Result<(), LedgerError> {
        let position = *self
            .index_by_id
            .get(&event_id)
            .ok_or(LedgerError::UnknownEvent(event_id))?;
        self.events[position].completed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{tick_stamp, SCHEMA_VERSION_V1};
    use serde_json::json;

    fn draft(kind: &str, sender: &str, tick: Tick) -> Event {
        Event {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            event_id: EventId(0),
            kind: kind.to_string(),
            sender: sender.to_string(),
            sender_name: String::new(),
            sender_role: String::new(),
            scope: Scope::Public,
            content: json!({ "text": "hi" }),
            references: Vec::new(),
            tags: Vec::new(),
            recipients: Vec::new(),
            completed: false,
            tick,
            created_at: tick_stamp(tick),
        }
    }

    #[test]
    fn commit_assigns_strictly_increasing_ids_from_one() {
        let mut ledger = EventLedger::new();
        let first = ledger.commit(draft("speak", "a", 0)).unwrap();
        let second = ledger.commit(draft("speak", "b", 1)).unwrap();
        assert_eq!(first, EventId(1));
        assert_eq!(second, EventId(2));
        assert_eq!(ledger.last_id(), Some(EventId(2)));
    }

    #[test]
    fn index_resolves_committed_ids() {
        let mut ledger = EventLedger::new();
        let id = ledger.commit(draft("submit", "a", 4)).unwrap();
        let found = ledger.get(id).unwrap();
        assert_eq!(found.kind, "submit");
        assert_eq!(found.tick, 4);
        assert!(ledger.get(EventId(99)).is_none());
    }

    #[test]
    fn resume_continues_numbering_after_last_persisted_id() {
        let mut seed = EventLedger::new();
        seed.commit(draft("speak", "a", 0)).unwrap();
        seed.commit(draft("speak", "b", 1)).unwrap();
        let persisted = seed.events().to_vec();

        let mut resumed = EventLedger::resume(persisted).unwrap();
        let next = resumed.commit(draft("speak", "c", 2)).unwrap();
        assert_eq!(next, EventId(3));
    }

    #[test]
    fn resume_rejects_non_increasing_ids() {
        let mut a = draft("speak", "a", 0);
        a.event_id = EventId(2);
        let mut b = draft("speak", "b", 1);
        b.event_id = EventId(2);
        let result = EventLedger::resume(vec![a, b]);
        assert!(matches!(result, Err(LedgerError::CorruptSession { .. })));
    }

    #[test]
    fn resume_after_rejects_non_empty_ledger() {
        let mut ledger = EventLedger::new();
        ledger.commit(draft("speak", "a", 0)).unwrap();
        assert!(matches!(
            ledger.resume_after(EventId(10)),
            Err(LedgerError::ResumeIntoNonEmpty)
        ));
    }

    #[test]
    fn mark_completed_flips_only_the_flag() {
        let mut ledger = EventLedger::new();
        let id = ledger.commit(draft("request_anyone", "a", 0)).unwrap();
        assert!(!ledger.get(id).unwrap().completed);
        ledger.mark_completed(id).unwrap();
        assert!(ledger.get(id).unwrap().completed);
        assert!(matches!(
            ledger.mark_completed(EventId(42)),
            Err(LedgerError::UnknownEvent(_))
        ));
    }

    #[test]
    fn recent_visible_filters_by_scope() {
        let mut ledger = EventLedger::new();
        let mut secret = draft("speak", "a", 0);
        secret.scope = Scope::group("group_y");
        ledger.commit(secret).unwrap();
        ledger.commit(draft("speak", "b", 1)).unwrap();

        let seen = ledger.recent_visible(&Scope::group("group_x"), 10);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].sender, "b");
    }
}
