//! Open request tracking.
//!
//! Requests are ordinary committed events of the three request kinds.
//! The tracker watches subsequent commits for referencing replies, flips
//! the ledger's `completed` flag when a request is satisfied, and hands
//! back a completion announcement as a normal intention from the system
//! actor. The announcement goes through the scheduler and router like any
//! other intention; the tracker itself never emits an event.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;
use tracing::{debug, info};

use contracts::{ActorId, Event, EventId, Intention, Reference, Scope, Tick};

use crate::ledger::{EventLedger, LedgerError};

/// Proposer id stamped on completion announcements.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Anyone,
    Specific,
    All,
}

impl RequestKind {
    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "request_anyone" => Some(Self::Anyone),
            "request_specific" => Some(Self::Specific),
            "request_all" => Some(Self::All),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct OpenRequest {
    kind: RequestKind,
    sender: ActorId,
    scope: Scope,
    target: Option<ActorId>,
    /// For `request_all`: recipients at commit time, minus the sender.
    expected: BTreeSet<ActorId>,
    responders: BTreeSet<ActorId>,
}

impl OpenRequest {
    fn accepts(&self, responder: &str) -> bool {
        if responder == self.sender {
            return false;
        }
        match self.kind {
            RequestKind::Anyone => true,
            RequestKind::Specific => self.target.as_deref() == Some(responder),
            RequestKind::All => self.expected.contains(responder),
        }
    }

    fn satisfied(&self) -> bool {
        match self.kind {
            RequestKind::Anyone | RequestKind::Specific => !self.responders.is_empty(),
            RequestKind::All => self.responders.is_superset(&self.expected),
        }
    }
}

#[derive(Debug, Default)]
pub struct RequestTracker {
    open: BTreeMap<EventId, OpenRequest>,
    announce_seq: u32,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn is_open(&self, event_id: EventId) -> bool {
        self.open.contains_key(&event_id)
    }

    /// Feed one freshly committed event. Returns the completion
    /// announcements it produced, to be enqueued by the caller.
    pub fn note_event(
        &mut self,
        event: &Event,
        ledger: &mut EventLedger,
        now: Tick,
    ) -> Result<Vec<Intention>, LedgerError> {
        let mut announcements = Vec::new();

        // Replies first: an event can both answer one request and open
        // another.
        let mut fulfilled = Vec::new();
        for reference in &event.references {
            let Some(request) = self.open.get_mut(&reference.event_id) else {
                continue;
            };
            if !request.accepts(&event.sender) {
                continue;
            }
            request.responders.insert(event.sender.clone());
            debug!(
                request_id = %reference.event_id,
                responder = %event.sender,
                "reply recorded against open request"
            );
            if request.satisfied() {
                fulfilled.push(reference.event_id);
            }
        }
        for request_id in fulfilled {
            announcements.push(self.complete(request_id, ledger, now)?);
        }

        if let Some(kind) = RequestKind::parse(&event.kind) {
            let target = event
                .content
                .get("target")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let expected = event
                .recipients
                .iter()
                .filter(|id| **id != event.sender)
                .cloned()
                .collect::<BTreeSet<_>>();
            let request = OpenRequest {
                kind,
                sender: event.sender.clone(),
                scope: event.scope.clone(),
                target,
                expected,
                responders: BTreeSet::new(),
            };
            // A request_all with nobody to ask is complete on arrival.
            if request.satisfied() {
                self.open.insert(event.event_id, request);
                announcements.push(self.complete(event.event_id, ledger, now)?);
            } else {
                self.open.insert(event.event_id, request);
            }
        }

        Ok(announcements)
    }

    fn complete(
        &mut self,
        request_id: EventId,
        ledger: &mut EventLedger,
        now: Tick,
    ) -> Result<Intention, LedgerError> {
        let request = self
            .open
            .remove(&request_id)
            .ok_or(LedgerError::UnknownEvent(request_id))?;
        ledger.mark_completed(request_id)?;
        info!(%request_id, "request fulfilled");
        self.announce_seq += 1;
        let intention = Intention::new(
            format!("int_{now:06}_sys{:04}", self.announce_seq),
            SYSTEM_ACTOR,
            "speak",
            json!({
                "text": format!("request {request_id} has been fulfilled"),
                "request_id": request_id.value(),
            }),
            request.scope,
            now,
        )
        .with_references(vec![Reference::bare(request_id)]);
        Ok(intention)
    }
}
