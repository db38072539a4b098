//! Actor profiles and the directory the router resolves recipients from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use contracts::{ActorId, Event, EventId, Scope};

/// A participant in the session. Actors never write to the ledger; they
/// propose intentions and remember the events delivered to them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub expertise: Vec<String>,
    #[serde(default)]
    pub priority: f64,
    #[serde(default)]
    pub scope: Scope,
    /// Ids of events this actor has observed, in delivery order.
    #[serde(default)]
    pub memory: Vec<EventId>,
}

impl Actor {
    pub fn new(
        id: impl Into<ActorId>,
        name: impl Into<String>,
        role: impl Into<String>,
        scope: Scope,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: role.into(),
            expertise: Vec::new(),
            priority: 0.0,
            scope,
            memory: Vec::new(),
        }
    }

    pub fn with_expertise<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expertise = topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    /// Whether this actor can see an event with the given scope.
    pub fn can_see(&self, scope: &Scope) -> bool {
        scope.visible_to(&self.scope)
    }

    /// Record an observed event. This is the only place actor memory
    /// grows; re-delivery of the same event is ignored.
    pub fn observe(&mut self, event: &Event) {
        if self.memory.last() != Some(&event.event_id) {
            self.memory.push(event.event_id);
        }
    }
}

/// All actors in the session, keyed by id for deterministic iteration.
#[derive(Debug, Default)]
pub struct ActorDirectory {
    actors: BTreeMap<ActorId, Actor>,
}

impl ActorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, actor: Actor) {
        self.actors.insert(actor.id.clone(), actor);
    }

    pub fn get(&self, id: &str) -> Option<&Actor> {
        self.actors.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Actor> {
        self.actors.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.actors.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Actor> {
        self.actors.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Actor> {
        self.actors.values_mut()
    }

    /// Actor ids whose own scope intersects the given event scope, in id
    /// order. Computed at commit time and frozen into the event.
    pub fn resolve_recipients(&self, scope: &Scope) -> Vec<ActorId> {
        self.actors
            .values()
            .filter(|actor| actor.can_see(scope))
            .map(|actor| actor.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{tick_stamp, SCHEMA_VERSION_V1};
    use serde_json::json;

    fn event(id: u64, scope: Scope) -> Event {
        Event {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            event_id: EventId(id),
            kind: "speak".to_string(),
            sender: "actor_1".to_string(),
            sender_name: "Mira".to_string(),
            sender_role: "host".to_string(),
            scope,
            content: json!({ "text": "hi" }),
            references: Vec::new(),
            tags: Vec::new(),
            recipients: Vec::new(),
            completed: false,
            tick: 1,
            created_at: tick_stamp(1),
        }
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
    fn public_events_reach_everyone() {
        let recipients = directory().resolve_recipients(&Scope::Public);
        assert_eq!(recipients, vec!["actor_1", "actor_2", "actor_3"]);
    }

    #[test]
    fn group_events_reach_intersecting_actors_only() {
        let recipients = directory().resolve_recipients(&Scope::group("research"));
        // The public-scoped actor observes everything; the ops actor
        // shares no group with the event.
        assert_eq!(recipients, vec!["actor_1", "actor_2"]);
    }

    #[test]
    fn observe_appends_once_per_delivery() {
        let mut actor = Actor::new("actor_1", "Mira", "host", Scope::Public);
        let first = event(1, Scope::Public);
        actor.observe(&first);
        actor.observe(&first);
        actor.observe(&event(2, Scope::Public));
        assert_eq!(actor.memory, vec![EventId(1), EventId(2)]);
    }
}
