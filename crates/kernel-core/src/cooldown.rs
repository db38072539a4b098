//! Per-actor and global emission throttling.
//!
//! The guard is consulted twice per intention: by the scheduler to skip
//! not-yet-eligible items, and again by the router at submit time to close
//! the race between scheduling and arbitration.

use std::collections::BTreeMap;

use contracts::{ActorId, SessionConfig, Tick};

/// Throttle state: last emission per actor plus the last global emission.
///
/// The guard keeps a single timestamp per actor regardless of kind; a
/// per-kind interval override changes how far past that timestamp the
/// actor must wait, not which emissions are counted.
#[derive(Debug, Clone, Default)]
pub struct CooldownGuard {
    actor_interval: u64,
    kind_intervals: BTreeMap<String, u64>,
    global_gap: u64,
    last_by_actor: BTreeMap<ActorId, Tick>,
    last_global: Option<Tick>,
}

impl CooldownGuard {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            actor_interval: config.actor_cooldown_ticks,
            kind_intervals: config.kind_cooldown_ticks.clone(),
            global_gap: config.global_gap_ticks,
            last_by_actor: BTreeMap::new(),
            last_global: None,
        }
    }

    fn interval_for(&self, kind: &str) -> u64 {
        self.kind_intervals
            .get(kind)
            .copied()
            .unwrap_or(self.actor_interval)
    }

    /// Earliest tick at which the actor may emit an event of this kind:
    /// the greater of (last actor emission + interval) and (last global
    /// emission + global gap); tick 0 if nothing was ever emitted.
    pub fn eligible_at(&self, actor: &str, kind: &str) -> Tick {
        let actor_ready = self
            .last_by_actor
            .get(actor)
            .map(|last| last + self.interval_for(kind))
            .unwrap_or(0);
        let global_ready = self
            .last_global
            .map(|last| last + self.global_gap)
            .unwrap_or(0);
        actor_ready.max(global_ready)
    }

    pub fn is_eligible(&self, actor: &str, kind: &str, now: Tick) -> bool {
        now >= self.eligible_at(actor, kind)
    }

    pub fn record_emission(&mut self, actor: &str, _kind: &str, tick: Tick) {
        self.last_by_actor.insert(actor.to_string(), tick);
        self.last_global = Some(tick);
    }

    /// Reinstate a persisted emission timestamp during session resume.
    pub fn restore_emission(&mut self, actor: &str, tick: Tick) {
        let entry = self.last_by_actor.entry(actor.to_string()).or_insert(tick);
        if tick > *entry {
            *entry = tick;
        }
        if self.last_global.map_or(true, |last| tick > last) {
            self.last_global = Some(tick);
        }
    }

    /// Conservative reset: everyone immediately eligible. Only reached via
    /// the explicit `reset_cooldowns_on_resume` flag.
    pub fn reset(&mut self) {
        self.last_by_actor.clear();
        self.last_global = None;
    }
}
