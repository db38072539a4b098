//! The session kernel and its tick loop.
//!
//! One tick arbitrates at most one intention: the scheduler picks among
//! eligible proposers, the router decides, and a commit fans out to the
//! observer hub, the agent controller, and the request tracker before its
//! reactions are queued for later ticks. The loop stops at the configured
//! tick ceiling or after enough consecutive ticks without a decision.

use std::fmt;

use contracts::{Event, EventId, Intention, Scope, SessionConfig, Tick};
use tracing::info;

use crate::actor::ActorDirectory;
use crate::broadcast::{Observer, ObserverHub, SubscriptionHandle};
use crate::controller::AgentController;
use crate::cooldown::CooldownGuard;
use crate::ledger::{EventLedger, LedgerError};
use crate::policy::PolicyEngine;
use crate::request::RequestTracker;
use crate::router::Router;
use crate::scheduler::Scheduler;
use crate::strategy::ProposalStrategy;

#[derive(Debug)]
pub enum RuntimeError {
    Ledger(LedgerError),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ledger(err) => write!(f, "ledger failure: {err}"),
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Ledger(err) => Some(err),
        }
    }
}

impl From<LedgerError> for RuntimeError {
    fn from(err: LedgerError) -> Self {
        Self::Ledger(err)
    }
}

/// What one tick did.
#[derive(Debug)]
pub struct StepReport {
    pub tick: Tick,
    /// `None` when no queued proposer was eligible this tick.
    pub decided: Option<String>,
    pub committed: Option<EventId>,
}

/// End-of-run summary.
#[derive(Debug)]
pub struct SessionReport {
    pub ticks: Tick,
    pub committed: usize,
    pub suppressed: usize,
    pub pending: usize,
    pub last_event_id: Option<EventId>,
}

pub struct Kernel {
    config: SessionConfig,
    ledger: EventLedger,
    guard: CooldownGuard,
    scheduler: Scheduler,
    router: Router,
    directory: ActorDirectory,
    hub: ObserverHub,
    controller: AgentController,
    tracker: RequestTracker,
    tick: Tick,
    idle_streak: u64,
}

impl Kernel {
    pub fn new(
        config: SessionConfig,
        directory: ActorDirectory,
        policy: PolicyEngine,
        strategy: Box<dyn ProposalStrategy>,
    ) -> Self {
        let guard = CooldownGuard::from_config(&config);
        Self {
            config,
            ledger: EventLedger::new(),
            guard,
            scheduler: Scheduler::new(),
            router: Router::new(policy),
            directory,
            hub: ObserverHub::new(),
            controller: AgentController::new(strategy),
            tracker: RequestTracker::new(),
            tick: 0,
            idle_streak: 0,
        }
    }

    /// Rebuild a kernel over a persisted event history. Event numbering
    /// continues after the highest persisted id, the clock resumes after
    /// the last persisted tick, and unless the config says otherwise the
    /// cooldown windows are replayed from the history.
    pub fn resume(
        config: SessionConfig,
        directory: ActorDirectory,
        policy: PolicyEngine,
        strategy: Box<dyn ProposalStrategy>,
        events: Vec<Event>,
    ) -> Result<Self, RuntimeError> {
        let mut kernel = Self::new(config, directory, policy, strategy);
        kernel.tick = events.last().map(|event| event.tick).unwrap_or(0);
        kernel.ledger = EventLedger::resume(events)?;
        if !kernel.config.reset_cooldowns_on_resume {
            for event in kernel.ledger.events() {
                kernel.guard.restore_emission(&event.sender, event.tick);
            }
        }
        info!(
            events = kernel.ledger.len(),
            tick = kernel.tick,
            "session resumed"
        );
        Ok(kernel)
    }

    pub fn ledger(&self) -> &EventLedger {
        &self.ledger
    }

    pub fn directory(&self) -> &ActorDirectory {
        &self.directory
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn subscribe(&mut self, observer: Box<dyn Observer>, filter: Scope) -> SubscriptionHandle {
        self.hub.subscribe(observer, filter)
    }

    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        self.hub.unsubscribe(handle)
    }

    /// Queue an intention ahead of the next tick. Seeds injected before
    /// the first step give a session its opening moves; the clock is
    /// 1-based, so the earliest a seed can be arbitrated is tick 1.
    pub fn seed(&mut self, intention: Intention) {
        self.scheduler.enqueue(intention);
    }

    /// Advance the clock one tick and arbitrate at most one intention.
    pub fn step(&mut self) -> Result<StepReport, RuntimeError> {
        self.tick += 1;
        let now = self.tick;

        let Some(intention) = self.scheduler.next(&self.guard, now) else {
            self.idle_streak += 1;
            return Ok(StepReport {
                tick: now,
                decided: None,
                committed: None,
            });
        };
        self.idle_streak = 0;

        let intention_id = intention.intention_id.clone();
        let outcome = self.router.submit(
            intention,
            now,
            &mut self.ledger,
            &mut self.guard,
            &self.directory,
            &mut self.hub,
        )?;

        if let Some(event_id) = outcome.event_id {
            // Clone out of the ledger so reactions can read history while
            // the tracker flips completion flags.
            let event = self
                .ledger
                .get(event_id)
                .cloned()
                .ok_or(LedgerError::UnknownEvent(event_id))?;
            for reaction in self
                .controller
                .react(&event, &mut self.directory, &self.ledger, now)
            {
                self.scheduler.enqueue(reaction);
            }
            for announcement in self.tracker.note_event(&event, &mut self.ledger, now)? {
                self.scheduler.enqueue(announcement);
            }
        }

        Ok(StepReport {
            tick: now,
            decided: Some(intention_id),
            committed: outcome.event_id,
        })
    }

    /// Run until the tick ceiling, an exhausted queue, or an idle streak.
    pub fn run(&mut self) -> Result<SessionReport, RuntimeError> {
        while self.tick < self.config.max_ticks {
            if self.scheduler.is_empty() {
                break;
            }
            self.step()?;
            if self.config.idle_stop_ticks > 0 && self.idle_streak >= self.config.idle_stop_ticks {
                info!(
                    tick = self.tick,
                    streak = self.idle_streak,
                    "stopping on idle streak"
                );
                break;
            }
        }
        Ok(self.report())
    }

    pub fn report(&self) -> SessionReport {
        let committed = self
            .router
            .audit_trail()
            .iter()
            .filter(|record| record.event_id.is_some())
            .count();
        let suppressed = self.router.audit_trail().len() - committed;
        SessionReport {
            ticks: self.tick,
            committed,
            suppressed,
            pending: self.scheduler.len(),
            last_event_id: self.ledger.last_id(),
        }
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("tick", &self.tick)
            .field("events", &self.ledger.len())
            .field("pending", &self.scheduler.len())
            .finish()
    }
}
