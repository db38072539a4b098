//! Single-writer arbitration kernel for a small society of autonomous actors.
//!
//! Actors never emit facts directly: they propose an [`contracts::Intention`],
//! the policy engine arbitrates it, and only approved intentions become
//! committed, broadcast [`contracts::Event`]s. The kernel is strictly
//! single-threaded and tick-driven; the ledger has exactly one writer, the
//! [`router::Router`].

pub mod actor;
pub mod broadcast;
pub mod controller;
pub mod cooldown;
pub mod ledger;
pub mod policy;
pub mod reference;
pub mod request;
pub mod router;
pub mod runtime;
pub mod scheduler;
pub mod strategy;
