//! Deployment module

pub mod applier;
pub mod arch;
pub mod builder;
pub mod fsm;
pub mod network;
pub mod probe;
pub mod reconciler;
pub mod waiter;
