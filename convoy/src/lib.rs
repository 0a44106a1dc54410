//! Convoy Library
//!
//! Reconciles a container service on a managed orchestrator with a
//! desired state built from deployment inputs and stack outputs.

pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod plane;
pub mod report;
pub mod settings;
pub mod stack;
pub mod utils;
