//! HTTP control plane client

pub mod client;
pub mod plane;
