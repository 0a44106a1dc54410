//! Data models

pub mod plane;
pub mod result;
pub mod spec;
