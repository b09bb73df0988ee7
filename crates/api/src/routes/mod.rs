//! HTTP routes

pub mod outputs;
pub mod pids;
