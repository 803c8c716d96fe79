//! Fleet Upgrade Library
//!
//! Compares the containers running on a fleet of docker hosts against an
//! upgrade manifest, pins the new versions in each host's environment file and
//! restarts the affected compose services over SSH.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod remote;
pub mod storage;
pub mod utils;
