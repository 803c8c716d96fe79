//! Remote execution over SSH

pub mod command;
pub mod session;
pub mod ssh;
