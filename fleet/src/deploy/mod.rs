//! Upgrade module

pub mod drift;
pub mod driver;
pub mod fleet;
pub mod fsm;
pub mod patcher;
pub mod staging;
