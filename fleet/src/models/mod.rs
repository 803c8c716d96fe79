//! Data models

pub mod host;
pub mod manifest;
pub mod report;
