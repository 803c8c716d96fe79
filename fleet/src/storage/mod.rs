//! Settings and remote layout

pub mod layout;
pub mod settings;
