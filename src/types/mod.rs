//! Core data types shared across the bot core (spec.md §3).

pub mod command;
pub mod message;
pub mod usage;

pub use command::*;
pub use message::*;
pub use usage::*;
