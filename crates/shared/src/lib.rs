//! Wire and domain types shared between the chat client core and its embedders.

pub mod domain;
pub mod error;
pub mod events;
pub mod protocol;
