// Terminal command handlers

pub mod chat;

pub use chat::*;
