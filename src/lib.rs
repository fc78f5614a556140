//! Cvilo intake — a chat bot that collects a resume one answer at a time.

pub mod channels;
pub mod config;
pub mod delivery;
pub mod error;
pub mod intake;
pub mod store;
pub mod sweeper;
