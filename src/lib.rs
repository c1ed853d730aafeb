//! ThaiGold Library
//!
//! Thai gold price acquisition: source fallback, bounded history and an
//! adaptive refresh scheduler.

pub mod clock;
pub mod config;
pub mod error;
pub mod history;
pub mod persistence;
pub mod scheduler;
pub mod selector;
pub mod service;
pub mod settings;
pub mod sources;
pub mod types;

#[cfg(feature = "api")]
pub mod api;
