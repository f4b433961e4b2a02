// ABOUTME: Root library module exposing the bot's platform wiring
// ABOUTME: Config, SQLite storage, auto-join, built-in pollers, and the HTTP surface

pub mod autojoin;
pub mod config;
pub mod paths;
pub mod pollers;
pub mod server;
pub mod store;

// Re-export the ingestion core for convenience
pub use relaybot_core::metrics;
pub use relaybot_core::{ListenerRegistry, PollingScheduler, SyncClient, SyncConfig};
