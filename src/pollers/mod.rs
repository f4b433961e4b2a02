// ABOUTME: Built-in poller implementations and their registration with the core registry
// ABOUTME: Each submodule exposes a SERVICE_TYPE constant and a factory

pub mod url_watch;

use relaybot_core::PollerRegistry;

/// Registry with every built-in poller type.
pub fn builtin_registry() -> PollerRegistry {
    let mut registry = PollerRegistry::new();
    url_watch::register(&mut registry);
    registry
}
