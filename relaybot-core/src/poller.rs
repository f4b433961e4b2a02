// ABOUTME: Poller capability for feed-style integrations and the registry of poller factories.
// ABOUTME: Service records identify a configured integration instance by stable ID and type.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A configured integration instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Stable identifier; the scheduler keys loops by it.
    pub service_id: String,
    /// Looks up the poller factory.
    pub service_type: String,
    #[serde(default)]
    pub owner_user_id: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl ServiceRecord {
    pub fn new(service_id: &str, service_type: &str) -> Self {
        Self {
            service_id: service_id.to_string(),
            service_type: service_type.to_string(),
            owner_user_id: String::new(),
            config: serde_json::Value::Null,
        }
    }
}

/// Something that fetches external state on a fixed interval.
#[async_trait]
pub trait Poller: Send + Sync {
    /// Seconds to sleep between the end of one poll and the start of the next.
    fn interval_secs(&self) -> u64;

    /// One fetch-and-process cycle. Errors are reported by the scheduler and
    /// never stop the loop; retry policy beyond that is the poller's own.
    async fn on_poll(&self, service: &ServiceRecord) -> Result<()>;
}

/// Builds a poller for one service instance.
pub type PollerFactory = Arc<dyn Fn(&ServiceRecord) -> Result<Arc<dyn Poller>> + Send + Sync>;

/// Service type -> poller factory. Populated once at startup.
#[derive(Default, Clone)]
pub struct PollerRegistry {
    factories: HashMap<String, PollerFactory>,
}

impl PollerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for `service_type`, replacing any earlier one.
    pub fn register<F>(&mut self, service_type: &str, factory: F)
    where
        F: Fn(&ServiceRecord) -> Result<Arc<dyn Poller>> + Send + Sync + 'static,
    {
        self.factories
            .insert(service_type.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, service_type: &str) -> bool {
        self.factories.contains_key(service_type)
    }

    pub fn service_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// `None` when no factory is registered for the service's type.
    pub fn create(&self, service: &ServiceRecord) -> Option<Result<Arc<dyn Poller>>> {
        self.factories
            .get(&service.service_type)
            .map(|factory| factory(service))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u64);

    #[async_trait]
    impl Poller for Fixed {
        fn interval_secs(&self) -> u64 {
            self.0
        }

        async fn on_poll(&self, _service: &ServiceRecord) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_registry_lookup_by_type() {
        let mut registry = PollerRegistry::new();
        registry.register("feed", |_| Ok(Arc::new(Fixed(60)) as Arc<dyn Poller>));

        assert!(registry.contains("feed"));
        assert!(!registry.contains("github"));

        let poller = registry
            .create(&ServiceRecord::new("svc-1", "feed"))
            .unwrap()
            .unwrap();
        assert_eq!(poller.interval_secs(), 60);
        assert!(registry.create(&ServiceRecord::new("svc-2", "github")).is_none());
    }

    #[test]
    fn test_factory_sees_service_config() {
        let mut registry = PollerRegistry::new();
        registry.register("feed", |svc| {
            let secs = svc.config["interval"].as_u64().unwrap_or(300);
            Ok(Arc::new(Fixed(secs)) as Arc<dyn Poller>)
        });
        let mut svc = ServiceRecord::new("svc-1", "feed");
        svc.config = serde_json::json!({ "interval": 15 });
        let poller = registry.create(&svc).unwrap().unwrap();
        assert_eq!(poller.interval_secs(), 15);
    }
}
