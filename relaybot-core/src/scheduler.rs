// ABOUTME: Polling scheduler running one background loop per registered service.
// ABOUTME: Generation stamps make restart and stop safe without signalling the running task.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::metrics;
use crate::poller::{Poller, PollerRegistry, ServiceRecord};

/// Stamp value meaning "no loop should be running".
const NOT_RUNNING: u64 = 0;

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("no poller registered for service type '{service_type}' (service {service_id})")]
    NoPoller {
        service_id: String,
        service_type: String,
    },
    #[error("failed to build poller for service {service_id}: {reason}")]
    Factory { service_id: String, reason: String },
}

/// Source of all known services, consulted once by [`PollingScheduler::start`].
pub trait ServiceDirectory: Send + Sync {
    fn list_services(&self) -> anyhow::Result<Vec<ServiceRecord>>;
}

/// Where the scheduler records when each service will next be polled.
pub trait PollTimeStore: Send + Sync {
    fn record_next_poll(&self, service_id: &str, at: DateTime<Utc>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPollTimeStore;

impl PollTimeStore for NoopPollTimeStore {
    fn record_next_poll(&self, _service_id: &str, _at: DateTime<Utc>) {}
}

#[derive(Default)]
struct StampTable {
    stamps: HashMap<String, u64>,
    last: u64,
}

struct SchedulerInner {
    registry: PollerRegistry,
    directory: Arc<dyn ServiceDirectory>,
    poll_times: Arc<dyn PollTimeStore>,
    epoch: Instant,
    table: Mutex<StampTable>,
}

/// Runs and supervises poll loops. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PollingScheduler {
    inner: Arc<SchedulerInner>,
}

impl PollingScheduler {
    pub fn new(
        registry: PollerRegistry,
        directory: Arc<dyn ServiceDirectory>,
        poll_times: Arc<dyn PollTimeStore>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                registry,
                directory,
                poll_times,
                epoch: Instant::now(),
                table: Mutex::new(StampTable::default()),
            }),
        }
    }

    /// Start polling every known service whose type has a registered poller.
    /// Returns how many loops were started.
    pub fn start(&self) -> anyhow::Result<usize> {
        let services = self.inner.directory.list_services()?;
        let mut started = 0;
        for service in services {
            if !self.inner.registry.contains(&service.service_type) {
                tracing::warn!(
                    service_id = %service.service_id,
                    service_type = %service.service_type,
                    "No poller registered for service type; skipping"
                );
                continue;
            }
            let service_id = service.service_id.clone();
            match self.start_polling(service) {
                Ok(()) => started += 1,
                Err(e) => {
                    tracing::error!(service_id = %service_id, error = %e, "Failed to start polling");
                }
            }
        }
        tracing::info!(started, "Polling scheduler started");
        Ok(started)
    }

    /// Start or restart the loop for `service`. Returns once the loop is
    /// spawned; an older loop for the same service exits at its next check.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_polling(&self, service: ServiceRecord) -> Result<(), PollError> {
        let poller = match self.inner.registry.create(&service) {
            None => {
                return Err(PollError::NoPoller {
                    service_id: service.service_id,
                    service_type: service.service_type,
                })
            }
            Some(Err(e)) => {
                return Err(PollError::Factory {
                    service_id: service.service_id,
                    reason: format!("{:#}", e),
                })
            }
            Some(Ok(poller)) => poller,
        };

        // Stamp before spawning so an immediate stop_polling cannot be missed.
        let stamp = self.inner.new_stamp(&service.service_id);
        metrics::set_active_pollers(self.active_count());
        tracing::info!(
            service_id = %service.service_id,
            service_type = %service.service_type,
            stamp,
            "Starting poll loop"
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.poll_loop(service, poller, stamp));
        Ok(())
    }

    /// Mark `service_id` as not running. The loop exits at its next check;
    /// an in-flight poll is not interrupted.
    pub fn stop_polling(&self, service_id: &str) {
        let known = {
            let mut table = self.inner.lock_table();
            match table.stamps.get_mut(service_id) {
                Some(stamp) => {
                    *stamp = NOT_RUNNING;
                    true
                }
                None => false,
            }
        };
        if !known {
            tracing::debug!(service_id = %service_id, "stop_polling for unknown service");
            return;
        }
        metrics::set_active_pollers(self.active_count());
        tracing::info!(service_id = %service_id, "Stopping poll loop");
    }

    pub fn stop_all(&self) {
        {
            let mut table = self.inner.lock_table();
            for stamp in table.stamps.values_mut() {
                *stamp = NOT_RUNNING;
            }
        }
        metrics::set_active_pollers(0);
        tracing::info!("Stopped all poll loops");
    }

    pub fn is_polling(&self, service_id: &str) -> bool {
        self.inner.current_stamp(service_id) != NOT_RUNNING
    }

    /// Number of services with a live stamp.
    pub fn active_count(&self) -> usize {
        let table = self.inner.lock_table();
        table
            .stamps
            .values()
            .filter(|s| **s != NOT_RUNNING)
            .count()
    }
}

impl SchedulerInner {
    fn lock_table(&self) -> std::sync::MutexGuard<'_, StampTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Monotonic-clock stamp, strictly greater than any handed out before.
    fn new_stamp(&self, service_id: &str) -> u64 {
        let now = self.epoch.elapsed().as_nanos() as u64;
        let mut table = self.lock_table();
        let stamp = now.max(table.last + 1);
        table.last = stamp;
        table.stamps.insert(service_id.to_string(), stamp);
        stamp
    }

    fn current_stamp(&self, service_id: &str) -> u64 {
        self.lock_table()
            .stamps
            .get(service_id)
            .copied()
            .unwrap_or(NOT_RUNNING)
    }

    fn is_current(&self, service_id: &str, stamp: u64) -> bool {
        self.current_stamp(service_id) == stamp
    }

    async fn poll_loop(self: Arc<Self>, service: ServiceRecord, poller: Arc<dyn Poller>, stamp: u64) {
        let service_id = service.service_id.as_str();
        loop {
            metrics::record_poll(&service.service_type);
            if let Err(e) = poller.on_poll(&service).await {
                metrics::record_poll_error(&service.service_type);
                tracing::warn!(
                    service_id = %service_id,
                    service_type = %service.service_type,
                    error = %e,
                    "Poll failed"
                );
            }

            if !self.is_current(service_id, stamp) {
                break;
            }

            // A zero interval would spin.
            let secs = poller.interval_secs().max(1);
            self.poll_times
                .record_next_poll(service_id, Utc::now() + chrono::Duration::seconds(secs as i64));
            tokio::time::sleep(Duration::from_secs(secs)).await;

            if !self.is_current(service_id, stamp) {
                break;
            }
        }

        tracing::info!(
            service_id = %service_id,
            stamp,
            current = self.current_stamp(service_id),
            "Poll loop generation changed; terminating"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Empty;

    impl ServiceDirectory for Empty {
        fn list_services(&self) -> anyhow::Result<Vec<ServiceRecord>> {
            Ok(Vec::new())
        }
    }

    fn scheduler() -> PollingScheduler {
        PollingScheduler::new(PollerRegistry::new(), Arc::new(Empty), Arc::new(NoopPollTimeStore))
    }

    #[test]
    fn test_stop_unknown_service_leaves_table_empty() {
        let sched = scheduler();
        for i in 0..10 {
            sched.stop_polling(&format!("never-started-{}", i));
        }
        assert!(sched.inner.lock_table().stamps.is_empty());
        assert_eq!(sched.active_count(), 0);
    }

    #[test]
    fn test_stamps_strictly_increase() {
        let sched = scheduler();
        let a = sched.inner.new_stamp("svc");
        let b = sched.inner.new_stamp("svc");
        let c = sched.inner.new_stamp("other");
        assert!(a > NOT_RUNNING);
        assert!(b > a);
        assert!(c > b);
    }
}
