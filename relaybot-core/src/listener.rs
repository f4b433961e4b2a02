// ABOUTME: Event listener registry mapping event types to ordered callback lists.
// ABOUTME: Dispatch isolates every callback so one failing or panicking listener never stops the rest.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::event::Event;
use crate::metrics;

/// A subscriber callback. Runs on the sync worker, so it must not block;
/// anything slow belongs in a spawned task.
pub type Listener = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Summary of one dispatch call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub invoked: usize,
    pub failed: usize,
    pub panicked: usize,
}

/// Process-lifetime subscriptions keyed by event type.
///
/// Built once at startup, then shared behind an `Arc`. There is no
/// unsubscribe and no de-duplication: subscribing the same callback twice
/// runs it twice.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: HashMap<String, Vec<Listener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `listener` to the callbacks for `event_type`.
    pub fn subscribe<F>(&mut self, event_type: &str, listener: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listeners
            .entry(event_type.to_string())
            .or_default()
            .push(Arc::new(listener));
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners.get(event_type).map(Vec::len).unwrap_or(0)
    }

    pub fn event_types(&self) -> Vec<String> {
        self.listeners.keys().cloned().collect()
    }

    /// Invoke every listener for `event.event_type` in registration order.
    ///
    /// `identity` is the local user the batch was synced for; it is attached
    /// to every failure log line.
    pub fn dispatch(&self, event: &Event, identity: &str) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let Some(listeners) = self.listeners.get(&event.event_type) else {
            return outcome;
        };

        for listener in listeners {
            outcome.invoked += 1;
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    outcome.failed += 1;
                    metrics::record_listener_error(&event.event_type);
                    tracing::warn!(
                        user_id = %identity,
                        event_type = %event.event_type,
                        event_id = %event.event_id,
                        room_id = %event.room_id,
                        error = %e,
                        "Listener returned an error"
                    );
                }
                Err(payload) => {
                    outcome.panicked += 1;
                    metrics::record_listener_panic(&event.event_type);
                    tracing::error!(
                        user_id = %identity,
                        event_type = %event.event_type,
                        event_id = %event.event_id,
                        room_id = %event.room_id,
                        panic = %panic_message(payload.as_ref()),
                        backtrace = %std::backtrace::Backtrace::force_capture(),
                        "Listener panicked; continuing with remaining listeners"
                    );
                }
            }
        }

        outcome
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
