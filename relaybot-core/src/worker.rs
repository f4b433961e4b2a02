// ABOUTME: Single consumer that applies sync batches to the room store and fans events out.
// ABOUTME: Runs as one task draining the bounded sync channel, so the store has a single writer.

use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

use crate::event::{Event, SyncResponse};
use crate::listener::{DispatchOutcome, ListenerRegistry};
use crate::room::RoomStore;

/// Applies batches in arrival order for one sync identity.
pub struct Worker {
    user_id: String,
    rooms: Arc<RwLock<RoomStore>>,
    listeners: Arc<ListenerRegistry>,
}

impl Worker {
    pub fn new(
        user_id: &str,
        rooms: Arc<RwLock<RoomStore>>,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            rooms,
            listeners,
        }
    }

    /// Apply one batch: state deltas first, then dispatch.
    ///
    /// The store write lock is held only while mutating, never while
    /// listeners run, so listeners may read room snapshots.
    pub fn process(&self, batch: &SyncResponse) -> DispatchOutcome {
        let mut total = DispatchOutcome::default();

        for (room_id, room) in &batch.rooms.join {
            self.with_store(|store| {
                let local = store.get_or_create(room_id);
                for event in &room.state.events {
                    local.update_state(event);
                }
                for event in &room.timeline.events {
                    // State changes can also arrive inline in the timeline.
                    local.update_state(event);
                    local.append_timeline(event);
                }
            });

            for event in room.state.events.iter().chain(room.timeline.events.iter()) {
                self.dispatch(event, &mut total);
            }
        }

        for (room_id, room) in &batch.rooms.invite {
            self.with_store(|store| {
                let local = store.get_or_create(room_id);
                for event in &room.invite_state.events {
                    local.update_state(event);
                }
            });

            for event in &room.invite_state.events {
                self.dispatch(event, &mut total);
            }
        }

        total
    }

    /// Drain `rx` until every sender is gone.
    pub async fn run(self, mut rx: mpsc::Receiver<SyncResponse>) {
        tracing::debug!(user_id = %self.user_id, "Sync worker started");
        while let Some(batch) = rx.recv().await {
            let outcome = self.process(&batch);
            tracing::debug!(
                user_id = %self.user_id,
                next_batch = %batch.next_batch,
                invoked = outcome.invoked,
                failed = outcome.failed,
                panicked = outcome.panicked,
                "Processed sync batch"
            );
        }
        tracing::info!(user_id = %self.user_id, "Sync worker stopped: channel closed");
    }

    fn dispatch(&self, event: &Event, total: &mut DispatchOutcome) {
        let outcome = self.listeners.dispatch(event, &self.user_id);
        total.invoked += outcome.invoked;
        total.failed += outcome.failed;
        total.panicked += outcome.panicked;
    }

    fn with_store(&self, f: impl FnOnce(&mut RoomStore)) {
        // The worker is the only writer; a poisoned lock can only come from a
        // panic inside this closure, and the data is still usable.
        let mut store = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        f(&mut store);
    }
}
