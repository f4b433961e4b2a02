// ABOUTME: Long-poll sync client that keeps local room state current and feeds the worker.
// ABOUTME: A generation counter guarantees only the most recently started loop has side effects.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::event::SyncResponse;
use crate::listener::ListenerRegistry;
use crate::metrics;
use crate::next_batch::NextBatchStore;
use crate::room::{Room, RoomStore, DEFAULT_MAX_TIMELINE};
use crate::transport::{SyncTransport, DEFAULT_FILTER};
use crate::worker::Worker;

/// Floor for the retry delay; a zero backoff would spin against a failing server.
pub const MIN_RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Tunables for one sync identity.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub user_id: String,
    /// Server-side long-poll timeout.
    pub timeout_ms: u64,
    /// Fixed delay before retrying a failed sync request.
    pub retry_backoff: Duration,
    /// Capacity of the channel between the poll loop and the worker.
    pub channel_capacity: usize,
    pub filter_json: String,
    pub max_timeline: usize,
}

impl SyncConfig {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            timeout_ms: 30_000,
            retry_backoff: Duration::from_secs(5),
            channel_capacity: 5,
            filter_json: DEFAULT_FILTER.to_string(),
            max_timeline: DEFAULT_MAX_TIMELINE,
        }
    }
}

/// Why a batch was (partly) withheld from the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suppression {
    /// No stored token: the response is a history replay.
    InitialSync,
    /// These rooms were joined in this batch and were stripped from it.
    JustJoined(Vec<String>),
}

/// Remove every joined room whose most recent membership event about
/// `user_id` in this batch says "join".
///
/// The timeline is newer than the state block, so it is scanned first
/// (backwards), then the state block (backwards). Only the last membership
/// event counts, so join, leave and rejoin within one batch still
/// suppresses the room. Returns the removed room IDs.
pub fn strip_just_joined(batch: &mut SyncResponse, user_id: &str) -> Vec<String> {
    let joined_now: Vec<String> = batch
        .rooms
        .join
        .iter()
        .filter(|(_, room)| {
            room.timeline
                .events
                .iter()
                .rev()
                .chain(room.state.events.iter().rev())
                .find(|e| e.is_membership_of(user_id))
                .and_then(|e| e.membership())
                == Some("join")
        })
        .map(|(room_id, _)| room_id.clone())
        .collect();

    for room_id in &joined_now {
        batch.rooms.join.remove(room_id);
        batch.rooms.invite.remove(room_id);
    }
    joined_now
}

/// Owns the long-poll loop and the worker for one identity.
pub struct SyncClient {
    config: Arc<SyncConfig>,
    transport: Arc<dyn SyncTransport>,
    tokens: Arc<dyn NextBatchStore>,
    rooms: Arc<RwLock<RoomStore>>,
    generation: Arc<AtomicU64>,
    live: Arc<AtomicU64>,
    sender: mpsc::Sender<SyncResponse>,
    pending_worker: Mutex<Option<(Worker, mpsc::Receiver<SyncResponse>)>>,
}

impl SyncClient {
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn SyncTransport>,
        tokens: Arc<dyn NextBatchStore>,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        let rooms = Arc::new(RwLock::new(RoomStore::new(config.max_timeline)));
        let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));
        let worker = Worker::new(&config.user_id, Arc::clone(&rooms), listeners);
        Self {
            config: Arc::new(config),
            transport,
            tokens,
            rooms,
            generation: Arc::new(AtomicU64::new(0)),
            live: Arc::new(AtomicU64::new(0)),
            sender,
            pending_worker: Mutex::new(Some((worker, receiver))),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.config.user_id
    }

    pub fn transport(&self) -> Arc<dyn SyncTransport> {
        Arc::clone(&self.transport)
    }

    /// Start, or restart, the long-poll loop. Any previous loop is
    /// invalidated and exits at its next check. Returns the new generation.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let pending = self
            .pending_worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some((worker, receiver)) = pending {
            tokio::spawn(worker.run(receiver));
        }

        let sync_loop = SyncLoop {
            config: Arc::clone(&self.config),
            transport: Arc::clone(&self.transport),
            tokens: Arc::clone(&self.tokens),
            generation: Arc::clone(&self.generation),
            live: Arc::clone(&self.live),
            sender: self.sender.clone(),
            my_generation: generation,
        };
        tracing::info!(user_id = %self.config.user_id, generation, "Starting sync loop");
        tokio::spawn(sync_loop.run());
        generation
    }

    /// Invalidate the running loop. An in-flight request completes and its
    /// result is discarded.
    pub fn stop(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(user_id = %self.config.user_id, generation, "Stopping sync loop");
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// True while the loop of the current generation is past filter setup
    /// and has not exited.
    pub fn is_running(&self) -> bool {
        let live = self.live.load(Ordering::SeqCst);
        live != 0 && live == self.generation.load(Ordering::SeqCst)
    }

    /// Copy of the current local state for `room_id`.
    pub fn room_snapshot(&self, room_id: &str) -> Option<Room> {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        rooms.get(room_id).cloned()
    }

    pub fn room_ids(&self) -> Vec<String> {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        rooms.room_ids()
    }
}

struct SyncLoop {
    config: Arc<SyncConfig>,
    transport: Arc<dyn SyncTransport>,
    tokens: Arc<dyn NextBatchStore>,
    generation: Arc<AtomicU64>,
    live: Arc<AtomicU64>,
    sender: mpsc::Sender<SyncResponse>,
    my_generation: u64,
}

impl SyncLoop {
    fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.my_generation
    }

    fn stale_exit(&self, at: &'static str) {
        tracing::info!(
            user_id = %self.config.user_id,
            generation = self.my_generation,
            current = self.generation.load(Ordering::SeqCst),
            at,
            "Sync loop generation is stale; exiting"
        );
    }

    async fn run(self) {
        let user_id = self.config.user_id.as_str();

        let filter_id = match self
            .transport
            .create_filter(user_id, &self.config.filter_json)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                metrics::record_sync_error("filter");
                tracing::error!(
                    user_id = %user_id,
                    generation = self.my_generation,
                    error = %e,
                    "Failed to create sync filter; sync loop will not run until restarted"
                );
                return;
            }
        };
        if !self.is_current() {
            self.stale_exit("filter");
            return;
        }

        let mut since = self.tokens.load(user_id);
        self.live.store(self.my_generation, Ordering::SeqCst);
        tracing::info!(
            user_id = %user_id,
            generation = self.my_generation,
            filter_id = %filter_id,
            resumed = !since.is_empty(),
            "Sync loop running"
        );

        loop {
            if !self.is_current() {
                self.stale_exit("loop");
                break;
            }

            let mut batch = match self
                .transport
                .sync(&since, &filter_id, self.config.timeout_ms)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    let backoff = self.config.retry_backoff.max(MIN_RETRY_BACKOFF);
                    metrics::record_sync_error("request");
                    tracing::warn!(
                        user_id = %user_id,
                        error = %e,
                        backoff_secs = backoff.as_secs_f64(),
                        "Sync request failed; retrying with the same token"
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            };

            if !self.is_current() {
                self.stale_exit("response");
                break;
            }

            let suppression = if since.is_empty() {
                Some(Suppression::InitialSync)
            } else {
                let stripped = strip_just_joined(&mut batch, user_id);
                (!stripped.is_empty()).then_some(Suppression::JustJoined(stripped))
            };

            let next = batch.next_batch.clone();

            match suppression {
                Some(Suppression::InitialSync) => {
                    self.tokens.save(user_id, &next);
                    metrics::record_sync_suppressed("initial_sync");
                    tracing::info!(
                        user_id = %user_id,
                        next_batch = %next,
                        "Skipping initial sync batch"
                    );
                }
                other => {
                    if let Some(Suppression::JustJoined(rooms)) = other {
                        metrics::record_sync_suppressed("just_joined");
                        tracing::info!(
                            user_id = %user_id,
                            rooms = ?rooms,
                            "Dropped rooms joined in this batch"
                        );
                    }
                    // Waits while the worker is behind; no new request is made meanwhile.
                    let permit = match self.sender.reserve().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            tracing::error!(user_id = %user_id, "Sync worker is gone; exiting loop");
                            break;
                        }
                    };
                    if !self.is_current() {
                        self.stale_exit("enqueue");
                        break;
                    }
                    // Persist before handing over so a crash never replays a batch.
                    self.tokens.save(user_id, &next);
                    metrics::record_sync_batch(user_id, batch.event_count());
                    permit.send(batch);
                }
            }

            since = next;
        }

        let _ = self.live.compare_exchange(
            self.my_generation,
            0,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventList, InvitedRoom, JoinedRoom};
    use serde_json::json;

    const BOT: &str = "@bot:example.org";

    fn member(user: &str, membership: &str, id: &str) -> Event {
        Event {
            event_type: "m.room.member".to_string(),
            state_key: Some(user.to_string()),
            sender: user.to_string(),
            room_id: String::new(),
            event_id: id.to_string(),
            origin_server_ts: None,
            content: json!({ "membership": membership })
                .as_object()
                .cloned()
                .unwrap(),
        }
    }

    fn message(id: &str) -> Event {
        Event {
            event_type: "m.room.message".to_string(),
            state_key: None,
            sender: "@alice:example.org".to_string(),
            room_id: String::new(),
            event_id: id.to_string(),
            origin_server_ts: None,
            content: json!({ "body": "!help" }).as_object().cloned().unwrap(),
        }
    }

    fn batch_with(room_id: &str, state: Vec<Event>, timeline: Vec<Event>) -> SyncResponse {
        let mut batch = SyncResponse {
            next_batch: "s2".to_string(),
            ..Default::default()
        };
        batch.rooms.join.insert(
            room_id.to_string(),
            JoinedRoom {
                state: EventList { events: state },
                timeline: EventList { events: timeline },
            },
        );
        batch
    }

    #[test]
    fn test_strips_room_joined_in_timeline() {
        let mut batch = batch_with("!r1", vec![], vec![member(BOT, "join", "$j"), message("$m")]);
        let stripped = strip_just_joined(&mut batch, BOT);
        assert_eq!(stripped, vec!["!r1".to_string()]);
        assert!(batch.rooms.join.is_empty());
    }

    #[test]
    fn test_strips_room_joined_in_state_block() {
        let mut batch = batch_with("!r1", vec![member(BOT, "join", "$j")], vec![message("$m")]);
        assert_eq!(strip_just_joined(&mut batch, BOT), vec!["!r1".to_string()]);
    }

    #[test]
    fn test_keeps_room_without_own_membership_change() {
        let mut batch = batch_with(
            "!r1",
            vec![],
            vec![member("@alice:example.org", "join", "$a"), message("$m")],
        );
        assert!(strip_just_joined(&mut batch, BOT).is_empty());
        assert_eq!(batch.rooms.join.len(), 1);
    }

    #[test]
    fn test_last_membership_event_decides() {
        // Joined then left within one batch: nothing to suppress.
        let mut left = batch_with(
            "!r1",
            vec![],
            vec![member(BOT, "join", "$1"), member(BOT, "leave", "$2")],
        );
        assert!(strip_just_joined(&mut left, BOT).is_empty());

        // Join, leave, rejoin: the last one is a join, so suppress.
        let mut rejoined = batch_with(
            "!r1",
            vec![],
            vec![
                member(BOT, "join", "$1"),
                member(BOT, "leave", "$2"),
                member(BOT, "join", "$3"),
            ],
        );
        assert_eq!(strip_just_joined(&mut rejoined, BOT), vec!["!r1".to_string()]);
    }

    #[test]
    fn test_timeline_membership_overrides_state_block() {
        let mut batch = batch_with(
            "!r1",
            vec![member(BOT, "join", "$1")],
            vec![member(BOT, "leave", "$2")],
        );
        assert!(strip_just_joined(&mut batch, BOT).is_empty());
    }

    #[test]
    fn test_stripped_room_is_also_dropped_from_invites() {
        let mut batch = batch_with("!r1", vec![], vec![member(BOT, "join", "$j")]);
        batch.rooms.invite.insert(
            "!r1".to_string(),
            InvitedRoom {
                invite_state: EventList {
                    events: vec![member(BOT, "invite", "$i")],
                },
            },
        );
        batch.rooms.invite.insert("!other".to_string(), InvitedRoom::default());

        assert_eq!(strip_just_joined(&mut batch, BOT), vec!["!r1".to_string()]);
        assert!(batch.rooms.join.is_empty());
        assert_eq!(batch.rooms.invite.keys().collect::<Vec<_>>(), vec!["!other"]);
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::new(BOT);
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(config.retry_backoff, Duration::from_secs(5));
        assert_eq!(config.channel_capacity, 5);
        assert_eq!(config.filter_json, DEFAULT_FILTER);
    }
}
