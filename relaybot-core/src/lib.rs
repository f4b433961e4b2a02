// ABOUTME: Continuous ingestion core: long-poll sync client, worker, room state, and poll scheduler.
// ABOUTME: Platform wiring (config, storage, HTTP) lives in the relaybot crate.

pub mod event;
pub mod listener;
pub mod metrics;
pub mod next_batch;
pub mod poller;
pub mod room;
pub mod scheduler;
pub mod sync;
pub mod transport;
pub mod worker;

pub use event::{Event, SyncResponse};
pub use listener::{DispatchOutcome, Listener, ListenerRegistry};
pub use next_batch::{MemoryNextBatchStore, NextBatchStore, NoopNextBatchStore};
pub use poller::{Poller, PollerFactory, PollerRegistry, ServiceRecord};
pub use room::{Room, RoomStore};
pub use scheduler::{NoopPollTimeStore, PollError, PollTimeStore, PollingScheduler, ServiceDirectory};
pub use sync::{SyncClient, SyncConfig};
pub use transport::{HttpTransport, SyncTransport};
pub use worker::Worker;
