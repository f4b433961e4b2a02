// ABOUTME: Persistence interface for sync resumption tokens (next_batch) per identity.
// ABOUTME: Ships a no-op store for stateless runs and an in-memory store for tests.

use std::collections::HashMap;
use std::sync::Mutex;

/// Durable home for the `next_batch` cursor of each sync identity.
///
/// `save` is best-effort: implementations log their own failures rather than
/// returning them, because the sync loop must keep going either way.
pub trait NextBatchStore: Send + Sync {
    fn save(&self, user_id: &str, token: &str);

    /// The last saved token, or an empty string when none exists.
    fn load(&self, user_id: &str) -> String;
}

/// Stores nothing. Every start is a fresh initial sync.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNextBatchStore;

impl NextBatchStore for NoopNextBatchStore {
    fn save(&self, _user_id: &str, _token: &str) {}

    fn load(&self, _user_id: &str) -> String {
        String::new()
    }
}

/// Keeps tokens in process memory.
#[derive(Debug, Default)]
pub struct MemoryNextBatchStore {
    tokens: Mutex<HashMap<String, String>>,
}

impl MemoryNextBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(user_id: &str, token: &str) -> Self {
        let store = Self::new();
        store.save(user_id, token);
        store
    }
}

impl NextBatchStore for MemoryNextBatchStore {
    fn save(&self, user_id: &str, token: &str) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.insert(user_id.to_string(), token.to_string());
    }

    fn load(&self, user_id: &str) -> String {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.get(user_id).cloned().unwrap_or_default()
    }
}
