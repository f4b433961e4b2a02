// ABOUTME: In-memory room state store updated by the sync worker.
// ABOUTME: Tracks the latest state event per (type, state_key) and a bounded timeline per room.

use std::collections::{HashMap, VecDeque};

use crate::event::{Event, MEMBER_EVENT};

/// Default number of timeline events retained per room.
pub const DEFAULT_MAX_TIMELINE: usize = 100;

/// Local view of one room.
#[derive(Debug, Clone)]
pub struct Room {
    pub room_id: String,
    state: HashMap<(String, String), Event>,
    timeline: VecDeque<Event>,
    max_timeline: usize,
}

impl Room {
    pub fn new(room_id: &str, max_timeline: usize) -> Self {
        Self {
            room_id: room_id.to_string(),
            state: HashMap::new(),
            timeline: VecDeque::new(),
            max_timeline,
        }
    }

    /// Replace the state entry for this event's (type, state_key).
    /// Events without a state key are ignored.
    pub fn update_state(&mut self, event: &Event) {
        let Some(state_key) = event.state_key.as_ref() else {
            return;
        };
        self.state.insert(
            (event.event_type.clone(), state_key.clone()),
            event.clone(),
        );
    }

    pub fn append_timeline(&mut self, event: &Event) {
        if self.max_timeline == 0 {
            return;
        }
        while self.timeline.len() >= self.max_timeline {
            self.timeline.pop_front();
        }
        self.timeline.push_back(event.clone());
    }

    pub fn state_event(&self, event_type: &str, state_key: &str) -> Option<&Event> {
        self.state
            .get(&(event_type.to_string(), state_key.to_string()))
    }

    /// Membership of `user_id` according to the current state table.
    pub fn membership_of(&self, user_id: &str) -> Option<&str> {
        self.state_event(MEMBER_EVENT, user_id)
            .and_then(|e| e.membership())
    }

    pub fn state_len(&self) -> usize {
        self.state.len()
    }

    pub fn timeline(&self) -> impl Iterator<Item = &Event> {
        self.timeline.iter()
    }

    pub fn timeline_len(&self) -> usize {
        self.timeline.len()
    }
}

/// All rooms known to one sync identity. Rooms are created on first reference
/// and kept for the life of the process.
#[derive(Debug)]
pub struct RoomStore {
    rooms: HashMap<String, Room>,
    max_timeline: usize,
}

impl RoomStore {
    pub fn new(max_timeline: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            max_timeline,
        }
    }

    pub fn get_or_create(&mut self, room_id: &str) -> &mut Room {
        let max_timeline = self.max_timeline;
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(room_id, max_timeline))
    }

    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn room_ids(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TIMELINE)
    }
}
