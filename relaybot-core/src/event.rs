// ABOUTME: Wire model for long-poll sync responses and the events they carry.
// ABOUTME: Serde types for rooms.join / rooms.invite sections plus small event helpers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Event type of room membership state events.
pub const MEMBER_EVENT: &str = "m.room.member";

/// A single room event as delivered by the sync endpoint.
///
/// State events carry a `state_key` (possibly empty); timeline-only events do not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub room_id: String,
    #[serde(default)]
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_server_ts: Option<i64>,
    #[serde(default)]
    pub content: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }

    /// `content.membership` for member events, if present.
    pub fn membership(&self) -> Option<&str> {
        self.content.get("membership").and_then(|v| v.as_str())
    }

    /// True if this is a membership event whose subject is `user_id`.
    pub fn is_membership_of(&self, user_id: &str) -> bool {
        self.event_type == MEMBER_EVENT && self.state_key.as_deref() == Some(user_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventList {
    #[serde(default)]
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinedRoom {
    #[serde(default)]
    pub state: EventList,
    #[serde(default)]
    pub timeline: EventList,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvitedRoom {
    #[serde(default)]
    pub invite_state: EventList,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rooms {
    #[serde(default)]
    pub join: BTreeMap<String, JoinedRoom>,
    #[serde(default)]
    pub invite: BTreeMap<String, InvitedRoom>,
}

/// One decoded long-poll response: the next resumption token plus per-room deltas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: Rooms,
}

impl SyncResponse {
    /// The server omits `room_id` inside sync sections; stamp every event with
    /// the room it was delivered under.
    pub fn fill_room_ids(&mut self) {
        for (room_id, room) in self.rooms.join.iter_mut() {
            for event in room
                .state
                .events
                .iter_mut()
                .chain(room.timeline.events.iter_mut())
            {
                if event.room_id.is_empty() {
                    event.room_id = room_id.clone();
                }
            }
        }
        for (room_id, room) in self.rooms.invite.iter_mut() {
            for event in room.invite_state.events.iter_mut() {
                if event.room_id.is_empty() {
                    event.room_id = room_id.clone();
                }
            }
        }
    }

    /// Total number of events across all sections.
    pub fn event_count(&self) -> usize {
        let joined: usize = self
            .rooms
            .join
            .values()
            .map(|r| r.state.events.len() + r.timeline.events.len())
            .sum();
        let invited: usize = self
            .rooms
            .invite
            .values()
            .map(|r| r.invite_state.events.len())
            .sum();
        joined + invited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_minimal_response() {
        let resp: SyncResponse = serde_json::from_str(r#"{"next_batch":"s1"}"#).unwrap();
        assert_eq!(resp.next_batch, "s1");
        assert!(resp.rooms.join.is_empty());
        assert!(resp.rooms.invite.is_empty());
    }

    #[test]
    fn test_decode_and_fill_room_ids() {
        let body = r#"{
            "next_batch": "s2",
            "rooms": {
                "join": {
                    "!r1:example.org": {
                        "state": {"events": [
                            {"type": "m.room.name", "state_key": "", "sender": "@a:example.org",
                             "event_id": "$s", "content": {"name": "Room"}}
                        ]},
                        "timeline": {"events": [
                            {"type": "m.room.message", "sender": "@a:example.org",
                             "event_id": "$m", "origin_server_ts": 1700000000000,
                             "content": {"body": "hi"}}
                        ]}
                    }
                },
                "invite": {
                    "!r2:example.org": {
                        "invite_state": {"events": [
                            {"type": "m.room.member", "state_key": "@bot:example.org",
                             "sender": "@a:example.org", "content": {"membership": "invite"}}
                        ]}
                    }
                }
            }
        }"#;
        let mut resp: SyncResponse = serde_json::from_str(body).unwrap();
        resp.fill_room_ids();

        let joined = &resp.rooms.join["!r1:example.org"];
        assert_eq!(joined.state.events[0].room_id, "!r1:example.org");
        assert!(joined.state.events[0].is_state());
        assert!(!joined.timeline.events[0].is_state());
        assert_eq!(joined.timeline.events[0].origin_server_ts, Some(1_700_000_000_000));

        let invite = &resp.rooms.invite["!r2:example.org"].invite_state.events[0];
        assert_eq!(invite.room_id, "!r2:example.org");
        assert!(invite.is_membership_of("@bot:example.org"));
        assert_eq!(invite.membership(), Some("invite"));
        assert_eq!(resp.event_count(), 3);
    }

    #[test]
    fn test_fill_room_ids_keeps_explicit_room_id() {
        let mut resp = SyncResponse::default();
        resp.rooms.join.insert(
            "!r1".to_string(),
            JoinedRoom {
                timeline: EventList {
                    events: vec![Event {
                        event_type: "m.room.message".to_string(),
                        state_key: None,
                        sender: "@a".to_string(),
                        room_id: "!explicit".to_string(),
                        event_id: "$1".to_string(),
                        origin_server_ts: None,
                        content: Default::default(),
                    }],
                },
                ..Default::default()
            },
        );
        resp.fill_room_ids();
        assert_eq!(resp.rooms.join["!r1"].timeline.events[0].room_id, "!explicit");
    }
}
