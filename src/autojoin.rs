// ABOUTME: Auto-join listener that accepts room invites addressed to a sync identity
// ABOUTME: Invites are filtered by an allowed-inviter list and joined on a spawned task

use anyhow::Result;
use relaybot_core::event::MEMBER_EVENT;
use relaybot_core::{Event, ListenerRegistry, SyncTransport};
use std::collections::HashSet;
use std::sync::Arc;

/// Decides which invites an identity accepts.
#[derive(Debug, Clone)]
pub struct AutoJoinPolicy {
    user_id: String,
    allowed_inviters: HashSet<String>,
}

impl AutoJoinPolicy {
    /// An empty `allowed_inviters` accepts invites from anyone.
    pub fn new(user_id: &str, allowed_inviters: &[String]) -> Self {
        Self {
            user_id: user_id.to_string(),
            allowed_inviters: allowed_inviters.iter().cloned().collect(),
        }
    }

    pub fn is_invite_for_us(&self, event: &Event) -> bool {
        event.is_membership_of(&self.user_id) && event.membership() == Some("invite")
    }

    pub fn accepts_inviter(&self, inviter: &str) -> bool {
        self.allowed_inviters.is_empty() || self.allowed_inviters.contains(inviter)
    }
}

/// Subscribe an auto-join listener for `policy` that joins through `transport`.
pub fn register(
    listeners: &mut ListenerRegistry,
    policy: AutoJoinPolicy,
    transport: Arc<dyn SyncTransport>,
) {
    listeners.subscribe(MEMBER_EVENT, move |event| {
        handle_invite(&policy, &transport, event)
    });
}

fn handle_invite(
    policy: &AutoJoinPolicy,
    transport: &Arc<dyn SyncTransport>,
    event: &Event,
) -> Result<()> {
    if !policy.is_invite_for_us(event) {
        return Ok(());
    }

    let inviter = event.sender.as_str();
    if !policy.accepts_inviter(inviter) {
        tracing::warn!(
            room_id = %event.room_id,
            inviter = %inviter,
            "Ignoring room invite from unauthorized user"
        );
        return Ok(());
    }

    // Listeners run synchronously on the worker; the join happens off it.
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|e| anyhow::anyhow!("No async runtime available to join room: {}", e))?;

    tracing::info!(
        room_id = %event.room_id,
        inviter = %inviter,
        "Auto-joining room invite"
    );

    let transport = Arc::clone(transport);
    let room_id = event.room_id.clone();
    handle.spawn(async move {
        match transport.join_room(&room_id).await {
            Ok(()) => tracing::info!(room_id = %room_id, "Successfully joined room"),
            Err(e) => tracing::error!(room_id = %room_id, error = %e, "Failed to join room"),
        }
    });
    Ok(())
}
