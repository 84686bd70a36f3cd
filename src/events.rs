use chrono::{DateTime, Utc};
use log::debug;
use serde_json::json;

use crate::core::{EventKind, GuildId, SecurityEvent, TargetId};

/// A raw platform notification, as delivered by the gateway layer. The feed
/// carries plain snowflakes and no ordering or delivery guarantees; shaping
/// happens in [`normalize`].
///
/// Kinds outside the monitored set are listed too so the dispatch layer can
/// forward its whole stream and let the normalizer filter.
#[derive(Clone, Debug)]
pub enum RawEvent {
    ChannelCreate {
        guild_id: Option<u64>,
        channel_id: u64,
    },
    ChannelDelete {
        guild_id: Option<u64>,
        channel_id: u64,
    },
    RoleCreate {
        guild_id: Option<u64>,
        role_id: u64,
    },
    RoleDelete {
        guild_id: Option<u64>,
        role_id: u64,
    },
    /// A role update that granted dangerous permissions; the gateway layer
    /// ships the permission diff as-is.
    RolePermissionGrant {
        guild_id: Option<u64>,
        role_id: u64,
        changes: serde_json::Value,
    },
    MemberJoin {
        guild_id: Option<u64>,
        user_id: u64,
    },
    MemberKick {
        guild_id: Option<u64>,
        user_id: u64,
    },
    MemberBan {
        guild_id: Option<u64>,
        user_id: u64,
    },
    MemberPrune {
        guild_id: Option<u64>,
        pruned: u64,
    },
    MessageCreate {
        guild_id: Option<u64>,
        channel_id: u64,
        author_id: u64,
    },
}

impl RawEvent {
    pub fn guild_id(&self) -> Option<GuildId> {
        match self {
            Self::ChannelCreate { guild_id, .. }
            | Self::ChannelDelete { guild_id, .. }
            | Self::RoleCreate { guild_id, .. }
            | Self::RoleDelete { guild_id, .. }
            | Self::RolePermissionGrant { guild_id, .. }
            | Self::MemberJoin { guild_id, .. }
            | Self::MemberKick { guild_id, .. }
            | Self::MemberBan { guild_id, .. }
            | Self::MemberPrune { guild_id, .. }
            | Self::MessageCreate { guild_id, .. } => guild_id.map(GuildId),
        }
    }
}

/// Shape a raw notification into a [`SecurityEvent`], or `None` when the
/// kind is outside the monitored set or the notification is malformed
/// (guild-less, or a zeroed snowflake). Pure and non-blocking; malformed
/// input is dropped and logged, never raised into the pipeline.
pub fn normalize(raw: &RawEvent, observed_at: DateTime<Utc>) -> Option<SecurityEvent> {
    let (kind, target_id, detail) = match raw {
        RawEvent::ChannelDelete { channel_id, .. } => {
            (EventKind::ChannelDelete, *channel_id, json!({}))
        }
        RawEvent::RoleDelete { role_id, .. } => (EventKind::RoleDelete, *role_id, json!({})),
        RawEvent::RolePermissionGrant {
            role_id, changes, ..
        } => (
            EventKind::PermissionGrant,
            *role_id,
            json!({ "changes": changes.clone() }),
        ),
        RawEvent::MemberKick { user_id, .. } => (EventKind::MemberKick, *user_id, json!({})),
        RawEvent::MemberBan { user_id, .. } => (EventKind::MemberBan, *user_id, json!({})),
        RawEvent::MemberPrune {
            guild_id, pruned, ..
        } => (
            EventKind::MemberPrune,
            // A prune has no single victim; the guild itself is the target.
            guild_id.unwrap_or_default(),
            json!({ "pruned": pruned }),
        ),
        RawEvent::ChannelCreate { .. }
        | RawEvent::RoleCreate { .. }
        | RawEvent::MemberJoin { .. }
        | RawEvent::MessageCreate { .. } => return None,
    };

    let Some(guild_id) = raw.guild_id() else {
        debug!("dropping guild-less notification: {:?}", raw);
        return None;
    };

    if target_id == 0 {
        debug!(
            "dropping malformed {} notification in guild {}: zeroed target",
            kind, guild_id
        );
        return None;
    }

    Some(SecurityEvent {
        guild_id,
        kind,
        target_id: TargetId(target_id),
        observed_at,
        actor: None,
        detail,
    })
}
