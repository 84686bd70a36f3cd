use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString, VariantNames};

/// Snowflake of a guild.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GuildId(pub u64);

/// Snowflake of a user account.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

/// Snowflake of whatever object an event destroyed or altered (channel,
/// role, member, or the guild itself for guild-wide actions).
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TargetId(pub u64);

macro_rules! impl_snowflake {
    ($($id:ident),*) => {
        $(
            impl std::fmt::Display for $id {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl std::str::FromStr for $id {
                type Err = std::num::ParseIntError;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    Ok(Self(s.parse()?))
                }
            }

            impl From<u64> for $id {
                fn from(v: u64) -> Self {
                    Self(v)
                }
            }
        )*
    };
}

impl_snowflake!(GuildId, UserId, TargetId);

/// The destructive administrative actions the engine watches.
#[derive(
    EnumString,
    Display,
    VariantNames,
    PartialEq,
    Eq,
    Hash,
    Clone,
    Copy,
    Debug,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    ChannelDelete,
    RoleDelete,
    MemberKick,
    MemberBan,
    MemberPrune,
    PermissionGrant,
}

impl EventKind {
    pub fn to_cond(self) -> String {
        match &self {
            Self::ChannelDelete => "Channels Deleted".to_string(),
            Self::RoleDelete => "Roles Deleted".to_string(),
            Self::MemberKick => "Members Kicked".to_string(),
            Self::MemberBan => "Members Banned".to_string(),
            Self::MemberPrune => "Members Pruned".to_string(),
            Self::PermissionGrant => "Permissions Granted".to_string(),
        }
    }
}

/// Who performed an event. `Unknown` is the per-guild anonymous bucket for
/// events the audit trail never attributed; these are still rate-tracked so
/// an unattributable raid does not fly under the counters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Actor {
    User(UserId),
    Unknown,
}

impl Actor {
    pub fn user_id(self) -> Option<UserId> {
        match self {
            Self::User(id) => Some(id),
            Self::Unknown => None,
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "user {}", id),
            Self::Unknown => write!(f, "unknown actor"),
        }
    }
}

/// One normalized destructive event.
///
/// Built once by the normalizer with `actor: None`; the correlator enriches
/// it exactly once via [`SecurityEvent::with_actor`], which hands back a new
/// record. Nothing downstream mutates it.
#[derive(Clone, Debug, Serialize)]
pub struct SecurityEvent {
    pub guild_id: GuildId,
    pub kind: EventKind,
    pub target_id: TargetId,
    /// Engine-local receipt time, not the platform's.
    pub observed_at: DateTime<Utc>,
    pub actor: Option<Actor>,
    /// Kind-specific extras carried along for notifications.
    pub detail: serde_json::Value,
}

impl SecurityEvent {
    pub fn with_actor(self, actor: Actor) -> Self {
        Self {
            actor: Some(actor),
            ..self
        }
    }

    /// The tracker key for this event, once the actor is resolved.
    pub fn key(&self) -> Option<TrackerKey> {
        Some(TrackerKey {
            guild_id: self.guild_id,
            actor: self.actor?,
            kind: self.kind,
        })
    }
}

/// Identity of one sliding window: counters for different actors, kinds or
/// guilds never share state.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct TrackerKey {
    pub guild_id: GuildId,
    pub actor: Actor,
    pub kind: EventKind,
}

impl std::fmt::Display for TrackerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.guild_id, self.actor, self.kind)
    }
}

/// What the policy engine wants done about a scored event.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub enum Decision {
    Ignore,
    /// Advisory only; never acts.
    Escalate,
    Punish,
}

/// What actually happened when a punishment was attempted.
#[derive(Clone, PartialEq, Debug, Serialize)]
pub enum Outcome {
    Applied { epoch: u64 },
    /// A punishment epoch was already active for the key.
    Suppressed,
    Failed(String),
}

/// The punitive action a guild has configured.
#[derive(
    EnumString, Display, VariantNames, PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
pub enum PunishmentAction {
    None,
    RemoveRoles,
    Kick,
    Ban,
}

impl PunishmentAction {
    pub fn to_cond(self) -> String {
        match &self {
            Self::None => "No Action".to_string(),
            Self::RemoveRoles => "Remove All Roles".to_string(),
            Self::Kick => "Kick User".to_string(),
            Self::Ban => "Ban User".to_string(),
        }
    }
}
