use std::sync::Arc;

use log::{error, info, warn};

use crate::cache::RateTracker;
use crate::config::GuildSecurityConfig;
use crate::core::{Actor, Decision, GuildId, Outcome, PunishmentAction, SecurityEvent, UserId};

#[derive(Debug)]
pub enum SinkError {
    Forbidden,
    /// Target already gone (left, already banned, channel deleted under us).
    NotFound,
    RateLimited,
    Other(crate::Error),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forbidden => write!(f, "missing permissions"),
            Self::NotFound => write!(f, "target not found"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SinkError {}

/// Moderation actions on the platform. Every call is slow and fallible and
/// gets exactly one attempt per punishment epoch.
#[async_trait::async_trait]
pub trait ActionSink: Send + Sync {
    async fn kick(&self, guild_id: GuildId, user_id: UserId, reason: &str)
        -> Result<(), SinkError>;

    async fn ban(&self, guild_id: GuildId, user_id: UserId, reason: &str)
        -> Result<(), SinkError>;

    /// Strips every role from the member. The engine keeps no member or
    /// role cache, so which roles exist is the sink's concern.
    async fn remove_roles(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
    ) -> Result<(), SinkError>;
}

/// Applies punishments at most once per episode.
///
/// The epoch flag lives in the shared [`RateTracker`] entry for the key, so
/// the check-and-act is atomic against concurrent scoring on the same key
/// and the flags age out with the rest of the tracker state.
pub struct Executor {
    sink: Arc<dyn ActionSink>,
    tracker: Arc<RateTracker>,
}

impl Executor {
    pub fn new(sink: Arc<dyn ActionSink>, tracker: Arc<RateTracker>) -> Self {
        Self { sink, tracker }
    }

    /// Carry out a decision. Only `Punish` ever reaches the sink; anything
    /// else reports `Suppressed` without side effects. Sink failures come
    /// back as `Failed` and are not retried until the epoch lapses.
    pub async fn respond(
        &self,
        decision: Decision,
        event: &SecurityEvent,
        config: &GuildSecurityConfig,
    ) -> Outcome {
        if decision != Decision::Punish {
            return Outcome::Suppressed;
        }

        // Last-gate trust check, independent of whatever the policy saw.
        if let Some(Actor::User(user_id)) = event.actor {
            if config.whitelist.contains(&user_id) {
                return Outcome::Suppressed;
            }
        }

        let Some(key) = event.key() else {
            warn!(
                "punish decision for unresolved event in guild {} ({}); refusing to act",
                event.guild_id, event.kind
            );
            return Outcome::Suppressed;
        };

        let cooldown = config
            .thresholds
            .get(&event.kind)
            .map(|t| t.window())
            .unwrap_or_else(|| chrono::Duration::seconds(60));

        let Some(epoch) = self.tracker.begin_epoch(&key, event.observed_at, cooldown) else {
            return Outcome::Suppressed;
        };

        let Some(user_id) = event.actor.and_then(Actor::user_id) else {
            // Threshold crossed by the guild's unknown bucket. There is no
            // one to act against; surface it for human review instead.
            warn!(
                "unattributable {} burst crossed the limit in guild {}; \
                 no target to punish, flagging for review (epoch {})",
                event.kind, event.guild_id, epoch
            );
            return Outcome::Failed("no target".to_string());
        };

        let reason = format!(
            "Anti-nuke: {} limit exceeded",
            event.kind.to_cond().to_lowercase()
        );

        let result = match config.punishment {
            PunishmentAction::None => {
                info!(
                    "limit hit by user {} in guild {} but no punishment is configured",
                    user_id, event.guild_id
                );
                Ok(())
            }
            PunishmentAction::RemoveRoles => {
                self.sink
                    .remove_roles(event.guild_id, user_id, &reason)
                    .await
            }
            PunishmentAction::Kick => self.sink.kick(event.guild_id, user_id, &reason).await,
            PunishmentAction::Ban => self.sink.ban(event.guild_id, user_id, &reason).await,
        };

        match result {
            Ok(()) => {
                info!(
                    "applied {} to user {} in guild {} ({}; epoch {})",
                    config.punishment, user_id, event.guild_id, event.kind, epoch
                );
                Outcome::Applied { epoch }
            }
            Err(e) => {
                error!(
                    "failed to apply {} to user {} in guild {}: {}",
                    config.punishment, user_id, event.guild_id, e
                );
                Outcome::Failed(e.to_string())
            }
        }
    }
}
