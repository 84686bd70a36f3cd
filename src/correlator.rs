use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, warn};

use crate::core::{Actor, EventKind, GuildId, SecurityEvent, TargetId, UserId};

/// One entry from the platform's audit trail.
#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub actor_id: UserId,
    pub target_id: TargetId,
    pub created_at: DateTime<Utc>,
}

/// Why an audit fetch came back empty-handed. `Forbidden` and `RateLimited`
/// abort the whole match request rather than retry into a 403 or 429.
#[derive(Debug)]
pub enum AuditError {
    Forbidden,
    RateLimited,
    Other(crate::Error),
}

impl std::fmt::Display for AuditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forbidden => write!(f, "audit log access forbidden"),
            Self::RateLimited => write!(f, "audit log fetch rate limited"),
            Self::Other(e) => write!(f, "audit log fetch failed: {}", e),
        }
    }
}

impl std::error::Error for AuditError {}

/// Pull access to the platform's audit trail. Entries come back newest
/// first; delivery is delayed and entries may never appear at all.
#[async_trait::async_trait]
pub trait AuditLogSource: Send + Sync {
    async fn fetch(
        &self,
        guild_id: GuildId,
        kind: EventKind,
        limit: u8,
    ) -> Result<Vec<AuditEntry>, AuditError>;
}

#[derive(Clone, Debug)]
pub struct CorrelatorConfig {
    /// Wait before each poll; the last step repeats until the deadline.
    pub backoff: Vec<Duration>,
    /// Hard cap on how long one event may wait for attribution.
    pub deadline: Duration,
    /// How far an audit entry's timestamp may sit from our receipt time and
    /// still be the same action.
    pub tolerance: chrono::Duration,
    /// Entries requested per poll.
    pub fetch_limit: u8,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            backoff: vec![
                Duration::ZERO,
                Duration::from_millis(250),
                Duration::from_millis(750),
                Duration::from_secs(2),
            ],
            deadline: Duration::from_secs(5),
            tolerance: chrono::Duration::seconds(2),
            fetch_limit: 10,
        }
    }
}

/// One pending attribution. Owned by the correlator for the lifetime of a
/// single [`Correlator::resolve`] call and gone afterwards.
struct AuditMatchRequest {
    guild_id: GuildId,
    kind: EventKind,
    target_id: TargetId,
    deadline: tokio::time::Instant,
    attempts: u32,
}

/// Resolves "who did it" for normalized events by polling the audit trail
/// with bounded backoff. Every resolution is an independent future with a
/// hard deadline; resolutions for the same guild never queue behind one
/// another, and dropping the future abandons the request.
pub struct Correlator {
    audit: Arc<dyn AuditLogSource>,
    config: CorrelatorConfig,
}

impl Correlator {
    pub fn new(audit: Arc<dyn AuditLogSource>, config: CorrelatorConfig) -> Self {
        Self { audit, config }
    }

    /// Fill in the event's actor, degrading to [`Actor::Unknown`] on
    /// deadline expiry or audit failure. Terminates within the deadline
    /// plus one backoff step; never hangs.
    pub async fn resolve(&self, event: SecurityEvent) -> SecurityEvent {
        if event.actor.is_some() {
            return event;
        }

        let mut request = AuditMatchRequest {
            guild_id: event.guild_id,
            kind: event.kind,
            target_id: event.target_id,
            deadline: tokio::time::Instant::now() + self.config.deadline,
            attempts: 0,
        };

        match self.poll(&mut request, event.observed_at).await {
            Some(actor_id) => {
                debug!(
                    "attributed {} on {} in guild {} to user {} after {} poll(s)",
                    event.kind, event.target_id, event.guild_id, actor_id, request.attempts
                );
                event.with_actor(Actor::User(actor_id))
            }
            None => {
                debug!(
                    "no audit match for {} on {} in guild {} after {} poll(s); \
                     attributing to the unknown bucket",
                    event.kind, event.target_id, event.guild_id, request.attempts
                );
                event.with_actor(Actor::Unknown)
            }
        }
    }

    async fn poll(
        &self,
        request: &mut AuditMatchRequest,
        observed_at: DateTime<Utc>,
    ) -> Option<UserId> {
        loop {
            let step = self
                .config
                .backoff
                .get(request.attempts as usize)
                .or_else(|| self.config.backoff.last())
                .copied()
                .unwrap_or(Duration::from_millis(250));

            if !step.is_zero() {
                tokio::time::sleep(step).await;
            }

            request.attempts += 1;

            match self
                .audit
                .fetch(request.guild_id, request.kind, self.config.fetch_limit)
                .await
            {
                Ok(entries) => {
                    if let Some(actor_id) =
                        best_match(&entries, request.target_id, observed_at, self.config.tolerance)
                    {
                        return Some(actor_id);
                    }
                }
                Err(AuditError::Forbidden) => {
                    error!(
                        "audit log access forbidden in guild {}; \
                         actor attribution is degraded until permissions are fixed",
                        request.guild_id
                    );
                    return None;
                }
                Err(e @ AuditError::RateLimited) | Err(e @ AuditError::Other(_)) => {
                    warn!(
                        "giving up on audit match for {} in guild {}: {}",
                        request.kind, request.guild_id, e
                    );
                    return None;
                }
            }

            if tokio::time::Instant::now() >= request.deadline {
                return None;
            }
        }
    }
}

/// Pick the entry whose timestamp sits nearest our receipt time, within
/// tolerance. Entries arrive newest first, so on an exact tie the earlier
/// list position (most recent entry) wins.
fn best_match(
    entries: &[AuditEntry],
    target_id: TargetId,
    observed_at: DateTime<Utc>,
    tolerance: chrono::Duration,
) -> Option<UserId> {
    let mut best: Option<(chrono::Duration, UserId)> = None;

    for entry in entries {
        if entry.target_id != target_id {
            continue;
        }

        let distance = (entry.created_at - observed_at).abs();
        if distance > tolerance {
            continue;
        }

        if best.map_or(true, |(best_distance, _)| distance < best_distance) {
            best = Some((distance, entry.actor_id));
        }
    }

    best.map(|(_, actor_id)| actor_id)
}
