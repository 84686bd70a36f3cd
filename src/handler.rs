use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};

use crate::cache::RateTracker;
use crate::config::{ConfigCache, ConfigStore};
use crate::core::{Actor, Decision, Outcome, SecurityEvent, UserId};
use crate::correlator::{AuditLogSource, Correlator, CorrelatorConfig};
use crate::events::{normalize, RawEvent};
use crate::policy;
use crate::punish::{ActionSink, Executor};

/// Optional advisory feed. The engine hands over the raw triple and has no
/// opinion on how (or whether) a consumer renders it.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &SecurityEvent, decision: Decision, outcome: Option<&Outcome>);
}

/// Everything the engine concluded about one event.
#[derive(Clone, Debug)]
pub struct Verdict {
    pub event: SecurityEvent,
    pub score: u32,
    pub decision: Decision,
    /// Present only when the executor ran (a `Punish` decision).
    pub outcome: Option<Outcome>,
}

/// The full detection-and-response pipeline:
/// normalize → correlate → score → decide → respond.
///
/// One engine serves every guild. All per-key state sits in the shared
/// [`RateTracker`], so events for different keys (different guilds, actors
/// or kinds) flow through concurrently without contending; calls for the
/// same key serialize only at the tracker entry.
pub struct Engine {
    audit: Arc<dyn AuditLogSource>,
    bot_id: Option<UserId>,
    correlator: Correlator,
    tracker: Arc<RateTracker>,
    configs: ConfigCache,
    executor: Executor,
    notifier: Option<Arc<dyn NotificationSink>>,
}

impl Engine {
    pub fn new(
        audit: Arc<dyn AuditLogSource>,
        sink: Arc<dyn ActionSink>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        let tracker = Arc::new(RateTracker::new());

        Self {
            correlator: Correlator::new(audit.clone(), CorrelatorConfig::default()),
            audit,
            bot_id: None,
            executor: Executor::new(sink, tracker.clone()),
            tracker,
            configs: ConfigCache::new(store),
            notifier: None,
        }
    }

    /// The engine's own account; its moderation actions are exempt so that
    /// applied punishments do not feed back into the counters.
    pub fn with_bot_user(mut self, bot_id: UserId) -> Self {
        self.bot_id = Some(bot_id);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_correlator_config(mut self, config: CorrelatorConfig) -> Self {
        self.correlator = Correlator::new(self.audit.clone(), config);
        self
    }

    /// Shared tracker handle, for the periodic sweep task.
    pub fn tracker(&self) -> Arc<RateTracker> {
        self.tracker.clone()
    }

    /// Config snapshot cache; the admin surface invalidates through this
    /// after writing new settings.
    pub fn configs(&self) -> &ConfigCache {
        &self.configs
    }

    /// Run one raw platform notification through the pipeline.
    ///
    /// `None` means the event never reached a decision: unmonitored kind,
    /// malformed notification, protection disabled, unlimited kind, or the
    /// engine's own action. Never returns an error and never panics; every
    /// failure mode inside degrades to a logged no-op.
    pub async fn handle(&self, raw: RawEvent) -> Option<Verdict> {
        let event = normalize(&raw, Utc::now())?;
        self.handle_event(event).await
    }

    /// Pipeline entry past normalization, for callers that already shaped
    /// their events.
    pub async fn handle_event(&self, event: SecurityEvent) -> Option<Verdict> {
        let config = self.configs.get(event.guild_id).await;

        if !config.enabled {
            debug!(
                "protection disabled for guild {}; ignoring {}",
                event.guild_id, event.kind
            );
            return None;
        }

        // Unlimited kinds never pay for correlation.
        let threshold = *config.thresholds.get(&event.kind)?;

        let event = self.correlator.resolve(event).await;

        if let Some(Actor::User(user_id)) = event.actor {
            if Some(user_id) == self.bot_id {
                debug!(
                    "own moderation action in guild {}; not counting it",
                    event.guild_id
                );
                return None;
            }
        }

        let key = event.key()?;
        let score = self.tracker.record(&key, event.observed_at, threshold.window());

        let decision = policy::decide(score, &event, &config);

        let outcome = match decision {
            Decision::Ignore => None,
            Decision::Escalate => {
                warn!(
                    "{} nearing the {} limit in guild {} (score {} of {})",
                    key.actor, event.kind, event.guild_id, score, threshold.count
                );
                self.notify(&event, decision, None).await;
                None
            }
            Decision::Punish => {
                let outcome = self.executor.respond(decision, &event, &config).await;
                self.notify(&event, decision, Some(&outcome)).await;
                Some(outcome)
            }
        };

        Some(Verdict {
            event,
            score,
            decision,
            outcome,
        })
    }

    async fn notify(&self, event: &SecurityEvent, decision: Decision, outcome: Option<&Outcome>) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(event, decision, outcome).await;
        }
    }
}
