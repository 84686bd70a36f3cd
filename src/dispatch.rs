use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::warn;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::core::GuildId;
use crate::events::RawEvent;
use crate::handler::Engine;

#[derive(Clone, Copy, Debug)]
pub struct DispatcherConfig {
    /// Raw events a guild may queue while its in-flight slots are busy.
    pub queue_capacity: usize,
    /// Events of one guild processed concurrently. Different tracker keys
    /// run in parallel up to this bound.
    pub max_in_flight: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            max_in_flight: 16,
        }
    }
}

struct GuildQueue {
    tx: mpsc::Sender<RawEvent>,
    worker: JoinHandle<()>,
    dropped: Arc<AtomicU64>,
}

/// Per-guild bounded intake in front of the engine.
///
/// Guilds get independent queues and workers, so a flood in one guild never
/// delays detection in another. A full queue drops the event with a log
/// line and a counter bump; events are never silently double-counted and
/// memory never grows past the configured bounds.
pub struct Dispatcher {
    engine: Arc<Engine>,
    config: DispatcherConfig,
    guilds: DashMap<GuildId, GuildQueue>,
}

impl Dispatcher {
    pub fn new(engine: Arc<Engine>, config: DispatcherConfig) -> Self {
        Self {
            engine,
            config,
            guilds: DashMap::new(),
        }
    }

    /// Hand a raw notification to its guild's queue. Non-blocking; returns
    /// whether the event was accepted.
    pub fn submit(&self, raw: RawEvent) -> bool {
        let Some(guild_id) = raw.guild_id() else {
            warn!("dropping guild-less notification at intake: {:?}", raw);
            return false;
        };

        let queue = self.guilds.entry(guild_id).or_insert_with(|| {
            spawn_guild_worker(self.engine.clone(), self.config)
        });

        match queue.tx.try_send(raw) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                queue.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "event queue full for guild {}; dropping event ({} dropped so far)",
                    guild_id,
                    queue.dropped.load(Ordering::Relaxed)
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("worker gone for guild {}; dropping event", guild_id);
                false
            }
        }
    }

    /// Events dropped for a guild since its worker started.
    pub fn dropped(&self, guild_id: GuildId) -> u64 {
        self.guilds
            .get(&guild_id)
            .map(|q| q.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Abort the workers and abandon whatever is queued or in flight.
    /// In-flight correlations run into their own deadlines; nothing is
    /// awaited and no tracker state survives an engine restart anyway.
    pub fn shutdown(&self) {
        for queue in self.guilds.iter() {
            queue.worker.abort();
        }
        self.guilds.clear();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_guild_worker(engine: Arc<Engine>, config: DispatcherConfig) -> GuildQueue {
    let (tx, mut rx) = mpsc::channel::<RawEvent>(config.queue_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let in_flight = Arc::new(Semaphore::new(config.max_in_flight));

    let worker = tokio::spawn(async move {
        while let Some(raw) = rx.recv().await {
            let Ok(permit) = in_flight.clone().acquire_owned().await else {
                break;
            };
            let engine = engine.clone();
            // One task per event: a slow correlation holds its permit, not
            // the rest of the guild's stream.
            tokio::spawn(async move {
                let _permit = permit;
                engine.handle(raw).await;
            });
        }
    });

    GuildQueue {
        tx,
        worker,
        dropped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, GuildSecurityConfig};
    use crate::core::{EventKind, UserId};
    use crate::correlator::{AuditEntry, AuditError, AuditLogSource, CorrelatorConfig};
    use crate::punish::{ActionSink, SinkError};
    use std::time::Duration;

    struct SlowAudit;

    #[async_trait::async_trait]
    impl AuditLogSource for SlowAudit {
        async fn fetch(
            &self,
            _guild_id: GuildId,
            _kind: EventKind,
            _limit: u8,
        ) -> Result<Vec<AuditEntry>, AuditError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Vec::new())
        }
    }

    struct NullSink;

    #[async_trait::async_trait]
    impl ActionSink for NullSink {
        async fn kick(&self, _: GuildId, _: UserId, _: &str) -> Result<(), SinkError> {
            Ok(())
        }
        async fn ban(&self, _: GuildId, _: UserId, _: &str) -> Result<(), SinkError> {
            Ok(())
        }
        async fn remove_roles(&self, _: GuildId, _: UserId, _: &str) -> Result<(), SinkError> {
            Ok(())
        }
    }

    struct EnabledStore;

    #[async_trait::async_trait]
    impl ConfigStore for EnabledStore {
        async fn get(&self, _: GuildId) -> Result<Option<GuildSecurityConfig>, crate::Error> {
            Ok(Some(GuildSecurityConfig::enabled()))
        }
    }

    fn slow_engine() -> Arc<Engine> {
        Arc::new(
            Engine::new(Arc::new(SlowAudit), Arc::new(NullSink), Arc::new(EnabledStore))
                .with_correlator_config(CorrelatorConfig {
                    backoff: vec![Duration::ZERO],
                    deadline: Duration::from_millis(250),
                    ..CorrelatorConfig::default()
                }),
        )
    }

    fn delete(guild: u64, channel: u64) -> RawEvent {
        RawEvent::ChannelDelete {
            guild_id: Some(guild),
            channel_id: channel,
        }
    }

    #[tokio::test]
    async fn full_queues_drop_instead_of_growing() {
        let dispatcher = Dispatcher::new(
            slow_engine(),
            DispatcherConfig {
                queue_capacity: 1,
                max_in_flight: 1,
            },
        );

        let mut accepted = 0;
        for i in 0..5u64 {
            if dispatcher.submit(delete(1, 100 + i)) {
                accepted += 1;
            }
        }

        assert!(accepted >= 1);
        assert!(accepted < 5);
        assert_eq!(dispatcher.dropped(GuildId(1)), 5 - accepted);
    }

    #[tokio::test]
    async fn guilds_queue_independently() {
        let dispatcher = Dispatcher::new(
            slow_engine(),
            DispatcherConfig {
                queue_capacity: 1,
                max_in_flight: 1,
            },
        );

        // Saturate guild 1's queue.
        for i in 0..5u64 {
            dispatcher.submit(delete(1, 100 + i));
        }

        // Guild 2 is unaffected.
        assert!(dispatcher.submit(delete(2, 100)));
        assert_eq!(dispatcher.dropped(GuildId(2)), 0);
    }

    #[tokio::test]
    async fn guildless_events_are_refused_at_intake() {
        let dispatcher = Dispatcher::new(slow_engine(), DispatcherConfig::default());

        assert!(!dispatcher.submit(RawEvent::ChannelDelete {
            guild_id: None,
            channel_id: 100,
        }));
    }

    #[tokio::test]
    async fn shutdown_stops_accepting() {
        let dispatcher = Dispatcher::new(slow_engine(), DispatcherConfig::default());

        assert!(dispatcher.submit(delete(1, 100)));
        dispatcher.shutdown();

        // Workers are gone; a fresh submit spins a new worker, which is fine,
        // but the old queue must not linger.
        assert_eq!(dispatcher.dropped(GuildId(1)), 0);
    }
}
