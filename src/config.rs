use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use log::warn;
use moka::future::Cache;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::core::{EventKind, GuildId, PunishmentAction, UserId};
use crate::Error;

/// One limit: how many events of a kind inside the trailing window trip the
/// punishment. The bound is inclusive: hitting `count` exactly punishes.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Threshold {
    pub count: u32,
    pub window_secs: u64,
}

impl Threshold {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs as i64)
    }
}

static DEFAULT_THRESHOLDS: Lazy<IndexMap<EventKind, Threshold>> = Lazy::new(|| {
    IndexMap::from([
        (
            EventKind::ChannelDelete,
            Threshold {
                count: 3,
                window_secs: 60,
            },
        ),
        (
            EventKind::RoleDelete,
            Threshold {
                count: 3,
                window_secs: 60,
            },
        ),
        (
            EventKind::MemberKick,
            Threshold {
                count: 5,
                window_secs: 60,
            },
        ),
        (
            EventKind::MemberBan,
            Threshold {
                count: 5,
                window_secs: 60,
            },
        ),
        (
            EventKind::MemberPrune,
            Threshold {
                count: 2,
                window_secs: 600,
            },
        ),
        (
            EventKind::PermissionGrant,
            Threshold {
                count: 3,
                window_secs: 120,
            },
        ),
    ])
});

/// Per-guild protection settings. Snapshots are read on every decision and
/// written only by the admin command surface, which sits outside this crate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuildSecurityConfig {
    pub enabled: bool,
    pub thresholds: IndexMap<EventKind, Threshold>,
    /// Trusted actors; never punished regardless of score.
    pub whitelist: HashSet<UserId>,
    pub punishment: PunishmentAction,
    /// Fraction of a threshold at which an advisory is raised; `None`
    /// disables the band.
    pub escalate_ratio: Option<f64>,
}

impl Default for GuildSecurityConfig {
    fn default() -> Self {
        // Protection is opt-in, matching the `/antinuke` toggle; a guild
        // that never configured anything gets the kill switch, not bans.
        Self {
            enabled: false,
            thresholds: DEFAULT_THRESHOLDS.clone(),
            whitelist: HashSet::new(),
            punishment: PunishmentAction::Ban,
            escalate_ratio: Some(0.5),
        }
    }
}

impl GuildSecurityConfig {
    /// Default limits with protection switched on.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }
}

/// Read access to wherever guild configuration actually lives. The engine
/// never writes it.
#[async_trait::async_trait]
pub trait ConfigStore: Send + Sync {
    /// `Ok(None)` when the guild was never configured.
    async fn get(&self, guild_id: GuildId) -> Result<Option<GuildSecurityConfig>, Error>;
}

/// Read-through snapshot cache in front of the store.
///
/// A store failure degrades that one lookup to a disabled config. The
/// degraded snapshot is never cached, so the guild recovers as soon as the
/// store does.
pub struct ConfigCache {
    store: Arc<dyn ConfigStore>,
    cache: Cache<GuildId, Arc<GuildSecurityConfig>>,
}

impl ConfigCache {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            cache: Cache::builder().build(),
        }
    }

    pub async fn get(&self, guild_id: GuildId) -> Arc<GuildSecurityConfig> {
        if let Some(config) = self.cache.get(&guild_id).await {
            return config;
        }

        match self.store.get(guild_id).await {
            Ok(found) => {
                let config = Arc::new(found.unwrap_or_default());
                self.cache.insert(guild_id, config.clone()).await;
                config
            }
            Err(e) => {
                warn!(
                    "config store unreachable for guild {}; treating protection as disabled: {}",
                    guild_id, e
                );
                Arc::new(GuildSecurityConfig::default())
            }
        }
    }

    /// Drop a guild's snapshot. The admin surface calls this after writing
    /// new settings through its own channel.
    pub async fn invalidate(&self, guild_id: GuildId) {
        self.cache.invalidate(&guild_id).await;
    }
}
