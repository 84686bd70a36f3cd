//! Guild protection engine.
//!
//! Watches a feed of destructive administrative events (channel/role
//! deletions, mass kicks/bans, permission escalations) across many guilds,
//! resolves the responsible actor through the platform's delayed audit
//! trail, scores actors over sliding windows and applies a configured
//! punishment at most once per burst.
//!
//! The crate is a library: the platform connection, the audit trail, the
//! moderation actions and the per-guild configuration all enter through
//! traits ([`correlator::AuditLogSource`], [`punish::ActionSink`],
//! [`config::ConfigStore`]). An event-dispatch layer feeds raw
//! notifications into [`handler::Engine::handle`] (or through a
//! [`dispatch::Dispatcher`] when backpressure is wanted) and everything
//! else happens here.

pub mod cache;
pub mod config;
pub mod core;
pub mod correlator;
pub mod dispatch;
pub mod events;
pub mod handler;
pub mod policy;
pub mod punish;
pub mod tasks;

pub type Error = Box<dyn std::error::Error + Send + Sync>;

pub use crate::core::{
    Actor, Decision, EventKind, GuildId, Outcome, PunishmentAction, SecurityEvent, TargetId,
    UserId,
};
pub use crate::handler::{Engine, Verdict};
