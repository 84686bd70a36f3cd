use crate::config::GuildSecurityConfig;
use crate::core::{Actor, Decision, SecurityEvent};

/// Map a tracker score to a decision. Pure; every input is a snapshot and
/// all I/O stays with the caller.
///
/// Threshold counts are inclusive lower bounds: a score exactly at the
/// limit punishes. The advisory band sits at `escalate_ratio` of the limit
/// (rounded up) and only ever raises an advisory.
pub fn decide(score: u32, event: &SecurityEvent, config: &GuildSecurityConfig) -> Decision {
    if !config.enabled {
        return Decision::Ignore;
    }

    if let Some(Actor::User(user_id)) = event.actor {
        if config.whitelist.contains(&user_id) {
            return Decision::Ignore;
        }
    }

    let Some(threshold) = config.thresholds.get(&event.kind) else {
        // Kind not limited in this guild.
        return Decision::Ignore;
    };

    if score >= threshold.count {
        return Decision::Punish;
    }

    if let Some(ratio) = config.escalate_ratio {
        let band = (threshold.count as f64 * ratio).ceil() as u32;
        if band > 0 && score >= band {
            return Decision::Escalate;
        }
    }

    Decision::Ignore
}
