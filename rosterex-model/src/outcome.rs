use serde::{Deserialize, Serialize};

use crate::guild::GuildTarget;
use crate::ids::GuildId;
use crate::member::MemberRecord;

/// The final (or partial, on cancellation) product of one scrape run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeOutcome {
    pub guild_id: GuildId,
    pub guild_name: String,
    pub count: usize,
    pub members: Vec<MemberRecord>,
    /// Prefix queries that exhausted their retry budget and were dropped.
    /// Non-empty means the member list may be incomplete.
    pub abandoned_prefixes: Vec<String>,
}

impl ScrapeOutcome {
    pub fn new(
        guild: &GuildTarget,
        members: Vec<MemberRecord>,
        abandoned_prefixes: Vec<String>,
    ) -> Self {
        ScrapeOutcome {
            guild_id: guild.id.clone(),
            guild_name: guild.display_name.clone(),
            count: members.len(),
            members,
            abandoned_prefixes,
        }
    }
}
