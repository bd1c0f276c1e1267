use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;
use crate::wire::WireMember;

/// A discovered guild member.
///
/// Created the first time any session observes the id and never mutated
/// afterward; duplicate sightings are discarded by the result store, not
/// merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: UserId,
    pub is_bot: bool,
    pub username: Option<String>,
    pub discriminator: Option<String>,
    pub avatar_hash: Option<String>,
    pub joined_at: Option<DateTime<Utc>>,
}

impl MemberRecord {
    /// The lowercased name the platform's prefix search matches against.
    pub fn searchable_name(&self) -> Option<String> {
        self.username.as_ref().map(|name| name.to_lowercase())
    }
}

impl From<&WireMember> for MemberRecord {
    fn from(wire: &WireMember) -> Self {
        MemberRecord {
            id: wire.user.id.clone(),
            is_bot: wire.user.bot,
            username: wire.user.username.clone(),
            discriminator: wire.user.discriminator.clone(),
            avatar_hash: wire.user.avatar.clone(),
            joined_at: wire.joined_at,
        }
    }
}
