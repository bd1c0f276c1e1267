use serde::{Deserialize, Serialize};

use crate::ids::GuildId;

/// Read-only description of the guild a scrape targets, supplied by the host
/// bot framework.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildTarget {
    pub id: GuildId,
    pub display_name: String,
    /// The member count the platform advertises for the guild, when known.
    /// Absent disables the count-based stop condition.
    pub expected_member_count: Option<u64>,
}

impl GuildTarget {
    pub fn new(id: impl Into<GuildId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            expected_member_count: None,
        }
    }

    pub fn with_expected_count(mut self, count: u64) -> Self {
        self.expected_member_count = Some(count);
        self
    }
}
