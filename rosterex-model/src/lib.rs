//! Core data model definitions shared across rosterex crates.
#![allow(missing_docs)]

pub mod guild;
pub mod ids;
pub mod member;
pub mod outcome;
pub mod stream;
pub mod wire;

// Intentionally curated re-exports for downstream consumers.
pub use guild::GuildTarget;
pub use ids::{GuildId, UserId};
pub use member::MemberRecord;
pub use outcome::ScrapeOutcome;
pub use stream::{StreamChunk, StreamDescriptor};
