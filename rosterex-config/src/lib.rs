//! Shared configuration library for rosterex.
//!
//! This crate centralizes the scrape and stream-manager tunables, their
//! documented defaults, TOML/env loading, and validation rules so every
//! consumer sees a single source of truth.

pub mod loader;
pub mod models;

pub use loader::{ConfigLoadError, load, load_from_str};
pub use models::{Config, ScrapeConfig, StreamConfig};
