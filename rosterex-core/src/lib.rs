//! Core library for rosterex: enumerates the membership of a large guild by
//! driving the platform's WebSocket gateway with sharded prefix-search
//! sessions, and spools oversized results for chunked retrieval.
//!
//! The host supplies an authenticated token and a resolved [`GuildTarget`];
//! everything else (connections, heartbeats, retries, recycling) is handled
//! internally. See [`coordinator::Scraper`] for the entry point.
//!
//! [`GuildTarget`]: rosterex_model::GuildTarget

pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod store;
pub mod stream;

pub use coordinator::{ScrapeOptions, Scraper};
pub use error::{ScrapeError, SessionError, StreamError};
pub use gateway::{GatewayConnector, GatewayTransport, WsConnector};
pub use store::ResultStore;
pub use stream::{PackedResult, StreamManager};

pub use rosterex_config as config;
pub use rosterex_model as model;
