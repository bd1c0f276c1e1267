//! Gateway protocol plumbing: transport seam, per-session scheduler, and the
//! session state machine.

pub mod scheduler;
pub mod session;
pub mod transport;

pub use scheduler::{OutboundQuery, PrefixScheduler};
pub use session::GatewaySession;
pub use transport::{GatewayConnector, GatewayTransport, WsConnector};
