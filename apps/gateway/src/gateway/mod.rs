//! Real-time gateway: socket connections, presence, event fan-out, and
//! signaling routed to voice, call, and DM services.

pub mod broadcast;
pub mod connection;
pub mod events;
pub mod hub;
pub mod liveness;
pub mod presence;
pub mod registry;
pub mod server;
pub mod signaling;

pub use broadcast::Scope;
pub use hub::{Hub, HubSettings};
