pub mod connection;
pub mod presence;

pub use presence::{Presence, PresenceChannel, PresenceTracker};
