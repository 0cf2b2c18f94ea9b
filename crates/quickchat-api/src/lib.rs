pub mod auth;
pub mod chat_requests;
pub mod delivery;
pub mod error;
pub mod extract;
pub mod media;
pub mod messages;
pub mod middleware;
pub mod projection;
pub mod state;
pub mod users;
