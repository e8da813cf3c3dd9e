pub mod auth;
pub mod error;
pub mod mailer;
pub mod messages;
pub mod middleware;
pub mod rooms;
pub mod sessions;
