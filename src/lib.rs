//! PocketAgent - a chat bot front end for a planning agent
//!
//! This crate provides:
//! - A classifier that answers simple messages directly
//! - A coordinator that suspends plan runs on clarifications and resumes them
//!   with the user's next message
//! - Telegram and console transports

pub mod auth;
pub mod bot;
pub mod clarification;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod normalizer;
pub mod planner;
pub mod provider;
pub mod reply;
pub mod session;
pub mod telemetry;
pub mod templates;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::AuthConfig;
pub use bot::{planner_from_config, PocketAgent};
pub use config::Config;
pub use coordinator::{Coordinator, SessionId};
pub use events::BotEvent;
pub use provider::{CompletionService, ProviderClient, ProviderConfig};
pub use session::SessionAdapter;
pub use telemetry::Telemetry;
