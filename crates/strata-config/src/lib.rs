//! Configuration for the Strata server.
//!
//! Server-wide settings persist as RON and accept CLI overrides via clap.
//! Each world keeps its own JSON settings document.

mod cli;
mod config;
mod error;
mod world_settings;

pub use cli::CliArgs;
pub use config::{SERVER_SETTINGS_FILE_NAME, ServerSettings};
pub use error::ConfigError;
pub use world_settings::{LEVEL_DATA_FILE_NAME, WorldSettings};
