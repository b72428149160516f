//! The Strata server: lifecycle, packet handlers, chunk streaming, tick
//! pacing and operator commands.

pub mod clock;
pub mod commands;
pub mod error;
pub mod game;
pub mod handlers;
pub mod server;
pub mod streaming;

pub use clock::{MAX_LAG, TickClock};
pub use commands::{Command, CommandError, spawn_command_reader};
pub use error::ServerError;
pub use game::GameState;
pub use handlers::register_handlers;
pub use server::{CommandOutcome, Endpoint, Server, ServerState};
pub use streaming::stream_chunks;
