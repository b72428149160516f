//! Operator commands typed on the server console.

use std::io::BufRead;
use std::str::FromStr;

use crossbeam_channel::{Receiver, unbounded};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `stop [nosave]`
    Stop { save: bool },
    /// `players`
    Players,
    /// `save`
    Save,
    /// `worlds`
    Worlds,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}' (try stop, players, save, worlds)")]
    Unknown(String),
    #[error("unexpected argument '{argument}' for '{command}'")]
    UnexpectedArgument { command: String, argument: String },
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(CommandError::Empty)?.to_ascii_lowercase();
        let argument = words.next();
        let extra = |argument: &str| CommandError::UnexpectedArgument {
            command: name.clone(),
            argument: argument.to_string(),
        };

        let command = match (name.as_str(), argument) {
            ("stop", None) => Command::Stop { save: true },
            ("stop", Some(arg)) if arg.eq_ignore_ascii_case("nosave") => {
                Command::Stop { save: false }
            }
            ("players", None) => Command::Players,
            ("save", None) => Command::Save,
            ("worlds", None) => Command::Worlds,
            ("stop" | "players" | "save" | "worlds", Some(arg)) => return Err(extra(arg)),
            _ => return Err(CommandError::Unknown(name.clone())),
        };
        if let Some(arg) = words.next() {
            return Err(extra(arg));
        }
        Ok(command)
    }
}

/// Read commands from `input` on a background thread.
///
/// Invalid lines are logged and skipped. The channel disconnects when
/// `input` reaches end of file or fails.
pub fn spawn_command_reader<R>(input: R) -> std::io::Result<Receiver<Command>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = unbounded();
    std::thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            for line in input.lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("{e}"),
                }
            }
            debug!("Console input closed");
        })?;
    Ok(rx)
}
