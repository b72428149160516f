//! Strata server binary.
//!
//! Run with: `cargo run -p strata-server -- --config <dir>`

use std::process::ExitCode;

use clap::Parser;
use crossbeam_channel::TryRecvError;
use strata_config::{CliArgs, ServerSettings};
use strata_log::Diagnostics;
use strata_server::{CommandOutcome, Endpoint, Server, TickClock, spawn_command_reader};
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // The settings file may name a log level; the CLI wins.
    let level = args
        .log_level
        .clone()
        .or_else(|| {
            ServerSettings::load_or_create(&args.config)
                .ok()
                .map(|s| s.log_level)
        })
        .unwrap_or_default();
    strata_log::init_logging(args.log_dir.as_deref(), args.log_dir.is_some(), &level);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("strata-net")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Could not start the network runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let config_dir = args.config.clone();
    let mut server = Server::new(config_dir, Diagnostics::tracing("server")).with_overrides(args);
    if server.start(Endpoint::Tcp(runtime.handle().clone())).is_err() {
        return ExitCode::FAILURE;
    }
    if let Some(addr) = server.local_addr() {
        info!("Listening on {addr}");
    }

    let commands = match spawn_command_reader(std::io::BufReader::new(std::io::stdin())) {
        Ok(rx) => Some(rx),
        Err(e) => {
            warn!("Console commands unavailable: {e}");
            None
        }
    };

    let mut clock = TickClock::new(server.settings().tps);
    let save_on_exit = 'run: loop {
        if let Some(rx) = &commands {
            loop {
                match rx.try_recv() {
                    Ok(command) => {
                        if let CommandOutcome::Stop { save } = server.run_command(command) {
                            break 'run save;
                        }
                    }
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
                }
            }
        }

        if let Err(e) = server.tick(clock.dt()) {
            error!("Tick failed: {e}");
            break true;
        }
        clock.wait();
    };

    let result = server.shutdown(save_on_exit);
    runtime.shutdown_timeout(std::time::Duration::from_secs(2));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
