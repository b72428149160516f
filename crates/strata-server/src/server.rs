//! The server: settings, worlds and the connection manager behind one
//! lifecycle.
//!
//! ```text
//! Idle --start--> Starting --ok--> Running --shutdown--> ShutDown
//!                    |
//!                    +--failed--> Idle
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use strata_config::{CliArgs, ServerSettings, WorldSettings};
use strata_log::Diagnostics;
use strata_net::{
    ConnectionId, ConnectionManager, ManagerConfig, ProcessReport, TcpTransport, Transport,
};
use strata_voxel::VoxelTypeRegistry;
use strata_world::{World, WorldRegistries};

use crate::commands::Command;
use crate::error::ServerError;
use crate::game::GameState;
use crate::handlers::register_handlers;
use crate::streaming::stream_chunks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Starting,
    Running,
    ShutDown,
}

/// Where the server accepts clients.
pub enum Endpoint {
    /// Bind TCP on the configured `ip:port`, with socket tasks on this runtime.
    Tcp(tokio::runtime::Handle),
    /// Serve an already bound transport.
    Transport(Box<dyn Transport>),
}

/// What the operator loop should do after a console command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Continue,
    Stop { save: bool },
}

pub struct Server {
    state: ServerState,
    config_dir: PathBuf,
    overrides: Option<CliArgs>,
    settings: ServerSettings,
    manager: ConnectionManager<GameState>,
    game: GameState,
    ticks: u64,
    diag: Diagnostics,
}

impl Server {
    /// An idle server reading its settings from `config_dir`.
    pub fn new(config_dir: impl Into<PathBuf>, diag: Diagnostics) -> Self {
        Self {
            state: ServerState::Idle,
            config_dir: config_dir.into(),
            overrides: None,
            settings: ServerSettings::default(),
            manager: ConnectionManager::new(ManagerConfig::default(), diag.scoped("net")),
            game: GameState::new(diag.scoped("game")),
            ticks: 0,
            diag,
        }
    }

    /// Apply command-line overrides on top of the settings file at start.
    pub fn with_overrides(mut self, args: CliArgs) -> Self {
        self.overrides = Some(args);
        self
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ServerState::Running
    }

    /// Effective settings. Defaults until the server started.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    pub fn game(&self) -> &GameState {
        &self.game
    }

    pub fn catalogue(&self) -> &VoxelTypeRegistry {
        self.game.catalogue()
    }

    /// Register extra generators or game modes before starting.
    pub fn registries_mut(&mut self) -> &mut WorldRegistries {
        self.game.registries_mut()
    }

    pub fn connections(&self) -> &strata_net::ConnectionTable {
        self.manager.connections()
    }

    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.manager.local_addr()
    }

    fn expect_running(&self) -> Result<(), ServerError> {
        if self.state != ServerState::Running {
            return Err(ServerError::NotRunning(self.state));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Load settings and the voxel catalogue, open the default worlds and
    /// start accepting clients on `endpoint`.
    ///
    /// Any failure is logged as fatal and leaves the server `Idle`.
    pub fn start(&mut self, endpoint: Endpoint) -> Result<(), ServerError> {
        if self.state != ServerState::Idle {
            self.diag
                .warning(format_args!("Start requested while {:?}", self.state));
            return Err(ServerError::AlreadyStarted);
        }
        self.state = ServerState::Starting;

        match self.bring_up(endpoint) {
            Ok(()) => {
                self.state = ServerState::Running;
                self.diag.info(format_args!(
                    "Server running at {} tps with {} world(s)",
                    self.settings.tps,
                    self.game.worlds().count()
                ));
                Ok(())
            }
            Err(e) => {
                self.diag.fatal(format_args!("Server failed to start: {e}"));
                self.game.close_all(false);
                self.state = ServerState::Idle;
                Err(e)
            }
        }
    }

    fn bring_up(&mut self, endpoint: Endpoint) -> Result<(), ServerError> {
        let settings = self.load_settings()?;

        let catalogue_path = self.config_dir.join(&settings.voxel_types_file);
        let catalogue = VoxelTypeRegistry::load_or_create(&catalogue_path)?;
        self.diag.info(format_args!(
            "{} voxel type(s) in catalogue",
            catalogue.len()
        ));

        self.game
            .configure(self.config_dir.join(&settings.worlds_directory), catalogue);
        self.game.open_default_worlds(&settings.default_worlds)?;

        let transport: Box<dyn Transport> = match endpoint {
            Endpoint::Tcp(handle) => {
                let addr = settings.bind_address();
                let max = settings.max_connections as usize;
                Box::new(handle.block_on(TcpTransport::bind(&addr, max))?)
            }
            Endpoint::Transport(transport) => transport,
        };

        let config = ManagerConfig {
            auth_timeout: Duration::from_millis(settings.auth_timeout_ms),
            max_malformed: settings.max_malformed_packets,
        };
        let mut manager = ConnectionManager::new(config, self.diag.scoped("net"));
        register_handlers(manager.registry_mut());
        manager.start(transport)?;

        self.manager = manager;
        self.settings = settings;
        Ok(())
    }

    /// Settings file, validated and written back, then CLI overrides.
    fn load_settings(&self) -> Result<ServerSettings, ServerError> {
        let mut settings = ServerSettings::load_or_create(&self.config_dir)?;
        let restored = settings.validate();
        if !restored.is_empty() {
            for warning in &restored {
                self.diag.warning(warning);
            }
            if let Err(e) = settings.save(&self.config_dir) {
                self.diag
                    .warning(format_args!("Could not write back settings: {e}"));
            }
        }

        if let Some(args) = &self.overrides {
            settings.apply_cli_overrides(args);
            for warning in settings.validate() {
                self.diag.warning(format_args!("Override ignored: {warning}"));
            }
        }
        Ok(settings)
    }

    /// One server tick: network pass, despawning departed players, world
    /// ticks, then chunk streaming.
    pub fn tick(&mut self, dt: f32) -> Result<ProcessReport, ServerError> {
        self.tick_at(dt, Instant::now())
    }

    /// [`tick`](Self::tick) with an explicit clock for the network pass.
    pub fn tick_at(&mut self, dt: f32, now: Instant) -> Result<ProcessReport, ServerError> {
        self.expect_running()?;

        let report = self
            .manager
            .process_client_connections_at(&mut self.game, now);
        for client in &report.disconnected {
            self.game.despawn(client);
        }

        self.game.tick_worlds(dt);

        stream_chunks(self.manager.connections_mut(), &mut self.game);
        self.manager.flush();

        self.ticks += 1;
        Ok(report)
    }

    /// Disconnect every client, save (if asked) and unload every world, then
    /// stop the transport.
    pub fn shutdown(&mut self, save_all: bool) -> Result<(), ServerError> {
        if self.state != ServerState::Running {
            self.diag
                .warning(format_args!("Shutdown requested while {:?}", self.state));
            return Err(ServerError::NotRunning(self.state));
        }
        self.diag.info(format_args!(
            "Shutting down ({})",
            if save_all { "saving" } else { "not saving" }
        ));

        self.manager.disconnect_clients();
        let report = self.manager.process_client_connections(&mut self.game);
        for client in &report.disconnected {
            self.game.despawn(client);
        }

        self.game.close_all(save_all);

        if let Err(e) = self.manager.stop() {
            self.diag.warning(format_args!("Stopping transport: {e}"));
        }
        self.state = ServerState::ShutDown;
        self.diag.info("Server stopped");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Worlds
    // -----------------------------------------------------------------------

    pub fn load_world(&mut self, name: &str) -> Result<(), ServerError> {
        self.expect_running()?;
        self.game.load_world(name)
    }

    pub fn create_world(&mut self, settings: WorldSettings) -> Result<(), ServerError> {
        self.expect_running()?;
        self.game.create_world(settings)
    }

    /// Unload a world. Clients whose players live there are disconnected.
    pub fn unload_world(&mut self, name: &str, save: bool) -> Result<(), ServerError> {
        self.expect_running()?;
        self.game.unload_world(name, save)?;
        self.kick_world_clients(name);
        Ok(())
    }

    /// Delete a world from disk, unloading it first if needed.
    pub fn delete_world(&mut self, name: &str) -> Result<(), ServerError> {
        self.expect_running()?;
        let loaded = self.game.world(name).is_some();
        self.game.delete_world(name)?;
        if loaded {
            self.kick_world_clients(name);
        }
        Ok(())
    }

    fn kick_world_clients(&mut self, name: &str) {
        let connections = self.manager.connections_mut();
        let inside: Vec<ConnectionId> = connections
            .authenticated()
            .filter(|c| c.controller().is_some_and(|r| r.world == name))
            .map(|c| c.id())
            .collect();
        for id in inside {
            connections.kick(id);
        }
    }

    pub fn world(&self, name: &str) -> Option<&World> {
        self.game.world(name)
    }

    pub fn world_mut(&mut self, name: &str) -> Option<&mut World> {
        self.game.world_mut(name)
    }

    pub fn worlds(&self) -> impl Iterator<Item = &World> {
        self.game.worlds()
    }

    pub fn world_exists(&self, name: &str) -> bool {
        self.game.world_exists(name)
    }

    // -----------------------------------------------------------------------
    // Console
    // -----------------------------------------------------------------------

    pub fn run_command(&mut self, command: Command) -> CommandOutcome {
        match command {
            Command::Stop { save } => return CommandOutcome::Stop { save },
            Command::Players => {
                let clients: Vec<_> = self.manager.connected_clients().collect();
                self.diag
                    .info(format_args!("{} player(s) online", clients.len()));
                for client in clients {
                    let world = client.controller().map_or("-", |c| c.world.as_str());
                    self.diag.info(format_args!(
                        "  {} from {} in '{world}'",
                        client.username(),
                        client.address()
                    ));
                }
            }
            Command::Save => {
                if self.is_running() {
                    let chunks = self.game.save_all();
                    self.diag.info(format_args!("Saved {chunks} chunk(s)"));
                }
            }
            Command::Worlds => {
                for world in self.game.worlds() {
                    self.diag.info(format_args!(
                        "  '{}' {:?}: {} chunk(s), {} player(s), {} entity(ies)",
                        world.name(),
                        world.state(),
                        world.chunks().len(),
                        world.player_count(),
                        world.entity_count()
                    ));
                }
            }
        }
        CommandOutcome::Continue
    }
}
