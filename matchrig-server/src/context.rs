//! matchrig-server/src/context.rs
//!
//! Defines the main "global" context (ServerContext) for the rig server.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use matchrig_core::config::AppConfig;
use matchrig_core::eventbus::EventBus;
use matchrig_core::cancel::StopSignal;
use matchrig_core::input::Sequencer;
use matchrig_core::launch::LaunchQueue;
use matchrig_core::lobby::LobbyService;
use matchrig_core::logwatch::LogWatchService;
use matchrig_core::oracle::AcceptOracle;
use matchrig_core::os::ProcessApi;
use matchrig_core::registry::{AccountRegistry, RuntimeMap, SecretStore};
use matchrig_core::search::{ConsensusDetector, SearchOrchestrator};
use matchrig_core::tasks::PostMatchFlow;
use matchrig_core::telemetry::TelemetryState;
use matchrig_core::windows::{WindowArranger, WindowResolver};
use matchrig_core::Error;

use crate::platform;
use crate::Args;

/// The global server context (a bag of references to the event bus, account
/// registry, window services and flows).
pub struct ServerContext {
    pub cfg: AppConfig,
    pub event_bus: Arc<EventBus>,
    /// Operator-facing cancellation for whatever flow is in flight.
    pub stop: StopSignal,
    pub process: Arc<dyn ProcessApi>,

    pub registry: Arc<AccountRegistry>,
    pub runtime: Arc<RuntimeMap>,
    pub resolver: Arc<WindowResolver>,
    pub arranger: Arc<WindowArranger>,
    pub logwatch: Arc<LogWatchService>,
    pub launch_queue: Arc<LaunchQueue>,
    pub lobby: Arc<LobbyService>,
    pub consensus: Arc<ConsensusDetector>,
    pub search: Arc<SearchOrchestrator>,
    pub telemetry: Arc<TelemetryState>,
}

impl ServerContext {
    /// Creates and configures the entire context for "server" mode.
    pub async fn new(args: &Args) -> Result<Self, Error> {
        // 1) Load config and apply CLI overrides
        let mut cfg = AppConfig::load(Path::new(&args.config))?;
        if let Some(bind) = &args.bind {
            cfg.telemetry_bind = bind.clone();
        }
        if args.auto_search {
            cfg.auto_search = true;
        }

        // 2) Native OS adapters (win32 on Windows, inert stubs elsewhere)
        let adapters = platform::native_adapters(&cfg);

        let event_bus = Arc::new(EventBus::new());
        let stop = StopSignal::new();

        // 3) Accounts: credentials file joined with the secret records
        let secrets = Arc::new(SecretStore::new(&cfg.secrets_dir));
        let registry = Arc::new(AccountRegistry::new(
            adapters.process.clone(),
            event_bus.clone(),
            &cfg,
        ));
        let count = registry.load_from_disk(&cfg, &secrets)?;
        info!("context ready with {} accounts", count);

        let runtime = Arc::new(RuntimeMap::load(&cfg.runtime_map_path));

        // 4) Window plumbing
        let resolver = Arc::new(WindowResolver::new(
            adapters.windows.clone(),
            adapters.process.clone(),
            &cfg,
        ));
        let arranger = Arc::new(WindowArranger::new(
            adapters.windows.clone(),
            adapters.process.clone(),
            &cfg,
        ));
        let sequencer = Arc::new(Sequencer::new(
            adapters.windows.clone(),
            adapters.input.clone(),
        ));
        let oracle = Arc::new(AcceptOracle::new(
            adapters.windows.clone(),
            adapters.pixels.clone(),
        ));

        // 5) Launch pipeline
        let logwatch = Arc::new(LogWatchService::new(
            &cfg,
            resolver.clone(),
            arranger.clone(),
            event_bus.clone(),
        ));
        let launch_queue = Arc::new(LaunchQueue::new(
            registry.clone(),
            adapters.launcher.clone(),
            logwatch.clone(),
            event_bus.clone(),
            &cfg,
        ));

        // 6) Lobby + search flows
        let lobby = Arc::new(LobbyService::new(
            registry.clone(),
            resolver.clone(),
            arranger.clone(),
            sequencer.clone(),
            adapters.windows.clone(),
            adapters.process.clone(),
            &cfg,
        ));
        let consensus = Arc::new(ConsensusDetector::new(
            registry.clone(),
            lobby.clone(),
            arranger.clone(),
            resolver.clone(),
            sequencer.clone(),
            adapters.windows.clone(),
            event_bus.clone(),
            &cfg,
        ));
        let search = Arc::new(SearchOrchestrator::new(
            lobby.clone(),
            consensus.clone(),
            oracle,
            resolver.clone(),
            sequencer.clone(),
            event_bus.clone(),
            &cfg,
        ));

        // 7) Telemetry state machine + post-match flow
        let telemetry = Arc::new(TelemetryState::new(
            secrets,
            registry.clone(),
            runtime.clone(),
            resolver.clone(),
            sequencer.clone(),
            adapters.stats.clone(),
            adapters.windows.clone(),
            adapters.process.clone(),
            event_bus.clone(),
            &cfg,
        ));
        let post_match = Arc::new(PostMatchFlow::new(
            adapters.windows.clone(),
            resolver.clone(),
            runtime.clone(),
            sequencer,
            search.clone(),
            event_bus.clone(),
            stop.clone(),
            &cfg,
        ));
        telemetry.set_post_match(post_match);

        Ok(ServerContext {
            cfg,
            event_bus,
            stop,
            process: adapters.process,
            registry,
            runtime,
            resolver,
            arranger,
            logwatch,
            launch_queue,
            lobby,
            consensus,
            search,
            telemetry,
        })
    }
}
