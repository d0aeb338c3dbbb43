use std::path::PathBuf;
use std::pin::pin;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::stream;
use poem::{EndpointExt, Route, Server, get, listener::TcpListener};
use seva_launcher::{
    api::{self, ChannelState},
    backend::{ComposeBackend, DockerRuntime, SystemRunner, resolve_compose_program},
    config::Config,
    controller::{ControlError, Controller},
    launch::{self, BrowserHost},
    registry::{self, Registry},
    store::{AppStore, HttpSource},
    supervisor::{Exit, supervise},
    types::AuxKind,
};
use thiserror::Error;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// How long shutdown waits for a launch still in progress, so a container
/// that comes up during shutdown is stopped rather than leaked.
const LAUNCH_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
enum LauncherError {
    #[error("Failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),
    #[error("Environment variable DISPLAY or WAYLAND_DISPLAY must be set!")]
    NoDisplay,
    #[error("Failed to set up working directory {}: {source}", .path.display())]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Control(#[from] ControlError),
}

/// Interrupt and termination signals, installed before anything is started.
struct ExitSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl ExitSignals {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => {}
            _ = self.terminate.recv() => {}
        }
    }
}

fn spawn_launch(
    kind: AuxKind,
    args: Vec<String>,
    docker: Arc<DockerRuntime<SystemRunner>>,
    registry: Arc<Registry>,
    fatal: UnboundedSender<ControlError>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = launch::launch(kind, &args, &docker, &registry).await {
            let _ = fatal.send(ControlError::new(format!("start {kind} container"), err));
        }
    })
}

async fn run(
    config: &Config,
    docker: &Arc<DockerRuntime<SystemRunner>>,
    registry: &Arc<Registry>,
) -> Result<Exit, LauncherError> {
    let signals = ExitSignals::install().map_err(LauncherError::Signals)?;

    if config.docker_browser && !launch::has_display(|var| std::env::var(var).ok()) {
        return Err(LauncherError::NoDisplay);
    }

    info!(path = %config.work_dir.display(), "Setting up working directory");
    let work_dir_error = |source: std::io::Error| LauncherError::WorkDir {
        path: config.work_dir.clone(),
        source,
    };
    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .map_err(work_dir_error)?;
    let fallback = config.compose_fallback_program().map_err(work_dir_error)?;

    let runner = SystemRunner::new()
        .current_dir(&config.work_dir)
        .envs(config.proxy_env());
    let program = resolve_compose_program(&runner, &fallback).await;
    let source = HttpSource::new(config.valid_http_proxy(), config.no_proxy())
        .map_err(|err| ControlError::new("create store client", err))?;
    let controller = Controller::new(
        ComposeBackend::new(runner, program, &config.project),
        AppStore::new(source, &config.store_url, &config.work_dir),
    );
    let browser_host = if config.docker_browser {
        let host = BrowserHost::current(&SystemRunner::new())
            .await
            .map_err(|err| ControlError::new("detect browser user", err))?;
        Some(host)
    } else {
        None
    };

    let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
    let mut launches = Vec::new();

    if config.no_gallery {
        info!("Design gallery disabled");
    } else {
        info!("Starting local design gallery service");
        launches.push(spawn_launch(
            AuxKind::Gallery,
            launch::gallery_args(config.gallery_port),
            Arc::clone(docker),
            Arc::clone(registry),
            fatal_tx.clone(),
        ));
    }
    if let Some(host) = browser_host {
        info!("Launching browser");
        launches.push(spawn_launch(
            AuxKind::Browser,
            launch::browser_args(&host, &config.ui_url()),
            Arc::clone(docker),
            Arc::clone(registry),
            fatal_tx.clone(),
        ));
    }

    let state = Arc::new(ChannelState {
        controller,
        fatal: fatal_tx,
    });
    let app = Route::new().at("/ws", get(api::ws)).data(state);

    let signals = pin!(stream::unfold(signals, |mut signals| async move {
        signals.recv().await;
        Some(((), signals))
    }));
    info!("Listening for websocket messages at {}/ws", config.addr);
    let server = Server::new(TcpListener::bind(config.addr)).run(app);
    Ok(supervise(
        server,
        signals,
        fatal_rx,
        registry,
        docker,
        launches,
        LAUNCH_GRACE,
    )
    .await)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    let docker = Arc::new(DockerRuntime::new(
        SystemRunner::new().envs(config.proxy_env()),
    ));
    let registry = Arc::new(Registry::new());

    match run(&config, &docker, &registry).await {
        Ok(exit) => exit.code(),
        Err(err) => {
            error!(error = %err, "Failed to start");
            registry::stop_all(&registry, &docker).await;
            ExitCode::FAILURE
        }
    }
}
