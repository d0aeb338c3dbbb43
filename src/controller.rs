use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::backend::{BackendError, Orchestrator};
use crate::store::{AppStore, ArtifactSource};
use crate::types::{Command, CommandResult};

/// A failure the process cannot recover from. Reaching the top-level
/// controller, it triggers cleanup and a non-zero exit.
#[derive(Debug, Error)]
#[error("{operation} failed: {source}")]
pub struct ControlError {
    pub operation: String,
    #[source]
    pub source: BackendError,
}

impl ControlError {
    pub fn new(operation: impl Into<String>, source: BackendError) -> Self {
        Self {
            operation: operation.into(),
            source,
        }
    }
}

/// Controller executes channel commands against the orchestrator and the app
/// store.
///
/// Commands are serialized: the working directory holding the loaded app's
/// manifest is shared by every connection, so only one command runs at a
/// time across the whole process.
pub struct Controller<O, S> {
    orchestrator: O,
    store: AppStore<S>,
    in_flight: Mutex<()>,
}

impl<O: Orchestrator, S: ArtifactSource> Controller<O, S> {
    pub fn new(orchestrator: O, store: AppStore<S>) -> Self {
        Self {
            orchestrator,
            store,
            in_flight: Mutex::new(()),
        }
    }

    pub fn orchestrator(&self) -> &O {
        &self.orchestrator
    }

    /// Run one command. Tolerated failures are logged and folded into the
    /// result; any error returned is fatal to the process.
    pub async fn dispatch(&self, command: Command) -> Result<CommandResult, ControlError> {
        let _guard = self.in_flight.lock().await;
        let name = command.name();
        info!(command = %name, "Dispatching command");
        let result = match command {
            Command::StartApp => self.start_app().await,
            Command::StopApp => Ok(self.stop_app().await),
            Command::GetApp => self.get_app().await,
            Command::LoadApp(app) => self.load_app(&app).await,
            Command::IsRunning(container) => self.is_running(&container).await,
        };
        result.map_err(|err| {
            error!(command = %name, error = %err, "Command failed");
            ControlError::new(name.to_string(), err)
        })
    }

    async fn start_app(&self) -> Result<CommandResult, BackendError> {
        let output = self.orchestrator.start_app().await?;
        Ok(CommandResult::from_output(&output.combined))
    }

    async fn stop_app(&self) -> CommandResult {
        match self.orchestrator.stop_app().await {
            Ok(output) => CommandResult::from_output(&output.combined),
            Err(err) => {
                warn!(error = %err, "Failed to stop selected app");
                CommandResult::empty()
            }
        }
    }

    async fn get_app(&self) -> Result<CommandResult, BackendError> {
        let Some(content) = self.store.metadata().await? else {
            return Ok(CommandResult::empty());
        };
        // The document is opaque: bytes that are not UTF-8 are replaced
        // rather than rejected.
        Ok(CommandResult::document(
            String::from_utf8_lossy(&content).into_owned(),
        ))
    }

    async fn load_app(&self, app: &str) -> Result<CommandResult, BackendError> {
        self.stop_app().await;
        self.store.replace(app).await?;
        Ok(CommandResult::status(true))
    }

    async fn is_running(&self, container: &str) -> Result<CommandResult, BackendError> {
        info!("Checking if {container} is running");
        let running = self.orchestrator.is_running(container).await?;
        Ok(CommandResult::flag(running))
    }
}
