use std::future::Future;

use crate::types::ContainerStatus;

mod compose;
mod docker;
mod error;
pub mod mock;
mod process;

pub use compose::{ComposeBackend, parse_status, resolve_compose_program};
pub use docker::DockerRuntime;
pub use error::BackendError;
pub use process::{ProcessOutput, ProcessRunner, SystemRunner};

/// Capability to bring up, tear down and inspect the loaded app.
pub trait Orchestrator: Send + Sync {
    /// Bring the app up in detached mode. A failed bring-up is an error
    /// carrying the tool's output.
    fn start_app(&self) -> impl Future<Output = Result<ProcessOutput, BackendError>> + Send;

    /// Tear the app down, removing orphaned containers. A non-zero exit is
    /// reported through the returned output rather than as an error, since
    /// the app may simply not be running.
    fn stop_app(&self) -> impl Future<Output = Result<ProcessOutput, BackendError>> + Send;

    /// List the app's live containers.
    fn list_containers(
        &self,
    ) -> impl Future<Output = Result<Vec<ContainerStatus>, BackendError>> + Send;

    /// Whether a container whose display name is exactly `name` is listed.
    fn is_running(&self, name: &str) -> impl Future<Output = Result<bool, BackendError>> + Send {
        async move {
            let containers = self.list_containers().await?;
            Ok(containers.iter().any(|c| c.name == name))
        }
    }
}
