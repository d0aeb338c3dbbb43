use tracing::{debug, info};

use super::{BackendError, ProcessRunner};

static DOCKER_PROGRAM: &str = "docker";

/// DockerRuntime starts and stops standalone containers through the docker
/// CLI.
///
/// It is used for the auxiliary containers that live next to the app (design
/// gallery, containerized browser), which are not part of the compose project.
pub struct DockerRuntime<R> {
    runner: R,
    program: String,
}

impl<R: ProcessRunner> DockerRuntime<R> {
    pub fn new(runner: R) -> Self {
        Self::with_program(runner, DOCKER_PROGRAM)
    }

    pub fn with_program(runner: R, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    /// Run `docker run -d <args>` and return the new container's ID, taken
    /// from the last non-empty line of output (earlier lines may be image
    /// pull progress).
    pub async fn run_detached(&self, args: &[&str]) -> Result<String, BackendError> {
        let mut full_args = vec!["run", "-d"];
        full_args.extend_from_slice(args);
        let output = self.runner.run(&self.program, &full_args).await?;
        debug!("|\n{}", output.combined.trim_end());
        if !output.success {
            return Err(BackendError::Process {
                program: self.program.clone(),
                output: output.combined,
            });
        }
        output
            .last_line()
            .map(str::to_string)
            .ok_or(BackendError::MissingContainerId)
    }

    /// Run `docker stop <id>`. Stopping a container that is already gone
    /// fails here; callers doing cleanup log it and move on.
    pub async fn stop(&self, id: &str) -> Result<(), BackendError> {
        info!(container = %id, "Stopping container");
        let output = self.runner.run(&self.program, &["stop", id]).await?;
        if !output.success {
            return Err(BackendError::Process {
                program: self.program.clone(),
                output: output.combined,
            });
        }
        Ok(())
    }
}
