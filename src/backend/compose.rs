use tracing::{debug, info, warn};

use super::{BackendError, Orchestrator, ProcessOutput, ProcessRunner};
use crate::types::ContainerStatus;

static COMPOSE_PROGRAM: &str = "docker-compose";

/// ComposeBackend implements [`Orchestrator`] by shelling out to a
/// docker-compose compatible CLI.
///
/// Every invocation is scoped to a fixed project name (`-p <project>`) so the
/// containers it manages are isolated from unrelated compose state on the same
/// host. The compose file itself is whatever `docker-compose.yml` sits in the
/// runner's working directory.
///
/// # Invocations
///
/// - start: `<tool> -p <project> up -d`
/// - stop: `<tool> -p <project> down --remove-orphans`
/// - list: `<tool> -p <project> ps --format json`
pub struct ComposeBackend<R> {
    runner: R,
    program: String,
    project: String,
}

impl<R: ProcessRunner> ComposeBackend<R> {
    pub fn new(runner: R, program: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
            project: project.into(),
        }
    }

    async fn compose(&self, args: &[&str]) -> Result<ProcessOutput, BackendError> {
        let mut full_args = vec!["-p", self.project.as_str()];
        full_args.extend_from_slice(args);
        self.runner.run(&self.program, &full_args).await
    }
}

impl<R: ProcessRunner> Orchestrator for ComposeBackend<R> {
    async fn start_app(&self) -> Result<ProcessOutput, BackendError> {
        info!(project = %self.project, "Starting selected app");
        let output = self.compose(&["up", "-d"]).await?;
        debug!("|\n{}", output.combined.trim_end());
        if !output.success {
            return Err(BackendError::Process {
                program: self.program.clone(),
                output: output.combined,
            });
        }
        Ok(output)
    }

    async fn stop_app(&self) -> Result<ProcessOutput, BackendError> {
        info!(project = %self.project, "Stopping selected app");
        let output = self.compose(&["down", "--remove-orphans"]).await?;
        debug!("|\n{}", output.combined.trim_end());
        if !output.success {
            warn!("Failed to stop selected app (it may not be running)");
        }
        Ok(output)
    }

    async fn list_containers(&self) -> Result<Vec<ContainerStatus>, BackendError> {
        let output = self.compose(&["ps", "--format", "json"]).await?;
        if !output.success {
            return Err(BackendError::Process {
                program: self.program.clone(),
                output: output.combined,
            });
        }
        Ok(parse_status(&output.stdout)?)
    }
}

/// Parse `ps --format json` output.
///
/// Older compose releases print a single JSON array; newer ones print one
/// object per line. Both are accepted, and blank output is an empty list.
pub fn parse_status(raw: &str) -> Result<Vec<ContainerStatus>, serde_json::Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed);
    }
    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(serde_json::from_str)
        .collect()
}

/// Pick the compose program: the one on `PATH` if it answers `-v`, otherwise
/// `fallback`.
pub async fn resolve_compose_program<R: ProcessRunner>(runner: &R, fallback: &str) -> String {
    match runner.run(COMPOSE_PROGRAM, &["-v"]).await {
        Ok(output) if output.success => {
            info!(version = %output.combined.trim(), "Using {COMPOSE_PROGRAM} from PATH");
            COMPOSE_PROGRAM.to_string()
        }
        Ok(output) => {
            warn!(
                output = %output.combined.trim(),
                "{COMPOSE_PROGRAM} cannot be executed, using {fallback}"
            );
            fallback.to_string()
        }
        Err(err) => {
            warn!(error = %err, "{COMPOSE_PROGRAM} is not installed, using {fallback}");
            fallback.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::ScriptedRunner;

    fn backend(runner: &ScriptedRunner) -> ComposeBackend<ScriptedRunner> {
        ComposeBackend::new(runner.clone(), "docker-compose", "seva-launcher")
    }

    #[tokio::test]
    async fn test_start_uses_project_and_detached_mode() {
        let runner = ScriptedRunner::new();
        runner.respond(
            "docker-compose -p seva-launcher up -d",
            ProcessOutput::succeeded("Container x Started\n"),
        );

        let output = backend(&runner).start_app().await.unwrap();
        assert_eq!(output.combined, "Container x Started\n");
        assert_eq!(runner.calls(), vec!["docker-compose -p seva-launcher up -d"]);
    }

    #[tokio::test]
    async fn test_failed_start_is_error() {
        let runner = ScriptedRunner::new();
        runner.respond(
            "docker-compose -p seva-launcher up -d",
            ProcessOutput::failed("no configuration file provided"),
        );

        let result = backend(&runner).start_app().await;
        match result {
            Err(BackendError::Process { output, .. }) => {
                assert_eq!(output, "no configuration file provided")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_stop_is_tolerated() {
        let runner = ScriptedRunner::new();
        runner.respond(
            "docker-compose -p seva-launcher down --remove-orphans",
            ProcessOutput::failed("no configuration file provided"),
        );

        let output = backend(&runner).stop_app().await.unwrap();
        assert!(!output.success);
    }

    #[tokio::test]
    async fn test_is_running_matches_exact_name() {
        let runner = ScriptedRunner::new();
        let ps = r#"[{"ID":"1","Name":"myapp","State":"running","ExitCode":0,"Publishers":null}]"#;
        runner.respond(
            "docker-compose -p seva-launcher ps --format json",
            ProcessOutput::succeeded(ps),
        );
        let backend = backend(&runner);

        assert!(backend.is_running("myapp").await.unwrap());
        assert!(!backend.is_running("MyApp").await.unwrap());
        assert!(!backend.is_running("myap").await.unwrap());
        assert!(!backend.is_running("myapp-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_is_running_false_on_empty_list() {
        let runner = ScriptedRunner::new();
        runner.respond(
            "docker-compose -p seva-launcher ps --format json",
            ProcessOutput::succeeded("[]"),
        );
        assert!(!backend(&runner).is_running("myapp").await.unwrap());
    }

    #[tokio::test]
    async fn test_unparseable_status_is_error() {
        let runner = ScriptedRunner::new();
        runner.respond(
            "docker-compose -p seva-launcher ps --format json",
            ProcessOutput::succeeded("NAME IMAGE STATUS"),
        );
        let result = backend(&runner).list_containers().await;
        assert!(matches!(result, Err(BackendError::Parse(_))));
    }

    #[test]
    fn test_parse_status_accepts_line_delimited_objects() {
        let raw = concat!(
            r#"{"ID":"1","Name":"web","Publishers":[]}"#,
            "\n",
            r#"{"ID":"2","Name":"db","Publishers":null}"#,
            "\n"
        );
        let names: Vec<_> = parse_status(raw)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["web", "db"]);
        assert!(parse_status("\n").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_prefers_installed_compose() {
        let runner = ScriptedRunner::new();
        runner.respond(
            "docker-compose -v",
            ProcessOutput::succeeded("docker-compose version 2.24.0"),
        );
        assert_eq!(
            resolve_compose_program(&runner, "./docker-compose").await,
            "docker-compose"
        );

        let missing = ScriptedRunner::new();
        assert_eq!(
            resolve_compose_program(&missing, "./docker-compose").await,
            "./docker-compose"
        );
    }
}
