use std::future::Future;
use std::io;
use std::process::ExitCode;
use std::time::Duration;

use futures_util::{Stream, StreamExt, future};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::backend::{DockerRuntime, ProcessRunner};
use crate::controller::ControlError;
use crate::registry::{self, Registry};

/// Why the process is shutting down.
#[derive(Debug)]
pub enum Exit {
    /// An interrupt or termination signal arrived.
    Signal,
    /// A component reported an unrecoverable error.
    Fatal(ControlError),
    /// The control channel server returned, with the error it failed with.
    Server(Option<io::Error>),
}

impl Exit {
    pub fn is_failure(&self) -> bool {
        matches!(self, Exit::Fatal(_) | Exit::Server(Some(_)))
    }

    pub fn code(&self) -> ExitCode {
        if self.is_failure() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }
    }
}

/// Wait for the first exit trigger, then run the exit routine.
///
/// The triggers are the control channel `server` returning, an item on
/// `signals`, and a fatal error on `fatal`. Whichever comes first, every
/// auxiliary container recorded in `registry` is stopped, then `launches`
/// still in progress get up to `grace` to finish so that one coming up late
/// stops its own container. Another signal during that wait cuts it short.
pub async fn supervise<Srv, Sig, R>(
    server: Srv,
    mut signals: Sig,
    mut fatal: UnboundedReceiver<ControlError>,
    registry: &Registry,
    runtime: &DockerRuntime<R>,
    launches: Vec<JoinHandle<()>>,
    grace: Duration,
) -> Exit
where
    Srv: Future<Output = io::Result<()>>,
    Sig: Stream<Item = ()> + Unpin,
    R: ProcessRunner,
{
    let exit = tokio::select! {
        result = server => Exit::Server(result.err()),
        Some(()) = signals.next() => Exit::Signal,
        Some(err) = fatal.recv() => Exit::Fatal(err),
    };
    match &exit {
        Exit::Signal => info!("Received termination signal"),
        Exit::Fatal(err) => error!(error = %err, "Shutting down after fatal error"),
        Exit::Server(Some(err)) => error!(error = %err, "Control channel server failed"),
        Exit::Server(None) => info!("Control channel server stopped"),
    }

    registry::stop_all(registry, runtime).await;

    if !launches.is_empty() {
        tokio::select! {
            result = tokio::time::timeout(grace, future::join_all(launches)) => {
                if result.is_err() {
                    warn!("Gave up waiting for auxiliary container launches");
                }
            }
            Some(()) = signals.next() => {
                warn!("Received another termination signal, not waiting for launches");
            }
        }
    }
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::ScriptedRunner;
    use crate::backend::{BackendError, ProcessOutput};
    use crate::launch::{self, gallery_args};
    use crate::types::AuxKind;
    use futures_util::stream;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    const GRACE: Duration = Duration::from_secs(5);

    fn recorded(runner: &ScriptedRunner) -> Registry {
        runner.respond("docker stop g1", ProcessOutput::succeeded("g1"));
        runner.respond("docker stop b1", ProcessOutput::succeeded("b1"));
        let registry = Registry::new();
        registry.record(AuxKind::Gallery, "g1").unwrap();
        registry.record(AuxKind::Browser, "b1").unwrap();
        registry
    }

    #[tokio::test]
    async fn test_signal_stops_recorded_containers() {
        let runner = ScriptedRunner::new();
        let registry = recorded(&runner);
        let runtime = DockerRuntime::new(runner.clone());
        let (_tx, rx) = mpsc::unbounded_channel();

        let exit = supervise(
            future::pending::<io::Result<()>>(),
            stream::iter([()]),
            rx,
            &registry,
            &runtime,
            Vec::new(),
            GRACE,
        )
        .await;

        assert!(matches!(exit, Exit::Signal));
        assert!(!exit.is_failure());
        assert_eq!(runner.calls(), vec!["docker stop g1", "docker stop b1"]);
    }

    #[tokio::test]
    async fn test_fatal_error_stops_recorded_containers() {
        let runner = ScriptedRunner::new();
        let registry = recorded(&runner);
        let runtime = DockerRuntime::new(runner.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ControlError::new("start_app", BackendError::MissingContainerId))
            .unwrap();

        let exit = supervise(
            future::pending::<io::Result<()>>(),
            stream::pending::<()>(),
            rx,
            &registry,
            &runtime,
            Vec::new(),
            GRACE,
        )
        .await;

        match &exit {
            Exit::Fatal(err) => assert_eq!(err.operation, "start_app"),
            other => panic!("unexpected exit: {other:?}"),
        }
        assert!(exit.is_failure());
        assert_eq!(runner.calls(), vec!["docker stop g1", "docker stop b1"]);
    }

    #[tokio::test]
    async fn test_server_failure_stops_recorded_containers() {
        let runner = ScriptedRunner::new();
        let registry = recorded(&runner);
        let runtime = DockerRuntime::new(runner.clone());
        let (_tx, rx) = mpsc::unbounded_channel();

        let exit = supervise(
            async { Err::<(), _>(io::Error::other("address in use")) },
            stream::pending::<()>(),
            rx,
            &registry,
            &runtime,
            Vec::new(),
            GRACE,
        )
        .await;

        assert!(matches!(exit, Exit::Server(Some(_))));
        assert!(exit.is_failure());
        assert_eq!(runner.calls(), vec!["docker stop g1", "docker stop b1"]);
    }

    #[tokio::test]
    async fn test_late_launch_stops_its_own_container() {
        let runner = ScriptedRunner::new();
        let args = gallery_args(8001);
        runner.respond(
            format!("docker run -d {}", args.join(" ")),
            ProcessOutput::succeeded("g1"),
        );
        runner.respond("docker stop g1", ProcessOutput::succeeded("g1"));
        let registry = Arc::new(Registry::new());
        let late = {
            let runtime = DockerRuntime::new(runner.clone());
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                launch::launch(AuxKind::Gallery, &args, &runtime, &registry)
                    .await
                    .unwrap();
            })
        };
        let runtime = DockerRuntime::new(runner.clone());
        let (_tx, rx) = mpsc::unbounded_channel();

        let exit = supervise(
            future::pending::<io::Result<()>>(),
            stream::iter([()]),
            rx,
            &registry,
            &runtime,
            vec![late],
            GRACE,
        )
        .await;

        assert!(matches!(exit, Exit::Signal));
        let stops: Vec<_> = runner
            .calls()
            .into_iter()
            .filter(|call| call.starts_with("docker stop"))
            .collect();
        assert_eq!(stops, vec!["docker stop g1"]);
    }

    #[tokio::test]
    async fn test_second_signal_cuts_launch_wait_short() {
        let runner = ScriptedRunner::new();
        let registry = Registry::new();
        let runtime = DockerRuntime::new(runner);
        let (_tx, rx) = mpsc::unbounded_channel();
        let stuck = tokio::spawn(future::pending::<()>());

        let exit = tokio::time::timeout(
            Duration::from_secs(5),
            supervise(
                future::pending::<io::Result<()>>(),
                stream::iter([(), ()]),
                rx,
                &registry,
                &runtime,
                vec![stuck],
                Duration::from_secs(3600),
            ),
        )
        .await
        .unwrap();

        assert!(matches!(exit, Exit::Signal));
    }

    #[tokio::test]
    async fn test_launch_wait_is_bounded() {
        let runner = ScriptedRunner::new();
        let registry = Registry::new();
        let runtime = DockerRuntime::new(runner);
        let (_tx, rx) = mpsc::unbounded_channel();
        let stuck = tokio::spawn(future::pending::<()>());

        let exit = tokio::time::timeout(
            Duration::from_secs(5),
            supervise(
                future::pending::<io::Result<()>>(),
                stream::iter([()]),
                rx,
                &registry,
                &runtime,
                vec![stuck],
                Duration::from_millis(20),
            ),
        )
        .await
        .unwrap();

        assert!(matches!(exit, Exit::Signal));
    }
}
