use std::{
    collections::HashMap,
    io,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use super::{BackendError, Orchestrator, ProcessOutput, ProcessRunner};
use crate::store::ArtifactSource;
use crate::types::ContainerStatus;

/// In-memory [`Orchestrator`] for exercising callers without a compose tool.
pub struct MockBackend {
    start_output: RwLock<ProcessOutput>,
    stop_output: RwLock<ProcessOutput>,
    containers: RwLock<Vec<ContainerStatus>>,
    corrupt_status: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            start_output: RwLock::new(ProcessOutput::succeeded("")),
            stop_output: RwLock::new(ProcessOutput::succeeded("")),
            containers: RwLock::new(Vec::new()),
            corrupt_status: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output returned by the next bring-ups. An unsuccessful output makes
    /// `start_app` fail.
    pub fn set_start_output(&self, output: ProcessOutput) {
        *self.start_output.write().unwrap() = output;
    }

    pub fn set_stop_output(&self, output: ProcessOutput) {
        *self.stop_output.write().unwrap() = output;
    }

    /// Add a running container with the given display name.
    pub fn add_container(&self, name: &str) {
        let mut containers = self.containers.write().unwrap();
        let id = format!("{:012x}", containers.len() + 1);
        containers.push(ContainerStatus {
            id,
            name: name.to_string(),
            state: "running".to_string(),
            ..Default::default()
        });
    }

    /// Make status listing fail as if the tool printed something unparseable.
    pub fn corrupt_status(&self) {
        self.corrupt_status.store(true, Ordering::SeqCst);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Orchestrator for MockBackend {
    async fn start_app(&self) -> Result<ProcessOutput, BackendError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let output = self.start_output.read().unwrap().clone();
        if !output.success {
            return Err(BackendError::Process {
                program: "mock".to_string(),
                output: output.combined,
            });
        }
        Ok(output)
    }

    async fn stop_app(&self) -> Result<ProcessOutput, BackendError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.containers.write().unwrap().clear();
        Ok(self.stop_output.read().unwrap().clone())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerStatus>, BackendError> {
        if self.corrupt_status.load(Ordering::SeqCst) {
            return Ok(super::parse_status("not json")?);
        }
        Ok(self.containers.read().unwrap().clone())
    }
}

#[derive(Default)]
struct Script {
    responses: HashMap<String, ProcessOutput>,
    calls: Vec<String>,
}

/// [`ProcessRunner`] that answers from a table keyed by the full command
/// line (`program arg1 arg2 ...`) and records every call. Unscripted command
/// lines fail to spawn, as if the program were missing.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    script: Arc<RwLock<Script>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, command_line: impl Into<String>, output: ProcessOutput) {
        self.script
            .write()
            .unwrap()
            .responses
            .insert(command_line.into(), output);
    }

    /// Every command line run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.script.read().unwrap().calls.clone()
    }
}

impl ProcessRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<ProcessOutput, BackendError> {
        let line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        let response = {
            let mut script = self.script.write().unwrap();
            script.calls.push(line.clone());
            script.responses.get(&line).cloned()
        };
        response.ok_or_else(|| BackendError::Spawn {
            program: program.to_string(),
            source: io::Error::new(
                io::ErrorKind::NotFound,
                format!("no scripted response for `{line}`"),
            ),
        })
    }
}

#[derive(Default)]
struct Served {
    files: HashMap<String, Vec<u8>>,
    requests: Vec<String>,
}

/// [`ArtifactSource`] serving fixed bytes per URL. Unknown URLs fail the way
/// a 404 would.
#[derive(Clone, Default)]
pub struct MockSource {
    served: Arc<RwLock<Served>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.served
            .write()
            .unwrap()
            .files
            .insert(url.into(), body.into());
    }

    /// Every URL requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.served.read().unwrap().requests.clone()
    }
}

impl ArtifactSource for MockSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, BackendError> {
        let mut served = self.served.write().unwrap();
        served.requests.push(url.to_string());
        served
            .files
            .get(url)
            .cloned()
            .ok_or_else(|| BackendError::Fetch {
                url: url.to_string(),
                reason: "HTTP status client error (404 Not Found)".to_string(),
            })
    }
}
