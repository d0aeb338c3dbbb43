use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{info, warn};

use crate::backend::{DockerRuntime, ProcessRunner};
use crate::types::AuxKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("Shutdown already started, {kind} container {id} was not recorded.")]
    Closed { kind: AuxKind, id: String },
    #[error("A {kind} container is already recorded, {id} was not recorded.")]
    Occupied { kind: AuxKind, id: String },
}

impl RecordError {
    /// ID of the container that was refused.
    pub fn id(&self) -> &str {
        match self {
            RecordError::Closed { id, .. } | RecordError::Occupied { id, .. } => id,
        }
    }
}

#[derive(Debug, Default)]
struct Slots {
    gallery: Option<String>,
    browser: Option<String>,
    drained: bool,
}

impl Slots {
    fn slot(&mut self, kind: AuxKind) -> &mut Option<String> {
        match kind {
            AuxKind::Gallery => &mut self.gallery,
            AuxKind::Browser => &mut self.browser,
        }
    }
}

/// Registry of auxiliary containers started by this process, one slot per
/// [`AuxKind`].
///
/// Launch routines are the only writers and record each slot at most once.
/// The exit routine is the only drainer: [`Registry::drain`] hands every
/// recorded ID out exactly once and closes the registry, after which late
/// launches are refused so they can stop their own container.
#[derive(Debug, Default)]
pub struct Registry {
    slots: Mutex<Slots>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the container started for `kind`. Blank IDs are ignored.
    pub fn record(&self, kind: AuxKind, id: impl Into<String>) -> Result<(), RecordError> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Ok(());
        }
        let mut slots = self.lock();
        if slots.drained {
            return Err(RecordError::Closed { kind, id });
        }
        let slot = slots.slot(kind);
        if slot.is_some() {
            return Err(RecordError::Occupied { kind, id });
        }
        *slot = Some(id);
        Ok(())
    }

    #[cfg(test)]
    pub fn get(&self, kind: AuxKind) -> Option<String> {
        self.lock().slot(kind).clone()
    }

    /// Take every recorded ID and close the registry. Later calls return
    /// nothing.
    pub fn drain(&self) -> Vec<(AuxKind, String)> {
        let mut slots = self.lock();
        slots.drained = true;
        AuxKind::ALL
            .into_iter()
            .filter_map(|kind| slots.slot(kind).take().map(|id| (kind, id)))
            .collect()
    }
}

/// Stop every auxiliary container still recorded in `registry`. A failure to
/// stop one container is logged and does not prevent stopping the others.
/// Returns the number of containers stopped successfully.
pub async fn stop_all<R: ProcessRunner>(registry: &Registry, runtime: &DockerRuntime<R>) -> usize {
    let containers = registry.drain();
    if containers.is_empty() {
        return 0;
    }
    info!("Stopping non-app containers");
    let mut stopped = 0;
    for (kind, id) in containers {
        match runtime.stop(&id).await {
            Ok(()) => stopped += 1,
            Err(err) => warn!(%kind, container = %id, error = %err, "Failed to stop container"),
        }
    }
    stopped
}
