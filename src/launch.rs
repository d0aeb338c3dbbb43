use tracing::{info, warn};

use crate::backend::{BackendError, DockerRuntime, ProcessRunner};
use crate::registry::Registry;
use crate::types::AuxKind;

pub static GALLERY_IMAGE: &str = "ghcr.io/staticrocket/seva-design-gallery:latest";
pub static BROWSER_IMAGE: &str = "ghcr.io/staticrocket/seva-browser:latest";

/// Environment variables that tell the browser container where to draw.
const DISPLAY_VARS: [&str; 2] = ["DISPLAY", "WAYLAND_DISPLAY"];

/// `docker run` arguments for the design gallery, published on `port`.
pub fn gallery_args(port: u16) -> Vec<String> {
    vec![
        "--rm".to_string(),
        "-p".to_string(),
        format!("{port}:80"),
        GALLERY_IMAGE.to_string(),
    ]
}

/// Host details the browser container needs to reach the user's display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserHost {
    pub xdg_runtime_dir: String,
    pub uid: u32,
    pub gid: u32,
}

impl BrowserHost {
    /// Read display details for the current user. User and group IDs come
    /// from `id`.
    pub async fn current<R: ProcessRunner>(runner: &R) -> Result<Self, BackendError> {
        Ok(Self {
            xdg_runtime_dir: std::env::var("XDG_RUNTIME_DIR").unwrap_or_default(),
            uid: query_id(runner, "-u").await?,
            gid: query_id(runner, "-g").await?,
        })
    }
}

async fn query_id<R: ProcessRunner>(runner: &R, flag: &str) -> Result<u32, BackendError> {
    let output = runner.run("id", &[flag]).await?;
    match output.stdout.trim().parse() {
        Ok(id) if output.success => Ok(id),
        _ => Err(BackendError::Process {
            program: format!("id {flag}"),
            output: output.combined,
        }),
    }
}

/// `docker run` arguments for the browser, opened at `ui_url`. The browser
/// shares the host network and draws on the host's X11 or Wayland display.
pub fn browser_args(host: &BrowserHost, ui_url: &str) -> Vec<String> {
    let mut args: Vec<String> = [
        "--rm",
        "--privileged",
        "--network",
        "host",
        "-v",
        "/tmp/.X11-unix",
        "-e",
        "XAUTHORITY",
        "-e",
        "XDG_RUNTIME_DIR=/tmp",
        "-e",
        "DISPLAY",
        "-e",
        "WAYLAND_DISPLAY",
        "-e",
        "https_proxy",
        "-e",
        "http_proxy",
        "-e",
        "no_proxy",
    ]
    .into_iter()
    .map(str::to_string)
    .collect();
    args.push("-v".to_string());
    args.push(format!("{}:/tmp", host.xdg_runtime_dir));
    args.push(format!("--user={}:{}", host.uid, host.gid));
    args.push(BROWSER_IMAGE.to_string());
    args.push(ui_url.to_string());
    args
}

/// Whether a display is available, checking `DISPLAY` and then
/// `WAYLAND_DISPLAY` through `lookup`.
pub fn has_display(lookup: impl Fn(&str) -> Option<String>) -> bool {
    DISPLAY_VARS
        .into_iter()
        .any(|var| lookup(var).is_some_and(|value| !value.is_empty()))
}

/// Start an auxiliary container and record it in `registry`.
///
/// If the registry refuses the ID (shutdown already drained it, or the slot
/// is taken) the container is stopped straight away so it cannot outlive the
/// process.
pub async fn launch<R: ProcessRunner>(
    kind: AuxKind,
    args: &[String],
    runtime: &DockerRuntime<R>,
    registry: &Registry,
) -> Result<String, BackendError> {
    info!(%kind, "Starting auxiliary container");
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let id = runtime.run_detached(&args).await?;
    if let Err(err) = registry.record(kind, id.clone()) {
        warn!(error = %err, "Stopping unrecorded container");
        if let Err(stop_err) = runtime.stop(err.id()).await {
            warn!(%kind, error = %stop_err, "Failed to stop unrecorded container");
        }
    } else {
        info!(%kind, container = %id, "Auxiliary container started");
    }
    Ok(id)
}
