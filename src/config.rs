use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::warn;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "seva-launcher",
    version,
    about = "Launch, stop and monitor store apps for the local web UI"
)]
pub struct Config {
    /// Address the control channel listens on
    #[arg(long, env = "SEVA_ADDR", default_value = "0.0.0.0:8000")]
    pub addr: SocketAddr,

    /// Base URL of the app store
    #[arg(
        long,
        env = "SEVA_STORE_URL",
        default_value = "https://raw.githubusercontent.com/StaticRocket/seva-apps/main"
    )]
    pub store_url: String,

    /// Directory holding the loaded app's manifest
    #[arg(long, env = "SEVA_WORK_DIR", default_value = "/tmp/seva-launcher")]
    pub work_dir: PathBuf,

    /// Compose project name that scopes every app container
    #[arg(long, default_value = "seva-launcher")]
    pub project: String,

    /// Compose binary used when docker-compose is not installed
    #[arg(long, default_value = "./docker-compose")]
    pub compose_fallback: String,

    /// Do not start the design gallery container
    #[arg(long)]
    pub no_gallery: bool,

    /// Host port the design gallery is published on
    #[arg(long, default_value_t = 8001)]
    pub gallery_port: u16,

    /// Start a containerized browser pointed at the UI
    #[arg(long)]
    pub docker_browser: bool,

    /// HTTP proxy handed to the store client and launched containers
    #[arg(long, env = "http_proxy")]
    pub http_proxy: Option<String>,

    /// Hosts that bypass the proxy
    #[arg(long, env = "no_proxy")]
    pub no_proxy: Option<String>,
}

impl Config {
    /// The configured proxy, if it is an absolute URL. An invalid proxy is
    /// logged and ignored.
    pub fn valid_http_proxy(&self) -> Option<&str> {
        let proxy = self.http_proxy.as_deref().filter(|p| !p.is_empty())?;
        match reqwest::Url::parse(proxy) {
            Ok(url) if url.has_host() => Some(proxy),
            Ok(_) => {
                warn!(%proxy, "Invalid http proxy, not applying it");
                None
            }
            Err(err) => {
                warn!(%proxy, error = %err, "Invalid http proxy, not applying it");
                None
            }
        }
    }

    pub fn no_proxy(&self) -> Option<&str> {
        self.no_proxy.as_deref().filter(|p| !p.is_empty())
    }

    /// Proxy variables for spawned processes, in both the lower and upper
    /// case spellings tools look for.
    pub fn proxy_env(&self) -> Vec<(String, String)> {
        let mut envs = Vec::new();
        if let Some(proxy) = self.valid_http_proxy() {
            for key in ["http_proxy", "HTTP_PROXY", "https_proxy", "HTTPS_PROXY"] {
                envs.push((key.to_string(), proxy.to_string()));
            }
        }
        if let Some(no_proxy) = self.no_proxy() {
            for key in ["no_proxy", "NO_PROXY"] {
                envs.push((key.to_string(), no_proxy.to_string()));
            }
        }
        envs
    }

    /// Compose program to fall back to. A path with a directory part is
    /// taken relative to the working directory and made absolute; a bare
    /// name is left for `PATH` lookup.
    pub fn compose_fallback_program(&self) -> std::io::Result<String> {
        let fallback = Path::new(&self.compose_fallback);
        if fallback.is_absolute() || fallback.components().count() < 2 {
            return Ok(self.compose_fallback.clone());
        }
        let resolved = std::path::absolute(self.work_dir.join(fallback))?;
        Ok(resolved.to_string_lossy().into_owned())
    }

    /// URL the browser container opens.
    pub fn ui_url(&self) -> String {
        format!("http://localhost:{}/#/", self.addr.port())
    }
}
