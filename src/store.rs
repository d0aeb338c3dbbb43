use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::info;

use crate::backend::BackendError;

/// App metadata document, passed to the UI verbatim.
pub const METADATA_FILE: &str = "metadata.json";
/// Compose file describing the app's containers.
pub const COMPOSE_FILE: &str = "docker-compose.yml";
/// The pair of files that together define the loaded app.
pub const MANIFEST_FILES: [&str; 2] = [METADATA_FILE, COMPOSE_FILE];

/// Somewhere app manifests can be downloaded from.
pub trait ArtifactSource: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, BackendError>> + Send;
}

/// [`ArtifactSource`] over plain HTTP GET.
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    /// Build a client, optionally routing through `proxy` and bypassing it
    /// for hosts in the comma-separated `no_proxy` list.
    pub fn new(proxy: Option<&str>, no_proxy: Option<&str>) -> Result<Self, BackendError> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|err| BackendError::Fetch {
                    url: proxy.to_string(),
                    reason: err.to_string(),
                })?
                .no_proxy(no_proxy.and_then(reqwest::NoProxy::from_string));
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|err| BackendError::Fetch {
            url: String::new(),
            reason: err.to_string(),
        })?;
        Ok(Self { client })
    }
}

impl ArtifactSource for HttpSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, BackendError> {
        let fetch_error = |err: reqwest::Error| BackendError::Fetch {
            url: url.to_string(),
            reason: err.to_string(),
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fetch_error)?;
        let body = response.bytes().await.map_err(fetch_error)?;
        Ok(body.to_vec())
    }
}

/// AppStore manages the manifest of the currently loaded app in a working
/// directory and replaces it with manifests from a remote store.
///
/// # Layout
///
/// The store is laid out as `{base_url}/{app_name}/{file}` for each file in
/// [`MANIFEST_FILES`]. Locally the files sit directly in the working
/// directory, which is also where the compose tool runs.
///
/// # Replacement
///
/// Replacing the manifest removes both old files before fetching either new
/// one, so a failed fetch leaves zero or one file behind, never an old file
/// next to a new one. Fetching is not transactional across the two files: if
/// the second fetch fails, the first new file stays on disk.
pub struct AppStore<S> {
    source: S,
    base_url: String,
    work_dir: PathBuf,
}

impl<S: ArtifactSource> AppStore<S> {
    pub fn new(source: S, base_url: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            work_dir: work_dir.into(),
        }
    }

    pub fn url_for(&self, app_name: &str, file: &str) -> String {
        format!("{}/{}/{}", self.base_url, app_name, file)
    }

    /// Raw bytes of the loaded app's metadata, or `None` if no app is loaded.
    /// The content is not validated in any way.
    pub async fn metadata(&self) -> Result<Option<Vec<u8>>, BackendError> {
        let path = self.work_dir.join(METADATA_FILE);
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(BackendError::io(path, err)),
        }
    }

    /// Delete both manifest files. Missing files are skipped.
    pub async fn remove_manifest(&self) -> Result<(), BackendError> {
        for file in MANIFEST_FILES {
            let path = self.work_dir.join(file);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(BackendError::io(path, err)),
            }
        }
        Ok(())
    }

    /// Download both manifest files for `app_name` into the working
    /// directory, stopping at the first failure.
    pub async fn fetch_manifest(&self, app_name: &str) -> Result<(), BackendError> {
        for file in MANIFEST_FILES {
            let url = self.url_for(app_name, file);
            info!("Fetching {file} from: {url}");
            let body = self.source.fetch(&url).await?;
            let path = self.work_dir.join(file);
            tokio::fs::write(&path, body)
                .await
                .map_err(|err| BackendError::io(path, err))?;
        }
        Ok(())
    }

    /// Replace the loaded manifest with the one for `app_name`.
    pub async fn replace(&self, app_name: &str) -> Result<(), BackendError> {
        info!("Loading {app_name} from store");
        self.remove_manifest().await?;
        self.fetch_manifest(app_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockSource;
    use std::path::Path;

    static BASE: &str = "https://store.example/apps";

    fn store(dir: &Path, source: &MockSource) -> AppStore<MockSource> {
        AppStore::new(source.clone(), format!("{BASE}/"), dir)
    }

    #[test]
    fn test_url_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), &MockSource::new());
        assert_eq!(
            store.url_for("myapp", COMPOSE_FILE),
            "https://store.example/apps/myapp/docker-compose.yml"
        );
    }

    #[tokio::test]
    async fn test_replace_writes_served_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::new();
        source.serve(format!("{BASE}/myapp/{METADATA_FILE}"), b"{\"name\":\"myapp\"}".to_vec());
        source.serve(format!("{BASE}/myapp/{COMPOSE_FILE}"), b"services: {}\n".to_vec());
        std::fs::write(dir.path().join(METADATA_FILE), "{\"name\":\"old\"}").unwrap();

        store(dir.path(), &source).replace("myapp").await.unwrap();

        assert_eq!(
            std::fs::read(dir.path().join(METADATA_FILE)).unwrap(),
            b"{\"name\":\"myapp\"}"
        );
        assert_eq!(
            std::fs::read(dir.path().join(COMPOSE_FILE)).unwrap(),
            b"services: {}\n"
        );
        assert_eq!(
            source.requests(),
            vec![
                format!("{BASE}/myapp/{METADATA_FILE}"),
                format!("{BASE}/myapp/{COMPOSE_FILE}")
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_fetch_never_leaves_stale_pair() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), "old").unwrap();
        std::fs::write(dir.path().join(COMPOSE_FILE), "old").unwrap();
        let source = MockSource::new();

        let result = store(dir.path(), &source).replace("missing").await;

        assert!(matches!(result, Err(BackendError::Fetch { .. })));
        assert!(!dir.path().join(METADATA_FILE).exists());
        assert!(!dir.path().join(COMPOSE_FILE).exists());
    }

    #[tokio::test]
    async fn test_second_fetch_failure_leaves_single_new_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(COMPOSE_FILE), "old").unwrap();
        let source = MockSource::new();
        source.serve(format!("{BASE}/half/{METADATA_FILE}"), "{}");

        let result = store(dir.path(), &source).replace("half").await;

        assert!(result.is_err());
        assert_eq!(
            std::fs::read_to_string(dir.path().join(METADATA_FILE)).unwrap(),
            "{}"
        );
        assert!(!dir.path().join(COMPOSE_FILE).exists());
    }

    #[tokio::test]
    async fn test_remove_manifest_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), &MockSource::new());
        store.remove_manifest().await.unwrap();
        store.remove_manifest().await.unwrap();
    }

    #[tokio::test]
    async fn test_metadata_absent_and_present() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), &MockSource::new());
        assert_eq!(store.metadata().await.unwrap(), None);

        std::fs::write(dir.path().join(METADATA_FILE), "{\n  \"a\": 1\n}\n").unwrap();
        assert_eq!(
            store.metadata().await.unwrap().as_deref(),
            Some(&b"{\n  \"a\": 1\n}\n"[..])
        );
    }

    #[tokio::test]
    async fn test_metadata_is_returned_unvalidated() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), &MockSource::new());
        std::fs::write(dir.path().join(METADATA_FILE), b"{\"name\":\"caf\xe9\"}").unwrap();
        assert_eq!(
            store.metadata().await.unwrap().as_deref(),
            Some(&b"{\"name\":\"caf\xe9\"}"[..])
        );
    }

    #[tokio::test]
    async fn test_removal_failure_is_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where a file is expected cannot be removed with remove_file.
        std::fs::create_dir(dir.path().join(METADATA_FILE)).unwrap();
        let result = store(dir.path(), &MockSource::new()).remove_manifest().await;
        assert!(matches!(result, Err(BackendError::Io { .. })));
    }
}
