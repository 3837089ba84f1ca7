//! HTTP client wrapper and the atomic file writer.
//!
//! [`HttpClient`] streams a GET response into a temporary sibling of the
//! target path and renames it into place only once the body has been fully
//! written and flushed. Any failure (status, network, disk, timeout) drops the
//! request, deletes the temporary file and leaves whatever was at the target
//! before untouched.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::FetchError;
use crate::fs::PartialFile;
use crate::user_agent;

/// Writes the body behind a URL to a local path.
///
/// This is the seam between the fetch pipeline and the network. The engine
/// holds an `Arc<dyn ResourceWriter>`, so tests can count or fail writes
/// without a server.
///
/// Implementations must guarantee that on `Err` no partial file is left at
/// `path`: it is either absent or still holds its previous content.
#[async_trait]
pub trait ResourceWriter: Send + Sync + fmt::Debug {
    /// Streams `url` to `path`, creating parent directories as needed.
    async fn write(&self, path: &Path, url: &str) -> Result<(), FetchError>;
}

/// Timeout settings for [`HttpClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimeouts {
    /// TCP/TLS connect timeout.
    pub connect: Duration,
    /// Whole-request timeout applied by reqwest.
    pub read: Duration,
    /// Optional cap on one complete attempt, including disk writes.
    pub attempt: Option<Duration>,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read: Duration::from_secs(READ_TIMEOUT_SECS),
            attempt: None,
        }
    }
}

/// HTTP client for streaming resources to disk.
///
/// Created once per run and cloned freely; clones share the connection pool.
///
/// # Example
///
/// ```no_run
/// use fetcher_core::download::HttpClient;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new();
/// let bytes = client
///     .download_to_path("https://example.com/logo.png", Path::new("./out/logo.png"))
///     .await?;
/// println!("wrote {bytes} bytes");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    attempt_timeout: Option<Duration>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static default
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_timeouts(ClientTimeouts::default())
            .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a new HTTP client with explicit timeouts.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend cannot be initialised.
    pub fn with_timeouts(timeouts: ClientTimeouts) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.read)
            .gzip(true)
            .user_agent(user_agent::default_fetch_user_agent())
            .build()?;
        Ok(Self {
            client,
            attempt_timeout: timeouts.attempt,
        })
    }

    /// Streams `url` to `path` and returns the number of bytes written.
    ///
    /// Intermediate directories of `path` are created first. The body goes to
    /// a temporary sibling which is renamed onto `path` after a clean flush;
    /// that rename is the only success signal.
    ///
    /// # Errors
    ///
    /// Returns `FetchError` if:
    /// - The URL is invalid
    /// - The request fails or times out (network error, attempt timeout)
    /// - The server returns a status outside `200..300`
    /// - Creating directories, writing or renaming fails
    #[must_use = "download result reports whether the file was written"]
    #[instrument(skip(self), fields(url = %url, path = %path.display()))]
    pub async fn download_to_path(&self, url: &str, path: &Path) -> Result<u64, FetchError> {
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, self.download_inner(url, path))
                .await
                .map_err(|_| {
                    debug!(timeout_ms = limit.as_millis(), "attempt timed out");
                    FetchError::timeout(url)
                })?,
            None => self.download_inner(url, path).await,
        }
    }

    async fn download_inner(&self, url: &str, path: &Path) -> Result<u64, FetchError> {
        debug!("starting download");

        Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::io(parent, e))?;
        }

        let response = self.send_request(url).await?;

        let partial = PartialFile::for_target(path);
        let file = match File::create(partial.temp_path()).await {
            Ok(file) => file,
            Err(e) => return Err(FetchError::io(partial.temp_path(), e)),
        };

        // The response is consumed here; on error it is dropped, which aborts the transfer.
        let bytes_written =
            persist_body(partial, file, response.bytes_stream(), url, path).await?;

        info!(bytes = bytes_written, "download complete");
        Ok(bytes_written)
    }

    async fn send_request(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "non-success status; dropping response");
            return Err(FetchError::http_status(url, status.as_u16()));
        }

        Ok(response)
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ResourceWriter for HttpClient {
    async fn write(&self, path: &Path, url: &str) -> Result<(), FetchError> {
        self.download_to_path(url, path).await.map(|_| ())
    }
}

/// Streams `body` into the temporary `file` of `partial`, then renames it onto
/// `target`. On any error the temporary file is deleted before returning.
async fn persist_body<S, B>(
    partial: PartialFile,
    file: File,
    body: S,
    url: &str,
    target: &Path,
) -> Result<u64, FetchError>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    let bytes_written = match stream_to_file(file, body, url, partial.temp_path()).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "cleaning up partial file after error");
            partial.discard().await;
            return Err(e);
        }
    };

    partial
        .commit()
        .await
        .map_err(|e| FetchError::io(target, e))?;
    Ok(bytes_written)
}

/// Streams the response body to `file`, returning bytes written.
///
/// The file handle is closed before returning, on success and on error.
async fn stream_to_file<S, B>(
    file: File,
    mut body: S,
    url: &str,
    file_path: &Path,
) -> Result<u64, FetchError>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    let mut writer = BufWriter::new(file);
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = body.next().await {
        let chunk = chunk_result.map_err(|e| FetchError::network(url, e))?;
        let chunk = chunk.as_ref();

        writer
            .write_all(chunk)
            .await
            .map_err(|e| FetchError::io(file_path, e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| FetchError::io(file_path, e))?;
    writer
        .into_inner()
        .sync_all()
        .await
        .map_err(|e| FetchError::io(file_path, e))?;

    Ok(bytes_written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn dir_entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    /// Serves one response that promises `declared` bytes but sends `body` and hangs up.
    async fn spawn_truncating_server(declared: usize, body: &'static [u8]) -> Option<String> {
        let listener = TcpListener::bind("127.0.0.1:0").await.ok()?;
        let addr = listener.local_addr().ok()?;
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {declared}\r\n\r\n");
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body).await;
                let _ = socket.flush().await;
            }
        });
        Some(format!("http://{addr}/truncated.bin"))
    }

    #[tokio::test]
    async fn test_download_to_path_success() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/a.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"alpha"))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new();
        let target = temp_dir.path().join("nested/dir/a.txt");
        let url = format!("{}/a.txt", mock_server.uri());

        let bytes = client.download_to_path(&url, &target).await.unwrap();

        assert_eq!(bytes, 5);
        assert_eq!(std::fs::read(&target).unwrap(), b"alpha");
        assert_eq!(dir_entries(target.parent().unwrap()), vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_download_to_path_500_leaves_no_file() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_bytes(b"oops"))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new();
        let url = format!("{}/broken", mock_server.uri());
        let result = client
            .download_to_path(&url, &temp_dir.path().join("broken"))
            .await;

        match result {
            Err(FetchError::HttpStatus { status, .. }) => assert_eq!(status, 500),
            other => panic!("Expected HttpStatus error, got: {other:?}"),
        }
        assert!(dir_entries(temp_dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_download_to_path_status_error_keeps_previous_file() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("kept.txt");
        std::fs::write(&target, b"previous").unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new();
        let url = format!("{}/kept.txt", mock_server.uri());
        assert!(client.download_to_path(&url, &target).await.is_err());

        assert_eq!(std::fs::read(&target).unwrap(), b"previous");
    }

    #[test]
    fn test_download_to_path_invalid_url() {
        let temp_dir = TempDir::new().unwrap();
        let client = HttpClient::new();

        let result = tokio_test::block_on(
            client.download_to_path("not-a-valid-url", &temp_dir.path().join("x")),
        );

        assert!(matches!(result, Err(FetchError::InvalidUrl { .. })));
        assert!(!temp_dir.path().join("x").exists());
    }

    #[tokio::test]
    async fn test_truncated_body_keeps_previous_file_and_removes_partial() {
        let Some(url) = spawn_truncating_server(1024, b"only a few bytes").await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("truncated.bin");
        std::fs::write(&target, b"complete previous version").unwrap();

        let client = HttpClient::new();
        let result = client.download_to_path(&url, &target).await;

        assert!(result.is_err(), "truncated body must fail");
        assert_eq!(
            std::fs::read(&target).unwrap(),
            b"complete previous version"
        );
        assert_eq!(dir_entries(temp_dir.path()), vec!["truncated.bin"]);
    }

    #[tokio::test]
    async fn test_attempt_timeout_cleans_up_partial_file() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"data")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let client = HttpClient::with_timeouts(ClientTimeouts {
            attempt: Some(Duration::from_millis(300)),
            ..ClientTimeouts::default()
        })
        .unwrap();
        let url = format!("{}/slow", mock_server.uri());

        let result = client
            .download_to_path(&url, &temp_dir.path().join("slow"))
            .await;

        assert!(matches!(result, Err(FetchError::Timeout { .. })), "got {result:?}");
        assert!(dir_entries(temp_dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_parent_reports_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a dir").unwrap();

        let client = HttpClient::new();
        let result = client
            .download_to_path("http://127.0.0.1:9/x", &blocker.join("x"))
            .await;

        assert!(matches!(result, Err(FetchError::Io { .. })), "got {result:?}");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_disk_write_failure_mid_stream_removes_partial_and_keeps_previous() {
        let Ok(full) = tokio::fs::OpenOptions::new()
            .write(true)
            .open("/dev/full")
            .await
        else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("disk.bin");
        std::fs::write(&target, b"previous").unwrap();

        let partial = PartialFile::for_target(&target);
        File::create(partial.temp_path()).await.unwrap();
        assert_eq!(dir_entries(temp_dir.path()).len(), 2);
        let body = futures_util::stream::iter(vec![
            Ok::<_, reqwest::Error>(vec![7u8; 64 * 1024]),
            Ok(vec![8u8; 16]),
        ]);

        let result = persist_body(partial, full, body, "http://h/disk.bin", &target).await;

        assert!(matches!(result, Err(FetchError::Io { .. })), "got {result:?}");
        assert_eq!(std::fs::read(&target).unwrap(), b"previous");
        assert_eq!(dir_entries(temp_dir.path()), vec!["disk.bin"]);
    }

    #[tokio::test]
    async fn test_resource_writer_impl_delegates() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"via trait"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let writer: &dyn ResourceWriter = &HttpClient::new();
        let target = temp_dir.path().join("t.txt");
        writer
            .write(&target, &format!("{}/t.txt", mock_server.uri()))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"via trait");
    }
}
