//! Blocking HTTP access to the source API.
//!
//! Uses async reqwest internally, driven by a shared tokio runtime, but
//! presents a sync interface to the per-credential worker threads. Every
//! request races the worker's [`CancelToken`]; media downloads stream to
//! disk through a read-timeout bridge instead of buffering the body.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::pin::Pin;
use std::sync::{LazyLock, OnceLock};
use std::task::Context;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::FetchError;
use crate::fsutil::PARTIAL_SUFFIX;
use crate::retry::{Backoff, RetryPolicy, retry_with_backoff};
use crate::shutdown::CancelToken;

/// Chunk size for streamed media downloads (1 MiB)
const DOWNLOAD_CHUNK: usize = 1024 * 1024;

/// Network timings shared by every worker
#[derive(Debug, Clone, Copy)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    /// Upper bound for a whole JSON request
    pub request_timeout: Duration,
    /// Stall detection for streamed downloads (no bytes for this long)
    pub read_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            read_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

static HTTP_CONFIG: OnceLock<HttpConfig> = OnceLock::new();

/// Install process-wide HTTP settings. Only the first call wins.
pub fn set_http_config(config: HttpConfig) {
    if HTTP_CONFIG.set(config).is_err() {
        log::debug!("HTTP config already set, keeping the existing one");
    }
}

pub fn http_config() -> &'static HttpConfig {
    HTTP_CONFIG.get_or_init(HttpConfig::default)
}

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(http_config().connect_timeout)
        .pool_max_idle_per_host(8)
        .user_agent(concat!("bbarchive/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("failed to build HTTP client")
});

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Credential attached to API requests
#[derive(Clone)]
pub enum Auth {
    Basic { username: String, password: String },
    Bearer(String),
    Anonymous,
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic { username, .. } => write!(f, "Basic({username}, ***)"),
            Self::Bearer(_) => f.write_str("Bearer(***)"),
            Self::Anonymous => f.write_str("Anonymous"),
        }
    }
}

impl Auth {
    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Basic { username, password } => request.basic_auth(username, Some(password)),
            Self::Bearer(token) => request.bearer_auth(token),
            Self::Anonymous => request,
        }
    }
}

/// Status and body of a completed request
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

type StatusHook = Box<dyn FnMut(&str) + Send>;

/// One credential's view of the API: auth, backoff state and cancellation.
///
/// Not shared between threads; each worker owns its client so the retry
/// counter and rate-limit budget stay per-credential.
pub struct ApiClient {
    auth: Auth,
    backoff: Backoff,
    cancel: CancelToken,
    status_hook: Option<StatusHook>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("auth", &self.auth)
            .field("failures", &self.backoff.failures())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(auth: Auth, cancel: CancelToken) -> Self {
        Self {
            auth,
            backoff: Backoff::new(http_config().retry),
            cancel,
            status_hook: None,
        }
    }

    /// Override the backoff timings (tests use millisecond delays).
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.backoff = Backoff::new(policy);
        self
    }

    /// Receive a status line for every retry.
    pub fn with_status_hook(mut self, hook: impl FnMut(&str) + Send + 'static) -> Self {
        self.status_hook = Some(Box::new(hook));
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// GET `url` and return status + body.
    ///
    /// 429 and transport errors are retried until success or cancellation;
    /// any other status is returned to the caller as-is.
    pub fn get(&mut self, url: &str) -> Result<ApiResponse, FetchError> {
        let Self {
            auth,
            backoff,
            cancel,
            status_hook,
        } = self;
        let auth: &Auth = auth;
        let cancel: &CancelToken = cancel;
        let mut notify = |line: &str| {
            if let Some(hook) = status_hook.as_mut() {
                hook(line);
            }
        };
        retry_with_backoff(url, backoff, cancel, &mut notify, || {
            get_once(auth, cancel, url)
        })
    }

    /// Stream `url` into `dest` (via [`part_path`]), returning the byte count.
    ///
    /// Non-200 responses are returned as `FetchError::Http` with the status.
    /// `authenticated` controls whether credentials are attached (foreign
    /// media hosts must not see them).
    pub fn download(
        &mut self,
        url: &str,
        dest: &Path,
        authenticated: bool,
    ) -> Result<u64, FetchError> {
        let Self {
            auth,
            backoff,
            cancel,
            status_hook,
        } = self;
        let cancel: &CancelToken = cancel;
        let auth = if authenticated {
            auth.clone()
        } else {
            Auth::Anonymous
        };
        let mut notify = |line: &str| {
            if let Some(hook) = status_hook.as_mut() {
                hook(line);
            }
        };
        retry_with_backoff(url, backoff, cancel, &mut notify, || {
            download_once(&auth, cancel, url, dest)
        })
    }
}

fn get_once(auth: &Auth, cancel: &CancelToken, url: &str) -> Result<ApiResponse, FetchError> {
    let timeout = http_config().request_timeout;
    SHARED_RUNTIME.handle().block_on(async {
        let request = async {
            let response = auth
                .apply(SHARED_CLIENT.get(url))
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(&e))?;
            let status = response.status().as_u16();
            if status == 429 {
                return Err(FetchError::Http {
                    status: Some(429),
                    message: "rate limited".to_string(),
                });
            }
            let body = response
                .text()
                .await
                .map_err(|e| FetchError::from_reqwest(&e))?;
            Ok(ApiResponse { status, body })
        };
        tokio::select! {
            result = request => result,
            () = cancel.cancelled() => Err(FetchError::Cancelled),
        }
    })
}

fn download_once(
    auth: &Auth,
    cancel: &CancelToken,
    url: &str,
    dest: &Path,
) -> Result<u64, FetchError> {
    let response = SHARED_RUNTIME.handle().block_on(async {
        let request = async {
            auth.apply(SHARED_CLIENT.get(url))
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(&e))
        };
        tokio::select! {
            result = request => result,
            () = cancel.cancelled() => Err(FetchError::Cancelled),
        }
    })?;

    let status = response.status().as_u16();
    if status != 200 {
        return Err(FetchError::Http {
            status: Some(status),
            message: format!("unexpected status downloading {url}"),
        });
    }

    let stream = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| io::Error::new(io::ErrorKind::ConnectionAborted, e)));
    let mut reader = TimeoutReader::new(
        Box::pin(tokio_util::io::StreamReader::new(stream)),
        http_config().read_timeout,
    );

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let part = part_path(dest);
    let mut writer = BufWriter::new(File::create(&part)?);
    let mut buf = vec![0u8; DOWNLOAD_CHUNK];
    let mut total = 0u64;
    loop {
        if cancel.is_cancelled() {
            drop(writer);
            let _ = std::fs::remove_file(&part);
            return Err(FetchError::Cancelled);
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                drop(writer);
                let _ = std::fs::remove_file(&part);
                return Err(e.into());
            }
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    writer.flush()?;
    drop(writer);
    std::fs::rename(&part, dest)?;
    Ok(total)
}

/// `dest` plus [`PARTIAL_SUFFIX`], where in-flight downloads live until complete
pub fn part_path(dest: &Path) -> std::path::PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    name.into()
}

/// Async-to-sync bridge with read timeout.
///
/// Each read blocks on the shared runtime; if no data arrives within
/// `timeout`, returns `TimedOut` (which triggers a retry).
pub struct TimeoutReader {
    inner: Pin<Box<dyn AsyncRead + Send>>,
    timeout: Duration,
}

impl TimeoutReader {
    fn new(inner: Pin<Box<dyn AsyncRead + Send>>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl Read for TimeoutReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = self.timeout;
        SHARED_RUNTIME.handle().block_on(async {
            let read_future = async {
                let mut read_buf = ReadBuf::new(buf);
                std::future::poll_fn(|cx: &mut Context<'_>| {
                    Pin::as_mut(&mut self.inner).poll_read(cx, &mut read_buf)
                })
                .await?;
                Ok::<_, io::Error>(read_buf.filled().len())
            };

            match tokio::time::timeout(timeout, read_future).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("read timeout ({}s with no data)", timeout.as_secs()),
                )),
            }
        })
    }
}
