//! bbarchive core - shared infrastructure for the archive crawler
//!
//! Cancellation, retry/backoff, the blocking HTTP layer, logging and
//! terminal progress plumbing used by the crawler and the CLI.

pub mod error;
pub mod fsutil;
pub mod logging;
pub mod progress;
pub mod retry;
pub mod shutdown;
pub mod stream;

// Re-exports for convenience
pub use error::FetchError;
pub use fsutil::{cleanup_partial_downloads, write_atomic};
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use retry::{Backoff, RetryPolicy, retry_with_backoff};
pub use shutdown::{CancelToken, Cancelled, install_signal_handlers};
pub use stream::{ApiClient, ApiResponse, Auth, HttpConfig, SHARED_RUNTIME, http_config, set_http_config};
