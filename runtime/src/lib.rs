//! # Seatkeeper Runtime
//!
//! Plumbing shared by the booking services.
//!
//! ## Components
//!
//! - **Retry**: [`retry::retry_with_backoff`] and [`retry::retry_transient`] for
//!   callers that want to retry retryable booking failures
//! - **Channel**: [`channel::ChannelPromotionQueue`], the in-process promotion queue
//! - **Metrics**: [`metrics::MetricsServer`], the Prometheus exporter
//! - **Shutdown**: [`shutdown::ShutdownCoordinator`], broadcast shutdown for
//!   background loops

/// Retry logic with exponential backoff
pub mod retry;

/// In-process promotion queue
pub mod channel;

/// Prometheus metrics for observability
pub mod metrics;

/// Graceful shutdown of background tasks
pub mod shutdown;

pub use channel::ChannelPromotionQueue;
pub use retry::{RetryPolicy, retry_transient, retry_with_backoff};
pub use shutdown::ShutdownCoordinator;
