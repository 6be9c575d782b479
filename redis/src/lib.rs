//! Redis-backed implementations of the Seatkeeper coordination seams.
//!
//! - [`RedisLockCoordinator`]: `SET NX PX` locks with compare-and-delete release
//! - [`RedisPromotionQueue`]: reliable list queue (pending → processing → ack)
//! - [`RedisNotifier`]: JSON notifications over pub/sub
//!
//! All three share one multiplexed [`ConnectionManager`], which reconnects on
//! its own after a dropped connection.
//!
//! # Example
//!
//! ```no_run
//! use seatkeeper_redis::{connect, RedisLockCoordinator, RedisPromotionQueue};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = connect("redis://127.0.0.1:6379").await?;
//! let locks = RedisLockCoordinator::new(conn.clone());
//! let queue = RedisPromotionQueue::new(conn, "seatkeeper:promotions");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod lock;
mod notify;
mod queue;

pub use lock::RedisLockCoordinator;
pub use notify::RedisNotifier;
pub use queue::RedisPromotionQueue;
pub use redis::aio::ConnectionManager;

use redis::Client;
use thiserror::Error;

/// Failure to establish a Redis connection.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The URL could not be parsed into a client.
    #[error("Failed to create Redis client: {0}")]
    Client(String),
    /// The server could not be reached.
    #[error("Failed to create Redis connection manager: {0}")]
    Connect(String),
}

/// Open a connection manager for `redis_url`.
///
/// # Errors
///
/// Returns [`ConnectError`] if the URL is invalid or the server unreachable.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager, ConnectError> {
    let client = Client::open(redis_url).map_err(|e| ConnectError::Client(e.to_string()))?;
    let conn = ConnectionManager::new(client)
        .await
        .map_err(|e| ConnectError::Connect(e.to_string()))?;
    tracing::info!("Connected to Redis");
    Ok(conn)
}
