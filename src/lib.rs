//! Message queueing with dead-letter handling on top of Amazon DynamoDB.
//!
//! One table row per message, a global secondary index on
//! `(queue_type, last_updated_timestamp)` for ordering, and a version
//! attribute for optimistic concurrency. Every lifecycle transition —
//! claim, ACK, NACK, DLQ move, redrive — is a single conditional write, so
//! concurrent producers and consumers need no coordination beyond the table
//! itself. Delivery is at-least-once and approximately FIFO; a received
//! message stays invisible until its visibility timeout elapses.
//!
//! # Example
//!
//! ```no_run
//! use dynamomq::Client;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Order {
//!     sku: String,
//! }
//!
//! # async fn example() -> Result<(), dynamomq::Error> {
//! let client = Client::<Order>::builder()
//!     .table_name("orders".to_owned())
//!     .connect()
//!     .await?;
//!
//! client.send_message("A-101", Order { sku: "SKU-1".into() }).await?;
//!
//! let message = client.receive_message().await?;
//! // ... process message.data ...
//! client.delete_message(&message.id).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod message;
pub mod stats;

pub use client::Client;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::Error;
pub use message::{Message, QueueType, Status, SystemInfo};
pub use stats::{DlqStats, QueueStats};
