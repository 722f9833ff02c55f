//! Typed wrapper over the store primitives the queue is built on.
//!
//! The whole state machine reduces to six operations against single rows:
//! point reads, unconditional and create-only puts, version-conditioned
//! updates, idempotent deletes, and ordered pages from the
//! `(queue_type, last_updated_timestamp)` secondary index. Everything above
//! this trait is backend-agnostic; everything below it is a thin adapter.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;

use crate::error::Error;
use crate::message::QueueType;

pub mod dynamodb;
pub mod memory;

pub use dynamodb::DynamoBackend;
pub use memory::MemoryBackend;

/// The stored item shape, shared by every backend so the marshal code in
/// [`crate::message`] is written once.
pub type Item = HashMap<String, AttributeValue>;

/// A version-conditioned write: apply `set` to the row if and only if its
/// current `version` attribute equals `expect_version`.
///
/// Every lifecycle transition is expressed this way; the condition is what
/// makes concurrent consumers safe without any coordination.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub expect_version: u64,
    pub set: Vec<(&'static str, AttributeValue)>,
}

/// One ordered page from the secondary index, ascending by
/// `last_updated_timestamp`. `cursor` is the store's continuation token
/// (`None` when the partition is exhausted) and is passed back verbatim.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub items: Vec<Item>,
    pub cursor: Option<Item>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Point read of a full row. `None` when the id is absent.
    async fn get_item(&self, id: &str) -> Result<Option<Item>, Error>;

    /// Unconditional write of a complete row, replacing any existing one.
    async fn put_item(&self, item: Item) -> Result<(), Error>;

    /// Write a complete row only if the id does not exist yet. Fails with
    /// [`Error::ConditionFailed`] otherwise.
    async fn put_item_if_absent(&self, item: Item) -> Result<(), Error>;

    /// Apply a [`StateUpdate`] and return the new row. Fails with
    /// [`Error::ConditionFailed`] when the version precondition does not
    /// hold (including when the row is absent).
    async fn update_item(&self, id: &str, update: StateUpdate) -> Result<Item, Error>;

    /// Delete a row. Absent ids are not an error.
    async fn delete_item(&self, id: &str) -> Result<(), Error>;

    /// One page of the secondary index for the given partition, oldest
    /// first.
    async fn query_index(
        &self,
        queue: QueueType,
        limit: u32,
        cursor: Option<Item>,
    ) -> Result<QueryPage, Error>;

    /// Unordered listing of up to `limit` rows across both partitions.
    async fn scan(&self, limit: u32) -> Result<Vec<Item>, Error>;
}
