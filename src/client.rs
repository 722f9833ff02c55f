//! The queue client: lifecycle transitions as conditional writes.
//!
//! There is no coordination state anywhere — every transition is a single
//! version-conditioned write against one row, so any number of producers
//! and consumers can share a table. Two consumers may pick the same
//! candidate out of the index; the version condition lets exactly one of
//! them win, and the loser moves on to the next candidate.
//!
//! All methods are cancel-safe: dropping a call between the index query and
//! the claim has written nothing, and a call cancelled after its conditional
//! write has already persisted the transition (at-least-once delivery).

use std::marker::PhantomData;
use std::sync::Arc;

use bon::bon;
use chrono::Duration;
use serde::{de::DeserializeOwned, Serialize};

use crate::backend::{Backend, DynamoBackend};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Error;
use crate::message::{attr, parse_timestamp, string_attr, Message, QueueType, Status};
use crate::stats::{DlqStats, QueueStats};

/// Page size for receive-candidate queries against the secondary index.
const RECEIVE_PAGE_SIZE: u32 = 10;
/// Claim losses tolerated within a single `receive_message` call before it
/// gives up and reports an empty queue, letting the caller back off.
const RECEIVE_MAX_CLAIM_LOSSES: u32 = 10;
/// Page size for stats queries.
const STATS_PAGE_SIZE: u32 = 250;

const FIRST_IDS_CAP: usize = 10;

/// Queue client, parameterized by the payload type stored in `data`.
///
/// Cheap to clone; clones share the backend session and clock.
pub struct Client<T> {
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
    visibility_timeout: Duration,
    _data: PhantomData<fn() -> T>,
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            clock: Arc::clone(&self.clock),
            visibility_timeout: self.visibility_timeout,
            _data: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("visibility_timeout", &self.visibility_timeout)
            .finish()
    }
}

#[bon]
impl<T> Client<T> {
    /// Configure and connect a client.
    ///
    /// Settings resolve in order: explicit setter, then the supplied
    /// [`Config`], then the documented defaults. Without an injected
    /// `backend` or `dynamodb` client, the DynamoDB session is established
    /// from the ambient AWS environment.
    #[builder(finish_fn = connect)]
    pub async fn builder(
        config: Option<Config>,
        table_name: Option<String>,
        queueing_index_name: Option<String>,
        dlq_index_name: Option<String>,
        visibility_timeout: Option<std::time::Duration>,
        endpoint_url: Option<String>,
        region: Option<String>,
        dynamodb: Option<aws_sdk_dynamodb::Client>,
        backend: Option<Arc<dyn Backend>>,
        clock: Option<Arc<dyn Clock>>,
    ) -> Result<Self, Error> {
        let mut config = config.unwrap_or_default();
        if table_name.is_some() {
            config.table_name = table_name;
        }
        if queueing_index_name.is_some() {
            config.queueing_index_name = queueing_index_name;
        }
        if dlq_index_name.is_some() {
            config.dlq_index_name = dlq_index_name;
        }
        if endpoint_url.is_some() {
            config.endpoint_url = endpoint_url;
        }
        if region.is_some() {
            config.region = region;
        }

        if config.table_name().is_empty() {
            return Err(Error::mis_configured("table name must not be empty"));
        }
        if config.queueing_index_name().is_empty() {
            return Err(Error::mis_configured("queueing index name must not be empty"));
        }

        let visibility_timeout = match visibility_timeout {
            Some(timeout) => Duration::from_std(timeout)
                .map_err(|e| Error::mis_configured(format!("visibility timeout: {e}")))?,
            None => Duration::seconds(config.visibility_timeout_secs() as i64),
        };

        let backend: Arc<dyn Backend> = match backend {
            Some(backend) => backend,
            None => match dynamodb {
                Some(client) => Arc::new(DynamoBackend::new(client, &config)),
                None => Arc::new(DynamoBackend::connect(&config).await?),
            },
        };

        Ok(Self {
            backend,
            clock: clock.unwrap_or_else(|| Arc::new(SystemClock)),
            visibility_timeout,
            _data: PhantomData,
        })
    }
}

impl<T> Client<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// Enqueue a new message under a caller-chosen id.
    ///
    /// The id doubles as the idempotency key: sending an id that already
    /// exists fails with [`Error::IdDuplicated`] and leaves the stored row
    /// untouched.
    pub async fn send_message(&self, id: impl Into<String>, data: T) -> Result<Message<T>, Error> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::IdEmpty);
        }

        let message = Message::new(id, data, self.clock.now());
        let item = message.marshal_map()?;

        match self.backend.put_item_if_absent(item).await {
            Ok(()) => {
                tracing::debug!(id = %message.id, "message sent");
                Ok(message)
            }
            Err(Error::ConditionFailed) => Err(Error::IdDuplicated { id: message.id }),
            Err(e) => Err(e),
        }
    }

    /// Claim the next deliverable message: the oldest row in the standard
    /// partition that is `READY`, or `PROCESSING` with an elapsed
    /// visibility timeout.
    ///
    /// Pages through the index oldest-first and claims the first candidate
    /// with a version-conditioned write. Losing the claim to a concurrent
    /// consumer is expected and retried against the next candidate, up to a
    /// bounded number of losses. An exhausted index yields
    /// [`Error::QueueEmpty`]; so does hitting the loss bound, which tells a
    /// hot-looping caller to back off.
    pub async fn receive_message(&self) -> Result<Message<T>, Error> {
        let mut losses = 0u32;

        loop {
            let mut cursor = None;
            let mut saw_candidate = false;

            loop {
                let page = self
                    .backend
                    .query_index(QueueType::Standard, RECEIVE_PAGE_SIZE, cursor.take())
                    .await?;

                for item in &page.items {
                    let mut candidate: Message<T> = Message::unmarshal_map(item)?;
                    let now = self.clock.now();
                    if !candidate.is_deliverable(now) {
                        continue;
                    }
                    saw_candidate = true;

                    let expect = candidate.version;
                    candidate.mark_as_received(now, self.visibility_timeout);

                    match self
                        .backend
                        .update_item(&candidate.id, candidate.state_update(expect))
                        .await
                    {
                        Ok(claimed) => {
                            tracing::debug!(
                                id = %candidate.id,
                                receive_count = candidate.receive_count,
                                "message received"
                            );
                            return Message::unmarshal_map(&claimed);
                        }
                        Err(Error::ConditionFailed) => {
                            losses += 1;
                            tracing::debug!(
                                id = %candidate.id,
                                losses,
                                "lost claim to a concurrent consumer"
                            );
                            if losses >= RECEIVE_MAX_CLAIM_LOSSES {
                                return Err(Error::QueueEmpty);
                            }
                        }
                        Err(e) => return Err(e),
                    }
                }

                match page.cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }

            if !saw_candidate {
                return Err(Error::QueueEmpty);
            }
            // Every candidate this sweep went to someone else; look again
            // with a fresh view of the index.
        }
    }

    /// Delete a message (the ACK path). Idempotent: deleting an id that
    /// does not exist succeeds.
    pub async fn delete_message(&self, id: &str) -> Result<(), Error> {
        if id.is_empty() {
            return Err(Error::IdEmpty);
        }
        self.backend.delete_item(id).await?;
        tracing::debug!(id, "message deleted");
        Ok(())
    }

    /// Force a claimed message back to `READY`, immediately deliverable
    /// (the NACK path). The receive count is kept.
    pub async fn update_message_as_visible(&self, id: &str) -> Result<Message<T>, Error> {
        let mut message = self.get_message_required(id).await?;
        if message.queue_type != QueueType::Standard {
            return Err(Error::InvalidStateTransition {
                id: id.to_owned(),
                operation: "update_message_as_visible",
            });
        }

        let expect = message.version;
        message.mark_as_visible(self.clock.now());

        let item = self
            .backend
            .update_item(id, message.state_update(expect))
            .await?;
        Message::unmarshal_map(&item)
    }

    /// Move a poison message to the DLQ partition. Already-moved messages
    /// are returned as-is, so the operation is idempotent.
    pub async fn move_message_to_dlq(&self, id: &str) -> Result<Message<T>, Error> {
        let mut message = self.get_message_required(id).await?;
        if message.queue_type == QueueType::Dlq {
            return Ok(message);
        }

        let expect = message.version;
        message.mark_as_moved_to_dlq(self.clock.now());

        let item = self
            .backend
            .update_item(id, message.state_update(expect))
            .await?;
        tracing::debug!(id, "message moved to DLQ");
        Message::unmarshal_map(&item)
    }

    /// Move a message from the DLQ back to the standard queue, stamped as
    /// freshly enqueued.
    pub async fn redrive_message(&self, id: &str) -> Result<Message<T>, Error> {
        let mut message = self.get_message_required(id).await?;
        if message.queue_type != QueueType::Dlq {
            return Err(Error::NotInDlq { id: id.to_owned() });
        }

        let expect = message.version;
        message.mark_as_redriven(self.clock.now());

        let item = self
            .backend
            .update_item(id, message.state_update(expect))
            .await?;
        tracing::debug!(id, "message redriven");
        Message::unmarshal_map(&item)
    }

    /// Overwrite whatever row exists under the message's id. Administrative
    /// path (e.g. resetting system info); deliberately not subject to the
    /// version check.
    pub async fn replace_message(&self, message: &Message<T>) -> Result<(), Error> {
        if message.id.is_empty() {
            return Err(Error::IdEmpty);
        }
        self.backend.put_item(message.marshal_map()?).await
    }

    /// Point read of a message. `Ok(None)` when the id is absent.
    pub async fn get_message(&self, id: &str) -> Result<Option<Message<T>>, Error> {
        if id.is_empty() {
            return Err(Error::IdEmpty);
        }
        match self.backend.get_item(id).await? {
            Some(item) => Message::unmarshal_map(&item).map(Some),
            None => Ok(None),
        }
    }

    /// List up to `size` messages across both partitions, in no particular
    /// order. Administrative listing, not a delivery path.
    pub async fn list_messages(&self, size: u32) -> Result<Vec<Message<T>>, Error> {
        let items = self.backend.scan(size).await?;
        items.iter().map(Message::unmarshal_map).collect()
    }

    async fn get_message_required(&self, id: &str) -> Result<Message<T>, Error> {
        self.get_message(id)
            .await?
            .ok_or_else(|| Error::IdNotFound { id: id.to_owned() })
    }
}

impl<T> Client<T> {
    /// Counts and head-of-queue ids for the standard partition. Computed by
    /// paging the secondary index; may be stale relative to concurrent
    /// mutations.
    pub async fn get_queue_stats(&self) -> Result<QueueStats, Error> {
        let mut stats = QueueStats {
            total_records: 0,
            total_in_processing: 0,
            first_ten_ids: Vec::new(),
            first_ten_in_processing_ids: Vec::new(),
            oldest_last_updated: None,
        };

        let mut cursor = None;
        loop {
            let page = self
                .backend
                .query_index(QueueType::Standard, STATS_PAGE_SIZE, cursor.take())
                .await?;

            for item in &page.items {
                let id = string_attr(item, attr::ID)?;
                let status = Status::parse(string_attr(item, attr::STATUS)?)?;

                if stats.oldest_last_updated.is_none() {
                    stats.oldest_last_updated = Some(parse_timestamp(string_attr(
                        item,
                        attr::LAST_UPDATED_TIMESTAMP,
                    )?)?);
                }

                stats.total_records += 1;
                if stats.first_ten_ids.len() < FIRST_IDS_CAP {
                    stats.first_ten_ids.push(id.to_owned());
                }
                if status == Status::Processing {
                    stats.total_in_processing += 1;
                    if stats.first_ten_in_processing_ids.len() < FIRST_IDS_CAP {
                        stats.first_ten_in_processing_ids.push(id.to_owned());
                    }
                }
            }

            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(stats)
    }

    /// Counts and head-of-queue ids for the DLQ partition.
    pub async fn get_dlq_stats(&self) -> Result<DlqStats, Error> {
        let mut stats = DlqStats {
            total_records: 0,
            first_ten_ids: Vec::new(),
            oldest_last_updated: None,
        };

        let mut cursor = None;
        loop {
            let page = self
                .backend
                .query_index(QueueType::Dlq, STATS_PAGE_SIZE, cursor.take())
                .await?;

            for item in &page.items {
                if stats.oldest_last_updated.is_none() {
                    stats.oldest_last_updated = Some(parse_timestamp(string_attr(
                        item,
                        attr::LAST_UPDATED_TIMESTAMP,
                    )?)?);
                }

                stats.total_records += 1;
                if stats.first_ten_ids.len() < FIRST_IDS_CAP {
                    stats.first_ten_ids.push(string_attr(item, attr::ID)?.to_owned());
                }
            }

            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(stats)
    }
}
