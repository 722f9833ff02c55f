//! The message entity and its mapping to the stored item shape.
//!
//! A message is one row in the backing table. All queue metadata lives in
//! top-level attributes (`queue_type`, `status`, `receive_count`, ...) with a
//! `system_info` map mirroring them for observability tooling, matching the
//! layout other implementations of this queue read and write. Timestamps are
//! RFC3339 UTC strings with nanosecond precision so that the secondary
//! index's lexicographic sort order is chronological.

use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::backend::{Item, StateUpdate};
use crate::error::Error;

/// Stored attribute names. Normative for interoperability with the other
/// implementations sharing the same table.
pub(crate) mod attr {
    pub const ID: &str = "id";
    pub const DATA: &str = "data";
    pub const SYSTEM_INFO: &str = "system_info";
    pub const QUEUE_TYPE: &str = "queue_type";
    pub const STATUS: &str = "status";
    pub const RECEIVE_COUNT: &str = "receive_count";
    pub const LAST_UPDATED_TIMESTAMP: &str = "last_updated_timestamp";
    pub const QUEUE_ADDED_TIMESTAMP: &str = "queue_added_timestamp";
    pub const VISIBLE_AT: &str = "visible_at";
    pub const VERSION: &str = "version";
    pub const CREATED_AT: &str = "created_at";
}

/// Which logical queue a message currently belongs to. Partition key of the
/// secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueType {
    #[serde(rename = "STANDARD")]
    Standard,
    #[serde(rename = "DLQ")]
    Dlq,
}

impl QueueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "STANDARD",
            Self::Dlq => "DLQ",
        }
    }

    pub(crate) fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "STANDARD" => Ok(Self::Standard),
            "DLQ" => Ok(Self::Dlq),
            other => Err(Error::unmarshal(format!("unknown queue_type {other:?}"))),
        }
    }
}

/// Delivery state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "READY")]
    Ready,
    #[serde(rename = "PROCESSING")]
    Processing,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Processing => "PROCESSING",
        }
    }

    pub(crate) fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "READY" => Ok(Self::Ready),
            "PROCESSING" => Ok(Self::Processing),
            other => Err(Error::unmarshal(format!("unknown status {other:?}"))),
        }
    }
}

/// A message row together with its queue metadata.
///
/// `T` is the caller's payload type; the lifecycle transitions below never
/// look at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message<T> {
    pub id: String,
    pub data: T,
    pub queue_type: QueueType,
    pub status: Status,
    pub receive_count: u32,
    pub version: u64,
    #[serde(with = "ts")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts")]
    pub queue_added_timestamp: DateTime<Utc>,
    #[serde(with = "ts")]
    pub last_updated_timestamp: DateTime<Utc>,
    #[serde(with = "ts")]
    pub visible_at: DateTime<Utc>,
}

/// Snapshot of a message's queue metadata, without the payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemInfo {
    pub id: String,
    pub queue_type: QueueType,
    pub status: Status,
    pub receive_count: u32,
    pub version: u64,
    #[serde(with = "ts")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts")]
    pub queue_added_timestamp: DateTime<Utc>,
    #[serde(with = "ts")]
    pub last_updated_timestamp: DateTime<Utc>,
    #[serde(with = "ts")]
    pub visible_at: DateTime<Utc>,
}

impl<T> Message<T> {
    /// A freshly enqueued message: standard queue, ready, version 1, all
    /// timestamps at `now`.
    pub fn new(id: impl Into<String>, data: T, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            data,
            queue_type: QueueType::Standard,
            status: Status::Ready,
            receive_count: 0,
            version: 1,
            created_at: now,
            queue_added_timestamp: now,
            last_updated_timestamp: now,
            visible_at: now,
        }
    }

    /// Return the metadata to the freshly-constructed state. Used by the
    /// administrative reset path; the payload is untouched.
    pub fn reset_system_info(&mut self, now: DateTime<Utc>) {
        self.queue_type = QueueType::Standard;
        self.status = Status::Ready;
        self.receive_count = 0;
        self.version = 1;
        self.created_at = now;
        self.queue_added_timestamp = now;
        self.last_updated_timestamp = now;
        self.visible_at = now;
    }

    /// Claim transition: the message becomes invisible for
    /// `visibility_timeout` starting at `now`.
    pub fn mark_as_received(&mut self, now: DateTime<Utc>, visibility_timeout: Duration) {
        self.status = Status::Processing;
        self.receive_count += 1;
        self.version += 1;
        self.last_updated_timestamp = now;
        self.visible_at = now + visibility_timeout;
    }

    /// NACK transition: back to ready and immediately deliverable. The
    /// receive count is deliberately kept.
    pub fn mark_as_visible(&mut self, now: DateTime<Utc>) {
        self.status = Status::Ready;
        self.version += 1;
        self.last_updated_timestamp = now;
        self.visible_at = now;
    }

    /// Poison transition: move to the DLQ partition. The receive count
    /// restarts at zero so a later redrive begins a fresh delivery cycle.
    pub fn mark_as_moved_to_dlq(&mut self, now: DateTime<Utc>) {
        self.queue_type = QueueType::Dlq;
        self.status = Status::Ready;
        self.receive_count = 0;
        self.version += 1;
        self.last_updated_timestamp = now;
        self.visible_at = now;
    }

    /// Redrive transition: back from the DLQ to the standard queue, stamped
    /// as if freshly enqueued.
    pub fn mark_as_redriven(&mut self, now: DateTime<Utc>) {
        self.queue_type = QueueType::Standard;
        self.status = Status::Ready;
        self.version += 1;
        self.queue_added_timestamp = now;
        self.last_updated_timestamp = now;
        self.visible_at = now;
    }

    /// Whether the next receive may return this message: ready, or in
    /// processing with an elapsed visibility timeout.
    pub fn is_deliverable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            Status::Ready => true,
            Status::Processing => self.visible_at <= now,
        }
    }

    pub fn system_info(&self) -> SystemInfo {
        SystemInfo {
            id: self.id.clone(),
            queue_type: self.queue_type,
            status: self.status,
            receive_count: self.receive_count,
            version: self.version,
            created_at: self.created_at,
            queue_added_timestamp: self.queue_added_timestamp,
            last_updated_timestamp: self.last_updated_timestamp,
            visible_at: self.visible_at,
        }
    }

    fn system_info_item(&self) -> Item {
        HashMap::from([
            (attr::ID.to_owned(), AttributeValue::S(self.id.clone())),
            (
                attr::QUEUE_TYPE.to_owned(),
                AttributeValue::S(self.queue_type.as_str().to_owned()),
            ),
            (
                attr::STATUS.to_owned(),
                AttributeValue::S(self.status.as_str().to_owned()),
            ),
            (
                attr::RECEIVE_COUNT.to_owned(),
                AttributeValue::N(self.receive_count.to_string()),
            ),
            (
                attr::VERSION.to_owned(),
                AttributeValue::N(self.version.to_string()),
            ),
            (
                attr::CREATED_AT.to_owned(),
                AttributeValue::S(format_timestamp(self.created_at)),
            ),
            (
                attr::QUEUE_ADDED_TIMESTAMP.to_owned(),
                AttributeValue::S(format_timestamp(self.queue_added_timestamp)),
            ),
            (
                attr::LAST_UPDATED_TIMESTAMP.to_owned(),
                AttributeValue::S(format_timestamp(self.last_updated_timestamp)),
            ),
            (
                attr::VISIBLE_AT.to_owned(),
                AttributeValue::S(format_timestamp(self.visible_at)),
            ),
        ])
    }

    /// The conditional write applying this message's current metadata on top
    /// of the row version `expect_version`. The payload and `created_at` are
    /// immutable through this path; the `system_info` mirror is rewritten
    /// wholesale.
    pub(crate) fn state_update(&self, expect_version: u64) -> StateUpdate {
        StateUpdate {
            expect_version,
            set: vec![
                (
                    attr::QUEUE_TYPE,
                    AttributeValue::S(self.queue_type.as_str().to_owned()),
                ),
                (
                    attr::STATUS,
                    AttributeValue::S(self.status.as_str().to_owned()),
                ),
                (
                    attr::RECEIVE_COUNT,
                    AttributeValue::N(self.receive_count.to_string()),
                ),
                (attr::VERSION, AttributeValue::N(self.version.to_string())),
                (
                    attr::QUEUE_ADDED_TIMESTAMP,
                    AttributeValue::S(format_timestamp(self.queue_added_timestamp)),
                ),
                (
                    attr::LAST_UPDATED_TIMESTAMP,
                    AttributeValue::S(format_timestamp(self.last_updated_timestamp)),
                ),
                (
                    attr::VISIBLE_AT,
                    AttributeValue::S(format_timestamp(self.visible_at)),
                ),
                (
                    attr::SYSTEM_INFO,
                    AttributeValue::M(self.system_info_item()),
                ),
            ],
        }
    }
}

impl<T: Serialize> Message<T> {
    /// Marshal to the stored item shape. Exact inverse of
    /// [`Message::unmarshal_map`].
    pub fn marshal_map(&self) -> Result<Item, Error> {
        let data = serde_json::to_value(&self.data).map_err(Error::marshal)?;

        let mut item = self.system_info_item();
        item.insert(attr::DATA.to_owned(), json_to_attr(&data));
        item.insert(
            attr::SYSTEM_INFO.to_owned(),
            AttributeValue::M(self.system_info_item()),
        );
        // created_at lives only in the system_info mirror.
        item.remove(attr::CREATED_AT);

        Ok(item)
    }
}

impl<T: DeserializeOwned> Message<T> {
    /// Unmarshal from the stored item shape. Exact inverse of
    /// [`Message::marshal_map`].
    pub fn unmarshal_map(item: &Item) -> Result<Self, Error> {
        let data_attr = item
            .get(attr::DATA)
            .ok_or_else(|| Error::unmarshal("missing attribute data"))?;
        let data = serde_json::from_value(attr_to_json(data_attr)?).map_err(Error::unmarshal)?;

        let system_info = item
            .get(attr::SYSTEM_INFO)
            .and_then(|v| v.as_m().ok())
            .ok_or_else(|| Error::unmarshal("missing attribute system_info"))?;

        Ok(Self {
            id: string_attr(item, attr::ID)?.to_owned(),
            data,
            queue_type: QueueType::parse(string_attr(item, attr::QUEUE_TYPE)?)?,
            status: Status::parse(string_attr(item, attr::STATUS)?)?,
            receive_count: number_attr(item, attr::RECEIVE_COUNT)?,
            version: number_attr(item, attr::VERSION)?,
            created_at: parse_timestamp(string_attr(system_info, attr::CREATED_AT)?)?,
            queue_added_timestamp: parse_timestamp(string_attr(
                item,
                attr::QUEUE_ADDED_TIMESTAMP,
            )?)?,
            last_updated_timestamp: parse_timestamp(string_attr(
                item,
                attr::LAST_UPDATED_TIMESTAMP,
            )?)?,
            visible_at: parse_timestamp(string_attr(item, attr::VISIBLE_AT)?)?,
        })
    }
}

pub(crate) fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::unmarshal(format!("bad timestamp {s:?}: {e}")))
}

pub(crate) fn string_attr<'a>(item: &'a Item, name: &str) -> Result<&'a str, Error> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .map(|s| s.as_str())
        .ok_or_else(|| Error::unmarshal(format!("missing string attribute {name}")))
}

fn number_attr<N: std::str::FromStr>(item: &Item, name: &str) -> Result<N, Error> {
    item.get(name)
        .and_then(|v| v.as_n().ok())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::unmarshal(format!("missing numeric attribute {name}")))
}

/// JSON → stored attribute. Total: every JSON value has a representation.
fn json_to_attr(value: &serde_json::Value) -> AttributeValue {
    match value {
        serde_json::Value::Null => AttributeValue::Null(true),
        serde_json::Value::Bool(b) => AttributeValue::Bool(*b),
        serde_json::Value::Number(n) => AttributeValue::N(n.to_string()),
        serde_json::Value::String(s) => AttributeValue::S(s.clone()),
        serde_json::Value::Array(items) => {
            AttributeValue::L(items.iter().map(json_to_attr).collect())
        }
        serde_json::Value::Object(entries) => AttributeValue::M(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), json_to_attr(v)))
                .collect(),
        ),
    }
}

/// Stored attribute → JSON. Partial: attribute kinds the marshal side never
/// produces (binary, sets) are rejected.
fn attr_to_json(value: &AttributeValue) -> Result<serde_json::Value, Error> {
    match value {
        AttributeValue::Null(_) => Ok(serde_json::Value::Null),
        AttributeValue::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        AttributeValue::N(n) => n
            .parse::<serde_json::Number>()
            .map(serde_json::Value::Number)
            .map_err(|e| Error::unmarshal(format!("bad number {n:?}: {e}"))),
        AttributeValue::S(s) => Ok(serde_json::Value::String(s.clone())),
        AttributeValue::L(items) => Ok(serde_json::Value::Array(
            items.iter().map(attr_to_json).collect::<Result<_, _>>()?,
        )),
        AttributeValue::M(entries) => Ok(serde_json::Value::Object(
            entries
                .iter()
                .map(|(k, v)| attr_to_json(v).map(|j| (k.clone(), j)))
                .collect::<Result<_, _>>()?,
        )),
        other => Err(Error::unmarshal(format!(
            "unsupported attribute kind {other:?}"
        ))),
    }
}

/// RFC3339Nano (de)serialization for `serde`, shared by every timestamp
/// field so JSON dumps match the stored representation byte for byte.
pub(crate) mod ts {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(*t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_timestamp(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            t: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match t {
                Some(t) => serializer.serialize_some(&crate::message::format_timestamp(*t)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let s = Option::<String>::deserialize(deserializer)?;
            s.map(|s| crate::message::parse_timestamp(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
