//! In-memory backend.
//!
//! A single mutex-guarded table implementing the same conditional-write
//! contract as DynamoDB. Intended for tests and local development; the
//! integration suite drives the full state machine against it.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;

use crate::backend::{Backend, Item, QueryPage, StateUpdate};
use crate::error::Error;
use crate::message::{attr, QueueType};

#[derive(Debug, Default)]
pub struct MemoryBackend {
    rows: Mutex<HashMap<String, Item>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn item_id(item: &Item) -> Result<String, Error> {
        item.get(attr::ID)
            .and_then(|v| v.as_s().ok())
            .cloned()
            .ok_or_else(|| Error::unmarshal("item has no id attribute"))
    }

    /// Sort key of the secondary index: `(last_updated_timestamp, id)`.
    /// RFC3339Nano strings sort lexicographically in chronological order,
    /// same as the real index.
    fn index_key(item: &Item) -> (String, String) {
        let ts = item
            .get(attr::LAST_UPDATED_TIMESTAMP)
            .and_then(|v| v.as_s().ok())
            .cloned()
            .unwrap_or_default();
        let id = item
            .get(attr::ID)
            .and_then(|v| v.as_s().ok())
            .cloned()
            .unwrap_or_default();
        (ts, id)
    }

    fn cursor_key(cursor: &Item) -> (String, String) {
        Self::index_key(cursor)
    }

    fn cursor_for(item: &Item) -> Item {
        let (ts, id) = Self::index_key(item);
        HashMap::from([
            (attr::ID.to_owned(), AttributeValue::S(id)),
            (
                attr::LAST_UPDATED_TIMESTAMP.to_owned(),
                AttributeValue::S(ts),
            ),
        ])
    }

    fn partition(item: &Item) -> Option<&str> {
        item.get(attr::QUEUE_TYPE)
            .and_then(|v| v.as_s().ok())
            .map(|s| s.as_str())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get_item(&self, id: &str) -> Result<Option<Item>, Error> {
        let rows = self.rows.lock().expect("rows lock");
        Ok(rows.get(id).cloned())
    }

    async fn put_item(&self, item: Item) -> Result<(), Error> {
        let id = Self::item_id(&item)?;
        let mut rows = self.rows.lock().expect("rows lock");
        rows.insert(id, item);
        Ok(())
    }

    async fn put_item_if_absent(&self, item: Item) -> Result<(), Error> {
        let id = Self::item_id(&item)?;
        let mut rows = self.rows.lock().expect("rows lock");
        if rows.contains_key(&id) {
            return Err(Error::ConditionFailed);
        }
        rows.insert(id, item);
        Ok(())
    }

    async fn update_item(&self, id: &str, update: StateUpdate) -> Result<Item, Error> {
        let mut rows = self.rows.lock().expect("rows lock");
        let row = rows.get_mut(id).ok_or(Error::ConditionFailed)?;

        let current_version = row
            .get(attr::VERSION)
            .and_then(|v| v.as_n().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| Error::unmarshal("row has no version attribute"))?;
        if current_version != update.expect_version {
            return Err(Error::ConditionFailed);
        }

        for (name, value) in update.set {
            row.insert(name.to_owned(), value);
        }

        Ok(row.clone())
    }

    async fn delete_item(&self, id: &str) -> Result<(), Error> {
        let mut rows = self.rows.lock().expect("rows lock");
        rows.remove(id);
        Ok(())
    }

    async fn query_index(
        &self,
        queue: QueueType,
        limit: u32,
        cursor: Option<Item>,
    ) -> Result<QueryPage, Error> {
        let rows = self.rows.lock().expect("rows lock");

        let mut items: Vec<Item> = rows
            .values()
            .filter(|item| Self::partition(item) == Some(queue.as_str()))
            .cloned()
            .collect();
        items.sort_by_key(|item| Self::index_key(item));

        if let Some(cursor) = cursor {
            let after = Self::cursor_key(&cursor);
            items.retain(|item| Self::index_key(item) > after);
        }

        let more = items.len() > limit as usize;
        items.truncate(limit as usize);

        let cursor = if more {
            items.last().map(Self::cursor_for)
        } else {
            None
        };

        Ok(QueryPage { items, cursor })
    }

    async fn scan(&self, limit: u32) -> Result<Vec<Item>, Error> {
        let rows = self.rows.lock().expect("rows lock");
        Ok(rows.values().take(limit as usize).cloned().collect())
    }
}
