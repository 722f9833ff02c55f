//! Queue and DLQ statistics.
//!
//! Computed by paging the secondary index; never transactional, so counts
//! may be stale relative to concurrent mutations. Good enough for the
//! monitoring and operator tooling they exist for.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::message::ts;

/// Point-in-time view of the standard queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Rows in the standard partition, regardless of status.
    pub total_records: u64,
    /// Rows currently claimed by a consumer (status `PROCESSING`).
    pub total_in_processing: u64,
    /// Oldest ids, in index order, capped at ten.
    pub first_ten_ids: Vec<String>,
    /// Oldest claimed ids, in index order, capped at ten.
    pub first_ten_in_processing_ids: Vec<String>,
    /// `last_updated_timestamp` of the head of the index.
    #[serde(with = "ts::option")]
    pub oldest_last_updated: Option<DateTime<Utc>>,
}

/// Point-in-time view of the DLQ partition. Everything in the DLQ is
/// `READY`, so there is no in-processing breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DlqStats {
    pub total_records: u64,
    pub first_ten_ids: Vec<String>,
    #[serde(with = "ts::option")]
    pub oldest_last_updated: Option<DateTime<Utc>>,
}
