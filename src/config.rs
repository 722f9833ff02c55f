use serde::Deserialize;

use crate::error::Error;

pub mod defaults {
    pub const TABLE_NAME: &str = "dynamomq";
    pub const QUEUEING_INDEX_NAME: &str = "queue_type-last_updated_timestamp-index";
    pub const VISIBILITY_TIMEOUT_SECS: u64 = 60;
}

/// Client settings. Every field is optional; accessors fall back to the
/// documented defaults. Loadable from the environment with a `DYNAMOMQ_`
/// prefix (`DYNAMOMQ_TABLE_NAME`, ...). Credentials are not handled here:
/// the backend adapter resolves them from the surrounding AWS environment.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    pub table_name: Option<String>,
    /// Name of the `(queue_type, last_updated_timestamp)` GSI. The index
    /// must project all attributes: the receive path reads full messages
    /// out of it.
    pub queueing_index_name: Option<String>,
    /// Name of the index used for DLQ-partition queries. Defaults to the
    /// queueing index: a single GSI partitioned by `queue_type` serves both
    /// queues. Tables with split per-queue indexes can override it.
    pub dlq_index_name: Option<String>,
    pub visibility_timeout_secs: Option<u64>,
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        envy::prefixed("DYNAMOMQ_")
            .from_env::<Self>()
            .map_err(|e| Error::mis_configured(e.to_string()))
    }

    pub fn table_name(&self) -> &str {
        self.table_name
            .as_deref()
            .unwrap_or(defaults::TABLE_NAME)
    }

    pub fn queueing_index_name(&self) -> &str {
        self.queueing_index_name
            .as_deref()
            .unwrap_or(defaults::QUEUEING_INDEX_NAME)
    }

    pub fn dlq_index_name(&self) -> &str {
        self.dlq_index_name
            .as_deref()
            .unwrap_or_else(|| self.queueing_index_name())
    }

    pub fn visibility_timeout_secs(&self) -> u64 {
        self.visibility_timeout_secs
            .unwrap_or(defaults::VISIBILITY_TIMEOUT_SECS)
    }
}
