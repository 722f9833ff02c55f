//! Amazon DynamoDB adapter.
//!
//! Renders [`StateUpdate`]s to `UpdateExpression`/`ConditionExpression`
//! pairs and classifies `ConditionalCheckFailedException` as
//! [`Error::ConditionFailed`] so the client can tell an optimistic-locking
//! loss from a transport failure. All attribute names go through `#name`
//! placeholders; several of ours (`status`, `data`) are reserved words.

use async_trait::async_trait;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};

use crate::backend::{Backend, Item, QueryPage, StateUpdate};
use crate::config::Config;
use crate::error::Error;
use crate::message::{attr, QueueType};

#[derive(Clone)]
pub struct DynamoBackend {
    client: aws_sdk_dynamodb::Client,
    table_name: String,
    queueing_index_name: String,
    dlq_index_name: String,
}

impl std::fmt::Debug for DynamoBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoBackend")
            .field("table_name", &self.table_name)
            .finish()
    }
}

impl DynamoBackend {
    /// Wrap a pre-built DynamoDB client.
    pub fn new(client: aws_sdk_dynamodb::Client, config: &Config) -> Self {
        Self {
            client,
            table_name: config.table_name().to_owned(),
            queueing_index_name: config.queueing_index_name().to_owned(),
            dlq_index_name: config.dlq_index_name().to_owned(),
        }
    }

    /// Build a client from the ambient AWS environment (credentials chain,
    /// `AWS_REGION`, ...) with the config's endpoint/region overrides
    /// applied. Endpoint override is what points the client at a local
    /// emulator.
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let sdk_config = aws_config::load_from_env().await;
        let mut builder = aws_sdk_dynamodb::config::Builder::from(&sdk_config);

        if let Some(region) = config.region.clone() {
            builder = builder.region(aws_sdk_dynamodb::config::Region::new(region));
        }
        if let Some(endpoint) = config.endpoint_url.clone() {
            builder = builder.endpoint_url(endpoint);
        }

        let client = aws_sdk_dynamodb::Client::from_conf(builder.build());
        Ok(Self::new(client, config))
    }

    pub fn dynamodb(&self) -> &aws_sdk_dynamodb::Client {
        &self.client
    }

    fn index_for(&self, queue: QueueType) -> &str {
        match queue {
            QueueType::Standard => &self.queueing_index_name,
            QueueType::Dlq => &self.dlq_index_name,
        }
    }

    fn is_conditional_check_failed_on_put(err: &SdkError<PutItemError>) -> bool {
        match err {
            SdkError::ServiceError(se) => {
                matches!(se.err(), PutItemError::ConditionalCheckFailedException(_))
            }
            _ => false,
        }
    }

    fn is_conditional_check_failed_on_update(err: &SdkError<UpdateItemError>) -> bool {
        match err {
            SdkError::ServiceError(se) => {
                matches!(
                    se.err(),
                    UpdateItemError::ConditionalCheckFailedException(_)
                )
            }
            _ => false,
        }
    }

    fn classify<E>(err: SdkError<E>) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match err {
            SdkError::TimeoutError(_) => Error::Timeout {
                source: err.into(),
            },
            other => Error::Backend {
                source: other.into(),
            },
        }
    }
}

#[async_trait]
impl Backend for DynamoBackend {
    async fn get_item(&self, id: &str) -> Result<Option<Item>, Error> {
        let response = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(attr::ID, AttributeValue::S(id.to_owned()))
            .consistent_read(true)
            .send()
            .await
            .map_err(Self::classify)?;

        Ok(response.item().cloned())
    }

    async fn put_item(&self, item: Item) -> Result<(), Error> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .map_err(Self::classify)?;

        Ok(())
    }

    async fn put_item_if_absent(&self, item: Item) -> Result<(), Error> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(#id)")
            .expression_attribute_names("#id", attr::ID)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if Self::is_conditional_check_failed_on_put(&e) => Err(Error::ConditionFailed),
            Err(e) => Err(Self::classify(e)),
        }
    }

    async fn update_item(&self, id: &str, update: StateUpdate) -> Result<Item, Error> {
        let mut request = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key(attr::ID, AttributeValue::S(id.to_owned()))
            .condition_expression("#cond_version = :cond_version")
            .expression_attribute_names("#cond_version", attr::VERSION)
            .expression_attribute_values(
                ":cond_version",
                AttributeValue::N(update.expect_version.to_string()),
            )
            .return_values(ReturnValue::AllNew);

        let mut assignments = Vec::with_capacity(update.set.len());
        for (i, (name, value)) in update.set.into_iter().enumerate() {
            assignments.push(format!("#s{i} = :s{i}"));
            request = request
                .expression_attribute_names(format!("#s{i}"), name)
                .expression_attribute_values(format!(":s{i}"), value);
        }

        let result = request
            .update_expression(format!("SET {}", assignments.join(", ")))
            .send()
            .await;

        match result {
            Ok(output) => output
                .attributes
                .ok_or_else(|| Error::unmarshal("update returned no attributes")),
            Err(e) if Self::is_conditional_check_failed_on_update(&e) => {
                Err(Error::ConditionFailed)
            }
            Err(e) => Err(Self::classify(e)),
        }
    }

    async fn delete_item(&self, id: &str) -> Result<(), Error> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key(attr::ID, AttributeValue::S(id.to_owned()))
            .send()
            .await
            .map_err(Self::classify)?;

        Ok(())
    }

    async fn query_index(
        &self,
        queue: QueueType,
        limit: u32,
        cursor: Option<Item>,
    ) -> Result<QueryPage, Error> {
        let mut request = self
            .client
            .query()
            .table_name(&self.table_name)
            .index_name(self.index_for(queue))
            .key_condition_expression("#qt = :qt")
            .expression_attribute_names("#qt", attr::QUEUE_TYPE)
            .expression_attribute_values(":qt", AttributeValue::S(queue.as_str().to_owned()))
            .scan_index_forward(true)
            .limit(limit as i32);

        if let Some(cursor) = cursor {
            request = request.set_exclusive_start_key(Some(cursor));
        }

        let response = request.send().await.map_err(Self::classify)?;

        let cursor = response
            .last_evaluated_key()
            .filter(|key| !key.is_empty())
            .cloned();

        Ok(QueryPage {
            items: response.items().to_vec(),
            cursor,
        })
    }

    async fn scan(&self, limit: u32) -> Result<Vec<Item>, Error> {
        let response = self
            .client
            .scan()
            .table_name(&self.table_name)
            .limit(limit as i32)
            .send()
            .await
            .map_err(Self::classify)?;

        Ok(response.items().to_vec())
    }
}
