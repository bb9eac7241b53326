use async_trait::async_trait;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::{create_table::CreateTableError, update_item::UpdateItemError};
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ScalarAttributeType,
};
use aws_sdk_dynamodb::Client;

use tagbook_core::{MetaBackend, Mutator, Table};

use super::errors::{Error, Result};
use super::item::{
    key_attribute, value_attribute, Item, StoredRecord, WriteCondition, KEY, VALUE, VERSION,
    WRITE_EXPRESSION,
};

/// Conditional writes attempted by one [`MetaBackend::update`] before giving up.
const MAX_UPDATE_ATTEMPTS: usize = 32;

/// [`MetaBackend`] over Amazon DynamoDB, one DynamoDB table per [`Table`].
///
/// Atomic updates are optimistic: the item is read with a consistent read, the mutator runs, and
/// the result is written only if the item's version is still the one that was read. Lost races
/// are retried with a fresh read.
#[derive(Clone)]
pub struct DynamoDbBackend {
    client: Client,
    table_prefix: String,
}

impl DynamoDbBackend {
    pub fn new(client: Client, table_prefix: &str) -> Self {
        Self {
            client,
            table_prefix: table_prefix.to_string(),
        }
    }

    fn table_name(&self, table: Table) -> String {
        table_name(&self.table_prefix, table)
    }

    /// Create every table that does not exist yet.
    pub async fn create_tables(&self) -> Result<()> {
        for table in Table::ALL {
            let name = self.table_name(table);
            let res = self
                .client
                .create_table()
                .table_name(&name)
                .attribute_definitions(
                    AttributeDefinition::builder()
                        .attribute_name(KEY)
                        .attribute_type(ScalarAttributeType::S)
                        .build(),
                )
                .key_schema(
                    KeySchemaElement::builder()
                        .attribute_name(KEY)
                        .key_type(KeyType::Hash)
                        .build(),
                )
                .billing_mode(BillingMode::PayPerRequest)
                .send()
                .await;

            match res {
                Ok(_) => tracing::info!("created table {name}"),
                Err(SdkError::ServiceError(se)) if already_exists(se.err()) => {
                    tracing::debug!("table {name} already exists")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn read(&self, table: Table, key: &str) -> Result<Option<StoredRecord>> {
        let name = self.table_name(table);
        let output = self
            .client
            .get_item()
            .table_name(&name)
            .key(KEY, key_attribute(key))
            .consistent_read(true)
            .send()
            .await?;

        output
            .item
            .as_ref()
            .map(|item| StoredRecord::from_item(&name, item))
            .transpose()
    }

    /// Store `value` under `key` if `condition` holds. Returns `false` when it does not.
    async fn write(
        &self,
        table: Table,
        key: &str,
        value: Vec<u8>,
        condition: Option<WriteCondition>,
    ) -> Result<bool> {
        let mut request = self
            .client
            .update_item()
            .table_name(self.table_name(table))
            .key(KEY, key_attribute(key))
            .update_expression(WRITE_EXPRESSION)
            .expression_attribute_names("#value", VALUE)
            .expression_attribute_names("#version", VERSION)
            .expression_attribute_values(":value", value_attribute(value))
            .expression_attribute_values(":one", AttributeValue::N(String::from("1")));

        if let Some(condition) = condition {
            request = request.condition_expression(condition.expression());
            request = match condition.expected_version() {
                Some(expected) => request.expression_attribute_values(":expected", expected),
                None => request.expression_attribute_names("#key", KEY),
            };
        }

        match request.send().await {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(se)) if lost_race(se.err()) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn scan_all(&self, table: Table) -> Result<Vec<(String, Vec<u8>)>> {
        let name = self.table_name(table);
        let mut records = Vec::new();
        let mut start_key: Option<Item> = None;
        loop {
            let output = self
                .client
                .scan()
                .table_name(&name)
                .consistent_read(true)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await?;

            for item in output.items.unwrap_or_default() {
                let record = StoredRecord::from_item(&name, &item)?;
                records.push((record.key, record.value));
            }

            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }

    async fn update_optimistic(
        &self,
        table: Table,
        key: &str,
        mutator: &mut Mutator<'_>,
    ) -> Result<()> {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let current = self.read(table, key).await?;
            let new = match mutator(current.as_ref().map(|r| r.value.as_slice()))? {
                Some(new) => new,
                None => return Ok(()),
            };

            let condition = WriteCondition::after_read(current.as_ref());
            if self.write(table, key, new, Some(condition)).await? {
                return Ok(());
            }
            tracing::debug!(
                "conditional write of {key:?} in {} lost a race (attempt {attempt})",
                table.name()
            );
        }

        Err(Error::TooManyConflicts {
            table: self.table_name(table),
            key: key.to_string(),
            attempts: MAX_UPDATE_ATTEMPTS,
        })
    }
}

fn already_exists(e: &CreateTableError) -> bool {
    e.is_resource_in_use_exception()
}

/// The conditional write failed because another writer got there first.
fn lost_race(e: &UpdateItemError) -> bool {
    e.is_conditional_check_failed_exception()
}

fn table_name(prefix: &str, table: Table) -> String {
    format!("{prefix}{}", table.name())
}

#[async_trait]
impl MetaBackend for DynamoDbBackend {
    async fn get(&self, table: Table, key: &str) -> tagbook_core::Result<Option<Vec<u8>>> {
        Ok(self.read(table, key).await?.map(|r| r.value))
    }

    async fn put(&self, table: Table, key: &str, value: Vec<u8>) -> tagbook_core::Result<()> {
        self.write(table, key, value, None).await?;
        Ok(())
    }

    async fn delete(&self, table: Table, key: &str) -> tagbook_core::Result<()> {
        self.client
            .delete_item()
            .table_name(self.table_name(table))
            .key(KEY, key_attribute(key))
            .send()
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    async fn update(
        &self,
        table: Table,
        key: &str,
        mutator: &mut Mutator<'_>,
    ) -> tagbook_core::Result<()> {
        Ok(self.update_optimistic(table, key, mutator).await?)
    }

    async fn scan(&self, table: Table) -> tagbook_core::Result<Vec<(String, Vec<u8>)>> {
        Ok(self.scan_all(table).await?)
    }
}

#[cfg(test)]
mod test {
    use aws_sdk_dynamodb::types::error::{
        ConditionalCheckFailedException, LimitExceededException, ResourceInUseException,
        ResourceNotFoundException,
    };
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::no_prefix("", Table::RepoMeta, "RepoMetadataTable")]
    #[case::prefix("tagbook-", Table::ApiKeys, "tagbook-ApiKeyTable")]
    #[case::version("prod_", Table::Version, "prod_VersionTable")]
    fn table_names(#[case] prefix: &str, #[case] table: Table, #[case] expected: &str) {
        assert_eq!(table_name(prefix, table), expected);
    }

    #[test]
    fn only_failed_conditions_are_lost_races() {
        let conflict = UpdateItemError::ConditionalCheckFailedException(
            ConditionalCheckFailedException::builder().build(),
        );
        assert!(lost_race(&conflict));

        let missing_table = UpdateItemError::ResourceNotFoundException(
            ResourceNotFoundException::builder().build(),
        );
        assert!(!lost_race(&missing_table));
    }

    #[test]
    fn existing_tables_are_not_creation_failures() {
        let in_use =
            CreateTableError::ResourceInUseException(ResourceInUseException::builder().build());
        assert!(already_exists(&in_use));

        let over_limit =
            CreateTableError::LimitExceededException(LimitExceededException::builder().build());
        assert!(!already_exists(&over_limit));
    }
}
