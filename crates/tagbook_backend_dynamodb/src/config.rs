use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sdk_dynamodb::config::Region;
use serde::Deserialize;

use super::errors::Result;
use super::logging::LoggingInterceptor;
use super::store::DynamoDbBackend;

#[derive(Clone, Deserialize)]
pub struct DynamoDbConfig {
    secret_key: String,
    access_key: String,
    region: String,
    /// Override of the service endpoint, eg for DynamoDB Local.
    #[serde(default)]
    endpoint: Option<String>,
    /// Prepended to every table name.
    #[serde(default)]
    table_prefix: String,
    /// Create missing tables on startup.
    #[serde(default)]
    create_tables: bool,
}

impl DynamoDbConfig {
    pub async fn new_backend(&self) -> Result<DynamoDbBackend> {
        let scp = SharedCredentialsProvider::new(
            Credentials::new(
                self.access_key.clone(),
                self.secret_key.clone(),
                None,
                None,
                "tagbook",
            )
            .provide_credentials()
            .await?,
        );

        let sdk_config = aws_config::load_from_env().await;

        let mut builder = aws_sdk_dynamodb::config::Builder::from(&sdk_config)
            .region(Region::new(self.region.clone()))
            .credentials_provider(scp)
            .interceptor(LoggingInterceptor);
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = aws_sdk_dynamodb::Client::from_conf(builder.build());
        let backend = DynamoDbBackend::new(client, &self.table_prefix);
        if self.create_tables {
            backend.create_tables().await?;
        }
        Ok(backend)
    }
}
