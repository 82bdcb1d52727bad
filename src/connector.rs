use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::credentials::ServiceAccountCredential;
use crate::errors::{BigQueryError, BigQueryResult};
use crate::rest::RestWarehouse;
use crate::warehouse::{Changes, QueryClient, QueryJob, Row, Warehouse};
use crate::{ConnectorConfig, Query, CLOUD_PLATFORM_SCOPE};

/// Runs SQL against BigQuery on behalf of a host platform
///
/// The connector authenticates lazily: nothing touches the network until the first
/// operation, and the authenticated handle is then kept for the life of the connector.
pub struct BigQueryConnector<W: Warehouse = RestWarehouse> {
    config: ConnectorConfig,
    warehouse: W,
    auth_client: OnceCell<Arc<W::Auth>>,
}

impl BigQueryConnector {
    /// Create a connector for the BigQuery REST API
    pub fn new(config: ConnectorConfig) -> BigQueryResult<BigQueryConnector> {
        Ok(Self::with_warehouse(config, RestWarehouse::new()?))
    }
}

impl<W: Warehouse> BigQueryConnector<W> {
    pub fn with_warehouse(config: ConnectorConfig, warehouse: W) -> BigQueryConnector<W> {
        BigQueryConnector {
            config,
            warehouse,
            auth_client: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    /// Get the authenticated handle, decoding the credential and authenticating on first use
    ///
    /// Concurrent first callers wait for a single authentication. If it fails,
    /// the error is returned and the next call tries again.
    pub async fn auth_client(&self) -> BigQueryResult<Arc<W::Auth>> {
        self.auth_client
            .get_or_try_init(|| async {
                log::debug!(
                    "Authenticating connector for project {}",
                    self.config.project_id
                );
                let credential =
                    ServiceAccountCredential::decode(&self.config.encoded_service_account)?;
                let auth = self
                    .warehouse
                    .authenticate(credential, CLOUD_PLATFORM_SCOPE)
                    .await?;
                Ok::<_, BigQueryError>(Arc::new(auth))
            })
            .await
            .map(Arc::clone)
    }

    /// Create a client for one query
    ///
    /// Clients are cheap wrappers around the shared authenticated handle
    /// and are not cached.
    pub async fn client(&self) -> BigQueryResult<W::Client> {
        let auth = self.auth_client().await?;
        Ok(self.warehouse.client(&self.config, auth))
    }

    /// Execute SQL that returns a result set, collecting every row
    pub async fn execute_query(&self, query: &Query) -> BigQueryResult<Vec<Row>> {
        let job = self.client().await?.submit_query(query).await?;
        let rows = job.fetch_rows().await?;
        log::debug!("Job {} returned {} rows", job.job_id(), rows.len());
        Ok(rows)
    }

    /// Execute SQL for its side effects, waiting for the job to finish
    ///
    /// A failed statement is returned as an error rather than an empty result.
    pub async fn execute_command(&self, query: &Query) -> BigQueryResult<Changes> {
        let job = self.client().await?.submit_query(query).await?;
        let changes = job.wait().await?;
        log::debug!("Job {} affected {} rows", changes.job_id, changes.affected_rows);
        Ok(changes)
    }

    pub async fn create(&self, query: &Query) -> BigQueryResult<Changes> {
        self.execute_command(query).await
    }

    pub async fn read(&self, query: &Query) -> BigQueryResult<Vec<Row>> {
        self.execute_query(query).await
    }

    pub async fn update(&self, query: &Query) -> BigQueryResult<Changes> {
        self.execute_command(query).await
    }

    pub async fn delete(&self, query: &Query) -> BigQueryResult<Changes> {
        self.execute_command(query).await
    }
}
