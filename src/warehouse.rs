//! The capabilities the connector needs from a warehouse service.
//!
//! [`RestWarehouse`](crate::RestWarehouse) talks to BigQuery over HTTP;
//! any other implementation (a test double, a gRPC transport) can be handed
//! to [`BigQueryConnector::with_warehouse`](crate::BigQueryConnector::with_warehouse).
use std::sync::Arc;

use async_trait::async_trait;

use crate::credentials::ServiceAccountCredential;
use crate::errors::BigQueryResult;
use crate::{ConnectorConfig, Query};

/// A result row, keyed by column name in the order the columns were selected
pub type Row = serde_json::Map<String, serde_json::Value>;

/// The outcome of a statement that was run for its side effects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changes {
    pub job_id: String,
    /// Rows inserted, updated, deleted or merged; zero for DDL
    pub affected_rows: u64,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// The authenticated handle, created once per connector
    type Auth: Send + Sync;
    type Client: QueryClient;

    /// Exchange a service account credential for an authenticated handle
    async fn authenticate(
        &self,
        credential: ServiceAccountCredential,
        scope: &str,
    ) -> BigQueryResult<Self::Auth>;

    /// Bind a client to a project and an authenticated handle
    fn client(&self, config: &ConnectorConfig, auth: Arc<Self::Auth>) -> Self::Client;
}

#[async_trait]
pub trait QueryClient: Send + Sync {
    type Job: QueryJob;

    /// Submit SQL as a query job, without waiting for it to finish
    async fn submit_query(&self, query: &Query) -> BigQueryResult<Self::Job>;
}

#[async_trait]
pub trait QueryJob: Send + Sync {
    fn job_id(&self) -> &str;

    /// Wait for the job and collect every result row, in the order the service returns them
    async fn fetch_rows(&self) -> BigQueryResult<Vec<Row>>;

    /// Wait for the job and report what it changed
    async fn wait(&self) -> BigQueryResult<Changes>;
}
