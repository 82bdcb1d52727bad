//! This module provides a BigQuery connector for Rust.
//!
//! The `lib.rs` file contains the configuration types of the connector.
//! It includes the `ConnectorConfig` struct, which carries the service account and project
//! handed over by the host platform, and the `Query` struct, which carries the SQL of one operation.
//! The `BigQueryConnector` struct authenticates lazily and runs those queries against BigQuery.
//!
//! Example usage:
//!
//! ```rust,no_run
//! use light_bigquery_connector::{BigQueryConnector, BigQueryError, ConnectorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BigQueryError> {
//!     let config = ConnectorConfig::new("eyJ0eXBlIjogInNlcnZpY2VfYWNjb3VudCIsIC4uLn0=", "my-project");
//!     let connector = BigQueryConnector::new(config)?;
//!
//!     // Reads return every row as a JSON object keyed by column name
//!     let rows = connector.read(&"SELECT 1".into()).await?;
//!     assert_eq!(rows[0]["f0_"], 1);
//!
//!     // Writes wait for the job to finish and report how many rows changed
//!     let changes = connector
//!         .update(&"UPDATE dataset.people SET name = 'Henry' WHERE id = 10".into())
//!         .await?;
//!     println!("Updated {} rows", changes.affected_rows);
//!
//!     Ok(())
//! }
//! ```
use std::fmt;

use serde::{Deserialize, Serialize};

mod auth;
mod cells;
mod connector;
mod credentials;
mod errors;
#[cfg(test)]
mod fake_server;
mod page;
mod rest;
mod warehouse;

pub use async_trait::async_trait;
pub use auth::GoogleAuthClient;
pub use cells::{Cell, FieldType};
pub use connector::BigQueryConnector;
pub use credentials::{create_assertion, ServiceAccountCredential};
pub use errors::{BigQueryError, BigQueryResult};
pub use jwt_simple;
pub use page::{FieldSchema, Page, Schema};
pub use rest::{RestClient, RestJob, RestWarehouse};
pub use warehouse::{Changes, QueryClient, QueryJob, Row, Warehouse};

/// The only OAuth scope the connector asks for
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Connection settings, as supplied by the host platform
#[derive(Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorConfig {
    /// A service account key file, base64 encoded
    #[serde(alias = "base64EncodedServiceAccount")]
    pub encoded_service_account: String,
    #[serde(alias = "gcpProjectId")]
    pub project_id: String,
    /// Where jobs run, such as `US` or `europe-west1`; BigQuery picks one when unset
    #[serde(default)]
    pub location: Option<String>,
}

impl ConnectorConfig {
    pub fn new(encoded_service_account: impl Into<String>, project_id: impl Into<String>) -> Self {
        ConnectorConfig {
            encoded_service_account: encoded_service_account.into(),
            project_id: project_id.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

impl fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorConfig")
            .field("encoded_service_account", &"<redacted>")
            .field("project_id", &self.project_id)
            .field("location", &self.location)
            .finish()
    }
}

/// The SQL of a single operation, passed to BigQuery verbatim
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Query {
    #[serde(alias = "statement")]
    pub sql: String,
}

impl From<&str> for Query {
    fn from(sql: &str) -> Self {
        Query {
            sql: sql.to_owned(),
        }
    }
}

impl From<String> for Query {
    fn from(sql: String) -> Self {
        Query { sql }
    }
}
