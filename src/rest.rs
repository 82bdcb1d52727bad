use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStream, TryStreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::auth::GoogleAuthClient;
use crate::credentials::ServiceAccountCredential;
use crate::errors::{BigQueryError, BigQueryResult, GoogleWireResult};
use crate::page::{Page, Schema, WireRow};
use crate::warehouse::{Changes, QueryClient, QueryJob, Row, Warehouse};
use crate::{ConnectorConfig, Query};

const DEFAULT_API_ROOT: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// How long BigQuery may hold a results request open while the job is still running
const POLL_TIMEOUT_MS: u64 = 10_000;

const JOB_ID_PREFIX: &str = "light_bigquery_";

/// The BigQuery v2 REST API
///
/// One HTTP client is shared by the authentication handle and every query client
/// created from this warehouse.
#[derive(Debug, Clone)]
pub struct RestWarehouse {
    http: reqwest::Client,
    api_root: String,
}

impl RestWarehouse {
    pub fn new() -> BigQueryResult<RestWarehouse> {
        use reqwest::header::*;
        let mut headers = HeaderMap::with_capacity(2);
        headers.append(ACCEPT, "application/json".parse()?);
        headers.append(
            USER_AGENT,
            concat!(env!("CARGO_PKG_NAME"), '/', env!("CARGO_PKG_VERSION")).parse()?,
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            // Leave room past the server-side poll timeout before giving up on a request
            .timeout(Duration::from_millis(POLL_TIMEOUT_MS) + Duration::from_secs(15))
            .build()?;
        Ok(RestWarehouse {
            http,
            api_root: DEFAULT_API_ROOT.to_owned(),
        })
    }

    /// Send API calls somewhere other than `bigquery.googleapis.com`, such as an emulator
    pub fn with_api_root(mut self, api_root: &str) -> RestWarehouse {
        self.api_root = api_root.trim_end_matches('/').to_owned();
        self
    }
}

#[async_trait]
impl Warehouse for RestWarehouse {
    type Auth = GoogleAuthClient;
    type Client = RestClient;

    async fn authenticate(
        &self,
        credential: ServiceAccountCredential,
        scope: &str,
    ) -> BigQueryResult<GoogleAuthClient> {
        GoogleAuthClient::connect(credential, scope, self.http.clone()).await
    }

    fn client(&self, config: &ConnectorConfig, auth: Arc<GoogleAuthClient>) -> RestClient {
        RestClient {
            http: self.http.clone(),
            api_root: self.api_root.clone(),
            project_id: config.project_id.clone(),
            location: config.location.clone(),
            auth,
        }
    }
}

/// A BigQuery client bound to one project
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    api_root: String,
    project_id: String,
    location: Option<String>,
    auth: Arc<GoogleAuthClient>,
}

impl RestClient {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> BigQueryResult<T> {
        let token = self.auth.access_token().await?;
        request
            .bearer_auth(token)
            .send()
            .await?
            .json::<GoogleWireResult<T>>()
            .await?
            .into_result()
    }

    async fn get_query_results(
        &self,
        reference: &WireJobReference,
        page_token: Option<&str>,
        max_results: Option<u32>,
    ) -> BigQueryResult<WireQueryResults> {
        let params = WireResultsParams {
            location: reference.location.as_deref(),
            page_token,
            max_results,
            timeout_ms: POLL_TIMEOUT_MS,
            use_int64_timestamp: true,
        };
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.api_root, reference.project_id, reference.job_id
        );
        self.send(self.http.get(url).query(&params)).await
    }
}

#[async_trait]
impl QueryClient for RestClient {
    type Job = RestJob;

    async fn submit_query(&self, query: &Query) -> BigQueryResult<RestJob> {
        let request = WireJobRequest {
            job_reference: WireJobReference {
                project_id: self.project_id.clone(),
                job_id: format!("{JOB_ID_PREFIX}{}", uuid::Uuid::new_v4().simple()),
                location: self.location.clone(),
            },
            configuration: WireJobConfiguration {
                query: WireQueryConfiguration {
                    query: query.sql.clone(),
                    use_legacy_sql: false,
                },
            },
        };
        log::debug!(
            "Submitting job {}: {}",
            request.job_reference.job_id,
            query.sql
        );
        let url = format!("{}/projects/{}/jobs", self.api_root, self.project_id);
        let job: WireJobResponse = self.send(self.http.post(url).json(&request)).await?;
        if let Some(error) = job.status.and_then(|status| status.error_result) {
            return Err(error.into_error(&job.job_reference.job_id));
        }
        Ok(RestJob {
            client: self.clone(),
            reference: job.job_reference,
        })
    }
}

/// A submitted query job
#[derive(Debug, Clone)]
pub struct RestJob {
    client: RestClient,
    reference: WireJobReference,
}

struct Cursor {
    page_token: Option<String>,
    schema: Option<Arc<Schema>>,
    index: usize,
}

impl RestJob {
    /// The location BigQuery placed the job in, such as `US`
    pub fn location(&self) -> Option<&str> {
        self.reference.location.as_deref()
    }

    /// Fetch results until the job reports completion
    ///
    /// BigQuery holds each request open for up to `POLL_TIMEOUT_MS`, so this does not sleep.
    async fn poll(
        &self,
        page_token: Option<&str>,
        max_results: Option<u32>,
    ) -> BigQueryResult<WireQueryResults> {
        loop {
            let results = self
                .client
                .get_query_results(&self.reference, page_token, max_results)
                .await?;
            if results.job_complete {
                return Ok(results);
            }
            log::debug!("Job {} is still running", self.reference.job_id);
        }
    }

    /// Stream over every page of the result
    ///
    /// Each page is one request; the next is only fetched once the previous one is consumed.
    pub fn pages(&self) -> impl TryStream<Ok = Page, Error = BigQueryError> + '_ {
        let start = Cursor {
            page_token: None,
            schema: None,
            index: 0,
        };
        futures::stream::try_unfold(Some(start), move |cursor| async move {
            let Some(cursor) = cursor else {
                return Ok::<_, BigQueryError>(None);
            };
            let results = self.poll(cursor.page_token.as_deref(), None).await?;
            log::debug!(
                "Job {} page {}: {} rows",
                self.reference.job_id,
                cursor.index,
                results.rows.len()
            );
            let schema = match (results.schema, cursor.schema) {
                (Some(schema), _) => Arc::new(schema),
                (None, Some(previous)) => previous,
                (None, None) => Arc::new(Schema::default()),
            };
            let page = Page::new(schema.clone(), results.rows, cursor.index);
            let next = results.page_token.map(|page_token| Cursor {
                page_token: Some(page_token),
                schema: Some(schema),
                index: cursor.index + 1,
            });
            Ok(Some((page, next)))
        })
    }
}

#[async_trait]
impl QueryJob for RestJob {
    fn job_id(&self) -> &str {
        &self.reference.job_id
    }

    async fn fetch_rows(&self) -> BigQueryResult<Vec<Row>> {
        self.pages()
            .map_ok(|page| futures::stream::iter(page.json_objects()).map(Ok))
            .try_flatten()
            .try_collect()
            .await
    }

    async fn wait(&self) -> BigQueryResult<Changes> {
        let results = self.poll(None, Some(0)).await?;
        Ok(results.changes(&self.reference.job_id))
    }
}

//
// Wire types
//

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct WireJobReference {
    project_id: String,
    job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WireJobRequest {
    job_reference: WireJobReference,
    configuration: WireJobConfiguration,
}

#[derive(Serialize, Debug)]
struct WireJobConfiguration {
    query: WireQueryConfiguration,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WireQueryConfiguration {
    query: String,
    use_legacy_sql: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WireJobResponse {
    job_reference: WireJobReference,
    status: Option<WireJobStatus>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WireJobStatus {
    // state: String,
    error_result: Option<WireErrorProto>,
}

#[derive(Deserialize, Debug)]
struct WireErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

impl WireErrorProto {
    fn into_error(self, job_id: &str) -> BigQueryError {
        BigQueryError::JobFailed {
            job_id: job_id.to_owned(),
            reason: self.reason,
            message: self.message,
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WireResultsParams<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<u32>,
    timeout_ms: u64,
    #[serde(rename = "formatOptions.useInt64Timestamp")]
    use_int64_timestamp: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WireQueryResults {
    #[serde(default)]
    job_complete: bool,
    schema: Option<Schema>,
    #[serde(default)]
    rows: Vec<WireRow>,
    page_token: Option<String>,
    // total_rows: Option<String>,
    num_dml_affected_rows: Option<String>,
}

impl WireQueryResults {
    fn changes(&self, job_id: &str) -> Changes {
        Changes {
            job_id: job_id.to_owned(),
            affected_rows: self
                .num_dml_affected_rows
                .as_deref()
                .and_then(|rows| rows.parse().ok())
                .unwrap_or(0),
        }
    }
}
