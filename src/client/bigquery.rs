//! BigQuery REST client
//!
//! Runs queries through `jobs.query`, waits for the job to finish, follows
//! `pageToken` pagination via `jobs.getQueryResults`, and returns the complete
//! result set as a [`Table`].

use super::auth::{AccessToken, BIGQUERY_SCOPE, Credentials};
use crate::etl::QueryService;
use crate::table::{Table, TableSchema};

use chrono::{Duration, Utc};
use eyre::{Context, OptionExt, Result, eyre};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;

/// Default BigQuery REST endpoint
pub const DEFAULT_API_URL: &str = "https://bigquery.googleapis.com/bigquery/v2/";

/// Long-poll duration for each `jobs.query` / `jobs.getQueryResults` call
const POLL_TIMEOUT_MS: u64 = 10_000;
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    format_options: FormatOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FormatOptions {
    use_int64_timestamp: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    message: String,
}

/// Shared shape of `jobs.query` and `jobs.getQueryResults` responses
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    rows: Vec<Value>,
    #[serde(default)]
    page_token: Option<String>,
    #[serde(default)]
    total_rows: Option<String>,
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

impl QueryResponse {
    fn log_job_errors(&self) {
        for error in &self.errors {
            log::warn!(
                "BigQuery reported {}: {}",
                error.reason.as_deref().unwrap_or("an issue"),
                error.message
            );
        }
    }
}

#[derive(Deserialize)]
struct GoogleErrorBody {
    error: GoogleError,
}

#[derive(Deserialize)]
struct GoogleError {
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Turn a failed HTTP response into an error carrying Google's message
fn api_error(status: StatusCode, body: &str) -> eyre::Report {
    match serde_json::from_str::<GoogleErrorBody>(body) {
        Ok(GoogleErrorBody { error }) => match error.status {
            Some(kind) => eyre!(
                "BigQuery request failed ({}, {}): {}",
                status,
                kind,
                error.message
            ),
            None => eyre!("BigQuery request failed ({}): {}", status, error.message),
        },
        Err(_) => eyre!("BigQuery request failed ({}): {}", status, body.trim()),
    }
}

/// BigQuery client bound to a billing project
///
/// # Example
/// ```no_run
/// use bqdump::client::{BigQueryClient, Credentials, DEFAULT_API_URL};
/// use url::Url;
///
/// # async fn example() -> eyre::Result<()> {
/// let credentials = Credentials::from_file("credentials.json")?;
/// let client = BigQueryClient::try_new(Url::parse(DEFAULT_API_URL)?, credentials, "my-project")?;
/// let table = client
///     .query("SELECT * FROM `bigquery-public-data.thelook_ecommerce.orders`")
///     .await?;
/// println!("{} rows", table.num_rows());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BigQueryClient {
    http: Client,
    url: Url,
    project: String,
    location: Option<String>,
    page_size: Option<u32>,
    credentials: Credentials,
    token: Arc<Mutex<Option<AccessToken>>>,
}

impl BigQueryClient {
    /// Create a client for the given API base URL, credentials and billing project
    ///
    /// # Errors
    /// Returns an error if the project is empty, the URL can't be used as a
    /// base, or the HTTP client can't be built.
    pub fn try_new(
        mut url: Url,
        credentials: Credentials,
        project: impl Into<String>,
    ) -> Result<Self> {
        let project = project.into();
        if project.trim().is_empty() {
            eyre::bail!("BigQuery billing project must not be empty");
        }
        if url.cannot_be_a_base() {
            eyre::bail!("Invalid BigQuery API URL: {}", url);
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        let http = Client::builder()
            .user_agent(concat!("bqdump/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            url,
            project,
            location: None,
            page_size: None,
            credentials,
            token: Arc::new(Mutex::new(None)),
        })
    }

    /// Run jobs in a specific location (e.g. `US`, `EU`)
    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    /// Limit the number of rows returned per result page
    pub fn with_page_size(mut self, page_size: Option<u32>) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Build an endpoint URL from path segments, percent-encoding each one
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.url.clone();
        url.path_segments_mut()
            .map_err(|_| eyre!("Invalid BigQuery API URL: {}", self.url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Current access token, refreshed when close to expiry
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.expires_within(Duration::seconds(TOKEN_REFRESH_MARGIN_SECS), Utc::now()) {
                return Ok(token.token.clone());
            }
            log::debug!("Access token expiring, refreshing");
        }

        let token = self
            .credentials
            .fetch_token(&self.http, BIGQUERY_SCOPE)
            .await
            .context("Failed to obtain BigQuery access token")?;
        let value = token.token.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Authenticate and send a request, decoding a JSON response
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| eyre!("Failed to send request: {}", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read BigQuery response")?;
        log::trace!("BigQuery response ({}): {} bytes", status, body.len());

        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        serde_json::from_str(&body).context("Failed to parse BigQuery response")
    }

    /// Verify authentication by fetching metadata for a dataset
    pub async fn test_connection(&self, project: &str, dataset: &str) -> Result<Value> {
        let url = self.endpoint(&["projects", project, "datasets", dataset])?;
        self.send(self.http.get(url))
            .await
            .with_context(|| format!("Failed to access dataset {}.{}", project, dataset))
    }

    /// Run a standard SQL query and collect every result row
    ///
    /// # Errors
    /// Returns an error on authentication failure, an invalid query, a missing
    /// table, network failure, or an unexpected response shape. Nothing is
    /// retried.
    pub async fn query(&self, sql: &str) -> Result<Table> {
        log::debug!("Running query: {}", sql);
        let url = self.endpoint(&["projects", &self.project, "queries"])?;
        let request = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            timeout_ms: POLL_TIMEOUT_MS,
            max_results: self.page_size,
            location: self.location.as_deref(),
            format_options: FormatOptions {
                use_int64_timestamp: true,
            },
        };

        let mut response: QueryResponse = self.send(self.http.post(url).json(&request)).await?;
        response.log_job_errors();

        if !response.job_complete {
            let job = response
                .job_reference
                .clone()
                .ok_or_eyre("Incomplete query response is missing its job reference")?;
            while !response.job_complete {
                log::debug!("Waiting for job {} to complete", job.job_id);
                response = self.get_query_results(&job, None).await?;
                response.log_job_errors();
            }
        }

        let schema = response.schema.take().unwrap_or_default();
        let mut table = Table::from_bigquery(&schema, &response.rows)?;
        let job = response.job_reference.take();
        let mut page_token = response.page_token.take();
        if let Some(total) = &response.total_rows {
            log::debug!("Query produced {} rows", total);
        }

        while let Some(token) = page_token {
            let job = job
                .as_ref()
                .ok_or_eyre("Paged query response is missing its job reference")?;
            log::debug!(
                "Fetching next page of job {} ({} rows so far)",
                job.job_id,
                table.num_rows()
            );
            let page = self.get_query_results(job, Some(token.as_str())).await?;
            page.log_job_errors();
            table.extend(Table::from_bigquery(&schema, &page.rows)?)?;
            page_token = page.page_token;
        }

        Ok(table)
    }

    async fn get_query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse> {
        let url = self.endpoint(&["projects", &job.project_id, "queries", &job.job_id])?;
        let mut params = vec![
            ("timeoutMs", POLL_TIMEOUT_MS.to_string()),
            ("formatOptions.useInt64Timestamp", "true".to_string()),
        ];
        if let Some(location) = job.location.as_ref().or(self.location.as_ref()) {
            params.push(("location", location.clone()));
        }
        if let Some(page_size) = self.page_size {
            params.push(("maxResults", page_size.to_string()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        self.send(self.http.get(url).query(&params))
            .await
            .with_context(|| format!("Failed to fetch results of job {}", job.job_id))
    }
}

impl QueryService for BigQueryClient {
    async fn execute(&self, query: &str) -> Result<Table> {
        self.query(query).await
    }
}
