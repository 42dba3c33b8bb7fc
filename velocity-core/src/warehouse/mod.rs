//! BigQuery REST client

pub mod auth;

use crate::aggregator::VelocitySource;
use crate::config::Config;
use crate::record::RawRow;
use crate::VelocityError;
use async_trait::async_trait;
use auth::{Credentials, TokenProvider};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info};

/// Server-side wait per `jobs.query` / `jobs.getQueryResults` call.
const QUERY_WAIT_MS: u64 = 10_000;

/// Fully qualified `project.dataset.table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub project_id: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        project_id: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset, self.table)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type", default)]
    field_type: String,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// Warehouse handle. Build once at startup and share.
pub struct BigQueryClient {
    http: reqwest::Client,
    api_base: String,
    table: TableRef,
    location: Option<String>,
    tokens: TokenProvider,
}

impl std::fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("api_base", &self.api_base)
            .field("table", &self.table)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl BigQueryClient {
    /// Build a client from config. Credential problems surface here, not on first query.
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        config.validate()?;
        let key_file = std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from);
        let credentials = Credentials::resolve(&config.warehouse, key_file.as_deref())?;
        Self::with_credentials(config, credentials)
    }

    pub fn with_credentials(config: &Config, credentials: Credentials) -> crate::Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout_duration())
            .build()
            .map_err(VelocityError::configuration)?;
        let wh = &config.warehouse;

        Ok(Self {
            tokens: TokenProvider::new(http.clone(), credentials),
            http,
            api_base: wh.api_base.trim_end_matches('/').to_string(),
            table: TableRef::new(&wh.project_id, &wh.dataset, &wh.table),
            location: wh.location.clone(),
        })
    }

    fn queries_url(&self) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/queries",
            self.api_base, self.table.project_id
        )
    }

    /// POST jobs.query
    async fn start_query(&self, sql: &str) -> crate::Result<QueryResponse> {
        let mut body = json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": QUERY_WAIT_MS,
            "formatOptions": { "useInt64Timestamp": true },
        });
        if let Some(location) = &self.location {
            body["location"] = json!(location);
        }

        let token = self.tokens.bearer().await?;
        let response = self
            .http
            .post(self.queries_url())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| VelocityError::DataSource(format!("failed to submit query: {}", e)))?;
        Self::decode(response).await
    }

    /// GET jobs.getQueryResults
    async fn query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> crate::Result<QueryResponse> {
        let wait = QUERY_WAIT_MS.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("timeoutMs", wait.as_str()),
            ("formatOptions.useInt64Timestamp", "true"),
        ];
        if let Some(location) = job.location.as_deref().or(self.location.as_deref()) {
            params.push(("location", location));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let token = self.tokens.bearer().await?;
        let response = self
            .http
            .get(format!("{}/{}", self.queries_url(), job.job_id))
            .bearer_auth(token)
            .query(&params)
            .send()
            .await
            .map_err(|e| VelocityError::DataSource(format!("failed to fetch results: {}", e)))?;
        Self::decode(response).await
    }

    async fn decode(response: reqwest::Response) -> crate::Result<QueryResponse> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|body| body.error.message)
                .unwrap_or(text);
            return Err(VelocityError::DataSource(format!(
                "BigQuery request failed with status {}: {}",
                status, message
            )));
        }
        response
            .json::<QueryResponse>()
            .await
            .map_err(|e| VelocityError::DataSource(format!("failed to parse BigQuery response: {}", e)))
    }

    /// Run `sql` to completion, following result pages.
    pub async fn run_query(&self, sql: &str) -> crate::Result<Vec<RawRow>> {
        debug!(sql, "executing warehouse query");
        let mut response = self.start_query(sql).await?;
        let mut job = response.job_reference.clone();
        let mut schema: Option<TableSchema> = None;
        let mut rows = Vec::new();

        loop {
            if response.job_reference.is_some() {
                job = response.job_reference.clone();
            }
            let job_ref = || {
                job.as_ref().ok_or_else(|| {
                    VelocityError::DataSource("BigQuery response carried no job reference".to_string())
                })
            };

            if !response.job_complete {
                response = self.query_results(job_ref()?, None).await?;
                continue;
            }

            if schema.is_none() {
                schema = response.schema.take();
            }
            let fields = schema.as_ref().map(|s| s.fields.as_slice()).unwrap_or(&[]);
            rows.extend(response.rows.drain(..).map(|row| to_raw_row(fields, row)));

            match response.page_token.take() {
                Some(token) => response = self.query_results(job_ref()?, Some(&token)).await?,
                None => break,
            }
        }

        info!(rows = rows.len(), table = %self.table, "warehouse query complete");
        Ok(rows)
    }
}

#[async_trait]
impl VelocitySource for BigQueryClient {
    async fn fetch_rows(&self, sql: &str) -> crate::Result<Vec<RawRow>> {
        self.run_query(sql).await
    }

    fn table(&self) -> &TableRef {
        &self.table
    }
}

fn to_raw_row(fields: &[FieldSchema], row: TableRow) -> RawRow {
    fields
        .iter()
        .zip(row.f)
        .map(|(field, cell)| {
            let value = match (field.field_type.as_str(), cell.v) {
                ("TIMESTAMP", Value::String(raw)) => {
                    Value::String(timestamp_to_rfc3339(&raw).unwrap_or(raw))
                }
                (_, v) => v,
            };
            (field.name.clone(), value)
        })
        .collect()
}

/// BigQuery TIMESTAMP cells are epoch microseconds (int64 format) or epoch
/// seconds as a float string (legacy format).
fn timestamp_to_rfc3339(raw: &str) -> Option<String> {
    let nanos = match raw.parse::<i64>() {
        Ok(micros) => i128::from(micros) * 1_000,
        Err(_) => {
            let secs = raw.parse::<f64>().ok().filter(|s| s.is_finite())?;
            (secs * 1e9).round() as i128
        }
    };
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()?
        .format(&Rfc3339)
        .ok()
}
