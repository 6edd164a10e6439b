//! InfluxDB HTTP client.
//!
//! [`Client`] owns the pipeline entry points: `fetch_flux` / `fetch_influxql`
//! decode query responses into [`Series`], `write_series` /
//! `write_series_v1` encode series into batched line-protocol writes. The
//! internal time unit and its wire precision are fixed at construction;
//! every invocation gets its own sink, nothing is shared across calls.

use std::pin::Pin;

use async_stream::stream;
use futures::{Stream, TryStreamExt};
use reqwest::{Method, Url};
use serde::Serialize;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fetch::{self, FluxDecoder, QueryResponse};
use crate::parser::AnnotatedCsvParser;
use crate::series::Series;
use crate::time::{Precision, TimeUnit};
use crate::types::FluxRecord;
use crate::write::{self, WriteOptions, WriteSink};

/// Authentication for the target database: a 2.x API token, or a
/// username/password pair (1.x, or 2.x compatibility endpoints).
#[derive(Clone, Debug)]
pub enum Credentials {
    /// API token (`Authorization: Token ...`).
    Token(String),
    /// Username and password (HTTP basic auth).
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
}

impl Credentials {
    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Credentials::Token(token) => {
                request.header("Authorization", format!("Token {}", token))
            }
            Credentials::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
        }
    }
}

/// InfluxDB client for one configured server, organization and time unit.
#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    base_url: Url,
    org: String,
    credentials: Credentials,
    unit: TimeUnit,
    precision: Precision,
}

/// Query payload for the 2.x query API.
#[derive(Debug, Serialize)]
struct QueryPayload {
    query: String,
    #[serde(rename = "type")]
    query_type: String,
    dialect: QueryDialect,
}

/// CSV dialect settings for query responses.
#[derive(Debug, Serialize)]
struct QueryDialect {
    annotations: Vec<String>,
    #[serde(rename = "commentPrefix")]
    comment_prefix: String,
    #[serde(rename = "dateTimeFormat")]
    date_time_format: String,
    delimiter: String,
    header: bool,
}

impl Default for QueryDialect {
    fn default() -> Self {
        Self {
            annotations: vec![
                "datatype".to_string(),
                "group".to_string(),
                "default".to_string(),
            ],
            comment_prefix: "#".to_string(),
            date_time_format: "RFC3339".to_string(),
            delimiter: ",".to_string(),
            header: true,
        }
    }
}

impl QueryPayload {
    fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            query_type: "flux".to_string(),
            dialect: QueryDialect::default(),
        }
    }
}

impl Client {
    /// Create a new client.
    ///
    /// Fails with [`Error::Config`] when the URL does not parse or the
    /// internal time unit has no matching wire precision. Both checks run
    /// here, once, never per point.
    pub fn new(
        url: impl Into<String>,
        org: impl Into<String>,
        credentials: Credentials,
        unit: TimeUnit,
    ) -> Result<Self> {
        Self::with_http_client(reqwest::Client::new(), url, org, credentials, unit)
    }

    /// Create a client with a custom reqwest client.
    ///
    /// This is where HTTP timeouts, proxies and TLS settings are configured.
    pub fn with_http_client(
        http: reqwest::Client,
        url: impl Into<String>,
        org: impl Into<String>,
        credentials: Credentials,
        unit: TimeUnit,
    ) -> Result<Self> {
        let url_str = url.into();
        let base_url = Url::parse(&url_str)
            .map_err(|e| Error::Config(format!("invalid InfluxDB URL '{}': {}", url_str, e)))?;
        let precision = unit.wire_precision()?;

        Ok(Self {
            http,
            base_url,
            org: org.into(),
            credentials,
            unit,
            precision,
        })
    }

    /// Get the base URL.
    pub fn url(&self) -> &Url {
        &self.base_url
    }

    /// Get the organization name.
    pub fn org(&self) -> &str {
        &self.org
    }

    /// The internal time unit this client converts from and to.
    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// The wire precision matching the internal unit.
    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Build the full URL for an API endpoint.
    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(path);
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    /// Issue a Flux query and return the streaming CSV response.
    async fn send_flux_query(&self, query: String) -> Result<reqwest::Response> {
        let endpoint = self.endpoint("/api/v2/query", &[]);
        let payload = QueryPayload::new(query);
        let body = serde_json::to_string(&payload)?;

        let request = self
            .http
            .request(Method::POST, endpoint)
            .header("Accept", "application/csv")
            .header("Content-Type", "application/json")
            .query(&[("org", &self.org)])
            .body(body);

        Ok(self
            .credentials
            .apply(request)
            .send()
            .await?
            .error_for_status()?)
    }

    /// Execute a Flux query and return raw records as an async stream.
    ///
    /// This is the low-level access path: records are yielded one at a time
    /// without grouping into series, so arbitrarily large result sets can be
    /// processed with constant memory.
    pub async fn query_stream(
        &self,
        query: impl Into<String>,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<FluxRecord>> + Send>>> {
        let response = self.send_flux_query(query.into()).await?;
        let reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        let mut parser = AnnotatedCsvParser::new(reader);

        let s = stream! {
            loop {
                match parser.next().await {
                    Ok(Some(record)) => yield Ok(record),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(s))
    }

    /// Execute a Flux query and decode the grouped tables into series.
    ///
    /// Labels come from each table's group key (window bounds excluded) plus
    /// a synthetic table-index label; timestamps are converted to the
    /// internal unit. All-or-nothing: any failure returns an
    /// [`Error::Fetch`] and no series.
    pub async fn fetch_flux(&self, query: impl Into<String>) -> Result<Vec<Series>> {
        self.fetch_flux_inner(query.into())
            .await
            .map_err(|e| e.into_fetch("flux query"))
    }

    async fn fetch_flux_inner(&self, query: String) -> Result<Vec<Series>> {
        let response = self.send_flux_query(query).await?;
        let reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        let mut parser = AnnotatedCsvParser::new(reader);
        let mut decoder = FluxDecoder::new(self.unit)?;

        while let Some(record) = parser.next().await? {
            let meta = parser.table().ok_or_else(|| {
                Error::MissingAnnotation("record without table metadata".to_string())
            })?;
            decoder.push(meta, &record)?;
        }

        let series = decoder.finish();
        debug!(series = series.len(), "flux fetch complete");
        Ok(series)
    }

    /// Execute an InfluxQL query (1.x) and decode the wide rows into series,
    /// one inner list per query statement.
    ///
    /// Timestamps are requested as nanoseconds (`epoch=ns`) and converted to
    /// the internal unit. All-or-nothing, like [`Client::fetch_flux`].
    pub async fn fetch_influxql(
        &self,
        db: &str,
        query: impl Into<String>,
    ) -> Result<Vec<Vec<Series>>> {
        self.fetch_influxql_inner(db, query.into())
            .await
            .map_err(|e| e.into_fetch("influxql query"))
    }

    async fn fetch_influxql_inner(&self, db: &str, query: String) -> Result<Vec<Vec<Series>>> {
        let endpoint = self.endpoint("/query", &[("db", db), ("epoch", "ns"), ("q", &query)]);
        let request = self.http.request(Method::POST, endpoint);
        let response: QueryResponse = self
            .credentials
            .apply(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        fetch::decode_influxql(response, self.unit)
    }

    /// Write series through the 2.x endpoint with one shared batch writer.
    ///
    /// The batch size from `opts` is clamped to
    /// [`crate::write::MAX_BATCH_SIZE`]; the writer is flushed and closed on
    /// every exit path. Batches flushed before a failure stay applied.
    pub async fn write_series(
        &self,
        bucket: &str,
        series: &[Series],
        opts: &WriteOptions,
    ) -> Result<()> {
        let sink = self.sink(
            "/api/v2/write",
            &[
                ("org", self.org.as_str()),
                ("bucket", bucket),
                ("precision", self.precision.as_str()),
            ],
        );
        write::write_batched(sink, series, opts, self.unit, self.precision).await
    }

    /// Write series through the 1.x endpoint, one batch per series.
    pub async fn write_series_v1(
        &self,
        db: &str,
        series: &[Series],
        opts: &WriteOptions,
    ) -> Result<()> {
        // The 1.x path always writes nanosecond timestamps.
        let mut sink = self.sink("/write", &[("db", db), ("precision", "ns")]);
        write::write_per_series(&mut sink, series, opts, self.unit).await
    }

    /// Build the write sink for one invocation.
    fn sink(&self, path: &str, params: &[(&str, &str)]) -> HttpSink {
        HttpSink {
            http: self.http.clone(),
            endpoint: self.endpoint(path, params),
            credentials: self.credentials.clone(),
        }
    }
}

/// Write sink submitting line-protocol bodies over HTTP.
///
/// One sink per pipeline invocation; never reused across calls.
struct HttpSink {
    http: reqwest::Client,
    endpoint: Url,
    credentials: Credentials,
}

impl WriteSink for HttpSink {
    async fn send(&mut self, body: String) -> Result<()> {
        let request = self
            .http
            .request(Method::POST, self.endpoint.clone())
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body);
        self.credentials
            .apply(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_url() {
        let err = Client::new(
            "not a url",
            "org",
            Credentials::Token("t".to_string()),
            TimeUnit::MICROSECONDS,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_new_rejects_unmappable_time_unit() {
        let err = Client::new(
            "http://localhost:8086",
            "org",
            Credentials::Token("t".to_string()),
            TimeUnit::new(60),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_precision_follows_unit() {
        for (unit, precision) in [
            (TimeUnit::NANOSECONDS, Precision::Nanoseconds),
            (TimeUnit::MICROSECONDS, Precision::Microseconds),
            (TimeUnit::MILLISECONDS, Precision::Milliseconds),
        ] {
            let client = Client::new(
                "http://localhost:8086",
                "org",
                Credentials::Token("t".to_string()),
                unit,
            )
            .unwrap();
            assert_eq!(client.precision(), precision);
        }
    }

    #[test]
    fn test_endpoint_building() {
        let client = Client::new(
            "http://localhost:8086",
            "my-org",
            Credentials::Basic {
                username: "u".to_string(),
                password: "p".to_string(),
            },
            TimeUnit::MICROSECONDS,
        )
        .unwrap();

        let url = client.endpoint("/api/v2/write", &[("bucket", "b"), ("precision", "us")]);
        assert_eq!(
            url.as_str(),
            "http://localhost:8086/api/v2/write?bucket=b&precision=us"
        );
    }
}
