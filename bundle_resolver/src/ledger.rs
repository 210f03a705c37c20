//! Read-only ledger collaborators: offset lookups, transaction metadata, and
//! bundle prefix bytes. Each is a trait so the resolver can be exercised
//! against scripted fixtures; the HTTP implementations speak to the real
//! endpoints with host failover.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use fetch_config::fetch_config;
use http::header::RANGE;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use weave_client::http_client::build_http_client;
use weave_client::{Api, RetryWrapper, WeaveClientError};
use weave_types::{TxOffset, TxTag};

use crate::error::{ResolveError, Result};

/// Metadata of one ledger transaction as reported by the lookup service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxMetadata {
    pub id: String,
    pub parent: Option<String>,
    pub tags: Vec<TxTag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleFormat {
    /// Binary bundle, version 2.x.
    Ans104,
    /// Legacy JSON bundle, version 1.x; has no byte-addressable sub-ranges.
    Ans102,
    Unknown,
}

impl TxMetadata {
    pub fn bundle_format(&self) -> BundleFormat {
        let tag = |name: &str| {
            self.tags
                .iter()
                .find(|t| t.name.eq_ignore_ascii_case(name))
                .map(|t| t.value.as_str())
        };
        match (tag("Bundle-Format"), tag("Bundle-Version")) {
            (Some("binary"), Some(v)) if v.starts_with('2') => BundleFormat::Ans104,
            (Some("json"), Some(v)) if v.starts_with('1') => BundleFormat::Ans102,
            _ => BundleFormat::Unknown,
        }
    }
}

/// Ledger offset lookups. `Ok(None)` is the non-retryable "no such entry"
/// answer (HTTP 404 on the wire).
#[async_trait]
pub trait OffsetSource: Send + Sync {
    async fn tx_offset(&self, id: &str) -> Result<Option<TxOffset>>;
}

/// Transaction metadata lookups (tags, parent bundle id).
#[async_trait]
pub trait TxMetadataSource: Send + Sync {
    async fn tx_metadata(&self, id: &str) -> Result<Option<TxMetadata>>;
}

/// Prefix bytes of the decoded data behind an id; enough to read bundle
/// offset tables without pulling payloads.
#[async_trait]
pub trait BundlePrefixSource: Send + Sync {
    async fn data_prefix(&self, id: &str, len: u64) -> Result<Bytes>;
}

/// `GET {host}/tx/{id}/offset` against a primary host with read-replica
/// failover. The response serializes offsets as decimal strings.
pub struct HttpOffsetSource {
    client: Arc<ClientWithMiddleware>,
    hosts: Vec<String>,
    retry_attempts: usize,
}

impl HttpOffsetSource {
    pub fn new(hosts: Vec<String>) -> Result<Self> {
        Ok(Self {
            client: Arc::new(build_http_client().map_err(ResolveError::Client)?),
            hosts: hosts.into_iter().map(|h| h.trim_end_matches('/').to_string()).collect(),
            retry_attempts: fetch_config().resolver.offset_retry_attempts,
        })
    }

    pub fn with_retry_attempts(mut self, attempts: usize) -> Self {
        self.retry_attempts = attempts;
        self
    }
}

#[async_trait]
impl OffsetSource for HttpOffsetSource {
    async fn tx_offset(&self, id: &str) -> Result<Option<TxOffset>> {
        let mut last_error: Option<WeaveClientError> = None;

        for host in &self.hosts {
            let client = self.client.clone();
            let url = format!("{host}/tx/{id}/offset");

            let result: std::result::Result<TxOffset, WeaveClientError> =
                RetryWrapper::new("ledger::tx_offset")
                    .with_max_attempts(self.retry_attempts)
                    .log_errors_as_info()
                    .run_and_extract_json(move || {
                        client.get(url.clone()).with_extension(Api("ledger::tx_offset")).send()
                    })
                    .await;

            match result {
                Ok(offset) => return Ok(Some(offset)),
                Err(e) if e.is_not_found() => {
                    // The entry does not exist; no point asking the replica.
                    debug!(id, "Ledger offset lookup returned 404");
                    return Ok(None);
                },
                Err(e) => {
                    info!(id, host, "Offset lookup failed, trying next host: {e}");
                    last_error = Some(e);
                },
            }
        }

        match last_error {
            Some(e) => Err(e.into()),
            None => Err(ResolveError::Client(WeaveClientError::InternalError(
                "no offset hosts configured".to_string(),
            ))),
        }
    }
}

const TX_QUERY: &str =
    "query($id: ID!) { transaction(id: $id) { id tags { name value } bundledIn { id } } }";

#[derive(Serialize)]
struct GraphqlRequest<'a> {
    query: &'a str,
    variables: GraphqlVariables<'a>,
}

#[derive(Serialize)]
struct GraphqlVariables<'a> {
    id: &'a str,
}

#[derive(Deserialize)]
struct GraphqlResponse {
    data: Option<GraphqlData>,
}

#[derive(Deserialize)]
struct GraphqlData {
    transaction: Option<GraphqlTx>,
}

#[derive(Deserialize)]
struct GraphqlTx {
    id: String,
    #[serde(default)]
    tags: Vec<TxTag>,
    #[serde(rename = "bundledIn")]
    bundled_in: Option<GraphqlBundle>,
}

#[derive(Deserialize)]
struct GraphqlBundle {
    id: String,
}

/// Transaction lookup over the graphql endpoints, primary then secondary,
/// with a small fixed retry budget per endpoint.
pub struct HttpMetadataSource {
    client: Arc<ClientWithMiddleware>,
    endpoints: Vec<String>,
}

impl HttpMetadataSource {
    pub fn new(endpoints: Vec<String>) -> Result<Self> {
        Ok(Self {
            client: Arc::new(build_http_client().map_err(ResolveError::Client)?),
            endpoints,
        })
    }
}

#[async_trait]
impl TxMetadataSource for HttpMetadataSource {
    async fn tx_metadata(&self, id: &str) -> Result<Option<TxMetadata>> {
        let mut last_error: Option<WeaveClientError> = None;

        for endpoint in &self.endpoints {
            let client = self.client.clone();
            let endpoint_ = endpoint.clone();
            let body = serde_json::to_value(GraphqlRequest {
                query: TX_QUERY,
                variables: GraphqlVariables { id },
            })
            .map_err(|e| ResolveError::BundleFormatError(format!("query serialization: {e}")))?;

            let result: std::result::Result<GraphqlResponse, WeaveClientError> =
                RetryWrapper::new("ledger::tx_metadata")
                    .with_max_attempts(fetch_config().resolver.metadata_retry_attempts)
                    .run_and_extract_json(move || {
                        client
                            .post(endpoint_.clone())
                            .json(&body)
                            .with_extension(Api("ledger::tx_metadata"))
                            .send()
                    })
                    .await;

            match result {
                Ok(resp) => {
                    if let Some(tx) = resp.data.and_then(|d| d.transaction) {
                        return Ok(Some(TxMetadata {
                            id: tx.id,
                            parent: tx.bundled_in.map(|b| b.id),
                            tags: tx.tags,
                        }));
                    }
                    // Known to this endpoint as absent; the secondary may
                    // still have indexed it.
                    debug!(id, endpoint, "Transaction not found on endpoint");
                },
                Err(e) => {
                    info!(id, endpoint, "Metadata lookup failed, trying next endpoint: {e}");
                    last_error = Some(e);
                },
            }
        }

        match last_error {
            Some(e) => Err(e.into()),
            None => Ok(None),
        }
    }
}

/// Ranged reads against a gateway's raw endpoint, for bundle offset tables.
pub struct HttpPrefixSource {
    client: Arc<ClientWithMiddleware>,
    gateway_url: String,
}

impl HttpPrefixSource {
    pub fn new(gateway_url: &str) -> Result<Self> {
        Ok(Self {
            client: Arc::new(build_http_client().map_err(ResolveError::Client)?),
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BundlePrefixSource for HttpPrefixSource {
    async fn data_prefix(&self, id: &str, len: u64) -> Result<Bytes> {
        if len == 0 {
            return Ok(Bytes::new());
        }

        let client = self.client.clone();
        let url = format!("{}/raw/{}", self.gateway_url, id);
        let range = format!("bytes=0-{}", len - 1);

        let bytes = RetryWrapper::new("gateway::data_prefix")
            .run_and_extract_bytes(move || {
                client
                    .get(url.clone())
                    .header(RANGE, range.clone())
                    .with_extension(Api("gateway::data_prefix"))
                    .send()
            })
            .await
            .map_err(ResolveError::Client)?;

        // Some gateways ignore Range and return the whole object.
        if bytes.len() as u64 > len {
            Ok(bytes.slice(..len as usize))
        } else {
            Ok(bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn test_bundle_format_detection() {
        let meta = |format: &str, version: &str| TxMetadata {
            id: "x".into(),
            parent: None,
            tags: vec![
                TxTag {
                    name: "Bundle-Format".into(),
                    value: format.into(),
                },
                TxTag {
                    name: "Bundle-Version".into(),
                    value: version.into(),
                },
            ],
        };

        assert_eq!(meta("binary", "2.0.0").bundle_format(), BundleFormat::Ans104);
        assert_eq!(meta("json", "1.0.0").bundle_format(), BundleFormat::Ans102);
        assert_eq!(meta("binary", "1.0.0").bundle_format(), BundleFormat::Unknown);

        let untagged = TxMetadata {
            id: "x".into(),
            parent: None,
            tags: vec![],
        };
        assert_eq!(untagged.bundle_format(), BundleFormat::Unknown);
    }

    #[tokio::test]
    async fn test_offset_lookup_parses_string_fields() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/tx/abc/offset"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"offset":"1000","size":"200"}"#))
            .mount(&server)
            .await;

        let source = HttpOffsetSource::new(vec![server.uri()]).unwrap();
        let offset = source.tx_offset("abc").await.unwrap().unwrap();
        assert_eq!(offset.offset, 1000);
        assert_eq!(offset.size, 200);
        assert_eq!(offset.start(), 800);
    }

    #[tokio::test]
    async fn test_offset_404_is_none_without_replica_fallback() {
        let primary = MockServer::start().await;
        let replica = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/tx/gone/offset"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&primary)
            .await;

        // The replica must never be consulted for a definitive 404.
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"offset":"9","size":"1"}"#))
            .expect(0)
            .mount(&replica)
            .await;

        let source = HttpOffsetSource::new(vec![primary.uri(), replica.uri()]).unwrap();
        assert!(source.tx_offset("gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_offset_falls_back_to_replica_on_server_error() {
        let primary = MockServer::start().await;
        let replica = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/tx/abc/offset"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&primary)
            .await;

        Mock::given(method("GET"))
            .and(path("/tx/abc/offset"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"offset":"64","size":"32"}"#))
            .mount(&replica)
            .await;

        let source = HttpOffsetSource::new(vec![primary.uri(), replica.uri()])
            .unwrap()
            .with_retry_attempts(0);
        let offset = source.tx_offset("abc").await.unwrap().unwrap();
        assert_eq!(offset.offset, 64);
    }

    #[tokio::test]
    async fn test_metadata_secondary_endpoint_consulted() {
        let primary = MockServer::start().await;
        let secondary = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data":{"transaction":null}}"#))
            .mount(&primary)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"data":{"transaction":{"id":"abc","tags":[{"name":"Bundle-Format","value":"binary"}],"bundledIn":{"id":"outer"}}}}"#,
            ))
            .mount(&secondary)
            .await;

        let source = HttpMetadataSource::new(vec![primary.uri(), secondary.uri()]).unwrap();
        let meta = source.tx_metadata("abc").await.unwrap().unwrap();
        assert_eq!(meta.id, "abc");
        assert_eq!(meta.parent.as_deref(), Some("outer"));
        assert_eq!(meta.tags.len(), 1);
    }

    #[tokio::test]
    async fn test_metadata_absent_everywhere_is_none() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data":{"transaction":null}}"#))
            .mount(&server)
            .await;

        let source = HttpMetadataSource::new(vec![server.uri(), server.uri()]).unwrap();
        assert!(source.tx_metadata("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prefix_requests_byte_range() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/raw/bundle1"))
            .and(header("range", "bytes=0-31"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![7u8; 32]))
            .expect(1)
            .mount(&server)
            .await;

        let source = HttpPrefixSource::new(&server.uri()).unwrap();
        let bytes = source.data_prefix("bundle1", 32).await.unwrap();
        assert_eq!(bytes.len(), 32);
    }

    #[tokio::test]
    async fn test_prefix_truncates_full_object_responses() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/raw/bundle2"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8; 100]))
            .mount(&server)
            .await;

        let source = HttpPrefixSource::new(&server.uri()).unwrap();
        let bytes = source.data_prefix("bundle2", 10).await.unwrap();
        assert_eq!(bytes.len(), 10);
    }
}
