use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fetch_config::fetch_config;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

use crate::error::{Result, WeaveClientError};
use crate::http_client::{build_limited_redirect_http_client, build_redirectless_http_client, Api};
use crate::ByteStream;

/// Whole-object fetch through a public gateway, for items the chunk path
/// cannot serve (json bundles, undiscoverable offsets).
///
/// `GET /raw/{id}` is tried first with redirects disabled; any failure there
/// falls back to `GET /{id}` under a bounded redirect budget. The body is
/// wrapped in an inactivity guard: a stall before `min_viable_bytes` have
/// arrived is a no-data error, a stall after that closes the stream as a
/// usable partial object.
pub struct GatewayStream {
    gateway_url: String,
    raw_client: Arc<ClientWithMiddleware>,
    redirect_client: Arc<ClientWithMiddleware>,
    inactivity_timeout: Duration,
    min_viable_bytes: u64,
}

impl GatewayStream {
    pub fn new(gateway_url: &str) -> Result<Self> {
        let config = &fetch_config().gateway;
        Ok(Self {
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            raw_client: Arc::new(build_redirectless_http_client()?),
            redirect_client: Arc::new(build_limited_redirect_http_client(config.max_redirects)?),
            inactivity_timeout: config.inactivity_timeout,
            min_viable_bytes: config.min_viable_bytes,
        })
    }

    #[instrument(skip(self))]
    pub async fn open(&self, id: &str) -> Result<ByteStream> {
        let raw_url = format!("{}/raw/{}", self.gateway_url, id);
        let raw_resp = self
            .raw_client
            .get(&raw_url)
            .with_extension(Api("gateway::get_raw"))
            .send()
            .await;

        let resp = match raw_resp {
            Ok(resp) if resp.status() == StatusCode::OK => resp,
            other => {
                match other {
                    Ok(resp) => debug!(status = %resp.status(), "Raw endpoint unusable, trying the gateway path"),
                    Err(e) => debug!("Raw endpoint request failed, trying the gateway path: {e}"),
                }
                let url = format!("{}/{}", self.gateway_url, id);
                let resp = self
                    .redirect_client
                    .get(&url)
                    .with_extension(Api("gateway::get"))
                    .send()
                    .await?;
                if resp.status() != StatusCode::OK {
                    return Err(WeaveClientError::StatusError(resp.status()));
                }
                resp
            },
        };

        let body = resp.bytes_stream().map(|r| r.map_err(WeaveClientError::from));
        Ok(inactivity_guard(body, self.inactivity_timeout, self.min_viable_bytes))
    }
}

/// Wrap `body` so each read is bounded by `inactivity_timeout`. On a stall
/// the stream errors with [`WeaveClientError::NoData`] if fewer than
/// `min_viable_bytes` arrived, and otherwise ends cleanly.
pub fn inactivity_guard<S>(body: S, inactivity_timeout: Duration, min_viable_bytes: u64) -> ByteStream
where
    S: Stream<Item = Result<Bytes>> + Unpin + Send + 'static,
{
    futures::stream::unfold((body, 0u64, false), move |(mut body, received, done)| async move {
        if done {
            return None;
        }
        match timeout(inactivity_timeout, body.next()).await {
            Err(_) => {
                if received < min_viable_bytes {
                    Some((Err(WeaveClientError::NoData), (body, received, true)))
                } else {
                    info!(received, "Gateway stream stalled past the viability floor; closing as a partial object");
                    None
                }
            },
            Ok(None) => None,
            Ok(Some(Err(e))) => Some((Err(e), (body, received, true))),
            Ok(Some(Ok(segment))) => {
                let received = received + segment.len() as u64;
                Some((Ok(segment), (body, received, false)))
            },
        }
    })
    .boxed()
}
