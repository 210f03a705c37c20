use fetch_config::fetch_config;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};

use crate::error::Result;

/// Request extension naming the logical API an HTTP call belongs to, e.g.
/// `Api("node::get_chunk")`. Shows up in middleware hooks and makes traces
/// greppable by endpoint rather than by URL.
#[derive(Debug, Clone, Copy)]
pub struct Api(pub &'static str);

fn base_builder() -> reqwest::ClientBuilder {
    let config = &fetch_config().client;
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .user_agent(config.user_agent.clone())
}

/// Client for request/response exchanges (offset and metadata lookups).
/// Retries are driven by [`RetryWrapper`](crate::retry_wrapper::RetryWrapper)
/// at the call site, so no retry middleware is layered here.
pub fn build_http_client() -> Result<ClientWithMiddleware> {
    let client = base_builder().timeout(fetch_config().client.request_timeout).build()?;
    Ok(ClientBuilder::new(client).build())
}

/// Client for long-lived streaming responses. No overall request timeout;
/// liveness is enforced per-read by the stream adapters.
pub fn build_streaming_http_client() -> Result<ClientWithMiddleware> {
    let client = base_builder().build()?;
    Ok(ClientBuilder::new(client).build())
}

/// Streaming client that refuses to follow redirects. Used for endpoints
/// where a redirect response changes which fallback path we take.
pub fn build_redirectless_http_client() -> Result<ClientWithMiddleware> {
    let client = base_builder().redirect(reqwest::redirect::Policy::none()).build()?;
    Ok(ClientBuilder::new(client).build())
}

/// Streaming client following at most `max_redirects` hops.
pub fn build_limited_redirect_http_client(max_redirects: usize) -> Result<ClientWithMiddleware> {
    let client = base_builder()
        .redirect(reqwest::redirect::Policy::limited(max_redirects))
        .build()?;
    Ok(ClientBuilder::new(client).build())
}
