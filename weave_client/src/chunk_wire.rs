use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fetch_config::fetch_config;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use tokio::time::timeout;

use crate::error::{Result, WeaveClientError};
use crate::http_client::{build_streaming_http_client, Api};
use crate::ByteStream;

/// One framed chunk response: the payload size declared by the node's length
/// header, and a stream yielding exactly that many bytes.
pub struct ChunkFetch {
    pub size: u64,
    pub payload: ByteStream,
}

/// Client for the data node `GET /chunk2/{offset}` endpoint. Responses are
/// requested unpacked and framed with a 3 byte big-endian length prefix, so
/// the true chunk size is known before the payload body completes.
pub struct ChunkWireClient {
    http_client: Arc<ClientWithMiddleware>,
    request_timeout: Duration,
    idle_timeout: Duration,
}

impl ChunkWireClient {
    pub fn new() -> Result<Self> {
        let config = &fetch_config().stream;
        Ok(Self {
            http_client: Arc::new(build_streaming_http_client()?),
            request_timeout: config.chunk_request_timeout,
            idle_timeout: config.chunk_idle_timeout,
        })
    }

    /// Fetch the chunk whose first byte sits at the 1-based ledger offset
    /// `offset`. Callers holding a 0-based chunk start pass `start + 1`.
    ///
    /// Resolves once the length header is in hand; the payload continues
    /// streaming behind the returned [`ChunkFetch`].
    pub async fn fetch_chunk(&self, node_url: &str, offset: u64) -> Result<ChunkFetch> {
        let url = format!("{}/chunk2/{}", node_url.trim_end_matches('/'), offset);

        let request = self
            .http_client
            .get(&url)
            .header("x-packing", "unpacked")
            .with_extension(Api("node::get_chunk"))
            .send();

        let resp = timeout(self.request_timeout, request)
            .await
            .map_err(|_| WeaveClientError::ChunkTimeout(self.request_timeout))??;

        if resp.status() != StatusCode::OK {
            return Err(WeaveClientError::StatusError(resp.status()));
        }

        let body = resp.bytes_stream().map(|r| r.map_err(WeaveClientError::from));
        frame_chunk_stream(body, self.idle_timeout).await
    }
}

/// Parse the 3 byte big-endian length header off the front of `body` and wrap
/// the remainder as a payload stream that yields exactly that many bytes.
///
/// The header may arrive split across any number of body segments. Bytes past
/// the declared size are discarded without waiting for the connection to
/// close; a body that ends early surfaces [`WeaveClientError::TruncatedChunkPayload`].
/// Every read is guarded by `idle_timeout`.
pub async fn frame_chunk_stream<S>(mut body: S, idle_timeout: Duration) -> Result<ChunkFetch>
where
    S: Stream<Item = Result<Bytes>> + Unpin + Send + 'static,
{
    let mut header = [0u8; 3];
    let mut have = 0usize;
    let mut leftover = Bytes::new();

    while have < 3 {
        let next = timeout(idle_timeout, body.next())
            .await
            .map_err(|_| WeaveClientError::ChunkTimeout(idle_timeout))?;
        let segment = match next {
            Some(segment) => segment?,
            None => return Err(WeaveClientError::TruncatedChunkHeader),
        };

        let take = (3 - have).min(segment.len());
        header[have..have + take].copy_from_slice(&segment[..take]);
        have += take;
        if take < segment.len() {
            // Only reachable once the header is complete.
            leftover = segment.slice(take..);
        }
    }

    let size = ((header[0] as u64) << 16) | ((header[1] as u64) << 8) | header[2] as u64;

    if leftover.len() as u64 > size {
        leftover = leftover.slice(..size as usize);
    }
    let remaining = size - leftover.len() as u64;
    let initial = if leftover.is_empty() { None } else { Some(leftover) };

    let payload = futures::stream::unfold(
        (body, remaining, initial),
        move |(mut body, mut remaining, mut initial)| async move {
            if let Some(segment) = initial.take() {
                return Some((Ok(segment), (body, remaining, None)));
            }
            if remaining == 0 {
                return None;
            }
            loop {
                let next = match timeout(idle_timeout, body.next()).await {
                    Err(_) => return Some((Err(WeaveClientError::ChunkTimeout(idle_timeout)), (body, 0, None))),
                    Ok(next) => next,
                };
                match next {
                    None => {
                        let err = WeaveClientError::TruncatedChunkPayload {
                            expected: size,
                            received: size - remaining,
                        };
                        return Some((Err(err), (body, 0, None)));
                    },
                    Some(Err(e)) => return Some((Err(e), (body, 0, None))),
                    Some(Ok(segment)) => {
                        if segment.is_empty() {
                            continue;
                        }
                        let take = remaining.min(segment.len() as u64) as usize;
                        let out = segment.slice(..take);
                        remaining -= take as u64;
                        return Some((Ok(out), (body, remaining, None)));
                    },
                }
            }
        },
    );

    Ok(ChunkFetch {
        size,
        payload: payload.boxed(),
    })
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const IDLE: Duration = Duration::from_secs(5);

    fn body_from(segments: Vec<Vec<u8>>) -> impl Stream<Item = Result<Bytes>> + Unpin + Send + 'static {
        stream::iter(segments.into_iter().map(|s| Ok(Bytes::from(s))))
    }

    fn framed(size: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![(size >> 16) as u8, (size >> 8) as u8, size as u8];
        out.extend_from_slice(payload);
        out
    }

    async fn collect(mut payload: ByteStream) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(segment) = payload.next().await {
            out.extend_from_slice(&segment?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_frame_single_segment() {
        let data: Vec<u8> = (0..=255u8).collect();
        let fetch = frame_chunk_stream(body_from(vec![framed(256, &data)]), IDLE).await.unwrap();

        assert_eq!(fetch.size, 256);
        assert_eq!(collect(fetch.payload).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_frame_header_split_across_reads() {
        // Header bytes 0x00 0x01 0x00 = 256, delivered one byte at a time
        // with the payload tail attached to the last header segment.
        let data: Vec<u8> = (0..=255u8).collect();
        let mut last = vec![0x00u8];
        last.extend_from_slice(&data[..100]);
        let segments = vec![vec![0x00], vec![0x01], last, data[100..].to_vec()];

        let fetch = frame_chunk_stream(body_from(segments), IDLE).await.unwrap();
        assert_eq!(fetch.size, 256);
        assert_eq!(collect(fetch.payload).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_frame_discards_bytes_past_declared_size() {
        let mut body = framed(4, b"abcd");
        body.extend_from_slice(b"zzzzzz");

        let fetch = frame_chunk_stream(body_from(vec![body]), IDLE).await.unwrap();
        assert_eq!(fetch.size, 4);
        assert_eq!(collect(fetch.payload).await.unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn test_frame_empty_chunk() {
        let fetch = frame_chunk_stream(body_from(vec![framed(0, b"")]), IDLE).await.unwrap();
        assert_eq!(fetch.size, 0);
        assert!(collect(fetch.payload).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_frame_truncated_header() {
        let result = frame_chunk_stream(body_from(vec![vec![0x00, 0x01]]), IDLE).await;
        assert!(matches!(result, Err(WeaveClientError::TruncatedChunkHeader)));
    }

    #[tokio::test]
    async fn test_frame_truncated_payload() {
        let fetch = frame_chunk_stream(body_from(vec![framed(10, b"abc")]), IDLE).await.unwrap();
        let err = collect(fetch.payload).await.unwrap_err();
        assert!(matches!(
            err,
            WeaveClientError::TruncatedChunkPayload {
                expected: 10,
                received: 3
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_idle_timeout_on_stalled_body() {
        let result = frame_chunk_stream(stream::pending::<Result<Bytes>>(), IDLE).await;
        assert!(matches!(result, Err(WeaveClientError::ChunkTimeout(d)) if d == IDLE));
    }

    #[tokio::test]
    async fn test_fetch_chunk_over_http() {
        let server = MockServer::start().await;

        let payload: Vec<u8> = (0..100u8).collect();
        Mock::given(method("GET"))
            .and(path("/chunk2/1001"))
            .and(header("x-packing", "unpacked"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(framed(100, &payload)))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChunkWireClient::new().unwrap();
        let fetch = client.fetch_chunk(&server.uri(), 1001).await.unwrap();
        assert_eq!(fetch.size, 100);
        assert_eq!(collect(fetch.payload).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_fetch_chunk_surfaces_status() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/chunk2/5"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = ChunkWireClient::new().unwrap();
        let Err(err) = client.fetch_chunk(&server.uri(), 5).await else {
            panic!("a 404 must not produce a chunk");
        };
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    }
}
