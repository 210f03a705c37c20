pub mod chunk_wire;
pub mod error;
pub mod gateway_stream;
pub mod http_client;
pub mod node_stream;
pub mod retry_wrapper;

pub use chunk_wire::{ChunkFetch, ChunkWireClient};
pub use error::{Result, WeaveClientError};
pub use gateway_stream::{inactivity_guard, GatewayStream};
pub use http_client::Api;
pub use node_stream::{ChunkSource, NodeChunkStream, RangeStream, WireChunkSource};
pub use retry_wrapper::{RetryWrapper, RetryableReqwestError};

/// Boxed fallible byte stream, the common currency between the chunk, node
/// and gateway layers.
pub type ByteStream = futures::stream::BoxStream<'static, Result<bytes::Bytes>>;
