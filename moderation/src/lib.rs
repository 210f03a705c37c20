pub mod content_type;
pub mod errors;
pub mod object_store;
pub mod orchestrator;

pub use content_type::{classify, sniff, SniffDecision};
pub use errors::{DownloadError, Result};
pub use object_store::{InMemoryObjectStore, ObjectStore};
pub use orchestrator::{ChunkStreamSource, DownloadOrchestrator, SourceStream, StreamSource};
