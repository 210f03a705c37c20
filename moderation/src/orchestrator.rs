//! The download pipeline: resolve a record to a stream, sniff its leading
//! bytes, and either upload it for classification or record why not. Every
//! record produces an outcome; errors never escape.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bundle_resolver::{frame_item, ByteRangeResolver, ResolveError};
use bytes::Bytes;
use fetch_config::fetch_config;
use futures::{stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use utils::Alerter;
use weave_client::{ByteStream, ChunkSource, GatewayStream, NodeChunkStream, WeaveClientError, WireChunkSource};
use weave_types::{ByteRange, DownloadRecord, NodeCandidate, NodeStack, OutcomeKind, ProcessOutcome, Resolution};

use crate::content_type::{classify, SniffDecision};
use crate::errors::{DownloadError, Result};
use crate::object_store::ObjectStore;

/// An opened record stream plus the handles the orchestrator needs to tear
/// it down early and to annotate the record.
pub struct SourceStream {
    pub bytes: ByteStream,
    /// Cancels the fetch machinery behind `bytes`, when there is any.
    pub cancel: Option<CancellationToken>,
    /// The chunk-aligned weave range backing the stream, when known.
    pub byte_range: Option<ByteRange>,
}

/// Where record bytes come from. The production implementation is
/// [`ChunkStreamSource`]; tests script their own.
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn open(&self, record: &DownloadRecord) -> Result<SourceStream>;
}

/// Resolves records against the ledger and serves them over the chunk path,
/// falling back to the gateway for legacy json bundles.
pub struct ChunkStreamSource {
    resolver: ByteRangeResolver,
    chunks: Arc<dyn ChunkSource>,
    nodes: Vec<NodeCandidate>,
    gateway: GatewayStream,
}

impl ChunkStreamSource {
    pub fn new(resolver: ByteRangeResolver, nodes: Vec<NodeCandidate>, gateway_url: &str) -> Result<Self> {
        Ok(Self {
            resolver,
            chunks: Arc::new(WireChunkSource::new()?),
            nodes,
            gateway: GatewayStream::new(gateway_url)?,
        })
    }

    pub fn with_chunk_source(mut self, chunks: Arc<dyn ChunkSource>) -> Self {
        self.chunks = chunks;
        self
    }
}

#[async_trait]
impl StreamSource for ChunkStreamSource {
    async fn open(&self, record: &DownloadRecord) -> Result<SourceStream> {
        match self.resolver.resolve(record).await? {
            Resolution::Undiscoverable => Err(ResolveError::Undiscoverable(record.id.clone()).into()),
            Resolution::JsonBundle { bundle_id } => {
                debug!(id = %record.id, bundle = %bundle_id, "Json-bundled item; serving through the gateway");
                let bytes = self.gateway.open(&record.id).await?;
                Ok(SourceStream {
                    bytes,
                    cancel: None,
                    byte_range: None,
                })
            },
            Resolution::Resolved(item) => {
                // The stack pops tail-first; reverse so the configured order
                // is the preference order.
                let stack = NodeStack::new(self.nodes.iter().rev().cloned().collect());
                let raw = NodeChunkStream::open(self.chunks.clone(), item.chunk_start, item.data_end, stack);
                let cancel = raw.cancellation_token();
                Ok(SourceStream {
                    bytes: frame_item(&item, raw),
                    cancel: Some(cancel),
                    byte_range: Some(item.range),
                })
            },
        }
    }
}

/// Drives a batch of records through fetch, sniff, upload and verification,
/// classifying every path into a [`ProcessOutcome`].
pub struct DownloadOrchestrator<S, O> {
    source: S,
    store: O,
    alerter: Arc<dyn Alerter>,
}

impl<S: StreamSource, O: ObjectStore> DownloadOrchestrator<S, O> {
    pub fn new(source: S, store: O, alerter: Arc<dyn Alerter>) -> Self {
        Self {
            source,
            store,
            alerter,
        }
    }

    /// Process a whole batch under one wall-clock budget, preserving input
    /// order. Records still in flight when the budget expires come back as
    /// [`OutcomeKind::Timeout`], except where a store probe shows the upload
    /// actually completed.
    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn process_many(&self, records: Vec<DownloadRecord>, budget: Option<Duration>) -> Vec<ProcessOutcome> {
        let budget = budget.unwrap_or(fetch_config().download.batch_timeout);
        let cancel = CancellationToken::new();
        let timer = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(budget).await;
                warn!("Batch budget expired; cancelling in-flight records");
                cancel.cancel();
            }
        });

        let outcomes =
            futures::future::join_all(records.into_iter().map(|record| self.process_one(record, &cancel))).await;
        timer.abort();

        // A timed-out record may have finished uploading before its task got
        // to observe the cancellation. Trust the store over the race.
        let mut settled = Vec::with_capacity(outcomes.len());
        for mut outcome in outcomes {
            if outcome.kind == OutcomeKind::Timeout {
                if let Ok(Some(stored)) = self.store.head(&outcome.record.id).await {
                    if stored == outcome.record.content_size {
                        info!(id = %outcome.record.id, "Timed-out record found fully stored; queueing");
                        outcome.kind = OutcomeKind::Queued;
                    }
                }
            }
            settled.push(outcome);
        }
        settled
    }

    #[instrument(skip_all, fields(id = %record.id))]
    pub async fn process_one(&self, mut record: DownloadRecord, cancel: &CancellationToken) -> ProcessOutcome {
        let kind = tokio::select! {
            _ = cancel.cancelled() => OutcomeKind::Timeout,
            result = self.try_process(&mut record) => match result {
                Ok(kind) => kind,
                Err(e) => self.classify_error(&record, e).await,
            },
        };
        debug!(reason = kind.reason(), "Record settled");
        ProcessOutcome { record, kind }
    }

    async fn try_process(&self, record: &mut DownloadRecord) -> Result<OutcomeKind> {
        let source = self.source.open(record).await?;
        record.byte_range = source.byte_range;

        let sample_size = fetch_config().download.sniff_sample_size;
        let SourceStream {
            mut bytes,
            cancel,
            byte_range: _,
        } = source;
        let abort = |reason: &str| {
            debug!(reason, "Tearing down the source stream");
            if let Some(cancel) = &cancel {
                cancel.cancel();
            }
        };

        // Buffer the head of the stream for sniffing; the buffered segments
        // are replayed in front of the remainder on upload.
        let mut prefix: Vec<Bytes> = Vec::new();
        let mut buffered = 0usize;
        while buffered < sample_size {
            match bytes.next().await {
                Some(Ok(segment)) => {
                    buffered += segment.len();
                    prefix.push(segment);
                },
                Some(Err(e)) => {
                    abort("stream error during sniffing");
                    return Err(e.into());
                },
                None => break,
            }
        }

        let mut sample = Vec::with_capacity(buffered.min(sample_size));
        for segment in &prefix {
            let take = segment.len().min(sample_size - sample.len());
            sample.extend_from_slice(&segment[..take]);
        }

        match classify(&sample) {
            SniffDecision::Reject(content_type) => {
                abort("content type rejected");
                return Ok(OutcomeKind::Rejected {
                    content_type: content_type.to_string(),
                });
            },
            SniffDecision::Accept(sniffed) => {
                if record.content_type.is_none() {
                    record.content_type = sniffed.map(String::from);
                }
            },
        }

        let record_json =
            serde_json::to_string(record).map_err(|e| DownloadError::UploadError(format!("record metadata: {e}")))?;
        let mut metadata = HashMap::new();
        metadata.insert("record".to_string(), record_json);

        let body = stream::iter(prefix.into_iter().map(Ok)).chain(bytes).boxed();
        if let Err(e) = self.store.put(&record.id, body, metadata).await {
            abort("upload failed");
            let _ = self.store.delete(&record.id).await;
            return Err(e);
        }

        let stored = self.store.head(&record.id).await?.unwrap_or(0);
        if stored != record.content_size {
            abort("stored size mismatch");
            self.store.delete(&record.id).await?;
            return Err(DownloadError::SizeMismatch {
                declared: record.content_size,
                stored,
            });
        }

        Ok(OutcomeKind::Queued)
    }

    /// Collapse a pipeline error into its outcome. Only the residual
    /// [`OutcomeKind::Error`] class raises an alert; the named outcomes are
    /// expected operational states.
    async fn classify_error(&self, record: &DownloadRecord, error: DownloadError) -> OutcomeKind {
        match &error {
            DownloadError::Resolve(ResolveError::Undiscoverable(_)) => OutcomeKind::NotFound,
            DownloadError::Client(WeaveClientError::NoData)
            | DownloadError::Resolve(ResolveError::Client(WeaveClientError::NoData)) => OutcomeKind::NoData,
            DownloadError::Client(e) if e.is_not_found() => OutcomeKind::NotFound,
            DownloadError::Resolve(ResolveError::Client(e)) if e.is_not_found() => OutcomeKind::NotFound,
            DownloadError::Timeout => OutcomeKind::Timeout,
            _ => {
                let message = error.to_string();
                warn!(id = %record.id, %message, "Record failed");
                self.alerter
                    .notify(format!("record {} failed: {message}", record.id))
                    .await;
                OutcomeKind::Error { message }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use utils::{NoopAlerter, RecordingAlerter};

    use super::*;
    use crate::object_store::InMemoryObjectStore;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\npretend-image-payload";
    const PDF: &[u8] = b"%PDF-1.7 pretend-document-payload";

    enum Script {
        Serve { data: &'static [u8], byte_range: Option<ByteRange> },
        Undiscoverable,
        NoDataStream,
        Hang,
    }

    #[derive(Default)]
    struct ScriptedSource {
        scripts: Mutex<HashMap<String, Script>>,
        cancels: Mutex<HashMap<String, CancellationToken>>,
    }

    impl ScriptedSource {
        fn with(mut self, id: &str, script: Script) -> Self {
            self.scripts.get_mut().unwrap().insert(id.to_string(), script);
            self
        }

        fn cancelled(&self, id: &str) -> bool {
            self.cancels
                .lock()
                .unwrap()
                .get(id)
                .map(|t| t.is_cancelled())
                .unwrap_or(false)
        }
    }

    #[async_trait]
    impl StreamSource for ScriptedSource {
        async fn open(&self, record: &DownloadRecord) -> Result<SourceStream> {
            let scripts = self.scripts.lock().unwrap();
            match scripts.get(&record.id) {
                Some(Script::Serve { data, byte_range }) => {
                    let cancel = CancellationToken::new();
                    self.cancels.lock().unwrap().insert(record.id.clone(), cancel.clone());
                    let segments: Vec<_> = data.chunks(7).map(|c| Ok(Bytes::copy_from_slice(c))).collect();
                    Ok(SourceStream {
                        bytes: stream::iter(segments).boxed(),
                        cancel: Some(cancel),
                        byte_range: *byte_range,
                    })
                },
                Some(Script::Undiscoverable) => Err(ResolveError::Undiscoverable(record.id.clone()).into()),
                Some(Script::NoDataStream) => Ok(SourceStream {
                    bytes: stream::iter(vec![Err(WeaveClientError::NoData)]).boxed(),
                    cancel: None,
                    byte_range: None,
                }),
                Some(Script::Hang) => Ok(SourceStream {
                    bytes: stream::pending().boxed(),
                    cancel: None,
                    byte_range: None,
                }),
                None => panic!("no script for {}", record.id),
            }
        }
    }

    fn orchestrator(source: ScriptedSource) -> DownloadOrchestrator<ScriptedSource, InMemoryObjectStore> {
        DownloadOrchestrator::new(source, InMemoryObjectStore::new(), Arc::new(NoopAlerter))
    }

    #[tokio::test]
    async fn test_accepted_record_uploads_and_queues() {
        let source = ScriptedSource::default().with(
            "img",
            Script::Serve {
                data: PNG,
                byte_range: Some(ByteRange::new(800, 1024)),
            },
        );
        let orch = orchestrator(source);

        let record = DownloadRecord::l1("img", None, PNG.len() as u64);
        let outcome = orch.process_one(record, &CancellationToken::new()).await;

        assert_eq!(outcome.kind, OutcomeKind::Queued);
        assert_eq!(outcome.record.byte_range, Some(ByteRange::new(800, 1024)));
        assert_eq!(outcome.record.content_type.as_deref(), Some("image/png"));
        assert_eq!(orch.store.object("img").unwrap(), PNG);
        let metadata = orch.store.metadata("img").unwrap();
        assert!(metadata["record"].contains("\"img\""));
    }

    #[tokio::test]
    async fn test_rejected_mimetype_cancels_and_skips_upload() {
        let source = ScriptedSource::default().with(
            "doc",
            Script::Serve {
                data: PDF,
                byte_range: None,
            },
        );
        let orch = orchestrator(source);

        let record = DownloadRecord::l1("doc", None, PDF.len() as u64);
        let outcome = orch.process_one(record, &CancellationToken::new()).await;

        assert_eq!(
            outcome.kind,
            OutcomeKind::Rejected {
                content_type: "application/pdf".to_string()
            }
        );
        assert_eq!(outcome.kind.reason(), "mimetype");
        assert!(orch.source.cancelled("doc"));
        assert!(orch.store.object("doc").is_none());
    }

    #[tokio::test]
    async fn test_undiscoverable_record_is_not_found() {
        let orch = orchestrator(ScriptedSource::default().with("ghost", Script::Undiscoverable));
        let outcome = orch.process_one(DownloadRecord::l1("ghost", None, 1), &CancellationToken::new()).await;
        assert_eq!(outcome.kind, OutcomeKind::NotFound);
        assert_eq!(outcome.kind.reason(), "404");
    }

    #[tokio::test]
    async fn test_stalled_stream_is_nodata() {
        let orch = orchestrator(ScriptedSource::default().with("stall", Script::NoDataStream));
        let outcome = orch.process_one(DownloadRecord::l1("stall", None, 1), &CancellationToken::new()).await;
        assert_eq!(outcome.kind, OutcomeKind::NoData);
    }

    #[tokio::test]
    async fn test_size_mismatch_deletes_upload_and_alerts() {
        let source = ScriptedSource::default().with(
            "short",
            Script::Serve {
                data: PNG,
                byte_range: None,
            },
        );
        let alerter = Arc::new(RecordingAlerter::new());
        let orch = DownloadOrchestrator::new(source, InMemoryObjectStore::new(), alerter.clone());

        // Declared size double the actual stream.
        let record = DownloadRecord::l1("short", None, (PNG.len() * 2) as u64);
        let outcome = orch.process_one(record, &CancellationToken::new()).await;

        assert!(matches!(&outcome.kind, OutcomeKind::Error { message } if message.contains("does not match")));
        assert!(orch.store.object("short").is_none());
        assert!(orch.source.cancelled("short"));
        assert_eq!(alerter.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_timeout_probes_the_store() {
        let source = ScriptedSource::default()
            .with("done-offline", Script::Hang)
            .with("truly-stuck", Script::Hang);
        let store = InMemoryObjectStore::new();
        // Models an upload that completed before the budget expired.
        store.seed("done-offline", vec![1; 64]);
        let orch = DownloadOrchestrator::new(source, store, Arc::new(NoopAlerter));

        let records = vec![
            DownloadRecord::l1("done-offline", None, 64),
            DownloadRecord::l1("truly-stuck", None, 64),
        ];
        let outcomes = orch.process_many(records, Some(Duration::from_millis(50))).await;

        assert_eq!(outcomes[0].kind, OutcomeKind::Queued);
        assert_eq!(outcomes[1].kind, OutcomeKind::Timeout);
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let source = ScriptedSource::default()
            .with("a", Script::Undiscoverable)
            .with(
                "b",
                Script::Serve {
                    data: PNG,
                    byte_range: None,
                },
            );
        let orch = orchestrator(source);

        let records = vec![
            DownloadRecord::l1("a", None, 1),
            DownloadRecord::l1("b", None, PNG.len() as u64),
        ];
        let outcomes = orch.process_many(records, Some(Duration::from_secs(5))).await;

        assert_eq!(outcomes[0].record.id, "a");
        assert_eq!(outcomes[0].kind, OutcomeKind::NotFound);
        assert_eq!(outcomes[1].record.id, "b");
        assert_eq!(outcomes[1].kind, OutcomeKind::Queued);
    }
}
