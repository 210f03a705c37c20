use std::sync::Arc;

use fetch_config::fetch_config;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tracing::{debug, instrument, warn};
use utils::Alerter;
use weave_types::{ByteRange, DownloadRecord, Resolution, ResolvedItem, TxOffset, CHUNK_ALIGNMENT_EPOCH, CHUNK_SIZE};

use crate::ans104::{decode_item_id, BundleIndex, PrefixParse, COUNT_FIELD_LEN};
use crate::error::{ResolveError, Result};
use crate::ledger::{BundleFormat, BundlePrefixSource, OffsetSource, TxMetadata, TxMetadataSource};

/// Maps a record (L1 transaction or nested data item) to the weave byte
/// range holding its bytes, chunk-aligned for the node fetch path.
///
/// Offset and metadata lookups are memoized in bounded LRU caches; ledger
/// entries are immutable once committed, so entries never expire.
pub struct ByteRangeResolver {
    offsets: Arc<dyn OffsetSource>,
    metadata: Arc<dyn TxMetadataSource>,
    prefixes: Arc<dyn BundlePrefixSource>,
    alerter: Arc<dyn Alerter>,
    offset_cache: Mutex<LruCache<String, TxOffset>>,
    metadata_cache: Mutex<LruCache<String, TxMetadata>>,
    chunk_size: u64,
    epoch: u64,
}

impl ByteRangeResolver {
    pub fn new(
        offsets: Arc<dyn OffsetSource>,
        metadata: Arc<dyn TxMetadataSource>,
        prefixes: Arc<dyn BundlePrefixSource>,
        alerter: Arc<dyn Alerter>,
    ) -> Self {
        let config = &fetch_config().resolver;
        let cap = |n: usize| NonZeroUsize::new(n.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            offsets,
            metadata,
            prefixes,
            alerter,
            offset_cache: Mutex::new(LruCache::new(cap(config.offset_cache_capacity))),
            metadata_cache: Mutex::new(LruCache::new(cap(config.metadata_cache_capacity))),
            chunk_size: CHUNK_SIZE,
            epoch: CHUNK_ALIGNMENT_EPOCH,
        }
    }

    /// Override the chunk grid. Production always runs on the ledger
    /// constants; this exists for ledgers-in-miniature in tests.
    pub fn with_grid(mut self, chunk_size: u64, epoch: u64) -> Self {
        self.chunk_size = chunk_size;
        self.epoch = epoch;
        self
    }

    #[instrument(skip(self, record), fields(id = %record.id, nested = record.parent.is_some()))]
    pub async fn resolve(&self, record: &DownloadRecord) -> Result<Resolution> {
        match &record.parent {
            None => self.resolve_l1(record).await,
            Some(_) => self.resolve_nested(record).await,
        }
    }

    async fn resolve_l1(&self, record: &DownloadRecord) -> Result<Resolution> {
        let Some(offset) = self.lookup_offset(&record.id).await? else {
            debug!(id = %record.id, "No ledger offset entry; undiscoverable");
            return Ok(Resolution::Undiscoverable);
        };

        let start = offset.start();
        let end = offset.offset;

        if end < self.epoch {
            // Pre-epoch data was never chunk-uniform; keep the exact bounds.
            return Ok(Resolution::Resolved(ResolvedItem {
                range: ByteRange::new(start, end),
                chunk_start: start,
                data_start: start,
                data_end: end,
                item_size: offset.size,
                nested: false,
            }));
        }

        let end_aligned = self.align_up(end);
        let range = ByteRange::new(start, end_aligned);
        self.check_sanity(&range, offset.size, None)?;

        Ok(Resolution::Resolved(ResolvedItem {
            range,
            chunk_start: start,
            data_start: start,
            data_end: end,
            item_size: offset.size,
            nested: false,
        }))
    }

    async fn resolve_nested(&self, record: &DownloadRecord) -> Result<Resolution> {
        let root_id = record
            .ancestors
            .first()
            .ok_or_else(|| ResolveError::BundleFormatError(format!("record {} has a parent but no ancestry", record.id)))?
            .clone();

        let Some(root_offset) = self.lookup_offset(&root_id).await? else {
            self.alert_missing_ancestor(&record.id, &root_id).await;
            return Err(ResolveError::AncestorNotFound(root_id));
        };

        let Some(root_meta) = self.lookup_metadata(&root_id).await? else {
            self.alert_missing_ancestor(&record.id, &root_id).await;
            return Err(ResolveError::AncestorNotFound(root_id));
        };

        match root_meta.bundle_format() {
            BundleFormat::Ans104 => {},
            BundleFormat::Ans102 => {
                debug!(id = %record.id, bundle = %root_id, "Legacy json bundle; whole-object fallback");
                return Ok(Resolution::JsonBundle { bundle_id: root_id });
            },
            BundleFormat::Unknown => {
                return Err(ResolveError::BundleFormatError(format!(
                    "ancestor {root_id} of {} is not a recognized bundle",
                    record.id
                )));
            },
        }

        // Walk outer to inner, accumulating the bundle-relative start of the
        // target: each level contributes its offset table length plus the
        // sizes of every item preceding the next link in the chain.
        let mut relative_start: u64 = 0;
        let mut item_size: u64 = 0;
        for (level, bundle_id) in record.ancestors.iter().enumerate() {
            let target_id = record.ancestors.get(level + 1).unwrap_or(&record.id);
            let index = self.fetch_index(bundle_id).await?;
            let raw_target = decode_item_id(target_id)?;
            let (offset_in_bundle, size) = index.locate(&raw_target).ok_or_else(|| {
                ResolveError::BundleFormatError(format!("item {target_id} not listed in bundle {bundle_id}"))
            })?;
            relative_start += offset_in_bundle;
            item_size = size;
        }

        let l1_start = root_offset.start();
        let data_start = l1_start + relative_start;
        let data_end = data_start + item_size;

        if root_offset.offset < self.epoch {
            // Pre-epoch clamp: the bundle predates uniform chunking.
            return Ok(Resolution::Resolved(ResolvedItem {
                range: ByteRange::new(data_start, data_end),
                chunk_start: data_start,
                data_start,
                data_end,
                item_size,
                nested: true,
            }));
        }

        let start_aligned = self.align_down(data_start);
        let end_aligned = self.align_up(data_end);
        let range = ByteRange::new(start_aligned, end_aligned);

        let root_bounds = ByteRange::new(self.align_down(l1_start), self.align_up(root_offset.offset));
        self.check_sanity(&range, item_size, Some(&root_bounds))?;

        Ok(Resolution::Resolved(ResolvedItem {
            range,
            chunk_start: start_aligned,
            data_start,
            data_end,
            item_size,
            nested: true,
        }))
    }

    /// Round up to the next grid boundary measured from the epoch. Offsets
    /// already on the grid stay put.
    fn align_up(&self, offset: u64) -> u64 {
        let chunk = self.chunk_size as i128;
        let rel = offset as i128 - self.epoch as i128;
        let pad = (chunk - rel.rem_euclid(chunk)).rem_euclid(chunk);
        offset + pad as u64
    }

    /// Round down to the previous grid boundary measured from the epoch.
    fn align_down(&self, offset: u64) -> u64 {
        let chunk = self.chunk_size as i128;
        let rel = offset as i128 - self.epoch as i128;
        offset - rel.rem_euclid(chunk) as u64
    }

    fn on_grid(&self, offset: u64) -> bool {
        (offset as i128 - self.epoch as i128).rem_euclid(self.chunk_size as i128) == 0
    }

    /// Fail-fast invariants on a post-epoch resolution. Violations are
    /// programming errors, not retryable conditions.
    fn check_sanity(&self, range: &ByteRange, item_size: u64, outer: Option<&ByteRange>) -> Result<()> {
        if !self.on_grid(range.end) || (outer.is_some() && !self.on_grid(range.start)) {
            return Err(ResolveError::AlignmentViolation(format!(
                "range {range} does not sit on the {} byte grid",
                self.chunk_size
            )));
        }
        if range.start > range.end {
            return Err(ResolveError::RangeSanityViolation(format!("inverted range {range}")));
        }
        if range.span() < item_size {
            return Err(ResolveError::RangeSanityViolation(format!(
                "range {range} smaller than the declared item size {item_size}"
            )));
        }
        if let Some(outer) = outer {
            if !outer.contains(range) {
                return Err(ResolveError::RangeSanityViolation(format!(
                    "range {range} escapes the ancestor bounds {outer}"
                )));
            }
        }
        Ok(())
    }

    async fn fetch_index(&self, bundle_id: &str) -> Result<BundleIndex> {
        let head = self.prefixes.data_prefix(bundle_id, COUNT_FIELD_LEN as u64).await?;
        let needed = match BundleIndex::parse_prefix(&head)? {
            PrefixParse::Complete(index) => return Ok(index),
            PrefixParse::NeedBytes(needed) => needed,
        };

        let table = self.prefixes.data_prefix(bundle_id, needed as u64).await?;
        match BundleIndex::parse_prefix(&table)? {
            PrefixParse::Complete(index) => Ok(index),
            PrefixParse::NeedBytes(_) => Err(ResolveError::BundleFormatError(format!(
                "bundle {bundle_id} ends inside its offset table"
            ))),
        }
    }

    async fn lookup_offset(&self, id: &str) -> Result<Option<TxOffset>> {
        if let Some(hit) = self.offset_cache.lock().ok().and_then(|mut c| c.get(id).copied()) {
            return Ok(Some(hit));
        }
        let fetched = self.offsets.tx_offset(id).await?;
        if let Some(offset) = fetched {
            if let Ok(mut cache) = self.offset_cache.lock() {
                cache.put(id.to_string(), offset);
            }
        }
        Ok(fetched)
    }

    async fn lookup_metadata(&self, id: &str) -> Result<Option<TxMetadata>> {
        if let Some(hit) = self.metadata_cache.lock().ok().and_then(|mut c| c.get(id).cloned()) {
            return Ok(Some(hit));
        }
        let fetched = self.metadata.tx_metadata(id).await?;
        if let Some(meta) = &fetched {
            if let Ok(mut cache) = self.metadata_cache.lock() {
                cache.put(id.to_string(), meta.clone());
            }
        }
        Ok(fetched)
    }

    async fn alert_missing_ancestor(&self, record_id: &str, ancestor_id: &str) {
        warn!(record_id, ancestor_id, "Ancestor unresolvable on every endpoint");
        self.alerter
            .notify(format!(
                "ancestor {ancestor_id} of record {record_id} missing from ledger and metadata endpoints"
            ))
            .await;
    }
}
