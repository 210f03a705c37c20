//! Turns a raw chunk-aligned range stream into the item's own payload:
//! leading chunk padding is skipped, and for nested items the data-item
//! envelope header is parsed in place and stripped.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use weave_client::{ByteStream, WeaveClientError};
use weave_types::ResolvedItem;

use crate::ans104::{DataItemHeader, PrefixParse};

struct Framer<S> {
    input: S,
    /// Bytes still to drop before `data_start`.
    skip_remaining: u64,
    /// Accumulates envelope bytes for a nested item until the header parses.
    header: Option<BytesMut>,
    /// Payload bytes still owed; `None` until the header length is known.
    payload_remaining: Option<u64>,
    item_size: u64,
}

/// Frame `input` (a byte stream starting at `item.chunk_start`) down to
/// exactly the item's payload. For an L1 record that is `item_size` bytes
/// beginning at `data_start`; for a nested item the envelope header is
/// additionally stripped, leaving `item_size - header_len` bytes.
pub fn frame_item<S>(item: &ResolvedItem, input: S) -> ByteStream
where
    S: Stream<Item = weave_client::Result<Bytes>> + Unpin + Send + 'static,
{
    let framer = Framer {
        input,
        skip_remaining: item.data_start - item.chunk_start,
        header: item.nested.then(BytesMut::new),
        payload_remaining: (!item.nested).then_some(item.item_size),
        item_size: item.item_size,
    };

    futures::stream::unfold(framer, |mut framer| async move {
        framer.next_segment().await.map(|segment| (segment, framer))
    })
    .boxed()
}

impl<S> Framer<S>
where
    S: Stream<Item = weave_client::Result<Bytes>> + Unpin + Send,
{
    async fn next_segment(&mut self) -> Option<weave_client::Result<Bytes>> {
        loop {
            if self.payload_remaining == Some(0) {
                return None;
            }

            let mut segment = match self.input.next().await {
                Some(Ok(segment)) => segment,
                Some(Err(e)) => return Some(Err(e)),
                None => return Some(Err(self.truncation_error())),
            };

            if self.skip_remaining > 0 {
                let take = self.skip_remaining.min(segment.len() as u64);
                segment = segment.slice(take as usize..);
                self.skip_remaining -= take;
                if segment.is_empty() {
                    continue;
                }
            }

            if let Some(buf) = self.header.as_mut() {
                buf.extend_from_slice(&segment);
                let header = match DataItemHeader::parse(buf) {
                    PrefixParse::NeedBytes(_) => continue,
                    PrefixParse::Complete(header) => header,
                };

                let Some(payload_len) = self.item_size.checked_sub(header.header_len) else {
                    return Some(Err(WeaveClientError::InternalError(format!(
                        "data item header ({} bytes) exceeds the item size ({} bytes)",
                        header.header_len, self.item_size
                    ))));
                };

                let buffered = Bytes::from(std::mem::take(buf));
                self.header = None;
                self.payload_remaining = Some(payload_len);

                // The parse completes once the tag block's length is known,
                // which can be before the tag bytes themselves arrive. Drop
                // the outstanding tail of the header before the payload.
                if (buffered.len() as u64) < header.header_len {
                    self.skip_remaining = header.header_len - buffered.len() as u64;
                    continue;
                }

                // Forward whatever payload arrived in the same reads as the
                // header, truncated to what the item owes.
                if buffered.len() as u64 > header.header_len {
                    let overrun = buffered.slice(header.header_len as usize..);
                    let take = (overrun.len() as u64).min(payload_len);
                    self.payload_remaining = Some(payload_len - take);
                    if take > 0 {
                        return Some(Ok(overrun.slice(..take as usize)));
                    }
                }
                continue;
            }

            let remaining = match self.payload_remaining {
                Some(remaining) => remaining,
                // Unreachable: payload_remaining is set whenever header is None.
                None => return Some(Err(WeaveClientError::InternalError("framer state desync".to_string()))),
            };
            let take = remaining.min(segment.len() as u64);
            self.payload_remaining = Some(remaining - take);
            if take == 0 {
                continue;
            }
            return Some(Ok(segment.slice(..take as usize)));
        }
    }

    fn truncation_error(&self) -> WeaveClientError {
        match self.payload_remaining {
            Some(remaining) => WeaveClientError::TruncatedChunkPayload {
                expected: self.item_size,
                received: self.item_size - remaining,
            },
            None => WeaveClientError::TruncatedChunkHeader,
        }
    }
}
