pub mod ans104;
pub mod error;
pub mod framer;
pub mod ledger;
pub mod resolver;

pub use ans104::{BundleEntry, BundleIndex, DataItemHeader, PrefixParse};
pub use error::{ResolveError, Result};
pub use framer::frame_item;
pub use ledger::{
    BundleFormat, BundlePrefixSource, HttpMetadataSource, HttpOffsetSource, HttpPrefixSource, OffsetSource,
    TxMetadata, TxMetadataSource,
};
pub use resolver::ByteRangeResolver;
