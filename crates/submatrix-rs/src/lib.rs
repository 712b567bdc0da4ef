//! Sub-matrix block storage for large N-dimensional spectral datasets.
#![allow(clippy::cargo_common_metadata)]

pub mod header;
pub mod layout;
pub mod metrics;
pub mod retention;

pub use header::{HeaderFormat, HeaderInfo, HeaderWriter, read_header};
pub use layout::{BlockBuf, ByteOrder, Layout, LayoutError};
pub use retention::cache::{BlockCache, BlockSource, CacheStats, DEFAULT_CACHE_CAPACITY};
pub use retention::file::vector::DataVector;
pub use retention::file::{BlockFile, BlockFileOptions};
