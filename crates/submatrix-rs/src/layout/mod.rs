//! Block layout calculation and sample encoding for sub-matrix datasets.

pub mod dims;
pub mod error;
pub mod sample;

pub use dims::Layout;
pub use error::LayoutError;
pub use sample::{BlockBuf, ByteOrder, ELEMENT_SIZE};
