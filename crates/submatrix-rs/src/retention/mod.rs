//! Retention layer: mapped dataset files, the block cache, and block files.

pub mod backing;
pub mod cache;
pub mod file;
