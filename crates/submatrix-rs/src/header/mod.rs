//! File headers for the two supported dataset containers.
//!
//! Internal format (any suffix other than `.ucsf`), all integers `i32` in the
//! dataset byte order:
//!
//! | offset          | field                         |
//! |-----------------|-------------------------------|
//! | 0               | magic `874032077`             |
//! | 4               | file header size              |
//! | 8               | block header size             |
//! | 12              | dimension count               |
//! | 16              | extra flag (0 or 1)           |
//! | 20              | bytes per sample (4)          |
//! | 64 + 16 * axis  | size, block size, block count |
//!
//! UCSF format (`.ucsf`), always big-endian: a 180-byte file header tagged
//! `"UCSF NMR"` followed by one 128-byte header per axis, last axis first.


use std::path::Path;

use anyhow::{Result, bail};

use crate::layout::Layout;
use crate::layout::error::LayoutError;
use crate::layout::sample::{ByteOrder, ELEMENT_SIZE};

pub const INTERNAL_MAGIC: i32 = 874_032_077;
pub const INTERNAL_HEADER_SIZE: u64 = 2048;
const INTERNAL_AXIS_BASE: usize = 64;
const INTERNAL_AXIS_STRIDE: usize = 16;

pub const UCSF_TAG: &[u8; 8] = b"UCSF NMR";
pub const UCSF_FILE_HEADER: usize = 180;
pub const UCSF_AXIS_HEADER: usize = 128;
const UCSF_VERSION: u8 = 2;

/// HeaderWriter fills the file header region of a dataset.
pub trait HeaderWriter: Send + Sync {
    /// Encode the header for `layout` into `out`, which spans the layout's file header.
    ///
    /// # Errors
    /// Returns an error if `out` cannot hold the header.
    fn write_header(
        &self,
        layout: &Layout,
        order: ByteOrder,
        extra: bool,
        out: &mut [u8],
    ) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderFormat {
    Internal,
    Ucsf,
}

/// Layout and byte order recovered from an existing header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderInfo {
    pub format: HeaderFormat,
    pub layout: Layout,
    pub byte_order: ByteOrder,
    pub extra: bool,
}

impl HeaderFormat {
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("ucsf") => Self::Ucsf,
            _ => Self::Internal,
        }
    }

    #[must_use]
    pub fn writer(self) -> &'static dyn HeaderWriter {
        match self {
            Self::Internal => &InternalHeader,
            Self::Ucsf => &UcsfHeader,
        }
    }

    /// File header size this format needs for `n_dim` axes.
    #[must_use]
    pub const fn header_size(self, n_dim: usize) -> u64 {
        match self {
            Self::Internal => INTERNAL_HEADER_SIZE,
            Self::Ucsf => (UCSF_FILE_HEADER + UCSF_AXIS_HEADER * n_dim) as u64,
        }
    }
}

fn ensure_room(required: usize, out: &[u8]) -> Result<(), LayoutError> {
    if out.len() < required {
        return Err(LayoutError::HeaderTooSmall {
            required: required as u64,
            available: out.len() as u64,
        });
    }
    Ok(())
}

fn as_i32(value: u64, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| anyhow::anyhow!("{what} {value} does not fit a header field"))
}

fn as_usize(value: i32, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| anyhow::anyhow!("negative {what} {value} in header"))
}

pub struct InternalHeader;

impl HeaderWriter for InternalHeader {
    fn write_header(
        &self,
        layout: &Layout,
        order: ByteOrder,
        extra: bool,
        out: &mut [u8],
    ) -> Result<()> {
        let n_dim = layout.n_dim();
        ensure_room(INTERNAL_AXIS_BASE + INTERNAL_AXIS_STRIDE * n_dim, out)?;

        out.fill(0);
        order.write_i32(&mut out[0..], INTERNAL_MAGIC);
        order.write_i32(&mut out[4..], as_i32(layout.file_header_size(), "header size")?);
        order.write_i32(&mut out[8..], as_i32(layout.block_header_size(), "block header size")?);
        order.write_i32(&mut out[12..], as_i32(n_dim as u64, "dimension count")?);
        order.write_i32(&mut out[16..], i32::from(extra));
        order.write_i32(&mut out[20..], ELEMENT_SIZE as i32);

        for axis in 0..n_dim {
            let at = INTERNAL_AXIS_BASE + INTERNAL_AXIS_STRIDE * axis;
            order.write_i32(&mut out[at..], as_i32(layout.size(axis) as u64, "axis size")?);
            order.write_i32(
                &mut out[at + 4..],
                as_i32(layout.block_size(axis) as u64, "block size")?,
            );
            order.write_i32(
                &mut out[at + 8..],
                as_i32(layout.n_blocks()[axis] as u64, "block count")?,
            );
        }
        Ok(())
    }
}

impl InternalHeader {
    /// Decode an internal header, detecting its byte order from the magic number.
    ///
    /// # Errors
    /// Returns an error if the magic is missing or any field is inconsistent.
    pub fn read(bytes: &[u8]) -> Result<HeaderInfo> {
        if bytes.len() < INTERNAL_AXIS_BASE {
            bail!("internal header truncated at {} bytes", bytes.len());
        }
        let order = if ByteOrder::Big.read_i32(bytes) == INTERNAL_MAGIC {
            ByteOrder::Big
        } else if ByteOrder::Little.read_i32(bytes) == INTERNAL_MAGIC {
            ByteOrder::Little
        } else {
            bail!("not an internal dataset header (bad magic)");
        };

        let header_size = as_usize(order.read_i32(&bytes[4..]), "header size")? as u64;
        let block_header = as_usize(order.read_i32(&bytes[8..]), "block header size")? as u64;
        let n_dim = as_usize(order.read_i32(&bytes[12..]), "dimension count")?;
        let extra = order.read_i32(&bytes[16..]) != 0;
        if bytes.len() < INTERNAL_AXIS_BASE + INTERNAL_AXIS_STRIDE * n_dim {
            bail!("internal header truncated for {n_dim} axes");
        }

        let mut sizes = Vec::with_capacity(n_dim);
        let mut block_sizes = Vec::with_capacity(n_dim);
        for axis in 0..n_dim {
            let at = INTERNAL_AXIS_BASE + INTERNAL_AXIS_STRIDE * axis;
            sizes.push(as_usize(order.read_i32(&bytes[at..]), "axis size")?);
            block_sizes.push(as_usize(order.read_i32(&bytes[at + 4..]), "block size")?);
        }
        let layout = Layout::with_block_sizes(header_size, block_header, &sizes, &block_sizes)?;
        Ok(HeaderInfo {
            format: HeaderFormat::Internal,
            layout,
            byte_order: order,
            extra,
        })
    }
}

pub struct UcsfHeader;

impl HeaderWriter for UcsfHeader {
    fn write_header(
        &self,
        layout: &Layout,
        _order: ByteOrder,
        _extra: bool,
        out: &mut [u8],
    ) -> Result<()> {
        let n_dim = layout.n_dim();
        ensure_room(UCSF_FILE_HEADER + UCSF_AXIS_HEADER * n_dim, out)?;
        let n_dim_byte =
            u8::try_from(n_dim).map_err(|_| anyhow::anyhow!("too many axes for UCSF: {n_dim}"))?;

        out.fill(0);
        out[..UCSF_TAG.len()].copy_from_slice(UCSF_TAG);
        out[10] = n_dim_byte;
        out[11] = 1;
        out[13] = UCSF_VERSION;

        for (slot, axis) in (0..n_dim).rev().enumerate() {
            let at = UCSF_FILE_HEADER + UCSF_AXIS_HEADER * slot;
            ByteOrder::Big.write_i32(
                &mut out[at + 8..],
                as_i32(layout.size(axis) as u64, "axis size")?,
            );
            ByteOrder::Big.write_i32(
                &mut out[at + 16..],
                as_i32(layout.block_size(axis) as u64, "tile size")?,
            );
        }
        Ok(())
    }
}

impl UcsfHeader {
    /// Decode a UCSF header into a big-endian layout.
    ///
    /// # Errors
    /// Returns an error if the tag is missing or any field is inconsistent.
    pub fn read(bytes: &[u8]) -> Result<HeaderInfo> {
        if bytes.len() < UCSF_FILE_HEADER || &bytes[..UCSF_TAG.len()] != UCSF_TAG {
            bail!("not a UCSF header");
        }
        let n_dim = usize::from(bytes[10]);
        if n_dim == 0 || bytes.len() < UCSF_FILE_HEADER + UCSF_AXIS_HEADER * n_dim {
            bail!("UCSF header truncated for {n_dim} axes");
        }

        let mut sizes = vec![0; n_dim];
        let mut block_sizes = vec![0; n_dim];
        for (slot, axis) in (0..n_dim).rev().enumerate() {
            let at = UCSF_FILE_HEADER + UCSF_AXIS_HEADER * slot;
            sizes[axis] = as_usize(ByteOrder::Big.read_i32(&bytes[at + 8..]), "axis size")?;
            block_sizes[axis] = as_usize(ByteOrder::Big.read_i32(&bytes[at + 16..]), "tile size")?;
        }
        let header_size = HeaderFormat::Ucsf.header_size(n_dim);
        let layout = Layout::with_block_sizes(header_size, 0, &sizes, &block_sizes)?;
        Ok(HeaderInfo {
            format: HeaderFormat::Ucsf,
            layout,
            byte_order: ByteOrder::Big,
            extra: false,
        })
    }
}

/// `read_header` loads the header of an existing dataset file, choosing the
/// decoder by suffix.
///
/// # Errors
/// Returns an error if the file cannot be read or its header is invalid.
pub fn read_header(path: &Path) -> Result<HeaderInfo> {
    use std::io::Read;

    let format = HeaderFormat::from_path(path);
    let mut prefix = Vec::new();
    std::fs::File::open(path)?
        .take(INTERNAL_HEADER_SIZE.max(HeaderFormat::Ucsf.header_size(u8::MAX as usize)))
        .read_to_end(&mut prefix)?;
    match format {
        HeaderFormat::Internal => InternalHeader::read(&prefix),
        HeaderFormat::Ucsf => UcsfHeader::read(&prefix),
    }
}
