//! Dataset files stored as a sequence of equally shaped sample blocks.
//!
//! A [`BlockFile`] owns one mapped OS file and one [`Layout`]. Point and vector
//! access goes through a shared [`BlockCache`]; bulk operations stream whole
//! blocks straight from the file.

pub mod mapper;
pub mod vector;

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use anyhow::{Result, anyhow, bail};
use num_complex::Complex64;
use tracing::{debug, warn};

use crate::header::{HeaderFormat, HeaderWriter};
use crate::layout::Layout;
use crate::layout::sample::{BlockBuf, ByteOrder};
use crate::metrics::{self, BlockOp, IoOpType};
use crate::retention::backing::Backing;
use crate::retention::cache::{BlockCache, BlockSource};
use mapper::BlockPoint;
use vector::DataVector;

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(1);

/// Options fixed when a dataset file is opened.
#[derive(Clone, Default)]
pub struct BlockFileOptions {
    pub byte_order: ByteOrder,
    pub writable: bool,
    /// Per-axis complex flags; empty means every axis is real.
    pub complex: Vec<bool>,
    /// Header strategy; `None` picks one from the file suffix.
    pub header: Option<Arc<dyn HeaderWriter>>,
}

/// Storage half of a block file, shared with the cache for loads and write-back.
struct FileStore {
    id: u64,
    path: PathBuf,
    layout: Layout,
    byte_order: ByteOrder,
    backing: RwLock<Backing>,
    block_reads: AtomicU64,
    block_writes: AtomicU64,
}

impl FileStore {
    fn backing(&self) -> Result<RwLockReadGuard<'_, Backing>> {
        self.backing
            .read()
            .map_err(|_| anyhow!("file lock poisoned for {}", self.path.display()))
    }

    fn backing_mut(&self) -> Result<RwLockWriteGuard<'_, Backing>> {
        self.backing
            .write()
            .map_err(|_| anyhow!("file lock poisoned for {}", self.path.display()))
    }

    fn check_block(&self, block: usize) -> Result<()> {
        if block >= self.layout.total_blocks() {
            bail!(
                "block {block} out of range ({} blocks)",
                self.layout.total_blocks()
            );
        }
        Ok(())
    }
}

impl BlockSource for FileStore {
    fn id(&self) -> u64 {
        self.id
    }

    fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    fn is_writable(&self) -> bool {
        self.backing().is_ok_and(|b| b.is_writable())
    }

    fn read_block(&self, block: usize) -> Result<BlockBuf> {
        self.check_block(block)?;
        let len = self.layout.block_elements();
        let off = mapper::block_byte_offset(&self.layout, block);
        let mut bytes = vec![0u8; len];

        let start = Instant::now();
        let n = self.backing()?.read_at(off, &mut bytes);
        self.block_reads.fetch_add(1, Ordering::Relaxed);
        if n < len {
            warn!(
                path = %self.path.display(),
                block,
                expected = len,
                got = n,
                "short block read, missing bytes read as zero"
            );
        }
        metrics::record_block_op(BlockOp {
            file_id: self.id,
            block,
            op: IoOpType::Read,
            bytes: n as u64,
            latency_seconds: start.elapsed().as_secs_f64(),
            error: n < len,
        });
        Ok(BlockBuf::from_bytes(bytes))
    }

    fn write_block(&self, block: usize, buf: &BlockBuf) -> Result<()> {
        self.check_block(block)?;
        let len = self.layout.block_elements();
        if buf.len() != len {
            bail!("block buffer holds {} bytes, expected {len}", buf.len());
        }
        let off = mapper::block_byte_offset(&self.layout, block);

        let start = Instant::now();
        let n = self.backing_mut()?.write_at(off, buf.as_bytes());
        self.block_writes.fetch_add(1, Ordering::Relaxed);
        metrics::record_block_op(BlockOp {
            file_id: self.id,
            block,
            op: IoOpType::Write,
            bytes: n as u64,
            latency_seconds: start.elapsed().as_secs_f64(),
            error: n < len,
        });
        if n < len {
            bail!(
                "short write of block {block} to {}: {n} of {len} bytes",
                self.path.display()
            );
        }
        Ok(())
    }
}

pub struct BlockFile {
    store: Arc<FileStore>,
    cache: Arc<BlockCache>,
    complex: Vec<bool>,
    header: Option<Arc<dyn HeaderWriter>>,
    closed: bool,
}

impl BlockFile {
    /// Open a dataset file with a dimensioned layout.
    ///
    /// Writable files are created if missing and grown to the layout's total size.
    ///
    /// # Errors
    /// Returns an error if the layout is not dimensioned, the complex flags do
    /// not match it, or the file cannot be opened and mapped.
    pub fn open(
        path: impl AsRef<Path>,
        layout: Layout,
        cache: Arc<BlockCache>,
        options: BlockFileOptions,
    ) -> Result<Self> {
        layout.ensure_dimensioned()?;
        let n_dim = layout.n_dim();
        let complex = if options.complex.is_empty() {
            vec![false; n_dim]
        } else {
            options.complex
        };
        if complex.len() != n_dim {
            bail!(
                "got {} complex flags for a {n_dim}-axis layout",
                complex.len()
            );
        }
        if let Some(axis) = (0..n_dim).find(|&a| complex[a] && layout.size(a) % 2 != 0) {
            bail!(
                "complex axis {axis} has an odd raw size {}",
                layout.size(axis)
            );
        }

        let path = path.as_ref().to_path_buf();
        let backing = if options.writable {
            Backing::open_writable(&path, layout.total_size())?
        } else {
            Backing::open_read_only(&path)?
        };

        let id = NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            id,
            path = %path.display(),
            writable = options.writable,
            blocks = layout.total_blocks(),
            "opened block file"
        );

        Ok(Self {
            store: Arc::new(FileStore {
                id,
                path,
                layout,
                byte_order: options.byte_order,
                backing: RwLock::new(backing),
                block_reads: AtomicU64::new(0),
                block_writes: AtomicU64::new(0),
            }),
            cache,
            complex,
            header: options.header,
            closed: false,
        })
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.store.id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.store.path
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.store.layout
    }

    #[must_use]
    pub fn byte_order(&self) -> ByteOrder {
        self.store.byte_order
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.store.is_writable()
    }

    /// # Panics
    /// Panics if `dim` is out of range.
    #[must_use]
    pub fn size(&self, dim: usize) -> usize {
        self.store.layout.size(dim)
    }

    #[must_use]
    pub fn is_complex(&self, dim: usize) -> bool {
        self.complex.get(dim).copied().unwrap_or(false)
    }

    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.store.layout.total_size()
    }

    #[must_use]
    pub fn n_data_bytes(&self) -> u64 {
        self.store.layout.n_data_bytes()
    }

    /// Blocks loaded from the file since it was opened.
    #[must_use]
    pub fn block_reads(&self) -> u64 {
        self.store.block_reads.load(Ordering::Relaxed)
    }

    /// Blocks written to the file since it was opened.
    #[must_use]
    pub fn block_writes(&self) -> u64 {
        self.store.block_writes.load(Ordering::Relaxed)
    }

    /// # Errors
    /// Returns an error if `coords` does not address a valid point.
    pub fn byte_position(&self, coords: &[usize]) -> Result<u64> {
        mapper::byte_position(&self.store.layout, coords)
    }

    /// # Errors
    /// Returns an error if `coords` does not address a valid point.
    pub fn point_position(&self, coords: &[usize]) -> Result<u64> {
        mapper::point_position(&self.store.layout, coords)
    }

    /// # Errors
    /// Returns an error if `coords` is invalid or its block cannot be loaded.
    pub fn get_float(&self, coords: &[usize]) -> Result<f32> {
        let at = mapper::locate(&self.store.layout, coords)?;
        self.cache.read(&self.store, at)
    }

    /// # Errors
    /// Returns an error if the file is read-only, `coords` is invalid, or its
    /// block cannot be loaded.
    pub fn set_float(&self, value: f32, coords: &[usize]) -> Result<()> {
        let at = mapper::locate(&self.store.layout, coords)?;
        self.cache.write(&self.store, at, value)
    }

    /// Load one block directly from the file, bypassing the cache.
    ///
    /// A block that runs past the end of the file comes back zero-padded.
    ///
    /// # Errors
    /// Returns an error if `block` is out of range.
    pub fn read_block(&self, block: usize) -> Result<BlockBuf> {
        self.store.read_block(block)
    }

    /// Write one block directly to the file, bypassing the cache.
    ///
    /// # Errors
    /// Returns an error if `block` is out of range or the write is short.
    pub fn write_block(&self, block: usize, buf: &BlockBuf) -> Result<()> {
        self.store.write_block(block, buf)
    }

    /// `read_vector` reads raw points `raw` along axis `dim` through `point`.
    ///
    /// On a complex axis each pair of consecutive raw points becomes one
    /// sample (real first, then imaginary). Every value is divided by `scale`.
    ///
    /// # Errors
    /// Returns an error if the range or coordinates are invalid, `scale` is zero,
    /// or a block cannot be loaded.
    pub fn read_vector(
        &self,
        raw: Range<usize>,
        point: &[usize],
        dim: usize,
        scale: f64,
        vector: &mut DataVector,
    ) -> Result<()> {
        if scale == 0.0 || !scale.is_finite() {
            bail!("vector scale must be finite and non-zero, got {scale}");
        }
        let points = self.vector_points(&raw, point, dim)?;
        let mut values = vec![0f32; points.len()];
        self.cache.read_many(&self.store, &points, &mut values)?;

        *vector = if self.is_complex(dim) {
            DataVector::Complex(
                values
                    .chunks_exact(2)
                    .map(|pair| {
                        Complex64::new(f64::from(pair[0]) / scale, f64::from(pair[1]) / scale)
                    })
                    .collect(),
            )
        } else {
            DataVector::Real(values.iter().map(|&v| f64::from(v) / scale).collect())
        };
        Ok(())
    }

    /// `write_vector` stores `vector` at raw points `raw` along axis `dim`
    /// through `point`, multiplying every value by `scale`.
    ///
    /// # Errors
    /// Returns an error if the file is read-only, the vector kind or length does
    /// not fit the range, the coordinates are invalid, or a block cannot be loaded.
    pub fn write_vector(
        &self,
        raw: Range<usize>,
        point: &[usize],
        dim: usize,
        scale: f64,
        vector: &DataVector,
    ) -> Result<()> {
        let points = self.vector_points(&raw, point, dim)?;
        let values: Vec<f32> = match vector {
            DataVector::Complex(v) if self.is_complex(dim) => {
                let n = points.len() / 2;
                if v.len() < n {
                    bail!("vector holds {} complex samples, range needs {n}", v.len());
                }
                v[..n]
                    .iter()
                    .flat_map(|c| [(c.re * scale) as f32, (c.im * scale) as f32])
                    .collect()
            }
            DataVector::Real(v) if !self.is_complex(dim) => {
                if v.len() < points.len() {
                    bail!(
                        "vector holds {} samples, range needs {}",
                        v.len(),
                        points.len()
                    );
                }
                v[..points.len()]
                    .iter()
                    .map(|&x| (x * scale) as f32)
                    .collect()
            }
            _ => bail!(
                "vector kind does not match axis {dim} (complex = {})",
                self.is_complex(dim)
            ),
        };
        self.cache.write_many(&self.store, &points, &values)
    }

    /// Resolve every raw index of `raw` along `dim` before any cache access.
    fn vector_points(
        &self,
        raw: &Range<usize>,
        point: &[usize],
        dim: usize,
    ) -> Result<Vec<BlockPoint>> {
        let layout = &self.store.layout;
        if dim >= layout.n_dim() {
            bail!("axis {dim} out of range for {} axes", layout.n_dim());
        }
        if point.len() != layout.n_dim() {
            bail!(
                "expected {} coordinates, got {}",
                layout.n_dim(),
                point.len()
            );
        }
        if raw.end > layout.size(dim) {
            bail!(
                "raw range {raw:?} exceeds axis {dim} size {}",
                layout.size(dim)
            );
        }
        if self.is_complex(dim) && (raw.start % 2 != 0 || raw.len() % 2 != 0) {
            bail!("raw range {raw:?} on complex axis {dim} must cover whole samples");
        }

        let mut coords = point.to_vec();
        raw.clone()
            .map(|i| {
                coords[dim] = i;
                mapper::locate(layout, &coords)
            })
            .collect()
    }

    /// `write_header` encodes the file header into the start of the file.
    ///
    /// # Errors
    /// Returns an error if the file is read-only or the header does not fit.
    pub fn write_header(&self, extra: bool) -> Result<()> {
        if !self.is_writable() {
            bail!("cannot write header of read-only {}", self.path().display());
        }
        let layout = &self.store.layout;
        let len = usize::try_from(layout.file_header_size())?;
        let mut bytes = vec![0u8; len];
        match &self.header {
            Some(writer) => writer.write_header(layout, self.byte_order(), extra, &mut bytes)?,
            None => HeaderFormat::from_path(self.path()).writer().write_header(
                layout,
                self.byte_order(),
                extra,
                &mut bytes,
            )?,
        }

        let n = self.store.backing_mut()?.write_at(0, &bytes);
        if n < len {
            bail!(
                "short header write to {}: {n} of {len} bytes",
                self.path().display()
            );
        }
        Ok(())
    }

    /// `set_writable` reopens the file in the requested mode.
    ///
    /// Leaving write mode forces pending blocks to disk first.
    ///
    /// # Errors
    /// Returns an error if flushing or reopening fails.
    pub fn set_writable(&mut self, state: bool) -> Result<()> {
        let backing = if state {
            Backing::open_writable(&self.store.path, self.store.layout.total_size())?
        } else {
            self.force()?;
            Backing::open_read_only(&self.store.path)?
        };
        *self.store.backing_mut()? = backing;
        debug!(id = self.id(), writable = state, "reopened block file");
        Ok(())
    }

    /// `sum_values` adds every valid sample, reading through the cache.
    ///
    /// # Errors
    /// Returns an error if a block cannot be loaded.
    pub fn sum_values(&self) -> Result<f64> {
        let layout = &self.store.layout;
        let mut sum = 0.0;
        mapper::for_each_coord(layout, |coords| {
            let at = mapper::locate(layout, coords)?;
            sum += f64::from(self.cache.read(&self.store, at)?);
            Ok(())
        })?;
        Ok(sum)
    }

    /// `sum_fast` adds every stored sample, padding included, streaming blocks
    /// directly from the file.
    ///
    /// # Errors
    /// Returns an error if pending writes cannot be flushed or a block cannot be read.
    pub fn sum_fast(&self) -> Result<f64> {
        if self.is_writable() {
            self.force()?;
        }
        let order = self.byte_order();
        let mut sum = 0.0;
        for block in 0..self.store.layout.total_blocks() {
            sum += self.store.read_block(block)?.sum(order);
        }
        Ok(sum)
    }

    /// `zero` overwrites every block of the file with zeros.
    ///
    /// # Errors
    /// Returns an error if the file is read-only or a block write fails.
    pub fn zero(&self) -> Result<()> {
        if !self.is_writable() {
            bail!("cannot zero read-only {}", self.path().display());
        }
        self.force()?;
        let empty = BlockBuf::zeroed(self.store.layout.block_elements());
        for block in 0..self.store.layout.total_blocks() {
            self.store.write_block(block, &empty)?;
        }
        Ok(())
    }

    /// `force` writes back and evicts every cached block of this file, then
    /// flushes the mapping.
    ///
    /// # Errors
    /// Returns an error if any write-back or the flush fails.
    pub fn force(&self) -> Result<()> {
        self.cache.flush(self.store.as_ref())?;
        self.store.backing()?.flush()
    }

    /// `close` forces pending blocks to disk and releases the file.
    ///
    /// # Errors
    /// Returns an error if forcing fails. Unwritten blocks are then discarded so
    /// the file is released either way.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        let result = self.force();
        if result.is_err() {
            self.release();
        }
        debug!(id = self.id(), "closed block file");
        result
    }

    /// Drop whatever this file still has in the cache after a failed force.
    fn release(&self) {
        match self.cache.discard(self.id()) {
            Ok(0) => {}
            Ok(dropped) => warn!(
                path = %self.store.path.display(),
                dropped,
                "discarded unwritten blocks"
            ),
            Err(e) => warn!(path = %self.store.path.display(), "discard failed: {e:#}"),
        }
    }
}

impl Drop for BlockFile {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!(
            path = %self.store.path.display(),
            "block file dropped without close, forcing"
        );
        if let Err(e) = self.force() {
            warn!(path = %self.store.path.display(), "force on drop failed: {e:#}");
            self.release();
        }
    }
}
