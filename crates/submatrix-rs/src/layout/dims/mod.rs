//! Partitioning of an N-dimensional array into equally shaped blocks.
//!
//! A [`Layout`] is a pure description: per-axis sizes (complex axes already
//! counted twice), per-axis block sizes, and the strides derived from them.
//! Axis 0 varies fastest both between blocks and inside a block.


use tracing::debug;

use crate::layout::error::LayoutError;
use crate::layout::sample::ELEMENT_SIZE;

#[derive(Clone, Debug, PartialEq, Eq)]
/// Layout holds the block geometry of one dataset file.
pub struct Layout {
    sizes: Vec<usize>,
    block_sizes: Vec<usize>,
    n_blocks: Vec<usize>,
    offset_blocks: Vec<usize>,
    offset_points: Vec<usize>,
    block_points: usize,
    block_elements: usize,
    total_blocks: usize,
    file_header_size: u64,
    block_header_size: u64,
    sub_matrix: bool,
    dimensioned: bool,
}

impl Layout {
    /// `new` records the shape of a dataset without choosing block sizes yet.
    ///
    /// The result is not dimensioned until block sizes are supplied through
    /// [`Self::set_block_sizes`] or [`Self::block_size_for_target`].
    ///
    /// # Errors
    /// Returns [`LayoutError::EmptyShape`] if `sizes` is empty.
    pub fn new(
        file_header_size: u64,
        block_header_size: u64,
        sizes: &[usize],
    ) -> Result<Self, LayoutError> {
        if sizes.is_empty() {
            return Err(LayoutError::EmptyShape);
        }
        let n_dim = sizes.len();
        Ok(Self {
            sizes: sizes.to_vec(),
            block_sizes: vec![0; n_dim],
            n_blocks: vec![0; n_dim],
            offset_blocks: vec![0; n_dim],
            offset_points: vec![0; n_dim],
            block_points: 0,
            block_elements: 0,
            total_blocks: 0,
            file_header_size,
            block_header_size,
            sub_matrix: false,
            dimensioned: false,
        })
    }

    /// `full_matrix` lays the whole array out as a single block.
    ///
    /// # Errors
    /// Returns an error if `sizes` is empty or contains a zero.
    pub fn full_matrix(header_size: u64, sizes: &[usize]) -> Result<Self, LayoutError> {
        let mut layout = Self::new(header_size, 0, sizes)?;
        layout.set_block_sizes(sizes)?;
        Ok(layout)
    }

    /// `with_block_sizes` builds a dimensioned layout from explicit block sizes.
    ///
    /// # Errors
    /// Returns an error if the axis counts disagree or any size is zero.
    pub fn with_block_sizes(
        file_header_size: u64,
        block_header_size: u64,
        sizes: &[usize],
        block_sizes: &[usize],
    ) -> Result<Self, LayoutError> {
        let mut layout = Self::new(file_header_size, block_header_size, sizes)?;
        layout.set_block_sizes(block_sizes)?;
        Ok(layout)
    }

    /// `for_target` builds a dimensioned layout whose blocks hold roughly `target` points.
    ///
    /// # Errors
    /// Returns an error if the shape is empty, has a zero axis, or `target` is zero.
    pub fn for_target(
        file_header_size: u64,
        block_header_size: u64,
        sizes: &[usize],
        target: usize,
    ) -> Result<Self, LayoutError> {
        let mut layout = Self::new(file_header_size, block_header_size, sizes)?;
        layout.block_size_for_target(target)?;
        Ok(layout)
    }

    /// `set_block_sizes` validates and installs per-axis block sizes, then dimensions.
    ///
    /// # Errors
    /// Returns [`LayoutError::DimensionMismatch`] or [`LayoutError::ZeroBlockSize`]
    /// before any stride is recomputed.
    pub fn set_block_sizes(&mut self, block_sizes: &[usize]) -> Result<(), LayoutError> {
        if block_sizes.len() != self.sizes.len() {
            return Err(LayoutError::DimensionMismatch {
                expected: self.sizes.len(),
                got: block_sizes.len(),
            });
        }
        if let Some(axis) = block_sizes.iter().position(|&b| b == 0) {
            return Err(LayoutError::ZeroBlockSize { axis });
        }
        if self.sizes.contains(&0) {
            return Err(LayoutError::EmptyShape);
        }
        self.block_sizes = block_sizes.to_vec();
        self.dim_dataset();
        Ok(())
    }

    /// `block_size_for_target` picks power-of-two block sizes so that one block
    /// holds close to `target` points.
    ///
    /// Each axis is rounded up to the next power of two and an initial number of
    /// blocks per axis is seeded from the `n_dim`-th root of the block count. Two
    /// balancing passes then nudge the axis with the most blocks until the block
    /// volume approaches `target`. Arrays that fit in fewer than two target-sized
    /// blocks are kept as one block spanning the whole array.
    ///
    /// # Errors
    /// Returns an error if `target` is zero or the shape has a zero axis.
    pub fn block_size_for_target(&mut self, target: usize) -> Result<(), LayoutError> {
        if target == 0 {
            return Err(LayoutError::ZeroTarget);
        }
        if self.sizes.contains(&0) {
            return Err(LayoutError::EmptyShape);
        }

        let n_dim = self.n_dim();
        let target = target as u64;
        let bsize: Vec<usize> = self.sizes.iter().map(|s| s.next_power_of_two()).collect();
        let npoints = bsize
            .iter()
            .fold(1u64, |acc, &b| acc.saturating_mul(b as u64));
        let nblks = npoints.div_ceil(target);

        if nblks < 2 {
            self.block_sizes = self.sizes.clone();
        } else {
            let per_axis = round_to_pow2((nblks as f64).powf(1.0 / n_dim as f64));
            let mut nbdim: Vec<usize> = bsize.iter().map(|&b| per_axis.min(b)).collect();

            for _ in 0..2 {
                let (max_axis, min_axis) = extreme_axes(&nbdim);
                let volume = block_volume(&bsize, &nbdim);
                if volume > target && nbdim[max_axis] < bsize[max_axis] {
                    nbdim[max_axis] *= 2;
                } else if volume < target && nbdim[max_axis] > 1 {
                    nbdim[max_axis] /= 2;
                }
                if nbdim[min_axis] < 2 && bsize[min_axis] >= 2 {
                    nbdim[min_axis] = 2;
                    nbdim[max_axis] = (nbdim[max_axis] / 2).max(1);
                }
            }

            self.block_sizes = bsize
                .iter()
                .zip(&nbdim)
                .map(|(&b, &n)| (b / n).max(1))
                .collect();
        }

        debug!(
            sizes = ?self.sizes,
            block_sizes = ?self.block_sizes,
            target,
            "computed block sizes"
        );
        self.dim_dataset();
        Ok(())
    }

    /// `dim_dataset` recomputes block counts, strides and totals from the
    /// current sizes and block sizes.
    ///
    /// # Returns
    /// `false` (and leaves the layout untouched) while any size or block size is
    /// still zero, `true` once the layout is dimensioned.
    pub fn dim_dataset(&mut self) -> bool {
        if self.sizes.contains(&0)
            || self.block_sizes.len() != self.sizes.len()
            || self.block_sizes.contains(&0)
        {
            return false;
        }

        let n_dim = self.n_dim();
        self.n_blocks = self
            .sizes
            .iter()
            .zip(&self.block_sizes)
            .map(|(&s, &b)| s.div_ceil(b))
            .collect();
        self.sub_matrix = self.n_blocks.iter().any(|&n| n != 1);

        self.offset_blocks = vec![1; n_dim];
        self.offset_points = vec![1; n_dim];
        for i in 1..n_dim {
            self.offset_blocks[i] = self.n_blocks[i - 1] * self.offset_blocks[i - 1];
            self.offset_points[i] = self.block_sizes[i - 1] * self.offset_points[i - 1];
        }

        self.block_points = self.block_sizes.iter().product();
        self.block_elements = ELEMENT_SIZE * self.block_points;
        self.total_blocks = self.n_blocks.iter().product();
        self.dimensioned = true;
        true
    }

    #[must_use]
    pub fn n_dim(&self) -> usize {
        self.sizes.len()
    }

    #[must_use]
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// # Panics
    /// Panics if `axis` is out of range.
    #[must_use]
    pub fn size(&self, axis: usize) -> usize {
        self.sizes[axis]
    }

    #[must_use]
    pub fn block_sizes(&self) -> &[usize] {
        &self.block_sizes
    }

    /// # Panics
    /// Panics if `axis` is out of range.
    #[must_use]
    pub fn block_size(&self, axis: usize) -> usize {
        self.block_sizes[axis]
    }

    #[must_use]
    pub fn n_blocks(&self) -> &[usize] {
        &self.n_blocks
    }

    #[must_use]
    pub fn offset_blocks(&self) -> &[usize] {
        &self.offset_blocks
    }

    #[must_use]
    pub fn offset_points(&self) -> &[usize] {
        &self.offset_points
    }

    #[must_use]
    pub const fn block_points(&self) -> usize {
        self.block_points
    }

    /// Bytes of sample data in one block.
    #[must_use]
    pub const fn block_elements(&self) -> usize {
        self.block_elements
    }

    #[must_use]
    pub const fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    #[must_use]
    pub const fn file_header_size(&self) -> u64 {
        self.file_header_size
    }

    #[must_use]
    pub const fn block_header_size(&self) -> u64 {
        self.block_header_size
    }

    #[must_use]
    pub const fn is_sub_matrix(&self) -> bool {
        self.sub_matrix
    }

    #[must_use]
    pub const fn is_dimensioned(&self) -> bool {
        self.dimensioned
    }

    /// Distance in bytes between the starts of consecutive blocks.
    #[must_use]
    pub const fn block_stride(&self) -> u64 {
        self.block_elements as u64 + self.block_header_size
    }

    /// Size in bytes of a complete file with this layout.
    #[must_use]
    pub const fn total_size(&self) -> u64 {
        self.file_header_size + self.total_blocks as u64 * self.block_stride()
    }

    /// Bytes of sample data for the logical array, without block padding or headers.
    #[must_use]
    pub fn n_data_bytes(&self) -> u64 {
        self.sizes.iter().map(|&s| s as u64).product::<u64>() * ELEMENT_SIZE as u64
    }

    /// `ensure_dimensioned` rejects a layout whose strides were never computed.
    ///
    /// # Errors
    /// Returns [`LayoutError::NotDimensioned`].
    pub const fn ensure_dimensioned(&self) -> Result<(), LayoutError> {
        if self.dimensioned {
            Ok(())
        } else {
            Err(LayoutError::NotDimensioned)
        }
    }
}

/// `round_to_pow2` returns the power of two nearest to `x` on a log scale (at least 1).
fn round_to_pow2(x: f64) -> usize {
    if !x.is_finite() || x <= 1.0 {
        return 1;
    }
    let exp = x.log2().round() as u32;
    1usize.checked_shl(exp).unwrap_or(usize::MAX / 2 + 1)
}

/// Index of the first axis with the most blocks and of the first with the fewest.
fn extreme_axes(nbdim: &[usize]) -> (usize, usize) {
    let mut max_axis = 0;
    let mut min_axis = 0;
    for (i, &n) in nbdim.iter().enumerate() {
        if n > nbdim[max_axis] {
            max_axis = i;
        }
        if n < nbdim[min_axis] {
            min_axis = i;
        }
    }
    (max_axis, min_axis)
}

fn block_volume(bsize: &[usize], nbdim: &[usize]) -> u64 {
    bsize
        .iter()
        .zip(nbdim)
        .fold(1u64, |acc, (&b, &n)| acc.saturating_mul((b / n) as u64))
}
