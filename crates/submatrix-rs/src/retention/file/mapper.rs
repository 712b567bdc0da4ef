//! Address helpers mapping raw N-D coordinates to blocks and file offsets.

use anyhow::{Result, bail};

use crate::layout::Layout;
use crate::layout::sample::ELEMENT_SIZE;

/// Location of one sample: which block holds it and where inside that block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockPoint {
    pub block: usize,
    pub offset: usize,
}

/// `locate` maps raw storage coordinates to their block and intra-block point offset.
///
/// # Arguments
/// * `layout` - Dimensioned layout of the dataset.
/// * `coords` - One raw index per axis (complex axes already doubled).
///
/// # Errors
/// Returns an error if the coordinate count is wrong or any index is out of range.
pub fn locate(layout: &Layout, coords: &[usize]) -> Result<BlockPoint> {
    if coords.len() != layout.n_dim() {
        bail!(
            "expected {} coordinates, got {}",
            layout.n_dim(),
            coords.len()
        );
    }
    let mut block = 0;
    let mut offset = 0;
    for (axis, &c) in coords.iter().enumerate() {
        if c >= layout.size(axis) {
            bail!(
                "coordinate {c} out of range for axis {axis} (size {})",
                layout.size(axis)
            );
        }
        let bs = layout.block_size(axis);
        block += (c / bs) * layout.offset_blocks()[axis];
        offset += (c % bs) * layout.offset_points()[axis];
    }
    Ok(BlockPoint { block, offset })
}

/// `block_byte_offset` returns the file offset of the first sample of `block`.
#[must_use]
pub const fn block_byte_offset(layout: &Layout, block: usize) -> u64 {
    block as u64 * layout.block_stride() + layout.file_header_size()
}

/// `byte_position` returns the file offset of the sample at `coords`.
///
/// # Errors
/// Returns an error if `coords` does not address a valid point.
pub fn byte_position(layout: &Layout, coords: &[usize]) -> Result<u64> {
    let at = locate(layout, coords)?;
    Ok(block_byte_offset(layout, at.block) + (at.offset * ELEMENT_SIZE) as u64)
}

/// `point_position` returns the flat point index of `coords` in block order.
///
/// # Errors
/// Returns an error if `coords` does not address a valid point.
pub fn point_position(layout: &Layout, coords: &[usize]) -> Result<u64> {
    let at = locate(layout, coords)?;
    Ok(at.block as u64 * layout.block_points() as u64 + at.offset as u64)
}

/// `for_each_coord` visits every valid coordinate of `layout`, axis 0 fastest.
pub fn for_each_coord(
    layout: &Layout,
    mut visit: impl FnMut(&[usize]) -> Result<()>,
) -> Result<()> {
    let n_dim = layout.n_dim();
    if layout.sizes().contains(&0) {
        return Ok(());
    }
    let mut coords = vec![0usize; n_dim];
    loop {
        visit(&coords)?;
        let mut axis = 0;
        loop {
            coords[axis] += 1;
            if coords[axis] < layout.size(axis) {
                break;
            }
            coords[axis] = 0;
            axis += 1;
            if axis == n_dim {
                return Ok(());
            }
        }
    }
}
