use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use submatrix_rs::retention::file::mapper::for_each_coord;
use submatrix_rs::{BlockCache, BlockFile, BlockFileOptions, HeaderFormat, Layout, read_header};
use tracing::info;

use crate::cli::{CreateArgs, FileArgs, LayoutArgs, PointArgs, SetArgs, SumArgs};

pub fn print_layout(args: &LayoutArgs) -> Result<()> {
    let layout = args.shape.layout(args.format.into())?;
    describe(&layout);
    Ok(())
}

fn describe(layout: &Layout) {
    println!("axes:           {}", layout.n_dim());
    println!("sizes:          {:?}", layout.sizes());
    println!("block sizes:    {:?}", layout.block_sizes());
    println!("blocks:         {:?}", layout.n_blocks());
    println!("block strides:  {:?}", layout.offset_blocks());
    println!("point strides:  {:?}", layout.offset_points());
    println!("block points:   {}", layout.block_points());
    println!("total blocks:   {}", layout.total_blocks());
    println!("sub-matrix:     {}", layout.is_sub_matrix());
    println!("header bytes:   {}", layout.file_header_size());
    println!("file bytes:     {}", layout.total_size());
    println!("data bytes:     {}", layout.n_data_bytes());
}

pub fn create(args: &CreateArgs, cache: Arc<BlockCache>) -> Result<()> {
    let format = HeaderFormat::from_path(&args.path);
    let layout = args.shape.layout(format)?;
    let options = BlockFileOptions {
        byte_order: args.shape.byte_order.into(),
        writable: true,
        complex: args.shape.complex.clone(),
        header: None,
    };

    let file = BlockFile::open(&args.path, layout, cache, options)?;
    file.write_header(args.extra)?;
    if args.ramp {
        let mut next = 0f32;
        for_each_coord(file.layout(), |coords| {
            file.set_float(next, coords)?;
            next += 1.0;
            Ok(())
        })?;
    }
    info!(
        path = %args.path.display(),
        blocks = file.layout().total_blocks(),
        bytes = file.total_size(),
        "created dataset"
    );
    describe(file.layout());
    file.close()
}

fn open_existing(path: &Path, cache: Arc<BlockCache>, writable: bool) -> Result<BlockFile> {
    let info = read_header(path)?;
    let options = BlockFileOptions {
        byte_order: info.byte_order,
        writable,
        ..BlockFileOptions::default()
    };
    BlockFile::open(path, info.layout, cache, options)
}

pub fn get(args: &PointArgs, cache: Arc<BlockCache>) -> Result<()> {
    let file = open_existing(&args.file.path, cache, false)?;
    let value = file.get_float(&args.coords)?;
    println!("{value}");
    file.close()
}

pub fn set(args: &SetArgs, cache: Arc<BlockCache>) -> Result<()> {
    let file = open_existing(&args.point.file.path, cache, true)?;
    file.set_float(args.value, &args.point.coords)?;
    info!(coords = ?args.point.coords, value = args.value, "stored sample");
    file.close()
}

pub fn sum(args: &SumArgs, cache: Arc<BlockCache>) -> Result<()> {
    let file = open_existing(&args.file.path, cache, false)?;
    let total = if args.slow {
        file.sum_values()?
    } else {
        file.sum_fast()?
    };
    println!("{total}");
    file.close()
}

pub fn zero(args: &FileArgs, cache: Arc<BlockCache>) -> Result<()> {
    let file = open_existing(&args.path, cache, true)?;
    file.zero()?;
    info!(path = %args.path.display(), "zeroed dataset");
    file.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{ByteOrderArg, ShapeArgs};
    use tempfile::tempdir;

    fn shape() -> ShapeArgs {
        ShapeArgs {
            sizes: vec![6, 5],
            block_sizes: Some(vec![4, 4]),
            target_points: 4096,
            header_size: None,
            block_header_size: 0,
            byte_order: ByteOrderArg::Little,
            complex: Vec::new(),
        }
    }

    #[test]
    fn create_ramp_then_edit_and_zero() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("ramp.nv");
        let cache = Arc::new(BlockCache::new(4).expect("cache"));

        create(
            &CreateArgs {
                path: path.clone(),
                shape: shape(),
                ramp: true,
                extra: false,
            },
            Arc::clone(&cache),
        )
        .expect("create");

        let file = open_existing(&path, Arc::clone(&cache), false).expect("reopen");
        assert_eq!(file.byte_order(), submatrix_rs::ByteOrder::Little);
        assert_eq!(file.get_float(&[0, 0]).expect("get"), 0.0);
        assert_eq!(file.get_float(&[5, 0]).expect("get"), 5.0);
        assert_eq!(file.get_float(&[0, 1]).expect("get"), 6.0);
        // 0 + 1 + ... + 29
        assert_eq!(file.sum_fast().expect("sum"), 435.0);
        file.close().expect("close");

        set(
            &SetArgs {
                point: PointArgs {
                    file: FileArgs { path: path.clone() },
                    coords: vec![5, 4],
                },
                value: -1.0,
            },
            Arc::clone(&cache),
        )
        .expect("set");
        let file = open_existing(&path, Arc::clone(&cache), false).expect("reopen");
        assert_eq!(file.get_float(&[5, 4]).expect("get"), -1.0);
        file.close().expect("close");

        zero(&FileArgs { path: path.clone() }, Arc::clone(&cache)).expect("zero");
        let file = open_existing(&path, cache, false).expect("reopen");
        assert_eq!(file.sum_values().expect("sum"), 0.0);
        file.close().expect("close");
    }

    #[test]
    fn open_existing_rejects_missing_file() {
        let dir = tempdir().expect("tempdir");
        let cache = Arc::new(BlockCache::new(2).expect("cache"));
        assert!(open_existing(&dir.path().join("absent.nv"), cache, false).is_err());
    }
}
