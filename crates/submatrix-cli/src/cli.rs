use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use submatrix_rs::{ByteOrder, DEFAULT_CACHE_CAPACITY, HeaderFormat, Layout};

#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Blocks held by the shared block cache.
    #[arg(
        long,
        global = true,
        env = "SUBMATRIX_CACHE_BLOCKS",
        default_value_t = DEFAULT_CACHE_CAPACITY
    )]
    pub cache_blocks: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the block layout computed for a shape.
    Layout(LayoutArgs),

    /// Create a dataset file, write its header, and optionally fill it.
    Create(CreateArgs),

    /// Read one sample.
    Get(PointArgs),

    /// Write one sample.
    Set(SetArgs),

    /// Sum every sample of a dataset.
    Sum(SumArgs),

    /// Overwrite every sample of a dataset with zero.
    Zero(FileArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ShapeArgs {
    /// Raw points per axis (complex axes counted twice).
    #[arg(long, value_delimiter = ',', required = true)]
    pub sizes: Vec<usize>,

    /// Explicit block size per axis; overrides --target-points.
    #[arg(long, value_delimiter = ',')]
    pub block_sizes: Option<Vec<usize>>,

    #[arg(long, env = "SUBMATRIX_TARGET_POINTS", default_value_t = 4096)]
    pub target_points: usize,

    /// File header bytes; defaults to what the file format needs.
    #[arg(long)]
    pub header_size: Option<u64>,

    #[arg(long, default_value_t = 0)]
    pub block_header_size: u64,

    #[arg(long, value_enum, env = "SUBMATRIX_BYTE_ORDER", default_value_t = ByteOrderArg::Big)]
    pub byte_order: ByteOrderArg,

    /// Complex flag per axis, e.g. `true,false`.
    #[arg(long, value_delimiter = ',')]
    pub complex: Vec<bool>,
}

impl ShapeArgs {
    /// Build the dimensioned layout described by these arguments.
    pub fn layout(&self, format: HeaderFormat) -> anyhow::Result<Layout> {
        let header = self
            .header_size
            .unwrap_or_else(|| format.header_size(self.sizes.len()));
        let layout = match &self.block_sizes {
            Some(block_sizes) => Layout::with_block_sizes(
                header,
                self.block_header_size,
                &self.sizes,
                block_sizes,
            )?,
            None => Layout::for_target(
                header,
                self.block_header_size,
                &self.sizes,
                self.target_points,
            )?,
        };
        Ok(layout)
    }
}

#[derive(Args, Debug, Clone)]
pub struct LayoutArgs {
    #[command(flatten)]
    pub shape: ShapeArgs,

    #[arg(long, value_enum, default_value_t = FormatArg::Internal)]
    pub format: FormatArg,
}

#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    #[arg(long)]
    pub path: PathBuf,

    #[command(flatten)]
    pub shape: ShapeArgs,

    /// Fill the dataset with its flat point index.
    #[arg(long)]
    pub ramp: bool,

    /// Value of the header's extra flag.
    #[arg(long)]
    pub extra: bool,
}

#[derive(Args, Debug, Clone)]
pub struct FileArgs {
    #[arg(long)]
    pub path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct PointArgs {
    #[command(flatten)]
    pub file: FileArgs,

    /// Raw coordinate per axis.
    #[arg(long, value_delimiter = ',', required = true)]
    pub coords: Vec<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct SetArgs {
    #[command(flatten)]
    pub point: PointArgs,

    #[arg(long, allow_hyphen_values = true)]
    pub value: f32,
}

#[derive(Args, Debug, Clone)]
pub struct SumArgs {
    #[command(flatten)]
    pub file: FileArgs,

    /// Sum through the cache, skipping block padding.
    #[arg(long)]
    pub slow: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ByteOrderArg {
    Big,
    Little,
}

impl From<ByteOrderArg> for ByteOrder {
    fn from(arg: ByteOrderArg) -> Self {
        match arg {
            ByteOrderArg::Big => Self::Big,
            ByteOrderArg::Little => Self::Little,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum FormatArg {
    Internal,
    Ucsf,
}

impl From<FormatArg> for HeaderFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Internal => Self::Internal,
            FormatArg::Ucsf => Self::Ucsf,
        }
    }
}
