use std::fmt;

/// Configuration problems detected before a layout is dimensioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    EmptyShape,
    DimensionMismatch { expected: usize, got: usize },
    ZeroBlockSize { axis: usize },
    ZeroTarget,
    NotDimensioned,
    HeaderTooSmall { required: u64, available: u64 },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyShape => write!(f, "layout needs at least one axis with a non-zero size"),
            Self::DimensionMismatch { expected, got } => {
                write!(f, "dimension mismatch: expected {expected} axes, got {got}")
            }
            Self::ZeroBlockSize { axis } => write!(f, "block size of axis {axis} is zero"),
            Self::ZeroTarget => write!(f, "target block point count must be positive"),
            Self::NotDimensioned => write!(f, "layout has not been dimensioned"),
            Self::HeaderTooSmall {
                required,
                available,
            } => write!(
                f,
                "file header needs {required} bytes but the layout reserves {available}"
            ),
        }
    }
}

impl std::error::Error for LayoutError {}
