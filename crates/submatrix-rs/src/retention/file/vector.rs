use num_complex::Complex64;

/// Samples moved along one axis by vector I/O.
#[derive(Clone, Debug, PartialEq)]
pub enum DataVector {
    Real(Vec<f64>),
    Complex(Vec<Complex64>),
}

impl DataVector {
    #[must_use]
    pub const fn is_complex(&self) -> bool {
        matches!(self, Self::Complex(_))
    }

    /// Number of (real or complex) samples.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Real(v) => v.len(),
            Self::Complex(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of raw storage points this vector occupies.
    #[must_use]
    pub fn raw_len(&self) -> usize {
        match self {
            Self::Real(v) => v.len(),
            Self::Complex(v) => v.len() * 2,
        }
    }
}

impl Default for DataVector {
    fn default() -> Self {
        Self::Real(Vec::new())
    }
}
