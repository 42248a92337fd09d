//! Sketch configuration.

use snafu::Snafu;

/// Default relative accuracy of a sketch.
pub const DEFAULT_RELATIVE_ACCURACY: f64 = 0.01;

/// Default maximum number of bins held by a sketch.
pub const DEFAULT_BIN_LIMIT: usize = 4096;

// Smallest magnitude that gets its own bin. Anything smaller is folded into the zero bin.
const NORM_MIN: f64 = 1e-9;

/// Sketch configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum SketchError {
    /// Relative accuracy was not strictly between 0 and 1.
    #[snafu(display("relative accuracy must be between 0 and 1 (exclusive), got {}", relative_accuracy))]
    InvalidRelativeAccuracy {
        /// The rejected relative accuracy.
        relative_accuracy: f64,
    },

    /// Bin limit was zero.
    #[snafu(display("bin limit must be greater than zero"))]
    ZeroBinLimit,
}

/// Sketch configuration.
///
/// Holds the user-facing parameters (relative accuracy and bin limit) as well as the mapping constants derived from
/// them, so that a sketch never has to recompute them on the insert path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SketchConfig {
    relative_accuracy: f64,
    bin_limit: usize,

    // gamma_ln is the natural log of gamma_v, used to speed up calculating log base gamma.
    gamma_v: f64,
    gamma_ln: f64,

    // Bias of the exponent, used to ensure key(norm_min) == 1.
    norm_bias: i32,
}

impl SketchConfig {
    /// Creates a new `SketchConfig` with the given relative accuracy and bin limit.
    ///
    /// # Errors
    ///
    /// If the relative accuracy is not strictly between 0 and 1, or the bin limit is zero, an error is returned.
    pub fn new(relative_accuracy: f64, bin_limit: usize) -> Result<Self, SketchError> {
        if !(relative_accuracy > 0.0 && relative_accuracy < 1.0) {
            return Err(SketchError::InvalidRelativeAccuracy { relative_accuracy });
        }

        if bin_limit == 0 {
            return Err(SketchError::ZeroBinLimit);
        }

        Ok(Self::derive(relative_accuracy, bin_limit))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn derive(relative_accuracy: f64, bin_limit: usize) -> Self {
        let gamma_v = (1.0 + relative_accuracy) / (1.0 - relative_accuracy);
        let gamma_ln = gamma_v.ln();
        let norm_bias = 1 - (NORM_MIN.ln() / gamma_ln).ceil() as i32;

        Self {
            relative_accuracy,
            bin_limit,
            gamma_v,
            gamma_ln,
            norm_bias,
        }
    }

    /// Returns the relative accuracy.
    pub fn relative_accuracy(&self) -> f64 {
        self.relative_accuracy
    }

    /// Returns the maximum number of bins.
    pub fn bin_limit(&self) -> usize {
        self.bin_limit
    }

    /// Gets the key for the given value.
    ///
    /// For positive values, the key `k` is such that γ^(k-bias-1) < v <= γ^(k-bias). Negative values are mirrored, and
    /// values too close to zero map to key 0.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn key(&self, v: f64) -> i32 {
        if v < 0.0 {
            return -self.key(-v);
        }

        if v < NORM_MIN {
            return 0;
        }

        let k = (v.ln() / self.gamma_ln).ceil() as i32;
        k.saturating_add(self.norm_bias).max(1)
    }

    /// Gets the representative value of the bin at the given key.
    ///
    /// This is the point within the bin's range that minimizes the worst-case relative error for any value in it.
    pub(crate) fn bin_value(&self, k: i32) -> f64 {
        if k < 0 {
            return -self.bin_value(-k);
        }

        if k == 0 {
            return 0.0;
        }

        let upper = self.gamma_v.powi(k - self.norm_bias);
        2.0 * upper / (self.gamma_v + 1.0)
    }
}

impl Default for SketchConfig {
    fn default() -> Self {
        Self::derive(DEFAULT_RELATIVE_ACCURACY, DEFAULT_BIN_LIMIT)
    }
}
