//! A bounded, relative-error quantile sketch used for histogram and timer aggregation.
//!
//! The sketch maps every inserted value to a logarithmically-sized bin such that any value reported back out of the
//! sketch is within the configured relative accuracy of a value that was actually inserted. The number of bins is
//! bounded: once the limit is reached, the lowest bins are collapsed together, trading accuracy at the low end of the
//! distribution for a fixed memory footprint.
#![deny(missing_docs)]

mod bin;

mod config;
pub use self::config::{SketchConfig, SketchError, DEFAULT_BIN_LIMIT, DEFAULT_RELATIVE_ACCURACY};

mod sketch;
pub use self::sketch::Sketch;
