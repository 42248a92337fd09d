//! Sketch bin representation.

/// A sketch bin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Bin {
    /// The bin key.
    pub(crate) k: i32,

    /// The weighted number of observations within the bin.
    pub(crate) n: f64,
}

impl Bin {
    pub(crate) const fn new(k: i32, n: f64) -> Self {
        Self { k, n }
    }
}
