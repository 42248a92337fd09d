use smallvec::SmallVec;

use crate::bin::Bin;
use crate::config::SketchConfig;

/// Relative-error quantile sketch.
///
/// Tracks the count, sum, minimum, and maximum of all inserted values exactly, and answers quantile queries with a
/// relative error bounded by the configured accuracy. Inserted values may carry a weight, which is how sampled
/// observations are represented: a value sampled at a rate of 0.25 is inserted with a weight of 4.
///
/// Minimum and maximum are tracked on the raw values, independent of weight.
#[derive(Clone, Debug)]
pub struct Sketch {
    config: SketchConfig,

    /// The bins within the sketch, sorted by key.
    bins: SmallVec<[Bin; 4]>,

    /// The weighted number of observations within the sketch.
    count: f64,

    /// The minimum value of all observations within the sketch.
    min: f64,

    /// The maximum value of all observations within the sketch.
    max: f64,

    /// The weighted sum of all observations within the sketch.
    sum: f64,
}

impl Sketch {
    /// Creates an empty `Sketch` with the given configuration.
    pub fn new(config: SketchConfig) -> Self {
        Self {
            config,
            bins: SmallVec::new(),
            count: 0.0,
            min: f64::MAX,
            max: f64::MIN,
            sum: 0.0,
        }
    }

    /// Returns the configuration of this sketch.
    pub fn config(&self) -> &SketchConfig {
        &self.config
    }

    /// Returns `true` if the sketch is empty.
    pub fn is_empty(&self) -> bool {
        self.count == 0.0
    }

    /// Returns the weighted number of observations in the sketch.
    pub fn count(&self) -> f64 {
        self.count
    }

    /// Returns the minimum value inserted into the sketch, or `None` if it is empty.
    pub fn min(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.min)
    }

    /// Returns the maximum value inserted into the sketch, or `None` if it is empty.
    pub fn max(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.max)
    }

    /// Returns the weighted sum of all values inserted into the sketch, or `None` if it is empty.
    pub fn sum(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.sum)
    }

    /// Returns the weighted average of all values inserted into the sketch, or `None` if it is empty.
    pub fn avg(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.sum / self.count)
    }

    /// Returns the number of bins currently held by the sketch.
    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    /// Inserts a single value into the sketch.
    pub fn insert(&mut self, v: f64) {
        self.insert_weighted(v, 1.0);
    }

    /// Inserts a single value into the sketch with the given weight.
    ///
    /// Values which are not finite, and weights which are not finite and positive, are ignored.
    pub fn insert_weighted(&mut self, v: f64, weight: f64) {
        if !v.is_finite() || !weight.is_finite() || weight <= 0.0 {
            return;
        }

        self.count += weight;
        self.sum += v * weight;
        self.min = self.min.min(v);
        self.max = self.max.max(v);

        let k = self.config.key(v);
        match self.bins.binary_search_by_key(&k, |bin| bin.k) {
            Ok(idx) => self.bins[idx].n += weight,
            Err(idx) => {
                self.bins.insert(idx, Bin::new(k, weight));
                self.trim_left();
            }
        }
    }

    /// Returns the approximate value at the given quantile.
    ///
    /// `q` is clamped to [0, 1]: anything at or below 0 returns the minimum, and anything at or above 1 returns the
    /// maximum. Estimates are always clamped to the range of inserted values, so a sketch with fewer values than
    /// requested quantiles still answers with a value inside [min, max].
    ///
    /// If the sketch is empty, `None` is returned.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.is_empty() {
            return None;
        }

        if q <= 0.0 {
            return Some(self.min);
        }

        if q >= 1.0 {
            return Some(self.max);
        }

        let wanted_rank = q * (self.count - 1.0).max(0.0);
        let mut n = 0.0;
        for bin in &self.bins {
            n += bin.n;
            if n > wanted_rank {
                return Some(self.config.bin_value(bin.k).clamp(self.min, self.max));
            }
        }

        Some(self.max)
    }

    /// Collapses the lowest bins together until the bin limit is respected.
    fn trim_left(&mut self) {
        let bin_limit = self.config.bin_limit();
        if self.bins.len() <= bin_limit {
            return;
        }

        let num_to_remove = self.bins.len() - bin_limit;
        let missing: f64 = self.bins[..num_to_remove].iter().map(|bin| bin.n).sum();
        self.bins[num_to_remove].n += missing;
        self.bins.drain(..num_to_remove);
    }
}

impl Default for Sketch {
    fn default() -> Self {
        Self::new(SketchConfig::default())
    }
}
