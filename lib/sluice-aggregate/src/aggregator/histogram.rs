use sluice_sketch::{Sketch, SketchConfig};

use super::FlushContext;
use crate::record::{FlushRecord, SeriesType};

/// Distribution of samples, summarized by a quantile sketch.
///
/// Flushes as a family of derived series: `.min`, `.max`, `.count`, `.avg`, one `.<P>percentile` per configured
/// percentile, and optionally `.rate`.
#[derive(Clone, Debug)]
pub struct Histogram {
    sketch: Sketch,
}

impl Histogram {
    /// Creates an empty `Histogram`.
    pub fn new(config: SketchConfig) -> Self {
        Self {
            sketch: Sketch::new(config),
        }
    }

    /// Records a sample, weighted by the inverse of its sample rate.
    pub fn sample(&mut self, value: f64, sample_rate: f64) {
        self.sketch.insert_weighted(value, 1.0 / sample_rate);
    }

    /// Returns the underlying sketch.
    pub fn sketch(&self) -> &Sketch {
        &self.sketch
    }

    pub(super) fn flush(self, name: &str, tags: &[String], ctx: &FlushContext<'_>) -> Vec<FlushRecord> {
        let sketch = self.sketch;
        let (Some(min), Some(max), Some(avg)) = (sketch.min(), sketch.max(), sketch.avg()) else {
            return Vec::new();
        };

        let count = sketch.count();
        let interval_secs = ctx.interval_secs();
        let record = |suffix: &str, series_type: SeriesType, value: f64, interval: Option<u64>| {
            FlushRecord::new(
                format!("{}.{}", name, suffix),
                tags.to_vec(),
                series_type,
                ctx.timestamp,
                value,
                interval,
            )
        };

        let mut records = Vec::with_capacity(5 + ctx.settings.percentiles.len());
        records.push(record("min", SeriesType::Gauge, min, None));
        records.push(record("max", SeriesType::Gauge, max, None));
        records.push(record("count", SeriesType::Count, count, Some(interval_secs)));
        records.push(record("avg", SeriesType::Gauge, avg, None));

        for percentile in &ctx.settings.percentiles {
            if let Some(value) = sketch.quantile(*percentile) {
                records.push(record(&percentile_suffix(*percentile), SeriesType::Gauge, value, None));
            }
        }

        if ctx.settings.histogram_counter && interval_secs > 0 {
            #[allow(clippy::cast_precision_loss)]
            let rate = count / interval_secs as f64;
            records.push(record("rate", SeriesType::Rate, rate, Some(interval_secs)));
        }

        records
    }
}

/// Formats a percentile in [0, 1] as a series suffix, such as `50percentile` or `99.9percentile`.
fn percentile_suffix(percentile: f64) -> String {
    // Round to a tenth of a percent so that 0.999 renders as 99.9 rather than 99.89999999999999.
    let scaled = (percentile * 1000.0).round() / 10.0;
    format!("{}percentile", scaled)
}
