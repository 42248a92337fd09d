use super::FlushContext;
use crate::record::{FlushRecord, SeriesType};

/// Rate-adjusted sum of samples.
#[derive(Clone, Debug, Default)]
pub struct Counter {
    value: f64,
}

impl Counter {
    /// Adds a sample, scaled up by its sample rate.
    pub fn sample(&mut self, value: f64, sample_rate: f64) {
        self.value += value / sample_rate;
    }

    /// Returns the current total.
    pub fn value(&self) -> f64 {
        self.value
    }

    pub(super) fn flush(self, name: &str, tags: &[String], ctx: &FlushContext<'_>) -> FlushRecord {
        FlushRecord::new(
            name.to_string(),
            tags.to_vec(),
            SeriesType::Count,
            ctx.timestamp,
            self.value,
            Some(ctx.interval_secs()),
        )
    }
}
