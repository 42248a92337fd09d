use super::FlushContext;
use crate::record::{FlushRecord, SeriesType};

/// Last written value.
#[derive(Clone, Debug, Default)]
pub struct Gauge {
    value: f64,
}

impl Gauge {
    /// Overwrites the current value.
    pub fn sample(&mut self, value: f64) {
        self.value = value;
    }

    pub(super) fn flush(self, name: &str, tags: &[String], ctx: &FlushContext<'_>) -> FlushRecord {
        FlushRecord::new(
            name.to_string(),
            tags.to_vec(),
            SeriesType::Gauge,
            ctx.timestamp,
            self.value,
            None,
        )
    }
}
