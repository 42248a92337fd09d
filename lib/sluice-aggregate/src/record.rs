use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Series type of a flushed record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesType {
    /// A point-in-time value.
    Gauge,

    /// A total over the flush interval.
    Count,

    /// A per-second rate over the flush interval.
    Rate,
}

/// A single aggregated data point, ready to be submitted to the metrics backend.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FlushRecord {
    /// Metric name.
    pub metric: String,

    /// Data points, as `(timestamp, value)` pairs.
    pub points: Vec<(u64, f64)>,

    /// Tags.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Series type.
    #[serde(rename = "type")]
    pub series_type: SeriesType,

    /// Hostname the record is attributed to.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,

    /// Interval the record covers, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
}

impl FlushRecord {
    pub(crate) fn new(
        metric: String, tags: Vec<String>, series_type: SeriesType, timestamp: u64, value: f64, interval: Option<u64>,
    ) -> Self {
        Self {
            metric,
            points: vec![(timestamp, value)],
            tags,
            series_type,
            host: String::new(),
            interval,
        }
    }

    /// Returns the value of the first data point, if any.
    pub fn value(&self) -> Option<f64> {
        self.points.first().map(|(_, value)| *value)
    }
}

/// Gets the current Unix timestamp, in seconds.
pub(crate) fn get_unix_timestamp() -> u64 {
    // Clocks set before the epoch report zero.
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_optional_fields() {
        let mut record = FlushRecord::new(
            "requests".to_string(),
            vec!["env:prod".to_string()],
            SeriesType::Count,
            1_700_000_000,
            10.0,
            Some(10),
        );
        record.host = "web-01".to_string();

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "metric": "requests",
                "points": [[1_700_000_000u64, 10.0]],
                "tags": ["env:prod"],
                "type": "count",
                "host": "web-01",
                "interval": 10,
            })
        );
    }

    #[test]
    fn omits_empty_fields() {
        let record = FlushRecord::new("temp".to_string(), vec![], SeriesType::Gauge, 1, 15.0, None);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "metric": "temp",
                "points": [[1, 15.0]],
                "type": "gauge",
            })
        );
    }
}
