//! Line protocol decoding.
//!
//! Each line has the form `<name>:<value>|<type>[|@<sample rate>][|#<tag>,<tag>,...]`, where `type` is one of `c`
//! (counter), `g` (gauge), `h` (histogram), `ms` (timer), or `s` (set). Unknown extension fields are skipped.

use std::hash::Hasher as _;

use fnv::FnvHasher;
use nom::{
    bytes::complete::{tag, take_while1},
    combinator::all_consuming,
    multi::separated_list1,
    number::complete::double,
    sequence::{preceded, separated_pair},
    IResult, Parser as _,
};
use sluice_aggregate::{MetricKind, Observation, ObservationError, ObservationValue};
use snafu::{ResultExt as _, Snafu};

/// Decoding error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum CodecError {
    /// The line does not follow the line protocol.
    #[snafu(display("malformed line '{}'", line))]
    Malformed {
        /// Offending line.
        line: String,
    },

    /// The metric type is not one of the supported types.
    #[snafu(display("unknown metric type '{}'", kind))]
    UnknownKind {
        /// Offending metric type.
        kind: String,
    },

    /// A numeric metric carried a value that is not a number.
    #[snafu(display("invalid value '{}' for {} metric", value, kind))]
    InvalidValue {
        /// Offending value.
        value: String,

        /// Metric kind the value was decoded for.
        kind: MetricKind,
    },

    /// The decoded fields do not form a valid observation.
    #[snafu(display("invalid observation: {}", source))]
    InvalidObservation {
        /// Error source.
        source: ObservationError,
    },
}

impl CodecError {
    /// Returns the reason tag this error is reported under.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "malformed",
            Self::UnknownKind { .. } => "unknown_kind",
            Self::InvalidValue { .. } => "invalid_value",
            Self::InvalidObservation { .. } => "invalid_observation",
        }
    }
}

/// Decodes a single line into an observation.
///
/// # Errors
///
/// If the line is malformed, names an unknown metric type, or carries an invalid value or sample rate, an error is
/// returned.
pub fn decode_line(line: &str) -> Result<Observation, CodecError> {
    let malformed = || CodecError::Malformed { line: line.to_string() };

    let (remaining, (name, raw_value, raw_kind)) = header(line).map_err(|_| malformed())?;
    let kind = parse_kind(raw_kind)?;

    let mut sample_rate = 1.0;
    let mut tags = Vec::new();
    for chunk in remaining.split('|').skip(1) {
        if let Some(rest) = chunk.strip_prefix('@') {
            sample_rate = parse_sample_rate(rest).map_err(|_| malformed())?;
        } else if let Some(rest) = chunk.strip_prefix('#') {
            tags = parse_tags(rest).map_err(|_| malformed())?;
        }
    }

    let value = match kind {
        MetricKind::Set => ObservationValue::Element(raw_value.to_string()),
        _ => raw_value
            .parse::<f64>()
            .map(ObservationValue::Numeric)
            .map_err(|_| CodecError::InvalidValue {
                value: raw_value.to_string(),
                kind,
            })?,
    };

    let digest = digest(name, kind, &tags);
    Observation::new(name, kind, tags, value, sample_rate, digest).context(InvalidObservation)
}

/// Computes the series identity of a name, kind, and tag set.
///
/// Tags are hashed in sorted order, so the digest does not depend on the order they were written in.
pub fn digest(name: &str, kind: MetricKind, tags: &[String]) -> u32 {
    let mut sorted = tags.iter().map(String::as_str).collect::<Vec<_>>();
    sorted.sort_unstable();

    let mut hasher = FnvHasher::default();
    hasher.write(name.as_bytes());
    hasher.write_u8(0);
    hasher.write(kind.as_str().as_bytes());
    for tag in sorted {
        hasher.write_u8(0);
        hasher.write(tag.as_bytes());
    }

    let hash = hasher.finish();
    (hash ^ (hash >> 32)) as u32
}

fn header(input: &str) -> IResult<&str, (&str, &str, &str)> {
    let (remaining, (name, raw_value)) =
        separated_pair(take_while1(is_name_char), tag(":"), take_while1(|c: char| c != '|')).parse(input)?;
    let (remaining, raw_kind) = preceded(tag("|"), take_while1(|c: char| c != '|')).parse(remaining)?;

    Ok((remaining, (name, raw_value, raw_kind)))
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_graphic() && c != ':' && c != '|'
}

fn parse_kind(raw_kind: &str) -> Result<MetricKind, CodecError> {
    match raw_kind {
        "c" => Ok(MetricKind::Counter),
        "g" => Ok(MetricKind::Gauge),
        "h" => Ok(MetricKind::Histogram),
        "ms" => Ok(MetricKind::Timer),
        "s" => Ok(MetricKind::Set),
        other => Err(CodecError::UnknownKind { kind: other.to_string() }),
    }
}

fn parse_sample_rate(input: &str) -> Result<f64, nom::Err<nom::error::Error<&str>>> {
    let (_, sample_rate) = all_consuming(double).parse(input)?;
    Ok(sample_rate)
}

fn parse_tags(input: &str) -> Result<Vec<String>, nom::Err<nom::error::Error<&str>>> {
    let (_, tags) = all_consuming(separated_list1(tag(","), take_while1(|c: char| c != ','))).parse(input)?;
    Ok(tags.into_iter().map(str::to_string).collect())
}
