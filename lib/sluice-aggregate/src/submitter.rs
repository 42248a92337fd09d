use std::{borrow::Cow, time::Instant};

use async_compression::tokio::write::ZlibEncoder;
use bytes::Bytes;
use http::{
    header::{CONTENT_ENCODING, CONTENT_TYPE},
    HeaderValue, Method, Request, Response, StatusCode, Uri,
};
use http_body::Body;
use http_body_util::{BodyExt as _, Full};
use snafu::{ResultExt as _, Snafu};
use tokio::io::AsyncWriteExt as _;
use tower::{BoxError, Service, ServiceExt as _};
use tracing::{debug, error};

use crate::config::{ConfigError, ForwarderConfiguration};
use crate::record::FlushRecord;
use crate::telemetry::SubmitTelemetry;

static CONTENT_TYPE_JSON: HeaderValue = HeaderValue::from_static("application/json");
static CONTENT_ENCODING_DEFLATE: HeaderValue = HeaderValue::from_static("deflate");

/// Submission error.
///
/// Every variant is handled the same way (the chunk is dropped), but each is reported under a distinct cause.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum SubmitError {
    /// The payload could not be serialized.
    #[snafu(display("failed to serialize payload: {}", source))]
    Serialize {
        /// Error source.
        source: serde_json::Error,
    },

    /// The payload could not be compressed.
    #[snafu(display("failed to compress payload: {}", source))]
    Compress {
        /// Error source.
        source: std::io::Error,
    },

    /// The request could not be built.
    #[snafu(display("failed to build request: {}", source))]
    BuildRequest {
        /// Error source.
        source: http::Error,
    },

    /// The request could not be sent, or timed out.
    #[snafu(display("failed to send request: {}", source))]
    Transport {
        /// Error source.
        source: BoxError,
    },

    /// The backend responded with a status other than 202 Accepted.
    #[snafu(display("backend rejected request with status {}", status))]
    Status {
        /// Response status.
        status: StatusCode,

        /// Response body, if it could be read.
        body: String,
    },
}

impl SubmitError {
    /// Returns the cause tag this error is reported under.
    pub fn cause(&self) -> Cow<'static, str> {
        match self {
            Self::Serialize { .. } => Cow::Borrowed("json"),
            Self::Compress { .. } => Cow::Borrowed("compress"),
            Self::BuildRequest { .. } => Cow::Borrowed("construct"),
            Self::Transport { .. } => Cow::Borrowed("io"),
            Self::Status { status, .. } => Cow::Owned(status.as_u16().to_string()),
        }
    }
}

#[derive(serde::Serialize)]
struct SeriesPayload<'a> {
    series: &'a [FlushRecord],
}

/// Submits chunks of flush records to the metrics backend.
///
/// Each chunk is serialized as JSON, compressed with zlib, and POSTed to the series endpoint. Only a `202 Accepted`
/// response counts as success. Failed chunks are logged and counted by their number of records, and are not retried.
///
/// `Submitter` is cheap to clone; clones share the underlying HTTP service.
#[derive(Clone)]
pub struct Submitter<S> {
    service: S,
    endpoint: Uri,
    telemetry: SubmitTelemetry,
}

impl<S, B> Submitter<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<B>> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
    B: Body + Send,
    B::Data: Send,
    B::Error: std::fmt::Display,
{
    /// Creates a new `Submitter` that sends requests through `service`.
    ///
    /// # Errors
    ///
    /// If the series endpoint cannot be derived from the configuration, an error is returned.
    pub fn new(service: S, config: &ForwarderConfiguration) -> Result<Self, ConfigError> {
        Ok(Self {
            service,
            endpoint: config.series_endpoint()?,
            telemetry: SubmitTelemetry::new(),
        })
    }

    /// Submits a chunk of records.
    ///
    /// # Errors
    ///
    /// If the chunk could not be encoded, sent, or was rejected by the backend, an error is returned. The error has
    /// already been logged and counted.
    pub async fn submit(&self, records: Vec<FlushRecord>) -> Result<(), SubmitError> {
        let result = self.try_submit(&records).await;
        if let Err(e) = &result {
            self.record_error(e, records.len());
        }
        result
    }

    async fn try_submit(&self, records: &[FlushRecord]) -> Result<(), SubmitError> {
        let marshal_start = Instant::now();
        let body = encode_payload(records).await?;
        self.telemetry.record_marshal_duration(marshal_start.elapsed());
        self.telemetry.record_content_length(body.len());

        let request_len = body.len();
        let request = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON.clone())
            .header(CONTENT_ENCODING, CONTENT_ENCODING_DEFLATE.clone())
            .body(Full::new(body))
            .context(BuildRequest)?;

        let post_start = Instant::now();
        let response = self
            .service
            .clone()
            .oneshot(request)
            .await
            .map_err(Into::<BoxError>::into)
            .context(Transport)?;
        self.telemetry.record_post_duration(post_start.elapsed());

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            debug!(records = records.len(), request_len, "Submitted chunk.");
            return Ok(());
        }

        let body = match response.into_body().collect().await {
            Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
            Err(e) => {
                debug!(%status, error = %e, "Failed to read response body of non-success response.");
                String::new()
            }
        };

        Err(SubmitError::Status { status, body })
    }

    fn record_error(&self, error: &SubmitError, records: usize) {
        match error {
            SubmitError::Serialize { .. } => self.telemetry.increment_json_errors(records),
            SubmitError::Compress { .. } => self.telemetry.increment_compress_errors(records),
            SubmitError::BuildRequest { .. } => self.telemetry.increment_construct_errors(records),
            SubmitError::Transport { .. } => self.telemetry.increment_io_errors(records),
            SubmitError::Status { status, .. } => self.telemetry.increment_status_errors(status.as_u16(), records),
        }

        match error {
            SubmitError::Status { status, body } => {
                error!(%status, records, body = %body, "Backend rejected chunk. Dropping records.");
            }
            e => {
                error!(cause = %e.cause(), error = %e, records, "Failed to submit chunk. Dropping records.");
            }
        }
    }
}

/// Serializes records as a `{"series": [...]}` document and compresses it with zlib.
async fn encode_payload(records: &[FlushRecord]) -> Result<Bytes, SubmitError> {
    let json = serde_json::to_vec(&SeriesPayload { series: records }).context(Serialize)?;

    let mut encoder = ZlibEncoder::new(Vec::with_capacity(json.len() / 4));
    encoder.write_all(&json).await.context(Compress)?;
    encoder.shutdown().await.context(Compress)?;

    Ok(Bytes::from(encoder.into_inner()))
}
