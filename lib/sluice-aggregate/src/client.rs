//! HTTP client used to reach the metrics backend.

use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::Client,
    rt::{TokioExecutor, TokioTimer},
};
use tower::{timeout::TimeoutLayer, util::BoxCloneSyncService, BoxError, ServiceBuilder, ServiceExt as _};

use crate::GenericError;

/// An HTTP client for submitting series payloads.
pub type HttpClient = BoxCloneSyncService<Request<Full<Bytes>>, Response<Incoming>, BoxError>;

/// Builds the [`HttpClient`] used by the submitter.
///
/// Out of the box, the client speaks HTTP/1.1 over plain TCP or TLS (validated against the platform's root
/// certificates), times requests out after 20 seconds, and keeps up to 5 idle connections per host for 45 seconds.
#[derive(Clone)]
pub struct HttpClientBuilder {
    request_timeout: Duration,
    idle_conn_timeout: Duration,
    max_idle_conns_per_host: usize,
}

impl HttpClientBuilder {
    /// Sets the per-request timeout.
    ///
    /// Defaults to 20 seconds.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builds the `HttpClient`.
    ///
    /// # Errors
    ///
    /// If the platform's root certificates could not be loaded, an error will be returned.
    pub fn build(self) -> Result<HttpClient, GenericError> {
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()?
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(self.idle_conn_timeout)
            .pool_max_idle_per_host(self.max_idle_conns_per_host)
            .build(connector);

        let service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(self.request_timeout))
            .service(client.map_err(BoxError::from));

        Ok(BoxCloneSyncService::new(service))
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(20),
            idle_conn_timeout: Duration::from_secs(45),
            max_idle_conns_per_host: 5,
        }
    }
}
