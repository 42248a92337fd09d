use std::{io, net::SocketAddr, time::Duration};

use metrics::{counter, Counter};
use sluice_aggregate::{RouteError, ShardRouter};
use snafu::{ResultExt as _, Snafu};
use tokio::{net::UdpSocket, select, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::codec::decode_line;

const MAX_DATAGRAM_SIZE: usize = 65_535;

const MIN_RECV_BACKOFF: Duration = Duration::from_millis(10);
const MAX_RECV_BACKOFF: Duration = Duration::from_secs(1);

/// Delay applied after consecutive receive errors, doubling on each error up to a cap.
#[derive(Debug, Default)]
struct RecvBackoff {
    consecutive_errors: u32,
}

impl RecvBackoff {
    /// Records an error, returning how long to wait before receiving again.
    fn on_error(&mut self) -> Duration {
        let delay = MIN_RECV_BACKOFF
            .saturating_mul(1 << self.consecutive_errors.min(16))
            .min(MAX_RECV_BACKOFF);
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        delay
    }

    fn reset(&mut self) {
        self.consecutive_errors = 0;
    }
}

/// A listener error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ListenerError {
    /// Failed to bind to the listen address.
    #[snafu(display("failed to bind to listen address {}: {}", address, source))]
    FailedToBind {
        /// Listen address.
        address: SocketAddr,

        /// Source of the error.
        source: io::Error,
    },
}

struct ListenerTelemetry {
    packets_received: Counter,
    dropped_invalid_utf8: Counter,
}

impl ListenerTelemetry {
    fn new() -> Self {
        Self {
            packets_received: counter!("listener_packets_received_total"),
            dropped_invalid_utf8: counter!("listener_observations_dropped_total", "reason" => "invalid_utf8"),
        }
    }

    fn increment_dropped(&self, reason: &'static str) {
        counter!("listener_observations_dropped_total", "reason" => reason).increment(1);
    }
}

/// Receives line protocol datagrams over UDP and routes the decoded observations to shards.
pub struct UdpListener {
    socket: UdpSocket,
    router: ShardRouter,
    telemetry: ListenerTelemetry,
}

impl UdpListener {
    /// Binds a new `UdpListener` to the given address.
    ///
    /// # Errors
    ///
    /// If the socket cannot be bound, an error is returned.
    pub async fn bind(address: SocketAddr, router: ShardRouter) -> Result<Self, ListenerError> {
        let socket = UdpSocket::bind(address).await.context(FailedToBind { address })?;

        Ok(Self {
            socket,
            router,
            telemetry: ListenerTelemetry::new(),
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receives datagrams until `shutdown` is triggered or the shards stop accepting observations.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut buf = vec![0; MAX_DATAGRAM_SIZE];
        let mut backoff = RecvBackoff::default();

        loop {
            let result = select! {
                _ = shutdown.cancelled() => break,
                result = self.socket.recv_from(&mut buf) => result,
            };

            let len = match result {
                Ok((len, _)) => {
                    backoff.reset();
                    len
                }
                Err(e) => {
                    let delay = backoff.on_error();
                    warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "Failed to receive datagram.");
                    select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(delay) => continue,
                    }
                }
            };

            if let Err(e) = self.handle_datagram(&buf[..len]).await {
                error!(error = %e, "Shards stopped accepting observations. Stopping listener.");
                break;
            }
        }

        debug!("Listener stopped.");
    }

    /// Decodes every line of a datagram and routes the resulting observations.
    ///
    /// Lines that fail to decode are dropped individually.
    async fn handle_datagram(&self, datagram: &[u8]) -> Result<(), RouteError> {
        self.telemetry.packets_received.increment(1);

        let Ok(payload) = std::str::from_utf8(datagram) else {
            self.telemetry.dropped_invalid_utf8.increment(1);
            debug!(len = datagram.len(), "Dropping datagram that is not valid UTF-8.");
            return Ok(());
        };

        for line in payload.lines() {
            if line.is_empty() {
                continue;
            }

            match decode_line(line) {
                Ok(observation) => self.router.route(observation).await?,
                Err(e) => {
                    self.telemetry.increment_dropped(e.reason());
                    warn!(error = %e, "Dropping observation.");
                }
            }
        }

        Ok(())
    }
}
