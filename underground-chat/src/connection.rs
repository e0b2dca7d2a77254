//! TCP connect with linear backoff and keepalive.

use std::{future::Future, io, net::SocketAddr, time::Duration};

use socket2::{SockRef, TcpKeepalive};
use tokio::{
    net::{TcpStream, lookup_host},
    select,
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    config::ConnectionConfig, error::ConnectError, shutdown::Shutdown, transport::Session,
};

const BACKOFF_STEP: Duration = Duration::from_secs(1);

const KEEPALIVE_IDLE: Duration = Duration::from_secs(1);
#[cfg(any(target_os = "linux", target_os = "macos"))]
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(3);
#[cfg(any(target_os = "linux", target_os = "macos"))]
const KEEPALIVE_PROBES: u32 = 5;

/// Delay schedule between failed attempts: 0s, 1s, 2s, ... capped at `ceiling`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    ceiling: Duration,
}

impl Backoff {
    pub fn new(ceiling: Duration) -> Self {
        Self {
            next: Duration::ZERO,
            ceiling,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next.min(self.ceiling);
        self.next = (self.next + BACKOFF_STEP).min(self.ceiling);
        delay
    }
}

pub struct ConnectionManager {
    config: ConnectionConfig,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connects, retrying transient failures forever until `shutdown` fires.
    pub async fn connect(&self, shutdown: &mut Shutdown) -> Result<Session, ConnectError> {
        self.connect_with(shutdown, || self.connect_once()).await
    }

    /// One attempt bounded by the connect timeout. Used as-is by the sender,
    /// which never retries.
    pub async fn connect_once(&self) -> Result<Session, ConnectError> {
        let address = self.config.address();
        let limit = self.config.connect_timeout();

        let stream = match timeout(limit, self.dial(&address)).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectError::Timeout { address, limit }),
        };

        if let Err(error) = enable_keepalive(&stream) {
            warn!(?error, %address, "failed to enable tcp keepalive");
        }

        Ok(Session::from_stream(stream))
    }

    /// The retry loop behind [`connect`](Self::connect), generic over the
    /// attempt so the schedule can be driven without real sockets.
    pub async fn connect_with<F, Fut, T>(
        &self,
        shutdown: &mut Shutdown,
        mut attempt: F,
    ) -> Result<T, ConnectError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ConnectError>>,
    {
        let address = self.config.address();
        let mut backoff = Backoff::new(self.config.max_backoff());
        let mut attempts: u64 = 0;

        loop {
            if shutdown.is_triggered() {
                return Err(ConnectError::Cancelled);
            }

            attempts += 1;
            let error = match attempt().await {
                Ok(connected) => {
                    info!(%address, attempts, "connected");
                    return Ok(connected);
                }
                Err(error) if error.is_transient() => error,
                Err(error) => return Err(error),
            };

            let delay = backoff.next_delay();
            warn!(%address, attempts, ?delay, %error, "connection attempt failed, retrying");

            if shutdown.is_triggered() {
                return Err(ConnectError::Cancelled);
            }
            select! {
                _ = sleep(delay) => {}
                _ = shutdown.wait() => return Err(ConnectError::Cancelled),
            }
        }
    }

    async fn dial(&self, address: &str) -> Result<TcpStream, ConnectError> {
        let resolve_error = |source| ConnectError::Resolve {
            address: address.to_string(),
            source,
        };

        let candidates: Vec<SocketAddr> = lookup_host((self.config.host(), self.config.port()))
            .await
            .map_err(resolve_error)?
            .collect();
        if candidates.is_empty() {
            return Err(resolve_error(io::Error::new(
                io::ErrorKind::NotFound,
                "no addresses returned",
            )));
        }

        let mut last_error = None;
        for candidate in candidates {
            match TcpStream::connect(candidate).await {
                Ok(stream) => return Ok(stream),
                Err(error) => {
                    debug!(%candidate, ?error, "address rejected connection");
                    last_error = Some(error);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::NotConnected));
        Err(ConnectError::from_io(address, error))
    }
}

fn enable_keepalive(stream: &TcpStream) -> io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_IDLE);
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    let keepalive = keepalive
        .with_interval(KEEPALIVE_INTERVAL)
        .with_retries(KEEPALIVE_PROBES);

    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}
