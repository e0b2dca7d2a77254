//! Read-only subscription that survives connection drops.
//!
//! Lines broadcast while disconnected are lost: the protocol has no resume
//! point, so the only trace of the gap is the reconnect warning in the log.

use std::time::Duration;

use tokio::select;
use tracing::{Instrument, info, info_span, warn};

use crate::{
    connection::ConnectionManager,
    error::{ChatError, ConnectError, TransportError},
    history::HistorySink,
    shutdown::Shutdown,
    transport::Session,
};

pub struct ReconnectingListener {
    manager: ConnectionManager,
    sink: HistorySink,
    read_timeout: Option<Duration>,
}

enum StreamEnd {
    Stopped,
    Dropped(TransportError),
}

impl ReconnectingListener {
    pub fn new(manager: ConnectionManager, sink: HistorySink) -> Self {
        Self {
            manager,
            sink,
            read_timeout: None,
        }
    }

    /// Treat a stream that stays silent this long as dead.
    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Streams lines into the history sink until `shutdown` fires.
    ///
    /// Returns an error only when the history log itself cannot be written.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), ChatError> {
        let address = self.manager.config().address();
        self.run_loop(shutdown)
            .instrument(info_span!("listener", %address))
            .await
    }

    async fn run_loop(mut self, mut shutdown: Shutdown) -> Result<(), ChatError> {
        let mut reconnects: u64 = 0;
        loop {
            let session = match self.manager.connect(&mut shutdown).await {
                Ok(session) => session,
                Err(ConnectError::Cancelled) => {
                    info!(recorded = self.sink.recorded(), "listener stopped");
                    return Ok(());
                }
                Err(error) => return Err(error.into()),
            };

            match self.stream(session, &mut shutdown).await? {
                StreamEnd::Stopped => {
                    info!(recorded = self.sink.recorded(), "listener stopped");
                    return Ok(());
                }
                StreamEnd::Dropped(error) => {
                    reconnects += 1;
                    warn!(%error, reconnects, "connection lost, reconnecting");
                }
            }
        }
    }

    async fn stream(
        &mut self,
        mut session: Session,
        shutdown: &mut Shutdown,
    ) -> Result<StreamEnd, ChatError> {
        loop {
            if shutdown.is_triggered() {
                session.close().await;
                return Ok(StreamEnd::Stopped);
            }

            let next = select! {
                line = session.read_chat_line(self.read_timeout) => Some(line),
                _ = shutdown.wait() => None,
            };

            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(error)) => return Ok(StreamEnd::Dropped(error)),
                None => {
                    session.close().await;
                    return Ok(StreamEnd::Stopped);
                }
            };

            self.sink.consume(&line).await.map_err(ChatError::History)?;
        }
    }
}
