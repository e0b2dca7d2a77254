//! One-shot send: connect once, handshake, write one framed message, exit.

use std::time::Duration;

use tracing::{Instrument, info, info_span, warn};

use crate::{
    connection::ConnectionManager,
    error::ChatError,
    framer::OutboundMessage,
    handshake::{Handshake, HandshakeOutcome, Intent},
};

pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Sender {
    manager: ConnectionManager,
    intent: Intent,
    io_timeout: Option<Duration>,
}

impl Sender {
    pub fn new(manager: ConnectionManager, intent: Intent) -> Self {
        Self {
            manager,
            intent,
            io_timeout: Some(DEFAULT_IO_TIMEOUT),
        }
    }

    pub fn with_io_timeout(mut self, io_timeout: Option<Duration>) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Delivers `message` unless the handshake rejects the token.
    ///
    /// Connection failures are not retried. On [`HandshakeOutcome::RejectedToken`]
    /// the session is closed without writing anything further.
    pub async fn send(&self, message: &OutboundMessage) -> Result<HandshakeOutcome, ChatError> {
        let address = self.manager.config().address();
        self.deliver(message)
            .instrument(info_span!("sender", %address))
            .await
    }

    async fn deliver(&self, message: &OutboundMessage) -> Result<HandshakeOutcome, ChatError> {
        let mut session = self.manager.connect_once().await?;

        let outcome = match Handshake::new(&self.intent, self.io_timeout)
            .run(&mut session)
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                session.close().await;
                return Err(error.into());
            }
        };

        if !outcome.is_accepted() {
            warn!("token rejected, message not sent");
            session.close().await;
            return Ok(outcome);
        }

        let written = session
            .write_raw(message.frame().as_bytes(), self.io_timeout)
            .await;
        session.close().await;
        written?;

        info!(bytes = message.text().len(), "message sent");
        Ok(outcome)
    }
}
