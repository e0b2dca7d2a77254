//! Newline-delimited text transport over a single byte stream.

use std::{future::Future, io, net::SocketAddr, time::Duration};

use chrono::{DateTime, Local};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::timeout,
};
use tracing::{debug, warn};

use crate::error::TransportError;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// One inbound line, stamped with the moment it was read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub text: String,
    pub received_at: DateTime<Local>,
}

impl ChatLine {
    pub fn new(text: impl Into<String>, received_at: DateTime<Local>) -> Self {
        Self {
            text: text.into(),
            received_at,
        }
    }
}

/// A framed line transport over one TCP connection.
///
/// Dropping or [closing](LineTransport::close) it releases the socket; a
/// reconnect always builds a new one.
pub type Session = LineTransport<BufReader<OwnedReadHalf>, OwnedWriteHalf>;

pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
    peer: Option<SocketAddr>,
    buffer: Vec<u8>,
}

impl Session {
    pub fn from_stream(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let mut session = Self::new(BufReader::new(reader), writer);
        session.peer = peer;
        session
    }
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            peer: None,
            buffer: Vec::new(),
        }
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Reads one line and strips its line ending.
    ///
    /// Invalid UTF-8 is replaced rather than rejected so a single bad byte
    /// from the server cannot tear the connection down. End of stream is
    /// reported as [`TransportError::Closed`], including when the peer hung
    /// up partway through a line; the fragment is discarded.
    pub async fn read_line(
        &mut self,
        deadline: Option<Duration>,
    ) -> Result<String, TransportError> {
        self.buffer.clear();
        let read = self.reader.read_until(b'\n', &mut self.buffer);
        let bytes = with_deadline(deadline, read).await?;
        if bytes == 0 {
            return Err(TransportError::Closed);
        }
        if !self.buffer.ends_with(b"\n") {
            debug!(peer = ?self.peer, bytes, "discarding unterminated line at end of stream");
            self.buffer.clear();
            return Err(TransportError::Closed);
        }

        let line = String::from_utf8_lossy(&self.buffer);
        Ok(line.trim_end_matches(LINE_ENDINGS).to_string())
    }

    pub async fn read_chat_line(
        &mut self,
        deadline: Option<Duration>,
    ) -> Result<ChatLine, TransportError> {
        let text = self.read_line(deadline).await?;
        Ok(ChatLine::new(text, Local::now()))
    }

    /// Writes `text` followed by a newline and flushes it to the OS.
    pub async fn write_line(
        &mut self,
        text: &str,
        deadline: Option<Duration>,
    ) -> Result<(), TransportError> {
        let mut encoded = Vec::with_capacity(text.len() + 1);
        encoded.extend_from_slice(text.as_bytes());
        encoded.push(b'\n');
        self.write_raw(&encoded, deadline).await
    }

    /// Writes pre-framed bytes verbatim, without adding a line ending.
    pub async fn write_raw(
        &mut self,
        bytes: &[u8],
        deadline: Option<Duration>,
    ) -> Result<(), TransportError> {
        let writer = &mut self.writer;
        with_deadline(deadline, async move {
            writer.write_all(bytes).await?;
            writer.flush().await
        })
        .await
    }

    /// Shuts the write side down so the peer sees EOF, then drops the stream.
    pub async fn close(mut self) {
        if let Err(error) = self.writer.shutdown().await {
            warn!(?error, "failed to shut down connection cleanly");
        }
        debug!(peer = ?self.peer, "connection closed");
    }
}

async fn with_deadline<F, T>(deadline: Option<Duration>, operation: F) -> Result<T, TransportError>
where
    F: Future<Output = io::Result<T>>,
{
    match deadline {
        Some(limit) => match timeout(limit, operation).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TransportError::Timeout { limit }),
        },
        None => Ok(operation.await?),
    }
}
