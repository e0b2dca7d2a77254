//! Greeting, then registration or authentication, run once per sender session.
//!
//! Every write of a step is flushed before the reply to that step is awaited;
//! nothing is pipelined and only one read is ever in flight.

use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::{Instrument, debug, info, info_span};

use crate::{
    config::single_line,
    error::{ConfigError, HandshakeError},
    transport::LineTransport,
};

/// Reply the server sends for a token it does not know.
pub const REJECTED_TOKEN_SENTINEL: &str = "null";

/// Prompt lines tolerated before the registration record.
const MAX_PROMPT_LINES: usize = 1;

/// What the client wants from the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Register { nickname: String },
    Authenticate { token: String },
}

impl Intent {
    pub fn register(nickname: &str) -> Result<Self, ConfigError> {
        Ok(Self::Register {
            nickname: single_line("nickname", nickname)?,
        })
    }

    pub fn authenticate(token: &str) -> Result<Self, ConfigError> {
        Ok(Self::Authenticate {
            token: single_line("token", token)?,
        })
    }

    /// Authenticates when a non-blank token is present, registers otherwise.
    pub fn from_token(token: Option<&str>, nickname: &str) -> Result<Self, ConfigError> {
        match token.filter(|token| !token.trim().is_empty()) {
            Some(token) => Self::authenticate(token),
            None => Self::register(nickname),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Registered { account_hash: String, nickname: String },
    Authenticated,
    RejectedToken,
}

impl HandshakeOutcome {
    /// Whether a message may be sent on the session afterwards.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::RejectedToken)
    }
}

#[derive(Debug, Deserialize)]
struct AccountRecord {
    account_hash: String,
    nickname: String,
}

#[derive(Debug)]
enum State<'a> {
    AwaitGreeting,
    Registering { nickname: &'a str },
    Authenticating { token: &'a str },
    Done(HandshakeOutcome),
}

pub struct Handshake<'a> {
    intent: &'a Intent,
    io_timeout: Option<Duration>,
}

impl<'a> Handshake<'a> {
    pub fn new(intent: &'a Intent, io_timeout: Option<Duration>) -> Self {
        Self { intent, io_timeout }
    }

    pub async fn run<R, W>(
        &self,
        transport: &mut LineTransport<R, W>,
    ) -> Result<HandshakeOutcome, HandshakeError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.drive(transport)
            .instrument(info_span!("handshake"))
            .await
    }

    async fn drive<R, W>(
        &self,
        transport: &mut LineTransport<R, W>,
    ) -> Result<HandshakeOutcome, HandshakeError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut state = State::AwaitGreeting;
        loop {
            debug!(?state, "handshake step");
            state = match state {
                State::AwaitGreeting => {
                    let greeting = transport.read_line(self.io_timeout).await?;
                    info!(%greeting, "server greeting");
                    match self.intent {
                        Intent::Register { nickname } => State::Registering {
                            nickname: nickname.as_str(),
                        },
                        Intent::Authenticate { token } => State::Authenticating {
                            token: token.as_str(),
                        },
                    }
                }
                State::Registering { nickname } => {
                    State::Done(self.register(transport, nickname).await?)
                }
                State::Authenticating { token } => {
                    State::Done(self.authenticate(transport, token).await?)
                }
                State::Done(outcome) => return Ok(outcome),
            };
        }
    }

    async fn register<R, W>(
        &self,
        transport: &mut LineTransport<R, W>,
        nickname: &str,
    ) -> Result<HandshakeOutcome, HandshakeError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        // Empty line asks for a new account; the trailing one ends the input.
        transport.write_line("", self.io_timeout).await?;
        transport.write_line(nickname, self.io_timeout).await?;
        transport.write_line("", self.io_timeout).await?;

        let mut reply = transport.read_line(self.io_timeout).await?;
        let mut prompts = 0;
        while !looks_like_record(&reply) && prompts < MAX_PROMPT_LINES {
            debug!(prompt = %reply, "skipping server prompt");
            prompts += 1;
            reply = transport.read_line(self.io_timeout).await?;
        }

        let record = parse_account_record(&reply)?;
        info!(nickname = %record.nickname, "registered new account");
        Ok(HandshakeOutcome::Registered {
            account_hash: record.account_hash,
            nickname: record.nickname,
        })
    }

    async fn authenticate<R, W>(
        &self,
        transport: &mut LineTransport<R, W>,
        token: &str,
    ) -> Result<HandshakeOutcome, HandshakeError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        transport.write_line(token, self.io_timeout).await?;
        let reply = transport.read_line(self.io_timeout).await?;

        if reply.trim() == REJECTED_TOKEN_SENTINEL {
            info!("server rejected the token");
            return Ok(HandshakeOutcome::RejectedToken);
        }
        debug!(%reply, "token accepted");
        Ok(HandshakeOutcome::Authenticated)
    }
}

fn looks_like_record(line: &str) -> bool {
    line.trim_start().starts_with('{')
}

fn parse_account_record(line: &str) -> Result<AccountRecord, HandshakeError> {
    let record: AccountRecord = serde_json::from_str(line.trim()).map_err(|err| {
        HandshakeError::Protocol(format!("malformed registration reply {line:?}: {err}"))
    })?;

    if record.account_hash.trim().is_empty() {
        return Err(HandshakeError::Protocol(
            "registration reply has an empty account_hash".to_string(),
        ));
    }
    if record.nickname.trim().is_empty() {
        return Err(HandshakeError::Protocol(
            "registration reply has an empty nickname".to_string(),
        ));
    }
    Ok(record)
}
