//! Resilient client for a line-oriented TCP chat.
//!
//! Two roles share one connection layer:
//!
//! - the **listener** ([`listener`]) follows the broadcast port forever,
//!   reconnecting with backoff, and appends every line to a timestamped
//!   history file through [`history`];
//! - the **sender** ([`sender`]) connects once, runs the greeting and
//!   registration/authentication [`handshake`], and posts a single message
//!   framed by [`framer`].
//!
//! [`transport`] reads and writes newline-terminated lines with optional
//! deadlines, [`connection`] owns connect-with-backoff and TCP keepalive,
//! [`shutdown`] carries the Ctrl-C stop signal, and [`cli`] maps command-line
//! arguments and environment variables onto [`config`].

pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod framer;
pub mod handshake;
pub mod history;
pub mod listener;
pub mod sender;
pub mod shutdown;
pub mod transport;
