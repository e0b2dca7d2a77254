use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::{
    config::ConnectionConfig,
    error::{ChatError, ConfigError},
    framer::OutboundMessage,
    handshake::Intent,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Follow the chat and append every line to the history file.
    Listen(ListenArgs),
    /// Authenticate (or register) and post a single message.
    Send(SendArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ListenArgs {
    /// Chat server host.
    #[arg(long, env = "CHAT_HOST", default_value = "localhost")]
    pub host: String,

    /// Port that broadcasts chat lines.
    #[arg(long, env = "CHAT_PORT_READ", default_value_t = 5000)]
    pub port: u16,

    /// File the timestamped history is appended to.
    #[arg(long, env = "FILE_HISTORY", default_value = "chat_history.txt")]
    pub history: PathBuf,

    /// Ceiling for the delay between reconnect attempts.
    #[arg(
        long,
        env = "CHAT_MAX_BACKOFF",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    pub max_backoff: Duration,

    /// Timeout for a single connect attempt.
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub connect_timeout: Duration,

    /// Reconnect when no line arrives for this long. Disabled by default.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub read_timeout: Option<Duration>,
}

impl ListenArgs {
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        ConnectionConfig::with_timeouts(
            self.host.clone(),
            self.port,
            self.connect_timeout,
            self.max_backoff,
        )
    }
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// Chat server host.
    #[arg(long, env = "CHAT_HOST", default_value = "localhost")]
    pub host: String,

    /// Port that accepts authenticated messages.
    #[arg(long, env = "CHAT_PORT_WRITE", default_value_t = 5050)]
    pub port: u16,

    /// Account token. Without one a new account is registered.
    #[arg(long, env = "CHAT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Nickname requested when registering.
    #[arg(long, env = "CHAT_NICKNAME", default_value = "anonymous")]
    pub nickname: String,

    /// Timeout for the connect attempt.
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub connect_timeout: Duration,

    /// Timeout for each handshake read and the message write.
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub io_timeout: Duration,

    /// Message to post; words are joined with spaces.
    #[arg(required = true, num_args = 1..)]
    pub message: Vec<String>,
}

impl SendArgs {
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        ConnectionConfig::with_timeouts(
            self.host.clone(),
            self.port,
            self.connect_timeout,
            crate::config::DEFAULT_MAX_BACKOFF,
        )
    }

    pub fn intent(&self) -> Result<Intent, ConfigError> {
        Intent::from_token(self.token.as_deref(), &self.nickname)
    }

    pub fn outbound_message(&self) -> Result<OutboundMessage, ChatError> {
        Ok(OutboundMessage::new(&self.message.join(" "))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_joins_message_words() {
        let cli = Cli::try_parse_from([
            "underground_chat",
            "send",
            "--host",
            "chat.example",
            "--token",
            "abc",
            "hello",
            "there",
        ])
        .expect("valid arguments");

        let Command::Send(args) = cli.command else {
            panic!("expected send command");
        };
        assert_eq!(args.outbound_message().unwrap().text(), "hello there");
        assert_eq!(
            args.intent().unwrap(),
            Intent::Authenticate {
                token: "abc".into()
            }
        );
        assert_eq!(args.connection_config().unwrap().host(), "chat.example");
    }

    #[test]
    fn listen_parses_human_durations() {
        let cli = Cli::try_parse_from([
            "underground_chat",
            "listen",
            "--host",
            "chat.example",
            "--port",
            "5000",
            "--max-backoff",
            "5s",
            "--read-timeout",
            "2m",
        ])
        .expect("valid arguments");

        let Command::Listen(args) = cli.command else {
            panic!("expected listen command");
        };
        let config = args.connection_config().unwrap();
        assert_eq!(config.max_backoff(), Duration::from_secs(5));
        assert_eq!(args.read_timeout, Some(Duration::from_secs(120)));
    }

    #[test]
    fn listen_rejects_port_zero() {
        let cli = Cli::try_parse_from(["underground_chat", "listen", "--port", "0"])
            .expect("clap accepts any u16");
        let Command::Listen(args) = cli.command else {
            panic!("expected listen command");
        };
        assert_eq!(args.connection_config(), Err(ConfigError::InvalidPort));
    }

    #[test]
    fn listen_rejects_zero_max_backoff() {
        let cli = Cli::try_parse_from(["underground_chat", "listen", "--max-backoff", "0s"])
            .expect("humantime accepts zero");
        let Command::Listen(args) = cli.command else {
            panic!("expected listen command");
        };
        assert_eq!(args.connection_config(), Err(ConfigError::ZeroMaxBackoff));
    }

    #[test]
    fn send_requires_a_message() {
        assert!(Cli::try_parse_from(["underground_chat", "send"]).is_err());
    }
}
