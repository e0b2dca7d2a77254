use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use underground_chat::{
    cli::{Cli, Command, ListenArgs, SendArgs},
    connection::ConnectionManager,
    handshake::HandshakeOutcome,
    history::HistorySink,
    listener::ReconnectingListener,
    sender::Sender,
    shutdown,
};

/// Exit status when the server rejects the configured token.
const EXIT_REJECTED_TOKEN: u8 = 2;
/// Exit status when a second Ctrl-C cuts the graceful stop short.
const EXIT_INTERRUPTED: i32 = 130;

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // A missing .env file is fine; real environment variables still apply.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Listen(args) => run_listener(args).await,
        Command::Send(args) => run_sender(args).await,
    }
}

async fn run_listener(args: ListenArgs) -> Result<ExitCode> {
    let config = args
        .connection_config()
        .context("invalid listener configuration")?;
    let sink = HistorySink::open(&args.history)
        .await
        .with_context(|| format!("failed to open history file {}", args.history.display()))?
        .with_console(true);

    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        match trigger.trigger_on_ctrl_c().await {
            Ok(()) => {
                warn!("second ctrl-c, exiting without waiting for the listener");
                std::process::exit(EXIT_INTERRUPTED);
            }
            Err(error) => warn!(?error, "failed to install ctrl-c handler"),
        }
    });

    ReconnectingListener::new(ConnectionManager::new(config), sink)
        .with_read_timeout(args.read_timeout)
        .run(shutdown)
        .await?;
    Ok(ExitCode::SUCCESS)
}

async fn run_sender(args: SendArgs) -> Result<ExitCode> {
    let config = args
        .connection_config()
        .context("invalid sender configuration")?;
    let intent = args.intent().context("invalid sender identity")?;
    let message = args.outbound_message()?;

    let outcome = Sender::new(ConnectionManager::new(config), intent)
        .with_io_timeout(Some(args.io_timeout))
        .send(&message)
        .await
        .context("failed to send message")?;

    match outcome {
        HandshakeOutcome::Registered {
            account_hash,
            nickname,
        } => {
            println!("registered as {nickname}; account hash: {account_hash}");
            println!("message sent");
        }
        HandshakeOutcome::Authenticated => println!("message sent"),
        HandshakeOutcome::RejectedToken => {
            eprintln!(
                "the server does not know this token; check CHAT_TOKEN or omit it to register"
            );
            return Ok(ExitCode::from(EXIT_REJECTED_TOKEN));
        }
    }
    info!("done");
    Ok(ExitCode::SUCCESS)
}
