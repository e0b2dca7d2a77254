use std::{path::Path, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::AsyncWriteExt,
    net::TcpListener,
    time::{Instant, sleep, timeout},
};
use underground_chat::{
    config::ConnectionConfig, connection::ConnectionManager, history::HistorySink,
    listener::ReconnectingListener, shutdown,
};

const WAIT: Duration = Duration::from_secs(5);

fn manager(port: u16) -> ConnectionManager {
    manager_for("127.0.0.1", port)
}

fn manager_for(host: &str, port: u16) -> ConnectionManager {
    let config = ConnectionConfig::with_timeouts(
        host,
        port,
        Duration::from_secs(1),
        Duration::from_secs(30),
    )
    .expect("valid config");
    ConnectionManager::new(config)
}

async fn free_port() -> Result<u16> {
    let probe = TcpListener::bind("127.0.0.1:0").await?;
    Ok(probe.local_addr()?.port())
}

/// Message texts from the history file, with timestamps checked and stripped.
async fn history_texts(path: &Path) -> Result<Vec<String>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err.into()),
    };

    contents
        .lines()
        .map(|line| {
            let (stamp, text) = line
                .split_once("] ")
                .with_context(|| format!("record without timestamp: {line:?}"))?;
            // "[dd.mm.yy HH:MM"
            if !stamp.starts_with('[') || stamp.len() != 15 {
                return Err(anyhow!("unexpected timestamp in {line:?}"));
            }
            Ok(text.to_string())
        })
        .collect()
}

async fn wait_for_records(path: &Path, count: usize) -> Result<Vec<String>> {
    let deadline = Instant::now() + WAIT;
    loop {
        let texts = history_texts(path).await?;
        if texts.len() >= count {
            return Ok(texts);
        }
        if Instant::now() > deadline {
            return Err(anyhow!("expected {count} records, found {texts:?}"));
        }
        sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn resumes_after_drop_without_duplicates() -> Result<()> {
    let server = TcpListener::bind("127.0.0.1:0").await?;
    let port = server.local_addr()?.port();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("history.txt");

    let (trigger, shutdown) = shutdown::channel();
    let listener = ReconnectingListener::new(manager(port), HistorySink::open(&path).await?);
    let task = tokio::spawn(listener.run(shutdown));

    let (mut first, _) = timeout(WAIT, server.accept()).await??;
    first.write_all(b"L1\nL2\n").await?;
    first.shutdown().await?;
    drop(first);

    let (mut second, _) = timeout(WAIT, server.accept()).await??;
    second.write_all(b"L3\n").await?;

    let texts = wait_for_records(&path, 3).await?;
    assert_eq!(texts, vec!["L1", "L2", "L3"]);

    trigger.trigger();
    timeout(WAIT, task).await???;

    // Nothing was re-emitted after the stop either.
    assert_eq!(history_texts(&path).await?, vec!["L1", "L2", "L3"]);
    Ok(())
}

#[tokio::test]
async fn line_cut_off_by_drop_is_not_recorded() -> Result<()> {
    let server = TcpListener::bind("127.0.0.1:0").await?;
    let port = server.local_addr()?.port();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("history.txt");

    let (trigger, shutdown) = shutdown::channel();
    let listener = ReconnectingListener::new(manager(port), HistorySink::open(&path).await?);
    let task = tokio::spawn(listener.run(shutdown));

    let (mut first, _) = timeout(WAIT, server.accept()).await??;
    first.write_all(b"L1\nHALF-OF-A-LI").await?;
    first.shutdown().await?;
    drop(first);

    let (mut second, _) = timeout(WAIT, server.accept()).await??;
    second.write_all(b"L2\n").await?;

    let texts = wait_for_records(&path, 2).await?;
    assert_eq!(texts, vec!["L1", "L2"]);

    trigger.trigger();
    timeout(WAIT, task).await???;
    assert_eq!(history_texts(&path).await?, vec!["L1", "L2"]);
    Ok(())
}

#[tokio::test]
async fn resolves_localhost_and_records_lines() -> Result<()> {
    // Only the IPv4 loopback listens, so an `::1` candidate is refused and
    // the dial moves on to the next resolved address.
    let server = TcpListener::bind("127.0.0.1:0").await?;
    let port = server.local_addr()?.port();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("history.txt");

    let (trigger, shutdown) = shutdown::channel();
    let listener =
        ReconnectingListener::new(manager_for("localhost", port), HistorySink::open(&path).await?);
    let task = tokio::spawn(listener.run(shutdown));

    let (mut stream, _) = timeout(WAIT, server.accept()).await??;
    stream.write_all(b"A\nB\n").await?;
    let texts = wait_for_records(&path, 2).await?;
    assert_eq!(texts, vec!["A", "B"]);

    trigger.trigger();
    timeout(WAIT, task).await???;
    Ok(())
}

#[tokio::test]
async fn connects_after_refusals_and_records_in_order() -> Result<()> {
    let port = free_port().await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("history.txt");

    let (trigger, shutdown) = shutdown::channel();
    let started = Instant::now();
    let listener = ReconnectingListener::new(manager(port), HistorySink::open(&path).await?);
    let task = tokio::spawn(listener.run(shutdown));

    // The first two attempts (0s apart) hit a closed port; the third comes
    // after a 1s backoff.
    sleep(Duration::from_millis(300)).await;
    let server = TcpListener::bind(("127.0.0.1", port)).await?;
    let (mut stream, _) = timeout(WAIT, server.accept()).await??;
    assert!(started.elapsed() >= Duration::from_millis(900));

    stream.write_all(b"A\nB\n").await?;
    let texts = wait_for_records(&path, 2).await?;
    assert_eq!(texts, vec!["A", "B"]);

    trigger.trigger();
    timeout(WAIT, task).await???;
    Ok(())
}

#[tokio::test]
async fn stop_signal_interrupts_backoff() -> Result<()> {
    let port = free_port().await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("history.txt");

    let (trigger, shutdown) = shutdown::channel();
    let listener = ReconnectingListener::new(manager(port), HistorySink::open(&path).await?);
    let task = tokio::spawn(listener.run(shutdown));

    sleep(Duration::from_millis(1500)).await;
    let stop_requested = Instant::now();
    trigger.trigger();
    timeout(WAIT, task).await???;

    assert!(stop_requested.elapsed() < Duration::from_secs(1));
    assert!(history_texts(&path).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn idle_stream_triggers_reconnect_when_read_timeout_is_set() -> Result<()> {
    let server = TcpListener::bind("127.0.0.1:0").await?;
    let port = server.local_addr()?.port();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("history.txt");

    let (trigger, shutdown) = shutdown::channel();
    let listener = ReconnectingListener::new(manager(port), HistorySink::open(&path).await?)
        .with_read_timeout(Some(Duration::from_millis(200)));
    let task = tokio::spawn(listener.run(shutdown));

    // Accept and stay silent; the listener gives up on it and dials again.
    let (_silent, _) = timeout(WAIT, server.accept()).await??;
    let (mut second, _) = timeout(WAIT, server.accept()).await??;
    second.write_all(b"after idle\n").await?;

    let texts = wait_for_records(&path, 1).await?;
    assert_eq!(texts, vec!["after idle"]);

    trigger.trigger();
    timeout(WAIT, task).await???;
    Ok(())
}
