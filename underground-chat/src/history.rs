//! Timestamped, append-only chat history.

use std::{
    io,
    path::{Path, PathBuf},
};

use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{info, warn};

use crate::transport::ChatLine;

pub const TIMESTAMP_FORMAT: &str = "%d.%m.%y %H:%M";

/// `[dd.mm.yy HH:MM] text`, stamped with the line's own arrival time.
pub fn format_record(line: &ChatLine) -> String {
    format!("[{}] {}", line.received_at.format(TIMESTAMP_FORMAT), line.text)
}

/// Single writer for the history log, optionally mirroring to stdout.
pub struct HistorySink {
    log: File,
    path: PathBuf,
    console: bool,
    recorded: u64,
}

impl HistorySink {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        info!(path = %path.display(), "appending chat history");

        Ok(Self {
            log,
            path,
            console: false,
            recorded: 0,
        })
    }

    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    /// Appends one record and syncs it to disk before returning, so records
    /// land in arrival order and survive a kill between two lines.
    pub async fn consume(&mut self, line: &ChatLine) -> io::Result<()> {
        let record = format_record(line);

        let mut encoded = Vec::with_capacity(record.len() + 1);
        encoded.extend_from_slice(record.as_bytes());
        encoded.push(b'\n');
        self.log.write_all(&encoded).await?;
        self.log.flush().await?;
        self.log.sync_data().await?;
        self.recorded += 1;

        if self.console {
            if let Err(error) = write_stdout(&encoded).await {
                warn!(?error, "failed to mirror chat line to stdout");
            }
        }
        Ok(())
    }
}

async fn write_stdout(bytes: &[u8]) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(bytes).await?;
    stdout.flush().await
}
