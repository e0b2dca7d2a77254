//! Stop signal shared between `main` and the long-running loops.

use std::{
    future::{Future, pending},
    io,
};

use tokio::sync::watch;

/// Sending half; flips the signal once and for all.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Receiving half, checked at loop boundaries and raced against sleeps and reads.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // Receivers may already be gone when the loop finished on its own.
        let _ = self.tx.send(true);
    }

    /// Triggers on the first Ctrl-C and resolves on the second, at which
    /// point the caller should stop waiting for a graceful exit.
    pub async fn trigger_on_ctrl_c(self) -> io::Result<()> {
        self.trigger_on(tokio::signal::ctrl_c).await
    }

    pub async fn trigger_on<F, Fut>(self, mut signal: F) -> io::Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<()>>,
    {
        signal().await?;
        self.trigger();
        signal().await
    }
}

impl Shutdown {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, shutdown) = channel();
        shutdown
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal fires. Pends forever if the trigger was
    /// dropped without firing.
    pub async fn wait(&mut self) {
        let closed = self.rx.wait_for(|stopped| *stopped).await.is_err();
        if closed {
            pending::<()>().await;
        }
    }
}
