//! Cancellation of the manager's wait loops.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Triggers cancellation. Cheap to clone and safe to use from another task.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Observes cancellation inside a wait loop.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Creates a linked handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelToken { rx })
}

impl CancelHandle {
    /// Cancellation is sticky: every current and future wait observes it.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                // Handle gone without cancelling: never resolves.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleeps for `duration`. Returns `false` if cancelled first.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => true,
            () = self.cancelled() => false,
        }
    }

    /// Drives `future` to completion unless cancellation or `deadline` comes
    /// first, in which case the future is dropped and `None` returned. A
    /// future is never polled once either has happened.
    pub async fn run_until<F: Future>(&mut self, future: F, deadline: Option<Instant>) -> Option<F::Output> {
        if self.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d) {
            return None;
        }
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            output = future => Some(output),
            () = self.cancelled() => None,
            () = expired => None,
        }
    }
}
