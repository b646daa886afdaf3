//! Cancellation shared between the pipeline and whoever is driving it.
//!
//! Nothing is ever sent down the channel; cancelling drops the only
//! [`Sender`], which disconnects every [`CancelToken`] at once and wakes any
//! thread sleeping in [`CancelToken::wait`].

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Create a linked canceller and token.
pub fn cancellation() -> (Canceller, CancelToken) {
    let (tx, rx) = bounded(0);
    (Canceller { _tx: tx }, CancelToken { rx })
}

/// Cancels all tokens when [`Canceller::cancel`] is called or when it is
/// dropped.
#[derive(Debug)]
pub struct Canceller {
    _tx: Sender<()>,
}

impl Canceller {
    pub fn cancel(self) {}
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for up to `timeout`. Returns `true` if cancellation cut the sleep
    /// short (or had already happened).
    pub fn wait(&self, timeout: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// For use in `crossbeam_channel::select!`; the receiver becomes ready
    /// (with an error) on cancellation.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}
