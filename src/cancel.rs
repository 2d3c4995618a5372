//! Cancellation signals shared between the client pipeline and the server
//!
//! A source owns the sending side of a zero-message channel; cancelling closes
//! the channel, which wakes every token waiting on it. Tokens are cheap clones.

use smol::channel::{self, Receiver, Sender};

/// Owner side of a cancellation signal
#[derive(Debug, Clone)]
pub struct CancellationSource {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl CancellationSource {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(1);
        Self { tx, rx }
    }

    /// Signal cancellation. Returns `false` if it was already cancelled.
    pub fn cancel(&self) -> bool {
        self.tx.close()
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }

    /// Hand out a token observing this source
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            rx: self.rx.clone(),
            _keepalive: None,
        }
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation signal
#[derive(Debug, Clone)]
pub struct CancellationToken {
    rx: Receiver<()>,
    // Holds the channel open for tokens that can never fire.
    _keepalive: Option<Sender<()>>,
}

impl CancellationToken {
    /// A token that is never cancelled
    pub fn never() -> Self {
        let (tx, rx) = channel::bounded(1);
        Self {
            rx,
            _keepalive: Some(tx),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.is_closed()
    }

    /// Resolve once the owning source cancels
    pub async fn cancelled(&self) {
        // Nothing is ever sent, so recv only returns once the channel closes.
        let _ = self.rx.recv().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_idempotent() {
        let source = CancellationSource::new();
        let token = source.token();
        assert!(!token.is_cancelled());

        assert!(source.cancel());
        assert!(!source.cancel());
        assert!(token.is_cancelled());
        assert!(source.is_cancelled());
    }

    #[test]
    fn test_cancelled_wakes_waiters() {
        let source = CancellationSource::new();
        let token = source.token();
        let waiter = std::thread::spawn(move || smol::block_on(token.cancelled()));
        source.cancel();
        waiter.join().unwrap();
    }

    #[test]
    fn test_never_token_stays_open() {
        let token = CancellationToken::never();
        let clone = token.clone();
        drop(token);
        assert!(!clone.is_cancelled());
    }
}
