use std::sync::Arc;

use tokio::sync::watch;

/// The external navigation signal: one current room token (or none) with
/// change notification, the analogue of a URL fragment.
///
/// The session both consumes it (externally-initiated changes: back/forward,
/// shared links) and writes it (to reflect self-initiated transitions).
/// Self-initiated writes are echoed back by the channel; the session
/// suppresses that echo with a one-shot flag rather than reacting to it.
#[derive(Clone)]
pub struct NavigationSignal {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl NavigationSignal {
    pub fn new(initial: Option<String>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Current token.
    pub fn get(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Set the token, notifying all subscribers (including the setter).
    pub fn set(&self, token: Option<String>) {
        // send_replace never fails; plain send would error with no receivers
        self.tx.send_replace(token);
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}

impl Default for NavigationSignal {
    fn default() -> Self {
        Self::new(None)
    }
}
