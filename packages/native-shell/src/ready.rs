//! One-shot readiness handshake.

/// Reserved payload on the readiness channel. Compared case-insensitively.
pub const READY_PAYLOAD: &str = "ready";

type ReadyListener = Box<dyn FnOnce()>;

/// Latches `false -> true` once. Listeners run on the first latch and are
/// dropped afterwards, so a repeated signal never re-notifies anyone.
#[derive(Default)]
pub struct ReadyLatch {
    ready: bool,
    listeners: Vec<ReadyListener>,
}

impl ReadyLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Register a one-shot listener. Runs immediately if already latched.
    pub fn subscribe(&mut self, listener: impl FnOnce() + 'static) {
        if self.ready {
            listener();
        } else {
            self.listeners.push(Box::new(listener));
        }
    }

    /// Handle a message from the readiness channel.
    ///
    /// Returns `true` only for the call that flips the latch.
    pub fn signal(&mut self, payload: &str) -> bool {
        if !payload.trim().eq_ignore_ascii_case(READY_PAYLOAD) {
            return false;
        }
        self.latch()
    }

    /// Flip the latch regardless of payload.
    pub fn latch(&mut self) -> bool {
        if self.ready {
            return false;
        }
        self.ready = true;
        for listener in std::mem::take(&mut self.listeners) {
            listener();
        }
        true
    }

    pub(crate) fn clear_listeners(&mut self) {
        self.listeners.clear();
    }
}

impl std::fmt::Debug for ReadyLatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyLatch")
            .field("ready", &self.ready)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
