//! Cooperative cancellation shared between the emitter, the event waiter and
//! the signal handler.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tracing::debug;

/// Why a session was told to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Operator interrupt (SIGINT/SIGTERM or an embedding caller).
    Interrupted,
    /// The emitter's grace window elapsed while probes were still pending.
    WatchdogExpired,
    /// The session is done and is tearing down its helpers.
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Interrupted => write!(f, "interrupted"),
            CancelReason::WatchdogExpired => write!(f, "watchdog expired"),
            CancelReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

struct Inner {
    reason: OnceLock<CancelReason>,
    // Dropping the sender disconnects every listener at once.
    trigger: Mutex<Option<Sender<()>>>,
    listener: Receiver<()>,
}

/// Cloneable cancellation handle. The first `cancel` call wins; later reasons
/// are ignored.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (trigger, listener) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                reason: OnceLock::new(),
                trigger: Mutex::new(Some(trigger)),
                listener,
            }),
        }
    }

    /// Cancel with `reason`. Returns false if the token was already cancelled.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        if self.inner.reason.set(reason).is_err() {
            return false;
        }
        let trigger = match self.inner.trigger.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(trigger);
        debug!(reason = %reason, "Cancellation requested");
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.reason.get().is_some()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.reason.get().copied()
    }

    /// A receiver that never yields a value and becomes disconnected on
    /// cancellation. Meant for `crossbeam_channel::select!`.
    pub fn listener(&self) -> &Receiver<()> {
        &self.inner.listener
    }

    /// Sleep for up to `timeout`. Returns true if woken by cancellation.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.inner.listener.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_first_reason_wins() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.cancel(CancelReason::WatchdogExpired));
        assert!(!token.cancel(CancelReason::Interrupted));
        assert_eq!(token.reason(), Some(CancelReason::WatchdogExpired));
    }

    #[test]
    fn test_wait_timeout_elapses_without_cancel() {
        let token = CancelToken::new();
        assert!(!token.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_cancel_wakes_sleeping_clone() {
        let token = CancelToken::new();
        let sleeper = token.clone();
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let woken = sleeper.wait_timeout(Duration::from_secs(10));
            (woken, start.elapsed())
        });
        thread::sleep(Duration::from_millis(20));
        token.cancel(CancelReason::Interrupted);

        let (woken, elapsed) = handle.join().unwrap();
        assert!(woken);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_listener_disconnects_on_cancel() {
        let token = CancelToken::new();
        token.cancel(CancelReason::Interrupted);
        assert!(token.listener().recv().is_err());
    }
}
