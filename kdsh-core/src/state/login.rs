//! One-shot login synchronization.
//!
//! ```text
//!   Idle ──begin──► Pending ──resolve──► Idle (last_result = Some(..))
//!    │                 │
//!    └──── close ──────┴──────────────► Closed (pending waiter gets `false`)
//! ```
//!
//! The caller moves the gate to `Pending` *before* the login frame is
//! queued, so the receiver can never see the reply while the gate still
//! reads `Idle`.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::error::KdshError;

#[derive(Debug, Default)]
enum LoginPhase {
    #[default]
    Idle,
    Pending {
        session_id: i64,
        reply: oneshot::Sender<bool>,
    },
    Closed,
}

#[derive(Debug, Default)]
struct Inner {
    phase: LoginPhase,
    last_result: Option<bool>,
    session_id: Option<i64>,
    /// An abandoned attempt whose status byte may still arrive.
    late_reply: bool,
}

/// Shared between the caller (who waits), the receiver (who resolves)
/// and the connection (who fails it on close).
#[derive(Debug, Default)]
pub struct LoginGate {
    inner: Mutex<Inner>,
}

impl LoginGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The state stays consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a login attempt and get the receiving end of its verdict.
    pub fn begin(&self, session_id: i64) -> Result<oneshot::Receiver<bool>, KdshError> {
        let mut inner = self.lock();
        match inner.phase {
            LoginPhase::Pending { .. } => Err(KdshError::LoginAlreadyInProgress),
            LoginPhase::Closed => Err(KdshError::ConnectionClosed),
            LoginPhase::Idle => {
                let (reply, rx) = oneshot::channel();
                inner.phase = LoginPhase::Pending { session_id, reply };
                inner.session_id = Some(session_id);
                inner.late_reply = false;
                Ok(rx)
            }
        }
    }

    /// Deliver the verdict for the pending attempt.
    ///
    /// Returns `false` when nothing was pending.
    pub fn resolve(&self, success: bool) -> bool {
        let mut inner = self.lock();
        if !matches!(inner.phase, LoginPhase::Pending { .. }) {
            return false;
        }
        if let LoginPhase::Pending { reply, .. } = std::mem::take(&mut inner.phase) {
            inner.last_result = Some(success);
            // The waiter may have timed out and gone away.
            let _ = reply.send(success);
        }
        true
    }

    /// Give up on the pending attempt without a verdict (caller timeout).
    ///
    /// The gate remembers the attempt until the next inbound frame so a
    /// late status byte is not shown as text.
    pub fn abandon(&self) {
        let mut inner = self.lock();
        if matches!(inner.phase, LoginPhase::Pending { .. }) {
            inner.phase = LoginPhase::Idle;
            inner.late_reply = true;
        }
    }

    /// Whether an abandoned attempt's reply may be next on the wire.
    /// Clears the mark.
    pub fn take_late_reply(&self) -> bool {
        std::mem::take(&mut self.lock().late_reply)
    }

    /// Fail any pending attempt and refuse new ones.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.late_reply = false;
        if let LoginPhase::Pending { reply, .. } =
            std::mem::replace(&mut inner.phase, LoginPhase::Closed)
        {
            inner.last_result = Some(false);
            let _ = reply.send(false);
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.lock().phase, LoginPhase::Pending { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.lock().phase, LoginPhase::Closed)
    }

    /// Verdict of the most recently resolved attempt.
    pub fn last_result(&self) -> Option<bool> {
        self.lock().last_result
    }

    /// Session id sent with the most recent attempt.
    pub fn session_id(&self) -> Option<i64> {
        self.lock().session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_exactly_once() {
        let gate = LoginGate::new();
        let rx = gate.begin(5).unwrap();
        assert!(gate.is_pending());
        assert_eq!(gate.session_id(), Some(5));

        assert!(gate.resolve(true));
        assert!(!gate.resolve(false));

        assert!(rx.await.unwrap());
        assert_eq!(gate.last_result(), Some(true));
        assert!(!gate.is_pending());
    }

    #[test]
    fn second_attempt_while_pending_is_rejected() {
        let gate = LoginGate::new();
        let _rx = gate.begin(0).unwrap();
        assert!(matches!(
            gate.begin(0),
            Err(KdshError::LoginAlreadyInProgress)
        ));
    }

    #[tokio::test]
    async fn close_fails_pending_attempt() {
        let gate = LoginGate::new();
        let rx = gate.begin(0).unwrap();
        gate.close();
        assert!(!rx.await.unwrap());
        assert!(gate.is_closed());
        assert_eq!(gate.last_result(), Some(false));
        assert!(matches!(gate.begin(0), Err(KdshError::ConnectionClosed)));
    }

    #[test]
    fn close_is_idempotent() {
        let gate = LoginGate::new();
        gate.close();
        gate.close();
        assert!(gate.is_closed());
        assert_eq!(gate.last_result(), None);
    }

    #[test]
    fn abandon_allows_retry() {
        let gate = LoginGate::new();
        let rx = gate.begin(1).unwrap();
        gate.abandon();
        drop(rx);
        assert!(!gate.resolve(true));
        assert!(gate.begin(2).is_ok());
    }

    #[test]
    fn abandoned_attempt_is_remembered_once() {
        let gate = LoginGate::new();
        assert!(!gate.take_late_reply());

        let _rx = gate.begin(1).unwrap();
        gate.abandon();
        assert!(gate.take_late_reply());
        assert!(!gate.take_late_reply());

        // A fresh attempt owns the next reply.
        let _rx = gate.begin(1).unwrap();
        gate.abandon();
        let _rx = gate.begin(2).unwrap();
        assert!(!gate.take_late_reply());
    }
}
