//! Abort signals for cooperative cancellation.
//!
//! The engine provides the MECHANISM (a shared signal with state).
//! The caller provides the POLICY (when to abort).
//!
//! # State Machine
//!
//! ```text
//! Active ──abort(reason)──→ Aborted
//! ```
//!
//! # Connections
//!
//! - Callers put a signal on operation parameters.
//! - The engine forwards it untouched to model requests and tool options;
//!   it never checks it between lifecycle steps.
//! - Providers and tools check [`AbortSignal::is_aborted`] or await
//!   [`AbortSignal::aborted`] to stop early.
//! - Child signals follow their parent.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;

/// A synchronous callback run once when the signal aborts.
pub type AbortCallback = Box<dyn FnOnce(&str) + Send>;

/// Interior mutable state for [`AbortSignal`].
struct Inner {
    reason: Option<String>,
    children: Vec<AbortSignal>,
    callbacks: Vec<AbortCallback>,
}

/// Cancellation signal shared between a caller and the work it started.
///
/// Cloning yields another handle to the same signal.
///
/// # Example
///
/// ```rust
/// use ai_core::cancellation::AbortSignal;
///
/// let signal = AbortSignal::new();
/// assert!(!signal.is_aborted());
///
/// signal.abort("user pressed stop");
/// assert_eq!(signal.reason().as_deref(), Some("user pressed stop"));
/// ```
#[derive(Clone)]
pub struct AbortSignal {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl AbortSignal {
    /// Create a signal in the active state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                reason: None,
                children: Vec::new(),
                callbacks: Vec::new(),
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// `true` once [`abort`](Self::abort) was called on this signal or a parent.
    pub fn is_aborted(&self) -> bool {
        self.lock().reason.is_some()
    }

    /// The reason given to the first `abort` call.
    pub fn reason(&self) -> Option<String> {
        self.lock().reason.clone()
    }

    /// Abort the signal, its children, and run abort callbacks.
    ///
    /// Returns `true` if the state changed, `false` if already aborted.
    pub fn abort(&self, reason: &str) -> bool {
        let (children, callbacks) = {
            let mut inner = self.lock();
            if inner.reason.is_some() {
                return false;
            }
            inner.reason = Some(reason.to_string());
            (
                inner.children.clone(),
                std::mem::take(&mut inner.callbacks),
            )
        };

        self.notify.notify_waiters();
        for callback in callbacks {
            callback(reason);
        }
        for child in &children {
            child.abort(reason);
        }
        true
    }

    /// Create a child signal that aborts together with this one.
    ///
    /// If this signal is already aborted, the child starts aborted.
    pub fn child(&self) -> AbortSignal {
        let child = AbortSignal::new();
        let reason = {
            let mut inner = self.lock();
            if inner.reason.is_none() {
                inner.children.push(child.clone());
            }
            inner.reason.clone()
        };
        if let Some(reason) = reason {
            child.abort(&reason);
        }
        child
    }

    /// Run `callback` when the signal aborts (immediately if it already has).
    pub fn on_abort(&self, callback: AbortCallback) {
        let reason = {
            let mut inner = self.lock();
            match inner.reason.clone() {
                Some(reason) => reason,
                None => {
                    inner.callbacks.push(callback);
                    return;
                }
            }
        };
        callback(&reason);
    }

    /// Wait until the signal aborts.
    pub async fn aborted(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for AbortSignal {
    /// Two handles are equal when they refer to the same signal.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("reason", &self.reason())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
