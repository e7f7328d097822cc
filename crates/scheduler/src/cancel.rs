//! Cancellation token system for document runs
//!
//! Provides cancellation tokens that allow a running extraction to be
//! cancelled cooperatively, and a registry that enforces at most one active
//! run per key. Workers check `is_cancelled()` between units of work and
//! stop before starting the next one.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Key identifying the resource a run is bound to (a document id)
pub type RunKey = u64;

/// Cancellation token for cooperative cancellation
///
/// Multiple clones share the same underlying cancellation state via Arc,
/// so the caller can keep one clone and hand another to the worker.
///
/// # Example
///
/// ```
/// use docvault_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// // In the worker loop:
/// // for page in pages {
/// //     if worker_token.is_cancelled() {
/// //         break;
/// //     }
/// //     render(page).await;
/// // }
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Clone, Debug)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new cancellation token in the non-cancelled state
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel this token
    ///
    /// All clones observe the cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` if `cancel()` has been called on this token or any clone
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

type TokenMap = Arc<Mutex<HashMap<RunKey, CancellationToken>>>;

/// Registry of active runs keyed by resource
///
/// A key can hold at most one token at a time. `try_register` hands back a
/// [`RunGuard`] that frees the key when dropped, so a run that fails or
/// panics never leaves its slot occupied.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    tokens: TokenMap,
}

impl CancellationRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `key` with the given token
    ///
    /// Returns `None` if a run is already registered under `key`.
    pub fn try_register(&self, key: RunKey, token: CancellationToken) -> Option<RunGuard> {
        let mut tokens = self.tokens.lock();
        if tokens.contains_key(&key) {
            return None;
        }
        tokens.insert(key, token.clone());
        Some(RunGuard {
            tokens: Arc::clone(&self.tokens),
            key,
            token,
        })
    }

    /// Cancel the run registered under `key`
    ///
    /// Returns `true` if a run was found.
    pub fn cancel(&self, key: RunKey) -> bool {
        match self.tokens.lock().get(&key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Check whether a run is registered under `key`
    pub fn is_registered(&self, key: RunKey) -> bool {
        self.tokens.lock().contains_key(&key)
    }

    /// Number of active runs
    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    /// Check if no run is active
    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

/// Slot held by an active run; unregisters its key on drop
pub struct RunGuard {
    tokens: TokenMap,
    key: RunKey,
    token: CancellationToken,
}

impl RunGuard {
    /// The token shared with the registry for this run
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Key this run occupies
    pub fn key(&self) -> RunKey {
        self.key
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.tokens.lock().remove(&self.key);
    }
}
