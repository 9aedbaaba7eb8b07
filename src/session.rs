//! Reentrant scoped session.
//!
//! Grounded on `original_source`'s block-scoped construct: entering
//! acquires the engine's lock, enables buffering, and synchronizes;
//! exiting flushes, resynchronizes, and releases. The source achieves
//! reentrancy with `threading.RLock` plus a `_sstack` configuration
//! stack. `tokio::sync::Mutex` is not reentrant, so this guard models
//! reentrancy explicitly: the task that first enters a session takes
//! an owned guard over the engine's state and holds it for the whole
//! scope. Nested `enter` calls (and bare mutating calls routed through
//! [`SessionGuard::with_state`]) from that same task are recognized via
//! `tokio::task::try_id` and reuse the held guard instead of
//! re-locking, which would self-deadlock. Any other task — whether
//! entering its own session or making an unrelated bare mutating call —
//! contends for the same underlying `Mutex` and blocks until the
//! holder releases it, which is exactly the serialization `spec.md` §5
//! calls for.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::Id;

/// Per-session configuration the source's `_sstack` makes overridable
/// for the lifetime of a nested scope.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub buffering: bool,
}

struct Bookkeeping<T> {
    depth: u32,
    stack: Vec<SessionConfig>,
    holder_task: Option<Id>,
    guard: Option<OwnedMutexGuard<T>>,
}

impl<T> Default for Bookkeeping<T> {
    fn default() -> Self {
        Self {
            depth: 0,
            stack: Vec::new(),
            holder_task: None,
            guard: None,
        }
    }
}

/// The engine's single reentrant mutex over its mutable state `T`. One
/// `SessionGuard` is shared by every `Engine` clone; `enter` and
/// `with_state` are both safe to call from nested scopes within the
/// same logical call chain.
pub struct SessionGuard<T> {
    state: Arc<Mutex<T>>,
    bookkeeping: Arc<Mutex<Bookkeeping<T>>>,
}

impl<T> Clone for SessionGuard<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            bookkeeping: self.bookkeeping.clone(),
        }
    }
}

impl<T: Send + 'static> SessionGuard<T> {
    #[must_use]
    pub fn new(initial: T) -> Self {
        Self {
            state: Arc::new(Mutex::new(initial)),
            bookkeeping: Arc::new(Mutex::new(Bookkeeping::default())),
        }
    }

    /// Enter a (possibly nested) scoped session, pushing `config` onto
    /// the stack. The outermost `enter` on a given task acquires and
    /// holds the real lock until the matching outermost
    /// [`SessionScope::close`]; nested `enter` calls from that same
    /// task reuse it without re-locking.
    pub async fn enter(&self, config: SessionConfig) -> SessionScope<T> {
        let current = tokio::task::try_id();
        {
            let mut bk = self.bookkeeping.lock().await;
            if bk.depth > 0 && current.is_some() && bk.holder_task == current {
                bk.depth += 1;
                bk.stack.push(config);
                return SessionScope { guard: self.clone() };
            }
        }
        // Either nobody holds the session, or a different task does —
        // either way we must contend for the real lock.
        let owned = self.state.clone().lock_owned().await;
        let mut bk = self.bookkeeping.lock().await;
        bk.guard = Some(owned);
        bk.holder_task = current;
        bk.depth = 1;
        bk.stack.push(config);
        SessionScope { guard: self.clone() }
    }

    /// The currently active configuration, or `None` outside any
    /// session scope.
    pub async fn current_config(&self) -> Option<SessionConfig> {
        self.bookkeeping.lock().await.stack.last().copied()
    }

    async fn exit(&self) {
        let mut bk = self.bookkeeping.lock().await;
        bk.stack.pop();
        bk.depth = bk.depth.saturating_sub(1);
        if bk.depth == 0 {
            bk.holder_task = None;
            bk.guard = None;
        }
    }

    /// Depth of nested `enter` calls currently outstanding.
    pub async fn depth(&self) -> u32 {
        self.bookkeeping.lock().await.depth
    }

    /// Run `f` against the engine's state, serialized through the same
    /// mutex a scoped session holds. If the calling task already holds
    /// a session, `f` runs against that held guard directly; otherwise
    /// a fresh lock is taken for the duration of this call and
    /// released immediately after — so a bare `open`/`close`/`flush`/
    /// `synchronize` contends for exactly the lock an in-progress
    /// session holds.
    pub async fn with_state<R, F>(&self, f: F) -> R
    where
        F: for<'a> FnOnce(&'a mut T) -> Pin<Box<dyn Future<Output = R> + Send + 'a>>,
    {
        let current = tokio::task::try_id();
        let mut bk = self.bookkeeping.lock().await;
        if bk.depth > 0 && current.is_some() && bk.holder_task == current {
            let guard = bk.guard.as_mut().expect("depth > 0 implies a held guard");
            return f(&mut *guard).await;
        }
        drop(bk);
        let mut owned = self.state.clone().lock_owned().await;
        f(&mut *owned).await
    }
}

/// An active scope returned by [`SessionGuard::enter`]. The caller is
/// responsible for flushing and resynchronizing before the scope ends
/// (`Engine::session` does this); [`Self::close`] releases the
/// nesting-depth bookkeeping and, at depth zero, the real lock.
pub struct SessionScope<T> {
    guard: SessionGuard<T>,
}

impl<T: Send + 'static> SessionScope<T> {
    /// Explicitly end this scope, running the async teardown. Prefer
    /// this over letting the scope merely drop, since drop cannot
    /// flush staged writes.
    pub async fn close(self) {
        self.guard.exit().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn nested_enters_track_depth() {
        let guard: SessionGuard<u32> = SessionGuard::new(0);
        let outer = guard.enter(SessionConfig { buffering: true }).await;
        assert_eq!(guard.depth().await, 1);

        let inner = guard.enter(SessionConfig { buffering: true }).await;
        assert_eq!(guard.depth().await, 2);

        inner.close().await;
        assert_eq!(guard.depth().await, 1);

        outer.close().await;
        assert_eq!(guard.depth().await, 0);
    }

    #[tokio::test]
    async fn current_config_reflects_innermost_scope() {
        let guard: SessionGuard<u32> = SessionGuard::new(0);
        assert!(guard.current_config().await.is_none());

        let scope = guard.enter(SessionConfig { buffering: false }).await;
        assert!(!guard.current_config().await.unwrap().buffering);
        scope.close().await;
    }

    #[tokio::test]
    async fn nested_with_state_reuses_the_held_guard_without_deadlock() {
        let guard: SessionGuard<u32> = SessionGuard::new(0);
        let scope = guard.enter(SessionConfig { buffering: true }).await;

        let result = timeout(
            Duration::from_millis(200),
            guard.with_state(|n| {
                Box::pin(async move {
                    *n += 1;
                    *n
                })
            }),
        )
        .await
        .expect("with_state must not deadlock against the held session guard");
        assert_eq!(result, 1);

        scope.close().await;
    }

    #[tokio::test]
    async fn a_bare_call_blocks_until_the_session_releases() {
        let guard: SessionGuard<u32> = SessionGuard::new(0);
        let scope = guard.enter(SessionConfig { buffering: true }).await;

        let other = guard.clone();
        let task = tokio::spawn(async move {
            other
                .with_state(|n| {
                    Box::pin(async move {
                        *n += 1;
                        *n
                    })
                })
                .await
        });

        // A different tokio task id: it must contend for the real
        // lock and cannot proceed while this scope is open.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        scope.close().await;
        let result = timeout(Duration::from_millis(200), task).await.unwrap().unwrap();
        assert_eq!(result, 1);
    }
}
