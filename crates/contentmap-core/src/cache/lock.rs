//! Graph Lock
//!
//! Reader/writer lock with bounded acquisition and diagnostics.
//!
//! - Read scopes are recursive: a thread already reading can open nested
//!   read scopes even while a writer is queued.
//! - Requests that would deadlock the calling thread (any scope while it
//!   holds the write scope, or a write scope while it holds a read scope)
//!   fail immediately with [`LockError::Reentrant`].
//! - Acquisition gives up after the configured timeout with
//!   [`LockError::Timeout`], carrying a snapshot of the lock state.
//!
//! Every counter is maintained by a guard, so a panicking scope leaves the
//! lock and its diagnostics consistent.

use parking_lot::RwLock;
use serde::Serialize;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, trace};
use uuid::Uuid;

/// Default time to wait for a read or write scope
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

static NEXT_LOCK_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// Locks held by the current thread, innermost last.
    static HELD: RefCell<Vec<(usize, LockMode)>> = const { RefCell::new(Vec::new()) };
}

/// Kind of scope requested from a [`GraphLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    Read,
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Read => f.write_str("read"),
            LockMode::Write => f.write_str("write"),
        }
    }
}

/// Caller information attached to every lock request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockContext {
    pub operation: String,
    pub correlation_id: Uuid,
}

impl LockContext {
    /// New context with a fresh correlation id
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            correlation_id: Uuid::new_v4(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// Point-in-time view of a lock's holders and waiters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LockStateSnapshot {
    pub readers_held: usize,
    pub writer_held: bool,
    pub readers_waiting: usize,
    pub writers_waiting: usize,
}

impl fmt::Display for LockStateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "readers held: {}, writer held: {}, readers waiting: {}, writers waiting: {}",
            self.readers_held, self.writer_held, self.readers_waiting, self.writers_waiting
        )
    }
}

/// Errors raised when a scope cannot be entered
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Timed out after {timeout:?} waiting for {mode} lock ({operation}, {correlation_id}); {state}")]
    Timeout {
        mode: LockMode,
        operation: String,
        correlation_id: Uuid,
        timeout: Duration,
        state: LockStateSnapshot,
    },

    #[error("Reentrant {mode} lock request while holding the {held} lock ({operation}, {correlation_id})")]
    Reentrant {
        mode: LockMode,
        held: LockMode,
        operation: String,
        correlation_id: Uuid,
    },
}

impl LockError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::Timeout { .. })
    }
}

/// A timed, diagnosable reader/writer lock.
///
/// Only read scopes nest. Code running inside [`GraphLock::write`] must work
/// through the `&mut T` it was given: opening a read scope there fails with
/// [`LockError::Reentrant`] instead of deadlocking, as does upgrading a read
/// scope to a write scope.
pub struct GraphLock<T> {
    id: usize,
    inner: RwLock<T>,
    timeout: Duration,
    readers_held: AtomicUsize,
    writer_held: AtomicBool,
    readers_waiting: AtomicUsize,
    writers_waiting: AtomicUsize,
}

impl<T> GraphLock<T> {
    pub fn new(value: T) -> Self {
        Self::with_timeout(value, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_timeout(value: T, timeout: Duration) -> Self {
        Self {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            inner: RwLock::new(value),
            timeout,
            readers_held: AtomicUsize::new(0),
            writer_held: AtomicBool::new(false),
            readers_waiting: AtomicUsize::new(0),
            writers_waiting: AtomicUsize::new(0),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current holders and waiters
    pub fn state(&self) -> LockStateSnapshot {
        LockStateSnapshot {
            readers_held: self.readers_held.load(Ordering::Relaxed),
            writer_held: self.writer_held.load(Ordering::Relaxed),
            readers_waiting: self.readers_waiting.load(Ordering::Relaxed),
            writers_waiting: self.writers_waiting.load(Ordering::Relaxed),
        }
    }

    /// Strongest scope the current thread holds on this lock
    pub fn held_by_current_thread(&self) -> Option<LockMode> {
        HELD.with(|held| {
            let held = held.borrow();
            let mut strongest = None;
            for (id, mode) in held.iter() {
                if *id != self.id {
                    continue;
                }
                if *mode == LockMode::Write {
                    return Some(LockMode::Write);
                }
                strongest = Some(LockMode::Read);
            }
            strongest
        })
    }

    /// Run `f` inside a read scope.
    pub fn read<R>(&self, ctx: &LockContext, f: impl FnOnce(&T) -> R) -> Result<R, LockError> {
        if let Some(LockMode::Write) = self.held_by_current_thread() {
            return Err(self.reentrant(ctx, LockMode::Read, LockMode::Write));
        }

        let started = Instant::now();
        let guard = {
            let _waiting = Counted::enter(&self.readers_waiting);
            match self.inner.try_read_recursive_for(self.timeout) {
                Some(guard) => guard,
                None => return Err(self.timed_out(ctx, LockMode::Read)),
            }
        };
        let _held = Held::enter(self, LockMode::Read);
        trace!(
            "Read lock acquired for {} ({}) in {:?}",
            ctx.operation,
            ctx.correlation_id,
            started.elapsed()
        );

        Ok(f(&guard))
    }

    /// Run `f` inside the write scope.
    pub fn write<R>(&self, ctx: &LockContext, f: impl FnOnce(&mut T) -> R) -> Result<R, LockError> {
        if let Some(held) = self.held_by_current_thread() {
            return Err(self.reentrant(ctx, LockMode::Write, held));
        }

        let started = Instant::now();
        let mut guard = {
            let _waiting = Counted::enter(&self.writers_waiting);
            match self.inner.try_write_for(self.timeout) {
                Some(guard) => guard,
                None => return Err(self.timed_out(ctx, LockMode::Write)),
            }
        };
        let _held = Held::enter(self, LockMode::Write);
        trace!(
            "Write lock acquired for {} ({}) in {:?}",
            ctx.operation,
            ctx.correlation_id,
            started.elapsed()
        );

        Ok(f(&mut guard))
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    /// Timeout error for `mode`, with the current state of this lock.
    ///
    /// Also used by callers that give up waiting on a companion lock.
    pub(crate) fn timed_out(&self, ctx: &LockContext, mode: LockMode) -> LockError {
        let state = self.state();
        error!(
            "Timed out after {:?} waiting for {} lock: operation={}, correlation_id={}, {}",
            self.timeout, mode, ctx.operation, ctx.correlation_id, state
        );
        LockError::Timeout {
            mode,
            operation: ctx.operation.clone(),
            correlation_id: ctx.correlation_id,
            timeout: self.timeout,
            state,
        }
    }

    fn reentrant(&self, ctx: &LockContext, mode: LockMode, held: LockMode) -> LockError {
        error!(
            "Reentrant {} lock request while holding the {} lock: operation={}, correlation_id={}",
            mode, held, ctx.operation, ctx.correlation_id
        );
        LockError::Reentrant {
            mode,
            held,
            operation: ctx.operation.clone(),
            correlation_id: ctx.correlation_id,
        }
    }
}

impl<T: Default> Default for GraphLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for GraphLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphLock")
            .field("timeout", &self.timeout)
            .field("state", &self.state())
            .finish()
    }
}

/// Increments a counter for as long as it lives.
struct Counted<'a>(&'a AtomicUsize);

impl<'a> Counted<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for Counted<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Records a held scope on the lock and in the thread's held list.
struct Held<'a, T> {
    lock: &'a GraphLock<T>,
    mode: LockMode,
}

impl<'a, T> Held<'a, T> {
    fn enter(lock: &'a GraphLock<T>, mode: LockMode) -> Self {
        match mode {
            LockMode::Read => {
                lock.readers_held.fetch_add(1, Ordering::Relaxed);
            }
            LockMode::Write => lock.writer_held.store(true, Ordering::Relaxed),
        }
        HELD.with(|held| held.borrow_mut().push((lock.id, mode)));
        Self { lock, mode }
    }
}

impl<T> Drop for Held<'_, T> {
    fn drop(&mut self) {
        let entry = (self.lock.id, self.mode);
        // the thread-local may already be gone during thread teardown
        let _ = HELD.try_with(|held| {
            let mut held = held.borrow_mut();
            if let Some(position) = held.iter().rposition(|e| *e == entry) {
                held.remove(position);
            }
        });
        match self.mode {
            LockMode::Read => {
                self.lock.readers_held.fetch_sub(1, Ordering::Relaxed);
            }
            LockMode::Write => self.lock.writer_held.store(false, Ordering::Relaxed),
        }
    }
}
