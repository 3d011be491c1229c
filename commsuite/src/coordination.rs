//! Ordered hand-off between the worker threads of one process.
//!
//! Some tests need each thread to finish a critical step before the next one
//! starts it, e.g. duplicating a shared communicator so that every process
//! performs the duplications in the same order. The [`SignalRing`] holds one
//! latched signal per thread:
//!
//! ```text
//! thread 0 ──work──► signal(1)
//! thread 1 ──wait(1)──work──► signal(2)
//! ...
//! thread N-1 ──wait(N-1)──work──► signal(0)
//! ```
//!
//! Signals are latched, so `signal(k)` may run before thread `k` reaches
//! `wait(k)`. A thread whose signal never arrives blocks forever.
//!
//! Thread 0 holds the token when the ring is created. From the second round
//! on it waits for `signal(0)` from thread N-1 like every other thread.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use crate::error::{SuiteError, SuiteResult};

/// A single latched wake-up: `raise` sets it, `wait` blocks until set and clears it.
#[derive(Debug, Default)]
struct Signal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    fn raise(&self) {
        let mut raised = self.raised.lock().unwrap_or_else(PoisonError::into_inner);
        *raised = true;
        self.cond.notify_one();
    }

    fn wait(&self) {
        let mut raised = self.raised.lock().unwrap_or_else(PoisonError::into_inner);
        while !*raised {
            raised = self
                .cond
                .wait(raised)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *raised = false;
    }
}

/// Fixed-size array of per-thread signals.
#[derive(Debug)]
pub struct SignalRing {
    signals: Box<[Signal]>,
    started: AtomicBool,
}

impl SignalRing {
    /// Create a ring of `n` idle signals.
    pub fn new(n: usize) -> Self {
        Self {
            signals: (0..n).map(|_| Signal::default()).collect(),
            started: AtomicBool::new(false),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    /// Whether the ring has no slots.
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    fn slot(&self, index: usize) -> SuiteResult<&Signal> {
        self.signals.get(index).ok_or_else(|| {
            SuiteError::Configuration(format!(
                "signal index {index} outside ring of {}",
                self.signals.len()
            ))
        })
    }

    /// Block until slot `index` is signaled, then consume the signal.
    pub fn wait(&self, index: usize) -> SuiteResult<()> {
        self.slot(index)?.wait();
        Ok(())
    }

    /// Latch slot `index` and wake its waiter.
    pub fn signal(&self, index: usize) -> SuiteResult<()> {
        self.slot(index)?.raise();
        Ok(())
    }

    /// Take the token for slot `index`: the first acquire of slot 0 returns
    /// at once, every other acquire waits for the slot's signal.
    pub fn acquire(&self, index: usize) -> SuiteResult<()> {
        let slot = self.slot(index)?;
        if index == 0 && !self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        slot.wait();
        Ok(())
    }
}

/// Per-activation holder of the ring shared by a process's worker threads.
///
/// Thread 0 creates the ring in `init` and destroys it in `cleanup`; the
/// driver separates the phases with barriers so no thread waits before the
/// ring exists or after it is gone.
#[derive(Debug, Default)]
pub struct Coordination {
    ring: Mutex<Option<Arc<SignalRing>>>,
    inits: AtomicUsize,
    teardowns: AtomicUsize,
}

impl Coordination {
    /// Create an empty holder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the ring. Only thread 0 may call this, once per activation.
    pub fn ring_init(&self, caller: usize, n: usize) -> SuiteResult<()> {
        if caller != 0 {
            return Err(SuiteError::Configuration(format!(
                "ring_init called from thread {caller}, only thread 0 may initialize"
            )));
        }
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        if ring.is_some() {
            return Err(SuiteError::Configuration(
                "signal ring initialized twice".to_string(),
            ));
        }
        *ring = Some(Arc::new(SignalRing::new(n)));
        self.inits.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(threads = n, "signal ring initialized");
        Ok(())
    }

    /// Destroy the ring. Only thread 0 may call this, once per activation.
    pub fn ring_teardown(&self, caller: usize) -> SuiteResult<()> {
        if caller != 0 {
            return Err(SuiteError::Configuration(format!(
                "ring_teardown called from thread {caller}, only thread 0 may tear down"
            )));
        }
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        if ring.take().is_none() {
            return Err(SuiteError::Configuration(
                "signal ring torn down without being initialized".to_string(),
            ));
        }
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        tracing::trace!("signal ring torn down");
        Ok(())
    }

    fn ring(&self) -> SuiteResult<Arc<SignalRing>> {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| SuiteError::Configuration("signal ring not initialized".to_string()))
    }

    /// Block until `index` is signaled.
    pub fn wait(&self, index: usize) -> SuiteResult<()> {
        // Clone the Arc so the holder lock is not held while blocking.
        self.ring()?.wait(index)
    }

    /// Signal `index`.
    pub fn signal(&self, index: usize) -> SuiteResult<()> {
        self.ring()?.signal(index)
    }

    /// Block until `index` holds the token. See [`SignalRing::acquire`].
    pub fn acquire(&self, index: usize) -> SuiteResult<()> {
        self.ring()?.acquire(index)
    }

    /// Number of successful `ring_init` calls so far.
    pub fn init_count(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    /// Number of successful `ring_teardown` calls so far.
    pub fn teardown_count(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }
}

/// Identity of a worker thread within its process, plus the shared ring holder.
#[derive(Debug, Clone)]
pub struct ThreadContext {
    index: usize,
    count: usize,
    coordination: Arc<Coordination>,
}

impl ThreadContext {
    /// Context for worker `index` of `count`.
    pub fn new(index: usize, count: usize, coordination: Arc<Coordination>) -> Self {
        Self {
            index,
            count,
            coordination,
        }
    }

    /// Context for a test that runs on the process's own thread.
    pub fn single() -> Self {
        Self::new(0, 1, Arc::new(Coordination::new()))
    }

    /// Index of this thread, `0..count`.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of worker threads in the process.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether this thread owns ring setup and teardown.
    pub fn is_designated(&self) -> bool {
        self.index == 0
    }

    /// The ring holder shared by all threads of the activation.
    pub fn coordination(&self) -> &Coordination {
        &self.coordination
    }

    /// Run `section` in ring order: take the token, run, then pass the token
    /// to the next thread. Can be called once per round, any number of rounds.
    pub fn pass_token<T>(&self, section: impl FnOnce() -> SuiteResult<T>) -> SuiteResult<T> {
        self.coordination.acquire(self.index)?;
        let result = section();
        // Pass the token on even when the section failed, or later threads never wake.
        self.coordination.signal((self.index + 1) % self.count)?;
        result
    }
}
