//! Per-activation state handed to a test's lifecycle hooks.

use std::fmt;

use serde::Serialize;

use crate::comm::CommId;
use crate::coordination::ThreadContext;
use crate::suite::TestId;
use crate::transport::Communicator;
use crate::types::{TypeId, TypedBuffer};

/// Identity of one activation: a test run on one communicator, type and count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ActivationId {
    /// Test.
    pub test: TestId,
    /// Communicator.
    pub comm: CommId,
    /// Element type.
    pub type_id: TypeId,
    /// Element count.
    pub values_num: usize,
    /// Worker threads per process (1 for unthreaded tests).
    pub num_threads: usize,
}

impl fmt::Display for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "test={} comm={} type={} values_num={} threads={}",
            self.test, self.comm, self.type_id, self.values_num, self.num_threads
        )
    }
}

/// Buffers and handles a test keeps between its phases.
///
/// `init` fills it, `run` uses it, `cleanup` empties it.
#[derive(Debug, Default)]
pub struct Scratch {
    /// Buffer allocated in `init`.
    pub send_buffer: Option<TypedBuffer>,
    /// Communicators the test created and must free.
    pub comms: Vec<Box<dyn Communicator>>,
}

/// The environment of one activation on one thread of one process.
///
/// Created by the driver, mutated by the three lifecycle phases and dropped
/// after `cleanup`.
#[derive(Debug)]
pub struct Environment {
    /// Communicator under test.
    pub comm: CommId,
    /// Element type.
    pub type_id: TypeId,
    /// Element count.
    pub values_num: usize,
    /// Test being run.
    pub test: TestId,
    /// Worker thread identity.
    pub thread: ThreadContext,
    /// Test-owned state.
    pub scratch: Scratch,
}

impl Environment {
    /// Fresh environment for `activation` on `thread`.
    pub fn new(activation: ActivationId, thread: ThreadContext) -> Self {
        Self {
            comm: activation.comm,
            type_id: activation.type_id,
            values_num: activation.values_num,
            test: activation.test,
            thread,
            scratch: Scratch::default(),
        }
    }

    /// Identity of the activation this environment belongs to.
    pub fn activation(&self) -> ActivationId {
        ActivationId {
            test: self.test,
            comm: self.comm,
            type_id: self.type_id,
            values_num: self.values_num,
            num_threads: self.thread.count(),
        }
    }
}
