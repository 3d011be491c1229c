//! # commsuite
//!
//! A conformance and stress test harness for message-passing libraries.
//!
//! Test cases plug into a shared engine that runs them over a matrix of
//! communicators, data types, element counts and thread counts, and checks
//! the delivered data and message metadata.
//!
//! The engine provides:
//! - A type registry that allocates buffers and fills or checks them with a
//!   seed-derived standard pattern, for primitive and structured types
//! - A communicator registry built collectively from the world communicator
//! - Deterministic message tags derived from the activation identity
//! - A signal ring that hands a critical section from worker thread to
//!   worker thread in a fixed order
//! - The `init`/`run`/`cleanup` lifecycle driver and failure reporting
//!
//! The transport is consumed through the [`Communicator`] trait.
//! [`local::LocalUniverse`] implements it in-process, one thread per rank,
//! with optional seeded delivery delays and payload corruption.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// Built-in test cases.
pub mod cases;
/// Failure detection and check statistics.
pub mod check;
/// Communicator registry.
pub mod comm;
/// Suite configuration and builder.
pub mod config;
/// Ordered hand-off between worker threads.
pub mod coordination;
/// Per-rank execution of the activation matrix.
pub mod driver;
/// Activation environment.
pub mod env;
/// Error types.
pub mod error;
/// In-process transport.
pub mod local;
/// Outcomes and reporting.
pub mod report;
/// Test lifecycle contract.
pub mod suite;
/// Activation tags.
pub mod tag;
/// The transport interface.
pub mod transport;
/// Type registry and standard patterns.
pub mod types;

pub use check::{check, check_eq, check_in_range, check_payload, CheckStats, TransportResultExt};
pub use comm::{CommClass, CommId, CommRegistry, InterSide};
pub use config::{run_local, SuiteBuilder, SuiteConfig};
pub use coordination::{Coordination, SignalRing, ThreadContext};
pub use driver::{run_rank, Plan};
pub use env::{ActivationId, Environment, Scratch};
pub use error::{ErrorKind, SuiteError, SuiteResult, VerificationFailure};
pub use local::{ChaosConfiguration, HandleStats, LocalUniverse, TrafficStats};
pub use report::{ActivationStatus, FailureRecord, Phase, RankReport, SuiteReport};
pub use suite::{SuiteContext, SuiteTest, TestClass, TestDescriptor, TestId};
pub use tag::TagGenerator;
pub use transport::{
    BcastRoot, Communicator, Rank, Source, Status, Tag, TagSelector, TransportError,
    TransportResult,
};
pub use types::{TypeId, TypeRegistry, TypedBuffer};
