//! The catalog of runnable tests.

use std::sync::Arc;

use crate::comm::CommClass;
use crate::error::{SuiteError, SuiteResult};
use crate::suite::{TestClass, TestDescriptor, TestId};

pub mod p2p;
pub mod threaded;

pub use p2p::ManyToOneProbeAnySource;
pub use threaded::ThreadedCommDup;

const BOTH_CLASSES: &[CommClass] = &[CommClass::Intra, CommClass::Inter];

/// Every built-in test, in id order.
pub fn catalog() -> Vec<TestDescriptor> {
    vec![
        TestDescriptor {
            id: TestId(0),
            name: "p2p_many_to_one_probe_anysource",
            class: TestClass::PointToPoint,
            comm_classes: BOTH_CLASSES,
            threaded: false,
            test: Arc::new(ManyToOneProbeAnySource),
        },
        TestDescriptor {
            id: TestId(1),
            name: "threaded_comm_dup",
            class: TestClass::Threaded,
            comm_classes: BOTH_CLASSES,
            threaded: true,
            test: Arc::new(ThreadedCommDup),
        },
    ]
}

/// Catalog entry by name.
pub fn find(name: &str) -> SuiteResult<TestDescriptor> {
    catalog()
        .into_iter()
        .find(|t| t.name == name)
        .ok_or_else(|| SuiteError::Configuration(format!("unknown test '{name}'")))
}
