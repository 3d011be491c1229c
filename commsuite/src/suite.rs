//! The test lifecycle contract.
//!
//! Every test goes through three phases per activation:
//!
//! 1. **Init**: allocate and seed buffers, one-time shared setup
//! 2. **Run**: communication pattern plus verification
//! 3. **Cleanup**: release everything `init` and `run` acquired
//!
//! The driver calls them in that order, once per activation, rank and thread.
//! `cleanup` runs even when `init` or `run` failed.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::comm::{CommClass, CommRegistry};
use crate::env::Environment;
use crate::error::SuiteResult;
use crate::tag::TagGenerator;
use crate::transport::{Communicator, Tag};
use crate::types::TypeRegistry;

/// Stable identifier of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TestId(pub usize);

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broad category of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestClass {
    /// Point-to-point messaging.
    PointToPoint,
    /// Collective operations.
    Collective,
    /// Several worker threads per process.
    Threaded,
}

/// Process-wide registries shared by every activation.
#[derive(Debug, Clone, Copy)]
pub struct SuiteContext<'a> {
    /// Supported types.
    pub types: &'a TypeRegistry,
    /// Communicators built for this process.
    pub comms: &'a CommRegistry,
    /// Tag generator sized for both registries.
    pub tags: TagGenerator,
}

impl SuiteContext<'_> {
    /// Handle of the communicator under test.
    pub fn comm(&self, env: &Environment) -> SuiteResult<&dyn Communicator> {
        self.comms.resolve(env.comm)
    }

    /// Tag for the activation.
    pub fn tag(&self, env: &Environment) -> Tag {
        self.tags.tag_for(env)
    }
}

/// A test body.
///
/// One instance serves every activation, thread and process, so hooks take
/// `&self` and keep their state in [`Environment::scratch`].
pub trait SuiteTest: Send + Sync {
    /// Allocate and seed buffers.
    fn init(&self, _ctx: &SuiteContext<'_>, _env: &mut Environment) -> SuiteResult<()> {
        Ok(())
    }

    /// Communicate and verify.
    fn run(&self, ctx: &SuiteContext<'_>, env: &mut Environment) -> SuiteResult<()>;

    /// Release what `init` and `run` acquired. Must tolerate partial state.
    fn cleanup(&self, _ctx: &SuiteContext<'_>, _env: &mut Environment) -> SuiteResult<()> {
        Ok(())
    }
}

/// Catalog entry for a test.
#[derive(Clone)]
pub struct TestDescriptor {
    /// Stable id, also an input of the tag.
    pub id: TestId,
    /// Name used in configuration and reports.
    pub name: &'static str,
    /// Category.
    pub class: TestClass,
    /// Communicator classes the test supports.
    pub comm_classes: &'static [CommClass],
    /// Whether each process runs the test on several worker threads.
    pub threaded: bool,
    /// The body.
    pub test: Arc<dyn SuiteTest>,
}

impl TestDescriptor {
    /// Whether the test can run on a communicator of `class`.
    pub fn supports(&self, class: CommClass) -> bool {
        self.comm_classes.contains(&class)
    }
}

impl fmt::Debug for TestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("class", &self.class)
            .field("comm_classes", &self.comm_classes)
            .field("threaded", &self.threaded)
            .finish_non_exhaustive()
    }
}
