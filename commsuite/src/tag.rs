//! Message tags derived from the identity of a test activation.
//!
//! Every rank computes the tag locally from `(comm, type, test)`; no
//! communication is involved. The tag packs the three ids into disjoint bit
//! fields, so distinct identities never share a tag and every tag lies in
//! `0..=TAG_UB`, away from the negative wildcard marker.

use crate::comm::CommId;
use crate::env::Environment;
use crate::error::{SuiteError, SuiteResult};
use crate::suite::TestId;
use crate::transport::{Tag, TAG_UB};
use crate::types::TypeId;

const TEST_BITS: u32 = 5;
const TYPE_BITS: u32 = 5;
const COMM_BITS: u32 = 5;

/// Computes activation tags. Construction checks the registries fit the tag space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagGenerator {
    _private: (),
}

impl TagGenerator {
    /// Create a generator for registries of the given sizes.
    pub fn new(comm_count: usize, type_count: usize, test_count: usize) -> SuiteResult<Self> {
        for (what, count, bits) in [
            ("communicators", comm_count, COMM_BITS),
            ("types", type_count, TYPE_BITS),
            ("tests", test_count, TEST_BITS),
        ] {
            if count > 1 << bits {
                return Err(SuiteError::Configuration(format!(
                    "{count} {what} do not fit the {bits}-bit tag field"
                )));
            }
        }
        debug_assert!((1 << (COMM_BITS + TYPE_BITS + TEST_BITS)) - 1 <= TAG_UB);
        Ok(Self { _private: () })
    }

    /// Tag for an explicit identity.
    ///
    /// Ids must come from registries accepted by [`TagGenerator::new`].
    pub fn tag_for_identity(&self, comm: CommId, type_id: TypeId, test: TestId) -> Tag {
        let mask = |bits: u32| (1usize << bits) - 1;
        let packed = ((comm.0 & mask(COMM_BITS)) << (TYPE_BITS + TEST_BITS))
            | ((type_id.0 & mask(TYPE_BITS)) << TEST_BITS)
            | (test.0 & mask(TEST_BITS));
        packed as Tag
    }

    /// Tag for the activation described by `env`.
    pub fn tag_for(&self, env: &Environment) -> Tag {
        self.tag_for_identity(env.comm, env.type_id, env.test)
    }
}
