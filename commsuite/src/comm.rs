//! Registry of the communicators tests run on.
//!
//! The registry is built collectively once per process from the world
//! communicator and is immutable afterwards. Queries go straight to the
//! transport; nothing is cached besides the handles themselves.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::check::TransportResultExt;
use crate::error::{SuiteError, SuiteResult};
use crate::transport::{Communicator, Rank, Tag, TAG_UB};

/// Stable identifier of a registered communicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommId(pub usize);

impl fmt::Display for CommId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Intra-group or inter-group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommClass {
    /// Single group.
    Intra,
    /// Two disjoint groups.
    Inter,
}

/// Which half of the world a process sits in, for inter-group communicators.
///
/// Tests use it to agree on which group acts first in rooted operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterSide {
    /// World ranks `0..size/2`.
    Low,
    /// World ranks `size/2..size`.
    High,
}

/// Names and classes of the registered communicators, in id order.
pub const COMM_TABLE: &[(&str, CommClass)] = &[
    ("world", CommClass::Intra),
    ("world_dup", CommClass::Intra),
    ("world_reversed", CommClass::Intra),
    ("halves", CommClass::Intra),
    ("intercomm_halves", CommClass::Inter),
];

/// Number of communicator ids.
pub const COMM_COUNT: usize = COMM_TABLE.len();

const WORLD: CommId = CommId(0);
const INTERCOMM_TAG: Tag = TAG_UB;

/// Id of a communicator by name, independent of any built registry.
pub fn comm_id(name: &str) -> SuiteResult<CommId> {
    COMM_TABLE
        .iter()
        .position(|(n, _)| *n == name)
        .map(CommId)
        .ok_or_else(|| SuiteError::Configuration(format!("unknown communicator '{name}'")))
}

/// Static class of a communicator id.
pub fn comm_class(id: CommId) -> SuiteResult<CommClass> {
    COMM_TABLE
        .get(id.0)
        .map(|(_, class)| *class)
        .ok_or_else(|| SuiteError::Configuration(format!("unknown communicator id {id}")))
}

/// A registered communicator on this process.
#[derive(Debug)]
pub struct CommDescriptor {
    /// Stable id.
    pub id: CommId,
    /// Name used in configuration and reports.
    pub name: &'static str,
    /// Intra or inter.
    pub class: CommClass,
    side: Option<InterSide>,
    handle: Box<dyn Communicator>,
}

/// Handles derived from the world communicator while the registry is built.
#[derive(Default)]
struct Derived {
    world_dup: Option<Box<dyn Communicator>>,
    reversed: Option<Box<dyn Communicator>>,
    halves: Option<Box<dyn Communicator>>,
    intercomm: Option<Box<dyn Communicator>>,
}

impl Derived {
    fn create(
        &mut self,
        world: &dyn Communicator,
        rank: Rank,
        size: Rank,
        side: InterSide,
    ) -> SuiteResult<()> {
        let half = size / 2;
        self.world_dup = Some(world.dup().checked("dup")?);
        self.reversed = world.split(Some(0), size - 1 - rank).checked("split")?;
        self.halves = world
            .split(Some(i32::from(rank < half)), rank)
            .checked("split")?;

        if let Some(halves) = self.halves.as_deref().filter(|_| size >= 2) {
            let remote_leader: Rank = match side {
                InterSide::Low => half,
                InterSide::High => 0,
            };
            self.intercomm = Some(
                halves
                    .create_intercomm(0, world, remote_leader, INTERCOMM_TAG)
                    .checked("create_intercomm")?,
            );
        }
        Ok(())
    }

    /// Release whatever was created before a failure.
    fn free_all(self) {
        let handles = [self.world_dup, self.reversed, self.halves, self.intercomm];
        for handle in handles.into_iter().flatten() {
            if let Err(e) = handle.free() {
                tracing::warn!(error = %e, "failed to free communicator after failed build");
            }
        }
    }
}

/// Per-process table of communicators, indexed by [`CommId`].
#[derive(Debug)]
pub struct CommRegistry {
    entries: Vec<Option<CommDescriptor>>,
}

impl CommRegistry {
    /// Build every communicator in [`COMM_TABLE`] from `world`.
    ///
    /// Collective over `world`: every process must call it at the same point.
    /// Communicators that cannot exist for this world size are left out.
    pub fn build(world: Box<dyn Communicator>) -> SuiteResult<Self> {
        let rank = world.rank().checked("rank")?;
        let size = world.size().checked("size")?;
        let side = if rank < size / 2 {
            InterSide::Low
        } else {
            InterSide::High
        };

        let mut derived = Derived::default();
        if let Err(error) = derived.create(world.as_ref(), rank, size, side) {
            derived.free_all();
            return Err(error);
        }

        let handles = [
            Some((world, None)),
            derived.world_dup.map(|h| (h, None)),
            derived.reversed.map(|h| (h, None)),
            derived.halves.map(|h| (h, None)),
            derived.intercomm.map(|h| (h, Some(side))),
        ];
        let entries = handles
            .into_iter()
            .enumerate()
            .map(|(idx, entry)| {
                entry.map(|(handle, side)| {
                    let (name, class) = COMM_TABLE[idx];
                    CommDescriptor {
                        id: CommId(idx),
                        name,
                        class,
                        side,
                        handle,
                    }
                })
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            rank,
            size,
            available = entries.iter().flatten().count(),
            "communicator registry built"
        );
        Ok(Self { entries })
    }

    /// Ids available on this process, in id order.
    pub fn ids(&self) -> impl Iterator<Item = CommId> + '_ {
        self.entries.iter().flatten().map(|d| d.id)
    }

    /// Whether `id` is available on this process.
    pub fn contains(&self, id: CommId) -> bool {
        matches!(self.entries.get(id.0), Some(Some(_)))
    }

    /// Descriptor of `id`.
    pub fn descriptor(&self, id: CommId) -> SuiteResult<&CommDescriptor> {
        match self.entries.get(id.0) {
            Some(Some(descriptor)) => Ok(descriptor),
            Some(None) => Err(SuiteError::Configuration(format!(
                "communicator {} not available on this process",
                COMM_TABLE[id.0].0
            ))),
            None => Err(SuiteError::Configuration(format!(
                "unknown communicator id {id}"
            ))),
        }
    }

    /// The transport handle for `id`.
    pub fn resolve(&self, id: CommId) -> SuiteResult<&dyn Communicator> {
        Ok(self.descriptor(id)?.handle.as_ref())
    }

    /// The world communicator.
    pub fn world(&self) -> SuiteResult<&dyn Communicator> {
        self.resolve(WORLD)
    }

    /// Intra or inter.
    pub fn classify(&self, id: CommId) -> SuiteResult<CommClass> {
        Ok(self.descriptor(id)?.class)
    }

    /// Peer count: local size for intra, remote size for inter.
    pub fn size(&self, id: CommId) -> SuiteResult<Rank> {
        let descriptor = self.descriptor(id)?;
        match descriptor.class {
            CommClass::Intra => descriptor.handle.size().checked("size"),
            CommClass::Inter => descriptor.handle.remote_size().checked("remote_size"),
        }
    }

    /// Rank of this process in the local group of `id`.
    pub fn rank(&self, id: CommId) -> SuiteResult<Rank> {
        self.descriptor(id)?.handle.rank().checked("rank")
    }

    /// Group this process belongs to on an inter-group communicator.
    pub fn side(&self, id: CommId) -> SuiteResult<InterSide> {
        let descriptor = self.descriptor(id)?;
        descriptor.side.ok_or_else(|| {
            SuiteError::Configuration(format!(
                "{} is not an inter-group communicator",
                descriptor.name
            ))
        })
    }

    /// Free every derived communicator exactly once. The world handle is dropped.
    ///
    /// All handles are released even if one fails; the first error is returned.
    pub fn teardown(self) -> SuiteResult<()> {
        let mut first_error = None;
        for descriptor in self.entries.into_iter().flatten() {
            if descriptor.id == WORLD {
                continue;
            }
            if let Err(e) = descriptor.handle.free().checked("free") {
                tracing::warn!(comm = descriptor.name, error = %e, "failed to free communicator");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::local::{ChaosConfiguration, LocalUniverse};
    use crate::transport::{BcastRoot, Source, Status, TagSelector, TransportError, TransportResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_static_lookup() {
        assert_eq!(comm_id("world").unwrap(), CommId(0));
        assert_eq!(comm_id("intercomm_halves").unwrap(), CommId(4));
        assert!(comm_id("nope").is_err());
        assert_eq!(comm_class(CommId(4)).unwrap(), CommClass::Inter);
        assert!(comm_class(CommId(COMM_COUNT)).is_err());
    }

    #[test]
    fn test_registry_on_four_ranks() {
        let universe = LocalUniverse::new(4, ChaosConfiguration::disabled());
        let results = universe
            .run(|world| {
                let world_rank = world.rank().unwrap();
                let registry = CommRegistry::build(world).unwrap();
                assert_eq!(registry.ids().count(), COMM_COUNT);
                assert_eq!(registry.size(CommId(0)).unwrap(), 4);
                assert_eq!(registry.size(CommId(1)).unwrap(), 4);
                assert_eq!(registry.rank(CommId(2)).unwrap(), 3 - world_rank);
                assert_eq!(registry.size(CommId(3)).unwrap(), 2);
                assert_eq!(registry.rank(CommId(3)).unwrap(), world_rank % 2);
                assert_eq!(registry.classify(CommId(4)).unwrap(), CommClass::Inter);
                assert_eq!(registry.size(CommId(4)).unwrap(), 2);
                let side = registry.side(CommId(4)).unwrap();
                assert_eq!(side == InterSide::Low, world_rank < 2);
                assert!(registry.side(CommId(0)).is_err());
                registry.teardown().unwrap();
            })
            .unwrap();
        assert_eq!(results.len(), 4);
        let handles = universe.handle_stats();
        assert_eq!(handles.live(), 0);
        assert_eq!(handles.created, 4 * 4);
    }

    /// World handle whose second split fails locally.
    #[derive(Debug)]
    struct FailingSecondSplit {
        inner: Box<dyn Communicator>,
        splits: AtomicUsize,
    }

    impl Communicator for FailingSecondSplit {
        fn rank(&self) -> TransportResult<Rank> {
            self.inner.rank()
        }
        fn size(&self) -> TransportResult<Rank> {
            self.inner.size()
        }
        fn remote_size(&self) -> TransportResult<Rank> {
            self.inner.remote_size()
        }
        fn is_inter(&self) -> bool {
            self.inner.is_inter()
        }
        fn context_id(&self) -> u64 {
            self.inner.context_id()
        }
        fn send(&self, data: &[u8], dest: Rank, tag: Tag) -> TransportResult<()> {
            self.inner.send(data, dest, tag)
        }
        fn probe(&self, source: Source, tag: TagSelector) -> TransportResult<Status> {
            self.inner.probe(source, tag)
        }
        fn recv(
            &self,
            data: &mut [u8],
            source: Source,
            tag: TagSelector,
        ) -> TransportResult<Status> {
            self.inner.recv(data, source, tag)
        }
        fn bcast(&self, data: &mut [u8], root: BcastRoot) -> TransportResult<()> {
            self.inner.bcast(data, root)
        }
        fn barrier(&self) -> TransportResult<()> {
            self.inner.barrier()
        }
        fn dup(&self) -> TransportResult<Box<dyn Communicator>> {
            self.inner.dup()
        }
        fn split(
            &self,
            color: Option<i32>,
            key: i32,
        ) -> TransportResult<Option<Box<dyn Communicator>>> {
            if self.splits.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err(TransportError::Other("split refused".to_string()));
            }
            self.inner.split(color, key)
        }
        fn create_intercomm(
            &self,
            local_leader: Rank,
            bridge: &dyn Communicator,
            remote_leader: Rank,
            tag: Tag,
        ) -> TransportResult<Box<dyn Communicator>> {
            self.inner.create_intercomm(local_leader, bridge, remote_leader, tag)
        }
        fn free(self: Box<Self>) -> TransportResult<()> {
            self.inner.free()
        }
    }

    #[test]
    fn test_failed_build_frees_created_handles() {
        let universe = LocalUniverse::new(3, ChaosConfiguration::disabled());
        universe
            .run(|world| {
                let world = Box::new(FailingSecondSplit {
                    inner: world,
                    splits: AtomicUsize::new(0),
                });
                let error = CommRegistry::build(world).unwrap_err();
                assert_eq!(error.kind(), ErrorKind::Transport);
            })
            .unwrap();
        let handles = universe.handle_stats();
        // world_dup and world_reversed on every rank.
        assert_eq!(handles.created, 2 * 3);
        assert_eq!(handles.live(), 0);
    }

    #[test]
    fn test_single_rank_has_no_intercomm() {
        let universe = LocalUniverse::new(1, ChaosConfiguration::disabled());
        universe
            .run(|world| {
                let registry = CommRegistry::build(world).unwrap();
                assert!(!registry.contains(CommId(4)));
                assert!(registry.resolve(CommId(4)).is_err());
                assert!(registry.resolve(CommId(9)).is_err());
                assert_eq!(registry.ids().count(), 4);
                registry.teardown().unwrap();
            })
            .unwrap();
        assert_eq!(universe.handle_stats().live(), 0);
    }
}
