//! Threaded communicator duplication and ring ordering.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Barrier, Mutex};

use commsuite::comm::CommClass;
use commsuite::{
    run_rank, ChaosConfiguration, Environment, LocalUniverse, Rank, SuiteBuilder, SuiteContext,
    SuiteReport, SuiteResult, SuiteTest, TestClass, TestDescriptor, TestId, TransportResultExt,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::ERROR)
        .try_init();
}

#[test]
fn test_threaded_dup_over_full_matrix() {
    init_logging();

    let (ranks, threads) = (3, 4);
    let report = SuiteBuilder::new()
        .ranks(ranks)
        .threads(threads)
        .tests(["threaded_comm_dup"])
        .types(["int", "struct_mixed"])
        .values_num([1, 5])
        .chaos(ChaosConfiguration::seeded(11))
        .run()
        .unwrap();

    assert!(report.is_success(), "{report}");
    assert_eq!(report.passed(), 5 * 2 * 2);

    // Four registry handles per rank, plus one dup per thread per rank per activation.
    let handles = report.handles.unwrap();
    assert_eq!(handles.created, 4 * ranks + report.passed() * ranks * threads);
    assert_eq!(handles.live(), 0);
}

#[test]
fn test_single_thread_ring() {
    init_logging();

    let report = SuiteBuilder::new()
        .ranks(2)
        .threads(1)
        .tests(["threaded_comm_dup"])
        .types(["double"])
        .values_num([3])
        .chaos(ChaosConfiguration::disabled())
        .run()
        .unwrap();

    assert!(report.is_success(), "{report}");
    assert_eq!(report.handles.unwrap().live(), 0);
}

#[derive(Debug, Default)]
struct Observed {
    /// Ring entry order per rank.
    order: BTreeMap<Rank, Vec<usize>>,
    /// (rank, thread, context id) of every dup.
    dups: Vec<(Rank, usize, u64)>,
    /// (init_count, teardown_count) seen by each rank's designated thread.
    ring_counts: Vec<(usize, usize)>,
    /// Live handles in the universe, seen by every thread before any frees.
    live_before_free: Vec<usize>,
}

/// Dups in ring order and holds every dup until cleanup.
#[derive(Debug)]
struct HoldDups {
    universe: LocalUniverse,
    /// Sized to every thread of every rank.
    free_gate: Barrier,
    observed: Mutex<Observed>,
}

impl HoldDups {
    fn new(universe: LocalUniverse, threads: usize) -> Self {
        let workers = universe.size() * threads;
        Self {
            universe,
            free_gate: Barrier::new(workers),
            observed: Mutex::new(Observed::default()),
        }
    }
}

impl SuiteTest for HoldDups {
    fn init(&self, _ctx: &SuiteContext<'_>, env: &mut Environment) -> SuiteResult<()> {
        if env.thread.is_designated() {
            env.thread
                .coordination()
                .ring_init(env.thread.index(), env.thread.count())?;
        }
        Ok(())
    }

    fn run(&self, ctx: &SuiteContext<'_>, env: &mut Environment) -> SuiteResult<()> {
        let comm = ctx.comm(env)?;
        let rank = comm.rank().checked("rank")?;
        let thread = env.thread.index();
        let dup = env.thread.pass_token(|| {
            // Release the lock before the dup, which blocks on the other ranks.
            self.observed
                .lock()
                .unwrap()
                .order
                .entry(rank)
                .or_default()
                .push(thread);
            comm.dup().checked("dup")
        })?;
        self.observed
            .lock()
            .unwrap()
            .dups
            .push((rank, thread, dup.context_id()));
        env.scratch.comms.push(dup);
        Ok(())
    }

    fn cleanup(&self, _ctx: &SuiteContext<'_>, env: &mut Environment) -> SuiteResult<()> {
        // Every dup exists once all workers reach the gate; none is freed
        // until all have counted.
        self.free_gate.wait();
        let live = self.universe.handle_stats().live();
        self.observed.lock().unwrap().live_before_free.push(live);
        self.free_gate.wait();
        for dup in env.scratch.comms.drain(..) {
            dup.free().checked("free")?;
        }
        if env.thread.is_designated() {
            let coordination = env.thread.coordination();
            coordination.ring_teardown(env.thread.index())?;
            self.observed
                .lock()
                .unwrap()
                .ring_counts
                .push((coordination.init_count(), coordination.teardown_count()));
        }
        Ok(())
    }
}

#[test]
fn test_dups_are_live_together_and_paired_across_ranks() {
    init_logging();

    let ranks = 3;
    for threads in [1, 2, 4, 8] {
        let universe = LocalUniverse::new(ranks, ChaosConfiguration::seeded(threads as u64));
        let test = Arc::new(HoldDups::new(universe.clone(), threads));
        let plan = SuiteBuilder::new()
            .threads(threads)
            .comms(["world"])
            .types(["int"])
            .values_num([1])
            .test(TestDescriptor {
                id: TestId(7),
                name: "hold_dups",
                class: TestClass::Threaded,
                comm_classes: &[CommClass::Intra],
                threaded: true,
                test: test.clone(),
            })
            .plan()
            .unwrap();
        let results = universe.run(|world| run_rank(world, &plan)).unwrap();
        let report = SuiteReport::aggregate(results);
        assert!(report.is_success(), "threads={threads}\n{report}");
        assert_eq!(universe.handle_stats().live(), 0);

        let observed = test.observed.lock().unwrap();

        // Four registry handles per rank plus every thread's dup, all at once.
        let all_live = 4 * ranks + ranks * threads;
        assert_eq!(observed.live_before_free, vec![all_live; ranks * threads]);

        let in_order: Vec<usize> = (0..threads).collect();
        assert_eq!(observed.order.len(), ranks);
        for (rank, order) in &observed.order {
            assert_eq!(order, &in_order, "rank {rank} threads={threads}");
        }

        // Every dup on a rank is a distinct communicator.
        for rank in 0..ranks as Rank {
            let contexts: HashSet<u64> = observed
                .dups
                .iter()
                .filter(|(r, _, _)| *r == rank)
                .map(|(_, _, ctx)| *ctx)
                .collect();
            assert_eq!(contexts.len(), threads, "rank {rank} threads={threads}");
        }

        // Thread k's dup is the same communicator on every rank.
        for thread in 0..threads {
            let contexts: HashSet<u64> = observed
                .dups
                .iter()
                .filter(|(_, t, _)| *t == thread)
                .map(|(_, _, ctx)| *ctx)
                .collect();
            assert_eq!(contexts.len(), 1, "thread {thread} threads={threads}");
        }

        assert_eq!(observed.ring_counts, vec![(1, 1); ranks]);
    }
}
