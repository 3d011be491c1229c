//! Per-rank execution of the activation matrix.
//!
//! Every rank walks the same matrix in the same order (test, communicator,
//! type, element count) so collective calls line up across ranks. For each
//! activation the driver builds an [`Environment`] per worker thread and runs
//! `init`, `run` and `cleanup`. Threaded activations separate the phases with
//! a barrier, so ring setup precedes every wait and ring teardown follows
//! every use. A world barrier after each activation keeps one activation's
//! traffic from reaching the next.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Condvar, Mutex, PoisonError};
use std::thread::{self, ScopedJoinHandle};

use tracing::instrument;

use crate::check::{take_check_stats, CheckStats, TransportResultExt};
use crate::comm::{CommId, CommRegistry, COMM_COUNT};
use crate::coordination::{Coordination, ThreadContext};
use crate::env::{ActivationId, Environment};
use crate::error::{SuiteError, SuiteResult};
use crate::report::{ActivationOutcome, FailureRecord, Phase, RankReport};
use crate::suite::{SuiteContext, TestDescriptor};
use crate::tag::TagGenerator;
use crate::transport::{Communicator, Rank};
use crate::types::{TypeId, TypeRegistry};

/// The resolved activation matrix. Identical on every rank.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Tests, in execution order.
    pub tests: Vec<TestDescriptor>,
    /// Communicators.
    pub comms: Vec<CommId>,
    /// Element types.
    pub types: Vec<TypeId>,
    /// Element counts.
    pub values_num: Vec<usize>,
    /// Worker threads per process for threaded tests.
    pub num_threads: usize,
}

impl Plan {
    /// Activations in execution order.
    pub fn activations(&self) -> impl Iterator<Item = (&TestDescriptor, ActivationId)> + '_ {
        self.tests.iter().flat_map(move |test| {
            let num_threads = if test.threaded { self.num_threads } else { 1 };
            self.comms.iter().flat_map(move |&comm| {
                self.types.iter().flat_map(move |&type_id| {
                    self.values_num.iter().map(move |&values_num| {
                        let activation = ActivationId {
                            test: test.id,
                            comm,
                            type_id,
                            values_num,
                            num_threads,
                        };
                        (test, activation)
                    })
                })
            })
        })
    }

    fn tag_generator(&self, types: &TypeRegistry) -> SuiteResult<TagGenerator> {
        let test_count = self.tests.iter().map(|t| t.id.0 + 1).max().unwrap_or(0);
        TagGenerator::new(COMM_COUNT, types.len(), test_count)
    }
}

/// Run the whole plan on one rank.
///
/// Collective over `world`: every rank of the group must call it with the
/// same plan. Test failures are recorded in the report; an error is returned
/// only when the rank cannot continue at all.
#[instrument(skip_all, fields(rank = tracing::field::Empty))]
pub fn run_rank(world: Box<dyn Communicator>, plan: &Plan) -> SuiteResult<RankReport> {
    let rank = world.rank().checked("rank")?;
    tracing::Span::current().record("rank", rank);

    let types = TypeRegistry::standard();
    let tags = plan.tag_generator(types)?;
    let comms = CommRegistry::build(world)?;
    let ctx = SuiteContext {
        types,
        comms: &comms,
        tags,
    };

    let mut outcomes = Vec::new();
    let mut checks = CheckStats::default();
    for (test, activation) in plan.activations() {
        let applicable = match comms.classify(activation.comm) {
            Ok(class) => test.supports(class),
            Err(_) => false,
        };
        if !applicable {
            tracing::debug!(%activation, "skipped");
            outcomes.push(ActivationOutcome::skipped(activation));
            continue;
        }

        let (failures, stats) = run_activation(&ctx, test, activation, rank);
        checks.merge(&stats);
        if failures.is_empty() {
            tracing::debug!(%activation, "passed");
        } else {
            tracing::warn!(%activation, failures = failures.len(), "failed");
        }
        outcomes.push(ActivationOutcome::ran(activation, failures));

        comms.world()?.barrier().checked("barrier")?;
    }

    comms.teardown()?;
    checks.merge(&take_check_stats());
    tracing::info!(
        activations = outcomes.len(),
        checks = checks.checks,
        "rank finished"
    );
    Ok(RankReport {
        rank,
        outcomes,
        checks,
    })
}

/// Phase separation shared by the worker threads of one activation.
struct PhaseSync<'a> {
    barrier: Option<&'a Barrier>,
    init_failed: &'a AtomicBool,
}

impl PhaseSync<'_> {
    fn wait(&self) {
        if let Some(barrier) = self.barrier {
            barrier.wait();
        }
    }
}

fn run_activation(
    ctx: &SuiteContext<'_>,
    test: &TestDescriptor,
    activation: ActivationId,
    rank: Rank,
) -> (Vec<FailureRecord>, CheckStats) {
    let threads = activation.num_threads;
    let init_failed = AtomicBool::new(false);

    if !test.threaded {
        let sync = PhaseSync {
            barrier: None,
            init_failed: &init_failed,
        };
        let env = Environment::new(activation, ThreadContext::single());
        return run_lifecycle(ctx, test, env, rank, &sync);
    }

    let coordination = Arc::new(Coordination::new());
    let barrier = Barrier::new(threads);
    let sync = PhaseSync {
        barrier: Some(&barrier),
        init_failed: &init_failed,
    };
    let latch = StartLatch::default();
    let (results, spawn_failure) = thread::scope(|scope| {
        let sync = &sync;
        let jobs = (0..threads)
            .map(|index| {
                let env = Environment::new(
                    activation,
                    ThreadContext::new(index, threads, coordination.clone()),
                );
                Box::new(move || run_lifecycle(ctx, test, env, rank, sync)) as Job<'_, _>
            })
            .collect();
        spawn_gated(jobs, &latch, |index, job| {
            thread::Builder::new()
                .name(format!("rank-{rank}-worker-{index}"))
                .spawn_scoped(scope, job)
        })
    });

    let mut failures = Vec::new();
    let mut checks = CheckStats::default();
    for (thread_failures, stats) in results {
        failures.extend(thread_failures);
        checks.merge(&stats);
    }
    if let Some((index, e)) = spawn_failure {
        let error = SuiteError::Resource(format!(
            "failed to spawn worker {index} on rank {rank}: {e}"
        ));
        tracing::warn!(%activation, %error, "activation not started");
        failures.push(FailureRecord::new(activation, rank, index, Phase::Init, &error));
    }
    (failures, checks)
}

type Job<'scope, T> = Box<dyn FnOnce() -> T + Send + 'scope>;

/// Holds spawned workers until every worker of the activation exists.
#[derive(Debug, Default)]
struct StartLatch {
    go: Mutex<Option<bool>>,
    released: Condvar,
}

impl StartLatch {
    fn release(&self, go: bool) {
        *self.go.lock().unwrap_or_else(PoisonError::into_inner) = Some(go);
        self.released.notify_all();
    }

    /// Block until released. Returns whether the workers may run.
    fn wait(&self) -> bool {
        let mut go = self.go.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(go) = *go {
                return go;
            }
            go = self
                .released
                .wait(go)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Spawn one worker per job, all held at `latch` until the last one exists.
///
/// If a spawn fails, the workers already started return without running
/// their job, since the phase barriers would never fill. The failing index
/// and error are returned next to the results of the jobs that ran.
fn spawn_gated<'scope, T, S>(
    jobs: Vec<Job<'scope, T>>,
    latch: &'scope StartLatch,
    mut spawn: S,
) -> (Vec<T>, Option<(usize, io::Error)>)
where
    T: Send + 'scope,
    S: FnMut(usize, Job<'scope, Option<T>>) -> io::Result<ScopedJoinHandle<'scope, Option<T>>>,
{
    let mut handles = Vec::with_capacity(jobs.len());
    let mut failed = None;
    for (index, job) in jobs.into_iter().enumerate() {
        let gated: Job<'scope, Option<T>> = Box::new(move || latch.wait().then(job));
        match spawn(index, gated) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                failed = Some((index, e));
                break;
            }
        }
    }
    latch.release(failed.is_none());

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.join() {
            Ok(Some(result)) => results.push(result),
            Ok(None) => {}
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
    (results, failed)
}

fn run_lifecycle(
    ctx: &SuiteContext<'_>,
    test: &TestDescriptor,
    mut env: Environment,
    rank: Rank,
    sync: &PhaseSync<'_>,
) -> (Vec<FailureRecord>, CheckStats) {
    let activation = env.activation();
    let thread = env.thread.index();
    let mut failures = Vec::new();
    let mut record = |phase: Phase, error: SuiteError| {
        tracing::debug!(%activation, thread, %phase, %error, "phase failed");
        failures.push(FailureRecord::new(activation, rank, thread, phase, &error));
    };

    if let Err(error) = test.test.init(ctx, &mut env) {
        sync.init_failed.store(true, Ordering::SeqCst);
        record(Phase::Init, error);
    }
    sync.wait();

    if sync.init_failed.load(Ordering::SeqCst) {
        tracing::debug!(%activation, thread, "init failed, skipping run");
    } else if let Err(error) = test.test.run(ctx, &mut env) {
        record(Phase::Run, error);
    }
    sync.wait();

    if let Err(error) = test.test.cleanup(ctx, &mut env) {
        record(Phase::Cleanup, error);
    }
    (failures, take_check_stats())
}
