//! Per-thread communicator duplication followed by broadcasts.
//!
//! Every worker thread duplicates the communicator under test. The dups are
//! collective, so all processes must issue them in the same order; the signal
//! ring serializes them as thread 0, 1, ..., N-1 on every process, which pairs
//! thread k's duplicate across processes. Each thread then broadcasts on its
//! own duplicate once per root, with a payload seeded by the root rank and the
//! thread index so every thread's traffic is distinguishable.
//!
//! On an inter-group communicator the low group broadcasts from each of its
//! ranks first (the root passes `Root`, its peers `ProcNull`), then the high
//! group does the same.

use crate::check::{check_payload, FirstFailure, TransportResultExt};
use crate::comm::{CommClass, InterSide};
use crate::env::Environment;
use crate::error::{SuiteError, SuiteResult};
use crate::suite::{SuiteContext, SuiteTest};
use crate::transport::{BcastRoot, Communicator, Rank};
use crate::types::TypedBuffer;
use crate::verify;

/// Each thread dups the communicator in ring order, then broadcasts on its dup.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadedCommDup;

fn seed(rank: Rank, thread: usize) -> i64 {
    100 * i64::from(rank) + thread as i64
}

/// One broadcast round: seed the buffer with our own value, broadcast, and
/// check the result against the root's value when data was received.
fn bcast_round(
    ctx: &SuiteContext<'_>,
    dup: &dyn Communicator,
    buffer: &mut TypedBuffer,
    root: BcastRoot,
    own: i64,
    expected: Option<i64>,
) -> SuiteResult<SuiteResult<()>> {
    ctx.types.set_standard_pattern(buffer, own)?;
    tracing::trace!(?root, "bcast");
    dup.bcast(buffer.as_bytes_mut(), root).checked("bcast")?;
    Ok(match expected {
        Some(seed) => check_payload(ctx.types, buffer, seed),
        None => Ok(()),
    })
}

impl SuiteTest for ThreadedCommDup {
    fn init(&self, ctx: &SuiteContext<'_>, env: &mut Environment) -> SuiteResult<()> {
        tracing::debug!(
            comm = %env.comm,
            type_id = %env.type_id,
            values_num = env.values_num,
            thread = env.thread.index(),
            "init"
        );
        // Ring first, so cleanup can tear it down even when allocation fails.
        if env.thread.is_designated() {
            env.thread
                .coordination()
                .ring_init(env.thread.index(), env.thread.count())?;
        }
        env.scratch.send_buffer = Some(ctx.types.allocate(env.type_id, env.values_num)?);
        Ok(())
    }

    fn run(&self, ctx: &SuiteContext<'_>, env: &mut Environment) -> SuiteResult<()> {
        let comm = ctx.comm(env)?;
        let class = ctx.comms.classify(env.comm)?;
        let rank = comm.rank().checked("rank")?;
        let local_size = comm.size().checked("size")?;
        let thread = env.thread.index();

        let dup = env.thread.pass_token(|| comm.dup().checked("dup"))?;
        tracing::debug!(rank, thread, "duplicated communicator");
        // Keep the handle in scratch right away so cleanup frees it even if we fail below.
        env.scratch.comms.push(dup);
        let scratch = &mut env.scratch;
        let dup = scratch
            .comms
            .last()
            .ok_or_else(|| SuiteError::Configuration("duplicate vanished".to_string()))?
            .as_ref();
        verify!(
            dup.context_id() != comm.context_id(),
            "dup reused context {}",
            comm.context_id()
        );
        let buffer = scratch
            .send_buffer
            .as_mut()
            .ok_or_else(|| SuiteError::Configuration("run without init".to_string()))?;

        let own = seed(rank, thread);
        let mut failures = FirstFailure::new();
        match class {
            CommClass::Intra => {
                for root in 0..local_size {
                    let expected = Some(seed(root, thread));
                    failures.record(bcast_round(
                        ctx,
                        dup,
                        buffer,
                        BcastRoot::Rank(root),
                        own,
                        expected,
                    )?);
                }
            }
            CommClass::Inter => {
                let remote_size = comm.remote_size().checked("remote_size")?;
                let side = ctx.comms.side(env.comm)?;
                let sending_first = side == InterSide::Low;
                for sending in [sending_first, !sending_first] {
                    if sending {
                        for root in 0..local_size {
                            let arg = if root == rank {
                                BcastRoot::Root
                            } else {
                                BcastRoot::ProcNull
                            };
                            // The root's buffer must come back untouched.
                            let expected = (root == rank).then_some(own);
                            failures.record(bcast_round(ctx, dup, buffer, arg, own, expected)?);
                        }
                    } else {
                        for root in 0..remote_size {
                            let expected = Some(seed(root, thread));
                            failures.record(bcast_round(
                                ctx,
                                dup,
                                buffer,
                                BcastRoot::Rank(root),
                                own,
                                expected,
                            )?);
                        }
                    }
                }
            }
        }
        failures.into_result()
    }

    fn cleanup(&self, ctx: &SuiteContext<'_>, env: &mut Environment) -> SuiteResult<()> {
        if let Some(buffer) = env.scratch.send_buffer.take() {
            ctx.types.free(buffer);
        }
        let mut failures = FirstFailure::new();
        for dup in env.scratch.comms.drain(..) {
            failures.record(dup.free().checked("free"));
        }
        if env.thread.is_designated() {
            failures.record(env.thread.coordination().ring_teardown(env.thread.index()));
        }
        failures.into_result()
    }
}
