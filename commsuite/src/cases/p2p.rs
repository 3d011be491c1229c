//! Many-to-one collection with wildcard probe.
//!
//! Every rank except 0 sends its buffer to rank 0 with the activation tag.
//! Rank 0 probes with any source and any tag, checks the status, then
//! receives exactly the probed message and verifies its payload against the
//! sender's seed. Arrival order across senders is arbitrary. A failed receive
//! does not stop the collection: rank 0 still takes one message per sender
//! and reports the first failure afterwards.
//!
//! On an inter-group communicator rank 0 of each group collects from the
//! ranks of the remote group.

use std::collections::BTreeSet;

use crate::check::{
    check, check_eq, check_in_range, check_payload, FirstFailure, TransportResultExt,
};
use crate::env::Environment;
use crate::error::{ErrorKind, SuiteError, SuiteResult};
use crate::suite::{SuiteContext, SuiteTest};
use crate::transport::{Communicator, Rank, Source, Tag, TagSelector};
use crate::types::TypedBuffer;

/// Rank 0 receives from every peer via `probe(Any, Any)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManyToOneProbeAnySource;

impl SuiteTest for ManyToOneProbeAnySource {
    fn init(&self, ctx: &SuiteContext<'_>, env: &mut Environment) -> SuiteResult<()> {
        let comm = ctx.comm(env)?;
        let rank = comm.rank().checked("rank")?;
        tracing::debug!(
            rank,
            comm = %env.comm,
            type_id = %env.type_id,
            values_num = env.values_num,
            "init"
        );

        let mut buffer = ctx.types.allocate(env.type_id, env.values_num)?;
        ctx.types.set_standard_pattern(&mut buffer, i64::from(rank))?;
        env.scratch.send_buffer = Some(buffer);
        Ok(())
    }

    fn run(&self, ctx: &SuiteContext<'_>, env: &mut Environment) -> SuiteResult<()> {
        let comm = ctx.comm(env)?;
        let size = ctx.comms.size(env.comm)?;
        let rank = comm.rank().checked("rank")?;
        let tag = ctx.tag(env);
        tracing::debug!(
            rank,
            comm = %env.comm,
            type_id = %env.type_id,
            test = %env.test,
            tag,
            size,
            "run"
        );

        let buffer = env
            .scratch
            .send_buffer
            .as_mut()
            .ok_or_else(|| SuiteError::Configuration("run without init".to_string()))?;

        if rank != 0 {
            return comm.send(buffer.as_bytes(), 0, tag).checked("send");
        }

        let mut seen = BTreeSet::new();
        let mut failures = FirstFailure::new();
        // Keep collecting after a failure so no sender's message outlives the activation.
        for _ in 1..size {
            failures.record(collect_one(ctx, comm, buffer, size, tag, &mut seen));
        }
        failures.into_result()
    }

    fn cleanup(&self, ctx: &SuiteContext<'_>, env: &mut Environment) -> SuiteResult<()> {
        if let Some(buffer) = env.scratch.send_buffer.take() {
            ctx.types.free(buffer);
        }
        Ok(())
    }
}

/// Probe for any message, receive exactly that message and verify it.
fn collect_one(
    ctx: &SuiteContext<'_>,
    comm: &dyn Communicator,
    buffer: &mut TypedBuffer,
    size: Rank,
    tag: Tag,
    seen: &mut BTreeSet<Rank>,
) -> SuiteResult<()> {
    let probed = comm.probe(Source::Any, TagSelector::Any).checked("probe")?;
    tracing::debug!(source = probed.source, tag = probed.tag, "probed");

    let mut failures = FirstFailure::new();
    let in_range = check_in_range("probe", "source", 1..size, probed.source);
    // A source outside the group cannot be named, so take the message by tag alone.
    let source = match in_range {
        Ok(()) => Source::Rank(probed.source),
        Err(_) => Source::Any,
    };
    failures.record(in_range);

    let received = comm
        .recv(buffer.as_bytes_mut(), source, TagSelector::Tag(probed.tag))
        .checked("recv");
    let received = match received {
        Ok(received) => received,
        Err(error) => {
            failures.record(Err(error));
            return failures.into_result();
        }
    };

    failures.record(check_eq("probe", "tag", tag, probed.tag));
    failures.record(check(
        seen.insert(probed.source),
        ErrorKind::Verification,
        format!("source {} delivered more than one message", probed.source),
    ));
    failures.record(check_eq("recv", "source", probed.source, received.source));
    failures.record(check_eq("recv", "tag", probed.tag, received.tag));
    failures.record(check_eq("recv", "count", buffer.as_bytes().len(), received.count));
    failures.record(check_payload(ctx.types, buffer, i64::from(probed.source)));
    failures.into_result()
}
