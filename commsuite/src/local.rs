//! In-process transport with one OS thread per rank.
//!
//! [`LocalUniverse`] implements [`Communicator`] over shared memory so the
//! suite can run without an external message-passing library. Point-to-point
//! sends and broadcasts are eager: the payload is copied into the
//! destination's mailbox and the sender returns. Barrier and the
//! communicator-management calls meet at a rendezvous keyed by the context
//! and a per-process call sequence number, which matches the k-th collective
//! of every member with each other.
//!
//! Fault injection follows the buggify style: a seeded [`ChaCha8Rng`] per
//! process decides whether a delivery is delayed (shuffling arrival order
//! across senders) or has one payload bit flipped.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::transport::{
    BcastRoot, Communicator, Rank, Source, Status, Tag, TagSelector, TransportError,
    TransportResult, TAG_UB,
};

/// Fault injection settings for the local transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChaosConfiguration {
    /// Seed for the per-process random generators.
    pub seed: u64,
    /// Probability (0.0 - 1.0) that a delivery is held back before it is queued.
    pub delivery_delay_probability: f64,
    /// Upper bound of a delivery delay, in microseconds.
    pub delivery_delay_max_micros: u64,
    /// Probability (0.0 - 1.0) that one bit of a delivered payload is flipped.
    pub bit_flip_probability: f64,
}

impl Default for ChaosConfiguration {
    fn default() -> Self {
        Self {
            seed: 0,
            delivery_delay_probability: 0.25,
            delivery_delay_max_micros: 2_000,
            bit_flip_probability: 0.0,
        }
    }
}

impl ChaosConfiguration {
    /// No delays and no corruption.
    pub fn disabled() -> Self {
        Self {
            delivery_delay_probability: 0.0,
            bit_flip_probability: 0.0,
            ..Self::default()
        }
    }

    /// Default delays, seeded with `seed`.
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }
}

/// Counts of communicator handles created by dup, split and intercomm
/// creation, and of handles freed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HandleStats {
    /// Handles handed out.
    pub created: usize,
    /// Handles released with `free`.
    pub freed: usize,
}

impl HandleStats {
    /// Handles not yet freed.
    pub fn live(&self) -> usize {
        self.created.saturating_sub(self.freed)
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficStats {
    /// Payloads queued, point-to-point and broadcast.
    pub messages: usize,
    /// Payload bytes queued.
    pub bytes: usize,
    /// Deliveries that were held back.
    pub delayed: usize,
    /// Deliveries with a flipped bit.
    pub bit_flips: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Channel {
    PointToPoint,
    Collective,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MailboxKey {
    context: u64,
    channel: Channel,
    dest: usize,
}

#[derive(Debug)]
struct Envelope {
    source: Rank,
    tag: Tag,
    payload: Vec<u8>,
}

impl Envelope {
    fn matches(&self, source: Source, tag: TagSelector) -> bool {
        let source_ok = match source {
            Source::Any => true,
            Source::Rank(r) => r == self.source,
        };
        let tag_ok = match tag {
            TagSelector::Any => true,
            TagSelector::Tag(t) => t == self.tag,
        };
        source_ok && tag_ok
    }

    fn status(&self) -> Status {
        Status {
            source: self.source,
            tag: self.tag,
            count: self.payload.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RendezvousKey {
    Collective { context: u64, sequence: u64 },
    Intercomm { bridge: u64, tag: Tag },
}

#[derive(Debug, Clone, Copy)]
enum Expected {
    Members(usize),
    TwoGroups,
}

#[derive(Debug)]
enum Contribution {
    Barrier,
    Dup,
    Split {
        color: Option<i32>,
        key: i32,
        rank: Rank,
    },
    Intercomm {
        group_context: u64,
        group: Arc<[usize]>,
    },
}

#[derive(Debug)]
struct Arrival {
    process: usize,
    contribution: Contribution,
}

#[derive(Debug)]
struct Pending {
    expected: Expected,
    arrivals: Vec<Arrival>,
}

#[derive(Debug)]
struct Placement {
    context: u64,
    rank: Rank,
    group: Arc<[usize]>,
}

#[derive(Debug)]
enum Outcome {
    Released,
    Context(u64),
    Split(Option<Placement>),
    Intercomm { context: u64, remote_group: Arc<[usize]> },
    Mismatch,
}

#[derive(Debug, Default)]
struct UniverseState {
    next_context: u64,
    mailboxes: HashMap<MailboxKey, VecDeque<Envelope>>,
    sequences: HashMap<(u64, usize), u64>,
    pending: HashMap<RendezvousKey, Pending>,
    outcomes: HashMap<(RendezvousKey, usize), Outcome>,
    handles: HandleStats,
    traffic: TrafficStats,
    aborted: bool,
}

impl UniverseState {
    fn allocate_context(&mut self) -> u64 {
        self.next_context += 1;
        self.next_context
    }
}

#[derive(Debug)]
struct Universe {
    size: usize,
    chaos: ChaosConfiguration,
    rngs: Vec<Mutex<ChaCha8Rng>>,
    state: Mutex<UniverseState>,
    changed: Condvar,
}

impl Universe {
    fn lock(&self) -> MutexGuard<'_, UniverseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, UniverseState>) -> MutexGuard<'a, UniverseState> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn abort(&self) {
        self.lock().aborted = true;
        self.changed.notify_all();
    }

    /// Roll the dice for one delivery from `process`. Returns (delay, flipped bit).
    fn roll(&self, process: usize, payload_len: usize) -> (Option<Duration>, Option<usize>) {
        let Some(rng) = self.rngs.get(process) else {
            return (None, None);
        };
        let mut rng = rng.lock().unwrap_or_else(PoisonError::into_inner);
        let delay_p = self.chaos.delivery_delay_probability.clamp(0.0, 1.0);
        let flip_p = self.chaos.bit_flip_probability.clamp(0.0, 1.0);
        let delay = (delay_p > 0.0 && rng.random_bool(delay_p)).then(|| {
            Duration::from_micros(rng.random_range(0..=self.chaos.delivery_delay_max_micros))
        });
        let flip = (payload_len > 0 && flip_p > 0.0 && rng.random_bool(flip_p))
            .then(|| rng.random_range(0..payload_len * 8));
        (delay, flip)
    }

    fn deliver(&self, from: usize, key: MailboxKey, mut envelope: Envelope) {
        let (delay, flip) = self.roll(from, envelope.payload.len());
        if let Some(bit) = flip {
            envelope.payload[bit / 8] ^= 1u8 << (bit % 8);
            tracing::trace!(from, bit, "flipped payload bit");
        }
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let mut state = self.lock();
        state.traffic.messages += 1;
        state.traffic.bytes += envelope.payload.len();
        state.traffic.delayed += usize::from(delay.is_some());
        state.traffic.bit_flips += usize::from(flip.is_some());
        state.mailboxes.entry(key).or_default().push_back(envelope);
        self.changed.notify_all();
    }

    /// Block until `take` extracts something from the mailbox at `key`.
    fn next_matching<T>(
        &self,
        key: MailboxKey,
        mut take: impl FnMut(&mut VecDeque<Envelope>) -> Option<T>,
    ) -> TransportResult<T> {
        let mut state = self.lock();
        loop {
            if let Some(found) = state.mailboxes.get_mut(&key).and_then(&mut take) {
                return Ok(found);
            }
            if state.aborted {
                return Err(aborted());
            }
            state = self.wait(state);
        }
    }

    fn next_sequence(&self, context: u64, process: usize) -> u64 {
        let mut state = self.lock();
        let sequence = state.sequences.entry((context, process)).or_insert(0);
        *sequence += 1;
        *sequence
    }

    fn rendezvous(
        &self,
        key: RendezvousKey,
        expected: Expected,
        arrival: Arrival,
    ) -> TransportResult<Outcome> {
        let process = arrival.process;
        let mut state = self.lock();
        let pending = state.pending.entry(key.clone()).or_insert_with(|| Pending {
            expected,
            arrivals: Vec::new(),
        });
        pending.arrivals.push(arrival);
        if is_complete(pending.expected, &pending.arrivals) {
            if let Some(done) = state.pending.remove(&key) {
                for (member, outcome) in resolve(&mut state, &done.arrivals) {
                    state.outcomes.insert((key.clone(), member), outcome);
                }
                self.changed.notify_all();
            }
        }

        let slot = (key, process);
        loop {
            if let Some(outcome) = state.outcomes.remove(&slot) {
                return Ok(outcome);
            }
            if state.aborted {
                return Err(aborted());
            }
            state = self.wait(state);
        }
    }
}

fn aborted() -> TransportError {
    TransportError::Other("universe aborted: a rank panicked".to_string())
}

fn is_complete(expected: Expected, arrivals: &[Arrival]) -> bool {
    match expected {
        Expected::Members(n) => arrivals.len() >= n,
        Expected::TwoGroups => {
            let mut groups: HashMap<u64, (usize, usize)> = HashMap::new();
            for arrival in arrivals {
                if let Contribution::Intercomm {
                    group_context,
                    group,
                } = &arrival.contribution
                {
                    groups.entry(*group_context).or_insert((0, group.len())).0 += 1;
                }
            }
            groups.len() == 2
                && groups
                    .values()
                    .all(|(arrived, size)| arrived == size)
        }
    }
}

fn resolve(state: &mut UniverseState, arrivals: &[Arrival]) -> Vec<(usize, Outcome)> {
    let Some(first) = arrivals.first() else {
        return Vec::new();
    };
    let kind = std::mem::discriminant(&first.contribution);
    if arrivals
        .iter()
        .any(|a| std::mem::discriminant(&a.contribution) != kind)
    {
        return arrivals
            .iter()
            .map(|a| (a.process, Outcome::Mismatch))
            .collect();
    }

    match first.contribution {
        Contribution::Barrier => arrivals
            .iter()
            .map(|a| (a.process, Outcome::Released))
            .collect(),
        Contribution::Dup => {
            let context = state.allocate_context();
            state.handles.created += arrivals.len();
            arrivals
                .iter()
                .map(|a| (a.process, Outcome::Context(context)))
                .collect()
        }
        Contribution::Split { .. } => {
            let mut outcomes = Vec::with_capacity(arrivals.len());
            let mut colors: BTreeMap<i32, Vec<(i32, Rank, usize)>> = BTreeMap::new();
            for arrival in arrivals {
                if let Contribution::Split { color, key, rank } = arrival.contribution {
                    match color {
                        Some(color) => colors
                            .entry(color)
                            .or_default()
                            .push((key, rank, arrival.process)),
                        None => outcomes.push((arrival.process, Outcome::Split(None))),
                    }
                }
            }
            for members in colors.values_mut() {
                members.sort_unstable();
                let context = state.allocate_context();
                let group: Arc<[usize]> = members.iter().map(|(_, _, p)| *p).collect();
                state.handles.created += members.len();
                for (new_rank, (_, _, process)) in members.iter().enumerate() {
                    let placement = Placement {
                        context,
                        rank: new_rank as Rank,
                        group: group.clone(),
                    };
                    outcomes.push((*process, Outcome::Split(Some(placement))));
                }
            }
            outcomes
        }
        Contribution::Intercomm { .. } => {
            let context = state.allocate_context();
            state.handles.created += arrivals.len();
            let groups: Vec<(u64, Arc<[usize]>)> = arrivals
                .iter()
                .filter_map(|a| match &a.contribution {
                    Contribution::Intercomm {
                        group_context,
                        group,
                    } => Some((*group_context, group.clone())),
                    _ => None,
                })
                .collect();
            arrivals
                .iter()
                .zip(&groups)
                .map(|(arrival, (own, _))| {
                    let remote = groups
                        .iter()
                        .find(|(ctx, _)| ctx != own)
                        .map(|(_, group)| group.clone());
                    let outcome = match remote {
                        Some(remote_group) => Outcome::Intercomm {
                            context,
                            remote_group,
                        },
                        None => Outcome::Mismatch,
                    };
                    (arrival.process, outcome)
                })
                .collect()
        }
    }
}

/// A set of ranks sharing one in-process transport.
#[derive(Debug, Clone)]
pub struct LocalUniverse {
    universe: Arc<Universe>,
}

impl LocalUniverse {
    /// Create a universe of `size` ranks.
    pub fn new(size: usize, chaos: ChaosConfiguration) -> Self {
        let rngs = (0..size)
            .map(|p| Mutex::new(ChaCha8Rng::seed_from_u64(chaos.seed.wrapping_add(p as u64))))
            .collect();
        Self {
            universe: Arc::new(Universe {
                size,
                chaos,
                rngs,
                state: Mutex::new(UniverseState::default()),
                changed: Condvar::new(),
            }),
        }
    }

    /// Number of ranks.
    pub fn size(&self) -> usize {
        self.universe.size
    }

    /// World communicator handle for `rank`.
    pub fn world(&self, rank: Rank) -> TransportResult<Box<dyn Communicator>> {
        let size = self.universe.size;
        let process = usize::try_from(rank)
            .ok()
            .filter(|p| *p < size)
            .ok_or(TransportError::InvalidRank {
                rank,
                size: size as Rank,
            })?;
        Ok(Box::new(LocalComm {
            universe: self.universe.clone(),
            process,
            context: 0,
            rank,
            local_group: (0..size).collect(),
            remote_group: None,
            tracked: false,
        }))
    }

    /// Handles created and freed so far.
    pub fn handle_stats(&self) -> HandleStats {
        self.universe.lock().handles
    }

    /// Delivery counters so far.
    pub fn traffic_stats(&self) -> TrafficStats {
        self.universe.lock().traffic
    }

    /// Messages still queued and never received, across all mailboxes.
    pub fn undelivered(&self) -> usize {
        self.universe.lock().mailboxes.values().map(VecDeque::len).sum()
    }

    /// Run `body` once per rank, each on its own named thread, and collect
    /// the results in rank order.
    ///
    /// If a rank panics, blocked calls on the other ranks fail instead of
    /// waiting forever and the panic is reported as an error.
    pub fn run<R, F>(&self, body: F) -> TransportResult<Vec<R>>
    where
        R: Send,
        F: Fn(Box<dyn Communicator>) -> R + Sync,
    {
        let body = &body;
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.size());
            for rank in 0..self.size() {
                let world = self.world(rank as Rank)?;
                let universe = &*self.universe;
                let handle = thread::Builder::new()
                    .name(format!("rank-{rank}"))
                    .spawn_scoped(scope, move || {
                        let _guard = AbortOnPanic(universe);
                        body(world)
                    })
                    .map_err(|e| {
                        TransportError::Other(format!("failed to spawn rank {rank}: {e}"))
                    });
                match handle {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        self.universe.abort();
                        return Err(e);
                    }
                }
            }
            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle
                        .join()
                        .map_err(|_| TransportError::Other(format!("rank {rank} panicked")))
                })
                .collect()
        })
    }
}

struct AbortOnPanic<'a>(&'a Universe);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort();
        }
    }
}

/// Communicator handle of the local transport.
#[derive(Debug)]
pub struct LocalComm {
    universe: Arc<Universe>,
    process: usize,
    context: u64,
    rank: Rank,
    local_group: Arc<[usize]>,
    remote_group: Option<Arc<[usize]>>,
    tracked: bool,
}

impl LocalComm {
    fn derive(
        &self,
        context: u64,
        rank: Rank,
        local_group: Arc<[usize]>,
        remote_group: Option<Arc<[usize]>>,
    ) -> Box<dyn Communicator> {
        Box::new(LocalComm {
            universe: self.universe.clone(),
            process: self.process,
            context,
            rank,
            local_group,
            remote_group,
            tracked: true,
        })
    }

    /// Group addressed by point-to-point calls.
    fn peers(&self) -> &[usize] {
        self.remote_group.as_deref().unwrap_or(&*self.local_group)
    }

    fn peer(&self, rank: Rank) -> TransportResult<usize> {
        let peers = self.peers();
        usize::try_from(rank)
            .ok()
            .and_then(|r| peers.get(r).copied())
            .ok_or(TransportError::InvalidRank {
                rank,
                size: peers.len() as Rank,
            })
    }

    fn check_selectors(&self, source: Source, tag: TagSelector) -> TransportResult<()> {
        if let Source::Rank(rank) = source {
            self.peer(rank)?;
        }
        if let TagSelector::Tag(tag) = tag {
            check_tag(tag)?;
        }
        Ok(())
    }

    fn member_count(&self) -> usize {
        self.local_group.len() + self.remote_group.as_ref().map_or(0, |g| g.len())
    }

    fn mailbox(&self, channel: Channel, dest: usize) -> MailboxKey {
        MailboxKey {
            context: self.context,
            channel,
            dest,
        }
    }

    fn collective(&self, contribution: Contribution) -> TransportResult<Outcome> {
        let sequence = self.universe.next_sequence(self.context, self.process);
        let key = RendezvousKey::Collective {
            context: self.context,
            sequence,
        };
        let arrival = Arrival {
            process: self.process,
            contribution,
        };
        self.universe
            .rendezvous(key, Expected::Members(self.member_count()), arrival)
    }

    fn bcast_send(&self, data: &[u8], dests: &[usize]) {
        for &dest in dests.iter().filter(|d| **d != self.process) {
            let envelope = Envelope {
                source: self.rank,
                tag: 0,
                payload: data.to_vec(),
            };
            self.universe
                .deliver(self.process, self.mailbox(Channel::Collective, dest), envelope);
        }
    }

    fn bcast_recv(&self, data: &mut [u8], root: Rank) -> TransportResult<()> {
        let envelope = self.universe.next_matching(
            self.mailbox(Channel::Collective, self.process),
            |queue| {
                let index = queue.iter().position(|e| e.source == root)?;
                queue.remove(index)
            },
        )?;
        copy_payload(&envelope.payload, data)
    }
}

fn check_tag(tag: Tag) -> TransportResult<()> {
    if (0..=TAG_UB).contains(&tag) {
        Ok(())
    } else {
        Err(TransportError::InvalidTag(tag))
    }
}

fn copy_payload(payload: &[u8], data: &mut [u8]) -> TransportResult<()> {
    let buffer = data.len();
    let target = data
        .get_mut(..payload.len())
        .ok_or(TransportError::Truncated {
            message: payload.len(),
            buffer,
        })?;
    target.copy_from_slice(payload);
    Ok(())
}

fn mismatch(call: &str) -> TransportError {
    TransportError::Other(format!("mismatched collective calls at {call}"))
}

impl Communicator for LocalComm {
    fn rank(&self) -> TransportResult<Rank> {
        Ok(self.rank)
    }

    fn size(&self) -> TransportResult<Rank> {
        Ok(self.local_group.len() as Rank)
    }

    fn remote_size(&self) -> TransportResult<Rank> {
        self.remote_group
            .as_ref()
            .map(|g| g.len() as Rank)
            .ok_or(TransportError::Unsupported("intra-group"))
    }

    fn is_inter(&self) -> bool {
        self.remote_group.is_some()
    }

    fn context_id(&self) -> u64 {
        self.context
    }

    fn send(&self, data: &[u8], dest: Rank, tag: Tag) -> TransportResult<()> {
        check_tag(tag)?;
        let dest = self.peer(dest)?;
        let envelope = Envelope {
            source: self.rank,
            tag,
            payload: data.to_vec(),
        };
        self.universe
            .deliver(self.process, self.mailbox(Channel::PointToPoint, dest), envelope);
        Ok(())
    }

    fn probe(&self, source: Source, tag: TagSelector) -> TransportResult<Status> {
        self.check_selectors(source, tag)?;
        self.universe
            .next_matching(self.mailbox(Channel::PointToPoint, self.process), |queue| {
                queue
                    .iter()
                    .find(|e| e.matches(source, tag))
                    .map(Envelope::status)
            })
    }

    fn recv(&self, data: &mut [u8], source: Source, tag: TagSelector) -> TransportResult<Status> {
        self.check_selectors(source, tag)?;
        let envelope = self
            .universe
            .next_matching(self.mailbox(Channel::PointToPoint, self.process), |queue| {
                let index = queue.iter().position(|e| e.matches(source, tag))?;
                queue.remove(index)
            })?;
        copy_payload(&envelope.payload, data)?;
        Ok(envelope.status())
    }

    fn bcast(&self, data: &mut [u8], root: BcastRoot) -> TransportResult<()> {
        match (&self.remote_group, root) {
            (None, BcastRoot::Rank(r)) => {
                self.peer(r).map_err(|_| TransportError::InvalidRoot(root))?;
                if r == self.rank {
                    self.bcast_send(data, &self.local_group);
                    Ok(())
                } else {
                    self.bcast_recv(data, r)
                }
            }
            (Some(remote), BcastRoot::Root) => {
                self.bcast_send(data, remote);
                Ok(())
            }
            (Some(_), BcastRoot::ProcNull) => Ok(()),
            (Some(_), BcastRoot::Rank(r)) => {
                self.peer(r).map_err(|_| TransportError::InvalidRoot(root))?;
                self.bcast_recv(data, r)
            }
            (None, _) => Err(TransportError::InvalidRoot(root)),
        }
    }

    fn barrier(&self) -> TransportResult<()> {
        match self.collective(Contribution::Barrier)? {
            Outcome::Released => Ok(()),
            _ => Err(mismatch("barrier")),
        }
    }

    fn dup(&self) -> TransportResult<Box<dyn Communicator>> {
        match self.collective(Contribution::Dup)? {
            Outcome::Context(context) => Ok(self.derive(
                context,
                self.rank,
                self.local_group.clone(),
                self.remote_group.clone(),
            )),
            _ => Err(mismatch("dup")),
        }
    }

    fn split(
        &self,
        color: Option<i32>,
        key: i32,
    ) -> TransportResult<Option<Box<dyn Communicator>>> {
        if self.is_inter() {
            return Err(TransportError::Unsupported("inter-group"));
        }
        let contribution = Contribution::Split {
            color,
            key,
            rank: self.rank,
        };
        match self.collective(contribution)? {
            Outcome::Split(placement) => Ok(placement
                .map(|p| self.derive(p.context, p.rank, p.group, None))),
            _ => Err(mismatch("split")),
        }
    }

    fn create_intercomm(
        &self,
        local_leader: Rank,
        bridge: &dyn Communicator,
        remote_leader: Rank,
        tag: Tag,
    ) -> TransportResult<Box<dyn Communicator>> {
        if self.is_inter() {
            return Err(TransportError::Unsupported("inter-group"));
        }
        check_tag(tag)?;
        self.peer(local_leader)?;
        let bridge_size = bridge.size()?;
        if !(0..bridge_size).contains(&remote_leader) {
            return Err(TransportError::InvalidRank {
                rank: remote_leader,
                size: bridge_size,
            });
        }
        let key = RendezvousKey::Intercomm {
            bridge: bridge.context_id(),
            tag,
        };
        let arrival = Arrival {
            process: self.process,
            contribution: Contribution::Intercomm {
                group_context: self.context,
                group: self.local_group.clone(),
            },
        };
        match self.universe.rendezvous(key, Expected::TwoGroups, arrival)? {
            Outcome::Intercomm {
                context,
                remote_group,
            } => Ok(self.derive(
                context,
                self.rank,
                self.local_group.clone(),
                Some(remote_group),
            )),
            _ => Err(mismatch("create_intercomm")),
        }
    }

    fn free(self: Box<Self>) -> TransportResult<()> {
        if !self.tracked {
            return Err(TransportError::Other(
                "the world communicator cannot be freed".to_string(),
            ));
        }
        self.universe.lock().handles.freed += 1;
        Ok(())
    }
}
