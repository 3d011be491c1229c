//! Failure detection and reporting.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use commsuite::cases::ManyToOneProbeAnySource;
use commsuite::comm::CommClass;
use commsuite::report::Phase;
use commsuite::{
    ChaosConfiguration, Environment, ErrorKind, Rank, SuiteBuilder, SuiteContext, SuiteError,
    SuiteResult, SuiteTest, TestClass, TestDescriptor, TestId, TransportResultExt, TypeRegistry,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::ERROR)
        .try_init();
}

/// Many-to-one where rank 1 sends with the wrong tag.
#[derive(Debug, Default)]
struct WrongTagSender;

impl SuiteTest for WrongTagSender {
    fn init(&self, ctx: &SuiteContext<'_>, env: &mut Environment) -> SuiteResult<()> {
        ManyToOneProbeAnySource.init(ctx, env)
    }

    fn run(&self, ctx: &SuiteContext<'_>, env: &mut Environment) -> SuiteResult<()> {
        let comm = ctx.comm(env)?;
        if comm.rank().checked("rank")? != 1 {
            return ManyToOneProbeAnySource.run(ctx, env);
        }
        let buffer = env
            .scratch
            .send_buffer
            .as_ref()
            .ok_or_else(|| SuiteError::Configuration("run without init".to_string()))?;
        comm.send(buffer.as_bytes(), 0, ctx.tag(env) + 1).checked("send")
    }

    fn cleanup(&self, ctx: &SuiteContext<'_>, env: &mut Environment) -> SuiteResult<()> {
        ManyToOneProbeAnySource.cleanup(ctx, env)
    }
}

/// Many-to-one where rank 1 sends an oversized message, for `int` only.
#[derive(Debug, Default)]
struct OversizedIntSender;

impl SuiteTest for OversizedIntSender {
    fn init(&self, ctx: &SuiteContext<'_>, env: &mut Environment) -> SuiteResult<()> {
        ManyToOneProbeAnySource.init(ctx, env)
    }

    fn run(&self, ctx: &SuiteContext<'_>, env: &mut Environment) -> SuiteResult<()> {
        let comm = ctx.comm(env)?;
        let is_int = env.type_id == ctx.types.lookup("int")?;
        if !is_int || comm.rank().checked("rank")? != 1 {
            return ManyToOneProbeAnySource.run(ctx, env);
        }
        comm.send(&[0; 1000], 0, ctx.tag(env)).checked("send")
    }

    fn cleanup(&self, ctx: &SuiteContext<'_>, env: &mut Environment) -> SuiteResult<()> {
        ManyToOneProbeAnySource.cleanup(ctx, env)
    }
}

fn descriptor(id: usize, name: &'static str, test: Arc<dyn SuiteTest>) -> TestDescriptor {
    TestDescriptor {
        id: TestId(id),
        name,
        class: TestClass::PointToPoint,
        comm_classes: &[CommClass::Intra],
        threaded: false,
        test,
    }
}

#[test]
fn test_wrong_tag_is_reported() {
    init_logging();

    let report = SuiteBuilder::new()
        .ranks(4)
        .comms(["world"])
        .types(["int"])
        .values_num([10])
        .chaos(ChaosConfiguration::disabled())
        .test(descriptor(3, "wrong_tag", Arc::new(WrongTagSender)))
        .run()
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.failed(), 1);
    assert!(report.rank_errors.is_empty());

    let failures: Vec<_> = report.failures_of(ErrorKind::Verification).collect();
    assert_eq!(failures.len(), 1, "{report}");
    let failure = failures[0];
    assert_eq!(failure.rank, 0);
    assert_eq!(failure.phase, Phase::Run);
    assert!(failure.message.contains("tag mismatch after probe"), "{failure}");

    // Rank 0 still drained every sender, so nothing leaked into later activations.
    assert_eq!(report.traffic.unwrap().messages, 3);
    assert_eq!(report.checks.check_failures, 1);
}

#[test]
fn test_failed_receive_does_not_leak_into_next_activation() {
    init_logging();

    let report = SuiteBuilder::new()
        .ranks(4)
        .comms(["world"])
        .types(["int", "double"])
        .values_num([10])
        .chaos(ChaosConfiguration::disabled())
        .test(descriptor(2, "oversized_int", Arc::new(OversizedIntSender)))
        .run()
        .unwrap();

    assert_eq!(report.failed(), 1, "{report}");
    assert_eq!(report.passed(), 1, "{report}");
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    let int = TypeRegistry::standard().lookup("int").unwrap();
    assert_eq!(failure.activation.type_id, int);
    assert_eq!(failure.rank, 0);
    assert_eq!(failure.kind, ErrorKind::Transport, "{failure}");
    // Every message was received: three per activation.
    assert_eq!(report.traffic.unwrap().messages, 6);
}

#[test]
fn test_corrupted_payload_is_reported() {
    init_logging();

    let chaos = ChaosConfiguration {
        delivery_delay_probability: 0.0,
        bit_flip_probability: 1.0,
        ..ChaosConfiguration::seeded(5)
    };
    let report = SuiteBuilder::new()
        .ranks(3)
        .tests(["p2p_many_to_one_probe_anysource"])
        .comms(["world"])
        .types(["int"])
        .values_num([4])
        .chaos(chaos)
        .run()
        .unwrap();

    assert_eq!(report.failed(), 1);
    assert!(report.rank_errors.is_empty());
    assert_eq!(report.traffic.unwrap().bit_flips, 2);
    let failure = report
        .failures_of(ErrorKind::Verification)
        .next()
        .expect("payload failure");
    assert_eq!(failure.rank, 0);
    assert!(failure.message.contains("payload mismatch"), "{failure}");
}

#[test]
fn test_oversized_allocation_skips_run() {
    init_logging();

    let report = SuiteBuilder::new()
        .ranks(2)
        .threads(2)
        .comms(["world"])
        .types(["double"])
        .values_num([usize::MAX / 2])
        .chaos(ChaosConfiguration::disabled())
        .run()
        .unwrap();

    assert_eq!(report.failed(), 2, "{report}");
    assert!(report.rank_errors.is_empty());
    assert!(!report.failures.is_empty());
    for failure in &report.failures {
        assert_eq!(failure.kind, ErrorKind::Resource, "{failure}");
        assert_eq!(failure.phase, Phase::Init, "{failure}");
    }
    assert_eq!(report.traffic.unwrap().messages, 0);
    assert_eq!(report.handles.unwrap().live(), 0);
}

/// Records which phases ran, failing `init` on one rank and `run` on another.
#[derive(Debug, Default)]
struct PhaseLog {
    entries: Mutex<BTreeSet<(Rank, &'static str)>>,
}

impl PhaseLog {
    fn log(&self, ctx: &SuiteContext<'_>, env: &Environment, phase: &'static str) -> Rank {
        let rank = ctx.comms.rank(env.comm).unwrap_or(-1);
        self.entries.lock().unwrap().insert((rank, phase));
        rank
    }
}

impl SuiteTest for PhaseLog {
    fn init(&self, ctx: &SuiteContext<'_>, env: &mut Environment) -> SuiteResult<()> {
        if self.log(ctx, env, "init") == 1 {
            return Err(SuiteError::Resource("no memory on rank 1".to_string()));
        }
        Ok(())
    }

    fn run(&self, ctx: &SuiteContext<'_>, env: &mut Environment) -> SuiteResult<()> {
        if self.log(ctx, env, "run") == 2 {
            return Err(SuiteError::Configuration("rank 2 gives up".to_string()));
        }
        Ok(())
    }

    fn cleanup(&self, ctx: &SuiteContext<'_>, env: &mut Environment) -> SuiteResult<()> {
        self.log(ctx, env, "cleanup");
        Ok(())
    }
}

#[test]
fn test_cleanup_runs_after_failed_phases() {
    init_logging();

    let log = Arc::new(PhaseLog::default());
    let report = SuiteBuilder::new()
        .ranks(3)
        .comms(["world"])
        .types(["byte"])
        .values_num([1])
        .chaos(ChaosConfiguration::disabled())
        .test(descriptor(0, "phase_log", log.clone()))
        .run()
        .unwrap();

    let entries: Vec<_> = log.entries.lock().unwrap().iter().copied().collect();
    assert_eq!(
        entries,
        vec![
            (0, "cleanup"),
            (0, "init"),
            (0, "run"),
            (1, "cleanup"),
            (1, "init"),
            (2, "cleanup"),
            (2, "init"),
            (2, "run"),
        ]
    );

    let phases: Vec<_> = report
        .failures
        .iter()
        .map(|f| (f.rank, f.phase, f.kind))
        .collect();
    assert_eq!(phases.len(), 2);
    assert!(phases.contains(&(1, Phase::Init, ErrorKind::Resource)));
    assert!(phases.contains(&(2, Phase::Run, ErrorKind::Configuration)));
}

#[test]
fn test_duplicate_test_ids_are_rejected() {
    let error = SuiteBuilder::new()
        .ranks(2)
        .tests(["p2p_many_to_one_probe_anysource"])
        .test(descriptor(0, "clash", Arc::new(WrongTagSender)))
        .run()
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Configuration);
}
