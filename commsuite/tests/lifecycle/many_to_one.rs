//! Many-to-one probe with wildcard source.

use commsuite::{
    ChaosConfiguration, Communicator, LocalUniverse, Source, SuiteBuilder, TagSelector,
    TypeRegistry,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::ERROR)
        .try_init();
}

#[test]
fn test_rank_zero_receives_each_sender_pattern() {
    init_logging();

    let universe = LocalUniverse::new(4, ChaosConfiguration::seeded(7));
    let received = universe
        .run(|world: Box<dyn Communicator>| {
            let types = TypeRegistry::standard();
            let int = types.lookup("int").unwrap();
            let rank = world.rank().unwrap();
            let mut buffer = types.allocate(int, 10).unwrap();

            if rank != 0 {
                types
                    .set_standard_pattern(&mut buffer, i64::from(rank))
                    .unwrap();
                world.send(buffer.as_bytes(), 0, 5).unwrap();
                return Vec::new();
            }

            let mut sources = Vec::new();
            for _ in 1..4 {
                let status = world.probe(Source::Any, TagSelector::Any).unwrap();
                assert_eq!(status.tag, 5);
                assert_eq!(status.count, 40);
                world
                    .recv(
                        buffer.as_bytes_mut(),
                        Source::Rank(status.source),
                        TagSelector::Tag(status.tag),
                    )
                    .unwrap();
                let values: Vec<i32> = buffer
                    .as_bytes()
                    .chunks_exact(4)
                    .map(|chunk| i32::from_le_bytes(chunk.try_into().unwrap()))
                    .collect();
                let expected: Vec<i32> = (0..10).map(|i| 10 * status.source + i).collect();
                assert_eq!(values, expected, "payload from rank {}", status.source);
                sources.push(status.source);
            }
            sources.sort_unstable();
            sources
        })
        .unwrap();

    assert_eq!(received[0], vec![1, 2, 3]);
    assert_eq!(universe.undelivered(), 0);
}

#[test]
fn test_four_ranks_ten_ints() {
    init_logging();

    let report = SuiteBuilder::new()
        .ranks(4)
        .tests(["p2p_many_to_one_probe_anysource"])
        .comms(["world"])
        .types(["int"])
        .values_num([10])
        .chaos(ChaosConfiguration::seeded(42))
        .run()
        .unwrap();

    assert!(report.is_success(), "{report}");
    assert_eq!(report.passed(), 1);
    let traffic = report.traffic.unwrap();
    assert_eq!(traffic.messages, 3);
    assert_eq!(traffic.bytes, 3 * 40);
    assert!(report.checks.checks > 0);
    assert_eq!(report.checks.check_failures, 0);
}

#[test]
fn test_every_type_and_communicator() {
    init_logging();

    for ranks in [2, 3, 5] {
        let report = SuiteBuilder::new()
            .ranks(ranks)
            .tests(["p2p_many_to_one_probe_anysource"])
            .values_num([0, 1, 7])
            .chaos(ChaosConfiguration::seeded(ranks as u64))
            .run()
            .unwrap();

        assert!(report.is_success(), "ranks={ranks}\n{report}");
        assert_eq!(report.skipped(), 0, "ranks={ranks}");
        assert_eq!(report.handles.unwrap().live(), 0);
    }
}

#[test]
fn test_single_rank_skips_intercommunicator() {
    init_logging();

    let report = SuiteBuilder::new()
        .ranks(1)
        .tests(["p2p_many_to_one_probe_anysource"])
        .types(["int"])
        .values_num([4])
        .chaos(ChaosConfiguration::disabled())
        .run()
        .unwrap();

    assert!(report.is_success(), "{report}");
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.passed(), 4);
    assert_eq!(report.traffic.unwrap().messages, 0);
}
