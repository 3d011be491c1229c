//! Configuration-driven runs.

use commsuite::{ErrorKind, SuiteConfig};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::ERROR)
        .try_init();
}

#[test]
fn test_full_matrix_from_json() {
    init_logging();

    let config = SuiteConfig::from_json(
        r#"{
            "num_ranks": 4,
            "num_threads": 2,
            "values_num": [0, 3],
            "chaos": { "seed": 1234, "delivery_delay_max_micros": 200 }
        }"#,
    )
    .unwrap();
    assert_eq!(config.chaos.delivery_delay_probability, 0.25);

    let report = config.run().unwrap();
    assert!(report.is_success(), "{report}");
    // Two tests, five communicators, fourteen types, two counts.
    assert_eq!(report.activations.len(), 2 * 5 * 14 * 2);
    assert_eq!(report.passed(), report.activations.len());
    assert_eq!(report.handles.unwrap().live(), 0);
    assert!(report.traffic.unwrap().delayed > 0);

    let rendered = report.to_string();
    assert!(rendered.starts_with("=== Suite Report ==="), "{rendered}");
    assert!(!rendered.contains("=== Failures ==="));

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["num_ranks"], 4);
    assert_eq!(json["failures"].as_array().map(Vec::len), Some(0));
}

#[test]
fn test_keyword_selection() {
    let config = SuiteConfig::from_json(
        r#"{ "comms": ["inter"], "types": ["struct"], "tests": ["threaded_comm_dup"] }"#,
    )
    .unwrap();
    let plan = config.plan().unwrap();
    assert_eq!(plan.comms.len(), 1);
    assert_eq!(plan.types.len(), 2);
    assert_eq!(plan.tests.len(), 1);
    assert_eq!(plan.activations().count(), 2 * 2);
}

#[test]
fn test_invalid_configuration() {
    for json in [
        r#"{ "num_ranks": 0 }"#,
        r#"{ "values_num": [] }"#,
        r#"{ "num_ranks": "four" }"#,
    ] {
        let error = SuiteConfig::from_json(json).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration, "{json}");
    }

    let unknown = SuiteConfig::from_json(r#"{ "types": ["quaternion"] }"#)
        .unwrap()
        .plan()
        .unwrap_err();
    assert_eq!(unknown.kind(), ErrorKind::Configuration);
}
