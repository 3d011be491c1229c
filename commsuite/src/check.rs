//! Failure detection and per-thread check statistics.
//!
//! Every transport call made by a test goes through
//! [`TransportResultExt::checked`], and every correctness condition goes
//! through [`check`] or the [`verify!`](crate::verify) macro. Both turn a
//! failure into a [`SuiteError`] that ends the current activation, and both
//! count outcomes in thread-local storage so the driver can fold them into the
//! report.

use std::cell::RefCell;

use serde::Serialize;

use crate::error::{ErrorKind, SuiteError, SuiteResult, VerificationFailure};
use crate::transport::{TransportError, TransportResult};
use crate::types::{TypeRegistry, TypedBuffer};

/// Counters for checks performed on one thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckStats {
    /// Conditions evaluated.
    pub checks: usize,
    /// Conditions that did not hold.
    pub check_failures: usize,
    /// Transport calls issued through `checked`.
    pub transport_calls: usize,
    /// Transport calls that reported an error.
    pub transport_failures: usize,
}

impl CheckStats {
    /// Fold another set of counters into this one.
    pub fn merge(&mut self, other: &CheckStats) {
        self.checks += other.checks;
        self.check_failures += other.check_failures;
        self.transport_calls += other.transport_calls;
        self.transport_failures += other.transport_failures;
    }
}

thread_local! {
    static CHECK_STATS: RefCell<CheckStats> = RefCell::new(CheckStats::default());
}

fn record_check(success: bool) {
    CHECK_STATS.with(|stats| {
        let mut stats = stats.borrow_mut();
        stats.checks += 1;
        if !success {
            stats.check_failures += 1;
        }
    });
}

fn record_transport_call(success: bool) {
    CHECK_STATS.with(|stats| {
        let mut stats = stats.borrow_mut();
        stats.transport_calls += 1;
        if !success {
            stats.transport_failures += 1;
        }
    });
}

/// Take this thread's counters, leaving them at zero.
pub fn take_check_stats() -> CheckStats {
    CHECK_STATS.with(|stats| std::mem::take(&mut *stats.borrow_mut()))
}

/// Fail the activation with an error of `kind` unless `condition` holds.
pub fn check(condition: bool, kind: ErrorKind, message: impl Into<String>) -> SuiteResult<()> {
    record_check(condition);
    if condition {
        return Ok(());
    }
    let message = message.into();
    Err(match kind {
        ErrorKind::Configuration => SuiteError::Configuration(message),
        ErrorKind::Transport => SuiteError::Transport {
            call: "check",
            source: TransportError::Other(message),
        },
        ErrorKind::Verification => VerificationFailure::Condition(message).into(),
        ErrorKind::Resource => SuiteError::Resource(message),
    })
}

/// Fail with a metadata mismatch unless `expected == actual`.
pub fn check_eq<T>(
    call: &'static str,
    what: &'static str,
    expected: T,
    actual: T,
) -> SuiteResult<()>
where
    T: PartialEq + std::fmt::Display,
{
    let success = expected == actual;
    record_check(success);
    if success {
        Ok(())
    } else {
        Err(VerificationFailure::Metadata {
            call,
            what,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
        .into())
    }
}

/// Fail with a metadata mismatch unless `actual` lies in `range`.
pub fn check_in_range<T>(
    call: &'static str,
    what: &'static str,
    range: std::ops::Range<T>,
    actual: T,
) -> SuiteResult<()>
where
    T: PartialOrd + std::fmt::Display,
{
    let success = range.contains(&actual);
    record_check(success);
    if success {
        Ok(())
    } else {
        Err(VerificationFailure::Metadata {
            call,
            what,
            expected: format!("[{}, {})", range.start, range.end),
            actual: actual.to_string(),
        }
        .into())
    }
}

/// Fail with a payload mismatch unless `buffer` holds the standard pattern for `expected_seed`.
pub fn check_payload(
    types: &TypeRegistry,
    buffer: &TypedBuffer,
    expected_seed: i64,
) -> SuiteResult<()> {
    let outcome = types.check_standard_pattern(buffer, expected_seed)?;
    record_check(outcome.is_ok());
    outcome.map_err(|mismatch| {
        tracing::debug!(
            index = mismatch.index,
            field = mismatch.field,
            expected = %mismatch.expected,
            actual = %mismatch.actual,
            "payload mismatch"
        );
        SuiteError::from(mismatch)
    })
}

/// Keeps the first failure of a series of checks so a communication pattern
/// can run to completion before the failure is reported.
///
/// Stopping halfway would leave peers blocked on messages this process never
/// sends or receives.
#[derive(Debug, Default)]
pub struct FirstFailure(Option<SuiteError>);

impl FirstFailure {
    /// Create an empty latch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `result` if it is the first failure.
    pub fn record(&mut self, result: SuiteResult<()>) {
        if let Err(error) = result {
            tracing::debug!(%error, "check failed, finishing communication pattern");
            self.0.get_or_insert(error);
        }
    }

    /// The first recorded failure, if any.
    pub fn into_result(self) -> SuiteResult<()> {
        self.0.map_or(Ok(()), Err)
    }
}

/// Conversion of transport results into suite results.
pub trait TransportResultExt<T> {
    /// Tag a transport failure with the name of the call that produced it.
    fn checked(self, call: &'static str) -> SuiteResult<T>;
}

impl<T> TransportResultExt<T> for TransportResult<T> {
    fn checked(self, call: &'static str) -> SuiteResult<T> {
        record_transport_call(self.is_ok());
        self.map_err(|source| {
            tracing::debug!(call, %source, "transport call failed");
            SuiteError::Transport { call, source }
        })
    }
}

/// Return a verification error from the enclosing function unless the condition holds.
///
/// ```ignore
/// verify!(status.count == expected_len, "short message: {} bytes", status.count);
/// ```
#[macro_export]
macro_rules! verify {
    ($condition:expr, $($message:tt)+) => {
        $crate::check::check(
            $condition,
            $crate::error::ErrorKind::Verification,
            format!($($message)+),
        )?
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_counts_outcomes() {
        let _ = take_check_stats();
        assert!(check(true, ErrorKind::Verification, "fine").is_ok());
        let err = check(false, ErrorKind::Verification, "broken").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Verification);
        let stats = take_check_stats();
        assert_eq!(stats.checks, 2);
        assert_eq!(stats.check_failures, 1);
        assert_eq!(take_check_stats(), CheckStats::default());
    }

    #[test]
    fn test_check_maps_every_kind() {
        for kind in [
            ErrorKind::Configuration,
            ErrorKind::Transport,
            ErrorKind::Verification,
            ErrorKind::Resource,
        ] {
            assert_eq!(check(false, kind, "x").unwrap_err().kind(), kind);
        }
    }

    #[test]
    fn test_checked_tags_call_name() {
        let _ = take_check_stats();
        let ok: TransportResult<u8> = Ok(1);
        assert_eq!(ok.checked("rank").unwrap(), 1);
        let failed: TransportResult<()> = Err(TransportError::InvalidTag(-3));
        match failed.checked("send") {
            Err(SuiteError::Transport { call, source }) => {
                assert_eq!(call, "send");
                assert_eq!(source.code(), 4);
            }
            other => panic!("unexpected {other:?}"),
        }
        let stats = take_check_stats();
        assert_eq!(stats.transport_calls, 2);
        assert_eq!(stats.transport_failures, 1);
    }

    #[test]
    fn test_metadata_checks() {
        assert!(check_eq("probe", "tag", 5, 5).is_ok());
        let err = check_eq("probe", "tag", 5, 6).unwrap_err();
        assert!(err.to_string().contains("tag mismatch after probe: expected 5, got 6"));
        assert!(check_in_range("probe", "source", 1..4, 3).is_ok());
        let err = check_in_range("probe", "source", 1..4, 0).unwrap_err();
        assert!(err.to_string().contains("expected [1, 4), got 0"));
    }

    #[test]
    fn test_check_payload() {
        let types = TypeRegistry::standard();
        let id = types.lookup("int").unwrap();
        let mut buffer = types.allocate(id, 4).unwrap();
        types.set_standard_pattern(&mut buffer, 2).unwrap();
        let _ = take_check_stats();
        assert!(check_payload(types, &buffer, 2).is_ok());
        let err = check_payload(types, &buffer, 3).unwrap_err();
        assert!(matches!(
            err,
            SuiteError::Verification(VerificationFailure::Payload { index: 0, .. })
        ));
        assert_eq!(take_check_stats().check_failures, 1);
    }

    #[test]
    fn test_first_failure_keeps_earliest() {
        let mut latch = FirstFailure::new();
        latch.record(Ok(()));
        latch.record(Err(SuiteError::Resource("first".into())));
        latch.record(Err(SuiteError::Resource("second".into())));
        assert_eq!(
            latch.into_result(),
            Err(SuiteError::Resource("first".into()))
        );
        assert!(FirstFailure::new().into_result().is_ok());
    }

    fn uses_verify(value: i32) -> SuiteResult<i32> {
        verify!(value > 0, "value {} must be positive", value);
        Ok(value)
    }

    #[test]
    fn test_verify_macro_returns_early() {
        assert_eq!(uses_verify(2).unwrap(), 2);
        let err = uses_verify(-1).unwrap_err();
        assert_eq!(
            err,
            SuiteError::Verification(VerificationFailure::Condition(
                "value -1 must be positive".into()
            ))
        );
    }
}
