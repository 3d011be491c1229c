//! Suite outcomes and reporting.
//!
//! Each rank produces a [`RankReport`]; [`SuiteReport::aggregate`] folds them
//! into one verdict per activation so a single run surfaces every failing
//! combination.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::check::CheckStats;
use crate::env::ActivationId;
use crate::error::{ErrorKind, SuiteError, SuiteResult};
use crate::local::{HandleStats, TrafficStats};
use crate::transport::Rank;

/// Lifecycle phase a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// `init`
    Init,
    /// `run`
    Run,
    /// `cleanup`
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Init => "init",
            Phase::Run => "run",
            Phase::Cleanup => "cleanup",
        })
    }
}

/// One failure, with enough context to reproduce it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    /// Activation that failed.
    pub activation: ActivationId,
    /// World rank of the failing process.
    pub rank: Rank,
    /// Worker thread index.
    pub thread: usize,
    /// Phase the error was raised in.
    pub phase: Phase,
    /// Error class.
    pub kind: ErrorKind,
    /// Rendered error.
    pub message: String,
}

impl FailureRecord {
    /// Record `error` raised by `activation` on `rank`/`thread` during `phase`.
    pub fn new(
        activation: ActivationId,
        rank: Rank,
        thread: usize,
        phase: Phase,
        error: &SuiteError,
    ) -> Self {
        Self {
            activation,
            rank,
            thread,
            phase,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] rank {} thread {} {} ({}): {}",
            self.activation, self.rank, self.thread, self.phase, self.kind, self.message
        )
    }
}

/// Verdict of an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStatus {
    /// Every phase succeeded everywhere.
    Passed,
    /// At least one rank or thread failed.
    Failed,
    /// The test does not apply to this combination.
    Skipped,
}

/// Result of one activation on one rank.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationOutcome {
    /// Activation identity.
    pub activation: ActivationId,
    /// Verdict.
    pub status: ActivationStatus,
    /// Failures, empty unless `status` is `Failed`.
    pub failures: Vec<FailureRecord>,
}

impl ActivationOutcome {
    /// Outcome of an activation that ran, failed iff `failures` is non-empty.
    pub fn ran(activation: ActivationId, failures: Vec<FailureRecord>) -> Self {
        let status = if failures.is_empty() {
            ActivationStatus::Passed
        } else {
            ActivationStatus::Failed
        };
        Self {
            activation,
            status,
            failures,
        }
    }

    /// Outcome of an activation that did not apply.
    pub fn skipped(activation: ActivationId) -> Self {
        Self {
            activation,
            status: ActivationStatus::Skipped,
            failures: Vec::new(),
        }
    }
}

/// Everything one rank observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankReport {
    /// World rank.
    pub rank: Rank,
    /// Outcomes in execution order.
    pub outcomes: Vec<ActivationOutcome>,
    /// Checks performed on this rank and its workers.
    pub checks: CheckStats,
}

/// A rank that could not complete the suite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankError {
    /// World rank, when known.
    pub rank: Option<Rank>,
    /// Error class.
    pub kind: ErrorKind,
    /// Rendered error.
    pub message: String,
}

/// Aggregated verdict of one activation across all ranks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationSummary {
    /// Activation identity.
    pub activation: ActivationId,
    /// Worst status over all ranks.
    pub status: ActivationStatus,
}

/// Report of a complete suite run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteReport {
    /// Ranks that took part.
    pub num_ranks: usize,
    /// One summary per activation, in execution order.
    pub activations: Vec<ActivationSummary>,
    /// Every failure on every rank.
    pub failures: Vec<FailureRecord>,
    /// Ranks that aborted.
    pub rank_errors: Vec<RankError>,
    /// Checks performed across all ranks.
    pub checks: CheckStats,
    /// Communicator handles of the local transport, when it was used.
    pub handles: Option<HandleStats>,
    /// Deliveries of the local transport, when it was used.
    pub traffic: Option<TrafficStats>,
}

impl SuiteReport {
    /// Fold per-rank results into one report.
    pub fn aggregate(results: Vec<SuiteResult<RankReport>>) -> Self {
        let mut report = SuiteReport {
            num_ranks: results.len(),
            ..Self::default()
        };
        let mut index: HashMap<ActivationId, usize> = HashMap::new();

        for (position, result) in results.into_iter().enumerate() {
            let rank_report = match result {
                Ok(rank_report) => rank_report,
                Err(error) => {
                    report.rank_errors.push(RankError {
                        rank: Rank::try_from(position).ok(),
                        kind: error.kind(),
                        message: error.to_string(),
                    });
                    continue;
                }
            };
            report.checks.merge(&rank_report.checks);
            for outcome in rank_report.outcomes {
                let slot = *index.entry(outcome.activation).or_insert_with(|| {
                    report.activations.push(ActivationSummary {
                        activation: outcome.activation,
                        status: outcome.status,
                    });
                    report.activations.len() - 1
                });
                let summary = &mut report.activations[slot];
                summary.status = worst(summary.status, outcome.status);
                report.failures.extend(outcome.failures);
            }
        }
        report
    }

    fn count(&self, status: ActivationStatus) -> usize {
        self.activations
            .iter()
            .filter(|a| a.status == status)
            .count()
    }

    /// Activations that passed on every rank.
    pub fn passed(&self) -> usize {
        self.count(ActivationStatus::Passed)
    }

    /// Activations that failed somewhere.
    pub fn failed(&self) -> usize {
        self.count(ActivationStatus::Failed)
    }

    /// Activations that did not apply.
    pub fn skipped(&self) -> usize {
        self.count(ActivationStatus::Skipped)
    }

    /// Whether nothing failed and every rank finished.
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.rank_errors.is_empty()
    }

    /// Failures of kind `kind`.
    pub fn failures_of(&self, kind: ErrorKind) -> impl Iterator<Item = &FailureRecord> {
        self.failures.iter().filter(move |f| f.kind == kind)
    }

    /// Render as pretty JSON.
    pub fn to_json(&self) -> SuiteResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn worst(a: ActivationStatus, b: ActivationStatus) -> ActivationStatus {
    use ActivationStatus::{Failed, Passed, Skipped};
    match (a, b) {
        (Failed, _) | (_, Failed) => Failed,
        (Passed, _) | (_, Passed) => Passed,
        (Skipped, Skipped) => Skipped,
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Suite Report ===")?;
        writeln!(f, "Ranks: {}", self.num_ranks)?;
        writeln!(f, "Activations: {}", self.activations.len())?;
        writeln!(f, "Passed: {}", self.passed())?;
        writeln!(f, "Failed: {}", self.failed())?;
        writeln!(f, "Skipped: {}", self.skipped())?;
        writeln!(
            f,
            "Checks: {} ({} failed), transport calls: {} ({} failed)",
            self.checks.checks,
            self.checks.check_failures,
            self.checks.transport_calls,
            self.checks.transport_failures
        )?;

        if let Some(handles) = &self.handles {
            writeln!(
                f,
                "Communicator handles: {} created, {} freed",
                handles.created, handles.freed
            )?;
        }
        if let Some(traffic) = &self.traffic {
            writeln!(
                f,
                "Messages: {} ({} bytes, {} delayed, {} corrupted)",
                traffic.messages, traffic.bytes, traffic.delayed, traffic.bit_flips
            )?;
        }

        if !self.failures.is_empty() {
            writeln!(f)?;
            writeln!(f, "=== Failures ===")?;
            for failure in &self.failures {
                writeln!(f, "  - {}", failure)?;
            }
        }

        if !self.rank_errors.is_empty() {
            writeln!(f)?;
            writeln!(f, "=== Rank Errors ===")?;
            for error in &self.rank_errors {
                match error.rank {
                    Some(rank) => writeln!(f, "  - rank {}: {}", rank, error.message)?,
                    None => writeln!(f, "  - {}", error.message)?,
                }
            }
        }

        writeln!(f)?;
        Ok(())
    }
}
