//! Suite configuration and the builder that runs it on the local transport.
//!
//! A [`SuiteConfig`] names what to run; [`SuiteConfig::plan`] resolves the
//! names into the [`Plan`] every rank executes. Selections accept names and
//! the keywords `"all"`, `"primitive"`/`"struct"` (types) and
//! `"intra"`/`"inter"` (communicators).
//!
//! ```ignore
//! let report = SuiteBuilder::new()
//!     .ranks(4)
//!     .types(["int", "struct_mixed"])
//!     .values_num([0, 1, 10])
//!     .run()?;
//! assert!(report.is_success(), "{report}");
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::cases;
use crate::comm::{comm_class, comm_id, CommClass, CommId, COMM_COUNT};
use crate::driver::{run_rank, Plan};
use crate::error::{SuiteError, SuiteResult};
use crate::local::{ChaosConfiguration, LocalUniverse};
use crate::report::SuiteReport;
use crate::suite::TestDescriptor;
use crate::types::{TypeClass, TypeId, TypeRegistry};

const ALL: &str = "all";

/// What to run and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Ranks in the world group.
    pub num_ranks: usize,
    /// Worker threads per rank for threaded tests.
    pub num_threads: usize,
    /// Element counts.
    pub values_num: Vec<usize>,
    /// Test names, or `"all"`.
    pub tests: Vec<String>,
    /// Communicator names, `"intra"`, `"inter"` or `"all"`.
    pub comms: Vec<String>,
    /// Type names, `"primitive"`, `"struct"` or `"all"`.
    pub types: Vec<String>,
    /// Fault injection for the local transport.
    pub chaos: ChaosConfiguration,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            num_ranks: 4,
            num_threads: 4,
            values_num: vec![1, 10],
            tests: vec![ALL.to_string()],
            comms: vec![ALL.to_string()],
            types: vec![ALL.to_string()],
            chaos: ChaosConfiguration::default(),
        }
    }
}

/// Resolve `names` through `keyword` and `lookup`, dropping duplicates but keeping order.
fn select<T: PartialEq + Copy>(
    names: &[String],
    keyword: impl Fn(&str) -> Option<Vec<T>>,
    lookup: impl Fn(&str) -> SuiteResult<T>,
) -> SuiteResult<Vec<T>> {
    let mut selected = Vec::new();
    for name in names {
        let ids = match keyword(name) {
            Some(ids) => ids,
            None => vec![lookup(name)?],
        };
        for id in ids {
            if !selected.contains(&id) {
                selected.push(id);
            }
        }
    }
    Ok(selected)
}

impl SuiteConfig {
    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> SuiteResult<Self> {
        let config: SuiteConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as pretty JSON.
    pub fn to_json(&self) -> SuiteResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject configurations no run can satisfy.
    pub fn validate(&self) -> SuiteResult<()> {
        if self.num_ranks == 0 {
            return Err(SuiteError::Configuration("num_ranks must be at least 1".into()));
        }
        if self.num_threads == 0 {
            return Err(SuiteError::Configuration("num_threads must be at least 1".into()));
        }
        if self.values_num.is_empty() {
            return Err(SuiteError::Configuration("values_num must not be empty".into()));
        }
        Ok(())
    }

    /// Resolve names into a plan. Unknown names are configuration errors.
    pub fn plan(&self) -> SuiteResult<Plan> {
        self.validate()?;
        let registry = TypeRegistry::standard();

        let catalog = cases::catalog();
        let test_ids = select(
            &self.tests,
            |name| (name == ALL).then(|| catalog.iter().map(|t| t.id).collect()),
            |name| cases::find(name).map(|t| t.id),
        )?;
        let tests = catalog
            .iter()
            .filter(|t| test_ids.contains(&t.id))
            .cloned()
            .collect();

        let comms = select(
            &self.comms,
            |name| {
                let class = match name {
                    ALL => None,
                    "intra" => Some(CommClass::Intra),
                    "inter" => Some(CommClass::Inter),
                    _ => return None,
                };
                Some(
                    (0..COMM_COUNT)
                        .map(CommId)
                        .filter(|id| class.is_none() || comm_class(*id).ok() == class)
                        .collect(),
                )
            },
            comm_id,
        )?;

        let types = select(
            &self.types,
            |name| {
                let class = match name {
                    ALL => None,
                    "primitive" => Some(TypeClass::Primitive),
                    "struct" => Some(TypeClass::Struct),
                    _ => return None,
                };
                Some(
                    registry
                        .iter()
                        .filter(|t| class.is_none() || Some(t.class()) == class)
                        .map(|t| t.id)
                        .collect::<Vec<TypeId>>(),
                )
            },
            |name| registry.lookup(name),
        )?;

        let mut values_num = Vec::new();
        for n in &self.values_num {
            if !values_num.contains(n) {
                values_num.push(*n);
            }
        }

        Ok(Plan {
            tests,
            comms,
            types,
            values_num,
            num_threads: self.num_threads,
        })
    }

    /// Run the configuration on the local transport.
    pub fn run(&self) -> SuiteResult<SuiteReport> {
        let plan = self.plan()?;
        run_local(self.num_ranks, self.chaos.clone(), &plan)
    }
}

/// Run `plan` on a fresh local universe of `num_ranks` ranks.
#[instrument(skip(chaos, plan))]
pub fn run_local(
    num_ranks: usize,
    chaos: ChaosConfiguration,
    plan: &Plan,
) -> SuiteResult<SuiteReport> {
    let mut ids = HashSet::new();
    if let Some(duplicate) = plan.tests.iter().find(|t| !ids.insert(t.id)) {
        return Err(SuiteError::Configuration(format!(
            "test id {} used twice ({})",
            duplicate.id, duplicate.name
        )));
    }

    tracing::info!(
        activations = plan.activations().count(),
        "running suite"
    );
    let universe = LocalUniverse::new(num_ranks, chaos);
    let results = universe
        .run(|world| run_rank(world, plan))
        .map_err(|source| SuiteError::Transport { call: "run", source })?;

    let mut report = SuiteReport::aggregate(results);
    report.handles = Some(universe.handle_stats());
    report.traffic = Some(universe.traffic_stats());
    if report.is_success() {
        tracing::info!(passed = report.passed(), skipped = report.skipped(), "suite passed");
    } else {
        tracing::warn!(
            failed = report.failed(),
            rank_errors = report.rank_errors.len(),
            "suite failed"
        );
    }
    Ok(report)
}

/// Builder for suite runs on the local transport.
#[derive(Debug, Clone, Default)]
pub struct SuiteBuilder {
    config: SuiteConfig,
    custom_tests: Vec<TestDescriptor>,
    names_set: bool,
}

impl SuiteBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: SuiteConfig) -> Self {
        Self {
            config,
            custom_tests: Vec::new(),
            names_set: true,
        }
    }

    /// Number of ranks.
    pub fn ranks(mut self, num_ranks: usize) -> Self {
        self.config.num_ranks = num_ranks;
        self
    }

    /// Worker threads per rank for threaded tests.
    pub fn threads(mut self, num_threads: usize) -> Self {
        self.config.num_threads = num_threads;
        self
    }

    /// Element counts.
    pub fn values_num(mut self, values_num: impl IntoIterator<Item = usize>) -> Self {
        self.config.values_num = values_num.into_iter().collect();
        self
    }

    /// Catalog tests by name.
    pub fn tests<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.config.tests = names.into_iter().map(Into::into).collect();
        self.names_set = true;
        self
    }

    /// Communicators by name or keyword.
    pub fn comms<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.config.comms = names.into_iter().map(Into::into).collect();
        self
    }

    /// Types by name or keyword.
    pub fn types<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.config.types = names.into_iter().map(Into::into).collect();
        self
    }

    /// Fault injection settings.
    pub fn chaos(mut self, chaos: ChaosConfiguration) -> Self {
        self.config.chaos = chaos;
        self
    }

    /// Add a test that is not in the catalog.
    ///
    /// Unless [`SuiteBuilder::tests`] is also called, only custom tests run.
    pub fn test(mut self, descriptor: TestDescriptor) -> Self {
        self.custom_tests.push(descriptor);
        self
    }

    /// The configuration built so far.
    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    /// Resolve the plan without running it.
    pub fn plan(&self) -> SuiteResult<Plan> {
        let mut plan = if self.custom_tests.is_empty() || self.names_set {
            self.config.plan()?
        } else {
            SuiteConfig {
                tests: Vec::new(),
                ..self.config.clone()
            }
            .plan()?
        };
        plan.tests.extend(self.custom_tests.iter().cloned());
        Ok(plan)
    }

    /// Run on the local transport.
    pub fn run(self) -> SuiteResult<SuiteReport> {
        let plan = self.plan()?;
        run_local(self.config.num_ranks, self.config.chaos.clone(), &plan)
    }
}
