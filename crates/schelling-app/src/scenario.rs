//! Named simulation scenarios and the reports produced by running them.

use std::path::Path;

use anyhow::{Context, Result};
use schelling_core::{
    RunOutcome, SchellingConfig, SegregationModel, StepPersistence, StopReason,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Step cap applied when a scenario does not set one.
pub const DEFAULT_MAX_STEPS: u64 = 500;

fn default_max_steps() -> u64 {
    DEFAULT_MAX_STEPS
}

/// A configuration to run plus its step cap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scenario {
    pub name: String,
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,
    #[serde(default)]
    pub config: SchellingConfig,
}

/// Outcome and statistics of one scenario run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioReport {
    pub name: String,
    pub seed: u64,
    pub outcome: RunOutcome,
    pub agents: usize,
    pub empty: usize,
    pub race_counts: Vec<usize>,
    pub initial_similarity: f64,
    pub final_similarity: f64,
    pub unsatisfied: usize,
    /// Moves per retained step, oldest first.
    pub moves_per_step: Vec<usize>,
}

/// Two races on a 50x50 grid with 30% vacancies at tolerances 0.3, 0.5 and 0.8.
#[must_use]
pub fn classic_scenarios() -> Vec<Scenario> {
    [0.3, 0.5, 0.8]
        .into_iter()
        .map(|tolerance| Scenario {
            name: format!("two-races-tolerance-{:.0}", tolerance * 100.0),
            max_steps: DEFAULT_MAX_STEPS,
            config: SchellingConfig {
                width: 50,
                height: 50,
                ratio_empty: 0.3,
                tolerance,
                num_races: 2,
                ..SchellingConfig::default()
            },
        })
        .collect()
}

/// Load scenarios from a JSON file holding either one scenario or an array of them.
pub fn load_scenarios(path: &Path) -> Result<Vec<Scenario>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario file {}", path.display()))?;
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<Scenario>),
        One(Scenario),
    }
    let parsed: OneOrMany = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse scenario file {}", path.display()))?;
    let scenarios = match parsed {
        OneOrMany::Many(list) => list,
        OneOrMany::One(single) => vec![single],
    };
    if scenarios.is_empty() {
        anyhow::bail!("scenario file {} lists no scenarios", path.display());
    }
    Ok(scenarios)
}

/// Build, run and summarise one scenario.
pub fn run_scenario(
    scenario: &Scenario,
    persistence: Option<Box<dyn StepPersistence>>,
) -> Result<ScenarioReport> {
    let mut model = match persistence {
        Some(sink) => SegregationModel::with_persistence(scenario.config.clone(), sink),
        None => SegregationModel::new(scenario.config.clone()),
    }
    .with_context(|| format!("invalid configuration for scenario {}", scenario.name))?;

    let initial_similarity = model.mean_similarity();
    info!(
        scenario = %scenario.name,
        seed = model.seed(),
        agents = model.occupied_count(),
        empty = model.empty_count(),
        initial_similarity,
        "scenario starting"
    );

    let outcome = model.run(scenario.max_steps);
    let report = ScenarioReport {
        name: scenario.name.clone(),
        seed: model.seed(),
        outcome,
        agents: model.occupied_count(),
        empty: model.empty_count(),
        race_counts: model.race_counts().to_vec(),
        initial_similarity,
        final_similarity: model.mean_similarity(),
        unsatisfied: model.unsatisfied_count(),
        moves_per_step: model.moves_per_step().collect(),
    };

    match outcome.reason {
        StopReason::Converged => info!(
            scenario = %report.name,
            steps = outcome.steps_taken,
            final_similarity = report.final_similarity,
            "scenario converged"
        ),
        StopReason::Stalled => warn!(
            scenario = %report.name,
            steps = outcome.steps_taken,
            unsatisfied = report.unsatisfied,
            "scenario stalled with no vacancies left"
        ),
        StopReason::ConvergenceLimitReached => warn!(
            scenario = %report.name,
            steps = outcome.steps_taken,
            unsatisfied = report.unsatisfied,
            "scenario hit its step cap before converging"
        ),
    }
    Ok(report)
}
