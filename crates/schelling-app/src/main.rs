use std::path::PathBuf;

use anyhow::{Context, Result};
use schelling_app::{
    JsonLinesHistory, Scenario, classic_scenarios, load_scenarios, run_scenario,
};
use schelling_core::StepPersistence;
use tracing::{info, warn};

/// Optional JSON scenario file (one scenario or an array).
const CONFIG_ENV: &str = "SCHELLING_CONFIG";
/// Overrides every scenario's step cap.
const MAX_STEPS_ENV: &str = "SCHELLING_MAX_STEPS";
/// Directory receiving one `<scenario>.jsonl` step history per scenario.
const HISTORY_DIR_ENV: &str = "SCHELLING_HISTORY_DIR";

fn main() -> Result<()> {
    init_tracing();
    let mut scenarios = bootstrap_scenarios()?;
    let history_dir = std::env::var_os(HISTORY_DIR_ENV).map(PathBuf::from);
    if let Some(dir) = &history_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create history directory {}", dir.display()))?;
        // a history directory with persistence disabled would stay empty
        for scenario in &mut scenarios {
            if scenario.config.persistence_interval == 0 {
                scenario.config.persistence_interval = 1;
            }
        }
    }

    info!(scenarios = scenarios.len(), "Starting Schelling segregation runs");
    for scenario in &scenarios {
        let persistence = match &history_dir {
            Some(dir) => Some(history_sink(dir, scenario)?),
            None => None,
        };
        let report = run_scenario(scenario, persistence)?;
        println!(
            "{}",
            serde_json::to_string(&report).context("failed to encode scenario report")?
        );
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn bootstrap_scenarios() -> Result<Vec<Scenario>> {
    let mut scenarios = match std::env::var_os(CONFIG_ENV) {
        Some(path) => load_scenarios(&PathBuf::from(path))?,
        None => {
            warn!("{CONFIG_ENV} not set; running the classic two-race scenarios");
            classic_scenarios()
        }
    };

    if let Ok(raw) = std::env::var(MAX_STEPS_ENV) {
        let max_steps: u64 = raw
            .trim()
            .parse()
            .with_context(|| format!("{MAX_STEPS_ENV} must be a non-negative integer"))?;
        for scenario in &mut scenarios {
            scenario.max_steps = max_steps;
        }
    }
    Ok(scenarios)
}

fn history_sink(dir: &std::path::Path, scenario: &Scenario) -> Result<Box<dyn StepPersistence>> {
    let path = dir.join(format!("{}.jsonl", scenario.name));
    let sink = JsonLinesHistory::create(&path)
        .with_context(|| format!("failed to open step history {}", path.display()))?;
    Ok(Box::new(sink))
}
