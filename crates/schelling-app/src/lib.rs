//! Application plumbing around the segregation model: scenarios, reports and history sinks.

pub mod history;
pub mod scenario;

pub use history::JsonLinesHistory;
pub use scenario::{Scenario, ScenarioReport, classic_scenarios, load_scenarios, run_scenario};
