//! Core types and dynamics for the Schelling segregation model.

use rand::{Rng, SeedableRng, rngs::SmallRng, seq::SliceRandom};
use schelling_index::GridNeighborhood;
pub use schelling_index::{Adjacency, IndexError, NeighborhoodIndex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Grid coordinate, `0 <= x < width` and `0 <= y < height`.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct Cell {
    pub x: u32,
    pub y: u32,
}

impl Cell {
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Race label in `0..num_races`.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct Race(pub u16);

impl Race {
    /// Index into per-race tables.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Number of relocation steps processed since construction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Step(pub u64);

impl Step {
    /// Returns the next sequential step.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Errors that can occur when constructing a model.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// Indicates an invalid configuration value. No model is produced.
    #[error("invalid configuration: {0}")]
    Configuration(&'static str),
    /// The adjacency table could not be built for the requested grid.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// How races are handed out to the occupied cells at initialization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum RaceAssignment {
    /// Each agent draws its race independently and uniformly.
    #[default]
    Uniform,
    /// Races are dealt round-robin over the shuffled occupied cells, so
    /// populations differ by at most one.
    Balanced,
}

/// Order in which occupied cells are visited during a step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ScanOrder {
    /// Occupied cells in row-major order as of the start of the step.
    #[default]
    RowMajor,
    /// A fresh uniform permutation of the occupied cells every step.
    Shuffled,
}

/// Static configuration for a segregation model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchellingConfig {
    /// Grid width in cells.
    pub width: u32,
    /// Grid height in cells.
    pub height: u32,
    /// Minimum like-race fraction among occupied neighbors, in `[0, 1]`.
    pub tolerance: f64,
    /// Fraction of cells left vacant, in `[0, 1)`.
    pub ratio_empty: f64,
    /// Number of races; must be at least two.
    pub num_races: u16,
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
    /// Adjacency used by the satisfaction rule.
    pub neighborhood: Adjacency,
    pub race_assignment: RaceAssignment,
    pub scan_order: ScanOrder,
    /// Maximum number of recent step summaries retained in memory.
    pub history_capacity: usize,
    /// Interval (steps) between persistence callbacks. 0 disables persistence.
    pub persistence_interval: u32,
}

impl Default for SchellingConfig {
    fn default() -> Self {
        Self {
            width: 50,
            height: 50,
            tolerance: 0.3,
            ratio_empty: 0.3,
            num_races: 2,
            rng_seed: None,
            neighborhood: Adjacency::Moore,
            race_assignment: RaceAssignment::Uniform,
            scan_order: ScanOrder::RowMajor,
            history_capacity: 1_024,
            persistence_interval: 0,
        }
    }
}

impl SchellingConfig {
    /// `(width, height)` of the grid.
    #[must_use]
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Validates the configuration, returning the total number of cells.
    pub fn validate(&self) -> Result<usize, ModelError> {
        if self.width == 0 || self.height == 0 {
            return Err(ModelError::Configuration(
                "grid dimensions must be non-zero",
            ));
        }
        let cells = (self.width as usize)
            .checked_mul(self.height as usize)
            .ok_or(ModelError::Configuration("grid cell count overflows usize"))?;
        if !(0.0..1.0).contains(&self.ratio_empty) {
            return Err(ModelError::Configuration("ratio_empty must be in [0, 1)"));
        }
        if !(0.0..=1.0).contains(&self.tolerance) {
            return Err(ModelError::Configuration("tolerance must be in [0, 1]"));
        }
        if self.num_races < 2 {
            return Err(ModelError::Configuration("num_races must be at least 2"));
        }
        if self.history_capacity == 0 {
            return Err(ModelError::Configuration(
                "history_capacity must be non-zero",
            ));
        }
        Ok(cells)
    }

    /// Number of cells left empty for a grid of `cells` cells.
    #[must_use]
    pub fn empty_cell_count(&self, cells: usize) -> usize {
        ((self.ratio_empty * cells as f64).round() as usize).min(cells)
    }

    /// Returns the configured seed (or one drawn from entropy) and an RNG built from it.
    fn seeded_rng(&self) -> (u64, SmallRng) {
        let seed = self.rng_seed.unwrap_or_else(rand::random::<u64>);
        (seed, SmallRng::seed_from_u64(seed))
    }
}

/// Occupied-neighbor counts around one agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NeighborTally {
    /// Occupied neighbors sharing the agent's race.
    pub similar: usize,
    /// All occupied neighbors. Empty cells never count.
    pub occupied: usize,
}

impl NeighborTally {
    /// Like-race fraction, or `None` when no neighbor is occupied.
    #[must_use]
    pub fn similarity(self) -> Option<f64> {
        (self.occupied > 0).then(|| self.similar as f64 / self.occupied as f64)
    }

    /// Satisfaction rule: an agent without occupied neighbors is always satisfied.
    #[must_use]
    pub fn satisfies(self, tolerance: f64) -> bool {
        self.similarity().is_none_or(|fraction| fraction >= tolerance)
    }
}

/// Owned, read-only copy of the grid for rendering and export collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GridSnapshot {
    pub width: u32,
    pub height: u32,
    /// Row-major occupants, `None` for empty cells.
    pub cells: Vec<Option<Race>>,
}

impl GridSnapshot {
    /// Occupant at `cell`; `None` when empty or out of bounds.
    #[must_use]
    pub fn get(&self, cell: Cell) -> Option<Race> {
        if cell.x >= self.width || cell.y >= self.height {
            return None;
        }
        let offset = cell.y as usize * self.width as usize + cell.x as usize;
        self.cells.get(offset).copied().flatten()
    }

    /// Iterate every coordinate with its occupant.
    pub fn iter(&self) -> impl Iterator<Item = (Cell, Option<Race>)> + '_ {
        let width = self.width.max(1) as usize;
        self.cells.iter().enumerate().map(move |(offset, race)| {
            let cell = Cell::new((offset % width) as u32, (offset / width) as u32);
            (cell, *race)
        })
    }

    /// Population per race for `num_races` races; out-of-range labels are ignored.
    #[must_use]
    pub fn race_counts(&self, num_races: u16) -> Vec<usize> {
        let mut counts = vec![0; num_races as usize];
        for race in self.cells.iter().flatten() {
            if let Some(count) = counts.get_mut(race.index()) {
                *count += 1;
            }
        }
        counts
    }

    /// Number of empty cells.
    #[must_use]
    pub fn empty_count(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_none()).count()
    }
}

/// Summary recorded after each relocation step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StepSummary {
    pub step: Step,
    /// Agents relocated during the step.
    pub moved: usize,
    /// Agents evaluated as unsatisfied during the step.
    pub unsatisfied: usize,
    /// Unsatisfied agents that could not move because no cell was vacant.
    pub stuck: usize,
    /// Mean like-race neighbor fraction after the step.
    pub mean_similarity: f64,
}

/// Why [`SegregationModel::run`] stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// A step found every agent satisfied.
    Converged,
    /// Agents remain unsatisfied but none can move; further steps are no-ops.
    Stalled,
    /// The step cap was hit before convergence.
    ConvergenceLimitReached,
}

/// Result of a bounded run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunOutcome {
    pub steps_taken: u64,
    pub converged: bool,
    pub reason: StopReason,
}

/// Persistence sink invoked after steps.
pub trait StepPersistence: Send {
    fn on_step(&mut self, summary: &StepSummary);
}

/// No-op persistence sink.
#[derive(Debug, Default)]
pub struct NullPersistence;

impl StepPersistence for NullPersistence {
    fn on_step(&mut self, _summary: &StepSummary) {}
}

/// Grid, agent population and relocation dynamics of one simulation.
///
/// The grid maps each row-major cell offset to its occupant. `empty` holds
/// exactly the offsets whose cell is `None`, in no particular order, so a
/// destination can be sampled in constant time.
pub struct SegregationModel {
    config: SchellingConfig,
    seed: u64,
    rng: SmallRng,
    step: Step,
    neighborhood: GridNeighborhood,
    cells: Vec<Option<Race>>,
    empty: Vec<usize>,
    race_counts: Vec<usize>,
    scan_scratch: Vec<usize>,
    persistence: Box<dyn StepPersistence>,
    history: VecDeque<StepSummary>,
}

impl fmt::Debug for SegregationModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegregationModel")
            .field("config", &self.config)
            .field("seed", &self.seed)
            .field("step", &self.step)
            .field("occupied", &self.occupied_count())
            .field("empty", &self.empty.len())
            .finish()
    }
}

impl SegregationModel {
    /// Build and randomly populate a model from the supplied configuration.
    pub fn new(config: SchellingConfig) -> Result<Self, ModelError> {
        Self::with_persistence(config, Box::new(NullPersistence))
    }

    /// Build and randomly populate a model that reports to `persistence`.
    ///
    /// Cell assignment is a uniform permutation of all coordinates: the first
    /// `round(ratio_empty * width * height)` become empty, the rest receive
    /// agents.
    pub fn with_persistence(
        config: SchellingConfig,
        persistence: Box<dyn StepPersistence>,
    ) -> Result<Self, ModelError> {
        let total = config.validate()?;
        let (seed, mut rng) = config.seeded_rng();

        let mut order: Vec<usize> = (0..total).collect();
        order.shuffle(&mut rng);
        let empty_target = config.empty_cell_count(total);

        let mut cells = vec![None; total];
        for (dealt, &offset) in order[empty_target..].iter().enumerate() {
            let race = match config.race_assignment {
                RaceAssignment::Uniform => Race(rng.random_range(0..config.num_races)),
                RaceAssignment::Balanced => Race((dealt % config.num_races as usize) as u16),
            };
            cells[offset] = Some(race);
        }
        order.truncate(empty_target);

        Self::assemble(config, seed, rng, cells, order, persistence)
    }

    /// Restore a model from a grid snapshot instead of a random placement.
    ///
    /// `ratio_empty` is validated but the vacancy count comes from the snapshot.
    pub fn from_snapshot(
        config: SchellingConfig,
        snapshot: &GridSnapshot,
    ) -> Result<Self, ModelError> {
        let total = config.validate()?;
        if snapshot.width != config.width
            || snapshot.height != config.height
            || snapshot.cells.len() != total
        {
            return Err(ModelError::Configuration(
                "snapshot dimensions must match configuration",
            ));
        }
        if snapshot
            .cells
            .iter()
            .flatten()
            .any(|race| race.0 >= config.num_races)
        {
            return Err(ModelError::Configuration(
                "snapshot race must be below num_races",
            ));
        }
        let (seed, rng) = config.seeded_rng();
        let empty = snapshot
            .cells
            .iter()
            .enumerate()
            .filter_map(|(offset, cell)| cell.is_none().then_some(offset))
            .collect();
        Self::assemble(
            config,
            seed,
            rng,
            snapshot.cells.clone(),
            empty,
            Box::new(NullPersistence),
        )
    }

    fn assemble(
        config: SchellingConfig,
        seed: u64,
        rng: SmallRng,
        cells: Vec<Option<Race>>,
        empty: Vec<usize>,
        persistence: Box<dyn StepPersistence>,
    ) -> Result<Self, ModelError> {
        let neighborhood =
            GridNeighborhood::build(config.neighborhood, config.width, config.height)?;
        let mut race_counts = vec![0; config.num_races as usize];
        for race in cells.iter().flatten() {
            race_counts[race.index()] += 1;
        }
        let history_capacity = config.history_capacity;
        let model = Self {
            config,
            seed,
            rng,
            step: Step::zero(),
            neighborhood,
            scan_scratch: Vec::with_capacity(cells.len() - empty.len()),
            cells,
            empty,
            race_counts,
            persistence,
            history: VecDeque::with_capacity(history_capacity.min(4_096)),
        };
        debug!(
            width = model.config.width,
            height = model.config.height,
            agents = model.occupied_count(),
            empty = model.empty.len(),
            seed = model.seed,
            "segregation model created"
        );
        Ok(model)
    }

    #[inline]
    fn offset(&self, cell: Cell) -> Option<usize> {
        (cell.x < self.config.width && cell.y < self.config.height)
            .then(|| cell.y as usize * self.config.width as usize + cell.x as usize)
    }

    #[inline]
    fn cell_at(&self, offset: usize) -> Cell {
        let width = self.config.width as usize;
        Cell::new((offset % width) as u32, (offset / width) as u32)
    }

    fn tally(&self, offset: usize, race: Race) -> NeighborTally {
        let mut tally = NeighborTally::default();
        for &neighbor in self.neighborhood.neighbors(offset) {
            if let Some(other) = self.cells[neighbor] {
                tally.occupied += 1;
                if other == race {
                    tally.similar += 1;
                }
            }
        }
        tally
    }

    /// Move the agent at `from` to a uniformly chosen vacancy.
    ///
    /// The vacated cell takes the destination's slot in the empty set, so the
    /// grid and the set change together and the vacancy count is unchanged.
    fn relocate(&mut self, from: usize) -> Option<usize> {
        if self.empty.is_empty() {
            return None;
        }
        let slot = self.rng.random_range(0..self.empty.len());
        let to = self.empty[slot];
        self.cells[to] = self.cells[from].take();
        self.empty[slot] = from;
        Some(to)
    }

    fn stage_relocation(&mut self) -> (usize, usize, usize) {
        let mut scan = std::mem::take(&mut self.scan_scratch);
        scan.clear();
        scan.extend(
            self.cells
                .iter()
                .enumerate()
                .filter_map(|(offset, cell)| cell.is_some().then_some(offset)),
        );
        if self.config.scan_order == ScanOrder::Shuffled {
            scan.shuffle(&mut self.rng);
        }

        let (mut moved, mut unsatisfied, mut stuck) = (0, 0, 0);
        // Each scanned cell still holds its original agent when visited: only
        // that agent can vacate it, and nobody moves into an occupied cell.
        for &offset in &scan {
            let Some(race) = self.cells[offset] else {
                continue;
            };
            if self.tally(offset, race).satisfies(self.config.tolerance) {
                continue;
            }
            unsatisfied += 1;
            match self.relocate(offset) {
                Some(_) => moved += 1,
                None => stuck += 1,
            }
        }
        self.scan_scratch = scan;
        (moved, unsatisfied, stuck)
    }

    fn stage_persistence(&mut self, summary: StepSummary) {
        let interval = self.config.persistence_interval;
        if interval > 0 && summary.step.0.is_multiple_of(u64::from(interval)) {
            self.persistence.on_step(&summary);
        }
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
    }

    /// Execute one full relocation pass and return its summary.
    pub fn advance(&mut self) -> StepSummary {
        let next = self.step.next();
        let (moved, unsatisfied, stuck) = self.stage_relocation();
        self.step = next;
        let summary = StepSummary {
            step: next,
            moved,
            unsatisfied,
            stuck,
            mean_similarity: self.mean_similarity(),
        };
        trace!(step = next.0, moved, unsatisfied, stuck, "step complete");
        self.stage_persistence(summary);
        summary
    }

    /// Execute one relocation pass, returning how many agents moved.
    pub fn step(&mut self) -> usize {
        self.advance().moved
    }

    /// Step until every agent is satisfied, the grid stalls, or `max_steps` passes.
    pub fn run(&mut self, max_steps: u64) -> RunOutcome {
        let mut steps_taken = 0;
        let mut reason = StopReason::ConvergenceLimitReached;
        while steps_taken < max_steps {
            let summary = self.advance();
            steps_taken += 1;
            if summary.unsatisfied == 0 {
                reason = StopReason::Converged;
                break;
            }
            if summary.moved == 0 {
                reason = StopReason::Stalled;
                break;
            }
        }
        let converged = reason == StopReason::Converged;
        info!(steps_taken, converged, ?reason, "run complete");
        RunOutcome {
            steps_taken,
            converged,
            reason,
        }
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &SchellingConfig {
        &self.config
    }

    /// Seed the model RNG was built from; replaying it reproduces the run.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Steps processed so far.
    #[must_use]
    pub const fn step_index(&self) -> Step {
        self.step
    }

    /// Replace the persistence sink.
    pub fn set_persistence(&mut self, persistence: Box<dyn StepPersistence>) {
        self.persistence = persistence;
    }

    /// Occupant at `cell`; `None` when empty or out of bounds.
    #[must_use]
    pub fn occupant(&self, cell: Cell) -> Option<Race> {
        self.offset(cell).and_then(|offset| self.cells[offset])
    }

    /// Occupied-neighbor counts for the agent at `cell`, if any.
    #[must_use]
    pub fn neighbor_tally(&self, cell: Cell) -> Option<NeighborTally> {
        let offset = self.offset(cell)?;
        let race = self.cells[offset]?;
        Some(self.tally(offset, race))
    }

    /// Whether the agent at `cell` is satisfied; `None` for empty or out-of-bounds cells.
    #[must_use]
    pub fn is_satisfied(&self, cell: Cell) -> Option<bool> {
        self.neighbor_tally(cell)
            .map(|tally| tally.satisfies(self.config.tolerance))
    }

    /// Like-race fraction around the agent at `cell`, if it has occupied neighbors.
    #[must_use]
    pub fn similarity(&self, cell: Cell) -> Option<f64> {
        self.neighbor_tally(cell)?.similarity()
    }

    /// Number of agents currently unsatisfied.
    #[must_use]
    pub fn unsatisfied_count(&self) -> usize {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(offset, cell)| cell.map(|race| self.tally(offset, race)))
            .filter(|tally| !tally.satisfies(self.config.tolerance))
            .count()
    }

    /// Mean like-race fraction over agents with at least one occupied neighbor.
    ///
    /// Returns 1.0 when no agent has an occupied neighbor.
    #[must_use]
    pub fn mean_similarity(&self) -> f64 {
        let (sum, counted) = self
            .cells
            .iter()
            .enumerate()
            .filter_map(|(offset, cell)| cell.map(|race| self.tally(offset, race)))
            .filter_map(NeighborTally::similarity)
            .fold((0.0, 0usize), |(sum, n), fraction| (sum + fraction, n + 1));
        if counted == 0 { 1.0 } else { sum / counted as f64 }
    }

    /// Copy of the current grid.
    #[must_use]
    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            width: self.config.width,
            height: self.config.height,
            cells: self.cells.clone(),
        }
    }

    /// Population per race, indexed by [`Race::index`].
    #[must_use]
    pub fn race_counts(&self) -> &[usize] {
        &self.race_counts
    }

    #[must_use]
    pub fn empty_count(&self) -> usize {
        self.empty.len()
    }

    #[must_use]
    pub fn occupied_count(&self) -> usize {
        self.cells.len() - self.empty.len()
    }

    /// Current vacancies, in no particular order.
    pub fn empty_cells(&self) -> impl Iterator<Item = Cell> + '_ {
        self.empty.iter().map(|&offset| self.cell_at(offset))
    }

    /// Iterate over retained step summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &StepSummary> {
        self.history.iter()
    }

    /// Agents moved per retained step, oldest first.
    pub fn moves_per_step(&self) -> impl Iterator<Item = usize> + '_ {
        self.history.iter().map(|summary| summary.moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn seeded(seed: u64) -> SchellingConfig {
        SchellingConfig {
            width: 12,
            height: 10,
            tolerance: 0.5,
            ratio_empty: 0.2,
            rng_seed: Some(seed),
            ..SchellingConfig::default()
        }
    }

    fn grid(width: u32, height: u32, rows: &[&str]) -> GridSnapshot {
        let cells = rows
            .iter()
            .flat_map(|row| row.chars())
            .map(|c| c.to_digit(10).map(|race| Race(race as u16)))
            .collect();
        GridSnapshot {
            width,
            height,
            cells,
        }
    }

    fn assert_consistent(model: &SegregationModel) {
        let snapshot = model.snapshot();
        let mut empties: Vec<Cell> = model.empty_cells().collect();
        empties.sort();
        let mut expected: Vec<Cell> = snapshot
            .iter()
            .filter(|(_, race)| race.is_none())
            .map(|(cell, _)| cell)
            .collect();
        expected.sort();
        assert_eq!(empties, expected, "empty set out of sync with grid");
        assert_eq!(
            snapshot.race_counts(model.config().num_races),
            model.race_counts()
        );
    }

    #[test]
    fn rejects_invalid_configuration() {
        let cases = [
            SchellingConfig {
                width: 0,
                ..SchellingConfig::default()
            },
            SchellingConfig {
                height: 0,
                ..SchellingConfig::default()
            },
            SchellingConfig {
                ratio_empty: 1.0,
                ..SchellingConfig::default()
            },
            SchellingConfig {
                ratio_empty: -0.1,
                ..SchellingConfig::default()
            },
            SchellingConfig {
                ratio_empty: f64::NAN,
                ..SchellingConfig::default()
            },
            SchellingConfig {
                num_races: 1,
                ..SchellingConfig::default()
            },
            SchellingConfig {
                tolerance: 1.5,
                ..SchellingConfig::default()
            },
            SchellingConfig {
                history_capacity: 0,
                ..SchellingConfig::default()
            },
        ];
        for config in cases {
            let err = SegregationModel::new(config.clone()).expect_err("invalid config accepted");
            assert!(
                matches!(err, ModelError::Configuration(_)),
                "unexpected error {err:?} for {config:?}"
            );
        }
    }

    #[test]
    fn initialises_expected_vacancies() {
        let model = SegregationModel::new(seeded(7)).expect("model");
        assert_eq!(model.empty_count(), 24);
        assert_eq!(model.occupied_count(), 96);
        assert_eq!(model.race_counts().iter().sum::<usize>(), 96);
        assert_eq!(model.step_index(), Step::zero());
        assert_eq!(model.seed(), 7);
        assert_consistent(&model);
    }

    #[test]
    fn balanced_assignment_evens_out_populations() {
        let config = SchellingConfig {
            num_races: 3,
            race_assignment: RaceAssignment::Balanced,
            ..seeded(3)
        };
        let model = SegregationModel::new(config).expect("model");
        assert_eq!(model.race_counts(), &[32, 32, 32]);
    }

    #[test]
    fn tally_counts_only_occupied_neighbors() {
        let snapshot = grid(3, 3, &["0.1", "001", "1.."]);
        let config = SchellingConfig {
            width: 3,
            height: 3,
            tolerance: 0.5,
            ..SchellingConfig::default()
        };
        let model = SegregationModel::from_snapshot(config, &snapshot).expect("model");
        let centre = model.neighbor_tally(Cell::new(1, 1)).expect("occupied");
        assert_eq!(
            centre,
            NeighborTally {
                similar: 2,
                occupied: 5
            }
        );
        assert_eq!(model.is_satisfied(Cell::new(1, 1)), Some(false));
        // corner (0,0): neighbours (1,0)=empty, (0,1)=0, (1,1)=0
        assert_eq!(model.similarity(Cell::new(0, 0)), Some(1.0));
        assert_eq!(model.is_satisfied(Cell::new(1, 0)), None);
        assert_eq!(model.is_satisfied(Cell::new(9, 9)), None);
    }

    #[test]
    fn agent_without_neighbors_is_satisfied() {
        let tally = NeighborTally::default();
        assert_eq!(tally.similarity(), None);
        assert!(tally.satisfies(1.0));

        let snapshot = grid(3, 3, &["0..", "...", "..1"]);
        let config = SchellingConfig {
            width: 3,
            height: 3,
            tolerance: 1.0,
            ..SchellingConfig::default()
        };
        let mut model = SegregationModel::from_snapshot(config, &snapshot).expect("model");
        assert_eq!(model.unsatisfied_count(), 0);
        assert_eq!(model.mean_similarity(), 1.0);
        assert_eq!(model.step(), 0);
    }

    #[test]
    fn tolerance_boundary_is_inclusive() {
        let tally = NeighborTally {
            similar: 1,
            occupied: 2,
        };
        assert!(tally.satisfies(0.5));
        assert!(!tally.satisfies(0.51));
    }

    #[test]
    fn von_neumann_ignores_diagonals() {
        let snapshot = grid(3, 3, &["1.1", ".0.", "1.1"]);
        let config = SchellingConfig {
            width: 3,
            height: 3,
            tolerance: 1.0,
            neighborhood: Adjacency::VonNeumann,
            ..SchellingConfig::default()
        };
        let model = SegregationModel::from_snapshot(config, &snapshot).expect("model");
        assert_eq!(model.is_satisfied(Cell::new(1, 1)), Some(true));
        assert_eq!(model.unsatisfied_count(), 0);
    }

    #[test]
    fn step_moves_unsatisfied_agent_into_vacancy() {
        let snapshot = grid(3, 1, &["01."]);
        let config = SchellingConfig {
            width: 3,
            height: 1,
            tolerance: 1.0,
            rng_seed: Some(1),
            ..SchellingConfig::default()
        };
        let mut model = SegregationModel::from_snapshot(config, &snapshot).expect("model");
        // race 0 leaves x=0 for the only vacancy, which strands race 1 next to
        // it; race 1 then takes the freshly vacated x=0.
        assert_eq!(model.step(), 2);
        assert_eq!(model.occupant(Cell::new(0, 0)), Some(Race(1)));
        assert_eq!(model.occupant(Cell::new(1, 0)), None);
        assert_eq!(model.occupant(Cell::new(2, 0)), Some(Race(0)));
        assert_eq!(model.empty_cells().collect::<Vec<_>>(), vec![Cell::new(1, 0)]);
        assert_consistent(&model);
    }

    #[test]
    fn full_grid_stalls_instead_of_converging() {
        let snapshot = grid(2, 2, &["01", "10"]);
        let config = SchellingConfig {
            width: 2,
            height: 2,
            tolerance: 0.9,
            ratio_empty: 0.0,
            ..SchellingConfig::default()
        };
        let mut model = SegregationModel::from_snapshot(config, &snapshot).expect("model");
        let outcome = model.run(50);
        assert_eq!(outcome.reason, StopReason::Stalled);
        assert!(!outcome.converged);
        assert_eq!(outcome.steps_taken, 1);
        let last = model.history().last().copied().expect("summary");
        assert_eq!(last.stuck, 4);
        assert_eq!(last.moved, 0);
    }

    #[test]
    fn zero_step_budget_reports_limit() {
        let mut model = SegregationModel::new(seeded(5)).expect("model");
        let outcome = model.run(0);
        assert_eq!(outcome.steps_taken, 0);
        assert_eq!(outcome.reason, StopReason::ConvergenceLimitReached);
        assert_eq!(model.history().count(), 0);
    }

    #[test]
    fn history_is_bounded() {
        let config = SchellingConfig {
            tolerance: 1.0,
            history_capacity: 4,
            ..seeded(11)
        };
        let mut model = SegregationModel::new(config).expect("model");
        for _ in 0..10 {
            model.step();
        }
        let steps: Vec<u64> = model.history().map(|summary| summary.step.0).collect();
        assert_eq!(steps, vec![7, 8, 9, 10]);
        assert_eq!(model.moves_per_step().count(), 4);
    }

    #[test]
    fn persistence_receives_interval_steps() {
        #[derive(Clone, Default)]
        struct Recorder(Arc<Mutex<Vec<u64>>>);

        impl StepPersistence for Recorder {
            fn on_step(&mut self, summary: &StepSummary) {
                self.0.lock().expect("lock").push(summary.step.0);
            }
        }

        let recorder = Recorder::default();
        let config = SchellingConfig {
            tolerance: 1.0,
            persistence_interval: 3,
            ..seeded(13)
        };
        let mut model =
            SegregationModel::with_persistence(config, Box::new(recorder.clone())).expect("model");
        for _ in 0..7 {
            model.step();
        }
        assert_eq!(*recorder.0.lock().expect("lock"), vec![3, 6]);
    }

    #[test]
    fn snapshot_rejects_mismatched_input() {
        let config = SchellingConfig {
            width: 2,
            height: 2,
            ..SchellingConfig::default()
        };
        let wrong_size = grid(3, 1, &["0.1"]);
        assert_eq!(
            SegregationModel::from_snapshot(config.clone(), &wrong_size).unwrap_err(),
            ModelError::Configuration("snapshot dimensions must match configuration")
        );
        let bad_race = grid(2, 2, &["05", ".."]);
        assert!(SegregationModel::from_snapshot(config, &bad_race).is_err());
    }
}
