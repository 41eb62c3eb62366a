//! Grid world descriptions and a seeded random generator.
//!
//! A [`GridSpec`] is the JSON description of one game board: obstacles,
//! material, repair points, and the start cell of every worker. Generated
//! boards place everything inside one connected region so that every
//! material and repair point is reachable from every start cell.

use std::collections::{HashSet, VecDeque};
use std::path::Path;

use anyhow::{bail, Context, Result};
use cnp_kernel::grid::{GridSize, Position};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

fn default_vision_radius() -> u32 {
    4
}

/// One game board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub obstacles: Vec<Position>,
    #[serde(default)]
    pub materials: Vec<Position>,
    #[serde(default)]
    pub repair_points: Vec<Position>,
    /// Start cell of each collector, in id order
    #[serde(default)]
    pub collectors: Vec<Position>,
    /// Start cell of each repairer, in id order
    #[serde(default)]
    pub repairers: Vec<Position>,
    /// Chebyshev radius within which workers see material
    #[serde(default = "default_vision_radius")]
    pub vision_radius: u32,
}

impl GridSpec {
    pub fn size(&self) -> GridSize {
        GridSize::new(self.width, self.height)
    }

    /// Reject boards the server cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.width <= 0 || self.height <= 0 {
            bail!("grid must be at least 1x1, got {}x{}", self.width, self.height);
        }
        let size = self.size();
        let obstacles: HashSet<Position> = self.obstacles.iter().copied().collect();

        let groups = [
            ("material", &self.materials),
            ("repair point", &self.repair_points),
            ("collector", &self.collectors),
            ("repairer", &self.repairers),
        ];
        for (label, cells) in groups {
            for cell in cells {
                if !size.contains(*cell) {
                    bail!("{label} at {cell} is outside the {}x{} grid", self.width, self.height);
                }
                if obstacles.contains(cell) {
                    bail!("{label} at {cell} overlaps an obstacle");
                }
            }
        }
        if let Some(cell) = self.obstacles.iter().find(|c| !size.contains(**c)) {
            bail!("obstacle at {cell} is outside the grid");
        }

        let materials: HashSet<_> = self.materials.iter().collect();
        if materials.len() != self.materials.len() {
            bail!("duplicate material positions");
        }
        let repair_points: HashSet<_> = self.repair_points.iter().collect();
        if repair_points.len() != self.repair_points.len() {
            bail!("duplicate repair point positions");
        }
        if self.collectors.is_empty() && self.repairers.is_empty() {
            bail!("grid has no workers");
        }
        Ok(())
    }

    /// Load and validate a spec from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading grid spec {}", path.display()))?;
        let spec: GridSpec = serde_json::from_str(&json)
            .with_context(|| format!("parsing grid spec {}", path.display()))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Random board from `config`.
    pub fn generate(config: GeneratorConfig) -> Result<Self> {
        GridGenerator::new(config).generate()
    }

    /// Save the spec as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Configuration for board generation.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub width: i32,
    pub height: i32,
    /// Fraction of cells turned into obstacles
    pub obstacle_density: f64,
    pub materials: usize,
    pub repair_points: usize,
    pub collectors: usize,
    pub repairers: usize,
    pub vision_radius: u32,
    /// Random seed for reproducibility (None for random)
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            width: 16,
            height: 16,
            obstacle_density: 0.15,
            materials: 6,
            repair_points: 4,
            collectors: 3,
            repairers: 2,
            vision_radius: default_vision_radius(),
            seed: None,
        }
    }
}

/// Random board generator.
pub struct GridGenerator {
    config: GeneratorConfig,
}

impl GridGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Generate a board with all items in one connected open region.
    pub fn generate(&self) -> Result<GridSpec> {
        let c = &self.config;
        if c.width <= 0 || c.height <= 0 {
            bail!("grid must be at least 1x1");
        }
        if !(0.0..1.0).contains(&c.obstacle_density) {
            bail!("obstacle density must be in [0, 1), got {}", c.obstacle_density);
        }

        let mut rng: Box<dyn RngCore> = match c.seed {
            Some(seed) => Box::new(StdRng::seed_from_u64(seed)),
            None => Box::new(rand::rng()),
        };

        let size = GridSize::new(c.width, c.height);
        let obstacles: HashSet<Position> = size
            .cells()
            .filter(|_| rng.random_bool(c.obstacle_density))
            .collect();

        let region = largest_open_region(size, &obstacles);
        let needed = c.materials + c.repair_points;
        if region.len() < needed.max(1) {
            bail!(
                "open region of {} cells cannot hold {} materials and repair points",
                region.len(),
                needed
            );
        }

        // Materials and repair points take distinct cells; workers may share.
        let mut cells = region.clone();
        cells.shuffle(&mut rng);
        let materials: Vec<Position> = cells.drain(..c.materials).collect();
        let repair_points: Vec<Position> = cells.drain(..c.repair_points).collect();

        let mut pick_start = |_| region[rng.random_range(0..region.len())];
        let collectors = (0..c.collectors).map(&mut pick_start).collect();
        let repairers = (0..c.repairers).map(&mut pick_start).collect();

        let mut obstacles: Vec<Position> = obstacles.into_iter().collect();
        obstacles.sort();

        let spec = GridSpec {
            width: c.width,
            height: c.height,
            obstacles,
            materials,
            repair_points,
            collectors,
            repairers,
            vision_radius: c.vision_radius,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Cells of the largest 8-connected obstacle-free region, in row order.
fn largest_open_region(size: GridSize, obstacles: &HashSet<Position>) -> Vec<Position> {
    let mut seen: HashSet<Position> = HashSet::new();
    let mut best: Vec<Position> = Vec::new();

    for start in size.cells() {
        if obstacles.contains(&start) || !seen.insert(start) {
            continue;
        }
        let mut region = vec![start];
        let mut queue = VecDeque::from([start]);
        while let Some(cell) = queue.pop_front() {
            for (_, next) in cell.neighbors(size) {
                if !obstacles.contains(&next) && seen.insert(next) {
                    region.push(next);
                    queue.push_back(next);
                }
            }
        }
        if region.len() > best.len() {
            best = region;
        }
    }

    best.sort_by_key(|p| (p.y, p.x));
    best
}
