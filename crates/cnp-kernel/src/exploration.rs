//! Collector search strategies.
//!
//! Two policies are supported:
//!
//! - **Vision-only**: head for the nearest material currently in view, else
//!   take a random step.
//! - **Frontier**: remember every visited cell and every material ever seen.
//!   Go to the nearest remembered material; failing that, go to the nearest
//!   frontier cell (an unvisited, non-obstacle neighbour of a visited cell);
//!   failing that, take a random step.
//!
//! Both policies skip material positions where a TAKE recently failed for a
//! fixed number of turns.

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ExplorationConfig;
use crate::grid::{GridSize, Position, WorkerAction};
use crate::pathfinder::{find_path_with, Heuristic, Path};

/// Which search strategy a collector runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorationPolicy {
    VisionOnly,
    #[default]
    Frontier,
}

impl ExplorationPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::VisionOnly => "vision_only",
            Self::Frontier => "frontier",
        }
    }
}

/// What the explorer wants to do this turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplorationStep {
    /// Standing on material: pick it up
    Take,
    /// Follow `path` (never empty) to `target`
    Travel { target: Position, path: Path },
    /// Random step to a free neighbour
    Wander(WorkerAction),
    /// Boxed in, nothing to do
    Stay,
}

/// Search memory for one collector.
#[derive(Debug, Clone)]
pub struct Explorer {
    policy: ExplorationPolicy,
    heuristic: Heuristic,
    cooldown_turns: u64,
    visited: HashSet<Position>,
    known_materials: HashSet<Position>,
    /// Material position -> first turn it may be considered again
    failed_sources: HashMap<Position, u64>,
}

impl Explorer {
    pub fn new(config: &ExplorationConfig) -> Self {
        Self {
            policy: config.policy,
            heuristic: config.heuristic,
            cooldown_turns: config.failed_source_cooldown_turns,
            visited: HashSet::new(),
            known_materials: HashSet::new(),
            failed_sources: HashMap::new(),
        }
    }

    pub fn policy(&self) -> ExplorationPolicy {
        self.policy
    }

    pub fn visited(&self) -> &HashSet<Position> {
        &self.visited
    }

    pub fn known_materials(&self) -> &HashSet<Position> {
        &self.known_materials
    }

    /// Record the worker's cell and the material it can see this turn.
    pub fn observe(&mut self, position: Position, turn: u64, vision: &[Position]) {
        self.visited.insert(position);
        self.expire_cooldowns(turn);
        for material in vision {
            if !self.failed_sources.contains_key(material) {
                self.known_materials.insert(*material);
            }
        }
    }

    /// A TAKE at `position` failed; ignore it for the cooldown window.
    pub fn record_failed_take(&mut self, position: Position, turn: u64) {
        self.known_materials.remove(&position);
        self.failed_sources
            .insert(position, turn.saturating_add(self.cooldown_turns));
    }

    /// A TAKE at `position` succeeded; the material is gone.
    pub fn record_take(&mut self, position: Position) {
        self.known_materials.remove(&position);
    }

    pub fn is_cooling_down(&self, position: Position) -> bool {
        self.failed_sources.contains_key(&position)
    }

    fn expire_cooldowns(&mut self, turn: u64) {
        self.failed_sources.retain(|_, until| *until > turn);
    }

    /// Unvisited, non-obstacle cells adjacent to a visited cell.
    pub fn frontier(&self, obstacles: &HashSet<Position>, size: GridSize) -> HashSet<Position> {
        self.visited
            .iter()
            .flat_map(|cell| cell.neighbors(size))
            .map(|(_, p)| p)
            .filter(|p| !self.visited.contains(p) && !obstacles.contains(p))
            .collect()
    }

    /// Decide this turn's exploration move.
    pub fn next_step(
        &mut self,
        position: Position,
        turn: u64,
        vision: &[Position],
        obstacles: &HashSet<Position>,
        size: GridSize,
        rng: &mut impl Rng,
    ) -> ExplorationStep {
        self.expire_cooldowns(turn);
        let planned = match self.policy {
            ExplorationPolicy::VisionOnly => self.vision_step(position, vision, obstacles, size),
            ExplorationPolicy::Frontier => self.frontier_step(position, obstacles, size),
        };
        planned.unwrap_or_else(|| match random_step(position, obstacles, size, rng) {
            Some(action) => ExplorationStep::Wander(action),
            None => ExplorationStep::Stay,
        })
    }

    fn vision_step(
        &self,
        position: Position,
        vision: &[Position],
        obstacles: &HashSet<Position>,
        size: GridSize,
    ) -> Option<ExplorationStep> {
        let visible = vision
            .iter()
            .copied()
            .filter(|p| !self.is_cooling_down(*p));
        self.nearest_target(position, visible, obstacles, size)
    }

    fn frontier_step(
        &self,
        position: Position,
        obstacles: &HashSet<Position>,
        size: GridSize,
    ) -> Option<ExplorationStep> {
        let known = self.known_materials.iter().copied();
        self.nearest_target(position, known, obstacles, size)
            .or_else(|| {
                let frontier = self.frontier(obstacles, size);
                self.nearest_target(position, frontier, obstacles, size)
            })
    }

    /// Closest candidate (Chebyshev) that is reachable. Standing on the
    /// candidate yields `Take`.
    fn nearest_target(
        &self,
        position: Position,
        candidates: impl IntoIterator<Item = Position>,
        obstacles: &HashSet<Position>,
        size: GridSize,
    ) -> Option<ExplorationStep> {
        let mut candidates: Vec<Position> = candidates.into_iter().collect();
        candidates.sort_by_key(|p| (position.chebyshev(*p), *p));

        candidates.into_iter().find_map(|target| {
            if target == position {
                return Some(ExplorationStep::Take);
            }
            find_path_with(self.heuristic, position, target, obstacles, size)
                .filter(|path| !path.is_empty())
                .map(|path| ExplorationStep::Travel { target, path })
        })
    }
}

/// A random move to an in-bounds, non-obstacle neighbour.
pub fn random_step(
    position: Position,
    obstacles: &HashSet<Position>,
    size: GridSize,
    rng: &mut impl Rng,
) -> Option<WorkerAction> {
    let mut directions = WorkerAction::DIRECTIONS;
    directions.shuffle(rng);
    directions.into_iter().find(|action| {
        position
            .apply_move(*action, size)
            .is_some_and(|next| !obstacles.contains(&next))
    })
}
