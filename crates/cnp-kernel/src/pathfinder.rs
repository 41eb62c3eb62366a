//! A* search over the 8-connected obstacle grid.
//!
//! Every move costs 1. The search keeps the usual open/closed bookkeeping:
//! closed cells are never expanded again, and an open cell is superseded
//! when a strictly cheaper predecessor is found. Superseded heap entries are
//! skipped lazily on pop.
//!
//! Tie-breaking among equal-`f` cells is an implementation detail. Callers
//! may rely on the path length being optimal, not on which of several
//! equally short paths is returned.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::grid::{GridSize, Position, WorkerAction};

/// Queued moves, front first.
pub type Path = VecDeque<WorkerAction>;

/// Distance estimate used to order the open set.
///
/// `Chebyshev` is exact on an empty 8-connected board, so the search stays
/// optimal. `Manhattan` overestimates diagonal progress; it still finds a
/// path whenever one exists, but the path may be longer than necessary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Heuristic {
    #[default]
    Chebyshev,
    Manhattan,
}

impl Heuristic {
    fn estimate(self, from: Position, to: Position) -> u32 {
        match self {
            Heuristic::Chebyshev => from.chebyshev(to),
            Heuristic::Manhattan => from.manhattan(to),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenEntry {
    f: u32,
    g: u32,
    position: Position,
}

impl Ord for OpenEntry {
    // BinaryHeap is a max-heap: lowest f wins, deeper g breaks ties.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .cmp(&self.f)
            .then_with(|| self.g.cmp(&other.g))
            .then_with(|| other.position.cmp(&self.position))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Shortest path from `start` to `goal` using the default heuristic.
///
/// Returns `None` when the goal is out of bounds, an obstacle, or cut off.
/// A path from a cell to itself is empty.
pub fn find_path(
    start: Position,
    goal: Position,
    obstacles: &HashSet<Position>,
    size: GridSize,
) -> Option<Path> {
    find_path_with(Heuristic::default(), start, goal, obstacles, size)
}

/// [`find_path`] with an explicit heuristic.
pub fn find_path_with(
    heuristic: Heuristic,
    start: Position,
    goal: Position,
    obstacles: &HashSet<Position>,
    size: GridSize,
) -> Option<Path> {
    if !size.contains(start) || !size.contains(goal) || obstacles.contains(&goal) {
        return None;
    }
    if start == goal {
        return Some(Path::new());
    }

    let mut open = BinaryHeap::new();
    let mut best_g: HashMap<Position, u32> = HashMap::new();
    let mut parents: HashMap<Position, Position> = HashMap::new();
    let mut closed: HashSet<Position> = HashSet::new();

    best_g.insert(start, 0);
    open.push(OpenEntry {
        f: heuristic.estimate(start, goal),
        g: 0,
        position: start,
    });

    while let Some(OpenEntry { g, position, .. }) = open.pop() {
        if closed.contains(&position) || best_g.get(&position) != Some(&g) {
            continue;
        }
        if position == goal {
            return Some(reconstruct(&parents, goal));
        }
        closed.insert(position);

        for (_, next) in position.neighbors(size) {
            if obstacles.contains(&next) || closed.contains(&next) {
                continue;
            }
            let tentative = g + 1;
            if best_g.get(&next).map_or(true, |&known| tentative < known) {
                best_g.insert(next, tentative);
                parents.insert(next, position);
                open.push(OpenEntry {
                    f: tentative + heuristic.estimate(next, goal),
                    g: tentative,
                    position: next,
                });
            }
        }
    }

    None
}

/// Length of the shortest path, if any. This is the bid a repairer offers.
pub fn path_cost(
    start: Position,
    goal: Position,
    obstacles: &HashSet<Position>,
    size: GridSize,
) -> Option<u32> {
    find_path(start, goal, obstacles, size).map(|path| path.len() as u32)
}

fn reconstruct(parents: &HashMap<Position, Position>, goal: Position) -> Path {
    let mut path = Path::new();
    let mut current = goal;
    while let Some(&parent) = parents.get(&current) {
        let action = WorkerAction::between(parent, current).unwrap_or_else(|| {
            panic!("reconstructed path steps from {parent} to non-adjacent {current}")
        });
        path.push_front(action);
        current = parent;
    }
    path
}
