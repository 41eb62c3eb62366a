//! Results collection and output for grid-world games.
//!
//! Captures, per game:
//! - Turns played and why the game ended
//! - Repairs, takes, and handoff transfers
//! - Per-turn summaries from the server

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::world::{GameOutcome, TurnSummary};

/// How the game was hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostMode {
    /// Workers and server as acton actors with a wall-clock turn interval
    Actors,
    /// Single-threaded deterministic simulation
    Lockstep,
}

/// Configuration recorded alongside a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    pub mode: HostMode,
    pub width: i32,
    pub height: i32,
    pub collectors: usize,
    pub repairers: usize,
    pub materials: usize,
    pub repair_points: usize,
    /// Exploration policy name
    pub policy: String,
    pub max_turns: u64,
    /// Trial number (for repeated games)
    pub trial: usize,
    pub seed: Option<u64>,
}

/// Results from a single game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameResult {
    pub config: GameConfig,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: GameOutcome,
    pub turns: u64,
    pub repaired: usize,
    pub takes: u32,
    pub transfers: u32,
    /// Server summary of every turn
    pub turn_summaries: Vec<TurnSummary>,
}

impl GameResult {
    pub fn new(
        config: GameConfig,
        started_at: DateTime<Utc>,
        outcome: GameOutcome,
        repaired: usize,
        turn_summaries: Vec<TurnSummary>,
    ) -> Self {
        Self {
            config,
            started_at,
            ended_at: Utc::now(),
            outcome,
            turns: turn_summaries.last().map(|s| s.turn).unwrap_or(0),
            repaired,
            takes: turn_summaries.iter().map(|s| s.takes).sum(),
            transfers: turn_summaries.iter().map(|s| s.transfers).sum(),
            turn_summaries,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        (self.ended_at - self.started_at).num_milliseconds().max(0) as u64
    }

    pub fn all_repaired(&self) -> bool {
        self.outcome == GameOutcome::AllRepaired
    }
}

/// Aggregate over repeated games.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameResults {
    pub results: Vec<GameResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<TrialSummary>,
}

/// Summary statistics for a batch of trials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialSummary {
    pub trials: usize,
    /// Fraction of games that repaired every point
    pub completion_rate: f64,
    pub avg_turns: f64,
    /// Standard error of avg_turns
    pub avg_turns_se: f64,
    pub min_turns: u64,
    pub max_turns: u64,
    pub avg_repaired: f64,
}

impl GameResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, result: GameResult) {
        self.results.push(result);
    }

    /// Compute summary statistics over every result so far.
    pub fn compute_summary(&mut self) {
        if self.results.is_empty() {
            self.summary = None;
            return;
        }
        let trials = self.results.len();
        let n = trials as f64;
        let completed = self.results.iter().filter(|r| r.all_repaired()).count();

        let turns: Vec<f64> = self.results.iter().map(|r| r.turns as f64).collect();
        let avg_turns = turns.iter().sum::<f64>() / n;
        // SE = std_dev / sqrt(n)
        let avg_turns_se = if trials > 1 {
            let variance = turns.iter().map(|t| (t - avg_turns).powi(2)).sum::<f64>() / (n - 1.0);
            variance.sqrt() / n.sqrt()
        } else {
            0.0
        };

        self.summary = Some(TrialSummary {
            trials,
            completion_rate: completed as f64 / n,
            avg_turns,
            avg_turns_se,
            min_turns: self.results.iter().map(|r| r.turns).min().unwrap_or(0),
            max_turns: self.results.iter().map(|r| r.turns).max().unwrap_or(0),
            avg_repaired: self.results.iter().map(|r| r.repaired as f64).sum::<f64>() / n,
        });
    }

    /// Save results to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Load results from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let results = serde_json::from_str(&json)?;
        Ok(results)
    }
}

/// Format a duration in milliseconds for display.
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{:.1}m", ms as f64 / 60_000.0)
    }
}
