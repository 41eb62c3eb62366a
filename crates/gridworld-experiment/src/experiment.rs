//! Game runner for grid-world contract-net games.
//!
//! Orchestrates one game:
//! 1. Build the world from a grid spec
//! 2. Spawn the turn server, the observer, and one actor per worker
//! 3. Register handles and deliver the setup info
//! 4. Drive the turn loop until the server reports an outcome
//! 5. Collect the per-turn summaries into a [`GameResult`]

use std::collections::HashMap;

use acton_reactive::prelude::*;
use anyhow::{bail, Result};
use chrono::Utc;
use cnp_kernel::actors::WorkerActor;
use cnp_kernel::config::WorkerConfig;
use cnp_kernel::messages::{AgentId, RegisterPeers};
use cnp_kernel::worker::WorkerRole;
use cnp_kernel::{Collector, Repairer};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::generator::GridSpec;
use crate::observer::TurnObserver;
use crate::results::{GameConfig, GameResult, HostMode};
use crate::server::{AdvanceTurn, CloseTurn, RegisterWorkers, TurnCompleted, TurnServer};
use crate::simulation::{agent_config, LockstepSimulation};
use crate::world::World;

/// Configuration for the game runner.
#[derive(Debug, Clone)]
pub struct GameRunnerConfig {
    /// Turns before the game is called off
    pub max_turns: u64,
    /// Wall-clock time workers get to act each turn (actor mode only)
    pub turn_interval_ms: u64,
    /// Shared worker configuration
    pub worker: WorkerConfig,
    /// Base seed for agent RNGs; overrides `worker.seed` when set
    pub seed: Option<u64>,
}

impl Default for GameRunnerConfig {
    fn default() -> Self {
        Self {
            max_turns: 500,
            turn_interval_ms: 50,
            worker: WorkerConfig::default(),
            seed: None,
        }
    }
}

/// The game runner.
pub struct GameRunner {
    config: GameRunnerConfig,
}

impl GameRunner {
    pub fn new(config: GameRunnerConfig) -> Self {
        Self { config }
    }

    fn base_worker_config(&self) -> Result<WorkerConfig> {
        let config = self.config.worker.with_seed(self.config.seed.or(self.config.worker.seed));
        config.validate()?;
        Ok(config)
    }

    fn game_config(&self, spec: &GridSpec, mode: HostMode, trial: usize) -> GameConfig {
        GameConfig {
            mode,
            width: spec.width,
            height: spec.height,
            collectors: spec.collectors.len(),
            repairers: spec.repairers.len(),
            materials: spec.materials.len(),
            repair_points: spec.repair_points.len(),
            policy: self.config.worker.exploration.policy.name().to_string(),
            max_turns: self.config.max_turns,
            trial,
            seed: self.config.seed.or(self.config.worker.seed),
        }
    }

    /// Play one game with every agent as an actor.
    pub async fn run(&self, spec: &GridSpec, trial: usize) -> Result<GameResult> {
        let started_at = Utc::now();
        let base = self.base_worker_config()?;
        let world = World::from_spec(spec)?;
        let setup = world.setup_info();
        let agents: Vec<(AgentId, WorkerRole)> =
            world.agents().map(|(id, a)| (id.clone(), a.role)).collect();

        info!(
            trial,
            width = spec.width,
            height = spec.height,
            collectors = spec.collectors.len(),
            repairers = spec.repairers.len(),
            max_turns = self.config.max_turns,
            "Starting game"
        );

        let mut runtime = ActonApp::launch_async().await;
        let server = TurnServer::new(world, self.config.max_turns)
            .spawn(&mut runtime)
            .await;

        let (turn_tx, mut turn_rx) = mpsc::channel::<TurnCompleted>(64);
        TurnObserver::new(turn_tx).spawn(&mut runtime).await;

        let mut workers: HashMap<AgentId, ActorHandle> = HashMap::new();
        for (index, (id, role)) in agents.into_iter().enumerate() {
            let config = agent_config(&base, index);
            let handle = match role {
                WorkerRole::Collector => {
                    WorkerActor::new(Collector::new(id.clone(), config))
                        .spawn(&mut runtime)
                        .await
                }
                WorkerRole::Repairer => {
                    WorkerActor::new(Repairer::new(id.clone(), config))
                        .spawn(&mut runtime)
                        .await
                }
            };
            workers.insert(id, handle);
        }

        server
            .send(RegisterWorkers {
                workers: workers.clone(),
            })
            .await;
        for handle in workers.values() {
            handle
                .send(RegisterPeers {
                    server: server.clone(),
                    peers: workers.clone(),
                })
                .await;
            handle.send(setup.clone()).await;
        }

        let interval = Duration::from_millis(self.config.turn_interval_ms);
        let mut summaries = Vec::new();
        let mut repaired = 0;
        let outcome = loop {
            server.send(AdvanceTurn).await;
            tokio::time::sleep(interval).await;
            server.send(CloseTurn).await;

            let Some(completed) = turn_rx.recv().await else {
                warn!("Turn observer channel closed");
                break None;
            };
            debug!(
                turn = completed.summary.turn,
                actions = completed.summary.actions,
                transfers = completed.summary.transfers,
                repairs = completed.summary.repairs,
                open = completed.summary.repair_points_open,
                "Turn complete"
            );
            repaired = completed.repaired;
            summaries.push(completed.summary);
            if let Some(outcome) = completed.outcome {
                break Some(outcome);
            }
        };

        let _ = runtime.shutdown_all().await;

        let Some(outcome) = outcome else {
            bail!("game stopped after {} turns without an outcome", summaries.len());
        };
        let result = GameResult::new(
            self.game_config(spec, HostMode::Actors, trial),
            started_at,
            outcome,
            repaired,
            summaries,
        );
        info!(trial, turns = result.turns, ?outcome, repaired, "Game finished");
        Ok(result)
    }

    /// Play one game in the deterministic lock-step host.
    pub fn run_lockstep(&self, spec: &GridSpec, trial: usize) -> Result<GameResult> {
        let started_at = Utc::now();
        let mut simulation = LockstepSimulation::new(spec, &self.base_worker_config()?, self.config.max_turns)?;
        let report = simulation.run();
        info!(
            trial,
            turns = report.turns,
            outcome = ?report.outcome,
            repaired = report.repaired,
            "Lock-step game finished"
        );
        Ok(GameResult::new(
            self.game_config(spec, HostMode::Lockstep, trial),
            started_at,
            report.outcome,
            report.repaired,
            report.summaries,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cnp_kernel::grid::Position;
    use cnp_kernel::ExplorationPolicy;

    #[test]
    fn test_runner_seed_overrides_worker_seed() {
        let runner = GameRunner::new(GameRunnerConfig {
            seed: Some(5),
            worker: WorkerConfig {
                seed: Some(99),
                ..WorkerConfig::default()
            },
            ..GameRunnerConfig::default()
        });
        assert_eq!(runner.base_worker_config().unwrap().seed, Some(5));
    }

    #[test]
    fn test_lockstep_result_records_config() {
        let mut worker = WorkerConfig::default();
        worker.exploration.policy = ExplorationPolicy::VisionOnly;
        let runner = GameRunner::new(GameRunnerConfig {
            max_turns: 40,
            seed: Some(3),
            worker,
            ..GameRunnerConfig::default()
        });
        let spec = GridSpec {
            width: 4,
            height: 4,
            obstacles: vec![],
            materials: vec![],
            repair_points: vec![Position::new(3, 3)],
            collectors: vec![Position::new(0, 0)],
            repairers: vec![],
            vision_radius: 2,
        };
        let result = runner.run_lockstep(&spec, 7).unwrap();
        assert_eq!(result.config.mode, HostMode::Lockstep);
        assert_eq!(result.config.policy, "vision_only");
        assert_eq!(result.config.trial, 7);
        assert_eq!(result.config.seed, Some(3));
        assert_eq!(result.turns, 1);
    }
}
