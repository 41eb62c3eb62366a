//! Single-threaded lock-step host for the same workers the actors run.
//!
//! Each turn the world advances, then every worker (in id order) receives
//! its turn update. Effects are routed through a FIFO queue and drained
//! before the next worker moves, so a seeded game replays exactly.

use std::collections::{BTreeMap, VecDeque};

use anyhow::Result;
use cnp_kernel::config::WorkerConfig;
use cnp_kernel::messages::{ActionRequest, AgentId};
use cnp_kernel::worker::{new_worker, Inbound, Outbound, Worker, WorkerRole};
use tracing::{debug, trace, warn};

use crate::generator::GridSpec;
use crate::world::{GameOutcome, TurnSummary, World};

/// Configuration for the `index`th agent in id order: the shared config with
/// its own seed (`seed + index`) when a seed is set.
pub fn agent_config(base: &WorkerConfig, index: usize) -> WorkerConfig {
    base.with_seed(base.seed.map(|s| s.wrapping_add(index as u64)))
}

/// Result of a lock-step game.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub outcome: GameOutcome,
    pub turns: u64,
    pub summaries: Vec<TurnSummary>,
    pub repaired: usize,
}

/// Lock-step game loop.
pub struct LockstepSimulation {
    world: World,
    workers: BTreeMap<AgentId, Box<dyn Worker>>,
    max_turns: u64,
}

impl LockstepSimulation {
    /// Build the world and one worker per agent in `spec`. Agent `i` (in id
    /// order) gets seed `seed + i` when a seed is set.
    pub fn new(spec: &GridSpec, config: &WorkerConfig, max_turns: u64) -> Result<Self> {
        config.validate()?;
        let world = World::from_spec(spec)?;
        let setup = world.setup_info();

        let mut workers = BTreeMap::new();
        for (index, (id, agent)) in world.agents().enumerate() {
            let mut worker = new_worker(agent.role, id.clone(), agent_config(config, index));
            worker.handle(Inbound::Setup(setup.clone()));
            workers.insert(id.clone(), worker);
        }

        Ok(Self {
            world,
            workers,
            max_turns,
        })
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn worker(&self, id: &str) -> Option<&dyn Worker> {
        self.workers.get(id).map(|w| w.as_ref())
    }

    /// Play one turn and return its summary.
    pub fn step(&mut self) -> TurnSummary {
        self.world.advance_turn();
        let turn = self.world.turn();
        trace!(turn, "Turn started");

        let ids: Vec<AgentId> = self.workers.keys().cloned().collect();
        for id in ids {
            let Some(update) = self.world.turn_update(&id) else {
                continue;
            };
            let mut queue = VecDeque::from([(id, Inbound::Turn(update))]);
            while let Some((recipient, message)) = queue.pop_front() {
                self.deliver(recipient, message, &mut queue);
            }
        }
        self.world.snapshot()
    }

    fn deliver(&mut self, recipient: AgentId, message: Inbound, queue: &mut VecDeque<(AgentId, Inbound)>) {
        let Some(worker) = self.workers.get_mut(&recipient) else {
            warn!(peer = %recipient, "Message for unknown agent dropped");
            return;
        };

        for effect in worker.handle(message) {
            match effect {
                Outbound::RequestAction { action, request_id } => {
                    let response = self.world.apply(&ActionRequest {
                        agent_id: recipient.clone(),
                        action,
                        request_id,
                    });
                    queue.push_back((recipient.clone(), Inbound::ActionResult(response)));
                }
                Outbound::RequestTransfer(transfer) => {
                    if let Some(inform) = self.world.transfer(&transfer) {
                        queue.push_back((inform.from_id.clone(), inform.clone().into()));
                        queue.push_back((inform.to_id.clone(), inform.into()));
                    }
                }
                Outbound::Broadcast(message) => {
                    let inbound: Inbound = message.into();
                    for (id, peer) in &self.workers {
                        if peer.role() == WorkerRole::Repairer {
                            queue.push_back((id.clone(), inbound.clone()));
                        }
                    }
                }
                Outbound::Direct { to, message } => queue.push_back((to, message.into())),
            }
        }
    }

    /// Play until the game ends.
    pub fn run(&mut self) -> SimulationReport {
        let mut summaries = Vec::new();
        let outcome = loop {
            let summary = self.step();
            debug!(
                turn = summary.turn,
                actions = summary.actions,
                repairs = summary.repairs,
                open = summary.repair_points_open,
                "Turn complete"
            );
            summaries.push(summary);
            if let Some(outcome) = self.world.outcome(self.max_turns) {
                break outcome;
            }
        };

        SimulationReport {
            outcome,
            turns: self.world.turn(),
            summaries,
            repaired: self.world.repaired(),
        }
    }
}
