//! Authoritative game rules.
//!
//! [`World`] owns the board and every agent's true position and load. It is
//! plain data: the turn server actor and the lock-step simulation both drive
//! the same rules, so a game plays identically under either host.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use anyhow::Result;
use cnp_kernel::grid::{GridSize, Position, WorkerAction};
use cnp_kernel::messages::{
    ActionFlag, ActionRequest, ActionResponse, AgentId, GameSetupInfo, TransferInform,
    TransferMaterial, TurnUpdate,
};
use cnp_kernel::worker::WorkerRole;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::generator::GridSpec;

/// Id of the `index`th collector.
pub fn collector_id(index: usize) -> AgentId {
    format!("collector-{index}")
}

/// Id of the `index`th repairer.
pub fn repairer_id(index: usize) -> AgentId {
    format!("repairer-{index}")
}

/// Server-side view of one agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentState {
    pub role: WorkerRole,
    pub position: Position,
    pub has_material: bool,
    /// Turn of the last accepted action request
    pub last_action_turn: Option<u64>,
}

/// Why a game stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOutcome {
    /// Every repair point was repaired
    AllRepaired,
    /// No material is left on the board or in any agent's hands
    MaterialExhausted,
    /// The turn limit was reached first
    TurnLimit,
}

/// Counters for one turn, plus a snapshot of the board after it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnSummary {
    pub turn: u64,
    pub actions: u32,
    pub successful_actions: u32,
    pub blocked: u32,
    pub takes: u32,
    pub transfers: u32,
    pub repairs: u32,
    pub materials_on_board: usize,
    pub materials_carried: usize,
    pub repair_points_open: usize,
}

/// The board and every agent on it.
#[derive(Debug, Clone)]
pub struct World {
    size: GridSize,
    obstacles: HashSet<Position>,
    materials: BTreeSet<Position>,
    repair_points: BTreeSet<Position>,
    all_repair_points: Vec<Position>,
    agents: BTreeMap<AgentId, AgentState>,
    vision_radius: u32,
    turn: u64,
    current: TurnSummary,
}

impl World {
    /// Build the initial world. Collectors are named `collector-N` and
    /// repairers `repairer-N` in the order the spec lists them.
    pub fn from_spec(spec: &GridSpec) -> Result<Self> {
        spec.validate()?;

        let mut agents = BTreeMap::new();
        let roles = spec
            .collectors
            .iter()
            .enumerate()
            .map(|(i, p)| (collector_id(i), WorkerRole::Collector, *p))
            .chain(
                spec.repairers
                    .iter()
                    .enumerate()
                    .map(|(i, p)| (repairer_id(i), WorkerRole::Repairer, *p)),
            );
        for (id, role, position) in roles {
            agents.insert(
                id,
                AgentState {
                    role,
                    position,
                    has_material: false,
                    last_action_turn: None,
                },
            );
        }

        let world = Self {
            size: spec.size(),
            obstacles: spec.obstacles.iter().copied().collect(),
            materials: spec.materials.iter().copied().collect(),
            repair_points: spec.repair_points.iter().copied().collect(),
            all_repair_points: spec.repair_points.clone(),
            agents,
            vision_radius: spec.vision_radius,
            turn: 0,
            current: TurnSummary::default(),
        };
        Ok(world)
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    pub fn size(&self) -> GridSize {
        self.size
    }

    pub fn agent(&self, id: &str) -> Option<&AgentState> {
        self.agents.get(id)
    }

    /// Agents in id order.
    pub fn agents(&self) -> impl Iterator<Item = (&AgentId, &AgentState)> {
        self.agents.iter()
    }

    pub fn materials(&self) -> &BTreeSet<Position> {
        &self.materials
    }

    pub fn open_repair_points(&self) -> &BTreeSet<Position> {
        &self.repair_points
    }

    /// The static description every worker receives before turn one.
    pub fn setup_info(&self) -> GameSetupInfo {
        let ids = |role| {
            self.agents
                .iter()
                .filter(|(_, a)| a.role == role)
                .map(|(id, _)| id.clone())
                .collect()
        };
        GameSetupInfo {
            size: self.size,
            obstacles: self.obstacles.clone(),
            repair_points: self.all_repair_points.clone(),
            collector_ids: ids(WorkerRole::Collector),
            repairer_ids: ids(WorkerRole::Repairer),
        }
    }

    /// Close the current turn and open the next. Returns the closed turn's
    /// summary.
    pub fn advance_turn(&mut self) -> TurnSummary {
        let closed = self.snapshot();
        self.turn += 1;
        self.current = TurnSummary {
            turn: self.turn,
            ..TurnSummary::default()
        };
        closed
    }

    /// Summary of the turn in progress so far.
    pub fn snapshot(&self) -> TurnSummary {
        TurnSummary {
            materials_on_board: self.materials.len(),
            materials_carried: self.agents.values().filter(|a| a.has_material).count(),
            repair_points_open: self.repair_points.len(),
            ..self.current.clone()
        }
    }

    /// What `agent` sees this turn.
    pub fn turn_update(&self, agent: &str) -> Option<TurnUpdate> {
        let state = self.agents.get(agent)?;
        Some(TurnUpdate {
            position: state.position,
            game_turn: self.turn,
            vision: self.vision(state.position),
            has_material: state.has_material,
        })
    }

    /// Material within the vision radius of `from`, nearest first.
    pub fn vision(&self, from: Position) -> Vec<Position> {
        let mut seen: Vec<Position> = self
            .materials
            .iter()
            .copied()
            .filter(|m| from.chebyshev(*m) <= self.vision_radius)
            .collect();
        seen.sort_by_key(|m| (from.chebyshev(*m), *m));
        seen
    }

    /// Apply one action request. At most one action per agent per turn is
    /// accepted; a second one fails with `MaxActions` and changes nothing.
    pub fn apply(&mut self, request: &ActionRequest) -> ActionResponse {
        let turn = self.turn;
        let size = self.size;
        let respond = |success, flag| ActionResponse {
            action: request.action,
            success,
            flag,
            request_id: request.request_id,
        };

        let Some(agent) = self.agents.get_mut(&request.agent_id) else {
            return respond(false, ActionFlag::NotAllowed);
        };
        if agent.last_action_turn == Some(turn) {
            return respond(false, ActionFlag::MaxActions);
        }
        agent.last_action_turn = Some(turn);
        self.current.actions += 1;

        let flag = match request.action {
            WorkerAction::Take => {
                if agent.role != WorkerRole::Collector || agent.has_material {
                    ActionFlag::NotAllowed
                } else if self.materials.remove(&agent.position) {
                    agent.has_material = true;
                    self.current.takes += 1;
                    ActionFlag::Ok
                } else {
                    ActionFlag::NoMaterial
                }
            }
            WorkerAction::Drop => {
                if agent.role != WorkerRole::Repairer {
                    ActionFlag::NotAllowed
                } else if !agent.has_material {
                    ActionFlag::NoMaterial
                } else if self.repair_points.remove(&agent.position) {
                    agent.has_material = false;
                    self.current.repairs += 1;
                    info!(agent = %request.agent_id, turn, position = %agent.position, "Repair point repaired");
                    ActionFlag::Ok
                } else {
                    ActionFlag::NoRepairPoint
                }
            }
            action => match agent.position.apply_move(action, size) {
                Some(next) if !self.obstacles.contains(&next) => {
                    agent.position = next;
                    ActionFlag::Ok
                }
                _ => {
                    self.current.blocked += 1;
                    ActionFlag::Blocked
                }
            },
        };

        let success = flag == ActionFlag::Ok;
        if success {
            self.current.successful_actions += 1;
        }
        debug!(agent = %request.agent_id, turn, action = %request.action, ?flag, "Action applied");
        respond(success, flag)
    }

    /// Move material between two agents. Allowed when the giver carries
    /// material, the receiver does not, and they stand on the same or
    /// adjacent cells. Returns the notice both parties receive.
    pub fn transfer(&mut self, request: &TransferMaterial) -> Option<TransferInform> {
        if request.from_id == request.to_id {
            return None;
        }
        let from = self.agents.get(&request.from_id)?;
        let to = self.agents.get(&request.to_id)?;
        if !from.has_material || to.has_material || from.position.chebyshev(to.position) > 1 {
            debug!(from = %request.from_id, to = %request.to_id, "Transfer refused");
            return None;
        }

        for (id, carrying) in [(&request.from_id, false), (&request.to_id, true)] {
            if let Some(agent) = self.agents.get_mut(id) {
                agent.has_material = carrying;
            }
        }
        self.current.transfers += 1;
        info!(from = %request.from_id, to = %request.to_id, turn = self.turn, "Material transferred");
        Some(TransferInform {
            from_id: request.from_id.clone(),
            to_id: request.to_id.clone(),
        })
    }

    /// Whether the game has ended, checked after turn `self.turn()`.
    pub fn outcome(&self, max_turns: u64) -> Option<GameOutcome> {
        if self.repair_points.is_empty() {
            Some(GameOutcome::AllRepaired)
        } else if self.materials.is_empty() && !self.agents.values().any(|a| a.has_material) {
            Some(GameOutcome::MaterialExhausted)
        } else if self.turn >= max_turns {
            Some(GameOutcome::TurnLimit)
        } else {
            None
        }
    }

    /// Repair points closed so far.
    pub fn repaired(&self) -> usize {
        self.all_repair_points.len() - self.repair_points.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> GridSpec {
        GridSpec {
            width: 6,
            height: 6,
            obstacles: vec![Position::new(1, 0)],
            materials: vec![Position::new(0, 1), Position::new(5, 5)],
            repair_points: vec![Position::new(3, 3)],
            collectors: vec![Position::new(0, 0)],
            repairers: vec![Position::new(0, 2), Position::new(3, 2)],
            vision_radius: 2,
        }
    }

    fn request(agent: &str, action: WorkerAction) -> ActionRequest {
        ActionRequest {
            agent_id: agent.into(),
            action,
            request_id: 0,
        }
    }

    fn started() -> World {
        let mut world = World::from_spec(&spec()).unwrap();
        world.advance_turn();
        world
    }

    #[test]
    fn test_setup_lists_roles_in_id_order() {
        let world = World::from_spec(&spec()).unwrap();
        let setup = world.setup_info();
        assert_eq!(setup.collector_ids, vec!["collector-0"]);
        assert_eq!(setup.repairer_ids, vec!["repairer-0", "repairer-1"]);
        assert_eq!(setup.repair_points, vec![Position::new(3, 3)]);
        assert!(setup.obstacles.contains(&Position::new(1, 0)));
    }

    #[test]
    fn test_vision_is_radius_limited_and_sorted() {
        let world = started();
        let update = world.turn_update("collector-0").unwrap();
        assert_eq!(update.vision, vec![Position::new(0, 1)]);
        assert_eq!(update.game_turn, 1);
        assert!(world.turn_update("nobody").is_none());
    }

    #[test]
    fn test_move_blocked_by_obstacle_and_edge() {
        let mut world = started();
        let blocked = world.apply(&request("collector-0", WorkerAction::East));
        assert_eq!(blocked.flag, ActionFlag::Blocked);
        assert!(!blocked.success);

        world.advance_turn();
        let edge = world.apply(&request("collector-0", WorkerAction::North));
        assert_eq!(edge.flag, ActionFlag::Blocked);
        assert_eq!(world.agent("collector-0").unwrap().position, Position::new(0, 0));
    }

    #[test]
    fn test_second_action_in_turn_is_rejected() {
        let mut world = started();
        assert!(world.apply(&request("collector-0", WorkerAction::South)).success);
        let again = world.apply(&request("collector-0", WorkerAction::South));
        assert_eq!(again.flag, ActionFlag::MaxActions);
        assert_eq!(world.agent("collector-0").unwrap().position, Position::new(0, 1));

        world.advance_turn();
        assert!(world.apply(&request("collector-0", WorkerAction::South)).success);
    }

    #[test]
    fn test_response_echoes_request_id() {
        let mut world = started();
        let ok = world.apply(&ActionRequest {
            request_id: 41,
            ..request("collector-0", WorkerAction::South)
        });
        assert_eq!(ok.request_id, 41);
        let refused = world.apply(&ActionRequest {
            request_id: 42,
            ..request("collector-0", WorkerAction::South)
        });
        assert_eq!(refused.flag, ActionFlag::MaxActions);
        assert_eq!(refused.request_id, 42);
    }

    #[test]
    fn test_take_rules() {
        let mut world = started();
        let empty = world.apply(&request("collector-0", WorkerAction::Take));
        assert_eq!(empty.flag, ActionFlag::NoMaterial);

        world.advance_turn();
        world.apply(&request("collector-0", WorkerAction::South));
        world.advance_turn();
        assert!(world.apply(&request("collector-0", WorkerAction::Take)).success);
        assert!(world.agent("collector-0").unwrap().has_material);
        assert!(!world.materials().contains(&Position::new(0, 1)));

        world.advance_turn();
        let full = world.apply(&request("collector-0", WorkerAction::Take));
        assert_eq!(full.flag, ActionFlag::NotAllowed);

        let repairer = world.apply(&request("repairer-0", WorkerAction::Take));
        assert_eq!(repairer.flag, ActionFlag::NotAllowed);
    }

    #[test]
    fn test_transfer_requires_adjacency_and_load() {
        let mut world = started();
        let hand_over = TransferMaterial {
            from_id: "collector-0".into(),
            to_id: "repairer-0".into(),
        };
        assert!(world.transfer(&hand_over).is_none(), "giver has nothing yet");

        world.apply(&request("collector-0", WorkerAction::South));
        world.advance_turn();
        world.apply(&request("collector-0", WorkerAction::Take));

        let far = TransferMaterial {
            from_id: "collector-0".into(),
            to_id: "repairer-1".into(),
        };
        assert!(world.transfer(&far).is_none());

        let inform = world.transfer(&hand_over).unwrap();
        assert_eq!(inform.to_id, "repairer-0");
        assert!(!world.agent("collector-0").unwrap().has_material);
        assert!(world.agent("repairer-0").unwrap().has_material);
        assert_eq!(world.snapshot().transfers, 1);
    }

    #[test]
    fn test_drop_closes_repair_point_and_ends_game() {
        let mut world = started();
        assert_eq!(
            world.apply(&request("repairer-1", WorkerAction::Drop)).flag,
            ActionFlag::NoMaterial
        );

        world.agents.get_mut("repairer-1").unwrap().has_material = true;
        world.advance_turn();
        assert_eq!(
            world.apply(&request("repairer-1", WorkerAction::Drop)).flag,
            ActionFlag::NoRepairPoint
        );
        world.advance_turn();
        world.apply(&request("repairer-1", WorkerAction::South));
        world.advance_turn();
        assert!(world.apply(&request("repairer-1", WorkerAction::Drop)).success);
        assert_eq!(world.repaired(), 1);
        assert_eq!(world.outcome(100), Some(GameOutcome::AllRepaired));

        assert_eq!(
            world.apply(&request("collector-0", WorkerAction::Drop)).flag,
            ActionFlag::NotAllowed
        );
    }

    #[test]
    fn test_outcome_material_exhausted_and_turn_limit() {
        let mut world = started();
        assert_eq!(world.outcome(100), None);
        assert_eq!(world.outcome(1), Some(GameOutcome::TurnLimit));

        world.materials.clear();
        assert_eq!(world.outcome(100), Some(GameOutcome::MaterialExhausted));
        world.agents.get_mut("repairer-0").unwrap().has_material = true;
        assert_eq!(world.outcome(100), None);
    }

    #[test]
    fn test_advance_turn_returns_closed_summary() {
        let mut world = started();
        world.apply(&request("collector-0", WorkerAction::East));
        world.apply(&request("repairer-0", WorkerAction::South));
        let closed = world.advance_turn();
        assert_eq!(closed.turn, 1);
        assert_eq!(closed.actions, 2);
        assert_eq!(closed.successful_actions, 1);
        assert_eq!(closed.blocked, 1);
        assert_eq!(closed.materials_on_board, 2);
        assert_eq!(world.snapshot().actions, 0);
    }

    #[test]
    fn test_unknown_agent_not_allowed() {
        let mut world = started();
        let response = world.apply(&request("ghost", WorkerAction::North));
        assert_eq!(response.flag, ActionFlag::NotAllowed);
    }
}
