//! CNP Kernel: contract-net task allocation for grid-world workers.
//!
//! Collectors explore an obstacle grid for material, auction each find to
//! repairers with a call-for-proposals, and hand it to the lowest bidder.
//! Repairers carry the material to an open repair point. Each worker is a
//! deterministic state machine driven by turn updates from an external
//! turn server; [`actors::WorkerActor`] hosts one on the acton-reactive
//! runtime.

pub mod actors;
pub mod collector;
pub mod config;
pub mod exploration;
pub mod grid;
pub mod messages;
pub mod negotiation;
pub mod pathfinder;
pub mod repairer;
pub mod worker;

pub use collector::{Collector, CollectorState};
pub use config::WorkerConfig;
pub use exploration::{ExplorationPolicy, Explorer};
pub use grid::{GridSize, Position, WorkerAction};
pub use negotiation::ContractNet;
pub use pathfinder::{find_path, Heuristic, Path};
pub use repairer::{Repairer, RepairerState};
pub use worker::{new_worker, Inbound, Outbound, Worker, WorkerRole};
