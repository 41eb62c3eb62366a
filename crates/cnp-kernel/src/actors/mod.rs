//! Acton-reactive actors for the contract-net workers.
//!
//! ```text
//! TurnServer ── TurnUpdate ──▶ WorkerActor ── ActionRequest (new_envelope) ──▶ TurnServer
//!     ▲                           │  ▲                                           │
//!     └── TransferMaterial ───────┘  └────── ActionResponse (reply_envelope) ────┘
//!
//! Collector ── CallForProposals (broadcast) ──▶ Repairers
//! Repairer  ── Propose (direct) ──▶ Collector ── Accept / Reject (direct) ──▶ Repairer
//! Repairer  ── HandoffComplete (direct) ──▶ Collector
//! Repairer  ── RepairPointCompleted (broadcast) ──▶ Repairers
//! ```
//!
//! Each worker's peer directory arrives once in a `RegisterPeers` message
//! from the setup glue.

mod worker_actor;

pub use worker_actor::{WorkerActor, WorkerActorState};
