//! Grid-world experiment: runs contract-net collectors and repairers.
//!
//! This crate provides everything around the agents needed to play a game:
//! - An authoritative turn server and the world rules it enforces
//! - Grid specs, loaded from JSON or generated from a seed
//! - A game runner on the acton runtime and a deterministic lock-step host
//! - Result collection for repeated trials

pub mod experiment;
pub mod generator;
pub mod observer;
pub mod results;
pub mod server;
pub mod simulation;
pub mod world;
