//! Agent Relay — task orchestration and event streaming for agent workers.

pub mod api;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod questions;
pub mod registry;
pub mod store;
pub mod sweeper;
pub mod task;
pub mod transform;
pub mod worker;
