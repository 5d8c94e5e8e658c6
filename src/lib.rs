//! WorkSync: a shared, single-writer server for project work-tracking state.
//!
//! Sprints, stories, backlog items and history entries live in YAML files
//! under a data root. Any number of agent processes may read those files
//! directly, but every mutation goes through one [`engine::Coordinator`],
//! which serializes writers per project, refuses to overwrite files that were
//! edited behind its back, replaces files atomically, and schedules a
//! debounced regeneration of the Obsidian vault.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod guidance;
pub mod mcp;
pub mod models;
pub mod store;
pub mod tracker;
pub mod vault;
pub mod workspace;

pub use error::{Error, Result};
