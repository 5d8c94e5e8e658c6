//! Domain models for WorkSync.
//!
//! # Entities
//!
//! Each project directory holds one YAML file per tracked concept:
//!
//! - [`WorkIndex`] (`work-index.yaml`): project identity and sprint order.
//! - [`Sprint`] (`sprints/<id>.yaml`): a work iteration and its [`Story`] list.
//! - [`Backlog`] (`backlog.yaml`): unscheduled [`BacklogItem`]s.
//! - [`History`] (`history.yaml`): append-only [`HistoryEntry`] log.
//!
//! Every model keeps unknown keys in a flattened `extra` mapping so that
//! fields added by hand are written back untouched.

mod backlog;
mod history;
mod project;
mod sprint;

pub use backlog::*;
pub use history::*;
pub use project::*;
pub use sprint::*;

use crate::error::{Error, Result};

/// Reject identifiers that cannot safely become a file or directory name.
///
/// Project names and sprint ids end up in paths, so anything that could
/// escape the project directory (separators, `..`, leading dots) is refused.
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(Error::rejected(format!("{kind} id must not be empty")));
    }
    if trimmed != id
        || id.starts_with('.')
        || id.contains(['/', '\\', '\0'])
        || id.chars().any(char::is_control)
    {
        return Err(Error::rejected(format!("Invalid {kind} id '{id}'")));
    }
    Ok(())
}
