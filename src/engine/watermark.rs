//! Edit-conflict detection.
//!
//! A watermark is the modification time of an entity file as last observed
//! by the coordinator. If the file on disk no longer carries that time,
//! something outside the coordinator (usually a human in an editor) changed
//! it, and a mutation based on the coordinator's view would silently discard
//! that edit.

use std::collections::HashMap;
use std::path::Path;

use super::EntityRef;
use crate::error::{Error, Result};
use crate::store::ModTime;

/// Last-observed modification times for one project's entity files.
///
/// Lives inside the project lock, so every access is already serialized
/// with the mutations it protects.
#[derive(Debug, Default)]
pub struct WatermarkTable {
    marks: HashMap<EntityRef, ModTime>,
}

impl WatermarkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare the on-disk modification time of `path` with the held
    /// watermark.
    ///
    /// The first check of an entity seeds its watermark from disk. A
    /// mismatch is refused with [`Error::ConcurrentModification`] and the
    /// watermark is left as it was; the caller must re-read the entity
    /// (see [`observe`](Self::observe)) before mutating it again.
    pub fn check(&mut self, entity: &EntityRef, path: &Path) -> Result<()> {
        let Some(observed) = ModTime::of(path)? else {
            return Err(Error::NotFound(path.display().to_string()));
        };

        match self.marks.get(entity) {
            None => {
                self.marks.insert(entity.clone(), observed);
                Ok(())
            }
            Some(held) if *held == observed => Ok(()),
            Some(held) => {
                tracing::warn!(
                    entity = %entity,
                    path = %path.display(),
                    observed = %observed,
                    expected = %held,
                    "External edit detected, refusing mutation"
                );
                Err(Error::ConcurrentModification {
                    path: path.to_path_buf(),
                    observed: Some(observed),
                    expected: Some(*held),
                })
            }
        }
    }

    /// Record a modification time actually read from the file, after a read
    /// or a successful write.
    pub fn observe(&mut self, entity: &EntityRef, modified: ModTime) {
        if let Some(previous) = self.marks.insert(entity.clone(), modified) {
            if previous != modified {
                tracing::debug!(entity = %entity, from = %previous, to = %modified, "Watermark advanced");
            }
        }
    }

    pub fn get(&self, entity: &EntityRef) -> Option<ModTime> {
        self.marks.get(entity).copied()
    }

    pub fn forget(&mut self, entity: &EntityRef) {
        self.marks.remove(entity);
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }
}
