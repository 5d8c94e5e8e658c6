//! Coding guidance documents.
//!
//! Foundational guidance lives in `<data_root>/guidance/<name>.md` and is
//! shared by every project that inherits it. Project guidance lives in the
//! project's own repository and is listed per project in `config.yaml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::config::{expand_home, ProjectConfig};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GuidanceSet {
    pub project: String,
    /// Document text keyed by guidance name.
    pub guidance: BTreeMap<String, String>,
}

/// Collect the guidance that applies to `project`, optionally only the
/// document named `topic`. Missing files are skipped; an empty result is an
/// error.
pub fn load(
    guidance_dir: &Path,
    project: &str,
    config: &ProjectConfig,
    topic: Option<&str>,
) -> Result<GuidanceSet> {
    let wanted = |name: &str| topic.map_or(true, |t| t == name);
    let mut guidance = BTreeMap::new();

    for name in config.guidance.inherited() {
        if !wanted(&name) {
            continue;
        }
        let path = guidance_dir.join(format!("{name}.md"));
        if let Some(text) = read_if_present(&path)? {
            guidance.insert(name, text);
        }
    }

    let repo = expand_home(&config.repo);
    for doc in &config.guidance.project {
        if !wanted(&doc.name) {
            continue;
        }
        if doc.source != "repo" {
            tracing::debug!(project, name = %doc.name, source = %doc.source, "Unsupported guidance source");
            continue;
        }
        if !repo.is_dir() {
            continue;
        }
        if let Some(text) = read_if_present(&repo.join(&doc.path))? {
            guidance.insert(doc.name.clone(), text);
        }
    }

    if guidance.is_empty() {
        return Err(match topic {
            Some(topic) => Error::NotFound(format!("Guidance for topic '{topic}'")),
            None => Error::NotFound(format!("Guidance for project '{project}'")),
        });
    }

    Ok(GuidanceSet {
        project: project.to_string(),
        guidance,
    })
}

fn read_if_present(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}
