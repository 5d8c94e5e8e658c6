use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::Error;

/// A work iteration, stored as `sprints/<id>.yaml`.
///
/// Fields the server does not know about are kept in `extra` and written
/// back unchanged, so hand-added annotations survive mutations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sprint {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Sprint document file name, e.g. `FEATURE-SPRINT-1.md`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub status: SprintStatus,
    #[serde(default)]
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub stories: Vec<StoryEntry>,
    #[serde(flatten)]
    pub extra: Mapping,
}

impl Sprint {
    /// Stories that parsed as proper story mappings, in file order.
    pub fn stories(&self) -> impl Iterator<Item = &Story> {
        self.stories.iter().filter_map(StoryEntry::as_story)
    }

    pub fn story_mut(&mut self, story_id: &str) -> Option<&mut Story> {
        self.stories.iter_mut().find_map(|entry| match entry {
            StoryEntry::Story(story) if story.id == story_id => Some(story),
            _ => None,
        })
    }

    pub fn has_story(&self, story_id: &str) -> bool {
        self.stories().any(|story| story.id == story_id)
    }
}

/// One entry of a sprint's `stories` list.
///
/// Hand-edited files sometimes contain stray scalars in the list (a line of
/// acceptance criteria that lost its indentation, say). Those are carried
/// along untouched and ignored by every operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StoryEntry {
    Story(Story),
    Other(Value),
}

impl StoryEntry {
    pub fn as_story(&self) -> Option<&Story> {
        match self {
            Self::Story(story) => Some(story),
            Self::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Story {
    pub id: String,
    pub status: StoryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: Mapping,
}

impl Story {
    pub fn new(id: impl Into<String>, status: StoryStatus) -> Self {
        Self {
            id: id.into(),
            status,
            notes: None,
            extra: Mapping::new(),
        }
    }
}

/// - `Planned`: scheduled but not started
/// - `Active`: the sprint currently being worked
/// - `Reference`: kept for context, not scheduled
/// - `Completed`: finished
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SprintStatus {
    Planned,
    Active,
    Reference,
    Completed,
}

impl SprintStatus {
    pub const VALID: &'static str = "planned, active, reference, completed";

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Active => "active",
            Self::Reference => "reference",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for SprintStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(Self::Planned),
            "active" => Ok(Self::Active),
            "reference" => Ok(Self::Reference),
            "completed" => Ok(Self::Completed),
            _ => Err(Error::rejected(format!(
                "Invalid status '{s}'. Must be one of: {}",
                Self::VALID
            ))),
        }
    }
}

impl fmt::Display for SprintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Planned,
    InProgress,
    Done,
}

impl StoryStatus {
    pub const VALID: &'static str = "planned, in_progress, done";

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }
}

impl FromStr for StoryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(Self::Planned),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(Error::rejected(format!(
                "Invalid status '{s}'. Must be one of: {}",
                Self::VALID
            ))),
        }
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for creating a sprint.
#[derive(Debug, Clone)]
pub struct NewSprint {
    pub id: String,
    pub title: String,
    pub goal: String,
    pub themes: Vec<String>,
    pub status: SprintStatus,
}

/// Partial sprint update. `None` leaves a field unchanged; `themes`
/// replaces the whole list.
#[derive(Debug, Clone, Default)]
pub struct SprintUpdate {
    pub status: Option<SprintStatus>,
    pub title: Option<String>,
    pub goal: Option<String>,
    pub themes: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct NewStory {
    pub id: String,
    pub status: StoryStatus,
    /// Only stored when non-empty.
    pub notes: String,
}

#[derive(Debug, Clone, Default)]
pub struct StoryUpdate {
    pub status: Option<StoryStatus>,
    pub notes: Option<String>,
}
