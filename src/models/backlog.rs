use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

use crate::error::Error;

/// Contents of `backlog.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Backlog {
    #[serde(default)]
    pub backlog: Vec<BacklogItem>,
    #[serde(flatten)]
    pub extra: Mapping,
}

impl Backlog {
    pub fn get(&self, id: &str) -> Option<&BacklogItem> {
        self.backlog.iter().find(|item| item.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut BacklogItem> {
        self.backlog.iter_mut().find(|item| item.id == id)
    }

    pub fn count(&self, status: BacklogStatus) -> usize {
        self.backlog.iter().filter(|item| item.status == status).count()
    }
}

/// Unscheduled work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BacklogItem {
    pub id: String,
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub summary: String,
    pub status: BacklogStatus,
    #[serde(default)]
    pub related_sprints: Vec<String>,
    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BacklogStatus {
    Todo,
    InProgress,
    Done,
}

impl BacklogStatus {
    pub const VALID: &'static str = "todo, in_progress, done";

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }
}

impl FromStr for BacklogStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(Error::rejected(format!(
                "Invalid status '{s}'. Must be: {}",
                Self::VALID
            ))),
        }
    }
}

impl fmt::Display for BacklogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for adding a backlog item.
#[derive(Debug, Clone)]
pub struct NewBacklogItem {
    pub id: String,
    pub summary: String,
    pub theme: String,
    pub status: BacklogStatus,
    pub related_sprints: Vec<String>,
}

impl From<NewBacklogItem> for BacklogItem {
    fn from(input: NewBacklogItem) -> Self {
        Self {
            id: input.id,
            theme: input.theme,
            summary: input.summary,
            status: input.status,
            related_sprints: input.related_sprints,
            extra: Mapping::new(),
        }
    }
}

/// Partial backlog update. Only provided fields change.
#[derive(Debug, Clone, Default)]
pub struct BacklogUpdate {
    pub status: Option<BacklogStatus>,
    pub summary: Option<String>,
    pub theme: Option<String>,
    pub related_sprints: Option<Vec<String>>,
}
