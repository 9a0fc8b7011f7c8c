//! Core types shared by every kasmos crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a plan. Only the plan FSM writes this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Ready,
    Planning,
    #[serde(alias = "in_progress")]
    Implementing,
    Reviewing,
    #[serde(alias = "completed", alias = "finished")]
    Done,
    Cancelled,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Planning => "planning",
            Self::Implementing => "implementing",
            Self::Reviewing => "reviewing",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }

    /// True for statuses that end the lifecycle (subject to reopen/start_over).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown plan status: {value}")]
pub struct ParsePlanStatusError {
    pub value: String,
}

impl FromStr for PlanStatus {
    type Err = ParsePlanStatusError;

    /// Parses a status string, canonicalising the legacy aliases
    /// (`in_progress` → implementing, `completed`/`finished` → done).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ready" => Ok(Self::Ready),
            "planning" => Ok(Self::Planning),
            "implementing" | "in_progress" => Ok(Self::Implementing),
            "reviewing" => Ok(Self::Reviewing),
            "done" | "completed" | "finished" => Ok(Self::Done),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ParsePlanStatusError {
                value: other.to_string(),
            }),
        }
    }
}

/// One plan's durable record in the plan store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub filename: String,
    pub status: PlanStatus,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl PlanEntry {
    /// Create a new entry in the initial `ready` status.
    pub fn new(
        filename: impl Into<String>,
        description: impl Into<String>,
        branch: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            filename: filename.into(),
            status: PlanStatus::Ready,
            description: description.into(),
            branch: branch.into(),
            topic: None,
            created_at,
            content: None,
        }
    }
}

/// A topic groups related plans; unique by name per project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// The role a spawned agent instance plays in the plan workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Planner,
    Coder,
    Reviewer,
    #[default]
    Solo,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Coder => "coder",
            Self::Reviewer => "reviewer",
            Self::Solo => "solo",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observed execution state of an agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Paused,
    Ready,
    Loading,
}

/// Validates the canonical plan filename form `YYYY-MM-DD-kebab-title.md`.
pub fn is_valid_plan_filename(filename: &str) -> bool {
    let Some(stem) = filename.strip_suffix(".md") else {
        return false;
    };
    let bytes = stem.as_bytes();
    if bytes.len() < 12 {
        return false;
    }

    let date_ok = bytes[..10]
        .iter()
        .enumerate()
        .all(|(idx, byte)| match idx {
            4 | 7 => *byte == b'-',
            _ => byte.is_ascii_digit(),
        });
    if !date_ok || bytes[10] != b'-' {
        return false;
    }

    let title = &bytes[11..];
    !title.is_empty()
        && title
            .iter()
            .all(|byte| byte.is_ascii_lowercase() || byte.is_ascii_digit() || *byte == b'-')
}

/// Strips the date prefix and `.md` suffix for display.
/// `"2026-02-20-my-feature.md"` → `"my-feature"`; non-dated names only lose
/// the extension.
pub fn display_name(filename: &str) -> &str {
    let name = filename.strip_suffix(".md").unwrap_or(filename);
    let bytes = name.as_bytes();
    if bytes.len() > 11
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes[10] == b'-'
        && bytes[..4].iter().all(u8::is_ascii_digit)
    {
        &name[11..]
    } else {
        name
    }
}
