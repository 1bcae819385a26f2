use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// AgentTypeDef — static catalog entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTypeDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default = "default_capacity_limit")]
    pub capacity_limit: u32,
}

fn default_capacity_limit() -> u32 {
    4
}

impl AgentTypeDef {
    pub fn new(name: impl Into<String>, capabilities: &[&str]) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
            capacity_limit: default_capacity_limit(),
        }
    }
}

// ---------------------------------------------------------------------------
// AgentInstance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInstance {
    pub name: String,
    pub agent_type: String,
    /// Fleet role; `coordinator` instances receive health alerts.
    #[serde(default)]
    pub role: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub status: InstanceStatus,
}

impl AgentInstance {
    pub fn new(name: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent_type: agent_type.into(),
            role: None,
            registered_at: Utc::now(),
            status: InstanceStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == InstanceStatus::Active
    }

    pub fn is_coordinator(&self) -> bool {
        self.role.as_deref() == Some("coordinator") || self.agent_type == "coordinator"
    }
}

// ---------------------------------------------------------------------------
// PaneIdentity — the per-pane identity file contents
// ---------------------------------------------------------------------------

/// Contents of `panes/SAFE_PANE.identity`. The field names are the on-disk
/// contract shared with shell tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaneIdentity {
    pub pane: String,
    pub agent_mail_name: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    #[serde(default)]
    pub project_root: Option<String>,
    #[serde(default)]
    pub bound_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Bead — a task record in the external store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeadStatus {
    Open,
    InProgress,
    Ready,
    Blocked,
    Closed,
}

impl BeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BeadStatus::Open => "open",
            BeadStatus::InProgress => "in_progress",
            BeadStatus::Ready => "ready",
            BeadStatus::Blocked => "blocked",
            BeadStatus::Closed => "closed",
        }
    }
}

impl std::str::FromStr for BeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(BeadStatus::Open),
            "in_progress" | "in-progress" => Ok(BeadStatus::InProgress),
            "ready" => Ok(BeadStatus::Ready),
            "blocked" => Ok(BeadStatus::Blocked),
            "closed" | "done" => Ok(BeadStatus::Closed),
            other => Err(format!("unknown bead status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bead {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub status: BeadStatus,
    /// Current assignee. The bead store is authoritative for ownership.
    #[serde(default, alias = "assignee")]
    pub owner: Option<String>,
    #[serde(default, alias = "updated")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Bead {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            labels: Vec::new(),
            status: BeadStatus::Ready,
            owner: None,
            updated_at: Some(Utc::now()),
            dependencies: Vec::new(),
        }
    }

    /// Lowercased haystack for skill classification: title, description,
    /// and labels joined.
    pub fn classification_text(&self) -> String {
        let mut text = String::with_capacity(
            self.title.len() + self.description.len() + self.labels.len() * 8 + 2,
        );
        text.push_str(&self.title);
        text.push(' ');
        text.push_str(&self.description);
        for label in &self.labels {
            text.push(' ');
            text.push_str(label);
        }
        text.to_lowercase()
    }
}

// ---------------------------------------------------------------------------
// ActivityEvent — the shared append-only event stream
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Spawn,
    Claim,
    Complete,
    Idle,
    Teardown,
    Heartbeat,
    NotificationSent,
    ThresholdBreach,
    Recovered,
    StuckTasks,
    HungAgents,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub agent: Option<String>,
    pub event: ActivityKind,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ActivityEvent {
    pub fn new(kind: ActivityKind) -> Self {
        Self {
            timestamp: Utc::now(),
            agent: None,
            event: kind,
            payload: serde_json::Value::Null,
        }
    }

    pub fn for_agent(kind: ActivityKind, agent: impl Into<String>) -> Self {
        Self {
            agent: Some(agent.into()),
            ..Self::new(kind)
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// Reservation — advisory file lock held at the mail service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: u64,
    pub agent: String,
    pub project_slug: String,
    /// May carry a `repo:` prefix for cross-repo products; `*:` is the
    /// wildcard repo.
    pub path_pattern: String,
    pub exclusive: bool,
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Seconds until expiry; zero when already expired.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

// ---------------------------------------------------------------------------
// PendingRequesters — queue of agents waiting on a held path
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRequesters {
    pub holder: String,
    pub path_pattern: String,
    /// Insertion-ordered, deduplicated.
    #[serde(default)]
    pub requesters: Vec<String>,
}

impl PendingRequesters {
    pub fn new(holder: impl Into<String>, path_pattern: impl Into<String>) -> Self {
        Self {
            holder: holder.into(),
            path_pattern: path_pattern.into(),
            requesters: Vec::new(),
        }
    }

    /// Record a requester, preserving insertion order. Returns `false` when
    /// the requester was already queued.
    pub fn add(&mut self, requester: &str) -> bool {
        if self.requesters.iter().any(|r| r == requester) {
            return false;
        }
        self.requesters.push(requester.to_string());
        true
    }
}

// ---------------------------------------------------------------------------
// SwarmState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmAgent {
    pub index: u32,
    pub name: String,
    pub pane_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmState {
    pub session: String,
    pub count: u32,
    pub agent_type: String,
    pub spawn_time: DateTime<Utc>,
    pub agents: Vec<SwarmAgent>,
    #[serde(default)]
    pub product_uid: Option<String>,
}

// ---------------------------------------------------------------------------
// QueueLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueLevel {
    Normal,
    Low,
    Medium,
    High,
    Critical,
}

impl QueueLevel {
    /// Map a ready-queue depth onto a level given the four thresholds.
    pub fn classify(depth: u64, low: u64, medium: u64, high: u64, critical: u64) -> Self {
        if depth >= critical {
            QueueLevel::Critical
        } else if depth >= high {
            QueueLevel::High
        } else if depth >= medium {
            QueueLevel::Medium
        } else if depth >= low {
            QueueLevel::Low
        } else {
            QueueLevel::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueLevel::Normal => "normal",
            QueueLevel::Low => "low",
            QueueLevel::Medium => "medium",
            QueueLevel::High => "high",
            QueueLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for QueueLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "normal" => Ok(QueueLevel::Normal),
            "low" => Ok(QueueLevel::Low),
            "medium" => Ok(QueueLevel::Medium),
            "high" => Ok(QueueLevel::High),
            "critical" => Ok(QueueLevel::Critical),
            other => Err(format!("unknown queue level: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
