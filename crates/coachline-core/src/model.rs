//! Domain records shared by the store and the router.
//!
//! Status enums persist as their lowercase `as_str` form and encode their
//! legal transitions, so the store and the router agree on one state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One of the two user roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Trainer,
    Client,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Trainer, Role::Client];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trainer => "trainer",
            Self::Client => "client",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trainer" => Some(Self::Trainer),
            "client" => Some(Self::Client),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::Trainer => Self::Client,
            Self::Client => Self::Trainer,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mapping from a channel address to entity links and the current login role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub address: String,
    pub channel: String,
    pub trainer_id: Option<String>,
    pub client_id: Option<String>,
    pub login_role: Option<Role>,
    pub created_at: String,
}

impl Account {
    /// The entity linked for `role`, if any.
    pub fn entity_id(&self, role: Role) -> Option<&str> {
        match role {
            Role::Trainer => self.trainer_id.as_deref(),
            Role::Client => self.client_id.as_deref(),
        }
    }

    /// Roles with a linked entity, trainer first.
    pub fn linked_roles(&self) -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|r| self.entity_id(*r).is_some())
            .collect()
    }
}

/// Lifecycle status of a trainer or client profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Active,
    /// Created by a trainer on the client's behalf; becomes active on first acceptance.
    Invited,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Invited => "invited",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "invited" => Some(Self::Invited),
            _ => None,
        }
    }
}

/// A trainer or client profile.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub role: Role,
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    /// Role-specific free-form profile fields (specialty, goal).
    pub profile: Map<String, Value>,
    pub status: EntityStatus,
    pub created_at: String,
}

impl Entity {
    /// Profile field lookup covering both columns and free-form fields.
    pub fn field(&self, key: &str) -> Option<String> {
        match key {
            "name" => Some(self.name.clone()),
            "phone" => self.phone.clone(),
            other => self.profile.get(other).map(|v| match v {
                Value::String(s) => s.clone(),
                v => v.to_string(),
            }),
        }
    }
}

/// Status of a multi-step task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Stopped,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "stopped" => Some(Self::Stopped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Only a running task may move, and only to a terminal status.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        matches!(
            (self, target),
            (
                Self::Running,
                Self::Completed | Self::Stopped | Self::Failed
            )
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable multi-step workflow for one (role, entity).
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: String,
    pub role: Role,
    pub entity_id: String,
    pub task_type: String,
    pub status: TaskStatus,
    /// Step answers collected so far, keyed by field.
    pub payload: Map<String, Value>,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub stopped_at: Option<String>,
}

/// Status of a trainer/client relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
    Pending,
    Active,
    Declined,
    Removed,
}

impl EdgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Declined => "declined",
            Self::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "declined" => Some(Self::Declined),
            "removed" => Some(Self::Removed),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, target: EdgeStatus) -> bool {
        matches!(
            (self, target),
            (
                Self::Pending,
                Self::Active | Self::Declined | Self::Removed
            ) | (Self::Active, Self::Removed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Declined | Self::Removed)
    }
}

impl fmt::Display for EdgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The relationship record between one trainer and one client.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipEdge {
    pub id: String,
    pub trainer_id: String,
    pub client_id: String,
    pub status: EdgeStatus,
    pub invited_by: Role,
    pub created_at: String,
    pub responded_at: Option<String>,
}

impl RelationshipEdge {
    /// The role that must accept or reject.
    pub fn invitee_role(&self) -> Role {
        self.invited_by.opposite()
    }

    /// Entity id on the given side of the edge.
    pub fn side(&self, role: Role) -> &str {
        match role {
            Role::Trainer => &self.trainer_id,
            Role::Client => &self.client_id,
        }
    }
}

/// How often a habit target applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            _ => None,
        }
    }
}

/// A habit owned by a trainer.
#[derive(Debug, Clone, PartialEq)]
pub struct Habit {
    pub id: String,
    pub trainer_id: String,
    pub name: String,
    pub target: f64,
    pub unit: String,
    pub frequency: Frequency,
    pub created_at: String,
}

/// A habit assigned to a client under a trainer.
#[derive(Debug, Clone, PartialEq)]
pub struct HabitAssignment {
    pub id: String,
    pub habit_id: String,
    pub client_id: String,
    pub trainer_id: String,
    pub active: bool,
    pub created_at: String,
}

/// One immutable habit-completion value.
#[derive(Debug, Clone, PartialEq)]
pub struct HabitLogEntry {
    pub id: i64,
    pub habit_id: String,
    pub client_id: String,
    pub value: f64,
    pub logged_at: DateTime<Utc>,
}

/// Direction of a stored conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One stored message turn, used as fallback classifier context.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageTurn {
    pub speaker: String,
    pub text: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_transitions() {
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Stopped));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Stopped.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn test_edge_status_transitions() {
        assert!(EdgeStatus::Pending.can_transition_to(EdgeStatus::Active));
        assert!(EdgeStatus::Pending.can_transition_to(EdgeStatus::Declined));
        assert!(EdgeStatus::Active.can_transition_to(EdgeStatus::Removed));
        assert!(!EdgeStatus::Active.can_transition_to(EdgeStatus::Active));
        assert!(!EdgeStatus::Removed.can_transition_to(EdgeStatus::Active));
        assert!(!EdgeStatus::Declined.can_transition_to(EdgeStatus::Pending));
        assert!(EdgeStatus::Removed.is_terminal());
    }

    #[test]
    fn test_status_strings_parse_back() {
        for s in ["running", "completed", "stopped", "failed"] {
            assert_eq!(TaskStatus::parse(s).map(|t| t.as_str()), Some(s));
        }
        for s in ["pending", "active", "declined", "removed"] {
            assert_eq!(EdgeStatus::parse(s).map(|t| t.to_string()), Some(s.into()));
        }
        assert!(Role::parse("admin").is_none());
    }

    #[test]
    fn test_account_linked_roles() {
        let account = Account {
            address: "42".into(),
            channel: "telegram".into(),
            trainer_id: None,
            client_id: Some("AB12C".into()),
            login_role: None,
            created_at: String::new(),
        };
        assert_eq!(account.linked_roles(), vec![Role::Client]);
        assert_eq!(account.entity_id(Role::Client), Some("AB12C"));
        assert_eq!(Role::Client.opposite(), Role::Trainer);
    }

    #[test]
    fn test_edge_invitee_is_opposite_of_inviter() {
        let edge = RelationshipEdge {
            id: "e1".into(),
            trainer_id: "TR01A".into(),
            client_id: "AB12C".into(),
            status: EdgeStatus::Pending,
            invited_by: Role::Trainer,
            created_at: String::new(),
            responded_at: None,
        };
        assert_eq!(edge.invitee_role(), Role::Client);
        assert_eq!(edge.side(Role::Client), "AB12C");
    }
}
