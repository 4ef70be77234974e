//! Task types: the stable identifiers stored in `tasks.task_type`.

use std::fmt;

/// Every multi-step (or zero-step) workflow a role can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    ViewProfile,
    EditProfile,
    DeleteProfile,
    ViewHabits,
    InviteClient,
    CreateClient,
    ViewClients,
    RemoveClient,
    CreateHabit,
    EditHabit,
    DeleteHabit,
    AssignHabit,
    UnassignHabit,
    ClientProgress,
    InviteTrainer,
    ViewTrainers,
    RemoveTrainer,
    LogHabit,
    ViewProgress,
    WeeklyReport,
    MonthlyReport,
}

impl TaskType {
    pub const ALL: [TaskType; 21] = [
        Self::ViewProfile,
        Self::EditProfile,
        Self::DeleteProfile,
        Self::ViewHabits,
        Self::InviteClient,
        Self::CreateClient,
        Self::ViewClients,
        Self::RemoveClient,
        Self::CreateHabit,
        Self::EditHabit,
        Self::DeleteHabit,
        Self::AssignHabit,
        Self::UnassignHabit,
        Self::ClientProgress,
        Self::InviteTrainer,
        Self::ViewTrainers,
        Self::RemoveTrainer,
        Self::LogHabit,
        Self::ViewProgress,
        Self::WeeklyReport,
        Self::MonthlyReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ViewProfile => "view_profile",
            Self::EditProfile => "edit_profile",
            Self::DeleteProfile => "delete_profile",
            Self::ViewHabits => "view_habits",
            Self::InviteClient => "invite_client",
            Self::CreateClient => "create_client",
            Self::ViewClients => "view_clients",
            Self::RemoveClient => "remove_client",
            Self::CreateHabit => "create_habit",
            Self::EditHabit => "edit_habit",
            Self::DeleteHabit => "delete_habit",
            Self::AssignHabit => "assign_habit",
            Self::UnassignHabit => "unassign_habit",
            Self::ClientProgress => "client_progress",
            Self::InviteTrainer => "invite_trainer",
            Self::ViewTrainers => "view_trainers",
            Self::RemoveTrainer => "remove_trainer",
            Self::LogHabit => "log_habit",
            Self::ViewProgress => "view_progress",
            Self::WeeklyReport => "weekly_report",
            Self::MonthlyReport => "monthly_report",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Human label used in replies ("you already have <label> in progress").
    pub fn label(&self) -> &'static str {
        match self {
            Self::ViewProfile => "viewing your profile",
            Self::EditProfile => "editing your profile",
            Self::DeleteProfile => "deleting your profile",
            Self::ViewHabits => "listing habits",
            Self::InviteClient => "inviting a client",
            Self::CreateClient => "creating a client",
            Self::ViewClients => "listing clients",
            Self::RemoveClient => "removing a client",
            Self::CreateHabit => "creating a habit",
            Self::EditHabit => "editing a habit",
            Self::DeleteHabit => "deleting a habit",
            Self::AssignHabit => "assigning a habit",
            Self::UnassignHabit => "unassigning a habit",
            Self::ClientProgress => "a client progress report",
            Self::InviteTrainer => "inviting a trainer",
            Self::ViewTrainers => "listing trainers",
            Self::RemoveTrainer => "removing a trainer",
            Self::LogHabit => "logging a habit",
            Self::ViewProgress => "today's progress",
            Self::WeeklyReport => "a weekly report",
            Self::MonthlyReport => "a monthly report",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_task_type_strings_are_unique_and_parse_back() {
        let names: HashSet<&str> = TaskType::ALL.iter().map(|t| t.as_str()).collect();
        assert_eq!(names.len(), TaskType::ALL.len());
        for t in TaskType::ALL {
            assert_eq!(TaskType::parse(t.as_str()), Some(t));
        }
        assert!(TaskType::parse("order_pizza").is_none());
    }
}
