//! Command surface: universal commands and the deterministic role commands.

#[cfg(test)]
mod tests;

use crate::tasks::{forms::FormSource, types::TaskType};
use coachline_core::{error::CoachlineError, model::Role};
use std::collections::HashSet;

/// Commands intercepted before any role-specific logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniversalCommand {
    Logout,
    SwitchRole,
    Register,
    Stop,
    Help,
}

impl UniversalCommand {
    pub const NAMES: [&'static str; 5] = ["/logout", "/switch-role", "/register", "/stop", "/help"];

    /// Parse a universal command. Returns `None` for anything else.
    pub fn parse(text: &str) -> Option<Self> {
        match command_word(text)?.as_str() {
            "/logout" => Some(Self::Logout),
            "/switch-role" => Some(Self::SwitchRole),
            "/register" => Some(Self::Register),
            "/stop" => Some(Self::Stop),
            "/help" | "/start" => Some(Self::Help),
            _ => None,
        }
    }
}

/// Normalize the first word of a command message: strips a `@botname`
/// suffix, lowercases, and accepts `_` for `-` (Telegram menus can't use `-`).
pub fn command_word(text: &str) -> Option<String> {
    let first = text.split_whitespace().next()?;
    if !first.starts_with('/') {
        return None;
    }
    let cmd = first.split('@').next().unwrap_or(first);
    Some(cmd.to_lowercase().replace('_', "-"))
}

/// A deterministic role command bound to a task type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub roles: &'static [Role],
    pub task: TaskType,
    pub description: &'static str,
}

const BOTH: &[Role] = &[Role::Trainer, Role::Client];
const TRAINER: &[Role] = &[Role::Trainer];
const CLIENT: &[Role] = &[Role::Client];

const fn command(
    name: &'static str,
    roles: &'static [Role],
    task: TaskType,
    description: &'static str,
) -> CommandSpec {
    CommandSpec {
        name,
        roles,
        task,
        description,
    }
}

/// Every role command.
pub const COMMANDS: &[CommandSpec] = &[
    command("/profile", BOTH, TaskType::ViewProfile, "show your profile"),
    command("/edit-profile", BOTH, TaskType::EditProfile, "change a profile field"),
    command("/delete-profile", BOTH, TaskType::DeleteProfile, "delete this profile"),
    command("/habits", BOTH, TaskType::ViewHabits, "list habits"),
    command("/invite-client", TRAINER, TaskType::InviteClient, "invite a client by id"),
    command(
        "/create-client",
        TRAINER,
        TaskType::CreateClient,
        "create a client by phone and invite them",
    ),
    command("/clients", TRAINER, TaskType::ViewClients, "list your clients"),
    command("/remove-client", TRAINER, TaskType::RemoveClient, "disconnect a client"),
    command("/create-habit", TRAINER, TaskType::CreateHabit, "create a habit"),
    command("/edit-habit", TRAINER, TaskType::EditHabit, "change a habit"),
    command("/delete-habit", TRAINER, TaskType::DeleteHabit, "delete a habit"),
    command("/assign-habit", TRAINER, TaskType::AssignHabit, "assign a habit to a client"),
    command(
        "/unassign-habit",
        TRAINER,
        TaskType::UnassignHabit,
        "remove a habit from a client",
    ),
    command(
        "/client-progress",
        TRAINER,
        TaskType::ClientProgress,
        "see a client's last 7 days",
    ),
    command("/invite-trainer", CLIENT, TaskType::InviteTrainer, "invite a trainer by id"),
    command("/trainers", CLIENT, TaskType::ViewTrainers, "list your trainers"),
    command("/remove-trainer", CLIENT, TaskType::RemoveTrainer, "disconnect a trainer"),
    command("/log", CLIENT, TaskType::LogHabit, "log progress on a habit"),
    command("/progress", CLIENT, TaskType::ViewProgress, "see today's progress"),
    command("/weekly-report", CLIENT, TaskType::WeeklyReport, "summary of the last 7 days"),
    command(
        "/monthly-report",
        CLIENT,
        TaskType::MonthlyReport,
        "last 30 days, exported as CSV",
    ),
];

/// Validated view over a command table.
pub struct CommandRegistry {
    commands: &'static [CommandSpec],
}

impl CommandRegistry {
    /// Check the table against the form configuration: names start with `/`,
    /// are unique per role, don't shadow universal commands, and every
    /// (role, task) has a form.
    pub fn new(
        commands: &'static [CommandSpec],
        forms: &dyn FormSource,
    ) -> Result<Self, CoachlineError> {
        let mut seen = HashSet::new();
        for spec in commands {
            if !spec.name.starts_with('/') || spec.name.len() < 2 {
                return Err(CoachlineError::Config(format!(
                    "command '{}' must start with '/'",
                    spec.name
                )));
            }
            if spec.name.contains('_') || spec.name.to_lowercase() != spec.name {
                return Err(CoachlineError::Config(format!(
                    "command '{}' must be lowercase with '-' separators",
                    spec.name
                )));
            }
            if UniversalCommand::NAMES.contains(&spec.name) {
                return Err(CoachlineError::Config(format!(
                    "command '{}' clashes with a universal command",
                    spec.name
                )));
            }
            if spec.roles.is_empty() {
                return Err(CoachlineError::Config(format!(
                    "command '{}' has no role",
                    spec.name
                )));
            }
            for role in spec.roles {
                if !seen.insert((*role, spec.name)) {
                    return Err(CoachlineError::Config(format!(
                        "command '{}' is defined twice for {role}",
                        spec.name
                    )));
                }
                if forms.task_fields(*role, spec.task).is_none() {
                    return Err(CoachlineError::Config(format!(
                        "command '{}' has no {role} form for {}",
                        spec.name, spec.task
                    )));
                }
            }
        }
        Ok(Self { commands })
    }

    /// The role command a message starts with, if any.
    pub fn lookup(&self, role: Role, text: &str) -> Option<&'static CommandSpec> {
        let word = command_word(text)?;
        self.find_by_name(role, &word)
    }

    /// Find a role command by name, with or without the leading `/`.
    pub fn find_by_name(&self, role: Role, name: &str) -> Option<&'static CommandSpec> {
        let name = name.trim().trim_start_matches('/').to_lowercase().replace('_', "-");
        self.commands
            .iter()
            .find(|c| c.roles.contains(&role) && c.name[1..] == name)
    }

    /// Commands available to a role, in table order.
    pub fn for_role(&self, role: Role) -> impl Iterator<Item = &'static CommandSpec> + '_ {
        self.commands.iter().filter(move |c| c.roles.contains(&role))
    }

    /// "/name - description" lines for a role.
    pub fn describe(&self, role: Role) -> String {
        self.for_role(role)
            .map(|c| format!("{} - {}", c.name, c.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Full help for a logged-in role.
    pub fn help(&self, role: Role) -> String {
        format!(
            "You're using your {role} profile. Commands:\n{}\n\n\
             /switch-role - use your other profile\n\
             /register - add a profile for the other role\n\
             /stop - cancel the task in progress\n\
             /logout - log out\n\
             /help - this message\n\n\
             You can also just tell me what you want to do.",
            self.describe(role)
        )
    }
}

/// Help for someone without a profile yet.
pub const GUEST_HELP: &str = "I help trainers and their clients keep track of habits.\n\n\
Reply \"trainer\" or \"client\" (or send /register) to create your profile.\n\
/stop - cancel registration\n\
/help - this message";

/// Greeting for an unknown sender.
pub const WELCOME: &str =
    "Welcome! I connect trainers with their clients and track daily habits. Are you a trainer or a client?";
