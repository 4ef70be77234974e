//! Form configuration: the ordered fields of every task and registration.
//!
//! The engine only asks a [`FormSource`] for "the fields of (role, task)";
//! [`BuiltinForms`] is the compiled-in configuration.

use super::types::TaskType;
use coachline_core::{ids, model::Role};
use serde_json::{Map, Value};

/// Where the options of a pick field come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickSource {
    /// Clients actively connected to the trainer.
    Clients,
    /// Trainers actively connected to the client.
    Trainers,
    /// Habits owned by the trainer.
    OwnedHabits,
    /// Habits assigned to the client.
    AssignedHabits,
    /// Habits the trainer assigned to the client chosen in the `client` field.
    ClientAssignments,
}

/// How an answer is validated and normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text { max_len: usize },
    Phone,
    /// A finite number above zero.
    Number,
    /// One of a fixed set of options, by name or 1-based index.
    Choice(&'static [&'static str]),
    /// A trainer or client identifier.
    EntityId(Role),
    /// yes / no.
    Confirm,
    /// One of a live list, resolved by the engine against the store.
    Pick(PickSource),
    /// Value of the profile field chosen in `field`.
    ProfileValue,
    /// Value of the habit field chosen in `field`.
    HabitValue,
}

/// One question of a form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: &'static str,
    pub prompt: &'static str,
    pub kind: FieldKind,
}

const fn field(key: &'static str, prompt: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { key, prompt, kind }
}

/// Form configuration collaborator.
pub trait FormSource: Send + Sync {
    /// Ordered fields of a task for a role; `None` when the role cannot run it.
    fn task_fields(&self, role: Role, task: TaskType) -> Option<&'static [FieldSpec]>;

    /// Ordered fields asked when registering a new profile of `role`.
    fn registration_fields(&self, role: Role) -> &'static [FieldSpec];
}

const NAME: FieldSpec = field("name", "What's your full name?", FieldKind::Text { max_len: 80 });
const PHONE: FieldSpec = field("phone", "What's your phone number?", FieldKind::Phone);

const REGISTER_TRAINER: &[FieldSpec] = &[
    NAME,
    PHONE,
    field(
        "specialty",
        "What's your coaching specialty?",
        FieldKind::Text { max_len: 200 },
    ),
];

const REGISTER_CLIENT: &[FieldSpec] = &[
    NAME,
    PHONE,
    field("goal", "What's your main goal?", FieldKind::Text { max_len: 200 }),
];

const NONE: &[FieldSpec] = &[];

const CONFIRM_DELETE_PROFILE: &[FieldSpec] = &[field(
    "confirm",
    "This deletes your profile, your connections and (for trainers) your habits. Type yes to confirm or no to keep it.",
    FieldKind::Confirm,
)];

const TRAINER_EDIT_PROFILE: &[FieldSpec] = &[
    field(
        "field",
        "Which field do you want to change?",
        FieldKind::Choice(&["name", "phone", "specialty"]),
    ),
    field("value", "What's the new value?", FieldKind::ProfileValue),
];

const CLIENT_EDIT_PROFILE: &[FieldSpec] = &[
    field(
        "field",
        "Which field do you want to change?",
        FieldKind::Choice(&["name", "phone", "goal"]),
    ),
    field("value", "What's the new value?", FieldKind::ProfileValue),
];

const INVITE_CLIENT: &[FieldSpec] = &[field(
    "client_id",
    "What's the id of the client you want to invite?",
    FieldKind::EntityId(Role::Client),
)];

const CREATE_CLIENT: &[FieldSpec] = &[
    field(
        "name",
        "What's the client's full name?",
        FieldKind::Text { max_len: 80 },
    ),
    field("phone", "What's the client's phone number?", FieldKind::Phone),
];

const PICK_CLIENT: FieldSpec = field("client", "Which client?", FieldKind::Pick(PickSource::Clients));

const REMOVE_CLIENT: &[FieldSpec] = &[PICK_CLIENT];

const CREATE_HABIT: &[FieldSpec] = &[
    field(
        "name",
        "What's the habit called?",
        FieldKind::Text { max_len: 80 },
    ),
    field("target", "What's the target value?", FieldKind::Number),
    field(
        "unit",
        "In what unit (liters, steps, minutes...)?",
        FieldKind::Text { max_len: 30 },
    ),
    field(
        "frequency",
        "Is the target daily or weekly?",
        FieldKind::Choice(&["daily", "weekly"]),
    ),
];

const PICK_OWNED_HABIT: FieldSpec = field(
    "habit",
    "Which habit?",
    FieldKind::Pick(PickSource::OwnedHabits),
);

const EDIT_HABIT: &[FieldSpec] = &[
    PICK_OWNED_HABIT,
    field(
        "field",
        "Which field do you want to change?",
        FieldKind::Choice(&["name", "target", "unit", "frequency"]),
    ),
    field("value", "What's the new value?", FieldKind::HabitValue),
];

const DELETE_HABIT: &[FieldSpec] = &[
    PICK_OWNED_HABIT,
    field(
        "confirm",
        "Deleting a habit also removes its assignments and logs. Type yes to confirm or no to keep it.",
        FieldKind::Confirm,
    ),
];

const ASSIGN_HABIT: &[FieldSpec] = &[PICK_CLIENT, PICK_OWNED_HABIT];

const UNASSIGN_HABIT: &[FieldSpec] = &[
    PICK_CLIENT,
    field(
        "habit",
        "Which habit should be removed?",
        FieldKind::Pick(PickSource::ClientAssignments),
    ),
];

const CLIENT_PROGRESS: &[FieldSpec] = &[PICK_CLIENT];

const INVITE_TRAINER: &[FieldSpec] = &[field(
    "trainer_id",
    "What's the id of the trainer you want to invite?",
    FieldKind::EntityId(Role::Trainer),
)];

const REMOVE_TRAINER: &[FieldSpec] = &[field(
    "trainer",
    "Which trainer?",
    FieldKind::Pick(PickSource::Trainers),
)];

const LOG_HABIT: &[FieldSpec] = &[
    field(
        "habit",
        "Which habit are you logging?",
        FieldKind::Pick(PickSource::AssignedHabits),
    ),
    field("value", "How much?", FieldKind::Number),
];

/// Compiled-in forms.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinForms;

impl FormSource for BuiltinForms {
    fn task_fields(&self, role: Role, task: TaskType) -> Option<&'static [FieldSpec]> {
        use TaskType::*;
        let fields = match (role, task) {
            (_, ViewProfile | ViewHabits) => NONE,
            (_, DeleteProfile) => CONFIRM_DELETE_PROFILE,
            (Role::Trainer, EditProfile) => TRAINER_EDIT_PROFILE,
            (Role::Client, EditProfile) => CLIENT_EDIT_PROFILE,

            (Role::Trainer, InviteClient) => INVITE_CLIENT,
            (Role::Trainer, CreateClient) => CREATE_CLIENT,
            (Role::Trainer, ViewClients) => NONE,
            (Role::Trainer, RemoveClient) => REMOVE_CLIENT,
            (Role::Trainer, CreateHabit) => CREATE_HABIT,
            (Role::Trainer, EditHabit) => EDIT_HABIT,
            (Role::Trainer, DeleteHabit) => DELETE_HABIT,
            (Role::Trainer, AssignHabit) => ASSIGN_HABIT,
            (Role::Trainer, UnassignHabit) => UNASSIGN_HABIT,
            (Role::Trainer, ClientProgress) => CLIENT_PROGRESS,

            (Role::Client, InviteTrainer) => INVITE_TRAINER,
            (Role::Client, ViewTrainers) => NONE,
            (Role::Client, RemoveTrainer) => REMOVE_TRAINER,
            (Role::Client, LogHabit) => LOG_HABIT,
            (Role::Client, ViewProgress | WeeklyReport | MonthlyReport) => NONE,

            _ => return None,
        };
        Some(fields)
    }

    fn registration_fields(&self, role: Role) -> &'static [FieldSpec] {
        match role {
            Role::Trainer => REGISTER_TRAINER,
            Role::Client => REGISTER_CLIENT,
        }
    }
}

/// First field without an answer.
pub fn next_field<'a>(fields: &'a [FieldSpec], answers: &Map<String, Value>) -> Option<&'a FieldSpec> {
    fields.iter().find(|f| !answers.contains_key(f.key))
}

/// The question for a field, with fixed options spelled out.
pub fn prompt(field: &FieldSpec) -> String {
    match field.kind {
        FieldKind::Choice(options) => {
            let list: Vec<String> = options
                .iter()
                .enumerate()
                .map(|(i, o)| format!("{}. {o}", i + 1))
                .collect();
            format!("{}\n{}", field.prompt, list.join("\n"))
        }
        FieldKind::Confirm if !field.prompt.contains("yes") => {
            format!("{} (yes/no)", field.prompt)
        }
        _ => field.prompt.to_string(),
    }
}

/// Validate and normalize an answer. `Err` carries the message shown before
/// re-prompting. Pick fields pass through trimmed; the engine resolves them.
pub fn validate(
    kind: FieldKind,
    input: &str,
    answers: &Map<String, Value>,
) -> Result<String, String> {
    let input = input.trim();
    match kind {
        FieldKind::Text { max_len } => validate_text(input, max_len),
        FieldKind::Phone => validate_phone(input),
        FieldKind::Number => validate_number(input).map(|n| n.to_string()),
        FieldKind::Choice(options) => validate_choice(input, options),
        FieldKind::EntityId(role) => {
            let id = ids::normalize_id(input);
            if ids::is_valid_id(&id) {
                Ok(id)
            } else {
                Err(format!(
                    "A {role} id is 5 to 7 letters and digits, like AB12C."
                ))
            }
        }
        FieldKind::Confirm => match input.to_ascii_lowercase().as_str() {
            "yes" | "y" | "confirm" => Ok("yes".into()),
            "no" | "n" | "cancel" => Ok("no".into()),
            _ => Err("Please answer yes or no.".into()),
        },
        FieldKind::Pick(_) => {
            if input.is_empty() {
                Err("Please pick one of the options.".into())
            } else {
                Ok(input.to_string())
            }
        }
        FieldKind::ProfileValue => match answer(answers, "field") {
            Some("phone") => validate_phone(input),
            _ => validate_text(input, 200),
        },
        FieldKind::HabitValue => match answer(answers, "field") {
            Some("target") => validate_number(input).map(|n| n.to_string()),
            Some("frequency") => validate_choice(input, &["daily", "weekly"]),
            Some("unit") => validate_text(input, 30),
            _ => validate_text(input, 80),
        },
    }
}

/// String answer stored under `key`.
pub fn answer<'a>(answers: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    answers.get(key).and_then(Value::as_str)
}

fn validate_text(input: &str, max_len: usize) -> Result<String, String> {
    if input.is_empty() {
        return Err("This can't be empty.".into());
    }
    if input.chars().count() > max_len {
        return Err(format!("Please keep it under {max_len} characters."));
    }
    Ok(input.to_string())
}

fn validate_phone(input: &str) -> Result<String, String> {
    let plus = input.starts_with('+');
    let digits: String = input.chars().filter(|c| c.is_ascii_digit()).collect();
    let clean = input
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')' | '.'));
    if !clean || !(7..=15).contains(&digits.len()) {
        return Err("That doesn't look like a phone number. Use digits, e.g. +15551234567.".into());
    }
    Ok(if plus { format!("+{digits}") } else { digits })
}

fn validate_number(input: &str) -> Result<f64, String> {
    let token = input.split_whitespace().next().unwrap_or("");
    match token.replace(',', ".").parse::<f64>() {
        Ok(n) if n.is_finite() && n > 0.0 => Ok(n),
        Ok(_) => Err("Please enter a number above zero.".into()),
        Err(_) => Err(format!("'{input}' is not a number.")),
    }
}

fn validate_choice(input: &str, options: &[&str]) -> Result<String, String> {
    let lowered = input.to_ascii_lowercase();
    if let Some(option) = options.iter().find(|o| **o == lowered) {
        return Ok(option.to_string());
    }
    if let Ok(index) = lowered.parse::<usize>() {
        if (1..=options.len()).contains(&index) {
            return Ok(options[index - 1].to_string());
        }
    }
    Err(format!("Please choose one of: {}.", options.join(", ")))
}
